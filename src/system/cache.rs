use super::tags::{TagId, TagSet};
use super::System;
use crate::array::{Array1D, Array2D, Element};
use crate::dispatch::{Functor, ReinitLoop};
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use nalgebra::Vector3;

/// Solution values and gradients projected onto the volume quadrature points, per vector tag
/// and variable.
///
/// Storage for a `(tag, variable)` pair is allocated on first use. Validity is tracked per
/// `(tag, subdomain, variable)` and reset whenever the solution changes.
#[derive(Debug)]
pub struct QpSolutionCache {
    total_qps: usize,
    values: Array1D<Array1D<Array1D<f64>>>,
    gradients: Array1D<Array1D<Array1D<[f64; 3]>>>,
    flags: Array1D<Array2D<bool>>,
}

fn nested<T: Element>(num_tags: usize, num_variables: usize) -> eyre::Result<Array1D<Array1D<Array1D<T>>>> {
    let mut array = Array1D::from_dims(&[num_tags])?;
    for tag in 0..num_tags {
        array.set(tag, Array1D::from_dims(&[num_variables])?);
    }
    array.copy_to_device_nested()?;
    Ok(array)
}

/// Allocates the `(tag, var)` slot if needed. Returns whether it was allocated.
fn allocate_slot<T: Element>(
    array: &mut Array1D<Array1D<Array1D<T>>>,
    tag: TagId,
    var: usize,
    len: usize,
) -> eyre::Result<bool> {
    let slot = &mut array.as_mut_slice()[tag].as_mut_slice()[var];
    if slot.is_init() {
        return Ok(false);
    }
    *slot = Array1D::from_dims(&[len])?;
    Ok(true)
}

impl QpSolutionCache {
    pub fn new(num_tags: usize, num_subdomains: usize, num_variables: usize, total_qps: usize) -> eyre::Result<Self> {
        let mut flags = Array1D::from_dims(&[num_tags])?;
        for tag in 0..num_tags {
            flags.set(tag, Array2D::from_dims(&[num_subdomains, num_variables])?);
        }
        flags.copy_to_device_nested()?;
        Ok(Self {
            total_qps,
            values: nested(num_tags, num_variables)?,
            gradients: nested(num_tags, num_variables)?,
            flags,
        })
    }

    pub fn num_tags(&self) -> usize {
        self.values.size()
    }

    /// Allocates storage for every pair of the given tags and variables.
    pub fn preallocate(&mut self, tags: TagSet, variables: &[usize]) -> eyre::Result<()> {
        let mut changed = false;
        for tag in tags.truncated(self.num_tags()).iter() {
            for &var in variables {
                changed |= allocate_slot(&mut self.values, tag, var, self.total_qps)?;
                changed |= allocate_slot(&mut self.gradients, tag, var, self.total_qps)?;
            }
        }
        if changed {
            self.values.copy_to_device_nested()?;
            self.gradients.copy_to_device_nested()?;
        }
        Ok(())
    }

    pub fn is_preallocated(&self, tag: TagId, var: usize) -> bool {
        tag < self.num_tags() && self.values.get_ref(tag).get_ref(var).is_init()
    }

    #[inline]
    pub fn is_cached(&self, tag: TagId, subdomain: usize, var: usize) -> bool {
        tag < self.num_tags() && self.flags.get_ref(tag).at([subdomain as isize, var as isize])
    }

    /// Marks the given tags and variables as cached on the given subdomains.
    pub fn set_flags(&mut self, tags: TagSet, variables: &[usize], subdomains: &[usize]) -> eyre::Result<()> {
        for tag in tags.truncated(self.num_tags()).iter() {
            let flags = &mut self.flags.as_mut_slice()[tag];
            for &subdomain in subdomains {
                for &var in variables {
                    flags.set_at([subdomain as isize, var as isize], true);
                }
            }
            flags.copy_to_device()?;
        }
        Ok(())
    }

    pub fn clear_flags(&mut self) {
        for flags in self.flags.as_mut_slice() {
            flags.fill(false);
        }
    }

    #[inline]
    pub fn value(&self, tag: TagId, var: usize, qp: usize) -> f64 {
        self.values.get_ref(tag).get_ref(var).get(qp)
    }

    #[inline]
    pub fn gradient(&self, tag: TagId, var: usize, qp: usize) -> Vector3<f64> {
        Vector3::from(self.gradients.get_ref(tag).get_ref(var).get(qp))
    }

    /// # Safety
    ///
    /// Global quadrature point `qp` must not be accessed concurrently.
    unsafe fn store(&self, tag: TagId, var: usize, qp: usize, value: f64, gradient: Vector3<f64>) {
        self.values.get_ref(tag).get_ref(var).write(qp, value);
        self.gradients.get_ref(tag).get_ref(var).write(qp, gradient.into());
    }
}

/// Projects the solution onto the quadrature points of a list of elements.
pub(crate) struct Reinit<'a> {
    pub mesh: &'a Mesh,
    pub tables: &'a FeTables,
    pub system: &'a System,
    pub elements: &'a Array1D<usize>,
    pub tags: &'a Array1D<usize>,
    pub variables: &'a Array1D<usize>,
}

impl Functor<ReinitLoop> for Reinit<'_> {
    fn call(&self, _: ReinitLoop, index: usize) {
        let element = self.elements.get(index);
        let subdomain = self.mesh.subdomain(element);
        let offset = self.mesh.qp_offset(element);
        let cache = self.system.cache();
        for qp in 0..self.tables.num_qps(self.mesh.element_type(element)) {
            let transform = self.tables.transform(self.mesh, element, None, qp);
            for &var in self.variables.as_slice() {
                if !self.system.dofs().is_active(var, subdomain) {
                    continue;
                }
                for &tag in self.tags.as_slice() {
                    let (value, gradient) = self.system.project(
                        self.mesh,
                        self.tables,
                        element,
                        None,
                        var,
                        tag,
                        qp,
                        &transform.inverse_jacobian_t,
                    );
                    // Quadrature points of distinct elements are disjoint
                    unsafe { cache.store(tag, var, offset + qp, value, gradient) };
                }
            }
        }
    }
}

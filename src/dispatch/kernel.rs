use super::datum::Datum;
use super::launcher::Functor;
use super::object::{accumulate_jacobian, accumulate_residual, PhaseContext, ResidualObject, ResidualObjectParams};
use super::tags::{JacobianLoop, OffDiagJacobianLoop, ResidualLoop};
use crate::array::Array1D;
use crate::mesh::Mesh;
use crate::system::System;
use log::debug;

/// A volume integral contributing to the residual of one variable.
///
/// Jacobian loops are only launched for kernels that declare them through the associated
/// constants.
pub trait Kernel: Send + Sync {
    /// Enables the Jacobian loop. Must be set when overriding `compute_qp_jacobian`.
    const HAS_JACOBIAN: bool = false;
    /// Enables the off-diagonal Jacobian loop. Must be set when overriding
    /// `compute_qp_off_diag_jacobian`.
    const HAS_OFF_DIAG_JACOBIAN: bool = false;

    /// Contribution of test function `i` at `qp`, before multiplication by `JxW`.
    fn compute_qp_residual(&self, i: usize, qp: usize, datum: &mut Datum) -> f64;

    /// Derivative of the residual of test function `i` with respect to the coefficient of
    /// trial function `j` of the same variable.
    ///
    /// Never called unless `HAS_JACOBIAN` is `true`.
    fn compute_qp_jacobian(&self, _i: usize, _j: usize, _qp: usize, _datum: &mut Datum) -> f64 {
        0.0
    }

    /// Derivative with respect to trial function `j` of the coupled variable `jvar`.
    ///
    /// Never called unless `HAS_OFF_DIAG_JACOBIAN` is `true`.
    fn compute_qp_off_diag_jacobian(&self, _i: usize, _j: usize, _jvar: usize, _qp: usize, _datum: &mut Datum) -> f64 {
        0.0
    }
}

/// A kernel bound to the elements of its subdomains.
pub struct KernelObject<K> {
    kernel: K,
    params: ResidualObjectParams,
    elements: Array1D<usize>,
}

impl<K: Kernel> KernelObject<K> {
    pub fn new(kernel: K, params: ResidualObjectParams, mesh: &Mesh, system: &System) -> eyre::Result<Self> {
        params.validate(mesh, system)?;
        let elements: Vec<usize> = mesh
            .elements_in(&params.blocks)
            .into_iter()
            .filter(|&e| system.dofs().is_active(params.variable, mesh.subdomain(e)))
            .collect();
        debug!("kernel '{}' acts on {} elements", params.name, elements.len());
        Ok(Self {
            kernel,
            params,
            elements: Array1D::from_slice(&elements),
        })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn num_elements(&self) -> usize {
        self.elements.size()
    }
}

struct KernelWorkItem<'a, K> {
    object: &'a KernelObject<K>,
    ctx: &'a PhaseContext<'a>,
}

impl<K: Kernel> KernelWorkItem<'_, K> {
    fn datum(&self, index: usize) -> Datum<'_> {
        let element = self.object.elements.get(index);
        Datum::on_element(self.ctx, self.object.params.variable, element)
    }
}

impl<K: Kernel> Functor<ResidualLoop> for KernelWorkItem<'_, K> {
    fn call(&self, _: ResidualLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.residual_tags(&self.object.params);
        let kernel = &self.object.kernel;
        accumulate_residual(self.ctx.system, tags, &mut datum, self.object.params.variable, |i, qp, datum| {
            kernel.compute_qp_residual(i, qp, datum)
        });
    }
}

impl<K: Kernel> Functor<JacobianLoop> for KernelWorkItem<'_, K> {
    fn call(&self, _: JacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.matrix_tags(&self.object.params);
        let var = self.object.params.variable;
        let kernel = &self.object.kernel;
        accumulate_jacobian(self.ctx.system, tags, &mut datum, var, var, |i, j, qp, datum| {
            kernel.compute_qp_jacobian(i, j, qp, datum)
        });
    }
}

impl<K: Kernel> Functor<OffDiagJacobianLoop> for KernelWorkItem<'_, K> {
    fn call(&self, _: OffDiagJacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.matrix_tags(&self.object.params);
        let var = self.object.params.variable;
        let kernel = &self.object.kernel;
        for &jvar in self.ctx.system.dofs().coupled_variables(var) {
            accumulate_jacobian(self.ctx.system, tags, &mut datum, var, jvar, |i, j, qp, datum| {
                kernel.compute_qp_off_diag_jacobian(i, j, jvar, qp, datum)
            });
        }
    }
}

impl<K: Kernel> ResidualObject for KernelObject<K> {
    fn params(&self) -> &ResidualObjectParams {
        &self.params
    }

    fn compute_residual(&self, ctx: &PhaseContext) {
        if ctx.residual_tags(&self.params).is_empty() {
            return;
        }
        let item = KernelWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<ResidualLoop, _>(&item, self.elements.size());
    }

    fn compute_jacobian(&self, ctx: &PhaseContext) {
        if ctx.matrix_tags(&self.params).is_empty() {
            return;
        }
        let item = KernelWorkItem { object: self, ctx };
        if K::HAS_JACOBIAN {
            ctx.dispatcher
                .parallel_for::<JacobianLoop, _>(&item, self.elements.size());
        } else {
            ctx.dispatcher.skip::<JacobianLoop>(&self.params.name);
        }
        let coupled = !ctx
            .system
            .dofs()
            .coupled_variables(self.params.variable)
            .is_empty();
        if K::HAS_OFF_DIAG_JACOBIAN && coupled {
            ctx.dispatcher
                .parallel_for::<OffDiagJacobianLoop, _>(&item, self.elements.size());
        } else {
            ctx.dispatcher
                .skip::<OffDiagJacobianLoop>(&self.params.name);
        }
    }
}

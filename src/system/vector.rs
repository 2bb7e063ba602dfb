use crate::array::Array1D;
use crate::space::{with_space, MemcpyKind, MemorySpace};
use eyre::ensure;
use nalgebra::DVector;

/// A vector over the local dofs followed by the ghost dofs of this process.
///
/// Element accesses resolve to the side of the current execution space.
#[derive(Debug)]
pub struct GhostedVector {
    values: Array1D<f64>,
    num_local: usize,
}

impl GhostedVector {
    pub fn new(num_local: usize, num_ghost: usize) -> eyre::Result<Self> {
        Ok(Self {
            values: Array1D::from_dims(&[num_local + num_ghost])?,
            num_local,
        })
    }

    pub fn len(&self) -> usize {
        self.values.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_local(&self) -> usize {
        self.num_local
    }

    pub fn num_ghost(&self) -> usize {
        self.len() - self.num_local
    }

    #[inline]
    pub fn get(&self, dof: usize) -> f64 {
        self.values.get(dof)
    }

    #[inline]
    pub fn atomic_add(&self, dof: usize, value: f64) {
        self.values.atomic_add(dof, value)
    }

    /// Overwrites entry `dof`.
    ///
    /// # Safety
    ///
    /// No other work-item may access `dof` concurrently.
    #[inline]
    pub unsafe fn write(&self, dof: usize, value: f64) {
        self.values.write(dof, value)
    }

    pub fn set(&mut self, dof: usize, value: f64) {
        self.values.set(dof, value)
    }

    /// Zeroes both sides.
    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// Zeroes the ghost segment on both sides.
    pub fn zero_ghosts(&mut self) -> eyre::Result<()> {
        let zeros = vec![0.0; self.num_ghost()];
        for kind in [MemcpyKind::HostToHost, MemcpyKind::HostToDevice] {
            self.values.copy_in(&zeros, kind, self.num_local)?;
        }
        Ok(())
    }

    pub fn values(&self) -> &Array1D<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array1D<f64> {
        &mut self.values
    }

    /// Copies the whole vector between host and device.
    pub fn copy(&mut self, kind: MemcpyKind) -> eyre::Result<()> {
        self.values.copy(kind)
    }

    /// The owned segment as a solver vector, read from the side in `space`.
    pub fn local_to_dvector(&self, space: MemorySpace) -> DVector<f64> {
        with_space(space, || DVector::from_column_slice(&self.values.as_slice()[..self.num_local]))
    }

    /// Sets the owned segment on both sides from a solver vector.
    pub fn copy_from_dvector(&mut self, values: &DVector<f64>) -> eyre::Result<()> {
        ensure!(
            values.len() == self.num_local,
            "GhostedVector: expected {} owned values, got {}",
            self.num_local,
            values.len()
        );
        for kind in [MemcpyKind::HostToHost, MemcpyKind::HostToDevice] {
            self.values.copy_in(values.as_slice(), kind, 0)?;
        }
        Ok(())
    }
}

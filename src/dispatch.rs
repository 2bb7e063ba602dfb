//! Parallel regions over mesh entities and the residual objects launched in them.
//!
//! Driver-side objects ([`ResidualObject`], [`MaterialCompute`]) own device-resident entity
//! lists and launch work-items through a [`Dispatcher`]. A work-item implements [`Functor`] once
//! per [`LoopTag`] it supports, and builds a [`Datum`] or [`NodeDatum`] for its entity.
mod datum;
mod integrated_bc;
mod kernel;
mod launcher;
mod material;
mod nodal_bc;
mod nodal_kernel;
mod object;
mod tags;

pub use datum::{Datum, NodeDatum};
pub use integrated_bc::{IntegratedBc, IntegratedBcObject};
pub use kernel::{Kernel, KernelObject};
pub use launcher::{DispatchConfig, Dispatcher, Functor, LaunchStats};
pub use material::{Material, MaterialCompute, MaterialObject, MaterialProperty, StatefulProperty};
pub use nodal_bc::{NodalBc, NodalBcObject};
pub use nodal_kernel::{NodalKernel, NodalKernelObject};
pub use object::{PhaseContext, ResidualObject, ResidualObjectParams, MAX_CACHED_DOFS};
pub use tags::{
    ElementInitLoop, ElementLoop, JacobianLoop, LoopTag, NeighborLoop, OffDiagJacobianLoop, PackLoop, ReinitLoop,
    ResidualLoop, SideLoop, UnpackLoop,
};

/// Marker type selecting which loop body of a work-item a parallel region runs.
///
/// A single work-item type implements [`Functor`](super::Functor) once per loop it supports,
/// so the loop is chosen at compile time without runtime branching inside the region.
pub trait LoopTag: Copy + Default + Send + Sync + 'static {
    const NAME: &'static str;
}

macro_rules! loop_tags {
    ($($(#[$attr:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$attr])*
            #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
            pub struct $name;

            impl LoopTag for $name {
                const NAME: &'static str = stringify!($name);
            }
        )*
    };
}

loop_tags!(
    /// Residual contributions of a kernel, boundary condition or nodal object.
    ResidualLoop,
    /// Diagonal-block Jacobian contributions.
    JacobianLoop,
    /// Jacobian contributions coupling to other variables.
    OffDiagJacobianLoop,
    /// Initialization of stateful material properties.
    ElementInitLoop,
    /// Material properties at element quadrature points.
    ElementLoop,
    /// Material properties at side quadrature points.
    SideLoop,
    /// Material properties at quadrature points of the neighbor across a side.
    NeighborLoop,
    /// Projection of solution vectors onto quadrature points.
    ReinitLoop,
    /// Gathering halo values into a contiguous buffer.
    PackLoop,
    /// Scattering a contiguous buffer into halo entries.
    UnpackLoop,
);

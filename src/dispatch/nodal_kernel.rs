use super::datum::NodeDatum;
use super::launcher::Functor;
use super::object::{flush_jacobian, flush_residual, PhaseContext, ResidualObject, ResidualObjectParams};
use super::tags::{JacobianLoop, OffDiagJacobianLoop, ResidualLoop};
use crate::array::Array1D;
use crate::mesh::Mesh;
use crate::system::System;

/// A pointwise contribution at the nodes of some subdomains.
pub trait NodalKernel: Send + Sync {
    /// Must be set when overriding `compute_qp_jacobian`, which is otherwise never called.
    const HAS_JACOBIAN: bool = false;
    /// Must be set when overriding `compute_qp_off_diag_jacobian`.
    const HAS_OFF_DIAG_JACOBIAN: bool = false;

    fn compute_qp_residual(&self, datum: &mut NodeDatum) -> f64;

    fn compute_qp_jacobian(&self, _datum: &mut NodeDatum) -> f64 {
        0.0
    }

    fn compute_qp_off_diag_jacobian(&self, _jvar: usize, _datum: &mut NodeDatum) -> f64 {
        0.0
    }
}

/// Nodes with owned dofs of `variable` among `nodes`.
pub(crate) fn owned_nodes(nodes: impl IntoIterator<Item = usize>, variable: usize, system: &System) -> Vec<usize> {
    nodes
        .into_iter()
        .filter(|&node| {
            system
                .dofs()
                .node_local_dof(node, variable)
                .map_or(false, |dof| system.dofs().is_local(dof))
        })
        .collect()
}

/// A nodal kernel bound to the owned nodes of its subdomains.
pub struct NodalKernelObject<K> {
    kernel: K,
    params: ResidualObjectParams,
    nodes: Array1D<usize>,
}

impl<K: NodalKernel> NodalKernelObject<K> {
    pub fn new(kernel: K, params: ResidualObjectParams, mesh: &Mesh, system: &System) -> eyre::Result<Self> {
        params.validate(mesh, system)?;
        let nodes = owned_nodes(mesh.nodes_in(&params.blocks), params.variable, system);
        Ok(Self {
            kernel,
            params,
            nodes: Array1D::from_slice(&nodes),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.size()
    }
}

struct NodalWorkItem<'a, K> {
    object: &'a NodalKernelObject<K>,
    ctx: &'a PhaseContext<'a>,
}

impl<K: NodalKernel> NodalWorkItem<'_, K> {
    fn datum(&self, index: usize) -> NodeDatum<'_> {
        NodeDatum::on_node(self.ctx, self.object.params.variable, self.object.nodes.get(index))
    }
}

impl<K: NodalKernel> Functor<ResidualLoop> for NodalWorkItem<'_, K> {
    fn call(&self, _: ResidualLoop, index: usize) {
        let mut datum = self.datum(index);
        let Some(dof) = datum.dof(self.object.params.variable) else {
            return;
        };
        let value = self.object.kernel.compute_qp_residual(&mut datum);
        let tags = self.ctx.residual_tags(&self.object.params);
        flush_residual(self.ctx.system, tags, &[dof], &[value]);
    }
}

impl<K: NodalKernel> Functor<JacobianLoop> for NodalWorkItem<'_, K> {
    fn call(&self, _: JacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let Some(dof) = datum.dof(self.object.params.variable) else {
            return;
        };
        let value = self.object.kernel.compute_qp_jacobian(&mut datum);
        let tags = self.ctx.matrix_tags(&self.object.params);
        let col = self.ctx.system.dofs().local_to_global(dof);
        flush_jacobian(self.ctx.system, tags, &[dof], &[col], &[value]);
    }
}

impl<K: NodalKernel> Functor<OffDiagJacobianLoop> for NodalWorkItem<'_, K> {
    fn call(&self, _: OffDiagJacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let var = self.object.params.variable;
        let Some(dof) = datum.dof(var) else {
            return;
        };
        let tags = self.ctx.matrix_tags(&self.object.params);
        let dofs = self.ctx.system.dofs();
        for &jvar in dofs.coupled_variables(var) {
            if let Some(jdof) = datum.dof(jvar) {
                let value = self.object.kernel.compute_qp_off_diag_jacobian(jvar, &mut datum);
                flush_jacobian(self.ctx.system, tags, &[dof], &[dofs.local_to_global(jdof)], &[value]);
            }
        }
    }
}

impl<K: NodalKernel> ResidualObject for NodalKernelObject<K> {
    fn params(&self) -> &ResidualObjectParams {
        &self.params
    }

    fn compute_residual(&self, ctx: &PhaseContext) {
        if ctx.residual_tags(&self.params).is_empty() {
            return;
        }
        let item = NodalWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<ResidualLoop, _>(&item, self.num_nodes());
    }

    fn compute_jacobian(&self, ctx: &PhaseContext) {
        if ctx.matrix_tags(&self.params).is_empty() {
            return;
        }
        let item = NodalWorkItem { object: self, ctx };
        if K::HAS_JACOBIAN {
            ctx.dispatcher
                .parallel_for::<JacobianLoop, _>(&item, self.num_nodes());
        } else {
            ctx.dispatcher.skip::<JacobianLoop>(&self.params.name);
        }
        if K::HAS_OFF_DIAG_JACOBIAN {
            ctx.dispatcher
                .parallel_for::<OffDiagJacobianLoop, _>(&item, self.num_nodes());
        } else {
            ctx.dispatcher
                .skip::<OffDiagJacobianLoop>(&self.params.name);
        }
    }
}

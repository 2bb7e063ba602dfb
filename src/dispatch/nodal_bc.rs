use super::datum::NodeDatum;
use super::launcher::Functor;
use super::nodal_kernel::owned_nodes;
use super::object::{PhaseContext, ResidualObject, ResidualObjectParams};
use super::tags::{JacobianLoop, ResidualLoop};
use crate::array::Array1D;
use crate::mesh::Mesh;
use crate::system::System;
use itertools::Itertools;
use log::debug;

/// A strongly enforced condition at boundary nodes.
///
/// The residual replaces the entry of the node's dof. The Jacobian row of the dof is zeroed
/// and its diagonal set to [`compute_qp_jacobian`](Self::compute_qp_jacobian). Contributions
/// of other objects to constrained dofs are discarded for the tags the condition applies to.
pub trait NodalBc: Send + Sync {
    fn compute_qp_residual(&self, datum: &mut NodeDatum) -> f64;

    fn compute_qp_jacobian(&self, _datum: &mut NodeDatum) -> f64 {
        1.0
    }
}

pub struct NodalBcObject<B> {
    bc: B,
    params: ResidualObjectParams,
    nodes: Array1D<usize>,
    dofs: Vec<usize>,
}

impl<B: NodalBc> NodalBcObject<B> {
    pub fn new(bc: B, params: ResidualObjectParams, mesh: &Mesh, system: &System) -> eyre::Result<Self> {
        params.validate(mesh, system)?;
        let candidates = params
            .boundaries
            .iter()
            .flat_map(|&b| mesh.boundary_nodes(b).to_vec())
            .sorted()
            .dedup();
        let nodes = owned_nodes(candidates, params.variable, system);
        let dofs = nodes
            .iter()
            .filter_map(|&node| system.dofs().node_local_dof(node, params.variable))
            .collect();
        debug!("nodal boundary condition '{}' constrains {} nodes", params.name, nodes.len());
        Ok(Self {
            bc,
            params,
            nodes: Array1D::from_slice(&nodes),
            dofs,
        })
    }

    /// Local indices of the constrained dofs.
    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.size()
    }
}

struct NodalBcWorkItem<'a, B> {
    object: &'a NodalBcObject<B>,
    ctx: &'a PhaseContext<'a>,
}

impl<B: NodalBc> NodalBcWorkItem<'_, B> {
    fn datum(&self, index: usize) -> NodeDatum<'_> {
        NodeDatum::on_node(self.ctx, self.object.params.variable, self.object.nodes.get(index))
    }
}

impl<B: NodalBc> Functor<ResidualLoop> for NodalBcWorkItem<'_, B> {
    fn call(&self, _: ResidualLoop, index: usize) {
        let mut datum = self.datum(index);
        let Some(dof) = datum.dof(self.object.params.variable) else {
            return;
        };
        let value = self.object.bc.compute_qp_residual(&mut datum);
        for tag in self.ctx.residual_tags(&self.object.params).iter() {
            // Constrained nodes are distinct, so each dof has a single writer
            unsafe { self.ctx.system.vector(tag).write(dof, value) };
        }
    }
}

impl<B: NodalBc> Functor<JacobianLoop> for NodalBcWorkItem<'_, B> {
    fn call(&self, _: JacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let Some(dof) = datum.dof(self.object.params.variable) else {
            return;
        };
        let value = self.object.bc.compute_qp_jacobian(&mut datum);
        let col = self.ctx.system.dofs().local_to_global(dof);
        for tag in self.ctx.matrix_tags(&self.object.params).iter() {
            let matrix = self.ctx.system.matrix(tag);
            unsafe {
                matrix.zero_row(dof);
                matrix.write(dof, col, value);
            }
        }
    }
}

impl<B: NodalBc> ResidualObject for NodalBcObject<B> {
    fn params(&self) -> &ResidualObjectParams {
        &self.params
    }

    fn compute_residual(&self, ctx: &PhaseContext) {
        if ctx.residual_tags(&self.params).is_empty() {
            return;
        }
        let item = NodalBcWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<ResidualLoop, _>(&item, self.num_nodes());
    }

    fn compute_jacobian(&self, ctx: &PhaseContext) {
        if ctx.matrix_tags(&self.params).is_empty() {
            return;
        }
        let item = NodalBcWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<JacobianLoop, _>(&item, self.num_nodes());
    }
}

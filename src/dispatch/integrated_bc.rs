use super::datum::Datum;
use super::launcher::Functor;
use super::object::{accumulate_jacobian, accumulate_residual, PhaseContext, ResidualObject, ResidualObjectParams};
use super::tags::{JacobianLoop, OffDiagJacobianLoop, ResidualLoop};
use crate::array::Array2D;
use crate::mesh::Mesh;
use crate::system::System;
use log::debug;

/// A boundary integral contributing to the residual of one variable, evaluated on the side
/// quadrature points of boundary sides.
pub trait IntegratedBc: Send + Sync {
    /// Must be set when overriding `compute_qp_jacobian`, which is otherwise never called.
    const HAS_JACOBIAN: bool = false;
    /// Must be set when overriding `compute_qp_off_diag_jacobian`.
    const HAS_OFF_DIAG_JACOBIAN: bool = false;

    fn compute_qp_residual(&self, i: usize, qp: usize, datum: &mut Datum) -> f64;

    fn compute_qp_jacobian(&self, _i: usize, _j: usize, _qp: usize, _datum: &mut Datum) -> f64 {
        0.0
    }

    fn compute_qp_off_diag_jacobian(&self, _i: usize, _j: usize, _jvar: usize, _qp: usize, _datum: &mut Datum) -> f64 {
        0.0
    }
}

pub struct IntegratedBcObject<B> {
    bc: B,
    params: ResidualObjectParams,
    // (element, side) rows
    sides: Array2D<usize>,
}

impl<B: IntegratedBc> IntegratedBcObject<B> {
    pub fn new(bc: B, params: ResidualObjectParams, mesh: &Mesh, system: &System) -> eyre::Result<Self> {
        params.validate(mesh, system)?;
        let mut pairs = Vec::new();
        for &boundary in &params.boundaries {
            let sides = mesh.boundary_sides(boundary);
            for k in 0..sides.n(0) {
                let element = sides.at([k as isize, 0]);
                let side = sides.at([k as isize, 1]);
                if system
                    .dofs()
                    .is_active(params.variable, mesh.subdomain(element))
                {
                    pairs.push((element, side));
                }
            }
        }
        let mut sides = Array2D::from_dims(&[pairs.len(), 2])?;
        for (k, &(element, side)) in pairs.iter().enumerate() {
            sides.set_at([k as isize, 0], element);
            sides.set_at([k as isize, 1], side);
        }
        sides.copy_to_device()?;
        debug!("boundary condition '{}' acts on {} sides", params.name, pairs.len());
        Ok(Self { bc, params, sides })
    }

    pub fn bc(&self) -> &B {
        &self.bc
    }

    pub fn num_sides(&self) -> usize {
        self.sides.n(0)
    }
}

struct BcWorkItem<'a, B> {
    object: &'a IntegratedBcObject<B>,
    ctx: &'a PhaseContext<'a>,
}

impl<B: IntegratedBc> BcWorkItem<'_, B> {
    fn datum(&self, index: usize) -> Datum<'_> {
        let element = self.object.sides.at([index as isize, 0]);
        let side = self.object.sides.at([index as isize, 1]);
        Datum::on_side(self.ctx, self.object.params.variable, element, side)
    }
}

impl<B: IntegratedBc> Functor<ResidualLoop> for BcWorkItem<'_, B> {
    fn call(&self, _: ResidualLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.residual_tags(&self.object.params);
        let bc = &self.object.bc;
        accumulate_residual(self.ctx.system, tags, &mut datum, self.object.params.variable, |i, qp, datum| {
            bc.compute_qp_residual(i, qp, datum)
        });
    }
}

impl<B: IntegratedBc> Functor<JacobianLoop> for BcWorkItem<'_, B> {
    fn call(&self, _: JacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.matrix_tags(&self.object.params);
        let var = self.object.params.variable;
        let bc = &self.object.bc;
        accumulate_jacobian(self.ctx.system, tags, &mut datum, var, var, |i, j, qp, datum| {
            bc.compute_qp_jacobian(i, j, qp, datum)
        });
    }
}

impl<B: IntegratedBc> Functor<OffDiagJacobianLoop> for BcWorkItem<'_, B> {
    fn call(&self, _: OffDiagJacobianLoop, index: usize) {
        let mut datum = self.datum(index);
        let tags = self.ctx.matrix_tags(&self.object.params);
        let var = self.object.params.variable;
        let bc = &self.object.bc;
        for &jvar in self.ctx.system.dofs().coupled_variables(var) {
            accumulate_jacobian(self.ctx.system, tags, &mut datum, var, jvar, |i, j, qp, datum| {
                bc.compute_qp_off_diag_jacobian(i, j, jvar, qp, datum)
            });
        }
    }
}

impl<B: IntegratedBc> ResidualObject for IntegratedBcObject<B> {
    fn params(&self) -> &ResidualObjectParams {
        &self.params
    }

    fn compute_residual(&self, ctx: &PhaseContext) {
        if ctx.residual_tags(&self.params).is_empty() {
            return;
        }
        let item = BcWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<ResidualLoop, _>(&item, self.num_sides());
    }

    fn compute_jacobian(&self, ctx: &PhaseContext) {
        if ctx.matrix_tags(&self.params).is_empty() {
            return;
        }
        let item = BcWorkItem { object: self, ctx };
        if B::HAS_JACOBIAN {
            ctx.dispatcher
                .parallel_for::<JacobianLoop, _>(&item, self.num_sides());
        } else {
            ctx.dispatcher.skip::<JacobianLoop>(&self.params.name);
        }
        let coupled = !ctx
            .system
            .dofs()
            .coupled_variables(self.params.variable)
            .is_empty();
        if B::HAS_OFF_DIAG_JACOBIAN && coupled {
            ctx.dispatcher
                .parallel_for::<OffDiagJacobianLoop, _>(&item, self.num_sides());
        } else {
            ctx.dispatcher
                .skip::<OffDiagJacobianLoop>(&self.params.name);
        }
    }
}

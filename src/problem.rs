//! Orchestration of residual and Jacobian evaluation phases.
use crate::comm::Communicator;
use crate::dispatch::{
    DispatchConfig, Dispatcher, IntegratedBc, IntegratedBcObject, Kernel, KernelObject, MaterialCompute,
    NodalBc, NodalBcObject, NodalKernel, NodalKernelObject, PhaseContext, ResidualObject, StatefulProperty,
};
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use crate::system::{PhaseConfig, System, TagId};
use log::info;
use nalgebra::DVector;
use std::sync::Arc;

/// A mesh, its reference tables, one system and the objects contributing to it.
pub struct Problem {
    mesh: Mesh,
    tables: FeTables,
    system: System,
    dispatcher: Dispatcher,
    materials: Vec<Box<dyn MaterialCompute>>,
    objects: Vec<Box<dyn ResidualObject>>,
    nodal_bcs: Vec<Box<dyn ResidualObject>>,
    stateful: Vec<Arc<dyn StatefulProperty>>,
}

impl Problem {
    pub fn new(mesh: Mesh, tables: FeTables, system: System, config: DispatchConfig) -> Self {
        Self {
            mesh,
            tables,
            system,
            dispatcher: Dispatcher::new(config),
            materials: Vec::new(),
            objects: Vec::new(),
            nodal_bcs: Vec::new(),
            stateful: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn tables(&self) -> &FeTables {
        &self.tables
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn add_material(&mut self, material: impl MaterialCompute + 'static) {
        self.materials.push(Box::new(material));
    }

    /// Registers a property whose history advances in [`advance_step`](Self::advance_step).
    pub fn add_stateful_property(&mut self, property: Arc<dyn StatefulProperty>) {
        self.stateful.push(property);
    }

    pub fn add_object(&mut self, object: impl ResidualObject + 'static) {
        self.objects.push(Box::new(object));
    }

    pub fn add_kernel<K: Kernel + 'static>(&mut self, kernel: KernelObject<K>) {
        self.add_object(kernel);
    }

    pub fn add_integrated_bc<B: IntegratedBc + 'static>(&mut self, bc: IntegratedBcObject<B>) {
        self.add_object(bc);
    }

    pub fn add_nodal_kernel<K: NodalKernel + 'static>(&mut self, kernel: NodalKernelObject<K>) {
        self.add_object(kernel);
    }

    /// Adds a nodal boundary condition and marks its dofs as constrained.
    pub fn add_nodal_bc<B: NodalBc + 'static>(&mut self, bc: NodalBcObject<B>) -> eyre::Result<()> {
        let params = bc.params();
        self.system
            .add_nodal_bc_dofs(bc.dofs(), params.vector_tags, params.matrix_tags)?;
        self.nodal_bcs.push(Box::new(bc));
        Ok(())
    }

    /// Sets the owned entries of a vector from a solver vector.
    pub fn set_vector(&mut self, tag: TagId, values: &DVector<f64>) -> eyre::Result<()> {
        self.system
            .vector_mut(tag)
            .copy_from_dvector(values)
    }

    /// The owned entries of a vector, as computed by the last phase.
    pub fn vector(&self, tag: TagId) -> DVector<f64> {
        self.system
            .vector(tag)
            .local_to_dvector(self.dispatcher.space())
    }

    /// The owned rows of a matrix, as computed by the last phase.
    pub fn matrix(&self, tag: TagId) -> eyre::Result<nalgebra_sparse::CsrMatrix<f64>> {
        self.system
            .matrix(tag)
            .to_nalgebra_csr(self.dispatcher.space(), self.system.dofs().num_local_dofs())
    }

    /// Refreshes ghosts of the solution vectors and the quadrature point cache.
    fn prepare(&mut self, phase: &PhaseConfig, comm: &dyn Communicator) -> eyre::Result<()> {
        self.system.validate_phase(phase)?;
        let solution_tags = phase
            .solution_tags
            .truncated(self.system.registry().num_vector_tags());
        for tag in solution_tags.iter() {
            self.system
                .exchange_ghosts(tag, comm, &self.dispatcher)?;
        }
        self.system.clear_cache_flags();
        self.system
            .reinit(&self.mesh, &self.tables, phase, &self.dispatcher)
    }

    fn context<'a>(&'a self, phase: &'a PhaseConfig) -> PhaseContext<'a> {
        PhaseContext {
            mesh: &self.mesh,
            tables: &self.tables,
            system: &self.system,
            phase,
            dispatcher: &self.dispatcher,
        }
    }

    fn compute_materials(&self, ctx: &PhaseContext) {
        for material in &self.materials {
            material.compute_properties(ctx);
        }
        self.dispatcher.fence();
    }

    /// Evaluates the residual into the phase's residual tags.
    ///
    /// Contributions to ghost dofs are moved to their owners before nodal boundary conditions
    /// overwrite their constrained entries.
    pub fn compute_residual(&mut self, phase: &PhaseConfig, comm: &dyn Communicator) -> eyre::Result<()> {
        self.prepare(phase, comm)?;
        let tags = phase
            .residual_tags
            .truncated(self.system.registry().num_vector_tags());
        self.system.zero_vectors(tags);

        {
            let ctx = self.context(phase);
            self.compute_materials(&ctx);
            for object in &self.objects {
                object.compute_residual(&ctx);
            }
            self.dispatcher.fence();
        }

        for tag in tags.iter() {
            self.system
                .accumulate_ghosts(tag, comm, &self.dispatcher)?;
        }

        let ctx = self.context(phase);
        for bc in &self.nodal_bcs {
            bc.compute_residual(&ctx);
        }
        self.dispatcher.fence();
        Ok(())
    }

    /// Evaluates the Jacobian into the phase's matrix tags.
    pub fn compute_jacobian(&mut self, phase: &PhaseConfig, comm: &dyn Communicator) -> eyre::Result<()> {
        self.prepare(phase, comm)?;
        let tags = phase
            .matrix_tags
            .truncated(self.system.registry().num_matrix_tags());
        self.system.zero_matrices(tags);

        {
            let ctx = self.context(phase);
            self.compute_materials(&ctx);
            for object in &self.objects {
                object.compute_jacobian(&ctx);
            }
            self.dispatcher.fence();
        }

        for tag in tags.iter() {
            self.system
                .accumulate_matrix_ghosts(tag, comm, &self.dispatcher)?;
        }

        let ctx = self.context(phase);
        for bc in &self.nodal_bcs {
            bc.compute_jacobian(&ctx);
        }
        self.dispatcher.fence();
        Ok(())
    }

    /// Runs the stateful initialization of every material.
    pub fn initialize_stateful(&mut self, phase: &PhaseConfig, comm: &dyn Communicator) -> eyre::Result<()> {
        self.prepare(phase, comm)?;
        let ctx = self.context(phase);
        for material in &self.materials {
            material.initialize_stateful(&ctx);
        }
        self.dispatcher.fence();
        info!("initialized stateful properties of {} materials", self.materials.len());
        Ok(())
    }

    /// Makes the current values of all stateful properties the previous step's values.
    pub fn advance_step(&mut self) {
        for property in &self.stateful {
            property.swap_old();
        }
    }
}

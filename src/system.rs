//! Distributed assembly targets: tagged ghosted vectors and CSR matrices over a dof map.
use crate::array::Array1D;
use crate::comm::{decode_u64s, encode_u64s, Communicator};
use crate::dispatch::{Dispatcher, ReinitLoop};
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use crate::space::MemcpyKind;
use eyre::{ensure, eyre};
use itertools::Itertools;
use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

mod cache;
mod dofs;
mod exchange;
mod matrix;
mod tags;
mod vector;

pub use cache::QpSolutionCache;
pub use dofs::{DofMapProvider, DofTables};
pub use exchange::HaloExchange;
pub use matrix::{CsrMatrix, Sparsity};
pub use tags::{PhaseConfig, TagId, TagRegistry, TagSet, MAX_TAGS};
pub use vector::GhostedVector;

/// The vectors, matrices and dof maps of one solution system on this process.
#[derive(Debug)]
pub struct System {
    dofs: DofTables,
    registry: TagRegistry,
    vectors: Vec<GhostedVector>,
    matrices: Vec<CsrMatrix>,
    sparsity: Sparsity,
    vector_halo: HaloExchange,
    matrix_halo: HaloExchange,
    nodal_bc: Array1D<bool>,
    residual_bc: Array1D<Array1D<bool>>,
    matrix_bc: Array1D<Array1D<bool>>,
    cache: QpSolutionCache,
}

/// Sparsity coordinates coupling the dofs of every element and node, with local rows and
/// global columns.
fn coupling_coordinates(dofs: &DofTables, mesh: &Mesh) -> Vec<(usize, usize)> {
    let mut coordinates = Vec::new();
    let n_vars = dofs.num_variables();
    for e in 0..mesh.num_elements() {
        for var in 0..n_vars {
            let n = dofs.element_dof_count(e, var);
            for &jvar in [var].iter().chain(dofs.coupled_variables(var)) {
                let nj = dofs.element_dof_count(e, jvar);
                for i in 0..n {
                    let row = dofs.element_local_dof(e, i, var);
                    for j in 0..nj {
                        coordinates.push((row, dofs.element_global_dof(e, j, jvar)));
                    }
                }
            }
        }
    }
    for node in 0..mesh.num_nodes() {
        for var in 0..n_vars {
            let Some(row) = dofs.node_local_dof(node, var) else {
                continue;
            };
            for &jvar in [var].iter().chain(dofs.coupled_variables(var)) {
                if let Some(col) = dofs.node_local_dof(node, jvar) {
                    coordinates.push((row, dofs.local_to_global(col)));
                }
            }
        }
    }
    coordinates
}

fn encode_pairs(pairs: &[(usize, usize)]) -> Vec<u8> {
    encode_u64s(pairs.iter().flat_map(|&(a, b)| [a as u64, b as u64]))
}

fn decode_pairs(bytes: &[u8]) -> eyre::Result<Vec<(usize, usize)>> {
    let words = decode_u64s(bytes)?;
    ensure!(words.len() % 2 == 0, "System: malformed sparsity message of {} words", words.len());
    Ok(words
        .chunks_exact(2)
        .map(|pair| (pair[0] as usize, pair[1] as usize))
        .collect())
}

/// Builds the sparsity pattern and the plan moving ghost-row contributions to their owners.
///
/// Every process sends the entries of its ghost rows to the owning processes, which add them
/// to the pattern of their owned rows.
fn build_sparsity(dofs: &DofTables, mesh: &Mesh, comm: &dyn Communicator) -> eyre::Result<(Sparsity, HaloExchange)> {
    let (rank, size) = (comm.rank(), comm.size());
    let n_local = dofs.num_local_dofs();
    let mut coordinates = coupling_coordinates(dofs, mesh);

    let mut ghost_entries: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for &(row, col) in &coordinates {
        if row >= n_local {
            let owner = dofs.ghost_owner(row - n_local);
            ghost_entries.entry(owner).or_default().push((row, col));
        }
    }
    for entries in ghost_entries.values_mut() {
        *entries = entries.iter().copied().sorted().dedup().collect();
    }

    for other in (0..size).filter(|&r| r != rank) {
        let global: Vec<(usize, usize)> = ghost_entries
            .get(&other)
            .map(|entries| {
                entries
                    .iter()
                    .map(|&(row, col)| (dofs.local_to_global(row), col))
                    .collect()
            })
            .unwrap_or_default();
        comm.send(other, encode_pairs(&global))?;
    }

    let global_to_local: FxHashMap<usize, usize> = (0..n_local)
        .map(|dof| (dofs.local_to_global(dof), dof))
        .collect();
    let mut received = BTreeMap::new();
    for other in (0..size).filter(|&r| r != rank) {
        let entries = decode_pairs(&comm.recv(other)?)?
            .into_iter()
            .map(|(global_row, col)| {
                let row = global_to_local.get(&global_row).copied().ok_or_else(|| {
                    eyre!(
                        "System: rank {} sent matrix entries for row {} which rank {} does not own",
                        other,
                        global_row,
                        rank
                    )
                })?;
                Ok::<_, eyre::Report>((row, col))
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        coordinates.extend_from_slice(&entries);
        received.insert(other, entries);
    }

    let sparsity = Sparsity::from_coordinates(dofs.num_dofs(), dofs.num_global_dofs(), coordinates)?;

    let position = |(row, col): (usize, usize)| {
        sparsity
            .find(row, col)
            .ok_or_else(|| eyre!("System: entry ({}, {}) missing from the sparsity pattern", row, col))
    };
    let mut lists = Vec::new();
    for other in (0..size).filter(|&r| r != rank) {
        let owned = received
            .remove(&other)
            .unwrap_or_default()
            .into_iter()
            .map(position)
            .collect::<eyre::Result<Vec<_>>>()?;
        let ghosts = ghost_entries
            .remove(&other)
            .unwrap_or_default()
            .into_iter()
            .map(position)
            .collect::<eyre::Result<Vec<_>>>()?;
        lists.push((other, owned, ghosts));
    }
    let halo = HaloExchange::from_neighbor_lists(lists)?;
    Ok((sparsity, halo))
}

fn flag_arrays(num_tags: usize, len: usize) -> eyre::Result<Array1D<Array1D<bool>>> {
    let mut flags = Array1D::from_dims(&[num_tags])?;
    for tag in 0..num_tags {
        flags.set(tag, Array1D::from_dims(&[len])?);
    }
    flags.copy_to_device_nested()?;
    Ok(flags)
}

impl System {
    pub fn new(
        provider: &dyn DofMapProvider,
        mesh: &Mesh,
        tables: &FeTables,
        registry: TagRegistry,
        comm: &dyn Communicator,
    ) -> eyre::Result<Self> {
        let dofs = DofTables::build(provider, mesh, tables)?;
        let vector_halo = HaloExchange::for_dofs(&dofs, comm)?;
        let (sparsity, matrix_halo) = build_sparsity(&dofs, mesh, comm)?;

        let vectors = (0..registry.num_vector_tags())
            .map(|_| GhostedVector::new(dofs.num_local_dofs(), dofs.num_ghost_dofs()))
            .collect::<eyre::Result<Vec<_>>>()?;
        let matrices = (0..registry.num_matrix_tags())
            .map(|_| CsrMatrix::new(&sparsity))
            .collect::<eyre::Result<Vec<_>>>()?;

        let n_dofs = dofs.num_dofs();
        let residual_bc = flag_arrays(registry.num_vector_tags(), n_dofs)?;
        let matrix_bc = flag_arrays(registry.num_matrix_tags(), n_dofs)?;
        let cache = QpSolutionCache::new(
            registry.num_vector_tags(),
            mesh.num_subdomains(),
            dofs.num_variables(),
            mesh.total_qps(),
        )?;

        info!(
            "rank {}: system with {} vector tags, {} matrix tags and {} nonzeros",
            comm.rank(),
            registry.num_vector_tags(),
            registry.num_matrix_tags(),
            sparsity.nnz()
        );

        Ok(Self {
            nodal_bc: Array1D::from_dims(&[n_dofs])?,
            dofs,
            registry,
            vectors,
            matrices,
            sparsity,
            vector_halo,
            matrix_halo,
            residual_bc,
            matrix_bc,
            cache,
        })
    }

    pub fn dofs(&self) -> &DofTables {
        &self.dofs
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    #[inline]
    pub fn vector(&self, tag: TagId) -> &GhostedVector {
        &self.vectors[tag]
    }

    pub fn vector_mut(&mut self, tag: TagId) -> &mut GhostedVector {
        &mut self.vectors[tag]
    }

    #[inline]
    pub fn matrix(&self, tag: TagId) -> &CsrMatrix {
        &self.matrices[tag]
    }

    pub fn matrix_mut(&mut self, tag: TagId) -> &mut CsrMatrix {
        &mut self.matrices[tag]
    }

    pub fn cache(&self) -> &QpSolutionCache {
        &self.cache
    }

    pub fn neighbor_ranks(&self) -> Vec<usize> {
        self.vector_halo.neighbor_ranks()
    }

    /// Fails if the phase refers to unregistered tags or unknown variables.
    pub fn validate_phase(&self, phase: &PhaseConfig) -> eyre::Result<()> {
        let checks = [
            ("residual", phase.residual_tags, self.registry.num_vector_tags()),
            ("solution", phase.solution_tags, self.registry.num_vector_tags()),
            ("matrix", phase.matrix_tags, self.registry.num_matrix_tags()),
        ];
        for (kind, tags, count) in checks {
            if let Some(tag) = tags.iter().find(|&tag| tag >= count) {
                return Err(eyre!(
                    "System: {} tag {} is not registered ({} tags registered)",
                    kind,
                    tag,
                    count
                ));
            }
        }
        for &var in &phase.variables {
            ensure!(
                var < self.dofs.num_variables(),
                "System: phase refers to variable {} but the system has {} variables",
                var,
                self.dofs.num_variables()
            );
        }
        Ok(())
    }

    /// Marks `dofs` as constrained by a nodal boundary condition for the given tags. Residual
    /// and Jacobian contributions of other objects to these dofs are discarded for those tags.
    pub fn add_nodal_bc_dofs(&mut self, dofs: &[usize], vector_tags: TagSet, matrix_tags: TagSet) -> eyre::Result<()> {
        let n_dofs = self.dofs.num_dofs();
        if let Some(&dof) = dofs.iter().find(|&&dof| dof >= n_dofs) {
            return Err(eyre!("System: nodal boundary dof {} out of range ({} dofs)", dof, n_dofs));
        }
        for &dof in dofs {
            self.nodal_bc.set(dof, true);
        }
        self.nodal_bc.copy_to_device()?;

        let sets = [
            (&mut self.residual_bc, vector_tags, self.registry.num_vector_tags()),
            (&mut self.matrix_bc, matrix_tags, self.registry.num_matrix_tags()),
        ];
        for (flags, tags, count) in sets {
            for tag in tags.truncated(count).iter() {
                let flags = &mut flags.as_mut_slice()[tag];
                for &dof in dofs {
                    flags.set(dof, true);
                }
                flags.copy_to_device()?;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn has_nodal_bc(&self, dof: usize) -> bool {
        self.nodal_bc.get(dof)
    }

    #[inline]
    pub fn has_residual_bc(&self, dof: usize, tag: TagId) -> bool {
        self.residual_bc.get_ref(tag).get(dof)
    }

    #[inline]
    pub fn has_matrix_bc(&self, dof: usize, tag: TagId) -> bool {
        self.matrix_bc.get_ref(tag).get(dof)
    }

    pub fn zero_vectors(&mut self, tags: TagSet) {
        for tag in tags.truncated(self.vectors.len()).iter() {
            self.vectors[tag].zero();
        }
    }

    pub fn zero_matrices(&mut self, tags: TagSet) {
        for tag in tags.truncated(self.matrices.len()).iter() {
            self.matrices[tag].zero();
        }
    }

    /// Copies the given vectors between host and device.
    pub fn sync_vectors(&mut self, tags: TagSet, kind: MemcpyKind) -> eyre::Result<()> {
        for tag in tags.truncated(self.vectors.len()).iter() {
            self.vectors[tag].copy(kind)?;
        }
        Ok(())
    }

    pub fn sync_matrices(&mut self, tags: TagSet, kind: MemcpyKind) -> eyre::Result<()> {
        for tag in tags.truncated(self.matrices.len()).iter() {
            self.matrices[tag].values_mut().copy(kind)?;
        }
        Ok(())
    }

    /// Refreshes the ghost entries of a vector from their owners.
    pub fn exchange_ghosts(&mut self, tag: TagId, comm: &dyn Communicator, dispatcher: &Dispatcher) -> eyre::Result<()> {
        self.vector_halo
            .forward(self.vectors[tag].values(), comm, dispatcher)
    }

    /// Adds the ghost entries of a vector into their owners and zeroes them.
    pub fn accumulate_ghosts(&mut self, tag: TagId, comm: &dyn Communicator, dispatcher: &Dispatcher) -> eyre::Result<()> {
        self.vector_halo
            .reverse(self.vectors[tag].values(), comm, dispatcher)?;
        self.vectors[tag].zero_ghosts()
    }

    /// Adds the ghost rows of a matrix into the owned rows of their owners and zeroes them.
    pub fn accumulate_matrix_ghosts(
        &mut self,
        tag: TagId,
        comm: &dyn Communicator,
        dispatcher: &Dispatcher,
    ) -> eyre::Result<()> {
        self.matrix_halo
            .reverse(self.matrices[tag].values(), comm, dispatcher)?;
        let begin = self.sparsity.row_range(self.dofs.num_local_dofs()).start;
        let zeros = vec![0.0; self.sparsity.nnz() - begin];
        let values = self.matrices[tag].values_mut();
        for kind in [MemcpyKind::HostToHost, MemcpyKind::HostToDevice] {
            values.copy_in(&zeros, kind, begin)?;
        }
        Ok(())
    }

    /// Interpolates the solution in vector `tag` at a volume or face quadrature point.
    ///
    /// Returns the value and the physical gradient, given the inverse transposed Jacobian of
    /// the element mapping.
    #[allow(clippy::too_many_arguments)]
    #[inline]
    pub fn project(
        &self,
        mesh: &Mesh,
        tables: &FeTables,
        element: usize,
        side: Option<usize>,
        variable: usize,
        tag: TagId,
        qp: usize,
        inverse_jacobian_t: &Matrix3<f64>,
    ) -> (f64, Vector3<f64>) {
        let element_type = mesh.element_type(element);
        let fe_type = self.dofs.fe_type(variable);
        let vector = self.vector(tag);
        let mut value = 0.0;
        let mut gradient = Vector3::zeros();
        for i in 0..self.dofs.element_dof_count(element, variable) {
            let u = vector.get(self.dofs.element_local_dof(element, i, variable));
            value += u * tables.shape_value(element_type, fe_type, side, i, qp);
            gradient += inverse_jacobian_t * tables.shape_gradient(element_type, fe_type, side, i, qp) * u;
        }
        (value, gradient)
    }

    fn phase_variables(&self, phase: &PhaseConfig) -> Vec<usize> {
        if phase.variables.is_empty() {
            (0..self.dofs.num_variables()).collect()
        } else {
            phase.variables.clone()
        }
    }

    /// Whether some solution value the phase caches is not yet valid on `subdomain`.
    pub fn needs_reinit(&self, subdomain: usize, phase: &PhaseConfig) -> bool {
        let tags = phase
            .solution_tags
            .truncated(self.registry.num_vector_tags());
        self.phase_variables(phase)
            .into_iter()
            .filter(|&var| self.dofs.is_active(var, subdomain))
            .any(|var| tags.iter().any(|tag| !self.cache.is_cached(tag, subdomain, var)))
    }

    /// Invalidates all cached quadrature-point values.
    pub fn clear_cache_flags(&mut self) {
        self.cache.clear_flags();
    }

    /// Projects the phase's solution tags onto the quadrature points of every subdomain whose
    /// cached values are stale, and marks them valid.
    pub fn reinit(
        &mut self,
        mesh: &Mesh,
        tables: &FeTables,
        phase: &PhaseConfig,
        dispatcher: &Dispatcher,
    ) -> eyre::Result<()> {
        let tags = phase
            .solution_tags
            .truncated(self.registry.num_vector_tags());
        let variables = self.phase_variables(phase);
        if tags.is_empty() || variables.is_empty() {
            return Ok(());
        }
        self.cache.preallocate(tags, &variables)?;

        let subdomains: Vec<usize> = (0..mesh.num_subdomains())
            .filter(|&s| self.needs_reinit(s, phase))
            .collect();
        if subdomains.is_empty() {
            debug!("quadrature point cache is up to date");
            return Ok(());
        }

        let elements = Array1D::from_slice(&mesh.elements_in(&subdomains));
        let tag_list = Array1D::from_slice(&tags.iter().collect::<Vec<_>>());
        let variable_list = Array1D::from_slice(&variables);
        let item = cache::Reinit {
            mesh,
            tables,
            system: self,
            elements: &elements,
            tags: &tag_list,
            variables: &variable_list,
        };
        dispatcher.parallel_for::<ReinitLoop, _>(&item, elements.size());
        dispatcher.fence();
        debug!("projected solution onto {} elements", elements.size());

        self.cache.set_flags(tags, &variables, &subdomains)
    }
}

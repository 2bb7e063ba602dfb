use super::datum::Datum;
use super::launcher::Dispatcher;
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use crate::system::{PhaseConfig, System, TagSet};
use eyre::ensure;
use serde::{Deserialize, Serialize};

/// Number of local contributions a work-item accumulates on the stack before flushing them to
/// the global vectors and matrices.
pub const MAX_CACHED_DOFS: usize = 16;

/// Everything a launch of one phase reads.
#[derive(Copy, Clone)]
pub struct PhaseContext<'a> {
    pub mesh: &'a Mesh,
    pub tables: &'a FeTables,
    pub system: &'a System,
    pub phase: &'a PhaseConfig,
    pub dispatcher: &'a Dispatcher,
}

impl PhaseContext<'_> {
    /// Vector tags an object contributes to in this phase.
    pub fn residual_tags(&self, params: &ResidualObjectParams) -> TagSet {
        params
            .vector_tags
            .intersection(self.phase.residual_tags)
            .truncated(self.system.registry().num_vector_tags())
    }

    pub fn matrix_tags(&self, params: &ResidualObjectParams) -> TagSet {
        params
            .matrix_tags
            .intersection(self.phase.matrix_tags)
            .truncated(self.system.registry().num_matrix_tags())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidualObjectParams {
    pub name: String,
    pub variable: usize,
    /// Subdomains the object acts on. Empty selects every subdomain.
    pub blocks: Vec<usize>,
    /// Boundaries of boundary objects.
    pub boundaries: Vec<usize>,
    /// Vector tags the object may contribute to.
    pub vector_tags: TagSet,
    /// Matrix tags the object may contribute to.
    pub matrix_tags: TagSet,
}

impl Default for ResidualObjectParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            variable: 0,
            blocks: Vec::new(),
            boundaries: Vec::new(),
            vector_tags: TagSet::all(),
            matrix_tags: TagSet::all(),
        }
    }
}

impl ResidualObjectParams {
    pub fn new(name: impl Into<String>, variable: usize) -> Self {
        Self {
            name: name.into(),
            variable,
            ..Self::default()
        }
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = usize>) -> Self {
        self.blocks = blocks.into_iter().collect();
        self
    }

    pub fn with_boundaries(mut self, boundaries: impl IntoIterator<Item = usize>) -> Self {
        self.boundaries = boundaries.into_iter().collect();
        self
    }

    pub fn with_vector_tags(mut self, tags: TagSet) -> Self {
        self.vector_tags = tags;
        self
    }

    pub fn with_matrix_tags(mut self, tags: TagSet) -> Self {
        self.matrix_tags = tags;
        self
    }

    pub(crate) fn validate(&self, mesh: &Mesh, system: &System) -> eyre::Result<()> {
        let n_vars = system.dofs().num_variables();
        ensure!(
            self.variable < n_vars,
            "'{}' acts on variable {} but the system has {} variables",
            self.name,
            self.variable,
            n_vars
        );
        if let Some(&block) = self.blocks.iter().find(|&&b| b >= mesh.num_subdomains()) {
            eyre::bail!("'{}' refers to subdomain {} which does not exist", self.name, block);
        }
        if let Some(&boundary) = self.boundaries.iter().find(|&&b| b >= mesh.num_boundaries()) {
            eyre::bail!("'{}' refers to boundary {} which does not exist", self.name, boundary);
        }
        Ok(())
    }
}

/// A residual object as seen by the driver: it launches its own parallel regions.
pub trait ResidualObject: Send + Sync {
    fn params(&self) -> &ResidualObjectParams;

    fn name(&self) -> &str {
        &self.params().name
    }

    fn compute_residual(&self, ctx: &PhaseContext);

    fn compute_jacobian(&self, ctx: &PhaseContext);
}

pub(crate) fn flush_residual(system: &System, tags: TagSet, dofs: &[usize], values: &[f64]) {
    for tag in tags.iter() {
        let vector = system.vector(tag);
        for (&dof, &value) in dofs.iter().zip(values) {
            if !system.has_residual_bc(dof, tag) {
                vector.atomic_add(dof, value);
            }
        }
    }
}

pub(crate) fn flush_jacobian(system: &System, tags: TagSet, rows: &[usize], cols: &[usize], values: &[f64]) {
    for tag in tags.iter() {
        let matrix = system.matrix(tag);
        for ((&row, &col), &value) in rows.iter().zip(cols).zip(values) {
            if !system.has_matrix_bc(row, tag) {
                matrix.atomic_add(row, col, value);
            }
        }
    }
}

/// Integrates `f(i, qp, datum)` against `JxW` for every test function `i` of `variable` and
/// adds the result to the tagged residual vectors.
pub(crate) fn accumulate_residual<F>(system: &System, tags: TagSet, datum: &mut Datum, variable: usize, mut f: F)
where
    F: FnMut(usize, usize, &mut Datum) -> f64,
{
    let n = datum.num_dofs(variable);
    for begin in (0..n).step_by(MAX_CACHED_DOFS) {
        let len = MAX_CACHED_DOFS.min(n - begin);
        let mut local = [0.0; MAX_CACHED_DOFS];
        for qp in 0..datum.num_qps() {
            let jxw = datum.jxw(qp);
            for (k, value) in local[..len].iter_mut().enumerate() {
                *value += jxw * f(begin + k, qp, datum);
            }
        }
        let mut dofs = [0; MAX_CACHED_DOFS];
        for (k, dof) in dofs[..len].iter_mut().enumerate() {
            *dof = datum.local_dof(variable, begin + k);
        }
        flush_residual(system, tags, &dofs[..len], &local[..len]);
    }
}

/// Integrates `f(i, j, qp, datum)` against `JxW` for every pair of test function `i` of
/// `variable` and trial function `j` of `jvariable` and adds the result to the tagged matrices.
pub(crate) fn accumulate_jacobian<F>(
    system: &System,
    tags: TagSet,
    datum: &mut Datum,
    variable: usize,
    jvariable: usize,
    mut f: F,
) where
    F: FnMut(usize, usize, usize, &mut Datum) -> f64,
{
    let n = datum.num_dofs(variable);
    let nj = datum.num_dofs(jvariable);
    let total = n * nj;
    for begin in (0..total).step_by(MAX_CACHED_DOFS) {
        let len = MAX_CACHED_DOFS.min(total - begin);
        let mut local = [0.0; MAX_CACHED_DOFS];
        for qp in 0..datum.num_qps() {
            let jxw = datum.jxw(qp);
            for (k, value) in local[..len].iter_mut().enumerate() {
                let ij = begin + k;
                *value += jxw * f(ij / nj, ij % nj, qp, datum);
            }
        }
        let mut rows = [0; MAX_CACHED_DOFS];
        let mut cols = [0; MAX_CACHED_DOFS];
        for k in 0..len {
            let ij = begin + k;
            rows[k] = datum.local_dof(variable, ij / nj);
            cols[k] = datum.global_dof(jvariable, ij % nj);
        }
        flush_jacobian(system, tags, &rows[..len], &cols[..len], &local[..len]);
    }
}

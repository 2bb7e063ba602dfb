use crate::array::{Array1D, Array2D};
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use eyre::ensure;
use itertools::Itertools;
use log::info;

pub(crate) const NO_DOF: usize = usize::MAX;

/// Source of the degree-of-freedom numbering on this process.
///
/// Local dof indices `0..num_local_dofs()` are owned by this process, followed by
/// `num_ghost_dofs()` ghost dofs owned by other processes. Matrix columns use global indices.
pub trait DofMapProvider {
    fn num_variables(&self) -> usize;
    fn variable_fe_type(&self, variable: usize) -> usize;
    fn variable_active_on(&self, variable: usize, subdomain: usize) -> bool;

    /// Variables whose dofs appear in the Jacobian rows of `variable`.
    fn coupled_variables(&self, variable: usize) -> Vec<usize>;

    fn num_local_dofs(&self) -> usize;
    fn num_ghost_dofs(&self) -> usize;
    fn num_global_dofs(&self) -> usize;

    fn local_to_global(&self, dof: usize) -> usize;

    /// Rank owning the ghost dof with local index `num_local_dofs() + ghost`.
    fn ghost_owner(&self, ghost: usize) -> usize;

    /// Local dof indices of `variable` on `element`, in shape function order. Empty if the
    /// variable is inactive on the element's subdomain.
    fn element_dofs(&self, element: usize, variable: usize, output: &mut Vec<usize>);

    fn node_dof(&self, node: usize, variable: usize) -> Option<usize>;
}

/// Device-resident dof maps.
#[derive(Debug)]
pub struct DofTables {
    num_local: usize,
    num_ghost: usize,
    num_global: usize,
    element_dofs: Array1D<Array2D<usize>>,
    element_dof_counts: Array2D<usize>,
    node_dofs: Array1D<Array1D<usize>>,
    local_to_global: Array1D<usize>,
    ghost_owners: Vec<usize>,
    max_dofs_per_element: Array1D<usize>,
    fe_types: Array1D<usize>,
    active: Array2D<bool>,
    coupling: Array1D<Array1D<usize>>,
}

impl DofTables {
    pub fn build(provider: &dyn DofMapProvider, mesh: &Mesh, tables: &FeTables) -> eyre::Result<Self> {
        let n_vars = provider.num_variables();
        let n_local = provider.num_local_dofs();
        let n_ghost = provider.num_ghost_dofs();
        let n_global = provider.num_global_dofs();
        let n_dofs = n_local + n_ghost;
        let n_elements = mesh.num_elements();
        let n_subdomains = mesh.num_subdomains();

        let mut fe_types = Vec::with_capacity(n_vars);
        let mut active = Array2D::from_dims(&[n_vars, n_subdomains])?;
        let mut coupling = Array1D::from_dims(&[n_vars])?;
        for var in 0..n_vars {
            let fe_type = provider.variable_fe_type(var);
            ensure!(
                fe_type < tables.num_fe_types(),
                "DofTables: variable {} has FE type {} but only {} FE types are tabulated",
                var,
                fe_type,
                tables.num_fe_types()
            );
            fe_types.push(fe_type);
            for s in 0..n_subdomains {
                active.set_at([var as isize, s as isize], provider.variable_active_on(var, s));
            }
            let coupled: Vec<usize> = provider
                .coupled_variables(var)
                .into_iter()
                .filter(|&other| other != var)
                .sorted()
                .dedup()
                .collect();
            ensure!(
                coupled.iter().all(|&other| other < n_vars),
                "DofTables: variable {} is coupled to a variable out of range",
                var
            );
            coupling.set(var, Array1D::from_slice(&coupled));
        }

        let mut local_to_global = Vec::with_capacity(n_dofs);
        for dof in 0..n_dofs {
            let global = provider.local_to_global(dof);
            ensure!(
                global < n_global,
                "DofTables: local dof {} maps to global dof {} but there are {} global dofs",
                dof,
                global,
                n_global
            );
            local_to_global.push(global);
        }
        let ghost_owners = (0..n_ghost).map(|g| provider.ghost_owner(g)).collect();

        let mut element_dofs = Array1D::from_dims(&[n_vars])?;
        let mut element_dof_counts = Array2D::from_dims(&[n_elements, n_vars])?;
        let mut max_dofs_per_element = vec![0; n_vars];
        let mut buffer = Vec::new();
        for var in 0..n_vars {
            let max = (0..n_elements)
                .map(|e| tables.num_dofs(mesh.element_type(e), fe_types[var]))
                .max()
                .unwrap_or(0);
            let mut dofs = Array2D::from_dims(&[n_elements, max])?;
            dofs.fill(NO_DOF);
            for e in 0..n_elements {
                buffer.clear();
                provider.element_dofs(e, var, &mut buffer);
                if !active.at([var as isize, mesh.subdomain(e) as isize]) {
                    ensure!(
                        buffer.is_empty(),
                        "DofTables: variable {} is inactive on element {} but has dofs there",
                        var,
                        e
                    );
                    continue;
                }
                let expected = tables.num_dofs(mesh.element_type(e), fe_types[var]);
                ensure!(
                    buffer.len() == expected,
                    "DofTables: variable {} has {} dofs on element {} but its FE type has {} shape functions",
                    var,
                    buffer.len(),
                    e,
                    expected
                );
                for (i, &dof) in buffer.iter().enumerate() {
                    ensure!(dof < n_dofs, "DofTables: element {} refers to dof {} out of range", e, dof);
                    dofs.set_at([e as isize, i as isize], dof);
                }
                element_dof_counts.set_at([e as isize, var as isize], expected);
                max_dofs_per_element[var] = max_dofs_per_element[var].max(expected);
            }
            dofs.copy_to_device()?;
            element_dofs.set(var, dofs);
        }

        let mut node_dofs = Array1D::from_dims(&[n_vars])?;
        for var in 0..n_vars {
            let mut dofs = Vec::with_capacity(mesh.num_nodes());
            for node in 0..mesh.num_nodes() {
                let dof = provider.node_dof(node, var);
                if let Some(dof) = dof {
                    ensure!(dof < n_dofs, "DofTables: node {} refers to dof {} out of range", node, dof);
                }
                dofs.push(dof.unwrap_or(NO_DOF));
            }
            node_dofs.set(var, Array1D::from_slice(&dofs));
        }

        element_dofs.copy_to_device()?;
        element_dof_counts.copy_to_device()?;
        node_dofs.copy_to_device()?;
        active.copy_to_device()?;
        coupling.copy_to_device()?;

        info!(
            "built dof tables for {} variables with {} local, {} ghost and {} global dofs",
            n_vars, n_local, n_ghost, n_global
        );

        Ok(Self {
            num_local: n_local,
            num_ghost: n_ghost,
            num_global: n_global,
            element_dofs,
            element_dof_counts,
            node_dofs,
            local_to_global: Array1D::from_slice(&local_to_global),
            ghost_owners,
            max_dofs_per_element: Array1D::from_slice(&max_dofs_per_element),
            fe_types: Array1D::from_slice(&fe_types),
            active,
            coupling,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.fe_types.size()
    }

    pub fn num_local_dofs(&self) -> usize {
        self.num_local
    }

    pub fn num_ghost_dofs(&self) -> usize {
        self.num_ghost
    }

    /// Number of local and ghost dofs.
    pub fn num_dofs(&self) -> usize {
        self.num_local + self.num_ghost
    }

    pub fn num_global_dofs(&self) -> usize {
        self.num_global
    }

    #[inline]
    pub fn fe_type(&self, variable: usize) -> usize {
        self.fe_types.get(variable)
    }

    #[inline]
    pub fn is_active(&self, variable: usize, subdomain: usize) -> bool {
        self.active.at([variable as isize, subdomain as isize])
    }

    pub fn coupled_variables(&self, variable: usize) -> &[usize] {
        self.coupling.get_ref(variable).as_slice()
    }

    pub fn max_dofs_per_element(&self, variable: usize) -> usize {
        self.max_dofs_per_element.get(variable)
    }

    /// Number of dofs of `variable` on `element`, zero if inactive there.
    #[inline]
    pub fn element_dof_count(&self, element: usize, variable: usize) -> usize {
        self.element_dof_counts.at([element as isize, variable as isize])
    }

    #[inline]
    pub fn element_local_dof(&self, element: usize, i: usize, variable: usize) -> usize {
        self.element_dofs
            .get_ref(variable)
            .at([element as isize, i as isize])
    }

    #[inline]
    pub fn element_global_dof(&self, element: usize, i: usize, variable: usize) -> usize {
        self.local_to_global(self.element_local_dof(element, i, variable))
    }

    #[inline]
    pub fn node_local_dof(&self, node: usize, variable: usize) -> Option<usize> {
        let dof = self.node_dofs.get_ref(variable).get(node);
        (dof != NO_DOF).then_some(dof)
    }

    #[inline]
    pub fn local_to_global(&self, dof: usize) -> usize {
        self.local_to_global.get(dof)
    }

    pub fn is_local(&self, dof: usize) -> bool {
        dof < self.num_local
    }

    /// Rank owning the ghost dof with local index `num_local_dofs() + ghost`.
    pub fn ghost_owner(&self, ghost: usize) -> usize {
        self.ghost_owners[ghost]
    }
}

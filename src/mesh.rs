//! Device-resident mesh data consumed by parallel regions.
use crate::array::{Array1D, Array2D};
use crate::fe_tables::FeTables;
use eyre::ensure;
use itertools::Itertools;
use log::info;
use nalgebra::Vector3;
use std::collections::BTreeSet;

const NONE: usize = usize::MAX;

/// Source of local mesh topology and geometry.
///
/// Elements and nodes are indexed locally on this process. Nodes include ghost nodes of
/// elements shared with neighboring processes.
pub trait MeshProvider {
    fn dim(&self) -> usize;
    fn num_elements(&self) -> usize;
    fn num_nodes(&self) -> usize;
    fn num_subdomains(&self) -> usize;
    fn num_boundaries(&self) -> usize;

    fn element_type(&self, element: usize) -> usize;
    fn element_subdomain(&self, element: usize) -> usize;
    fn element_node_count(&self, element: usize) -> usize;
    fn populate_element_nodes(&self, output: &mut [usize], element: usize);
    fn node_coordinates(&self, node: usize) -> [f64; 3];

    /// The element and its side across `side` of `element`, if the side is interior.
    fn element_neighbor(&self, element: usize, side: usize) -> Option<(usize, usize)>;

    /// `(element, side)` pairs on the given boundary.
    fn boundary_sides(&self, boundary: usize) -> Vec<(usize, usize)>;
    fn boundary_nodes(&self, boundary: usize) -> Vec<usize>;
}

#[derive(Debug)]
pub struct Mesh {
    dim: usize,
    num_subdomains: usize,
    element_types: Array1D<usize>,
    subdomains: Array1D<usize>,
    node_counts: Array1D<usize>,
    element_nodes: Array2D<usize>,
    coordinates: Array1D<[f64; 3]>,
    neighbor_elements: Array2D<usize>,
    neighbor_sides: Array2D<usize>,
    qp_offsets: Array1D<usize>,
    face_qp_offsets: Array2D<usize>,
    total_face_qps: usize,
    boundary_sides: Vec<Array2D<usize>>,
    boundary_nodes: Vec<Array1D<usize>>,
}

impl Mesh {
    /// Copies the provider's mesh into host and device memory, validating it against the
    /// reference tables.
    pub fn build(provider: &dyn MeshProvider, tables: &FeTables) -> eyre::Result<Self> {
        let dim = provider.dim();
        ensure!((1..=3).contains(&dim), "Mesh: unsupported mesh dimension {}", dim);
        let n_elements = provider.num_elements();
        let n_nodes = provider.num_nodes();
        let n_subdomains = provider.num_subdomains();

        let mut element_types = Vec::with_capacity(n_elements);
        let mut subdomains = Vec::with_capacity(n_elements);
        let mut node_counts = Vec::with_capacity(n_elements);
        for e in 0..n_elements {
            let element_type = provider.element_type(e);
            ensure!(
                element_type < tables.num_element_types(),
                "Mesh: element {} has type {} but only {} element types are tabulated",
                e,
                element_type,
                tables.num_element_types()
            );
            let subdomain = provider.element_subdomain(e);
            ensure!(
                subdomain < n_subdomains,
                "Mesh: element {} is in subdomain {} but the mesh has {} subdomains",
                e,
                subdomain,
                n_subdomains
            );
            let count = provider.element_node_count(e);
            let expected = tables.num_dofs(element_type, tables.geometry_fe_type(element_type));
            ensure!(
                count == expected,
                "Mesh: element {} has {} nodes but its geometry FE type has {} shape functions",
                e,
                count,
                expected
            );
            element_types.push(element_type);
            subdomains.push(subdomain);
            node_counts.push(count);
        }

        let max_nodes = node_counts.iter().copied().max().unwrap_or(0);
        let max_sides = element_types
            .iter()
            .map(|&t| tables.num_sides(t))
            .max()
            .unwrap_or(0);

        let mut element_nodes = Array2D::from_dims(&[n_elements, max_nodes])?;
        element_nodes.fill(NONE);
        let mut buffer = vec![0; max_nodes];
        for e in 0..n_elements {
            let nodes = &mut buffer[..node_counts[e]];
            provider.populate_element_nodes(nodes, e);
            for (k, &node) in nodes.iter().enumerate() {
                ensure!(
                    node < n_nodes,
                    "Mesh: element {} refers to node {} but the mesh has {} nodes",
                    e,
                    node,
                    n_nodes
                );
                element_nodes.set_at([e as isize, k as isize], node);
            }
        }

        let mut neighbor_elements = Array2D::from_dims(&[n_elements, max_sides])?;
        let mut neighbor_sides = Array2D::from_dims(&[n_elements, max_sides])?;
        neighbor_elements.fill(NONE);
        neighbor_sides.fill(NONE);
        for e in 0..n_elements {
            for s in 0..tables.num_sides(element_types[e]) {
                if let Some((neighbor, neighbor_side)) = provider.element_neighbor(e, s) {
                    ensure!(
                        neighbor < n_elements,
                        "Mesh: neighbor {} of element {} is out of range",
                        neighbor,
                        e
                    );
                    neighbor_elements.set_at([e as isize, s as isize], neighbor);
                    neighbor_sides.set_at([e as isize, s as isize], neighbor_side);
                }
            }
        }

        let mut qp_offsets = Vec::with_capacity(n_elements + 1);
        let mut face_qp_offsets = Array2D::from_dims(&[n_elements, max_sides])?;
        face_qp_offsets.fill(NONE);
        let (mut total_qps, mut total_face_qps) = (0, 0);
        for e in 0..n_elements {
            qp_offsets.push(total_qps);
            total_qps += tables.num_qps(element_types[e]);
            for s in 0..tables.num_sides(element_types[e]) {
                face_qp_offsets.set_at([e as isize, s as isize], total_face_qps);
                total_face_qps += tables.num_face_qps(element_types[e]);
            }
        }
        qp_offsets.push(total_qps);

        let coordinates: Vec<[f64; 3]> = (0..n_nodes).map(|n| provider.node_coordinates(n)).collect();

        let mut boundary_sides = Vec::with_capacity(provider.num_boundaries());
        let mut boundary_nodes = Vec::with_capacity(provider.num_boundaries());
        for b in 0..provider.num_boundaries() {
            let sides = provider.boundary_sides(b);
            let mut array = Array2D::from_dims(&[sides.len(), 2])?;
            for (k, &(element, side)) in sides.iter().enumerate() {
                ensure!(
                    element < n_elements && side < tables.num_sides(element_types[element]),
                    "Mesh: boundary {} refers to invalid side {} of element {}",
                    b,
                    side,
                    element
                );
                array.set_at([k as isize, 0], element);
                array.set_at([k as isize, 1], side);
            }
            array.copy_to_device()?;
            boundary_sides.push(array);

            let nodes: Vec<usize> = provider.boundary_nodes(b).into_iter().sorted().dedup().collect();
            ensure!(
                nodes.iter().all(|&n| n < n_nodes),
                "Mesh: boundary {} refers to a node out of range",
                b
            );
            boundary_nodes.push(Array1D::from_slice(&nodes));
        }

        element_nodes.copy_to_device()?;
        neighbor_elements.copy_to_device()?;
        neighbor_sides.copy_to_device()?;
        face_qp_offsets.copy_to_device()?;

        info!(
            "built mesh with {} elements, {} nodes and {} quadrature points",
            n_elements, n_nodes, total_qps
        );

        Ok(Self {
            dim,
            num_subdomains: n_subdomains,
            element_types: Array1D::from_slice(&element_types),
            subdomains: Array1D::from_slice(&subdomains),
            node_counts: Array1D::from_slice(&node_counts),
            element_nodes,
            coordinates: Array1D::from_slice(&coordinates),
            neighbor_elements,
            neighbor_sides,
            qp_offsets: Array1D::from_slice(&qp_offsets),
            face_qp_offsets,
            total_face_qps,
            boundary_sides,
            boundary_nodes,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_elements(&self) -> usize {
        self.element_types.size()
    }

    pub fn num_nodes(&self) -> usize {
        self.coordinates.size()
    }

    pub fn num_subdomains(&self) -> usize {
        self.num_subdomains
    }

    pub fn num_boundaries(&self) -> usize {
        self.boundary_sides.len()
    }

    #[inline]
    pub fn element_type(&self, element: usize) -> usize {
        self.element_types.get(element)
    }

    #[inline]
    pub fn subdomain(&self, element: usize) -> usize {
        self.subdomains.get(element)
    }

    #[inline]
    pub fn element_node_count(&self, element: usize) -> usize {
        self.node_counts.get(element)
    }

    #[inline]
    pub fn element_node(&self, element: usize, k: usize) -> usize {
        self.element_nodes.at([element as isize, k as isize])
    }

    #[inline]
    pub fn node_coordinates(&self, node: usize) -> Vector3<f64> {
        Vector3::from(self.coordinates.get(node))
    }

    pub fn neighbor(&self, element: usize, side: usize) -> Option<(usize, usize)> {
        let index = [element as isize, side as isize];
        let neighbor = self.neighbor_elements.at(index);
        (neighbor != NONE).then(|| (neighbor, self.neighbor_sides.at(index)))
    }

    /// Offset of the element's first volume quadrature point in the global numbering.
    #[inline]
    pub fn qp_offset(&self, element: usize) -> usize {
        self.qp_offsets.get(element)
    }

    #[inline]
    pub fn face_qp_offset(&self, element: usize, side: usize) -> usize {
        self.face_qp_offsets.at([element as isize, side as isize])
    }

    pub fn total_qps(&self) -> usize {
        self.qp_offsets.get(self.num_elements())
    }

    pub fn total_face_qps(&self) -> usize {
        self.total_face_qps
    }

    /// `(element, side)` rows of the given boundary.
    pub fn boundary_sides(&self, boundary: usize) -> &Array2D<usize> {
        &self.boundary_sides[boundary]
    }

    pub fn boundary_nodes(&self, boundary: usize) -> &Array1D<usize> {
        &self.boundary_nodes[boundary]
    }

    /// Host-side list of elements in any of the given subdomains. An empty list selects all.
    pub fn elements_in(&self, subdomains: &[usize]) -> Vec<usize> {
        (0..self.num_elements())
            .filter(|&e| subdomains.is_empty() || subdomains.contains(&self.subdomain(e)))
            .collect()
    }

    /// Host-side sorted list of nodes of elements in the given subdomains.
    pub fn nodes_in(&self, subdomains: &[usize]) -> Vec<usize> {
        let mut nodes = BTreeSet::new();
        for e in self.elements_in(subdomains) {
            for k in 0..self.element_node_count(e) {
                nodes.insert(self.element_node(e, k));
            }
        }
        nodes.into_iter().collect()
    }

    /// Host-side list of `(element, side)` pairs of elements in the given subdomains whose
    /// sides are interior.
    pub fn interior_sides_in(&self, subdomains: &[usize], tables: &FeTables) -> Vec<(usize, usize)> {
        self.elements_in(subdomains)
            .into_iter()
            .flat_map(|e| (0..tables.num_sides(self.element_type(e))).map(move |s| (e, s)))
            .filter(|&(e, s)| self.neighbor(e, s).is_some())
            .collect()
    }
}

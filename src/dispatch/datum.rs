use super::object::PhaseContext;
use crate::fe_tables::{FeTables, Transform};
use crate::mesh::Mesh;
use crate::system::{System, TagId};
use nalgebra::{Matrix3, Point3, Vector3};

/// Per-work-item view of one element or element side.
///
/// The geometric transform is computed lazily and reused while consecutive queries refer to
/// the same quadrature point.
pub struct Datum<'a> {
    mesh: &'a Mesh,
    tables: &'a FeTables,
    system: &'a System,
    variable: usize,
    element: usize,
    side: Option<usize>,
    subdomain: usize,
    element_type: usize,
    num_qps: usize,
    qp_offset: usize,
    transform: Transform,
    transform_qp: Option<usize>,
}

impl<'a> Datum<'a> {
    pub fn new(
        mesh: &'a Mesh,
        tables: &'a FeTables,
        system: &'a System,
        variable: usize,
        element: usize,
        side: Option<usize>,
    ) -> Self {
        let element_type = mesh.element_type(element);
        let (num_qps, qp_offset) = match side {
            None => (tables.num_qps(element_type), mesh.qp_offset(element)),
            Some(side) => (tables.num_face_qps(element_type), mesh.face_qp_offset(element, side)),
        };
        Self {
            mesh,
            tables,
            system,
            variable,
            element,
            side,
            subdomain: mesh.subdomain(element),
            element_type,
            num_qps,
            qp_offset,
            transform: Transform::default(),
            transform_qp: None,
        }
    }

    pub fn on_element(ctx: &PhaseContext<'a>, variable: usize, element: usize) -> Self {
        Self::new(ctx.mesh, ctx.tables, ctx.system, variable, element, None)
    }

    pub fn on_side(ctx: &PhaseContext<'a>, variable: usize, element: usize, side: usize) -> Self {
        Self::new(ctx.mesh, ctx.tables, ctx.system, variable, element, Some(side))
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    pub fn system(&self) -> &'a System {
        self.system
    }

    /// The variable of the launching object.
    pub fn variable(&self) -> usize {
        self.variable
    }

    pub fn element(&self) -> usize {
        self.element
    }

    pub fn side(&self) -> Option<usize> {
        self.side
    }

    pub fn is_side(&self) -> bool {
        self.side.is_some()
    }

    pub fn subdomain(&self) -> usize {
        self.subdomain
    }

    pub fn element_type(&self) -> usize {
        self.element_type
    }

    pub fn num_qps(&self) -> usize {
        self.num_qps
    }

    /// Index of the first quadrature point of this element (or side) in the global numbering.
    pub fn qp_offset(&self) -> usize {
        self.qp_offset
    }

    /// Forgets the cached transform.
    pub fn reinit(&mut self) {
        self.transform_qp = None;
    }

    pub fn transform(&mut self, qp: usize) -> &Transform {
        if self.transform_qp != Some(qp) {
            self.transform = self.tables.transform(self.mesh, self.element, self.side, qp);
            self.transform_qp = Some(qp);
        }
        &self.transform
    }

    pub fn jxw(&mut self, qp: usize) -> f64 {
        self.transform(qp).jxw
    }

    pub fn q_point(&mut self, qp: usize) -> Point3<f64> {
        self.transform(qp).point
    }

    /// Outward unit normal at a side quadrature point.
    pub fn normal(&mut self, qp: usize) -> Vector3<f64> {
        self.transform(qp).normal
    }

    pub fn inverse_jacobian_t(&mut self, qp: usize) -> Matrix3<f64> {
        self.transform(qp).inverse_jacobian_t
    }

    pub fn num_dofs(&self, variable: usize) -> usize {
        self.system.dofs().element_dof_count(self.element, variable)
    }

    pub fn local_dof(&self, variable: usize, i: usize) -> usize {
        self.system.dofs().element_local_dof(self.element, i, variable)
    }

    pub fn global_dof(&self, variable: usize, i: usize) -> usize {
        self.system.dofs().element_global_dof(self.element, i, variable)
    }

    /// Shape function `j` of `variable` at `qp`.
    pub fn phi(&self, variable: usize, j: usize, qp: usize) -> f64 {
        let fe_type = self.system.dofs().fe_type(variable);
        self.tables
            .shape_value(self.element_type, fe_type, self.side, j, qp)
    }

    /// Physical gradient of shape function `j` of `variable` at `qp`.
    pub fn grad_phi(&mut self, variable: usize, j: usize, qp: usize) -> Vector3<f64> {
        let fe_type = self.system.dofs().fe_type(variable);
        let reference = self
            .tables
            .shape_gradient(self.element_type, fe_type, self.side, j, qp);
        self.inverse_jacobian_t(qp) * reference
    }

    /// Test function `i` of the launching object's variable.
    pub fn test(&self, i: usize, qp: usize) -> f64 {
        self.phi(self.variable, i, qp)
    }

    pub fn grad_test(&mut self, i: usize, qp: usize) -> Vector3<f64> {
        self.grad_phi(self.variable, i, qp)
    }

    fn solution(&mut self, variable: usize, tag: TagId, qp: usize) -> (f64, Vector3<f64>) {
        let cache = self.system.cache();
        if self.side.is_none() && cache.is_cached(tag, self.subdomain, variable) {
            let global = self.qp_offset + qp;
            return (cache.value(tag, variable, global), cache.gradient(tag, variable, global));
        }
        let inverse_jacobian_t = self.inverse_jacobian_t(qp);
        self.system.project(
            self.mesh,
            self.tables,
            self.element,
            self.side,
            variable,
            tag,
            qp,
            &inverse_jacobian_t,
        )
    }

    /// Value of `variable` in vector `tag` at `qp`, from the quadrature point cache if valid.
    pub fn value(&mut self, variable: usize, tag: TagId, qp: usize) -> f64 {
        self.solution(variable, tag, qp).0
    }

    pub fn gradient(&mut self, variable: usize, tag: TagId, qp: usize) -> Vector3<f64> {
        self.solution(variable, tag, qp).1
    }
}

/// Per-work-item view of one mesh node.
pub struct NodeDatum<'a> {
    mesh: &'a Mesh,
    system: &'a System,
    variable: usize,
    node: usize,
}

impl<'a> NodeDatum<'a> {
    pub fn new(mesh: &'a Mesh, system: &'a System, variable: usize, node: usize) -> Self {
        Self {
            mesh,
            system,
            variable,
            node,
        }
    }

    pub fn on_node(ctx: &PhaseContext<'a>, variable: usize, node: usize) -> Self {
        Self::new(ctx.mesh, ctx.system, variable, node)
    }

    pub fn system(&self) -> &'a System {
        self.system
    }

    pub fn variable(&self) -> usize {
        self.variable
    }

    pub fn node(&self) -> usize {
        self.node
    }

    pub fn coordinates(&self) -> Vector3<f64> {
        self.mesh.node_coordinates(self.node)
    }

    pub fn dof(&self, variable: usize) -> Option<usize> {
        self.system.dofs().node_local_dof(self.node, variable)
    }

    /// Value of `variable` in vector `tag` at the node.
    ///
    /// # Panics
    ///
    /// Panics if the variable has no dof at the node.
    pub fn value(&self, variable: usize, tag: TagId) -> f64 {
        match self.dof(variable) {
            Some(dof) => self.system.vector(tag).get(dof),
            None => panic!("NodeDatum: variable {} has no dof at node {}", variable, self.node),
        }
    }

    /// Value of the launching object's variable in vector `tag`.
    pub fn u(&self, tag: TagId) -> f64 {
        self.value(self.variable, tag)
    }
}

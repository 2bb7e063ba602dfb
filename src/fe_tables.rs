//! Device-resident reference finite element tables.
use crate::array::{Array1D, Array2D, Array3D};
use crate::mesh::Mesh;
use eyre::ensure;
use log::info;
use nalgebra::{Matrix3, Point3, Vector3};

/// Source of reference shape functions and quadrature rules.
///
/// Element types and FE types are dense indices chosen by the provider. Gradients are taken
/// with respect to reference coordinates. Components beyond the mesh dimension must be zero.
pub trait ReferenceElementProvider {
    fn num_element_types(&self) -> usize;
    fn num_fe_types(&self) -> usize;

    /// The FE type whose shape functions map the element's nodes to physical space.
    fn geometry_fe_type(&self, element_type: usize) -> usize;
    fn num_sides(&self, element_type: usize) -> usize;
    fn num_dofs(&self, element_type: usize, fe_type: usize) -> usize;

    fn quadrature_weights(&self, element_type: usize) -> Vec<f64>;
    fn phi(&self, element_type: usize, fe_type: usize, i: usize, qp: usize) -> f64;
    fn grad_phi(&self, element_type: usize, fe_type: usize, i: usize, qp: usize) -> [f64; 3];

    fn face_quadrature_weights(&self, element_type: usize) -> Vec<f64>;
    fn phi_face(&self, element_type: usize, fe_type: usize, side: usize, i: usize, qp: usize) -> f64;
    fn grad_phi_face(&self, element_type: usize, fe_type: usize, side: usize, i: usize, qp: usize) -> [f64; 3];

    /// Outward unit normal of `side` in reference coordinates.
    fn reference_normal(&self, element_type: usize, side: usize) -> [f64; 3];
}

/// Geometric mapping data at one quadrature point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    /// Inverse transpose of the reference-to-physical Jacobian. Maps reference gradients to
    /// physical gradients.
    pub inverse_jacobian_t: Matrix3<f64>,
    /// Quadrature weight times the volume (or surface) measure.
    pub jxw: f64,
    pub point: Point3<f64>,
    /// Outward unit normal for side transforms, zero for volume transforms.
    pub normal: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            inverse_jacobian_t: Matrix3::identity(),
            jxw: 0.0,
            point: Point3::origin(),
            normal: Vector3::zeros(),
        }
    }
}

#[derive(Debug)]
pub struct FeTables {
    num_fe_types: usize,
    geometry_fe: Array1D<usize>,
    num_sides: Array1D<usize>,
    num_dofs: Array2D<usize>,
    weights: Array1D<Array1D<f64>>,
    face_weights: Array1D<Array1D<f64>>,
    phi: Array2D<Array2D<f64>>,
    grad_phi: Array2D<Array2D<[f64; 3]>>,
    phi_face: Array2D<Array3D<f64>>,
    grad_phi_face: Array2D<Array3D<[f64; 3]>>,
    normals: Array1D<Array1D<[f64; 3]>>,
}

impl FeTables {
    pub fn build(provider: &dyn ReferenceElementProvider) -> eyre::Result<Self> {
        let n_types = provider.num_element_types();
        let n_fe = provider.num_fe_types();

        let mut geometry_fe = Vec::with_capacity(n_types);
        let mut num_sides = Vec::with_capacity(n_types);
        let mut num_dofs = Array2D::from_dims(&[n_types, n_fe])?;
        let mut weights = Array1D::from_dims(&[n_types])?;
        let mut face_weights = Array1D::from_dims(&[n_types])?;
        let mut phi = Array2D::from_dims(&[n_types, n_fe])?;
        let mut grad_phi = Array2D::from_dims(&[n_types, n_fe])?;
        let mut phi_face = Array2D::from_dims(&[n_types, n_fe])?;
        let mut grad_phi_face = Array2D::from_dims(&[n_types, n_fe])?;
        let mut normals = Array1D::from_dims(&[n_types])?;

        for t in 0..n_types {
            let geometry = provider.geometry_fe_type(t);
            ensure!(
                geometry < n_fe,
                "FeTables: geometry FE type {} of element type {} is out of range ({} FE types)",
                geometry,
                t,
                n_fe
            );
            geometry_fe.push(geometry);
            let sides = provider.num_sides(t);
            num_sides.push(sides);

            let w = provider.quadrature_weights(t);
            let w_face = provider.face_quadrature_weights(t);
            let (n_qps, n_face_qps) = (w.len(), w_face.len());
            weights.set(t, Array1D::from_slice(&w));
            face_weights.set(t, Array1D::from_slice(&w_face));

            let mut side_normals = Vec::with_capacity(sides);
            for s in 0..sides {
                side_normals.push(provider.reference_normal(t, s));
            }
            normals.set(t, Array1D::from_slice(&side_normals));

            for fe in 0..n_fe {
                let n = provider.num_dofs(t, fe);
                num_dofs.set_at([t as isize, fe as isize], n);

                let mut values = Array2D::from_dims(&[n, n_qps])?;
                let mut grads = Array2D::from_dims(&[n, n_qps])?;
                for i in 0..n {
                    for qp in 0..n_qps {
                        let index = [i as isize, qp as isize];
                        values.set_at(index, provider.phi(t, fe, i, qp));
                        grads.set_at(index, provider.grad_phi(t, fe, i, qp));
                    }
                }
                phi.set_at([t as isize, fe as isize], values);
                grad_phi.set_at([t as isize, fe as isize], grads);

                let mut face_values = Array3D::from_dims(&[sides, n, n_face_qps])?;
                let mut face_grads = Array3D::from_dims(&[sides, n, n_face_qps])?;
                for s in 0..sides {
                    for i in 0..n {
                        for qp in 0..n_face_qps {
                            let index = [s as isize, i as isize, qp as isize];
                            face_values.set_at(index, provider.phi_face(t, fe, s, i, qp));
                            face_grads.set_at(index, provider.grad_phi_face(t, fe, s, i, qp));
                        }
                    }
                }
                phi_face.set_at([t as isize, fe as isize], face_values);
                grad_phi_face.set_at([t as isize, fe as isize], face_grads);
            }
        }

        num_dofs.copy_to_device()?;
        weights.copy_to_device_nested()?;
        face_weights.copy_to_device_nested()?;
        phi.copy_to_device_nested()?;
        grad_phi.copy_to_device_nested()?;
        phi_face.copy_to_device_nested()?;
        grad_phi_face.copy_to_device_nested()?;
        normals.copy_to_device_nested()?;

        info!("built reference tables for {} element types and {} FE types", n_types, n_fe);

        Ok(Self {
            num_fe_types: n_fe,
            geometry_fe: Array1D::from_slice(&geometry_fe),
            num_sides: Array1D::from_slice(&num_sides),
            num_dofs,
            weights,
            face_weights,
            phi,
            grad_phi,
            phi_face,
            grad_phi_face,
            normals,
        })
    }

    pub fn num_element_types(&self) -> usize {
        self.geometry_fe.size()
    }

    pub fn num_fe_types(&self) -> usize {
        self.num_fe_types
    }

    pub fn geometry_fe_type(&self, element_type: usize) -> usize {
        self.geometry_fe.get(element_type)
    }

    pub fn num_sides(&self, element_type: usize) -> usize {
        self.num_sides.get(element_type)
    }

    pub fn num_dofs(&self, element_type: usize, fe_type: usize) -> usize {
        self.num_dofs.at([element_type as isize, fe_type as isize])
    }

    pub fn num_qps(&self, element_type: usize) -> usize {
        self.weights.get_ref(element_type).size()
    }

    pub fn num_face_qps(&self, element_type: usize) -> usize {
        self.face_weights.get_ref(element_type).size()
    }

    pub fn weight(&self, element_type: usize, qp: usize) -> f64 {
        self.weights.get_ref(element_type).get(qp)
    }

    pub fn face_weight(&self, element_type: usize, qp: usize) -> f64 {
        self.face_weights.get_ref(element_type).get(qp)
    }

    #[inline]
    pub fn phi(&self, element_type: usize, fe_type: usize, i: usize, qp: usize) -> f64 {
        self.phi
            .at_ref([element_type as isize, fe_type as isize])
            .at([i as isize, qp as isize])
    }

    #[inline]
    pub fn grad_phi(&self, element_type: usize, fe_type: usize, i: usize, qp: usize) -> Vector3<f64> {
        let grad = self
            .grad_phi
            .at_ref([element_type as isize, fe_type as isize])
            .at([i as isize, qp as isize]);
        Vector3::from(grad)
    }

    #[inline]
    pub fn phi_face(&self, element_type: usize, fe_type: usize, side: usize, i: usize, qp: usize) -> f64 {
        self.phi_face
            .at_ref([element_type as isize, fe_type as isize])
            .at([side as isize, i as isize, qp as isize])
    }

    #[inline]
    pub fn grad_phi_face(
        &self,
        element_type: usize,
        fe_type: usize,
        side: usize,
        i: usize,
        qp: usize,
    ) -> Vector3<f64> {
        let grad = self
            .grad_phi_face
            .at_ref([element_type as isize, fe_type as isize])
            .at([side as isize, i as isize, qp as isize]);
        Vector3::from(grad)
    }

    pub fn reference_normal(&self, element_type: usize, side: usize) -> Vector3<f64> {
        Vector3::from(self.normals.get_ref(element_type).get(side))
    }

    /// Value of shape function `i` at a volume (`side == None`) or face quadrature point.
    #[inline]
    pub fn shape_value(&self, element_type: usize, fe_type: usize, side: Option<usize>, i: usize, qp: usize) -> f64 {
        match side {
            None => self.phi(element_type, fe_type, i, qp),
            Some(side) => self.phi_face(element_type, fe_type, side, i, qp),
        }
    }

    /// Reference gradient of shape function `i`, see [`shape_value`](Self::shape_value).
    #[inline]
    pub fn shape_gradient(
        &self,
        element_type: usize,
        fe_type: usize,
        side: Option<usize>,
        i: usize,
        qp: usize,
    ) -> Vector3<f64> {
        match side {
            None => self.grad_phi(element_type, fe_type, i, qp),
            Some(side) => self.grad_phi_face(element_type, fe_type, side, i, qp),
        }
    }

    /// Computes the geometric transform of `element` at a volume or face quadrature point.
    ///
    /// # Panics
    ///
    /// Panics if the element mapping is singular at the quadrature point.
    pub fn transform(&self, mesh: &Mesh, element: usize, side: Option<usize>, qp: usize) -> Transform {
        let element_type = mesh.element_type(element);
        let geometry = self.geometry_fe_type(element_type);

        let mut jacobian = Matrix3::zeros();
        let mut point = Point3::origin();
        for k in 0..mesh.element_node_count(element) {
            let x = mesh.node_coordinates(mesh.element_node(element, k));
            let phi = self.shape_value(element_type, geometry, side, k, qp);
            let grad = self.shape_gradient(element_type, geometry, side, k, qp);
            point += x * phi;
            jacobian += x * grad.transpose();
        }
        // Lower-dimensional elements are embedded with an identity mapping in the
        // remaining directions
        for d in mesh.dim()..3 {
            jacobian[(d, d)] = 1.0;
        }

        let det = jacobian.determinant();
        let inverse = jacobian
            .try_inverse()
            .unwrap_or_else(|| panic!("singular element mapping for element {} at qp {}", element, qp));
        let inverse_jacobian_t = inverse.transpose();

        match side {
            None => Transform {
                inverse_jacobian_t,
                jxw: det.abs() * self.weight(element_type, qp),
                point,
                normal: Vector3::zeros(),
            },
            Some(side) => {
                // Nanson's formula: da = |det J| |J^-T N| dA
                let scaled_normal = inverse_jacobian_t * self.reference_normal(element_type, side);
                let area_scale = scaled_normal.norm();
                Transform {
                    inverse_jacobian_t,
                    jxw: det.abs() * area_scale * self.face_weight(element_type, qp),
                    point,
                    normal: scaled_normal / area_scale,
                }
            }
        }
    }
}

use crate::fixtures::{build_mesh, LinePartition, LinearSegment};
use fenris_hetero::fe_tables::FeTables;
use fenris_hetero::space::{with_space, MemorySpace};
use util::assert_scalar_close;

#[test]
fn line_mesh_topology() {
    let (mesh, tables) = build_mesh(&LinePartition::serial(4));
    assert_eq!(mesh.dim(), 1);
    assert_eq!(mesh.num_elements(), 4);
    assert_eq!(mesh.num_nodes(), 5);
    assert_eq!(mesh.num_boundaries(), 2);
    assert_eq!(mesh.element_node(2, 1), 3);

    assert_eq!(mesh.neighbor(0, 0), None);
    assert_eq!(mesh.neighbor(0, 1), Some((1, 0)));
    assert_eq!(mesh.neighbor(3, 1), None);
    assert_eq!(mesh.interior_sides_in(&[], &tables).len(), 6);

    assert_eq!(mesh.boundary_nodes(0).to_vec(), vec![0]);
    assert_eq!(mesh.boundary_nodes(1).to_vec(), vec![4]);
    assert_eq!(mesh.boundary_sides(1).to_vec(), vec![3, 1]);
}

#[test]
fn quadrature_points_are_numbered_per_element_and_side() {
    let (mesh, _) = build_mesh(&LinePartition::serial(3));
    assert_eq!(mesh.total_qps(), 6);
    assert_eq!(mesh.qp_offset(2), 4);
    assert_eq!(mesh.total_face_qps(), 6);
    assert_eq!(mesh.face_qp_offset(1, 1), 3);
}

#[test]
fn subdomains_select_elements_and_nodes() {
    let (mesh, _) = build_mesh(&LinePartition::serial(4).with_subdomain_split(3));
    assert_eq!(mesh.num_subdomains(), 2);
    assert_eq!(mesh.subdomain(3), 1);
    assert_eq!(mesh.elements_in(&[0]), vec![0, 1, 2]);
    assert_eq!(mesh.elements_in(&[1]), vec![3]);
    assert_eq!(mesh.elements_in(&[]).len(), 4);
    assert_eq!(mesh.nodes_in(&[1]), vec![3, 4]);
}

#[test]
fn partitions_use_local_numbering() {
    let (mesh, _) = build_mesh(&LinePartition::new(1, 2, 6));
    assert_eq!(mesh.num_elements(), 3);
    assert_scalar_close!(mesh.node_coordinates(0).x, 0.5, abstol = 1e-14);
    assert_eq!(mesh.boundary_nodes(0).size(), 0);
    assert_eq!(mesh.boundary_nodes(1).to_vec(), vec![3]);
}

#[test]
fn mesh_data_is_device_resident() {
    let (mesh, _) = build_mesh(&LinePartition::serial(2));
    let (node, x) = with_space(MemorySpace::Device, || (mesh.element_node(1, 1), mesh.node_coordinates(2).x));
    assert_eq!(node, 2);
    assert_scalar_close!(x, 1.0, abstol = 1e-14);
}

#[test]
fn reference_tables_are_device_resident() {
    let tables = FeTables::build(&LinearSegment).unwrap();
    assert_eq!(tables.num_element_types(), 1);
    assert_eq!(tables.num_qps(0), 2);
    assert_eq!(tables.num_face_qps(0), 1);

    let (phi, grad) = with_space(MemorySpace::Device, || (tables.phi_face(0, 0, 1, 1, 0), tables.grad_phi(0, 0, 0, 1)));
    assert_scalar_close!(phi, 1.0, abstol = 1e-14);
    assert_scalar_close!(grad.x, -0.5, abstol = 1e-14);
}

#[test]
fn volume_transforms_integrate_element_lengths() {
    let partition = LinePartition::serial(4);
    let (mesh, tables) = build_mesh(&partition);
    let mut length = 0.0;
    for element in 0..mesh.num_elements() {
        for qp in 0..tables.num_qps(0) {
            let transform = tables.transform(&mesh, element, None, qp);
            assert_scalar_close!(transform.inverse_jacobian_t[(0, 0)], 8.0, abstol = 1e-12);
            assert!(transform.point.x > partition.x(element) && transform.point.x < partition.x(element + 1));
            length += transform.jxw;
        }
    }
    assert_scalar_close!(length, 1.0, abstol = 1e-12);
}

#[test]
fn side_transforms_have_outward_normals() {
    let (mesh, tables) = build_mesh(&LinePartition::serial(2));
    let left = tables.transform(&mesh, 0, Some(0), 0);
    let right = tables.transform(&mesh, 1, Some(1), 0);
    assert_scalar_close!(left.normal.x, -1.0, abstol = 1e-14);
    assert_scalar_close!(right.normal.x, 1.0, abstol = 1e-14);
    assert_scalar_close!(right.point.x, 1.0, abstol = 1e-14);
    assert_scalar_close!(left.jxw, 1.0, abstol = 1e-14);
}

#[test]
fn inconsistent_dof_maps_are_rejected() {
    use fenris_hetero::comm::SerialCommunicator;
    use fenris_hetero::system::System;

    let mut partition = LinePartition::serial(2);
    partition.fe_type = 3;
    let (mesh, tables) = build_mesh(&partition);
    let err = System::new(&partition, &mesh, &tables, crate::fixtures::registry(), &SerialCommunicator).unwrap_err();
    assert!(err.to_string().contains("FE type 3"));
}

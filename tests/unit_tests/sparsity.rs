use fenris_hetero::space::{with_space, MemorySpace};
use fenris_hetero::system::{CsrMatrix, Sparsity};
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[test]
fn coordinates_are_sorted_and_deduplicated() {
    let coordinates = vec![(2, 1), (0, 3), (0, 0), (2, 1), (0, 3), (2, 0)];
    let sparsity = Sparsity::from_coordinates(4, 5, coordinates).unwrap();
    assert_eq!(sparsity.num_rows(), 4);
    assert_eq!(sparsity.num_cols(), 5);
    assert_eq!(sparsity.nnz(), 4);
    assert_eq!(sparsity.row_offsets().to_vec(), vec![0, 2, 2, 4, 4]);
    assert_eq!(sparsity.col_indices().to_vec(), vec![0, 3, 0, 1]);
    assert_eq!(sparsity.row_columns(1), &[] as &[usize]);
    assert_eq!(sparsity.row_columns(2), &[0, 1]);
}

#[test]
fn find_returns_value_positions() {
    let sparsity = Sparsity::from_coordinates(3, 3, vec![(0, 0), (0, 2), (1, 1), (2, 0), (2, 2)]).unwrap();
    assert_eq!(sparsity.find(0, 2), Some(1));
    assert_eq!(sparsity.find(2, 0), Some(3));
    assert_eq!(sparsity.find(1, 0), None);
    assert_eq!(sparsity.row_range(2), 3..5);
}

#[test]
fn invalid_patterns_are_rejected() {
    assert!(Sparsity::from_coordinates(2, 2, vec![(2, 0)]).is_err());
    assert!(Sparsity::from_coordinates(2, 2, vec![(0, 2)]).is_err());

    let unsorted = Sparsity::try_from_offsets_and_indices(1, 3, vec![0, 2], vec![2, 1]);
    assert!(unsorted
        .unwrap_err()
        .to_string()
        .contains("not strictly increasing"));
    assert!(Sparsity::try_from_offsets_and_indices(2, 3, vec![0, 1], vec![0]).is_err());
    assert!(Sparsity::try_from_offsets_and_indices(1, 3, vec![0, 2], vec![0]).is_err());

    // Interior offsets are checked before any row is read
    let overrun = Sparsity::try_from_offsets_and_indices(2, 4, vec![0, 5, 3], vec![0, 1, 2]);
    assert!(overrun
        .unwrap_err()
        .to_string()
        .contains("exceeds the number of entries"));
    let decreasing = Sparsity::try_from_offsets_and_indices(2, 4, vec![0, 2, 1], vec![0]);
    assert!(decreasing.is_err());
}

#[test]
fn empty_patterns_are_valid() {
    let sparsity = Sparsity::from_coordinates(3, 3, Vec::new()).unwrap();
    assert_eq!(sparsity.nnz(), 0);
    assert_eq!(sparsity.row_offsets().to_vec(), vec![0; 4]);
}

#[test]
fn matrices_accumulate_and_convert_to_solver_format() {
    let sparsity = Sparsity::from_coordinates(2, 3, vec![(0, 0), (0, 2), (1, 1), (1, 2)]).unwrap();
    let mut matrix = CsrMatrix::new(&sparsity).unwrap();
    matrix.atomic_add(0, 0, 1.0);
    matrix.atomic_add(0, 0, 2.0);
    matrix.atomic_add(1, 2, -4.0);
    unsafe { matrix.write(0, 2, 5.0) };
    assert_eq!(matrix.get(0, 0), 3.0);
    assert_eq!(matrix.get(1, 0), 0.0);

    let csr = matrix
        .to_nalgebra_csr(MemorySpace::Host, 2)
        .unwrap();
    let expected = DMatrix::from_row_slice(2, 3, &[3.0, 0.0, 5.0, 0.0, 0.0, -4.0]);
    assert_matrix_eq!(DMatrix::from(&csr), expected);

    let first_row = matrix
        .to_nalgebra_csr(MemorySpace::Host, 1)
        .unwrap();
    assert_eq!(first_row.nrows(), 1);
    assert_eq!(first_row.nnz(), 2);
    assert!(matrix.to_nalgebra_csr(MemorySpace::Host, 3).is_err());

    unsafe { matrix.zero_row(0) };
    assert_eq!(matrix.get(0, 0), 0.0);
    assert_eq!(matrix.get(1, 2), -4.0);

    matrix.zero();
    assert!(matrix.values().to_vec().iter().all(|&v| v == 0.0));
}

#[test]
fn solver_matrices_read_the_requested_side() {
    let sparsity = Sparsity::from_coordinates(1, 1, vec![(0, 0)]).unwrap();
    let matrix = CsrMatrix::new(&sparsity).unwrap();
    with_space(MemorySpace::Device, || matrix.atomic_add(0, 0, 2.0));

    let device = matrix
        .to_nalgebra_csr(MemorySpace::Device, 1)
        .unwrap();
    let host = matrix
        .to_nalgebra_csr(MemorySpace::Host, 1)
        .unwrap();
    assert_eq!(device.values(), &[2.0]);
    assert_eq!(host.values(), &[0.0]);
}

#[test]
#[should_panic(expected = "not in the sparsity pattern")]
fn adding_outside_the_pattern_panics() {
    let sparsity = Sparsity::from_coordinates(2, 2, vec![(0, 0)]).unwrap();
    let matrix = CsrMatrix::new(&sparsity).unwrap();
    matrix.atomic_add(1, 1, 1.0);
}

proptest! {
    #[test]
    fn every_coordinate_is_found(coordinates in vec((0..8usize, 0..6usize), 0..40)) {
        let unique: BTreeSet<_> = coordinates.iter().copied().collect();
        let sparsity = Sparsity::from_coordinates(8, 6, coordinates).unwrap();
        prop_assert_eq!(sparsity.nnz(), unique.len());

        let mut positions = BTreeSet::new();
        for &(row, col) in &unique {
            let position = sparsity.find(row, col);
            prop_assert!(position.is_some());
            positions.insert(position.unwrap());
        }
        prop_assert_eq!(positions.len(), unique.len());
        for row in 0..8 {
            for col in 0..6 {
                prop_assert_eq!(sparsity.find(row, col).is_some(), unique.contains(&(row, col)));
            }
        }
    }
}

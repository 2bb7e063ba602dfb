use fenris_hetero::array::{Array1D, Array2D, HeteroArray, Layout};
use fenris_hetero::space::{with_space, MemcpyKind, MemorySpace};
use proptest::collection::vec;
use proptest::prelude::*;
use rayon::prelude::*;
use std::ptr::NonNull;
use util::assert_scalar_close;

#[test]
fn from_dims_allocates_both_sides_with_default_values() {
    let a = Array2D::<f64>::from_dims(&[2, 3]).unwrap();
    assert!(a.is_host_alloc());
    assert!(a.is_device_alloc());
    assert_eq!(a.size(), 6);
    assert_eq!(a.dims(), [2, 3]);
    assert_eq!(a.to_vec(), vec![0.0; 6]);
    assert_eq!(with_space(MemorySpace::Device, || a.to_vec()), vec![0.0; 6]);
}

#[test]
fn wrong_number_of_dimensions_is_an_error() {
    let err = Array2D::<f64>::from_dims(&[2]).unwrap_err();
    assert!(err.to_string().contains("number of dimensions"));
}

#[test]
fn uninitialized_arrays_are_empty() {
    let a = Array1D::<f64>::new();
    assert!(!a.is_init());
    assert!(!a.is_alloc());
    assert_eq!(a.size(), 0);
    assert_eq!(a.use_count(), 0);
    assert!(a.as_slice().is_empty());
}

#[test]
fn layouts_determine_strides() {
    let mut row_major = HeteroArray::<f64, 2>::new();
    row_major.create(&[2, 3]).unwrap();
    assert_eq!(row_major.index_of([0, 1]), 1);
    assert_eq!(row_major.index_of([1, 0]), 3);

    let mut column_major = HeteroArray::<f64, 2>::with_layout(Layout::ColumnMajor);
    column_major.create(&[2, 3]).unwrap();
    assert_eq!(column_major.stride(0), 1);
    assert_eq!(column_major.stride(1), 2);
    assert_eq!(column_major.index_of([1, 0]), 1);
    assert_eq!(column_major.index_of([0, 1]), 2);
}

#[test]
fn offsets_shift_the_addressing_origin() {
    let mut a = Array2D::<usize>::from_dims(&[2, 2]).unwrap();
    for (i, value) in a.as_mut_slice().iter_mut().enumerate() {
        *value = i;
    }
    a.offset(&[-1]).unwrap();
    assert!(a.is_offset());
    assert_eq!(a.offsets(), [-1, 0]);
    assert_eq!(a.at([-1, 0]), 0);
    assert_eq!(a.at([0, 1]), 3);

    assert!(a.offset(&[0, 0, 0]).is_err());
}

#[test]
fn host_and_device_sides_are_synchronized_explicitly() {
    let mut a = Array1D::from_slice(&[1.0, 2.0]);
    a.set(0, 5.0);
    assert_eq!(a.get(0), 5.0);
    assert_eq!(with_space(MemorySpace::Device, || a.get(0)), 1.0);

    a.copy_to_device().unwrap();
    assert_eq!(with_space(MemorySpace::Device, || a.get(0)), 5.0);

    with_space(MemorySpace::Device, || a.set(1, 7.0));
    assert_eq!(a.get(1), 2.0);
    a.copy(MemcpyKind::DeviceToHost).unwrap();
    assert_eq!(a.to_vec(), vec![5.0, 7.0]);
}

#[test]
fn clones_share_storage() {
    let mut a = Array1D::from_slice(&[1.0, 2.0, 3.0]);
    let b = a.clone();
    assert_eq!(a.use_count(), 2);
    assert!(a.shares_storage_with(&b));

    a.set(0, 10.0);
    assert_eq!(b.get(0), 10.0);

    drop(b);
    assert_eq!(a.use_count(), 1);
}

#[test]
fn deep_clones_are_independent() {
    let mut a = Array1D::from_slice(&[1.0, 2.0, 3.0]);
    let b = a.deep_clone().unwrap();
    assert!(!a.shares_storage_with(&b));
    assert_eq!(a.use_count(), 1);

    a.set(0, 10.0);
    a.copy_to_device().unwrap();
    assert_eq!(b.to_vec(), vec![1.0, 2.0, 3.0]);
    assert_eq!(with_space(MemorySpace::Device, || b.to_vec()), vec![1.0, 2.0, 3.0]);
}

#[test]
fn swap_exchanges_storage() {
    let mut a = Array1D::from_slice(&[1, 2, 3]);
    let mut b = Array1D::from_slice(&[4]);
    a.swap(&mut b);
    assert_eq!(a.to_vec(), vec![4]);
    assert_eq!(b.to_vec(), vec![1, 2, 3]);
    assert_eq!(a.use_count(), 1);
    assert_eq!(b.use_count(), 1);
}

#[test]
fn destroy_releases_the_handle() {
    let mut a = Array1D::from_slice(&[1, 2, 3]);
    let b = a.shallow_clone();
    a.destroy();
    assert!(!a.is_init());
    assert_eq!(b.use_count(), 1);
    assert_eq!(b.to_vec(), vec![1, 2, 3]);
}

#[test]
fn move_to_device_frees_host_memory() {
    let mut a = Array1D::from_slice(&[1.0, 2.0]);
    a.set(1, 4.0);
    a.move_to_device(true).unwrap();
    assert!(!a.is_host_alloc());
    assert_eq!(with_space(MemorySpace::Device, || a.to_vec()), vec![1.0, 4.0]);

    a.move_to_host(false).unwrap();
    assert!(a.is_host_alloc());
    assert!(a.is_device_alloc());
    assert_eq!(a.to_vec(), vec![1.0, 4.0]);
}

#[test]
fn move_and_free_requires_unique_handles() {
    let mut a = Array1D::from_slice(&[1.0, 2.0]);
    let _b = a.clone();
    let err = a.move_to_device(true).unwrap_err();
    assert!(err.to_string().contains("shared by 2 handles"));
}

#[test]
fn copies_allocate_the_destination_of_unique_handles() {
    let mut a = Array1D::<f64>::new();
    a.create_host(&[3]).unwrap();
    a.as_mut_slice()
        .copy_from_slice(&[1.0, 2.0, 3.0]);
    assert!(!a.is_device_alloc());

    a.copy(MemcpyKind::HostToDevice).unwrap();
    assert!(a.is_device_alloc());
    assert_eq!(with_space(MemorySpace::Device, || a.to_vec()), vec![1.0, 2.0, 3.0]);
}

#[test]
fn copies_into_unallocated_memory_of_shared_arrays_fail() {
    let mut a = Array1D::<f64>::new();
    a.create_host(&[2]).unwrap();
    let b = a.clone();

    let err = a.copy(MemcpyKind::HostToDevice).unwrap_err();
    assert!(err.to_string().contains("shared by 2 handles"));
    assert!(!a.is_device_alloc());
    assert!(!b.is_device_alloc());
}

#[test]
fn copies_from_unallocated_memory_are_skipped() {
    let mut a = Array1D::<f64>::new();
    a.create_device(&[2]).unwrap();
    let _b = a.clone();
    a.copy(MemcpyKind::HostToDevice).unwrap();
    assert!(!a.is_host_alloc());
    a.copy(MemcpyKind::HostToHost).unwrap();
}

#[test]
fn move_and_free_is_rejected_for_arrays_of_arrays() {
    let mut a = Array1D::<Array1D<f64>>::from_dims(&[1]).unwrap();
    assert!(a.move_to_device(true).is_err());
}

#[test]
fn copy_in_and_copy_out_check_ranges() {
    let mut a = Array1D::<f64>::from_dims(&[4]).unwrap();
    a.copy_in(&[1.0, 2.0], MemcpyKind::HostToHost, 2).unwrap();
    a.copy_in(&[3.0], MemcpyKind::HostToDevice, 0).unwrap();
    assert_eq!(a.to_vec(), vec![0.0, 0.0, 1.0, 2.0]);

    let mut out = [0.0; 1];
    a.copy_out(&mut out, MemcpyKind::DeviceToHost, 0).unwrap();
    assert_eq!(out, [3.0]);

    let err = a.copy_in(&[1.0; 3], MemcpyKind::HostToHost, 2).unwrap_err();
    assert!(err.to_string().contains("elements 2..5"));
    assert!(a.copy_out(&mut [0.0; 5], MemcpyKind::HostToHost, 0).is_err());

    let mut host_only = Array1D::<f64>::new();
    host_only.create_host(&[2]).unwrap();
    let err = host_only
        .copy_in(&[1.0], MemcpyKind::HostToDevice, 0)
        .unwrap_err();
    assert!(err.to_string().contains("not allocated"));
}

#[test]
fn aliased_host_memory_is_not_released() {
    let mut buffer = vec![1.0, 2.0, 3.0];
    let ptr = NonNull::new(buffer.as_mut_ptr()).unwrap();
    {
        let mut a = Array1D::<f64>::new();
        a.init(&[3]).unwrap();
        assert!(a.is_init());
        assert!(!a.is_alloc());

        unsafe { a.alias_host(ptr).unwrap() };
        assert!(a.is_host_alias());
        assert!(!a.is_device_alloc());
        assert_eq!(a.to_vec(), vec![1.0, 2.0, 3.0]);

        a.set(1, 7.0);
        a.copy_to_device().unwrap();
        assert!(!a.is_device_alias());
        assert_eq!(with_space(MemorySpace::Device, || a.get(1)), 7.0);
    }
    assert_eq!(buffer, vec![1.0, 7.0, 3.0]);
}

#[test]
fn aliasing_owned_memory_is_an_error() {
    let mut buffer = vec![0.0; 2];
    let mut a = Array1D::<f64>::from_dims(&[2]).unwrap();
    let result = unsafe { a.alias_host(NonNull::new(buffer.as_mut_ptr()).unwrap()) };
    assert!(result.unwrap_err().to_string().contains("non-aliased"));

    let mut uninit = Array1D::<f64>::new();
    let result = unsafe { uninit.alias_device(NonNull::new(buffer.as_mut_ptr()).unwrap()) };
    assert!(result.unwrap_err().to_string().contains("not initialized"));
}

#[test]
fn nested_arrays_are_reachable_from_the_device() {
    let mut outer = Array1D::<Array1D<f64>>::from_dims(&[2]).unwrap();
    outer.set(0, Array1D::from_slice(&[1.0, 2.0]));
    outer.set(1, Array1D::from_slice(&[3.0]));
    outer.copy_to_device_nested().unwrap();

    let (value, size) = with_space(MemorySpace::Device, || (outer.get_ref(0).get(1), outer.get_ref(1).size()));
    assert_eq!(value, 2.0);
    assert_eq!(size, 1);
    assert_eq!(outer.get_ref(0).use_count(), 1);
}

#[test]
fn atomic_accumulation_from_parallel_work_items() {
    let a = Array1D::<f64>::from_dims(&[3]).unwrap();
    (0..3000usize)
        .into_par_iter()
        .for_each(|k| a.atomic_add(k % 3, 0.5));
    assert_eq!(a.to_vec(), vec![500.0; 3]);
}

#[test]
fn blas_like_operations() {
    let x = Array1D::from_slice(&[1.0, 2.0, 2.0]);
    let y = Array1D::from_slice(&[0.0, 1.0, -1.0]);
    assert_scalar_close!(x.dot(&y), 0.0, abstol = 1e-14);
    assert_scalar_close!(x.norm2(), 3.0, abstol = 1e-14);

    let mut z = Array1D::<f64>::from_dims(&[3]).unwrap();
    z.axpby(2.0, &x, 3.0, &y);
    assert_eq!(z.to_vec(), vec![2.0, 7.0, 1.0]);

    z.scale(0.5);
    assert_eq!(z.to_vec(), vec![1.0, 3.5, 0.5]);
}

#[test]
#[should_panic(expected = "must not share storage")]
fn axpby_rejects_aliased_output() {
    let mut x = Array1D::from_slice(&[1.0, 2.0]);
    let alias = x.clone();
    let y = Array1D::from_slice(&[1.0, 1.0]);
    x.axpby(1.0, &alias, 1.0, &y);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn element_access_is_bounds_checked() {
    let a = Array1D::from_slice(&[1.0]);
    a.get(1);
}

proptest! {
    #[test]
    fn dot_matches_sequential_sum(values in vec(-10.0..10.0f64, 0..64)) {
        let a = Array1D::from_slice(&values);
        let expected: f64 = values.iter().map(|x| x * x).sum();
        prop_assert!((a.dot(&a) - expected).abs() <= 1e-9 * (1.0 + expected));
    }

    #[test]
    fn offsets_translate_every_index(
        rows in 1..5usize,
        cols in 1..5usize,
        d0 in -4..4isize,
        d1 in -4..4isize
    ) {
        let mut a = Array2D::<usize>::from_dims(&[rows, cols]).unwrap();
        for (i, value) in a.as_mut_slice().iter_mut().enumerate() {
            *value = i;
        }
        let before = a.deep_clone().unwrap();
        a.offset(&[d0, d1]).unwrap();

        prop_assert_eq!(a.size(), before.size());
        prop_assert_eq!(a.to_vec(), before.to_vec());
        for i in 0..rows as isize {
            for j in 0..cols as isize {
                prop_assert_eq!(a.at([i + d0, j + d1]), before.at([i, j]));
            }
        }
    }

    #[test]
    fn from_slice_mirrors_values_on_both_sides(values in vec(any::<i64>(), 0..32)) {
        let a = Array1D::from_slice(&values);
        prop_assert_eq!(a.to_vec(), values.clone());
        prop_assert_eq!(with_space(MemorySpace::Device, || a.to_vec()), values);
    }
}

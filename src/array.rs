//! Reference-counted, dual-resident multi-dimensional arrays.
//!
//! A [`HeteroArray`] is a handle to storage that may live in host memory, device memory or
//! both. Handles share storage through a reference-counted record: cloning a handle shares
//! the storage unless the element type requests deep copies, and the storage is released
//! when the last handle is dropped.
use crate::space::{current_space, MemcpyKind, MemorySpace};
use eyre::{bail, ensure, eyre};
use fenris_traits::{AtomicAdd, Real};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

mod element;
mod io;
mod shape;
mod storage;

pub use element::Element;
pub use io::DataIo;
pub use shape::{Layout, Shape};

use storage::{Allocation, Storage};

/// A reference-counted `D`-dimensional array with independent host and device residency.
///
/// Element accessors resolve to the buffer of the current execution space (see
/// [`crate::space`]) and panic if that side is not allocated. Mutation of storage shared by
/// several handles is not synchronized: callers must serialize conflicting writes.
pub struct HeteroArray<T, const D: usize> {
    shape: Shape<D>,
    storage: Option<Arc<Storage<T>>>,
}

pub type Array1D<T> = HeteroArray<T, 1>;
pub type Array2D<T> = HeteroArray<T, 2>;
pub type Array3D<T> = HeteroArray<T, 3>;
pub type Array4D<T> = HeteroArray<T, 4>;

impl<T, const D: usize> Default for HeteroArray<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const D: usize> fmt::Debug for HeteroArray<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeteroArray")
            .field("dims", &self.shape.dims())
            .field("offsets", &self.shape.offsets())
            .field("layout", &self.shape.layout())
            .field("use_count", &self.use_count())
            .field("host", &self.is_host_alloc())
            .field("device", &self.is_device_alloc())
            .finish()
    }
}

impl<T, const D: usize> HeteroArray<T, D> {
    /// An uninitialized row-major array.
    pub fn new() -> Self {
        Self::with_layout(Layout::RowMajor)
    }

    pub fn with_layout(layout: Layout) -> Self {
        Self {
            shape: Shape::empty(layout),
            storage: None,
        }
    }

    pub fn shape(&self) -> &Shape<D> {
        &self.shape
    }

    pub fn layout(&self) -> Layout {
        self.shape.layout()
    }

    /// Whether the array has a shape and a storage record, allocated or not.
    pub fn is_init(&self) -> bool {
        self.storage.is_some()
    }

    pub fn is_alloc(&self) -> bool {
        self.is_host_alloc() || self.is_device_alloc()
    }

    pub fn is_host_alloc(&self) -> bool {
        self.side(MemorySpace::Host).is_some()
    }

    pub fn is_device_alloc(&self) -> bool {
        self.side(MemorySpace::Device).is_some()
    }

    pub fn is_alloc_in(&self, space: MemorySpace) -> bool {
        self.side(space).is_some()
    }

    pub fn is_host_alias(&self) -> bool {
        self.side(MemorySpace::Host).map_or(false, Allocation::is_alias)
    }

    pub fn is_device_alias(&self) -> bool {
        self.side(MemorySpace::Device).map_or(false, Allocation::is_alias)
    }

    pub fn is_offset(&self) -> bool {
        self.shape.is_offset()
    }

    pub fn size(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.size)
    }

    /// The size of dimension `dim`.
    pub fn n(&self, dim: usize) -> usize {
        self.shape.dims()[dim]
    }

    pub fn dims(&self) -> [usize; D] {
        self.shape.dims()
    }

    pub fn stride(&self, dim: usize) -> usize {
        self.shape.strides()[dim]
    }

    pub fn offsets(&self) -> [isize; D] {
        self.shape.offsets()
    }

    /// The number of handles sharing this array's storage, or zero if uninitialized.
    pub fn use_count(&self) -> usize {
        self.storage.as_ref().map_or(0, Arc::strong_count)
    }

    /// Whether both handles refer to the same storage record.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn host_data(&self) -> Option<NonNull<T>> {
        self.side_ptr(MemorySpace::Host).and_then(NonNull::new)
    }

    pub fn device_data(&self) -> Option<NonNull<T>> {
        self.side_ptr(MemorySpace::Device).and_then(NonNull::new)
    }

    fn side(&self, space: MemorySpace) -> Option<&Allocation<T>> {
        self.storage.as_ref().and_then(|storage| storage.side(space))
    }

    fn side_ptr(&self, space: MemorySpace) -> Option<*mut T> {
        self.side(space).map(Allocation::ptr)
    }

    /// Pointer to the buffer in `space`, which must be allocated.
    #[inline]
    pub(crate) fn ptr_in(&self, space: MemorySpace) -> *mut T {
        match self.side_ptr(space) {
            Some(ptr) => ptr,
            None => panic!("HeteroArray: {:?} memory accessed but not allocated", space),
        }
    }

    #[inline]
    pub(crate) fn current_ptr(&self) -> *mut T {
        self.ptr_in(current_space())
    }

    /// Maps a (possibly offset) multi-index to a linear index.
    #[inline]
    pub fn index_of(&self, index: [isize; D]) -> usize {
        self.shape.linear_index(index)
    }

    #[inline]
    pub fn get_ref(&self, i: usize) -> &T {
        assert!(i < self.size(), "HeteroArray: index {} out of bounds (size {})", i, self.size());
        unsafe { &*self.current_ptr().add(i) }
    }

    #[inline]
    pub fn at_ref(&self, index: [isize; D]) -> &T {
        self.get_ref(self.index_of(index))
    }

    /// The elements in the memory space of the current execution context.
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            None => &[],
            Some(storage) => unsafe { std::slice::from_raw_parts(self.current_ptr(), storage.size) },
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &self.storage {
            None => &mut [],
            Some(storage) => unsafe { std::slice::from_raw_parts_mut(self.current_ptr(), storage.size) },
        }
    }

    pub fn host_slice(&self) -> Option<&[T]> {
        let size = self.size();
        self.side_ptr(MemorySpace::Host)
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr, size) })
    }

    pub fn host_slice_mut(&mut self) -> Option<&mut [T]> {
        let size = self.size();
        self.side_ptr(MemorySpace::Host)
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr, size) })
    }

    /// Writes `value` at linear index `i` of the current memory space without dropping the
    /// previous element.
    ///
    /// # Safety
    ///
    /// No other thread may access element `i` concurrently. Parallel work-items must write
    /// disjoint indices.
    #[inline]
    pub unsafe fn write(&self, i: usize, value: T) {
        assert!(i < self.size(), "HeteroArray: index {} out of bounds (size {})", i, self.size());
        self.current_ptr().add(i).write(value);
    }

    /// Atomically adds `value` to element `i` of the current memory space.
    #[inline]
    pub fn atomic_add(&self, i: usize, value: T)
    where
        T: AtomicAdd,
    {
        assert!(i < self.size(), "HeteroArray: index {} out of bounds (size {})", i, self.size());
        unsafe { T::atomic_add(self.current_ptr().add(i), value) }
    }

    /// Drops this handle's reference to the storage.
    pub fn destroy(&mut self) {
        self.storage = None;
        self.shape = Shape::empty(self.shape.layout());
    }

    /// Makes this handle share `other`'s storage and shape.
    pub fn shallow_copy(&mut self, other: &Self) {
        self.shape = other.shape;
        self.storage = other.storage.clone();
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            shape: self.shape,
            storage: self.storage.clone(),
        }
    }

    /// Exchanges the storage of two handles through a temporary handle.
    pub fn swap(&mut self, other: &mut Self) {
        let mut temporary = Self::with_layout(self.layout());
        temporary.shallow_copy(self);
        self.shallow_copy(other);
        other.shallow_copy(&temporary);
    }

    /// Shifts the addressing origin of the leading dimensions.
    ///
    /// After `offset(d)`, the element formerly addressed by `i` is addressed by `i + d`.
    pub fn offset(&mut self, offsets: &[isize]) -> eyre::Result<()> {
        if offsets.len() > D {
            bail!(
                "HeteroArray: the number of offsets provided ({}) is larger than the array dimension ({})",
                offsets.len(),
                D
            );
        }
        let mut all = [0; D];
        all[..offsets.len()].copy_from_slice(offsets);
        self.shape.set_offsets(all);
        Ok(())
    }

    /// Binds an externally owned host buffer of `size()` elements.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size()` elements for as long as any handle
    /// refers to this storage.
    pub unsafe fn alias_host(&mut self, ptr: NonNull<T>) -> eyre::Result<()> {
        self.alias(MemorySpace::Host, ptr)
    }

    /// Binds an externally owned device buffer of `size()` elements.
    ///
    /// # Safety
    ///
    /// Same requirements as [`alias_host`](Self::alias_host).
    pub unsafe fn alias_device(&mut self, ptr: NonNull<T>) -> eyre::Result<()> {
        self.alias(MemorySpace::Device, ptr)
    }

    unsafe fn alias(&mut self, space: MemorySpace, ptr: NonNull<T>) -> eyre::Result<()> {
        let count = self.use_count();
        let storage = self.storage.as_mut().ok_or_else(|| {
            eyre!(
                "HeteroArray: cannot alias {:?} memory because the array was not initialized",
                space
            )
        })?;
        if let Some(existing) = storage.side(space) {
            if !existing.is_alias() {
                bail!(
                    "HeteroArray: cannot alias {:?} memory because the array already owns non-aliased {:?} memory",
                    space,
                    space
                );
            }
        }
        let unique = Arc::get_mut(storage).ok_or_else(|| {
            eyre!(
                "HeteroArray: cannot alias {:?} memory because the array is shared by {} handles",
                space,
                count
            )
        })?;
        let size = unique.size;
        *unique.side_mut(space) = Some(Allocation::alias(space, ptr, size));
        Ok(())
    }
}

impl<T: Element, const D: usize> HeteroArray<T, D> {
    /// Creates an array allocated on both host and device.
    pub fn from_dims(dims: &[usize]) -> eyre::Result<Self> {
        let mut array = Self::new();
        array.create(dims)?;
        Ok(array)
    }

    /// Allocates host and device memory for the given dimensions, releasing this handle's
    /// previous storage. Elements are default-initialized.
    pub fn create(&mut self, dims: &[usize]) -> eyre::Result<()> {
        self.create_internal(dims, true, true)
    }

    pub fn create_host(&mut self, dims: &[usize]) -> eyre::Result<()> {
        self.create_internal(dims, true, false)
    }

    pub fn create_device(&mut self, dims: &[usize]) -> eyre::Result<()> {
        self.create_internal(dims, false, true)
    }

    /// Sets the shape without allocating memory, which is required before aliasing.
    pub fn init(&mut self, dims: &[usize]) -> eyre::Result<()> {
        self.create_internal(dims, false, false)
    }

    fn create_internal(&mut self, dims: &[usize], host: bool, device: bool) -> eyre::Result<()> {
        let shape = Shape::from_dims(dims, self.shape.layout())?;
        self.install(shape, host, device);
        Ok(())
    }

    fn install(&mut self, shape: Shape<D>, host: bool, device: bool) {
        let size = shape.size();
        let storage = Storage {
            size,
            host: host.then(|| Allocation::allocate(MemorySpace::Host, size)),
            device: device.then(|| Allocation::allocate(MemorySpace::Device, size)),
        };
        self.shape = shape;
        self.storage = Some(Arc::new(storage));
    }

    #[inline]
    pub fn get(&self, i: usize) -> T {
        self.get_ref(i).clone()
    }

    #[inline]
    pub fn at(&self, index: [isize; D]) -> T {
        self.at_ref(index).clone()
    }

    /// Stores `value` at linear index `i` of the current memory space.
    pub fn set(&mut self, i: usize, value: T) {
        let space = current_space();
        assert!(i < self.size(), "HeteroArray: index {} out of bounds (size {})", i, self.size());
        unsafe { self.store_in(space, i, value) }
    }

    pub fn set_at(&mut self, index: [isize; D], value: T) {
        let i = self.index_of(index);
        self.set(i, value)
    }

    /// Host elements are assigned (dropping the previous value). Device elements are bitwise
    /// images and are overwritten without running destructors.
    unsafe fn store_in(&self, space: MemorySpace, i: usize, value: T) {
        let ptr = self.ptr_in(space).add(i);
        match space {
            MemorySpace::Host => *ptr = value,
            MemorySpace::Device => ptr.write(value),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }

    /// Assigns `value` to every element on every allocated side.
    pub fn fill(&mut self, value: T) {
        for space in [MemorySpace::Host, MemorySpace::Device] {
            if self.is_alloc_in(space) {
                for i in 0..self.size() {
                    unsafe { self.store_in(space, i, value.clone()) };
                }
            }
        }
    }

    /// Synchronizes the device side with the host side.
    ///
    /// Does nothing if the host side is unallocated. An unallocated device side is allocated
    /// if this is the only handle, and is an error otherwise, since the other handles would
    /// not observe the new allocation.
    pub fn copy_to_device(&mut self) -> eyre::Result<()> {
        self.synchronize(MemorySpace::Host, MemorySpace::Device)
    }

    /// Synchronizes the host side with the device side. See [`copy_to_device`](Self::copy_to_device).
    pub fn copy_to_host(&mut self) -> eyre::Result<()> {
        self.synchronize(MemorySpace::Device, MemorySpace::Host)
    }

    /// Copies the whole array in the given direction. Same-space directions are no-ops.
    pub fn copy(&mut self, kind: MemcpyKind) -> eyre::Result<()> {
        match kind {
            MemcpyKind::HostToDevice => self.copy_to_device(),
            MemcpyKind::DeviceToHost => self.copy_to_host(),
            MemcpyKind::HostToHost | MemcpyKind::DeviceToDevice => Ok(()),
        }
    }

    fn synchronize(&mut self, source: MemorySpace, target: MemorySpace) -> eyre::Result<()> {
        let count = self.use_count();
        let Some(storage) = self.storage.as_mut() else {
            return Ok(());
        };
        let Some(source_ptr) = storage.side(source).map(Allocation::ptr) else {
            return Ok(());
        };
        let target_ptr = match storage.side(target).map(Allocation::ptr) {
            Some(ptr) => ptr,
            None => {
                let unique = Arc::get_mut(storage).ok_or_else(|| {
                    eyre!(
                        "HeteroArray: cannot copy from {:?} to {:?} because {:?} memory was not allocated \
                         and the array is shared by {} handles",
                        source,
                        target,
                        target,
                        count
                    )
                })?;
                let allocation = Allocation::allocate(target, unique.size);
                let ptr = allocation.ptr();
                *unique.side_mut(target) = Some(allocation);
                ptr
            }
        };
        if source_ptr != target_ptr {
            // Aliased buffers supplied by the caller may overlap
            unsafe { ptr::copy(source_ptr, target_ptr, storage.size) };
        }
        Ok(())
    }

    /// Copies the device side from the host side and optionally releases host memory.
    pub fn move_to_device(&mut self, free_host: bool) -> eyre::Result<()> {
        self.move_between(MemorySpace::Host, MemorySpace::Device, free_host)
    }

    /// Copies the host side from the device side and optionally releases device memory.
    pub fn move_to_host(&mut self, free_device: bool) -> eyre::Result<()> {
        self.move_between(MemorySpace::Device, MemorySpace::Host, free_device)
    }

    fn move_between(&mut self, source: MemorySpace, target: MemorySpace, free_source: bool) -> eyre::Result<()> {
        if free_source {
            ensure!(
                !T::IS_ARRAY,
                "HeteroArray: cannot free {:?} memory of an array of arrays, which owns the nested arrays",
                source
            );
            ensure!(
                self.use_count() <= 1,
                "HeteroArray: cannot move to {:?} and free {:?} memory because the array is shared by {} handles",
                target,
                source,
                self.use_count()
            );
        }
        self.synchronize(source, target)?;
        if free_source {
            if let Some(storage) = self.storage.as_mut().and_then(Arc::get_mut) {
                *storage.side_mut(source) = None;
            }
        }
        Ok(())
    }

    fn check_copy_range(&self, operation: &str, n: usize, offset: usize) -> eyre::Result<()> {
        let size = self.size();
        ensure!(
            n <= size,
            "HeteroArray: cannot {} {} elements because the array size is {}",
            operation,
            n,
            size
        );
        ensure!(
            offset <= size,
            "HeteroArray: cannot {} with offset {} because the array size is {}",
            operation,
            offset,
            size
        );
        ensure!(
            offset + n <= size,
            "HeteroArray: cannot {} elements {}..{} because the array size is {}",
            operation,
            offset,
            offset + n,
            size
        );
        Ok(())
    }

    /// Copies `source` into the array side selected by `kind.target()`, starting at `offset`.
    ///
    /// Fails if the range does not fit or the target side is unallocated.
    pub fn copy_in(&mut self, source: &[T], kind: MemcpyKind, offset: usize) -> eyre::Result<()> {
        self.check_copy_range("copy in", source.len(), offset)?;
        let target = kind.target();
        ensure!(
            self.is_alloc_in(target),
            "HeteroArray: cannot copy in to {:?} memory because it is not allocated",
            target
        );
        for (k, value) in source.iter().enumerate() {
            unsafe { self.store_in(target, offset + k, value.clone()) };
        }
        Ok(())
    }

    /// Copies elements from the array side selected by `kind.source()`, starting at `offset`,
    /// into `target`.
    ///
    /// Fails if the range does not fit or the source side is unallocated.
    pub fn copy_out(&self, target: &mut [T], kind: MemcpyKind, offset: usize) -> eyre::Result<()> {
        self.check_copy_range("copy out", target.len(), offset)?;
        let source = kind.source();
        ensure!(
            self.is_alloc_in(source),
            "HeteroArray: cannot copy out from {:?} memory because it is not allocated",
            source
        );
        let ptr = self.ptr_in(source);
        for (k, value) in target.iter_mut().enumerate() {
            *value = unsafe { &*ptr.add(offset + k) }.clone();
        }
        Ok(())
    }

    /// Copies nested arrays to the device before copying this array.
    pub fn copy_to_device_nested(&mut self) -> eyre::Result<()> {
        if let Some(elements) = self.host_slice_mut() {
            for element in elements {
                element.copy_to_device_nested()?;
            }
        }
        self.copy_to_device()
    }

    /// Makes this handle an independent duplicate of `source`.
    ///
    /// Elements requesting deep copies are cloned on the host and mirrored to the device,
    /// which requires `source` to have host data. Other elements are cloned on the host and
    /// copied bitwise on the device.
    pub fn deep_copy(&mut self, source: &Self) -> eyre::Result<()> {
        let Some(source_storage) = source.storage.as_ref() else {
            self.destroy();
            return Ok(());
        };
        let (host, device) = (source_storage.host.is_some(), source_storage.device.is_some());
        if T::DEEP_COPY && device && !host {
            bail!("HeteroArray: cannot deep copy an array of deep-copied elements without host data");
        }

        let mut copy = Self::with_layout(source.layout());
        copy.install(source.shape, host, device);

        if let (Some(from), Some(to)) = (source.host_slice(), copy.host_slice_mut()) {
            to.clone_from_slice(from);
        }
        if device {
            if T::DEEP_COPY {
                copy.copy_to_device()?;
            } else {
                let size = source_storage.size;
                unsafe {
                    ptr::copy_nonoverlapping(
                        source.ptr_in(MemorySpace::Device),
                        copy.ptr_in(MemorySpace::Device),
                        size,
                    )
                };
            }
        }

        *self = copy;
        Ok(())
    }

    pub fn deep_clone(&self) -> eyre::Result<Self> {
        let mut copy = Self::with_layout(self.layout());
        copy.deep_copy(self)?;
        Ok(copy)
    }
}

impl<T: Element, const D: usize> Clone for HeteroArray<T, D> {
    /// Shares the storage, or deep-copies it if `T::DEEP_COPY` holds.
    ///
    /// # Panics
    ///
    /// Panics if a deep copy is required and the array has device data but no host data.
    fn clone(&self) -> Self {
        if T::DEEP_COPY {
            self.deep_clone().unwrap_or_else(|err| panic!("{}", err))
        } else {
            self.shallow_clone()
        }
    }
}

impl<T: Element, const D: usize> Element for HeteroArray<T, D> {
    const DEEP_COPY: bool = T::DEEP_COPY;
    const IS_ARRAY: bool = true;

    fn copy_to_device_nested(&mut self) -> eyre::Result<()> {
        HeteroArray::copy_to_device_nested(self)
    }
}

impl<T: Element> HeteroArray<T, 1> {
    /// A host- and device-resident vector holding `values`.
    pub fn from_slice(values: &[T]) -> Self {
        let mut array = Self::new();
        array.assign(values);
        array
    }

    /// A vector holding the elements of `set` in order.
    pub fn from_set(set: &BTreeSet<T>) -> Self
    where
        T: Ord,
    {
        let values: Vec<T> = set.iter().cloned().collect();
        Self::from_slice(&values)
    }

    /// Replaces this handle's storage with a host- and device-resident copy of `values`.
    pub fn assign(&mut self, values: &[T]) {
        self.install(Shape::vector(values.len(), self.layout()), true, true);
        let host = self.ptr_in(MemorySpace::Host);
        for (i, value) in values.iter().enumerate() {
            unsafe { *host.add(i) = value.clone() };
        }
        unsafe { ptr::copy_nonoverlapping(host, self.ptr_in(MemorySpace::Device), values.len()) };
    }
}

impl<T: Element + Real> HeteroArray<T, 1> {
    pub fn dot(&self, other: &Self) -> T {
        assert_eq!(self.size(), other.size(), "HeteroArray: dot product of vectors of different sizes");
        self.as_slice()
            .par_iter()
            .zip(other.as_slice().par_iter())
            .map(|(&a, &b)| a * b)
            .reduce(T::zero, |a, b| a + b)
    }

    pub fn norm2(&self) -> T {
        self.dot(self).sqrt()
    }

    pub fn scale(&mut self, alpha: T) {
        self.as_mut_slice()
            .par_iter_mut()
            .for_each(|value| *value = *value * alpha);
    }

    /// Computes `self = a * x + b * y`.
    pub fn axpby(&mut self, a: T, x: &Self, b: T, y: &Self) {
        assert_eq!(self.size(), x.size(), "HeteroArray: axpby of vectors of different sizes");
        assert_eq!(self.size(), y.size(), "HeteroArray: axpby of vectors of different sizes");
        assert!(
            !self.shares_storage_with(x) && !self.shares_storage_with(y),
            "HeteroArray: axpby output must not share storage with its inputs"
        );
        let (x, y) = (x.as_slice(), y.as_slice());
        self.as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, value)| *value = a * x[i] + b * y[i]);
    }
}

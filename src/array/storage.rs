use crate::space::MemorySpace;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Ownership {
    Owned,
    Alias,
}

/// A single buffer in either memory space.
///
/// Owned host buffers drop their elements when released. Owned device buffers hold bitwise
/// images of elements and are released without running destructors. Aliased buffers are
/// never released.
#[derive(Debug)]
pub(crate) struct Allocation<T> {
    ptr: NonNull<T>,
    len: usize,
    space: MemorySpace,
    ownership: Ownership,
}

unsafe impl<T: Send + Sync> Send for Allocation<T> {}
unsafe impl<T: Send + Sync> Sync for Allocation<T> {}

impl<T: Default> Allocation<T> {
    pub fn allocate(space: MemorySpace, len: usize) -> Self {
        let buffer: Box<[T]> = (0..len).map(|_| T::default()).collect();
        let ptr = NonNull::new(Box::into_raw(buffer).cast::<T>()).unwrap_or(NonNull::dangling());
        Self {
            ptr,
            len,
            space,
            ownership: Ownership::Owned,
        }
    }
}

impl<T> Allocation<T> {
    pub fn alias(space: MemorySpace, ptr: NonNull<T>, len: usize) -> Self {
        Self {
            ptr,
            len,
            space,
            ownership: Ownership::Alias,
        }
    }

    pub fn ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn is_alias(&self) -> bool {
        self.ownership == Ownership::Alias
    }
}

impl<T> Drop for Allocation<T> {
    fn drop(&mut self) {
        if self.ownership == Ownership::Alias {
            return;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        unsafe {
            match self.space {
                MemorySpace::Host => drop(Box::from_raw(slice)),
                MemorySpace::Device => drop(Box::from_raw(slice as *mut [MaybeUninit<T>])),
            }
        }
    }
}

/// The storage record shared by all handles of an array.
#[derive(Debug)]
pub(crate) struct Storage<T> {
    pub size: usize,
    pub host: Option<Allocation<T>>,
    pub device: Option<Allocation<T>>,
}

impl<T> Storage<T> {
    pub fn side(&self, space: MemorySpace) -> Option<&Allocation<T>> {
        match space {
            MemorySpace::Host => self.host.as_ref(),
            MemorySpace::Device => self.device.as_ref(),
        }
    }

    pub fn side_mut(&mut self, space: MemorySpace) -> &mut Option<Allocation<T>> {
        match space {
            MemorySpace::Host => &mut self.host,
            MemorySpace::Device => &mut self.device,
        }
    }
}

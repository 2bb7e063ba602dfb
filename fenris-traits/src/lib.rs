use nalgebra::RealField;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Scalars that can be accumulated concurrently through a raw pointer.
///
/// Parallel assembly adds contributions from many work-items into the same storage location
/// without coloring, so every scalar that takes part in accumulation must provide a lock-free
/// addition.
pub trait AtomicAdd: Copy + Send + Sync + 'static {
    /// Atomically adds `value` to the scalar pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes, and aligned to the alignment of the atomic
    /// counterpart of `Self`. Concurrent non-atomic access to the same location is a data race.
    unsafe fn atomic_add(ptr: *mut Self, value: Self);
}

macro_rules! impl_atomic_add_integer {
    ($($t:ty => $atomic:ty),*) => {
        $(
            impl AtomicAdd for $t {
                unsafe fn atomic_add(ptr: *mut Self, value: Self) {
                    <$atomic>::from_ptr(ptr).fetch_add(value, Ordering::Relaxed);
                }
            }
        )*
    };
}

impl_atomic_add_integer!(u32 => AtomicU32, u64 => AtomicU64, i32 => AtomicI32, i64 => AtomicI64, usize => AtomicUsize);

impl AtomicAdd for f64 {
    unsafe fn atomic_add(ptr: *mut Self, value: Self) {
        let atomic = AtomicU64::from_ptr(ptr.cast::<u64>());
        let mut current = atomic.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + value).to_bits();
            match atomic.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl AtomicAdd for f32 {
    unsafe fn atomic_add(ptr: *mut Self, value: Self) {
        let atomic = AtomicU32::from_ptr(ptr.cast::<u32>());
        let mut current = atomic.load(Ordering::Relaxed);
        loop {
            let updated = (f32::from_bits(current) + value).to_bits();
            match atomic.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

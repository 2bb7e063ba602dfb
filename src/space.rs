//! Memory spaces, copy directions and the per-thread execution context.
//!
//! The accelerator is modelled as a second memory space: device buffers are separate
//! allocations that are only reachable through the device pointer of an array. Work-items that
//! run "on the device" are executed with the device execution context entered on their thread,
//! and every element access resolves to the buffer of the current context.
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{self, Ordering};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    Host,
    Device,
}

impl Default for MemorySpace {
    fn default() -> Self {
        Self::Host
    }
}

/// Direction of a memory copy, named as `source` to `target`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemcpyKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl MemcpyKind {
    pub fn new(source: MemorySpace, target: MemorySpace) -> Self {
        use MemorySpace::*;
        match (source, target) {
            (Host, Host) => Self::HostToHost,
            (Host, Device) => Self::HostToDevice,
            (Device, Host) => Self::DeviceToHost,
            (Device, Device) => Self::DeviceToDevice,
        }
    }

    pub fn source(&self) -> MemorySpace {
        match self {
            Self::HostToHost | Self::HostToDevice => MemorySpace::Host,
            Self::DeviceToHost | Self::DeviceToDevice => MemorySpace::Device,
        }
    }

    pub fn target(&self) -> MemorySpace {
        match self {
            Self::HostToHost | Self::DeviceToHost => MemorySpace::Host,
            Self::HostToDevice | Self::DeviceToDevice => MemorySpace::Device,
        }
    }
}

thread_local! {
    static CURRENT_SPACE: Cell<MemorySpace> = Cell::new(MemorySpace::Host);
}

/// The memory space that element accesses on this thread resolve to.
pub fn current_space() -> MemorySpace {
    CURRENT_SPACE.with(|space| space.get())
}

/// Enters an execution space on the current thread for the lifetime of the guard.
///
/// Guards nest: dropping a guard restores whatever space was current when it was created.
#[derive(Debug)]
pub struct SpaceGuard {
    previous: MemorySpace,
}

impl SpaceGuard {
    pub fn enter(space: MemorySpace) -> Self {
        let previous = CURRENT_SPACE.with(|current| current.replace(space));
        Self { previous }
    }
}

impl Drop for SpaceGuard {
    fn drop(&mut self) {
        CURRENT_SPACE.with(|current| current.set(self.previous));
    }
}

/// Runs `f` with `space` as the current execution space.
pub fn with_space<R>(space: MemorySpace, f: impl FnOnce() -> R) -> R {
    let _guard = SpaceGuard::enter(space);
    f()
}

/// Barrier after which all writes of a completed parallel region are visible to the caller.
pub fn fence() {
    atomic::fence(Ordering::SeqCst);
}

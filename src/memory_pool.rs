//! Scratch memory for variable-sized temporaries inside parallel regions.
//!
//! A [`MemoryPool`] partitions one array into a fixed number of independent arenas ("ways").
//! Work-items pick an arena by `index % ways`, so concurrent work-items mostly contend on
//! different locks. Allocations are returned as [`Chunk`]s which release their block when
//! dropped, including during unwinding.
use crate::array::{Array1D, Element};
use crate::space::MemorySpace;
use eyre::ensure;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut, Range};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPoolConfig {
    /// Number of independent arenas.
    pub ways: usize,
    /// Number of elements available in each arena.
    pub way_capacity: usize,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self {
            ways: 64,
            way_capacity: 1024,
        }
    }
}

/// First-fit allocator over the offsets `0..capacity` of one way.
#[derive(Debug)]
struct Arena {
    // Sorted, non-adjacent free blocks
    free: Vec<Range<usize>>,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        let free = if capacity > 0 { vec![0..capacity] } else { Vec::new() };
        Self { free }
    }

    fn allocate(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return Some(0);
        }
        let position = self.free.iter().position(|block| block.len() >= len)?;
        let block = &mut self.free[position];
        let offset = block.start;
        block.start += len;
        if block.is_empty() {
            self.free.remove(position);
        }
        Some(offset)
    }

    fn release(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let position = self.free.partition_point(|block| block.start < offset);
        self.free.insert(position, offset..offset + len);

        if position + 1 < self.free.len() && self.free[position].end == self.free[position + 1].start {
            let next = self.free.remove(position + 1);
            self.free[position].end = next.end;
        }
        if position > 0 && self.free[position - 1].end == self.free[position].start {
            let current = self.free.remove(position);
            self.free[position - 1].end = current.end;
        }
    }

    fn available(&self) -> usize {
        self.free.iter().map(Range::len).sum()
    }

    fn largest_block(&self) -> usize {
        self.free.iter().map(Range::len).max().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct MemoryPool<T> {
    buffer: Array1D<T>,
    way_capacity: usize,
    ways: Vec<Mutex<Arena>>,
}

impl<T: Element> MemoryPool<T> {
    pub fn new(config: MemoryPoolConfig) -> eyre::Result<Self> {
        ensure!(config.ways > 0, "MemoryPool: the number of ways must be positive");
        let total = config
            .ways
            .checked_mul(config.way_capacity)
            .ok_or_else(|| eyre::eyre!("MemoryPool: total capacity overflows"))?;

        let mut buffer = Array1D::new();
        buffer.create(&[total])?;
        debug!(
            "created memory pool with {} ways of {} elements",
            config.ways, config.way_capacity
        );

        Ok(Self {
            buffer,
            way_capacity: config.way_capacity,
            ways: (0..config.ways)
                .map(|_| Mutex::new(Arena::new(config.way_capacity)))
                .collect(),
        })
    }

    pub fn ways(&self) -> usize {
        self.ways.len()
    }

    pub fn way_capacity(&self) -> usize {
        self.way_capacity
    }

    /// The way used by a work-item with the given index.
    pub fn way_of(&self, index: usize) -> usize {
        index % self.ways.len()
    }

    /// Number of free elements in `way`.
    pub fn available(&self, way: usize) -> usize {
        self.ways[way].lock().available()
    }

    /// Allocates `len` elements in the way selected by `index`.
    ///
    /// Returns `None` if the way has no free block of sufficient length.
    pub fn try_allocate(&self, index: usize, len: usize) -> Option<Chunk<'_, T>> {
        let way = self.way_of(index);
        let offset = self.ways[way].lock().allocate(len)?;
        Some(Chunk {
            pool: self,
            way,
            offset,
            len,
        })
    }

    /// Allocates `len` elements in the way selected by `index`.
    ///
    /// # Panics
    ///
    /// Panics if the way is exhausted.
    pub fn allocate(&self, index: usize, len: usize) -> Chunk<'_, T> {
        match self.try_allocate(index, len) {
            Some(chunk) => chunk,
            None => {
                let way = self.way_of(index);
                panic!(
                    "MemoryPool: cannot allocate {} elements in way {} (largest free block is {})",
                    len,
                    way,
                    self.ways[way].lock().largest_block()
                )
            }
        }
    }

    fn release(&self, way: usize, offset: usize, len: usize) {
        self.ways[way].lock().release(offset, len);
    }
}

/// A scope-bound block of pool memory in the current memory space.
///
/// Contents are left over from previous users and are not reset on allocation.
#[derive(Debug)]
pub struct Chunk<'pool, T: Element> {
    pool: &'pool MemoryPool<T>,
    way: usize,
    offset: usize,
    len: usize,
}

impl<'pool, T: Element> Chunk<'pool, T> {
    pub fn way(&self) -> usize {
        self.way
    }

    /// Position of the block in the pool buffer.
    pub fn start(&self) -> usize {
        self.way * self.pool.way_capacity + self.offset
    }

    fn data(&self, space: MemorySpace) -> *mut T {
        unsafe { self.pool.buffer.ptr_in(space).add(self.start()) }
    }
}

impl<'pool, T: Element> Deref for Chunk<'pool, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // The block is exclusively owned by this chunk until it is dropped
        unsafe { std::slice::from_raw_parts(self.data(crate::space::current_space()), self.len) }
    }
}

impl<'pool, T: Element> DerefMut for Chunk<'pool, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data(crate::space::current_space()), self.len) }
    }
}

impl<'pool, T: Element> Drop for Chunk<'pool, T> {
    fn drop(&mut self) {
        self.pool.release(self.way, self.offset, self.len);
    }
}

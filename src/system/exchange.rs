//! Halo exchange between processes sharing dofs.
//!
//! Every neighbor pairing has an owner side (entries this process owns and the neighbor
//! ghosts) and a ghost side (entries the neighbor owns). Forward exchange copies owner values
//! into ghost entries. Reverse exchange adds ghost values into the owner entries. Staging
//! buffers live in the execution space of the dispatcher and pass through host memory when
//! the transport cannot access device buffers.
use crate::array::Array1D;
use crate::comm::{decode_f64s, decode_u64s, encode_f64s, encode_u64s, Communicator};
use crate::dispatch::{Dispatcher, Functor, PackLoop, UnpackLoop};
use crate::space::{MemcpyKind, MemorySpace};
use crate::system::dofs::DofTables;
use eyre::{ensure, eyre};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

#[derive(Debug)]
struct Neighbor {
    rank: usize,
    owned: Array1D<usize>,
    ghosts: Array1D<usize>,
    owned_offset: usize,
    ghost_offset: usize,
}

impl Neighbor {
    /// Index list and buffer offset of the owner side or the ghost side.
    fn side(&self, owner: bool) -> (&Array1D<usize>, usize) {
        if owner {
            (&self.owned, self.owned_offset)
        } else {
            (&self.ghosts, self.ghost_offset)
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Unpack {
    Assign,
    Add,
}

/// A contiguous exchange buffer.
#[derive(Debug)]
struct StagingBuffer {
    values: Array1D<f64>,
}

struct Gather<'a> {
    source: &'a Array1D<f64>,
    indices: &'a Array1D<usize>,
    buffer: &'a Array1D<f64>,
    offset: usize,
}

impl Functor<PackLoop> for Gather<'_> {
    fn call(&self, _: PackLoop, k: usize) {
        let value = self.source.get(self.indices.get(k));
        // Each k owns buffer slot offset + k
        unsafe { self.buffer.write(self.offset + k, value) };
    }
}

struct Scatter<'a> {
    target: &'a Array1D<f64>,
    indices: &'a Array1D<usize>,
    buffer: &'a Array1D<f64>,
    offset: usize,
    mode: Unpack,
}

impl Functor<UnpackLoop> for Scatter<'_> {
    fn call(&self, _: UnpackLoop, k: usize) {
        let value = self.buffer.get(self.offset + k);
        let index = self.indices.get(k);
        match self.mode {
            // Indices within one neighbor list are distinct
            Unpack::Assign => unsafe { self.target.write(index, value) },
            Unpack::Add => self.target.atomic_add(index, value),
        }
    }
}

impl StagingBuffer {
    fn new(len: usize) -> eyre::Result<Self> {
        Ok(Self {
            values: Array1D::from_dims(&[len])?,
        })
    }

    fn pack(&self, source: &Array1D<f64>, indices: &Array1D<usize>, offset: usize, dispatcher: &Dispatcher) {
        if indices.size() == 0 {
            return;
        }
        let gather = Gather {
            source,
            indices,
            buffer: &self.values,
            offset,
        };
        dispatcher.parallel_for::<PackLoop, _>(&gather, indices.size());
    }

    fn unpack(
        &self,
        target: &Array1D<f64>,
        indices: &Array1D<usize>,
        offset: usize,
        mode: Unpack,
        dispatcher: &Dispatcher,
    ) {
        if indices.size() == 0 {
            return;
        }
        let scatter = Scatter {
            target,
            indices,
            buffer: &self.values,
            offset,
            mode,
        };
        dispatcher.parallel_for::<UnpackLoop, _>(&scatter, indices.size());
    }

    /// Reads `len` values at `offset` from the side in `space`.
    fn read(&mut self, space: MemorySpace, offset: usize, len: usize, direct: bool) -> eyre::Result<Vec<u8>> {
        let side = if space == MemorySpace::Device && !direct {
            debug!("staging {} values through host memory for sending", len);
            self.values.copy_to_host()?;
            MemorySpace::Host
        } else {
            space
        };
        let mut values = vec![0.0; len];
        self.values
            .copy_out(&mut values, MemcpyKind::new(side, MemorySpace::Host), offset)?;
        Ok(encode_f64s(&values))
    }

    /// Writes received values at `offset` into the side in `space`.
    fn write(&mut self, space: MemorySpace, offset: usize, bytes: &[u8], direct: bool) -> eyre::Result<()> {
        let values = decode_f64s(bytes)?;
        if space == MemorySpace::Device && !direct {
            debug!("staging {} received values through host memory", values.len());
            self.values.copy_in(&values, MemcpyKind::HostToHost, offset)?;
        }
        self.values
            .copy_in(&values, MemcpyKind::new(MemorySpace::Host, space), offset)
    }
}

/// Communication plan between this process and the processes it shares entries with.
#[derive(Debug)]
pub struct HaloExchange {
    neighbors: Vec<Neighbor>,
    owned_buffer: StagingBuffer,
    ghost_buffer: StagingBuffer,
}

impl HaloExchange {
    /// A plan without neighbors.
    pub fn empty() -> eyre::Result<Self> {
        Self::from_neighbor_lists(Vec::new())
    }

    /// Builds a plan from `(rank, owned indices, ghost indices)` per neighbor, in ascending
    /// rank order. Neighbors with two empty lists are dropped.
    pub fn from_neighbor_lists(lists: Vec<(usize, Vec<usize>, Vec<usize>)>) -> eyre::Result<Self> {
        let mut neighbors = Vec::with_capacity(lists.len());
        let (mut owned_total, mut ghost_total) = (0, 0);
        for (rank, owned, ghosts) in lists {
            if owned.is_empty() && ghosts.is_empty() {
                continue;
            }
            neighbors.push(Neighbor {
                rank,
                owned_offset: owned_total,
                ghost_offset: ghost_total,
                owned: Array1D::from_slice(&owned),
                ghosts: Array1D::from_slice(&ghosts),
            });
            owned_total += owned.len();
            ghost_total += ghosts.len();
        }
        Ok(Self {
            neighbors,
            owned_buffer: StagingBuffer::new(owned_total)?,
            ghost_buffer: StagingBuffer::new(ghost_total)?,
        })
    }

    /// Builds the dof exchange plan by telling every owner which of its dofs are ghosted here.
    pub fn for_dofs(dofs: &DofTables, comm: &dyn Communicator) -> eyre::Result<Self> {
        let (rank, size) = (comm.rank(), comm.size());
        let n_local = dofs.num_local_dofs();

        let mut requested: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for ghost in 0..dofs.num_ghost_dofs() {
            let owner = dofs.ghost_owner(ghost);
            ensure!(
                owner < size && owner != rank,
                "HaloExchange: ghost dof {} has invalid owner {} on rank {} of {}",
                n_local + ghost,
                owner,
                rank,
                size
            );
            requested.entry(owner).or_default().push(n_local + ghost);
        }

        for other in (0..size).filter(|&r| r != rank) {
            let globals: Vec<u64> = requested
                .get(&other)
                .map(|ghosts| ghosts.iter().map(|&dof| dofs.local_to_global(dof) as u64).collect())
                .unwrap_or_else(Vec::new);
            comm.send(other, encode_u64s(globals))?;
        }

        let global_to_local: FxHashMap<usize, usize> = (0..n_local)
            .map(|dof| (dofs.local_to_global(dof), dof))
            .collect();
        let mut lists = Vec::new();
        for other in (0..size).filter(|&r| r != rank) {
            let globals = decode_u64s(&comm.recv(other)?)?;
            let owned = globals
                .into_iter()
                .map(|global| {
                    global_to_local.get(&(global as usize)).copied().ok_or_else(|| {
                        eyre!(
                            "HaloExchange: rank {} requested global dof {} which rank {} does not own",
                            other,
                            global,
                            rank
                        )
                    })
                })
                .collect::<eyre::Result<Vec<_>>>()?;
            let ghosts = requested.remove(&other).unwrap_or_default();
            lists.push((other, owned, ghosts));
        }

        let plan = Self::from_neighbor_lists(lists)?;
        if size > 1 && plan.neighbors.is_empty() {
            warn!("rank {} of {} shares no dofs with any other rank", rank, size);
        }
        debug!(
            "rank {} exchanges dofs with {} neighbors ({} owned, {} ghost entries)",
            rank,
            plan.neighbors.len(),
            plan.owned_buffer.values.size(),
            plan.ghost_buffer.values.size()
        );
        Ok(plan)
    }

    pub fn num_neighbors(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbor_ranks(&self) -> Vec<usize> {
        self.neighbors.iter().map(|n| n.rank).collect()
    }

    /// Copies owner entries of `values` into the ghost entries on the neighbors.
    pub fn forward(&mut self, values: &Array1D<f64>, comm: &dyn Communicator, dispatcher: &Dispatcher) -> eyre::Result<()> {
        self.transfer(values, comm, dispatcher, Unpack::Assign)
    }

    /// Adds ghost entries of `values` into the owner entries on the neighbors.
    pub fn reverse(&mut self, values: &Array1D<f64>, comm: &dyn Communicator, dispatcher: &Dispatcher) -> eyre::Result<()> {
        self.transfer(values, comm, dispatcher, Unpack::Add)
    }

    fn transfer(
        &mut self,
        values: &Array1D<f64>,
        comm: &dyn Communicator,
        dispatcher: &Dispatcher,
        mode: Unpack,
    ) -> eyre::Result<()> {
        if self.neighbors.is_empty() {
            return Ok(());
        }
        let space = dispatcher.space();
        let direct = comm.supports_device_buffers();
        let forward = mode == Unpack::Assign;
        let Self {
            neighbors,
            owned_buffer,
            ghost_buffer,
        } = self;
        let (send_buffer, recv_buffer) = if forward {
            (owned_buffer, ghost_buffer)
        } else {
            (ghost_buffer, owned_buffer)
        };
        for neighbor in neighbors.iter() {
            let (indices, offset) = neighbor.side(forward);
            send_buffer.pack(values, indices, offset, dispatcher);
        }
        dispatcher.fence();

        for neighbor in neighbors.iter() {
            let (indices, offset) = neighbor.side(forward);
            if indices.size() > 0 {
                let bytes = send_buffer.read(space, offset, indices.size(), direct)?;
                comm.send(neighbor.rank, bytes)?;
            }
        }

        for neighbor in neighbors.iter() {
            let (indices, offset) = neighbor.side(!forward);
            if indices.size() > 0 {
                let bytes = comm.recv(neighbor.rank)?;
                ensure!(
                    bytes.len() == 8 * indices.size(),
                    "HaloExchange: expected {} values from rank {}, got {} bytes",
                    indices.size(),
                    neighbor.rank,
                    bytes.len()
                );
                recv_buffer.write(space, offset, &bytes, direct)?;
                recv_buffer.unpack(values, indices, offset, mode, dispatcher);
            }
        }
        dispatcher.fence();
        Ok(())
    }
}

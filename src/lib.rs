//! Heterogeneous memory and parallel dispatch for finite element residual and Jacobian
//! assembly.
//!
//! Data lives in [`array::HeteroArray`]s with separate host and device buffers. Assembly runs as
//! parallel regions launched by a [`dispatch::Dispatcher`], which accumulate into the tagged
//! vectors and matrices of a [`system::System`]. Processes exchange ghost contributions through
//! a [`comm::Communicator`] between regions.
pub mod array;
pub mod comm;
pub mod dispatch;
pub mod fe_tables;
pub mod memory_pool;
pub mod mesh;
pub mod problem;
pub mod space;
pub mod system;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

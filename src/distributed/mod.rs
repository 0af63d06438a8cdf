//! # Collective communication
//!
//! Every rank computes the full GEMM on its own inputs; the outputs are then
//! summed across ranks with an **All-Reduce**, so every rank ends with the
//! same reduced matrix. The overlap engine reduces the output segment by
//! segment, the baseline path reduces it in one call.
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): the interface the
//!     scheduler calls, with a whole-tensor and a region-scoped reduction.
//! *   [`CpuBackend`](cpu_backend::CpuBackend): a Ring All-Reduce over
//!     `crossbeam` channels, one thread per rank.
//! *   [`UniqueId`](communicator::UniqueId) and
//!     [`Communicator`](communicator::Communicator): the shared setup token
//!     and the per-rank handle built from it.

pub mod backend;
pub mod communicator;
pub mod cpu_backend;

pub use backend::CollectiveBackend;
pub use communicator::{Communicator, UniqueId};
pub use cpu_backend::CpuBackend;

//! # flash-overlap
//!
//! `flash-overlap` overlaps a distributed GEMM with the all-reduce of its
//! output at tile granularity. Output tiles are computed in a tuned order, a
//! per-column completion monitor records which tiles are done, and each
//! column segment is reduced as soon as all of its tiles are finished, while
//! the rest of the GEMM is still running.
//!
//! Devices, kernels and the collective are in-process here: each rank is a
//! thread, each rank's device is a worker thread retiring tile batches in
//! order, and the all-reduce is a ring over `crossbeam` channels.
//!
//! ## Modules
//!
//! - [`tile`], [`schedule`], [`segment`]: the tile index space, the visitation
//!   order and the communication segments.
//! - [`monitor`], [`poll`]: completion counters and how they are waited on.
//! - [`gemm`], [`distributed`]: the kernel and collective seams.
//! - [`engine`], [`baseline`]: the overlapped and the reference execution paths.
//! - [`config`], [`launch`], [`harness`]: tuning records, rank spawning and timing.
//!
//! ## Example
//!
//! ```rust
//! use flash_overlap::config::{LaunchOptions, OverlapOptions};
//! use flash_overlap::distributed::CollectiveBackend;
//! use flash_overlap::engine::{OverlapEngine, OverlapPlan};
//! use flash_overlap::gemm::{CpuTileGemm, GemmKernel};
//! use flash_overlap::launch::spawn_ranks;
//! use flash_overlap::tensor::{Tensor, TileBuffer};
//! use flash_overlap::tile::TileGrid;
//! use std::sync::Arc;
//!
//! let grid = TileGrid::new(32, 64, 8, 16, 16).unwrap();
//! let plan = OverlapPlan::new(grid, &[2, 6], &[2, 4]).unwrap();
//! let a = Arc::new(Tensor::<f32>::from_fn([32, 8], |r, c| (r % 3 + c) as f32));
//! let b = Arc::new(Tensor::<f32>::from_fn([64, 8], |r, _| (r % 2) as f32));
//! let kernel = Arc::new(CpuTileGemm::new(0));
//!
//! let outputs = spawn_ranks(2, &LaunchOptions::default(), |comm| {
//!     let mut engine = OverlapEngine::new(plan.clone(), kernel.clone(), OverlapOptions::default(), comm.rank())?;
//!     let c = Arc::new(TileBuffer::new(grid));
//!     engine.run(&a, &b, &c, &comm)?;
//!     Ok(c.to_tensor())
//! })
//! .unwrap();
//!
//! let single = kernel.compute_full(&*a, &*b).unwrap();
//! assert_eq!(outputs[0].get(5, 7), single.get(5, 7).map(|v| v * 2.0));
//! ```

pub mod baseline;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod gemm;
pub mod harness;
pub mod launch;
pub mod monitor;
pub mod poll;
pub mod schedule;
pub mod segment;
pub mod tensor;
pub mod tile;

pub use config::{BenchOptions, LaunchOptions, OverlapOptions, TuningConfig};
pub use engine::{EngineState, OverlapEngine, OverlapPlan, RunEvent, RunTrace};
pub use error::{OverlapError, Result};
pub use tensor::{Tensor, TileBuffer};
pub use tile::TileGrid;

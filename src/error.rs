//! Error types for the overlap scheduler.
//!
//! Every failure is fatal for the run that raised it: a collective reduction
//! fed with missing or inconsistent contributions produces silently wrong data,
//! so nothing here is retried.

use flash_overlap_kernels::KernelError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error type for scheduling, kernel and collective operations.
#[derive(Error, Debug)]
pub enum OverlapError {
    /// A schedule hint entry is out of range or repeats an earlier entry.
    #[error("Invalid hint entry {tile} at position {position}: {reason}")]
    InvalidHint {
        position: usize,
        tile: usize,
        reason: &'static str,
    },
    /// The cumulative column-group boundaries are malformed.
    #[error("Invalid segment plan {boundaries:?}: {reason}")]
    InvalidSegmentPlan {
        boundaries: Vec<usize>,
        reason: String,
    },
    /// Matrix or tile extents cannot describe a tile grid.
    #[error("Invalid tile shape: {0}")]
    InvalidTileShape(String),
    /// Fewer participants than the run requires.
    #[error("At least {required} devices are required, got {available}")]
    InsufficientDevices { required: usize, available: usize },
    /// Operand or buffer shapes disagree.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// The requested operation is not supported for these inputs.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// A tile id outside the grid.
    #[error("Tile {tile} out of range for {tile_count} tiles")]
    TileOutOfRange { tile: usize, tile_count: usize },
    /// A tuning record could not be read or parsed.
    #[error("Failed to load tuning config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
    /// A kernel invoked directly (outside a device stream) failed.
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    /// Tile work retired on a device stream failed.
    #[error("Device execution failed at tile {tile}: {reason}")]
    DeviceExecution { tile: usize, reason: String },
    /// The device stream could not accept or run work.
    #[error("Device stream {stream} unavailable: {reason}")]
    StreamUnavailable { stream: String, reason: String },
    /// The collective primitive reported a failure (disconnect, timeout, bad chunk).
    #[error("Collective failed on rank {rank}: {reason}")]
    Collective { rank: usize, reason: String },
    /// A column-group counter would pass its row-tile count.
    #[error("Completion counter for column {col} already reached its target {target}")]
    MonitorOverflow { col: usize, target: u32 },
    /// A wait did not finish within its bound.
    #[error("Stalled waiting for {waiting_for} after {waited:?}")]
    SynchronizationStall {
        waiting_for: String,
        waited: Duration,
    },
    /// A rank or stream worker panicked.
    #[error("Worker {0} panicked")]
    WorkerPanicked(String),
}

impl OverlapError {
    /// True for errors detected eagerly from configuration, before any tile is issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OverlapError::InvalidHint { .. }
                | OverlapError::InvalidSegmentPlan { .. }
                | OverlapError::InvalidTileShape(_)
                | OverlapError::InsufficientDevices { .. }
                | OverlapError::ShapeMismatch { .. }
                | OverlapError::TileOutOfRange { .. }
                | OverlapError::Unsupported(_)
                | OverlapError::Config { .. }
        )
    }

    /// True for failures raised while the run was executing on a device or collective.
    ///
    /// Stalls count here: a peer that never reaches a collective is reported
    /// through the collective's own timeout.
    pub fn is_device_execution(&self) -> bool {
        !self.is_configuration()
    }
}

pub type Result<T> = std::result::Result<T, OverlapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        let hint = OverlapError::InvalidHint {
            position: 1,
            tile: 1,
            reason: "duplicate",
        };
        assert!(hint.is_configuration());
        assert!(!hint.is_device_execution());

        let stall = OverlapError::SynchronizationStall {
            waiting_for: "segment 0".into(),
            waited: Duration::from_millis(5),
        };
        assert!(stall.is_device_execution());

        let kernel: OverlapError = KernelError::ShapeMismatch {
            expected: vec![2],
            got: vec![3],
        }
        .into();
        assert!(kernel.is_device_execution());
        assert!(kernel.to_string().contains("Shape mismatch"));
    }
}

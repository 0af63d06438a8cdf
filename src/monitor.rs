//! Completion monitor.
//!
//! One counter per column-tile-group. The compute side bumps the counter of a
//! tile's column once that tile's output is written; the trigger side reads the
//! counters to decide whether a communication segment may start.
//!
//! # Memory ordering
//!
//! Increments use `Release` and reads use `Acquire`: a reader that sees a
//! column at its target also sees every tile write that happened before the
//! matching increments. A reader may see a counter late (a delayed "ready"),
//! never early.

use crate::error::{OverlapError, Result};
use crate::segment::SegmentPlan;
use crate::tile::TileGrid;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct CompletionMonitor {
    counters: Box<[AtomicU32]>,
    target: u32,
    tile_count: usize,
}

impl CompletionMonitor {
    /// Creates a zeroed monitor with one counter per column group of `grid`.
    pub fn new(grid: &TileGrid) -> Self {
        let counters = (0..grid.cols()).map(|_| AtomicU32::new(0)).collect();
        Self {
            counters,
            target: grid.rows() as u32,
            tile_count: grid.tile_count(),
        }
    }

    /// Zeroes every counter. Called at the start of each run.
    pub fn reset(&self) {
        for counter in self.counters.iter() {
            counter.store(0, Ordering::Release);
        }
    }

    /// Records that `tile` has been fully written.
    ///
    /// # Errors
    ///
    /// `TileOutOfRange` for an id outside the grid, `MonitorOverflow` if the
    /// tile's column has already reached its target (the counter is left
    /// untouched in that case).
    pub fn mark_complete(&self, tile: usize) -> Result<()> {
        if tile >= self.tile_count {
            return Err(OverlapError::TileOutOfRange {
                tile,
                tile_count: self.tile_count,
            });
        }
        let col = tile % self.counters.len();
        let target = self.target;
        self.counters[col]
            .fetch_update(Ordering::Release, Ordering::Relaxed, |count| {
                (count < target).then_some(count + 1)
            })
            .map(|_| ())
            .map_err(|_| OverlapError::MonitorOverflow { col, target })
    }

    /// Tiles recorded so far in column group `col`.
    pub fn count(&self, col: usize) -> u32 {
        self.counters[col].load(Ordering::Acquire)
    }

    pub fn column_complete(&self, col: usize) -> bool {
        self.count(col) == self.target
    }

    /// Number of row-tiles each column must reach.
    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn columns(&self) -> usize {
        self.counters.len()
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.counters
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect()
    }

    /// True iff every column group of segment `segment` reached its target.
    ///
    /// Reads the plan's device view. Out-of-range segments are never ready.
    pub fn segment_ready(&self, plan: &SegmentPlan, segment: usize) -> bool {
        let bounds = plan.device();
        let Some(&end) = bounds.get(segment) else {
            return false;
        };
        let start = if segment == 0 { 0 } else { bounds[segment - 1] };
        (start as usize..end as usize).all(|col| self.column_complete(col))
    }

    pub fn all_complete(&self) -> bool {
        (0..self.counters.len()).all(|col| self.column_complete(col))
    }
}

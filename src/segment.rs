//! Communication segment plan.
//!
//! A plan is a strictly increasing list of cumulative column-tile-group
//! boundaries (`cSeg` in tuning records). Segment `s` covers column groups
//! `[boundary[s - 1], boundary[s])`, with an implicit leading boundary of 0.
//! A plan with a single boundary communicates once, after the whole GEMM.
//!
//! The plan is read on two sides: the host orchestration walks segments in
//! order, while readiness checks next to the completion counters read the
//! boundaries on their own. Both views are materialized together from one
//! validated list and neither is ever mutated.

use crate::error::{OverlapError, Result};
use crate::tile::TileGrid;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    host: Vec<usize>,
    device: Arc<[u32]>,
}

impl SegmentPlan {
    /// Validates `boundaries` against `grid` and builds both views.
    ///
    /// # Errors
    ///
    /// Returns `OverlapError::InvalidSegmentPlan` if the list is empty, not
    /// strictly increasing, starts at zero, or does not end at `grid.cols()`.
    pub fn new(boundaries: &[usize], grid: &TileGrid) -> Result<Self> {
        let invalid = |reason: String| OverlapError::InvalidSegmentPlan {
            boundaries: boundaries.to_vec(),
            reason,
        };

        let Some(&last) = boundaries.last() else {
            return Err(invalid("plan has no boundaries".into()));
        };
        let mut previous = 0;
        for (s, &boundary) in boundaries.iter().enumerate() {
            if boundary <= previous {
                return Err(invalid(format!(
                    "boundary {s} ({boundary}) does not increase past {previous}"
                )));
            }
            previous = boundary;
        }
        if last != grid.cols() {
            return Err(invalid(format!(
                "last boundary {last} does not match {} column groups",
                grid.cols()
            )));
        }

        let device = boundaries
            .iter()
            .map(|&b| u32::try_from(b).map_err(|_| invalid(format!("boundary {b} overflows u32"))))
            .collect::<Result<Vec<u32>>>()?;

        Ok(Self {
            host: boundaries.to_vec(),
            device: device.into(),
        })
    }

    /// The unsegmented plan: one segment spanning every column group.
    pub fn single(grid: &TileGrid) -> Self {
        Self {
            host: vec![grid.cols()],
            device: vec![grid.cols() as u32].into(),
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.host.len()
    }

    /// Always false for a validated plan.
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.host.len() == 1
    }

    /// Column-tile-groups of segment `s`.
    pub fn columns(&self, s: usize) -> Range<usize> {
        let start = if s == 0 { 0 } else { self.host[s - 1] };
        start..self.host[s]
    }

    /// Host view of the cumulative boundaries.
    pub fn host(&self) -> &[usize] {
        &self.host
    }

    /// Shared view read by completion-side readiness checks.
    pub fn device(&self) -> &Arc<[u32]> {
        &self.device
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.len()).map(|s| self.columns(s))
    }
}

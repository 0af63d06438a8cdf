//! The overlap engine.
//!
//! One engine per rank drives a GEMM and its all-reduce so that communication
//! of finished column segments overlaps computation of the rest:
//!
//! ```text
//! IssueTiles ──▶ AwaitSegment ──▶ Communicate ──┬─▶ IssueTiles (next segment)
//!                                               └─▶ Done (after the last segment)
//! ```
//!
//! * `IssueTiles` hands the schedule slice up to the current segment's
//!   frontier (and, with `issue_ahead`, the following segments' frontiers) to
//!   the device stream and returns at once.
//! * `AwaitSegment` polls the completion monitor until every column group of
//!   the segment reached its row-tile count. A stream failure or a stall
//!   aborts the run here, so a segment with missing tiles is never reduced.
//! * `Communicate` all-reduces the segment's column span over all rows.
//!
//! Segments are always communicated in plan order, and the same order on every
//! rank, which is what keeps the collective calls matched across ranks.

use crate::config::OverlapOptions;
use crate::distributed::CollectiveBackend;
use crate::error::{OverlapError, Result};
use crate::gemm::{DeviceStream, GemmKernel};
use crate::monitor::CompletionMonitor;
use crate::poll::{PollOutcome, poll_until};
use crate::schedule::{Schedule, build_schedule};
use crate::segment::SegmentPlan;
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use crate::tile::TileGrid;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    IssueTiles,
    AwaitSegment,
    Communicate,
    Done,
}

/// What a run did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Visitation ranks `ranks` were submitted to the stream while preparing `segment`.
    TilesIssued { segment: usize, ranks: Range<usize> },
    /// Column groups `columns` of `segment` were all-reduced.
    SegmentCommunicated { segment: usize, columns: Range<usize> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTrace {
    events: Vec<RunEvent>,
}

impl RunTrace {
    fn push(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Number of tile batches submitted to the stream.
    pub fn batches(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, RunEvent::TilesIssued { .. }))
            .count()
    }

    /// Segment indices in communication order.
    pub fn communicated(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::SegmentCommunicated { segment, .. } => Some(*segment),
                RunEvent::TilesIssued { .. } => None,
            })
            .collect()
    }

    /// Total visitation ranks issued.
    pub fn tiles_issued(&self) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                RunEvent::TilesIssued { ranks, .. } => ranks.len(),
                RunEvent::SegmentCommunicated { .. } => 0,
            })
            .sum()
    }
}

/// A validated schedule and segment plan, with each segment's issue frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapPlan {
    grid: TileGrid,
    schedule: Schedule,
    segments: SegmentPlan,
    frontiers: Vec<usize>,
}

impl OverlapPlan {
    /// Builds the schedule from `hint` and the segment plan from `boundaries`.
    ///
    /// # Errors
    ///
    /// `InvalidHint` is checked before `InvalidSegmentPlan`; nothing is issued
    /// either way.
    pub fn new(grid: TileGrid, hint: &[usize], boundaries: &[usize]) -> Result<Self> {
        let schedule = build_schedule(grid.tile_count(), hint)?;
        let segments = SegmentPlan::new(boundaries, &grid)?;
        Self::from_parts(grid, schedule, segments)
    }

    pub fn from_parts(grid: TileGrid, schedule: Schedule, segments: SegmentPlan) -> Result<Self> {
        if schedule.len() != grid.tile_count() {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![grid.tile_count()],
                got: vec![schedule.len()],
            });
        }
        if segments.host().last() != Some(&grid.cols()) {
            return Err(OverlapError::InvalidSegmentPlan {
                boundaries: segments.host().to_vec(),
                reason: format!("plan does not cover {} column groups", grid.cols()),
            });
        }

        // frontier[s] = 1 + the latest visitation rank among segment s's tiles.
        let frontiers = segments
            .iter()
            .map(|columns| {
                columns
                    .flat_map(|col| grid.tiles_in_column(col))
                    .map(|tile| schedule.rank_of(tile) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        Ok(Self {
            grid,
            schedule,
            segments,
            frontiers,
        })
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn segments(&self) -> &SegmentPlan {
        &self.segments
    }

    /// One past the largest visitation rank segment `s` depends on.
    pub fn frontier(&self, s: usize) -> usize {
        self.frontiers[s]
    }

    pub fn frontiers(&self) -> &[usize] {
        &self.frontiers
    }
}

/// Drives one rank's overlapped GEMM + all-reduce.
pub struct OverlapEngine<T: TensorElem, K: GemmKernel<T> + 'static> {
    plan: OverlapPlan,
    kernel: Arc<K>,
    options: OverlapOptions,
    monitor: Arc<CompletionMonitor>,
    stream: DeviceStream,
    rank: usize,
    state: EngineState,
    _elem: PhantomData<fn() -> T>,
}

impl<T: TensorElem, K: GemmKernel<T> + 'static> OverlapEngine<T, K> {
    /// Creates the engine and starts its device stream, named `stream-{rank}`.
    pub fn new(plan: OverlapPlan, kernel: Arc<K>, options: OverlapOptions, rank: usize) -> Result<Self> {
        let monitor = Arc::new(CompletionMonitor::new(plan.grid()));
        let stream = DeviceStream::new(format!("stream-{rank}"))?;
        Ok(Self {
            plan,
            kernel,
            options,
            monitor,
            stream,
            rank,
            state: EngineState::Done,
            _elem: PhantomData,
        })
    }

    pub fn plan(&self) -> &OverlapPlan {
        &self.plan
    }

    pub fn monitor(&self) -> &Arc<CompletionMonitor> {
        &self.monitor
    }

    pub fn options(&self) -> &OverlapOptions {
        &self.options
    }

    /// `Done` between runs; the state a failed run stopped in otherwise.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Computes `C = A · Bᵀ` into `c` and all-reduces it across `comm`, one
    /// segment at a time.
    ///
    /// On success `c` holds the reduced product and every issued tile has
    /// retired.
    pub fn run<B: CollectiveBackend>(
        &mut self,
        a: &Arc<Tensor<T>>,
        b: &Arc<Tensor<T>>,
        c: &Arc<TileBuffer<T>>,
        comm: &B,
    ) -> Result<RunTrace> {
        self.check_operands(a, b, c)?;

        // Tiles left over from an aborted run must not count toward this one.
        self.stream.reset(&self.options.poll)?;
        self.monitor.reset();

        let grid = *self.plan.grid();
        let segment_count = self.plan.segments().len();
        let mut trace = RunTrace::default();
        let mut segment: usize = 0;
        let mut next_to_issue: usize = 0;
        let mut cursor: usize = 0;

        self.state = EngineState::IssueTiles;
        loop {
            match self.state {
                EngineState::IssueTiles => {
                    let last = segment
                        .saturating_add(self.options.issue_ahead)
                        .min(segment_count - 1);
                    while next_to_issue <= last {
                        let frontier = self.plan.frontier(next_to_issue);
                        if frontier > cursor {
                            self.issue(a, b, c, cursor..frontier)?;
                            trace.push(RunEvent::TilesIssued {
                                segment: next_to_issue,
                                ranks: cursor..frontier,
                            });
                            cursor = frontier;
                        }
                        next_to_issue += 1;
                    }
                    self.state = EngineState::AwaitSegment;
                }
                EngineState::AwaitSegment => {
                    self.await_segment(segment)?;
                    self.state = EngineState::Communicate;
                }
                EngineState::Communicate => {
                    let columns = self.plan.segments().columns(segment);
                    let span = grid.column_span(columns.clone());
                    tracing::debug!(rank = self.rank, segment, ?columns, ?span, "reducing segment");
                    comm.all_reduce_region(c.as_ref(), 0..grid.m(), span)?;
                    trace.push(RunEvent::SegmentCommunicated { segment, columns });

                    segment += 1;
                    self.state = if segment == segment_count {
                        EngineState::Done
                    } else {
                        EngineState::IssueTiles
                    };
                }
                EngineState::Done => break,
            }
        }

        self.stream.synchronize(&self.options.poll)?;
        debug_assert!(self.monitor.all_complete());
        Ok(trace)
    }

    fn check_operands(&self, a: &Tensor<T>, b: &Tensor<T>, c: &TileBuffer<T>) -> Result<()> {
        let grid = self.plan.grid();
        if c.grid() != grid {
            return Err(OverlapError::ShapeMismatch {
                expected: vec![grid.m(), grid.n()],
                got: vec![c.grid().m(), c.grid().n()],
            });
        }
        let expected = [[grid.m(), grid.k()], [grid.n(), grid.k()]];
        for (operand, shape) in [a, b].into_iter().zip(expected) {
            if operand.shape() != &shape {
                return Err(OverlapError::ShapeMismatch {
                    expected: shape.to_vec(),
                    got: operand.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    fn issue(
        &self,
        a: &Arc<Tensor<T>>,
        b: &Arc<Tensor<T>>,
        c: &Arc<TileBuffer<T>>,
        ranks: Range<usize>,
    ) -> Result<()> {
        tracing::trace!(rank = self.rank, cursor = ranks.start, frontier = ranks.end, "issuing tiles");
        let order = self.plan.schedule().order()[ranks].to_vec();
        let kernel = Arc::clone(&self.kernel);
        let monitor = Arc::clone(&self.monitor);
        let (a, b, c) = (Arc::clone(a), Arc::clone(b), Arc::clone(c));
        self.stream
            .submit(move || kernel.compute_tile_range(&a, &b, &c, &order, &monitor))
    }

    fn await_segment(&self, segment: usize) -> Result<()> {
        let monitor = &self.monitor;
        let segments = self.plan.segments();
        let stream = &self.stream;

        let outcome = poll_until(&self.options.poll, || {
            stream.check()?;
            Ok(monitor.segment_ready(segments, segment))
        })?;

        match outcome {
            PollOutcome::Ready => {
                tracing::trace!(rank = self.rank, segment, "segment ready");
                Ok(())
            }
            PollOutcome::TimedOut(waited) => {
                tracing::warn!(
                    rank = self.rank,
                    segment,
                    counts = ?monitor.snapshot(),
                    "segment stalled"
                );
                Err(OverlapError::SynchronizationStall {
                    waiting_for: format!("segment {segment} on rank {}", self.rank),
                    waited,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{Communicator, UniqueId};
    use crate::gemm::CpuTileGemm;

    fn operands(grid: &TileGrid) -> (Arc<Tensor<f64>>, Arc<Tensor<f64>>) {
        let a = Tensor::from_fn([grid.m(), grid.k()], |r, c| ((r * 3 + c) % 5) as f64);
        let b = Tensor::from_fn([grid.n(), grid.k()], |r, c| ((r + 2 * c) % 7) as f64 - 3.0);
        (Arc::new(a), Arc::new(b))
    }

    #[test]
    fn test_frontiers() {
        // 3 row-tiles x 4 column groups; segment 0 = columns 0..2.
        let grid = TileGrid::new(96, 128, 8, 32, 32).unwrap();
        let plan = OverlapPlan::new(grid, &[5, 2], &[2, 4]).unwrap();
        // Segment 0 holds tiles 0, 1, 4, 5, 8, 9. Tile 9 is visited last, at rank 9.
        assert_eq!(plan.frontier(0), 10);
        assert_eq!(plan.frontier(1), 12);
    }

    #[test]
    fn test_hint_checked_before_boundaries() {
        let grid = TileGrid::new(96, 128, 8, 32, 32).unwrap();
        let err = OverlapPlan::new(grid, &[1, 1], &[3]).unwrap_err();
        assert!(matches!(err, OverlapError::InvalidHint { .. }));
        let err = OverlapPlan::new(grid, &[1], &[3]).unwrap_err();
        assert!(matches!(err, OverlapError::InvalidSegmentPlan { .. }));
    }

    #[test]
    fn test_single_rank_run() {
        let grid = TileGrid::new(40, 70, 6, 16, 16).unwrap();
        let plan = OverlapPlan::new(grid, &[3, 9], &[1, 3, 5]).unwrap();
        let (a, b) = operands(&grid);
        let c = Arc::new(TileBuffer::new(grid));
        let kernel = Arc::new(CpuTileGemm::new(0));

        let id = UniqueId::new(1);
        let comm = Communicator::init(0, &id).unwrap();
        let mut engine = OverlapEngine::new(plan, kernel.clone(), OverlapOptions::default(), 0).unwrap();
        let trace = engine.run(&a, &b, &c, &comm).unwrap();

        assert_eq!(trace.communicated(), vec![0, 1, 2]);
        assert_eq!(trace.tiles_issued(), grid.tile_count());
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(c.to_tensor(), kernel.compute_full(&*a, &*b).unwrap());
    }

    #[test]
    fn test_issue_ahead_zero_issues_per_segment() {
        let grid = TileGrid::new(32, 64, 4, 16, 16).unwrap();
        // No hint: segment s's frontier is the last row's tile in its columns.
        let plan = OverlapPlan::new(grid, &[], &[2, 4]).unwrap();
        let (a, b) = operands(&grid);
        let c = Arc::new(TileBuffer::new(grid));
        let comm = Communicator::init(0, &UniqueId::new(1)).unwrap();

        let options = OverlapOptions::default().with_issue_ahead(0);
        let mut engine = OverlapEngine::new(plan, Arc::new(CpuTileGemm::new(1)), options, 0).unwrap();
        let trace = engine.run(&a, &b, &c, &comm).unwrap();

        assert_eq!(
            trace.events(),
            &[
                RunEvent::TilesIssued { segment: 0, ranks: 0..6 },
                RunEvent::SegmentCommunicated { segment: 0, columns: 0..2 },
                RunEvent::TilesIssued { segment: 1, ranks: 6..8 },
                RunEvent::SegmentCommunicated { segment: 1, columns: 2..4 },
            ]
        );
    }

    #[test]
    fn test_unbounded_issue_ahead_issues_everything_first() {
        let grid = TileGrid::new(32, 64, 4, 16, 16).unwrap();
        let plan = OverlapPlan::new(grid, &[], &[2, 4]).unwrap();
        let (a, b) = operands(&grid);
        let c = Arc::new(TileBuffer::new(grid));
        let comm = Communicator::init(0, &UniqueId::new(1)).unwrap();

        let options = OverlapOptions::default().with_issue_ahead(usize::MAX);
        let kernel = Arc::new(CpuTileGemm::new(0));
        let mut engine = OverlapEngine::new(plan, kernel.clone(), options, 0).unwrap();
        let trace = engine.run(&a, &b, &c, &comm).unwrap();

        assert_eq!(
            trace.events(),
            &[
                RunEvent::TilesIssued { segment: 0, ranks: 0..6 },
                RunEvent::TilesIssued { segment: 1, ranks: 6..8 },
                RunEvent::SegmentCommunicated { segment: 0, columns: 0..2 },
                RunEvent::SegmentCommunicated { segment: 1, columns: 2..4 },
            ]
        );
        assert_eq!(c.to_tensor(), kernel.compute_full(&*a, &*b).unwrap());
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        let grid = TileGrid::new(32, 64, 4, 16, 16).unwrap();
        let other = TileGrid::new(32, 64, 4, 16, 32).unwrap();
        let plan = OverlapPlan::new(grid, &[], &[4]).unwrap();
        let (a, b) = operands(&grid);
        let c = Arc::new(TileBuffer::new(other));
        let comm = Communicator::init(0, &UniqueId::new(1)).unwrap();
        let mut engine =
            OverlapEngine::new(plan, Arc::new(CpuTileGemm::new(0)), OverlapOptions::default(), 0).unwrap();
        let err = engine.run(&a, &b, &c, &comm).unwrap_err();
        assert!(matches!(err, OverlapError::ShapeMismatch { .. }));
    }
}

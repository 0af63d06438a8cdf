use flash_overlap::config::{BenchOptions, LaunchOptions, OverlapOptions, TuningConfig};
use flash_overlap::distributed::{CollectiveBackend, Communicator, UniqueId};
use flash_overlap::engine::{EngineState, OverlapEngine, OverlapPlan};
use flash_overlap::gemm::{CpuTileGemm, GemmKernel};
use flash_overlap::harness::{Problem, time_overlap};
use flash_overlap::launch::spawn_ranks;
use flash_overlap::monitor::CompletionMonitor;
use flash_overlap::tensor::{Tensor, TensorElem, TileBuffer};
use flash_overlap::tile::TileGrid;
use flash_overlap::{OverlapError, Result};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fails when asked for `fail_at`, while `armed`; computes normally otherwise.
struct FaultyKernel {
    inner: CpuTileGemm,
    fail_at: usize,
    armed: AtomicBool,
}

impl FaultyKernel {
    fn new(fail_at: usize) -> Self {
        Self {
            inner: CpuTileGemm::new(0),
            fail_at,
            armed: AtomicBool::new(true),
        }
    }
}

impl<T: TensorElem> GemmKernel<T> for FaultyKernel {
    fn compute_tile_range(
        &self,
        a: &Tensor<T>,
        b: &Tensor<T>,
        c: &TileBuffer<T>,
        order: &[usize],
        monitor: &CompletionMonitor,
    ) -> Result<()> {
        for &tile in order {
            if tile == self.fail_at && self.armed.load(Ordering::SeqCst) {
                return Err(OverlapError::DeviceExecution {
                    tile,
                    reason: "injected fault".into(),
                });
            }
            self.inner.compute_tile_range(a, b, c, &[tile], monitor)?;
        }
        Ok(())
    }

    fn compute_full(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>> {
        self.inner.compute_full(a, b)
    }
}

/// Accepts tiles but never reports them.
struct SilentKernel {
    calls: AtomicUsize,
}

impl<T: TensorElem> GemmKernel<T> for SilentKernel {
    fn compute_tile_range(
        &self,
        _a: &Tensor<T>,
        _b: &Tensor<T>,
        _c: &TileBuffer<T>,
        _order: &[usize],
        _monitor: &CompletionMonitor,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn compute_full(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>> {
        CpuTileGemm::new(0).compute_full(a, b)
    }
}

#[derive(Default)]
struct CountingBackend {
    regions: Mutex<Vec<Range<usize>>>,
}

impl CollectiveBackend for CountingBackend {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        Ok(tensor.clone())
    }

    fn all_reduce_region<T: TensorElem>(&self, _buffer: &TileBuffer<T>, _rows: Range<usize>, cols: Range<usize>) -> Result<()> {
        self.regions.lock().unwrap().push(cols);
        Ok(())
    }
}

fn operands(grid: &TileGrid) -> (Arc<Tensor<f32>>, Arc<Tensor<f32>>) {
    (
        Arc::new(Tensor::from_fn([grid.m(), grid.k()], |r, c| (r + c) as f32)),
        Arc::new(Tensor::from_fn([grid.n(), grid.k()], |r, c| (r * c) as f32)),
    )
}

#[test]
fn test_kernel_failure_aborts_before_segment_reduce() {
    // 2 row-tiles x 4 column groups; tile 6 (row 1, column 2) belongs to segment 1.
    let grid = TileGrid::new(32, 64, 4, 16, 16).unwrap();
    let plan = OverlapPlan::new(grid, &[], &[2, 4]).unwrap();
    let (a, b) = operands(&grid);
    let c = Arc::new(TileBuffer::new(grid));
    let kernel = Arc::new(FaultyKernel::new(6));
    let options = OverlapOptions::default().with_issue_ahead(0);
    let mut engine = OverlapEngine::new(plan, Arc::clone(&kernel), options, 0).unwrap();
    let backend = CountingBackend::default();

    let err = engine.run(&a, &b, &c, &backend).unwrap_err();
    assert!(matches!(err, OverlapError::DeviceExecution { tile: 6, .. }));
    assert!(err.is_device_execution());
    assert_eq!(engine.state(), EngineState::AwaitSegment);
    // Segment 0 went out, segment 1 never did.
    assert_eq!(*backend.regions.lock().unwrap(), vec![0..32]);
    assert!(!engine.monitor().column_complete(2));

    // A later run starts from a clean stream and monitor.
    kernel.armed.store(false, Ordering::SeqCst);
    let trace = engine.run(&a, &b, &c, &backend).unwrap();
    assert_eq!(trace.communicated(), vec![0, 1]);
    assert_eq!(engine.state(), EngineState::Done);
}

#[test]
fn test_unreported_tiles_stall() {
    let grid = TileGrid::new(32, 32, 4, 16, 16).unwrap();
    let plan = OverlapPlan::new(grid, &[], &[1, 2]).unwrap();
    let (a, b) = operands(&grid);
    let c = Arc::new(TileBuffer::new(grid));
    let kernel = Arc::new(SilentKernel {
        calls: AtomicUsize::new(0),
    });
    let options = OverlapOptions::default().with_stall_timeout(Some(Duration::from_millis(20)));
    let mut engine = OverlapEngine::new(plan, Arc::clone(&kernel), options, 3).unwrap();
    let backend = CountingBackend::default();

    let err = engine.run(&a, &b, &c, &backend).unwrap_err();
    match err {
        OverlapError::SynchronizationStall { waiting_for, waited } => {
            assert_eq!(waiting_for, "segment 0 on rank 3");
            assert!(waited >= Duration::from_millis(20));
        }
        other => panic!("expected a stall, got {other:?}"),
    }
    assert!(backend.regions.lock().unwrap().is_empty());
    assert!(kernel.calls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_duplicate_hint_rejected_before_any_work() {
    let grid = TileGrid::new(96, 128, 8, 32, 32).unwrap();
    let err = OverlapPlan::new(grid, &[1, 1], &[2, 4]).unwrap_err();
    assert!(matches!(err, OverlapError::InvalidHint { position: 1, tile: 1, .. }));
    assert!(err.is_configuration());

    // Through the harness, validation happens before any rank is spawned.
    let config = TuningConfig {
        bm: 32,
        bn: 32,
        algo: 0,
        segments: vec![2, 4],
        hint: vec![1, 1],
        dur: 0.0,
    };
    let problem = Problem::<f32>::random(96, 128, 8, 0).unwrap();
    let options = BenchOptions::default().with_warmup(0).with_repetitions(1);
    let err = time_overlap(&problem, &config, 2, &options).unwrap_err();
    assert!(matches!(err, OverlapError::InvalidHint { .. }));
}

#[test]
fn test_bad_segment_plans() {
    let grid = TileGrid::new(64, 128, 8, 32, 32).unwrap();
    for boundaries in [vec![], vec![0usize, 4], vec![3, 2, 4], vec![2, 3], vec![2, 5]] {
        let err = OverlapPlan::new(grid, &[], &boundaries).unwrap_err();
        assert!(
            matches!(err, OverlapError::InvalidSegmentPlan { .. }),
            "{boundaries:?} gave {err:?}"
        );
    }
}

#[test]
fn test_failing_rank_is_reported_over_peer_echo() {
    let grid = TileGrid::new(32, 64, 4, 16, 16).unwrap();
    let plan = OverlapPlan::new(grid, &[], &[2, 4]).unwrap();
    let launch = LaunchOptions::default().with_collective_timeout(Duration::from_secs(5));

    let err = spawn_ranks(2, &launch, |comm| {
        let (a, b) = operands(&grid);
        let c = Arc::new(TileBuffer::new(grid));
        // Rank 1 fails on tile 0, before its first segment is ready.
        let kernel = Arc::new(FaultyKernel::new(if comm.rank() == 1 { 0 } else { usize::MAX }));
        let mut engine = OverlapEngine::new(plan.clone(), kernel, OverlapOptions::default(), comm.rank())?;
        engine.run(&a, &b, &c, &comm)?;
        Ok(())
    })
    .unwrap_err();

    assert!(matches!(err, OverlapError::DeviceExecution { tile: 0, .. }));
}

#[test]
fn test_communicator_is_single_use_per_rank() {
    let id = UniqueId::new(2);
    let _first = Communicator::init(0, &id).unwrap();
    let err = Communicator::init(0, &id).unwrap_err();
    assert!(matches!(err, OverlapError::Collective { rank: 0, .. }));
}

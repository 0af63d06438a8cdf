//! Benchmark harness: times the overlapped run against the non-overlapped
//! baseline and a communication-only run.
//!
//! Each measurement spawns one thread per rank, warms up, then averages the
//! timed repetitions per rank. A run is as slow as its slowest rank, so the
//! reported duration is the maximum over ranks.

use crate::baseline::compute_then_reduce;
use crate::config::{BenchOptions, TuningConfig};
use crate::distributed::CollectiveBackend;
use crate::engine::OverlapEngine;
use crate::error::{OverlapError, Result};
use crate::gemm::CpuTileGemm;
use crate::launch::spawn_ranks;
use crate::tensor::{Tensor, TensorElem, TileBuffer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INPUT_SCALE: f64 = 0.5;

/// An `m × n × k` problem with fixed random operands.
///
/// All ranks and all measured paths read the same `A` (`m×k`) and `B` (`n×k`).
#[derive(Debug, Clone)]
pub struct Problem<T: TensorElem> {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub a: Arc<Tensor<T>>,
    pub b: Arc<Tensor<T>>,
}

impl<T: TensorElem> Problem<T> {
    pub fn random(m: usize, n: usize, k: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = Tensor::random([m, k], INPUT_SCALE, &mut rng)?;
        let b = Tensor::random([n, k], INPUT_SCALE, &mut rng)?;
        Ok(Self {
            m,
            n,
            k,
            a: Arc::new(a),
            b: Arc::new(b),
        })
    }
}

/// Runs `f` `warmup` times untimed, then returns the mean of `repetitions` timed runs.
pub fn time_iterations<F>(warmup: usize, repetitions: usize, mut f: F) -> Result<Duration>
where
    F: FnMut() -> Result<()>,
{
    if repetitions == 0 {
        return Err(OverlapError::Unsupported("timing needs at least one repetition".into()));
    }
    let divisor = u32::try_from(repetitions).map_err(|_| {
        OverlapError::Unsupported(format!("{repetitions} repetitions exceed the timing counter"))
    })?;
    for _ in 0..warmup {
        f()?;
    }
    let mut total = Duration::ZERO;
    for _ in 0..repetitions {
        let start = Instant::now();
        f()?;
        total += start.elapsed();
    }
    Ok(total / divisor)
}

fn slowest(durations: Vec<Duration>) -> Duration {
    durations.into_iter().max().unwrap_or_default()
}

/// Mean duration of the overlapped GEMM + all-reduce under `config`.
pub fn time_overlap<T: TensorElem>(
    problem: &Problem<T>,
    config: &TuningConfig,
    world_size: usize,
    options: &BenchOptions,
) -> Result<Duration> {
    // Validated once, before any rank starts.
    let plan = config.plan(problem.m, problem.n, problem.k)?;
    let kernel = Arc::new(CpuTileGemm::new(config.algo));

    let durations = spawn_ranks(world_size, &options.launch, |comm| {
        let mut engine = OverlapEngine::new(plan.clone(), Arc::clone(&kernel), options.overlap.clone(), comm.rank())?;
        let c = Arc::new(TileBuffer::new(*plan.grid()));
        time_iterations(options.warmup, options.repetitions, || {
            engine.run(&problem.a, &problem.b, &c, &comm).map(|_| ())
        })
    })?;
    Ok(slowest(durations))
}

/// Mean duration of the full GEMM followed by one whole-matrix all-reduce.
pub fn time_baseline<T: TensorElem>(
    problem: &Problem<T>,
    config: &TuningConfig,
    world_size: usize,
    options: &BenchOptions,
) -> Result<Duration> {
    let kernel = CpuTileGemm::new(config.algo);
    let durations = spawn_ranks(world_size, &options.launch, |comm| {
        time_iterations(options.warmup, options.repetitions, || {
            compute_then_reduce(&kernel, &*problem.a, &*problem.b, &comm).map(|_| ())
        })
    })?;
    Ok(slowest(durations))
}

/// Mean duration of a lone `m × n` all-reduce.
///
/// Only rank 0's mean is reported, as a single collective finishes on every
/// rank together.
pub fn time_comm<T: TensorElem>(problem: &Problem<T>, world_size: usize, options: &BenchOptions) -> Result<Duration> {
    let durations = spawn_ranks(world_size, &options.launch, |comm| {
        let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(comm.rank() as u64));
        let c = Tensor::<T>::random([problem.m, problem.n], INPUT_SCALE, &mut rng)?;
        time_iterations(options.warmup, options.repetitions, || comm.all_reduce_sum(&c).map(|_| ()))
    })?;
    Ok(durations.first().copied().unwrap_or_default())
}

/// Results of one benchmark, printed as a two-column table.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub tile_count: usize,
    /// GEMM duration recorded in the tuning record, in milliseconds.
    pub gemm_ms: f64,
    pub comm: Duration,
    pub baseline: Duration,
    pub overlap: Duration,
}

impl BenchReport {
    /// `baseline / overlap`. Above 1 means overlapping paid off.
    pub fn speedup(&self) -> f64 {
        let overlap = self.overlap.as_secs_f64();
        if overlap == 0.0 {
            return f64::NAN;
        }
        self.baseline.as_secs_f64() / overlap
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18} {:>15}", "Item", "Value")?;
        writeln!(f, "{:<18} {:>15}", "-----", "-----")?;
        writeln!(f, "{:<18} {:>15}", "m", self.m)?;
        writeln!(f, "{:<18} {:>15}", "n", self.n)?;
        writeln!(f, "{:<18} {:>15}", "k", self.k)?;
        writeln!(f, "{:<18} {:>15}", "tile_num", self.tile_count)?;
        writeln!(f, "{:<18} {:>15.4}", "gemm_dur (ms)", self.gemm_ms)?;
        writeln!(f, "{:<18} {:>15.4}", "comm_dur (ms)", millis(self.comm))?;
        writeln!(f, "{:<18} {:>15.4}", "baseline_dur (ms)", millis(self.baseline))?;
        writeln!(f, "{:<18} {:>15.4}", "overlap_dur (ms)", millis(self.overlap))?;
        write!(f, "{:<18} {:>15.4}", "speedup", self.speedup())
    }
}

/// Measures communication, overlap and baseline for `problem` under `config`.
pub fn run_benchmark<T: TensorElem>(
    problem: &Problem<T>,
    config: &TuningConfig,
    world_size: usize,
    options: &BenchOptions,
) -> Result<BenchReport> {
    let grid = config.grid(problem.m, problem.n, problem.k)?;
    tracing::info!(
        m = problem.m,
        n = problem.n,
        k = problem.k,
        world_size,
        tiles = grid.tile_count(),
        "starting benchmark"
    );

    let comm = time_comm(problem, world_size, options)?;
    let overlap = time_overlap(problem, config, world_size, options)?;
    let baseline = time_baseline(problem, config, world_size, options)?;

    Ok(BenchReport {
        m: problem.m,
        n: problem.n,
        k: problem.k,
        tile_count: grid.tile_count(),
        gemm_ms: config.dur,
        comm,
        baseline,
        overlap,
    })
}

//! Benchmarks the overlapped GEMM + all-reduce against the sequential baseline.
//!
//! ```text
//! overlap-bench --m 4096 --n 8192 --k 8192 --config-dir configs --hw a800 --world-size 2
//! ```
//!
//! Set `RUST_LOG=flash_overlap=debug` to follow segment scheduling.

use clap::Parser;
use flash_overlap::config::{BenchOptions, TuningConfig};
use flash_overlap::harness::{Problem, run_benchmark};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rows of A and C.
    #[arg(long, default_value_t = 4096)]
    m: usize,
    /// Rows of B, columns of C.
    #[arg(long, default_value_t = 8192)]
    n: usize,
    /// Shared inner dimension.
    #[arg(long, default_value_t = 8192)]
    k: usize,
    /// Directory holding `m{M}n{N}k{K}_{HW}.json` tuning records.
    #[arg(long, default_value = "configs")]
    config_dir: PathBuf,
    /// Hardware name used in the record file name.
    #[arg(long, default_value = "cpu")]
    hw: String,
    #[arg(long, default_value_t = 2)]
    world_size: usize,
    #[arg(long, default_value_t = 20)]
    warmup: usize,
    /// Timed repetitions per measurement.
    #[arg(long = "reps", default_value_t = 200)]
    repetitions: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let args = Args::parse();

    let outcome = TuningConfig::lookup(&args.config_dir, args.m, args.n, args.k, &args.hw).and_then(|config| {
        let options = BenchOptions::default()
            .with_warmup(args.warmup)
            .with_repetitions(args.repetitions);
        let problem = Problem::<f32>::random(args.m, args.n, args.k, options.seed)?;
        run_benchmark(&problem, &config, args.world_size, &options)
    });

    match outcome {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "benchmark failed");
            ExitCode::FAILURE
        }
    }
}

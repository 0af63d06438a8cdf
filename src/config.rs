//! Tuning records and run options.
//!
//! A tuning record is produced offline per problem size and hardware and stored
//! as JSON:
//!
//! ```json
//! { "BM": 128, "BN": 128, "Algo": 3, "cSeg": [4, 10, 16], "hint": [5, 2], "dur": 1.82 }
//! ```
//!
//! Records are looked up by file name, `m{M}n{N}k{K}_{hw}.json`, inside a
//! configuration directory.

use crate::engine::OverlapPlan;
use crate::error::{OverlapError, Result};
use crate::poll::PollOptions;
use crate::tile::TileGrid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// An offline-tuned configuration for one `(M, N, K, hardware)` problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Tile height.
    #[serde(rename = "BM")]
    pub bm: usize,
    /// Tile width.
    #[serde(rename = "BN")]
    pub bn: usize,
    /// Opaque kernel algorithm selector.
    #[serde(rename = "Algo", default)]
    pub algo: u32,
    /// Cumulative column-group boundaries of the communication segments.
    #[serde(rename = "cSeg")]
    pub segments: Vec<usize>,
    /// Tile ids to compute first, in order.
    #[serde(default)]
    pub hint: Vec<usize>,
    /// Reference GEMM duration in milliseconds, measured while tuning.
    #[serde(default)]
    pub dur: f64,
}

impl TuningConfig {
    /// `dir/m{m}n{n}k{k}_{hw}.json`.
    pub fn path_for(dir: impl AsRef<Path>, m: usize, n: usize, k: usize, hw: &str) -> PathBuf {
        dir.as_ref().join(format!("m{m}n{n}k{k}_{hw}.json"))
    }

    /// Reads and parses the record at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| OverlapError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| OverlapError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(
            path = %path.display(),
            bm = config.bm,
            bn = config.bn,
            segments = config.segments.len(),
            hint = config.hint.len(),
            "loaded tuning config"
        );
        Ok(config)
    }

    /// Looks up the record for a problem in `dir`.
    pub fn lookup(dir: impl AsRef<Path>, m: usize, n: usize, k: usize, hw: &str) -> Result<Self> {
        Self::load(Self::path_for(dir, m, n, k, hw))
    }

    /// Writes the record as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let to_config_error = |reason: String| OverlapError::Config {
            path: path.to_path_buf(),
            reason,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| to_config_error(e.to_string()))?;
        fs::write(path, text).map_err(|e| to_config_error(e.to_string()))
    }

    /// The tile grid this record describes for an `m × n × k` problem.
    pub fn grid(&self, m: usize, n: usize, k: usize) -> Result<TileGrid> {
        TileGrid::new(m, n, k, self.bm, self.bn)
    }

    /// Validates the record against `m × n × k` and precomputes the overlap plan.
    ///
    /// The hint is checked before the segment boundaries.
    pub fn plan(&self, m: usize, n: usize, k: usize) -> Result<OverlapPlan> {
        OverlapPlan::new(self.grid(m, n, k)?, &self.hint, &self.segments)
    }
}

/// Per-run knobs of the overlap engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapOptions {
    /// How segment readiness and stream drains are polled, including the stall timeout.
    pub poll: PollOptions,
    /// Segments whose tiles are issued beyond the one being awaited.
    ///
    /// `0` issues a segment's tiles only once every earlier segment was
    /// communicated. `1` keeps the next segment computing while the current one
    /// is reduced.
    pub issue_ahead: usize,
}

impl Default for OverlapOptions {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            issue_ahead: 1,
        }
    }
}

impl OverlapOptions {
    pub fn with_poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll.timeout = timeout;
        self
    }

    pub fn with_issue_ahead(mut self, issue_ahead: usize) -> Self {
        self.issue_ahead = issue_ahead;
        self
    }
}

/// How ranks are brought up.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Smallest accepted world size.
    pub min_world_size: usize,
    /// Bound on every collective receive.
    pub collective_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            min_world_size: 2,
            collective_timeout: Duration::from_secs(30),
        }
    }
}

impl LaunchOptions {
    pub fn with_min_world_size(mut self, min_world_size: usize) -> Self {
        self.min_world_size = min_world_size;
        self
    }

    pub fn with_collective_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout = timeout;
        self
    }
}

/// Benchmark harness settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchOptions {
    pub warmup: usize,
    pub repetitions: usize,
    /// Seed of the random operands.
    pub seed: u64,
    pub launch: LaunchOptions,
    pub overlap: OverlapOptions,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            warmup: 20,
            repetitions: 200,
            seed: 42,
            launch: LaunchOptions::default(),
            overlap: OverlapOptions::default(),
        }
    }
}

impl BenchOptions {
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_launch(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapOptions) -> Self {
        self.overlap = overlap;
        self
    }
}

//! Mode-dependent configuration table.
//!
//! Mirrors the sibling crates' `configuration::defaults` module: a single
//! place to look when changing a tunable, with every numeric constant
//! frozen here because the surrounding engine's externally-observable
//! behavior depends on it bit-exactly (see the crate's design notes).

use serde::{Deserialize, Serialize};

/// Job-wide safeguard: total retries across all chunks before the job
/// is failed outright.
pub const MAX_TOTAL_RETRIES: u32 = 20;

/// Job-wide safeguard: total auto-splits across all chunks before the
/// job is failed outright.
pub const MAX_SPLITS: u32 = 2;

/// Jobs older than this are reaped regardless of status.
pub const MAX_JOB_AGE_MS: u64 = 2 * 60 * 60 * 1000;

/// How often the reaper sweeps for stale jobs.
pub const CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Number of recent governor outcomes considered for degraded-mode detection.
pub const OUTCOME_WINDOW_SIZE: usize = 20;

/// Enter degraded mode once the rate-limited fraction of the window reaches this.
pub const DEGRADED_ENTER_THRESHOLD: f64 = 0.30;

/// Exit degraded mode once the rate-limited fraction drops below this
/// *and* at least `DEGRADED_MIN_DURATION_MS` has elapsed since entry.
pub const DEGRADED_EXIT_THRESHOLD: f64 = 0.10;

/// Minimum time degraded mode must be held before it can be exited.
pub const DEGRADED_MIN_DURATION_MS: u64 = 30_000;

/// Processing mode — selects every mode-dependent constant below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Balanced,
    BestQuality,
}

/// Backoff shape for a mode: exponential with jitter (balanced) or linear
/// with jitter (best-quality).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// > 1.0 selects exponential backoff (`base * multiplier^(attempt-1)`);
    /// exactly 1.0 selects linear backoff (`base * attempt`).
    pub multiplier: f64,
    /// Symmetric jitter fraction, e.g. 0.30 for ±30%.
    pub jitter: f64,
}

/// The full mode-dependent constant table from the design's mode
/// configuration section.
#[derive(Debug, Clone, Copy)]
pub struct ModeConfig {
    pub mode: ProcessingMode,
    pub chunk_duration_s: f64,
    pub overlap_duration_s: f64,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    pub subchunk_duration_s: f64,
}

const BALANCED: ModeConfig = ModeConfig {
    mode: ProcessingMode::Balanced,
    chunk_duration_s: 180.0,
    overlap_duration_s: 0.0,
    max_concurrency: 4,
    max_retries: 3,
    backoff: BackoffConfig {
        base_delay_ms: 2000,
        max_delay_ms: 10_000,
        multiplier: 2.5,
        jitter: 0.30,
    },
    subchunk_duration_s: 90.0,
};

const BEST_QUALITY: ModeConfig = ModeConfig {
    mode: ProcessingMode::BestQuality,
    chunk_duration_s: 600.0,
    overlap_duration_s: 15.0,
    max_concurrency: 1,
    max_retries: 2,
    backoff: BackoffConfig {
        base_delay_ms: 5000,
        max_delay_ms: 10_000,
        multiplier: 1.0,
        jitter: 0.20,
    },
    subchunk_duration_s: 300.0,
};

impl ProcessingMode {
    /// Look up the compile-time constant table for this mode.
    pub const fn config(self) -> ModeConfig {
        match self {
            ProcessingMode::Balanced => BALANCED,
            ProcessingMode::BestQuality => BEST_QUALITY,
        }
    }
}

//! Rate-Limit Governor (C3) — the single choke point every transcription
//! call passes through. One governor instance per job, sized to the
//! job's `ProcessingMode`.
//!
//! Adapted from the sibling crates' bounded-concurrency pool
//! (`parallel_transcribe_local`'s semaphore-gated fan-out) and retry
//! config (`provider::base::retry`), generalized into a priority-queued
//! dispatcher that can shrink and grow its own concurrency ceiling in
//! response to the outcomes flowing through it.

mod backoff;
mod queue;

pub use queue::{BoxFuture, ExecFn};

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::config::ModeConfig;
use crate::time::now_ms;
use crate::transcribe::TranscribeError;
use crate::types::JobId;
use queue::{QueueEntry, RunOutcome};

/// Errors `enqueue` can return once the governor gives up on a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernorError {
    #[error("job cancelled")]
    JobCancelled,
    #[error("rate limit retry limit exceeded")]
    RateLimitRetriesExceeded,
    #[error(transparent)]
    Failed(#[from] TranscribeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeKind {
    Success,
    RateLimited,
    Failed,
}

/// Cumulative counters and gauges exposed for observability and tests.
#[derive(Debug, Clone, Default)]
pub struct GovernorStats {
    pub total: u64,
    pub successful: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub degraded_activations: u64,
    pub peak_concurrency: usize,
    pub avg_duration_ms: f64,
    pub cumulative_degraded_ms: u64,
}

struct Inner {
    queue: BinaryHeap<QueueEntry>,
    current_concurrency: usize,
    max_concurrency: usize,
    normal_concurrency: usize,
    degraded: bool,
    degraded_since_ms: Option<u64>,
    outcome_window: VecDeque<OutcomeKind>,
    stats: GovernorStats,
}

impl Inner {
    fn record_outcome(&mut self, kind: OutcomeKind, elapsed_ms: u64) {
        self.stats.total += 1;
        match kind {
            OutcomeKind::Success => self.stats.successful += 1,
            OutcomeKind::RateLimited => self.stats.rate_limited += 1,
            OutcomeKind::Failed => self.stats.failed += 1,
        }
        let n = self.stats.total as f64;
        self.stats.avg_duration_ms += (elapsed_ms as f64 - self.stats.avg_duration_ms) / n;

        self.outcome_window.push_back(kind);
        if self.outcome_window.len() > crate::config::OUTCOME_WINDOW_SIZE {
            self.outcome_window.pop_front();
        }
        self.evaluate_degraded_transition();
    }

    fn rate_limited_fraction(&self) -> f64 {
        let rl = self.outcome_window.iter().filter(|k| **k == OutcomeKind::RateLimited).count();
        rl as f64 / crate::config::OUTCOME_WINDOW_SIZE as f64
    }

    fn evaluate_degraded_transition(&mut self) {
        if self.outcome_window.len() < crate::config::OUTCOME_WINDOW_SIZE {
            return;
        }
        let frac = self.rate_limited_fraction();
        if !self.degraded {
            if frac >= crate::config::DEGRADED_ENTER_THRESHOLD {
                self.degraded = true;
                self.degraded_since_ms = Some(now_ms());
                self.stats.degraded_activations += 1;
                self.max_concurrency = (self.normal_concurrency / 2).max(1);
                crate::warn!("governor entering degraded mode: rate-limited fraction {frac:.2}, max_concurrency -> {}", self.max_concurrency);
            }
        } else if frac < crate::config::DEGRADED_EXIT_THRESHOLD {
            let since = self.degraded_since_ms.unwrap_or_else(now_ms);
            if now_ms().saturating_sub(since) >= crate::config::DEGRADED_MIN_DURATION_MS {
                self.stats.cumulative_degraded_ms += now_ms().saturating_sub(since);
                self.degraded = false;
                self.degraded_since_ms = None;
                self.max_concurrency = self.normal_concurrency;
                crate::info!("governor exiting degraded mode, max_concurrency -> {}", self.max_concurrency);
            }
        }
    }
}

/// Per-job rate-limit governor: a bounded-concurrency, priority-ordered
/// dispatcher sitting in front of every call to the injected
/// [`crate::transcribe::Transcribe`] capability.
pub struct RateLimitGovernor {
    state: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    seq: AtomicU64,
    mode: ModeConfig,
    is_cancelled: Arc<dyn Fn(JobId) -> bool + Send + Sync>,
    dispatcher: JoinHandle<()>,
}

impl RateLimitGovernor {
    /// Build a governor sized for `mode`. `is_cancelled` is called by
    /// the dispatch loop before starting any queued request, letting a
    /// cancelled job's backlog drain without running any of it.
    pub fn new(mode: ModeConfig, is_cancelled: Arc<dyn Fn(JobId) -> bool + Send + Sync>) -> Self {
        let state = Arc::new(Mutex::new(Inner {
            queue: BinaryHeap::new(),
            current_concurrency: 0,
            max_concurrency: mode.max_concurrency,
            normal_concurrency: mode.max_concurrency,
            degraded: false,
            degraded_since_ms: None,
            outcome_window: VecDeque::with_capacity(crate::config::OUTCOME_WINDOW_SIZE),
            stats: GovernorStats::default(),
        }));
        let notify = Arc::new(Notify::new());

        let dispatcher = tokio::spawn(Self::run_dispatcher(state.clone(), notify.clone(), is_cancelled.clone()));

        Self { state, notify, seq: AtomicU64::new(0), mode, is_cancelled, dispatcher }
    }

    async fn run_dispatcher(
        state: Arc<Mutex<Inner>>,
        notify: Arc<Notify>,
        is_cancelled: Arc<dyn Fn(JobId) -> bool + Send + Sync>,
    ) {
        loop {
            notify.notified().await;
            loop {
                let entry = {
                    let mut inner = state.lock().unwrap();
                    if inner.current_concurrency >= inner.max_concurrency {
                        break;
                    }
                    match inner.queue.pop() {
                        Some(e) => e,
                        None => break,
                    }
                };

                if is_cancelled(entry.job_id) {
                    let _ = entry.respond_to.send(RunOutcome::Cancelled);
                    continue;
                }

                {
                    let mut inner = state.lock().unwrap();
                    inner.current_concurrency += 1;
                    inner.stats.peak_concurrency = inner.stats.peak_concurrency.max(inner.current_concurrency);
                }

                let state2 = state.clone();
                let notify2 = notify.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = (entry.exec)().await;
                    let elapsed_ms = started.elapsed().as_millis() as u64;

                    let kind = match &result {
                        Ok(_) => OutcomeKind::Success,
                        Err(e) if e.is_rate_limited() => OutcomeKind::RateLimited,
                        Err(_) => OutcomeKind::Failed,
                    };

                    {
                        let mut inner = state2.lock().unwrap();
                        inner.current_concurrency -= 1;
                        inner.record_outcome(kind, elapsed_ms);
                    }
                    notify2.notify_one();

                    let outcome = match result {
                        Ok(text) => RunOutcome::Success(text),
                        Err(e) if e.is_rate_limited() => RunOutcome::RateLimited(e),
                        Err(e) => RunOutcome::Failed(e),
                    };
                    let _ = entry.respond_to.send(outcome);
                });
            }
        }
    }

    /// Submit one transcription attempt. On a rate-limited outcome the
    /// governor itself sleeps out the backoff delay and resubmits with
    /// `priority += 10`, up to `mode.max_retries` attempts, before
    /// giving up and returning [`GovernorError::RateLimitRetriesExceeded`].
    /// Non-rate-limited failures are returned to the caller immediately
    /// without any governor-level retry.
    pub async fn enqueue(
        &self,
        job_id: JobId,
        chunk_index: usize,
        priority: i64,
        exec: ExecFn,
    ) -> Result<String, GovernorError> {
        let mut attempt: u32 = 1;
        let mut current_priority = priority;

        loop {
            if (self.is_cancelled)(job_id) {
                return Err(GovernorError::JobCancelled);
            }

            let (tx, rx) = oneshot::channel();
            let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            {
                let mut inner = self.state.lock().unwrap();
                inner.queue.push(QueueEntry {
                    seq,
                    priority: current_priority,
                    job_id,
                    chunk_index,
                    exec: exec.clone(),
                    respond_to: tx,
                });
            }
            self.notify.notify_one();

            let outcome = rx.await.unwrap_or(RunOutcome::Cancelled);
            match outcome {
                RunOutcome::Success(text) => return Ok(text),
                RunOutcome::Cancelled => return Err(GovernorError::JobCancelled),
                RunOutcome::Failed(e) => return Err(GovernorError::Failed(e)),
                RunOutcome::RateLimited(e) => {
                    if attempt < self.mode.max_retries {
                        let delay = backoff::delay_for_attempt(self.mode.backoff, attempt);
                        crate::verbose!(
                            "job {job_id} chunk {chunk_index} rate limited, retrying in {}ms (attempt {attempt})",
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        current_priority += 10;
                        continue;
                    }
                    let _ = e;
                    return Err(GovernorError::RateLimitRetriesExceeded);
                }
            }
        }
    }

    pub fn stats(&self) -> GovernorStats {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn is_degraded(&self) -> bool {
        self.state.lock().unwrap().degraded
    }

    pub fn current_max_concurrency(&self) -> usize {
        self.state.lock().unwrap().max_concurrency
    }
}

impl Drop for RateLimitGovernor {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

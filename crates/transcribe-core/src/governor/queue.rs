//! Priority queue entry for the governor's dispatch loop.
//!
//! A max-heap over `(priority, seq)`: higher priority drains first, and
//! equal-priority entries drain in submission order (smaller `seq` wins
//! the tie). `seq` is assigned by an `AtomicU64` counter owned by the
//! governor, not derived from wall-clock time.

use std::cmp::Ordering;

pub use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::transcribe::TranscribeError;
use crate::types::JobId;

/// A callable that performs one transcription attempt. `Fn`, not
/// `FnOnce`, because the governor's internal rate-limit retry loop
/// invokes it again for each attempt.
pub type ExecFn = std::sync::Arc<dyn Fn() -> BoxFuture<'static, Result<String, TranscribeError>> + Send + Sync>;

/// The outcome of running one queue entry's `exec`, sent back to the
/// `enqueue` caller over a oneshot channel.
pub enum RunOutcome {
    Success(String),
    RateLimited(TranscribeError),
    Failed(TranscribeError),
    Cancelled,
}

pub struct QueueEntry {
    pub seq: u64,
    pub priority: i64,
    pub job_id: JobId,
    pub chunk_index: usize,
    pub exec: ExecFn,
    pub respond_to: oneshot::Sender<RunOutcome>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; on a tie, the entry submitted earlier
        // (smaller seq) must compare greater so a max-heap pops it first.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

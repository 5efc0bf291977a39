//! Unified error types for transcribe-core.
//!
//! Hierarchical, `thiserror`-based, mirroring the sibling crates'
//! `WhisError` / `AudioError` / `ProviderError` split: one enum per
//! concern, aggregated into a single top-level `EngineError` with
//! `#[from]` conversions so call sites can use `?` freely.
//!
//! ```text
//! EngineError
//!   ├── Media(MediaError)           - probe/extract/hash failures
//!   ├── Transcribe(TranscribeError) - provider call failures
//!   ├── Job(JobError)               - lifecycle/safeguard failures
//!   └── Io(std::io::Error)          - generic I/O
//! ```

pub use crate::media::MediaError;
pub use crate::transcribe::TranscribeError;
use crate::types::JobId;

/// Errors raised by the Job Lifecycle Manager, the Chunk Processor's
/// safeguard checks, and the Transcript Assembler's contract checks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("chunk index {index} out of range (0..{total})")]
    InvalidChunkIndex { index: usize, total: usize },

    #[error("chunk count mismatch: {descriptors} descriptors vs {texts} texts")]
    ChunkCountMismatch { descriptors: usize, texts: usize },

    #[error("job cancelled")]
    Cancelled,

    #[error("failed to probe audio duration: {0}")]
    ProbeAudio(String),

    #[error("failed to extract audio chunk: {0}")]
    ExtractChunk(String),

    #[error("sub-chunk {sub_index} of chunk {chunk_index} failed: {cause}")]
    SubChunkFailed { chunk_index: usize, sub_index: usize, cause: String },

    #[error("Maximum auto-splits (2) exceeded for job")]
    MaxSplitsExceeded,

    #[error("Maximum total retries (20) exceeded for job")]
    MaxRetriesExceeded,

    #[error("rate limit retry limit exceeded")]
    RateLimitRetriesExceeded,
}

/// Chunking-time media failures are fatal to the job; `ProbeFailed`
/// becomes `ProbeAudio`, every other `MediaError` variant becomes
/// `ExtractChunk` (hashing happens immediately after extraction in the
/// chunker, so a hash failure is reported the same way a caller of
/// `chunk_audio` would diagnose it: something about producing this
/// chunk file went wrong).
impl From<MediaError> for JobError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::ProbeFailed(_) => JobError::ProbeAudio(err.to_string()),
            other => JobError::ExtractChunk(other.to_string()),
        }
    }
}

/// Top-level error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("transcribe error: {0}")]
    Transcribe(#[from] TranscribeError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(err.to_string())
    }
}

/// Convenience result type using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

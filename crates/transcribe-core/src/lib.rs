// Domain modules (organized by concern)
pub mod chunker;
pub mod governor;
pub mod manager;
pub mod media;
pub mod processor;
pub mod transcribe;

// Shared data model and utility modules
pub mod assembler;
pub mod config;
pub mod error;
pub mod fsguard;
pub mod time;
pub mod types;
pub mod verbose;

// Re-export the data model
pub use types::{
    ChunkDescriptor, ChunkStatus, ChunkStatusKind, ChunkStatusPatch, JobConfig, JobId, JobMetadata, JobStatus,
    StatusMetadata, StatusResponse, TranscriptionJob,
};

// Re-export configuration
pub use config::{
    BackoffConfig, ModeConfig, ProcessingMode, DEGRADED_ENTER_THRESHOLD, DEGRADED_EXIT_THRESHOLD,
    DEGRADED_MIN_DURATION_MS, MAX_JOB_AGE_MS, MAX_SPLITS, MAX_TOTAL_RETRIES, OUTCOME_WINDOW_SIZE,
};

// Re-export the core pipeline
pub use assembler::assemble;
pub use chunker::{chunk_audio, ChunkingResult};
pub use governor::{GovernorError, GovernorStats, RateLimitGovernor};
pub use manager::JobManager;
pub use media::{FfmpegMediaTool, MediaError, MediaTool};
pub use processor::{process_chunk, JobAccess};
pub use transcribe::{Transcribe, TranscribeError, TranscribeFn};

// Re-export error types
pub use error::{EngineError, JobError, Result};

pub use verbose::set_verbose;

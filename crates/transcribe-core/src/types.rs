//! Shared data model: chunk descriptors, job/chunk status, and the
//! externally-observable status response shape.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ProcessingMode;

/// Opaque job identifier.
pub type JobId = Uuid;

/// A contiguous audio range extracted as its own file for independent
/// transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub path: PathBuf,
    pub content_hash: String,
    pub has_overlap: bool,
    /// Only set when `has_overlap` is true.
    pub overlap_start_s: Option<f64>,
}

/// Per-chunk processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatusKind {
    Pending,
    InProgress,
    Retrying,
    Splitting,
    Completed,
    Failed,
}

impl Default for ChunkStatusKind {
    fn default() -> Self {
        ChunkStatusKind::Pending
    }
}

impl ChunkStatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatusKind::Completed | ChunkStatusKind::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStatus {
    pub status: ChunkStatusKind,
    pub retry_count: u32,
    pub was_split: bool,
    pub last_updated_ms: u64,
    pub transcript: Option<String>,
    pub error: Option<String>,
}

impl ChunkStatus {
    pub fn pending() -> Self {
        Self {
            status: ChunkStatusKind::Pending,
            last_updated_ms: crate::time::now_ms(),
            ..Default::default()
        }
    }
}

/// A partial update applied to a chunk's status by
/// `JobManager::update_chunk_status`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChunkStatusPatch {
    pub status: Option<ChunkStatusKind>,
    pub retry_count: Option<u32>,
    pub was_split: Option<bool>,
    pub transcript: Option<String>,
    pub error: Option<String>,
}

impl ChunkStatusPatch {
    pub fn status(status: ChunkStatusKind) -> Self {
        Self { status: Some(status), ..Default::default() }
    }
}

/// Overall job state. Terminal states are `Completed`, `Failed`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Chunking,
    Transcribing,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Per-job configuration record, supplied by the host at submit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub mode: ProcessingMode,
    pub model: String,
    pub api_credential_handle: String,
    /// "auto" or absent means the provider auto-detects.
    pub language: Option<String>,
    pub temperature: Option<f32>,
    pub prompt: Option<String>,
    pub user_id: Option<String>,
    pub should_meter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub filename: String,
    pub size_bytes: u64,
    pub duration_s: f64,
    pub total_chunks: usize,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub processing_time_ms: Option<u64>,
}

/// A transcription job record, owned exclusively by the `JobManager`.
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub id: JobId,
    pub owner_id: Option<String>,
    pub config: JobConfig,
    pub metadata: JobMetadata,
    pub chunks: Vec<ChunkDescriptor>,
    pub chunk_statuses: Vec<ChunkStatus>,
    pub status: JobStatus,
    pub progress: u8,
    pub completed_chunks: usize,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub total_retries: u32,
    pub auto_splits: u32,
    pub last_updated_ms: u64,
}

impl TranscriptionJob {
    /// Recompute `completed_chunks` and `progress` from `chunk_statuses`.
    /// Called after every chunk-status mutation.
    pub fn recompute_progress(&mut self) {
        self.completed_chunks = self
            .chunk_statuses
            .iter()
            .filter(|s| s.status == ChunkStatusKind::Completed)
            .count();
        self.progress = if self.metadata.total_chunks > 0 {
            ((self.completed_chunks as f64 / self.metadata.total_chunks as f64) * 100.0).floor() as u8
        } else {
            0
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMetadata {
    pub filename: String,
    pub duration_s: f64,
    pub mode: ProcessingMode,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

/// The shape returned by `JobManager::get_status_response`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub metadata: StatusMetadata,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub estimated_time_remaining_seconds: Option<u64>,
}

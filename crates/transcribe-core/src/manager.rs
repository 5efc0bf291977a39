//! Job Lifecycle Manager (C6) — the single owner of all `TranscriptionJob`
//! records and the orchestration entrypoint that drives one job through
//! chunking, governed concurrent transcription, and assembly.
//!
//! Adapted from the sibling crates' pattern of a long-lived async-guarded
//! registry plus a periodic background sweep (seen there for device/session
//! bookkeeping), generalized into the job registry this engine needs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::assembler::assemble;
use crate::chunker::chunk_audio;
use crate::config::{ProcessingMode, CLEANUP_INTERVAL_MS, MAX_JOB_AGE_MS};
use crate::error::JobError;
use crate::governor::RateLimitGovernor;
use crate::media::MediaTool;
use crate::processor::{process_chunk, JobAccess};
use crate::time::now_ms;
use crate::transcribe::Transcribe;
use crate::types::{
    ChunkStatusKind, ChunkStatusPatch, JobConfig, JobId, JobMetadata, JobStatus, StatusMetadata, StatusResponse,
    TranscriptionJob,
};

pub struct JobManager {
    jobs: RwLock<HashMap<JobId, TranscriptionJob>>,
    cancelled: Arc<std::sync::RwLock<HashSet<JobId>>>,
    governors: tokio::sync::Mutex<HashMap<JobId, Arc<RateLimitGovernor>>>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// Build a manager and start its background reaper, which sweeps
    /// every [`CLEANUP_INTERVAL_MS`] for jobs older than [`MAX_JOB_AGE_MS`],
    /// removing them regardless of status.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<JobManager>| {
            let weak_for_reaper = weak.clone();
            let reaper = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(CLEANUP_INTERVAL_MS)).await;
                    let Some(mgr) = weak_for_reaper.upgrade() else { break };
                    mgr.reap_stale_jobs().await;
                }
            });
            JobManager {
                jobs: RwLock::new(HashMap::new()),
                cancelled: Arc::new(std::sync::RwLock::new(HashSet::new())),
                governors: tokio::sync::Mutex::new(HashMap::new()),
                reaper: std::sync::Mutex::new(Some(reaper)),
            }
        })
    }

    async fn reap_stale_jobs(&self) {
        let now = now_ms();
        let stale: Vec<JobId> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .filter(|(_, job)| now.saturating_sub(job.metadata.created_at_ms) >= MAX_JOB_AGE_MS)
                .map(|(id, _)| *id)
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        {
            let mut jobs = self.jobs.write().await;
            for id in &stale {
                jobs.remove(id);
            }
        }
        {
            let mut cancelled = self.cancelled.write().unwrap();
            for id in &stale {
                cancelled.remove(id);
            }
        }
        {
            let mut governors = self.governors.lock().await;
            for id in &stale {
                governors.remove(id);
            }
        }
        crate::info!("reaper removed {} stale job(s)", stale.len());
    }

    /// Stop the background reaper. Does not touch job records.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn create_job(&self, owner_id: Option<String>, config: JobConfig, filename: String, size_bytes: u64) -> TranscriptionJob {
        let id = uuid::Uuid::new_v4();
        let now = now_ms();
        let job = TranscriptionJob {
            id,
            owner_id,
            config,
            metadata: JobMetadata {
                filename,
                size_bytes,
                duration_s: 0.0,
                total_chunks: 0,
                created_at_ms: now,
                completed_at_ms: None,
                processing_time_ms: None,
            },
            chunks: Vec::new(),
            chunk_statuses: Vec::new(),
            status: JobStatus::Pending,
            progress: 0,
            completed_chunks: 0,
            transcript: None,
            error: None,
            total_retries: 0,
            auto_splits: 0,
            last_updated_ms: now,
        };
        self.jobs.write().await.insert(id, job.clone());
        job
    }

    pub async fn initialize_chunks(&self, job_id: JobId, chunks: Vec<crate::types::ChunkDescriptor>) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
        job.metadata.total_chunks = chunks.len();
        job.chunk_statuses = vec![crate::types::ChunkStatus::pending(); chunks.len()];
        job.chunks = chunks;
        job.last_updated_ms = now_ms();
        Ok(())
    }

    pub async fn get_job(&self, job_id: JobId) -> Option<TranscriptionJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn update_job_status(&self, job_id: JobId, status: JobStatus, error: Option<String>) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
        job.status = status;
        if error.is_some() {
            job.error = error;
        }
        job.last_updated_ms = now_ms();
        if status.is_terminal() {
            let now = now_ms();
            job.metadata.completed_at_ms = Some(now);
            job.metadata.processing_time_ms = Some(now.saturating_sub(job.metadata.created_at_ms));
        }
        Ok(())
    }

    pub async fn update_chunk_status(&self, job_id: JobId, index: usize, patch: ChunkStatusPatch) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
        let total = job.chunk_statuses.len();
        let chunk_status = job
            .chunk_statuses
            .get_mut(index)
            .ok_or(JobError::InvalidChunkIndex { index, total })?;

        if let Some(status) = patch.status {
            chunk_status.status = status;
        }
        if let Some(retry_count) = patch.retry_count {
            chunk_status.retry_count = retry_count;
        }
        if let Some(was_split) = patch.was_split {
            chunk_status.was_split = was_split;
        }
        if let Some(transcript) = patch.transcript {
            chunk_status.transcript = Some(transcript);
        }
        if let Some(error) = patch.error {
            chunk_status.error = Some(error);
        }
        chunk_status.last_updated_ms = now_ms();

        job.recompute_progress();
        job.last_updated_ms = now_ms();
        Ok(())
    }

    pub async fn set_transcript(&self, job_id: JobId, text: String) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
        job.transcript = Some(text);
        Ok(())
    }

    pub async fn get_status_response(&self, job_id: JobId) -> Option<StatusResponse> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&job_id)?;

        let estimated_time_remaining_seconds = if job.status == JobStatus::Transcribing && job.completed_chunks > 0 {
            let now = now_ms();
            let elapsed_ms = now.saturating_sub(job.metadata.created_at_ms) as f64;
            let per_chunk_ms = elapsed_ms / job.completed_chunks as f64;
            let remaining_chunks = (job.metadata.total_chunks - job.completed_chunks) as f64;
            Some((per_chunk_ms * remaining_chunks / 1000.0).ceil() as u64)
        } else {
            None
        };

        Some(StatusResponse {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            completed_chunks: job.completed_chunks,
            total_chunks: job.metadata.total_chunks,
            metadata: StatusMetadata {
                filename: job.metadata.filename.clone(),
                duration_s: job.metadata.duration_s,
                mode: job.config.mode,
                created_at_ms: job.metadata.created_at_ms,
                completed_at_ms: job.metadata.completed_at_ms,
            },
            transcript: job.transcript.clone(),
            error: job.error.clone(),
            estimated_time_remaining_seconds,
        })
    }

    /// `true` if `job.owner_id == user_id`, and also `true` when
    /// `job.owner_id` is unset — jobs created before ownership tracking
    /// existed remain accessible to anyone.
    pub async fn validate_ownership(&self, job_id: JobId, user_id: Option<&str>) -> bool {
        match self.jobs.read().await.get(&job_id) {
            Some(job) => match &job.owner_id {
                None => true,
                Some(owner) => Some(owner.as_str()) == user_id,
            },
            None => false,
        }
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
            job.status = JobStatus::Cancelled;
            job.last_updated_ms = now_ms();
        }
        self.cancelled.write().unwrap().insert(job_id);
        Ok(())
    }

    pub async fn delete_job(&self, job_id: JobId) {
        self.jobs.write().await.remove(&job_id);
        self.cancelled.write().unwrap().remove(&job_id);
        self.governors.lock().await.remove(&job_id);
    }

    /// Test/host hook: drop every job record.
    pub async fn clear_all(&self) {
        self.jobs.write().await.clear();
        self.cancelled.write().unwrap().clear();
        self.governors.lock().await.clear();
    }

    fn is_job_cancelled_sync(&self, job_id: JobId) -> bool {
        self.cancelled.read().unwrap().contains(&job_id)
    }

    /// Orchestration entrypoint: chunk, transcribe every chunk under the
    /// governor, assemble, and record the final status. Intended to be
    /// spawned as a background task rather than awaited inline, so that
    /// `submit` can return as soon as the job record exists.
    pub async fn run_job(
        self: &Arc<Self>,
        job_id: JobId,
        filename: String,
        audio_bytes: Vec<u8>,
        scratch_dir: PathBuf,
        media: Arc<dyn MediaTool>,
        transcribe: Arc<dyn Transcribe>,
    ) {
        if let Err(e) = self.run_job_inner(job_id, filename, audio_bytes, &scratch_dir, media, transcribe).await {
            if !matches!(e, JobError::Cancelled) {
                crate::error!("job {job_id} failed: {e}");
                let _ = self.update_job_status(job_id, JobStatus::Failed, Some(e.to_string())).await;
            }
        }
        self.governors.lock().await.remove(&job_id);
    }

    async fn run_job_inner(
        self: &Arc<Self>,
        job_id: JobId,
        filename: String,
        audio_bytes: Vec<u8>,
        scratch_dir: &Path,
        media: Arc<dyn MediaTool>,
        transcribe: Arc<dyn Transcribe>,
    ) -> Result<(), JobError> {
        let mode = self.get_job(job_id).await.ok_or(JobError::NotFound(job_id))?.config.mode;

        self.update_job_status(job_id, JobStatus::Chunking, None).await?;
        let chunking = chunk_audio(media.as_ref(), scratch_dir, job_id, &filename, &audio_bytes, mode).await?;

        self.initialize_chunks(job_id, chunking.chunks.clone()).await?;
        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                job.metadata.duration_s = chunking.total_duration_s;
            }
        }

        if self.is_job_cancelled_sync(job_id) {
            return Err(JobError::Cancelled);
        }

        self.update_job_status(job_id, JobStatus::Transcribing, None).await?;

        let cancelled = self.cancelled.clone();
        let is_cancelled: Arc<dyn Fn(JobId) -> bool + Send + Sync> = Arc::new(move |id| cancelled.read().unwrap().contains(&id));
        let governor = Arc::new(RateLimitGovernor::new(mode.config(), is_cancelled));
        self.governors.lock().await.insert(job_id, governor.clone());

        let futures = chunking.chunks.iter().map(|chunk| {
            let manager = self.clone();
            let governor = governor.clone();
            let media = media.clone();
            let transcribe = transcribe.clone();
            let chunk = chunk.clone();
            let scratch_dir = scratch_dir.to_path_buf();
            async move {
                process_chunk(manager.as_ref(), governor.as_ref(), media.as_ref(), transcribe, &scratch_dir, job_id, mode.config(), &chunk)
                    .await
                    .map(|text| (chunk.index, text))
            }
        });

        let results = futures_util::future::join_all(futures).await;

        if self.is_job_cancelled_sync(job_id) {
            return Err(JobError::Cancelled);
        }

        let mut texts_by_index = vec![String::new(); chunking.chunks.len()];
        for result in results {
            let (index, text) = result?;
            texts_by_index[index] = text;
        }

        self.update_job_status(job_id, JobStatus::Assembling, None).await?;
        let transcript = assemble(&chunking.chunks, &texts_by_index, mode)?;
        self.set_transcript(job_id, transcript).await?;
        self.update_job_status(job_id, JobStatus::Completed, None).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobAccess for JobManager {
    async fn config(&self, job_id: JobId) -> Option<JobConfig> {
        self.jobs.read().await.get(&job_id).map(|j| j.config.clone())
    }

    async fn is_cancelled(&self, job_id: JobId) -> bool {
        self.is_job_cancelled_sync(job_id)
    }

    async fn patch_chunk(&self, job_id: JobId, chunk_index: usize, patch: ChunkStatusPatch) {
        if let Err(e) = self.update_chunk_status(job_id, chunk_index, patch).await {
            crate::warn!("failed to patch chunk {chunk_index} of job {job_id}: {e}");
        }
    }

    async fn total_retries(&self, job_id: JobId) -> u32 {
        self.jobs.read().await.get(&job_id).map(|j| j.total_retries).unwrap_or(0)
    }

    async fn auto_splits(&self, job_id: JobId) -> u32 {
        self.jobs.read().await.get(&job_id).map(|j| j.auto_splits).unwrap_or(0)
    }

    async fn increment_total_retries(&self, job_id: JobId) -> u32 {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) => {
                job.total_retries += 1;
                job.total_retries
            }
            None => 0,
        }
    }

    async fn increment_auto_splits(&self, job_id: JobId) -> u32 {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) => {
                job.auto_splits += 1;
                job.auto_splits
            }
            None => 0,
        }
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager").finish_non_exhaustive()
    }
}

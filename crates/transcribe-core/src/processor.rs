//! Chunk Processor (C4) — drives one chunk descriptor through the
//! retry loop and, if retries are exhausted, the auto-split fallback.
//!
//! Adapted from the sibling crates' `parallel_transcribe_local` retry
//! wrapper, generalized so retries flow through the governor's queue
//! rather than a bare semaphore permit, and extended with the
//! recursive-once auto-split fallback this engine's mode table allows.

use std::path::Path;
use std::sync::Arc;

use crate::chunker::subchunk_path;
use crate::config::{ModeConfig, MAX_SPLITS, MAX_TOTAL_RETRIES};
use crate::error::JobError;
use crate::fsguard::remove_file_logged;
use crate::governor::{ExecFn, GovernorError, RateLimitGovernor};
use crate::media::MediaTool;
use crate::transcribe::Transcribe;
use crate::types::{ChunkDescriptor, ChunkStatusKind, ChunkStatusPatch, JobConfig, JobId};

/// Narrow view into the job state the processor needs, satisfied by
/// `crate::manager::JobManager`. Kept as a trait so the processor can
/// be unit-tested without a full job manager in the loop.
#[async_trait::async_trait]
pub trait JobAccess: Send + Sync {
    async fn config(&self, job_id: JobId) -> Option<JobConfig>;
    async fn is_cancelled(&self, job_id: JobId) -> bool;
    async fn patch_chunk(&self, job_id: JobId, chunk_index: usize, patch: ChunkStatusPatch);
    async fn total_retries(&self, job_id: JobId) -> u32;
    async fn auto_splits(&self, job_id: JobId) -> u32;
    async fn increment_total_retries(&self, job_id: JobId) -> u32;
    async fn increment_auto_splits(&self, job_id: JobId) -> u32;
}

fn exec_for(transcribe: Arc<dyn Transcribe>, path: std::path::PathBuf, cfg: JobConfig) -> ExecFn {
    Arc::new(move || {
        let transcribe = transcribe.clone();
        let path = path.clone();
        let cfg = cfg.clone();
        Box::pin(async move { transcribe.transcribe(&path, &cfg).await })
    })
}

/// Process one chunk end-to-end: retry loop, then auto-split if the
/// retry budget is exhausted. Returns the chunk's final transcript text.
pub async fn process_chunk(
    job_access: &dyn JobAccess,
    governor: &RateLimitGovernor,
    media: &dyn MediaTool,
    transcribe: Arc<dyn Transcribe>,
    scratch_dir: &Path,
    job_id: JobId,
    mode: ModeConfig,
    chunk: &ChunkDescriptor,
) -> Result<String, JobError> {
    let cfg = job_access.config(job_id).await.ok_or(JobError::NotFound(job_id))?;

    for attempt in 1..=mode.max_retries {
        if job_access.is_cancelled(job_id).await {
            return Err(JobError::Cancelled);
        }

        job_access
            .patch_chunk(
                job_id,
                chunk.index,
                ChunkStatusPatch {
                    status: Some(if attempt == 1 { ChunkStatusKind::InProgress } else { ChunkStatusKind::Retrying }),
                    retry_count: Some(attempt - 1),
                    ..Default::default()
                },
            )
            .await;

        let exec = exec_for(transcribe.clone(), chunk.path.clone(), cfg.clone());
        let result = governor.enqueue(job_id, chunk.index, chunk.index as i64, exec).await;

        if job_access.is_cancelled(job_id).await {
            return Err(JobError::Cancelled);
        }

        match result {
            Ok(text) => {
                job_access
                    .patch_chunk(
                        job_id,
                        chunk.index,
                        ChunkStatusPatch {
                            status: Some(ChunkStatusKind::Completed),
                            transcript: Some(text.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                return Ok(text);
            }
            Err(GovernorError::JobCancelled) => return Err(JobError::Cancelled),
            Err(e) => {
                crate::warn!("job {job_id} chunk {} attempt {attempt} failed: {e}", chunk.index);
                let total = job_access.increment_total_retries(job_id).await;
                if total >= MAX_TOTAL_RETRIES {
                    job_access
                        .patch_chunk(
                            job_id,
                            chunk.index,
                            ChunkStatusPatch { status: Some(ChunkStatusKind::Failed), error: Some(e.to_string()), ..Default::default() },
                        )
                        .await;
                    return Err(JobError::MaxRetriesExceeded);
                }
            }
        }
    }

    auto_split(job_access, governor, media, transcribe, scratch_dir, job_id, mode, chunk).await
}

/// Split an exhausted chunk into `subchunk_duration_s`-sized pieces and
/// transcribe each once, sequentially, joining the results with a
/// single space. Sub-chunks are never themselves retried or split.
async fn auto_split(
    job_access: &dyn JobAccess,
    governor: &RateLimitGovernor,
    media: &dyn MediaTool,
    transcribe: Arc<dyn Transcribe>,
    scratch_dir: &Path,
    job_id: JobId,
    mode: ModeConfig,
    chunk: &ChunkDescriptor,
) -> Result<String, JobError> {
    if job_access.auto_splits(job_id).await >= MAX_SPLITS {
        job_access
            .patch_chunk(
                job_id,
                chunk.index,
                ChunkStatusPatch { status: Some(ChunkStatusKind::Failed), error: Some("max auto-splits exceeded".into()), ..Default::default() },
            )
            .await;
        return Err(JobError::MaxSplitsExceeded);
    }
    if job_access.total_retries(job_id).await >= MAX_TOTAL_RETRIES {
        job_access
            .patch_chunk(
                job_id,
                chunk.index,
                ChunkStatusPatch { status: Some(ChunkStatusKind::Failed), error: Some("max total retries exceeded".into()), ..Default::default() },
            )
            .await;
        return Err(JobError::MaxRetriesExceeded);
    }

    job_access.increment_auto_splits(job_id).await;
    job_access
        .patch_chunk(job_id, chunk.index, ChunkStatusPatch { status: Some(ChunkStatusKind::Splitting), was_split: Some(true), ..Default::default() })
        .await;

    let cfg = job_access.config(job_id).await.ok_or(JobError::NotFound(job_id))?;
    let sub_len = mode.subchunk_duration_s;
    let mut sub_paths = Vec::new();
    let mut texts = Vec::new();

    let mut start = chunk.start_s;
    let mut sub_index = 0usize;
    let outcome: Result<(), JobError> = loop {
        if start >= chunk.end_s {
            break Ok(());
        }
        if job_access.is_cancelled(job_id).await {
            break Err(JobError::Cancelled);
        }

        let end = (start + sub_len).min(chunk.end_s);
        let sub_path = subchunk_path(scratch_dir, job_id, chunk.index, sub_index);
        if let Err(e) = media.extract(&chunk.path, start - chunk.start_s, end - start, &sub_path).await {
            break Err(JobError::SubChunkFailed { chunk_index: chunk.index, sub_index, cause: e.to_string() });
        }
        sub_paths.push(sub_path.clone());

        let exec = exec_for(transcribe.clone(), sub_path, cfg.clone());
        let priority = 1000 + chunk.index as i64;
        match governor.enqueue(job_id, chunk.index, priority, exec).await {
            Ok(text) => texts.push(text),
            Err(e) => break Err(JobError::SubChunkFailed { chunk_index: chunk.index, sub_index, cause: e.to_string() }),
        }
        let total = job_access.increment_total_retries(job_id).await;
        if total >= MAX_TOTAL_RETRIES && end < chunk.end_s {
            break Err(JobError::MaxRetriesExceeded);
        }

        start = end;
        sub_index += 1;
    };

    for path in &sub_paths {
        remove_file_logged(path);
    }

    match outcome {
        Ok(()) => {
            let joined = texts.join(" ");
            job_access
                .patch_chunk(
                    job_id,
                    chunk.index,
                    ChunkStatusPatch { status: Some(ChunkStatusKind::Completed), transcript: Some(joined.clone()), ..Default::default() },
                )
                .await;
            Ok(joined)
        }
        Err(e) => {
            job_access
                .patch_chunk(job_id, chunk.index, ChunkStatusPatch { status: Some(ChunkStatusKind::Failed), error: Some(e.to_string()), ..Default::default() })
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;
    use crate::media::FakeMediaTool;
    use crate::transcribe::TranscribeError;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeJobAccess {
        cfg: JobConfig,
        cancelled: StdMutex<bool>,
        total_retries: StdMutex<u32>,
        auto_splits: StdMutex<u32>,
        patches: StdMutex<HashMap<usize, Vec<ChunkStatusPatch>>>,
    }

    impl FakeJobAccess {
        fn new() -> Self {
            Self {
                cfg: JobConfig {
                    mode: ProcessingMode::Balanced,
                    model: "whisper-1".into(),
                    api_credential_handle: "handle".into(),
                    language: None,
                    temperature: None,
                    prompt: None,
                    user_id: None,
                    should_meter: false,
                },
                cancelled: StdMutex::new(false),
                total_retries: StdMutex::new(0),
                auto_splits: StdMutex::new(0),
                patches: StdMutex::new(HashMap::new()),
            }
        }

        fn last_status(&self, index: usize) -> Option<ChunkStatusKind> {
            self.patches.lock().unwrap().get(&index)?.last()?.status
        }
    }

    #[async_trait::async_trait]
    impl JobAccess for FakeJobAccess {
        async fn config(&self, _job_id: JobId) -> Option<JobConfig> {
            Some(self.cfg.clone())
        }
        async fn is_cancelled(&self, _job_id: JobId) -> bool {
            *self.cancelled.lock().unwrap()
        }
        async fn patch_chunk(&self, _job_id: JobId, chunk_index: usize, patch: ChunkStatusPatch) {
            self.patches.lock().unwrap().entry(chunk_index).or_default().push(patch);
        }
        async fn total_retries(&self, _job_id: JobId) -> u32 {
            *self.total_retries.lock().unwrap()
        }
        async fn auto_splits(&self, _job_id: JobId) -> u32 {
            *self.auto_splits.lock().unwrap()
        }
        async fn increment_total_retries(&self, _job_id: JobId) -> u32 {
            let mut r = self.total_retries.lock().unwrap();
            *r += 1;
            *r
        }
        async fn increment_auto_splits(&self, _job_id: JobId) -> u32 {
            let mut r = self.auto_splits.lock().unwrap();
            *r += 1;
            *r
        }
    }

    fn chunk(index: usize, start_s: f64, end_s: f64) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            start_s,
            end_s,
            duration_s: end_s - start_s,
            path: std::path::PathBuf::from(format!("/tmp/chunk_{index}.mp3")),
            content_hash: "hash".into(),
            has_overlap: false,
            overlap_start_s: None,
        }
    }

    fn never_cancelled() -> Arc<dyn Fn(JobId) -> bool + Send + Sync> {
        Arc::new(|_| false)
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let access = FakeJobAccess::new();
        let governor = RateLimitGovernor::new(ProcessingMode::Balanced.config(), never_cancelled());
        let media = FakeMediaTool::with_duration(180.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(|_p: &Path, _c: &JobConfig| async { Ok("hi".to_string()) }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 180.0);

        let text = process_chunk(&access, &governor, &media, transcribe, dir.path(), job_id, ProcessingMode::Balanced.config(), &c)
            .await
            .unwrap();
        assert_eq!(text, "hi");
        assert_eq!(access.last_status(0), Some(ChunkStatusKind::Completed));
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_counts_retries() {
        let access = FakeJobAccess::new();
        let governor = RateLimitGovernor::new(ProcessingMode::Balanced.config(), never_cancelled());
        let media = FakeMediaTool::with_duration(180.0);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(move |_p: &Path, _c: &JobConfig| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(TranscribeError::fatal("flaky"))
                } else {
                    Ok("recovered".to_string())
                }
            }
        }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 180.0);

        let text = process_chunk(&access, &governor, &media, transcribe, dir.path(), job_id, ProcessingMode::Balanced.config(), &c)
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(*access.total_retries.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_trigger_auto_split() {
        let access = FakeJobAccess::new();
        let mode = ProcessingMode::BestQuality.config(); // max_retries = 2, subchunk_duration_s = 300
        let governor = RateLimitGovernor::new(mode, never_cancelled());
        let media = FakeMediaTool::with_duration(600.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(move |p: &Path, _c: &JobConfig| {
            let is_subchunk = p.to_string_lossy().contains("subchunk");
            async move {
                if is_subchunk {
                    Ok("sub".to_string())
                } else {
                    Err(TranscribeError::fatal("always fails at chunk level"))
                }
            }
        }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 600.0);

        let text = process_chunk(&access, &governor, &media, transcribe, dir.path(), job_id, mode, &c).await.unwrap();
        assert_eq!(text, "sub sub");
        assert_eq!(*access.auto_splits.lock().unwrap(), 1);
        assert_eq!(access.last_status(0), Some(ChunkStatusKind::Completed));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_first_attempt() {
        let access = FakeJobAccess::new();
        *access.cancelled.lock().unwrap() = true;
        let governor = RateLimitGovernor::new(ProcessingMode::Balanced.config(), Arc::new(|_| true));
        let media = FakeMediaTool::with_duration(180.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(|_p: &Path, _c: &JobConfig| async { Ok("hi".to_string()) }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 180.0);

        let result = process_chunk(&access, &governor, &media, transcribe, dir.path(), job_id, ProcessingMode::Balanced.config(), &c).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
    }

    #[tokio::test]
    async fn auto_split_refuses_past_max_splits_without_overshoot() {
        let access = FakeJobAccess::new();
        *access.auto_splits.lock().unwrap() = MAX_SPLITS;
        let mode = ProcessingMode::BestQuality.config();
        let governor = RateLimitGovernor::new(mode, never_cancelled());
        let media = FakeMediaTool::with_duration(600.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(|_p: &Path, _c: &JobConfig| async { Ok("sub".to_string()) }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 600.0);

        let result = auto_split(&access, &governor, &media, transcribe, dir.path(), job_id, mode, &c).await;
        assert!(matches!(result, Err(JobError::MaxSplitsExceeded)));
        assert_eq!(*access.auto_splits.lock().unwrap(), MAX_SPLITS);
        assert_eq!(access.last_status(0), Some(ChunkStatusKind::Failed));
    }

    #[tokio::test]
    async fn auto_split_refuses_when_total_retries_already_at_cap() {
        let access = FakeJobAccess::new();
        *access.total_retries.lock().unwrap() = MAX_TOTAL_RETRIES;
        let mode = ProcessingMode::BestQuality.config();
        let governor = RateLimitGovernor::new(mode, never_cancelled());
        let media = FakeMediaTool::with_duration(600.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(|_p: &Path, _c: &JobConfig| async { Ok("sub".to_string()) }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 600.0);

        let result = auto_split(&access, &governor, &media, transcribe, dir.path(), job_id, mode, &c).await;
        assert!(matches!(result, Err(JobError::MaxRetriesExceeded)));
        assert_eq!(*access.auto_splits.lock().unwrap(), 0);
        assert_eq!(*access.total_retries.lock().unwrap(), MAX_TOTAL_RETRIES);
    }

    #[tokio::test]
    async fn auto_split_stops_mid_subchunks_instead_of_overshooting_retry_cap() {
        let access = FakeJobAccess::new();
        *access.total_retries.lock().unwrap() = MAX_TOTAL_RETRIES - 1;
        let mode = ProcessingMode::BestQuality.config(); // subchunk_duration_s = 300, 600s chunk -> 2 sub-chunks
        let governor = RateLimitGovernor::new(mode, never_cancelled());
        let media = FakeMediaTool::with_duration(600.0);
        let transcribe = Arc::new(crate::transcribe::TranscribeFn(|_p: &Path, _c: &JobConfig| async { Ok("sub".to_string()) }));
        let dir = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let c = chunk(0, 0.0, 600.0);

        let result = auto_split(&access, &governor, &media, transcribe, dir.path(), job_id, mode, &c).await;
        assert!(matches!(result, Err(JobError::MaxRetriesExceeded)));
        assert_eq!(*access.total_retries.lock().unwrap(), MAX_TOTAL_RETRIES);
        assert_eq!(access.last_status(0), Some(ChunkStatusKind::Failed));
    }
}

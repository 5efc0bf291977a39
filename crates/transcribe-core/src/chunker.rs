//! Audio Chunker (C2) — turns an input audio blob into an ordered list
//! of on-disk chunk descriptors, applying mode-specific slicing and
//! overlap rules.
//!
//! Adapted from the sibling crates' `ProgressiveChunker`: instead of
//! accumulating a live audio stream into fixed-size buffers, this
//! chunker slices a complete file up front via `MediaTool::extract`,
//! and tracks overlap as a time-range relationship between consecutive
//! descriptors rather than a rolling sample buffer.

use std::path::{Path, PathBuf};

use crate::config::ProcessingMode;
use crate::fsguard::TempFileGuard;
use crate::media::{MediaError, MediaTool};
use crate::time::now_ms;
use crate::types::{ChunkDescriptor, JobId};

/// Output of a chunking pass.
#[derive(Debug, Clone)]
pub struct ChunkingResult {
    pub chunks: Vec<ChunkDescriptor>,
    pub total_duration_s: f64,
    pub mode: ProcessingMode,
    pub total_chunks: usize,
}

/// Slice `audio_bytes` into chunk descriptors per `mode`'s configuration
/// table, writing chunk files into `scratch_dir`.
///
/// The scratch copy of `audio_bytes` is always deleted before returning,
/// whether chunking succeeds or fails.
pub async fn chunk_audio(
    media: &dyn MediaTool,
    scratch_dir: &Path,
    job_id: JobId,
    filename: &str,
    audio_bytes: &[u8],
    mode: ProcessingMode,
) -> Result<ChunkingResult, MediaError> {
    let input_path = scratch_dir.join(format!("input_{}_{}", now_ms(), sanitize_filename(filename)));
    tokio::fs::write(&input_path, audio_bytes).await?;
    let _input_guard = TempFileGuard::new(input_path.clone());

    let duration = media.probe_duration(&input_path).await?;
    let cfg = mode.config();
    let (chunk_len, overlap) = (cfg.chunk_duration_s, cfg.overlap_duration_s);

    let mut chunks = Vec::new();
    let mut start = 0.0f64;
    let mut index = 0usize;

    while start < duration {
        let end = (start + chunk_len).min(duration);
        let chunk_duration = end - start;
        let chunk_path = scratch_dir.join(format!("chunk_{}_{}.mp3", index, now_ms()));

        media.extract(&input_path, start, chunk_duration, &chunk_path).await?;
        let content_hash = media.hash_file(&chunk_path).await?;

        let has_overlap = mode == ProcessingMode::BestQuality && end < duration;
        let overlap_start_s = has_overlap.then_some(end - overlap);

        chunks.push(ChunkDescriptor {
            index,
            start_s: start,
            end_s: end,
            duration_s: chunk_duration,
            path: chunk_path,
            content_hash,
            has_overlap,
            overlap_start_s,
        });

        start = if has_overlap { end - overlap } else { end };
        index += 1;
    }

    crate::info!("job {job_id} chunked into {} chunks ({duration:.1}s total, mode {mode:?})", chunks.len());

    let total_chunks = chunks.len();
    Ok(ChunkingResult { chunks, total_duration_s: duration, mode, total_chunks })
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Builds the relative sub-chunk path for auto-split, matching the
/// `subchunk_<job_id>_<chunk_i>_<sub_i>_<unix_ms>.<ext>` naming pattern.
pub fn subchunk_path(scratch_dir: &Path, job_id: JobId, chunk_index: usize, sub_index: usize) -> PathBuf {
    scratch_dir.join(format!("subchunk_{job_id}_{chunk_index}_{sub_index}_{}.mp3", now_ms()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FakeMediaTool;
    use std::sync::Arc;

    fn new_job_id() -> JobId {
        uuid::Uuid::new_v4()
    }

    #[tokio::test]
    async fn zero_duration_produces_zero_chunks() {
        let media = FakeMediaTool::with_duration(0.0);
        let dir = tempfile::tempdir().unwrap();
        let result = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced)
            .await
            .unwrap();
        assert_eq!(result.total_chunks, 0);
        assert_eq!(result.total_duration_s, 0.0);
    }

    #[tokio::test]
    async fn shorter_than_chunk_duration_produces_one_chunk_no_overlap() {
        let media = FakeMediaTool::with_duration(90.0);
        let dir = tempfile::tempdir().unwrap();
        let result = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced)
            .await
            .unwrap();
        assert_eq!(result.total_chunks, 1);
        assert!(!result.chunks[0].has_overlap);
        assert_eq!(result.chunks[0].end_s, 90.0);
    }

    #[tokio::test]
    async fn balanced_mode_produces_contiguous_chunks_with_no_overlap() {
        let media = FakeMediaTool::with_duration(5400.0);
        let dir = tempfile::tempdir().unwrap();
        let result = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced)
            .await
            .unwrap();
        assert_eq!(result.total_chunks, 30);
        for w in result.chunks.windows(2) {
            assert_eq!(w[0].end_s, w[1].start_s);
            assert!(!w[0].has_overlap);
        }
        assert_eq!(result.chunks.last().unwrap().duration_s, 180.0);
    }

    #[tokio::test]
    async fn best_quality_mode_sets_overlap_on_every_non_final_chunk() {
        let media = FakeMediaTool::with_duration(7200.0);
        let dir = tempfile::tempdir().unwrap();
        let result = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::BestQuality)
            .await
            .unwrap();
        assert!(result.total_chunks >= 12);
        let last = result.chunks.len() - 1;
        for (i, chunk) in result.chunks.iter().enumerate() {
            if i == last {
                assert!(!chunk.has_overlap);
            } else {
                assert!(chunk.has_overlap);
                assert_eq!(chunk.overlap_start_s, Some(chunk.end_s - 15.0));
                assert_eq!(result.chunks[i + 1].start_s, chunk.end_s - 15.0);
            }
        }
    }

    #[tokio::test]
    async fn distinct_ranges_hash_differently() {
        let media = FakeMediaTool::with_duration(400.0);
        let dir = tempfile::tempdir().unwrap();
        let result = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced)
            .await
            .unwrap();
        let hashes: std::collections::HashSet<_> = result.chunks.iter().map(|c| c.content_hash.clone()).collect();
        assert_eq!(hashes.len(), result.chunks.len());
    }

    #[tokio::test]
    async fn scratch_input_file_is_removed_on_success() {
        let media = FakeMediaTool::with_duration(10.0);
        let dir = tempfile::tempdir().unwrap();
        chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced)
            .await
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("input_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn scratch_input_file_is_removed_on_probe_failure() {
        let media = FakeMediaTool::failing_probe();
        let dir = tempfile::tempdir().unwrap();
        let err = chunk_audio(&media, dir.path(), new_job_id(), "a.wav", b"x", ProcessingMode::Balanced).await;
        assert!(err.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("input_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[allow(dead_code)]
    fn _use_arc(_: Arc<dyn MediaTool>) {}
}

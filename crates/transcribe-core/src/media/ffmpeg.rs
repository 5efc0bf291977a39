//! FFmpeg/ffprobe-backed default `MediaTool` implementation.
//!
//! Exists so the crate is runnable standalone and so integration
//! exercises have a trivially fakeable trait boundary; a host embedding
//! this engine is free to substitute its own implementation (e.g. one
//! backed by a cloud transcoding service) via `MediaTool`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{MediaError, MediaTool};

/// Default `MediaTool` backed by the `ffmpeg`/`ffprobe` command-line tools.
///
/// Always configured for mono, 16 kHz, low-bitrate MP3 output, matching the
/// format the remote transcription provider expects.
pub struct FfmpegMediaTool;

impl FfmpegMediaTool {
    pub fn new() -> Self {
        Self
    }

    fn run_ffprobe(path: &Path) -> Result<f64, MediaError> {
        let output = std::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| MediaError::probe_failed(format!("failed to execute ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::probe_failed(format!("ffprobe exited with error: {stderr}")));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| MediaError::probe_failed(format!("could not parse duration: {e}")))
    }

    fn run_ffmpeg_extract(
        input_path: &Path,
        start_s: f64,
        duration_s: f64,
        output_path: &Path,
    ) -> Result<(), MediaError> {
        let output = std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-ss", &format!("{start_s}")])
            .arg("-i")
            .arg(input_path)
            .args(["-t", &format!("{duration_s}")])
            .args(["-ac", "1", "-ar", "16000"])
            .args(["-codec:a", "libmp3lame", "-b:a", "64k"])
            .arg("-y")
            .arg(output_path)
            .output()
            .map_err(|e| MediaError::extract_failed(start_s, duration_s, format!("failed to execute ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::extract_failed(start_s, duration_s, stderr));
        }

        Ok(())
    }
}

impl Default for FfmpegMediaTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaTool for FfmpegMediaTool {
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::run_ffprobe(&path))
            .await
            .map_err(|e| MediaError::probe_failed(format!("probe task panicked: {e}")))?
    }

    async fn extract(
        &self,
        input_path: &Path,
        start_s: f64,
        duration_s: f64,
        output_path: &Path,
    ) -> Result<(), MediaError> {
        let input_path = input_path.to_path_buf();
        let output_path = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            Self::run_ffmpeg_extract(&input_path, start_s, duration_s, &output_path)
        })
        .await
        .map_err(|e| MediaError::extract_failed(start_s, duration_s, format!("extract task panicked: {e}")))?
    }

    async fn hash_file(&self, path: &Path) -> Result<String, MediaError> {
        let path_buf: PathBuf = path.to_path_buf();
        let path_for_err = path_buf.clone();
        tokio::task::spawn_blocking(move || -> Result<String, MediaError> {
            let bytes = std::fs::read(&path_buf)?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .map_err(|e| MediaError::HashFailed {
            path: path_for_err.display().to_string(),
            cause: format!("hash task panicked: {e}"),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_file_is_stable_for_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let tool = FfmpegMediaTool::new();
        let h1 = tool.hash_file(&path).await.unwrap();
        let h2 = tool.hash_file(&path).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[tokio::test]
    async fn hash_file_differs_for_distinct_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        std::fs::write(&path_a, b"chunk one").unwrap();
        std::fs::write(&path_b, b"chunk two").unwrap();

        let tool = FfmpegMediaTool::new();
        let h1 = tool.hash_file(&path_a).await.unwrap();
        let h2 = tool.hash_file(&path_b).await.unwrap();
        assert_ne!(h1, h2);
    }
}

//! `MediaTool` — the probe/extract/hash capability the chunker and
//! auto-split rely on. Audio decoding itself is out of scope for this
//! crate; a host wires in whatever decoder it already runs (ffmpeg,
//! a native codec library, a cloud transcoding service) behind this
//! trait.

mod ffmpeg;

pub use ffmpeg::FfmpegMediaTool;

use std::path::Path;

/// Errors surfaced by a `MediaTool` implementation.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Duration probing failed (corrupt file, missing codec, tool not installed).
    #[error("failed to probe audio duration: {0}")]
    ProbeFailed(String),

    /// Range extraction failed.
    #[error("failed to extract audio range [{start_s}, {start_s_plus_dur}): {cause}")]
    ExtractFailed {
        start_s: f64,
        start_s_plus_dur: f64,
        cause: String,
    },

    /// Hashing failed (the file disappeared, permissions, etc).
    #[error("failed to hash file {path}: {cause}")]
    HashFailed { path: String, cause: String },

    /// I/O error not otherwise classified.
    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn probe_failed(cause: impl std::fmt::Display) -> Self {
        Self::ProbeFailed(cause.to_string())
    }

    pub fn extract_failed(start_s: f64, duration_s: f64, cause: impl std::fmt::Display) -> Self {
        Self::ExtractFailed {
            start_s,
            start_s_plus_dur: start_s + duration_s,
            cause: cause.to_string(),
        }
    }
}

/// The collaborator contract the core consumes for everything audio-shaped.
///
/// Implementations must make `extract` idempotent with respect to
/// `output_path`: calling it twice with the same arguments overwrites the
/// same file rather than accumulating state.
#[async_trait::async_trait]
pub trait MediaTool: Send + Sync {
    /// Probe the duration of the audio file at `path`, in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError>;

    /// Extract `[start_s, start_s + duration_s)` from `input_path` into a
    /// mono, ~16 kHz, low-bitrate compressed file at `output_path`.
    async fn extract(
        &self,
        input_path: &Path,
        start_s: f64,
        duration_s: f64,
        output_path: &Path,
    ) -> Result<(), MediaError>;

    /// SHA-256 over the file's bytes, returned as a lowercase hex string.
    async fn hash_file(&self, path: &Path) -> Result<String, MediaError>;
}

/// A deterministic, fileless `MediaTool` fake shared by the unit tests in
/// `chunker`, `processor`, and `manager`: `extract` writes a small marker
/// derived from the requested range so distinct ranges hash differently,
/// without shelling out to ffmpeg.
#[cfg(test)]
pub struct FakeMediaTool {
    duration: f64,
    fail_probe: bool,
    fail_extract: bool,
}

#[cfg(test)]
impl FakeMediaTool {
    pub fn with_duration(duration: f64) -> Self {
        Self { duration, fail_probe: false, fail_extract: false }
    }

    pub fn failing_probe() -> Self {
        Self { duration: 0.0, fail_probe: true, fail_extract: false }
    }

    pub fn failing_extract(duration: f64) -> Self {
        Self { duration, fail_probe: false, fail_extract: true }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe_duration(&self, _path: &Path) -> Result<f64, MediaError> {
        if self.fail_probe {
            return Err(MediaError::probe_failed("fake probe failure"));
        }
        Ok(self.duration)
    }

    async fn extract(
        &self,
        _input_path: &Path,
        start_s: f64,
        duration_s: f64,
        output_path: &Path,
    ) -> Result<(), MediaError> {
        if self.fail_extract {
            return Err(MediaError::extract_failed(start_s, duration_s, "fake extract failure"));
        }
        tokio::fs::write(output_path, format!("chunk@{start_s}:{duration_s}").into_bytes())
            .await
            .map_err(MediaError::from)
    }

    async fn hash_file(&self, path: &Path) -> Result<String, MediaError> {
        use sha2::{Digest, Sha256};
        let bytes = tokio::fs::read(path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

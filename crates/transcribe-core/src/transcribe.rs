//! The injected `Transcribe` capability — the narrow interface the core
//! uses to talk to whatever remote speech-to-text provider a host wires
//! in. The core makes no assumptions about the wire protocol; it only
//! needs a chunk path in, text out, classified into one of three error
//! shapes.

use std::path::Path;

use async_trait::async_trait;

use crate::types::JobConfig;

/// Errors a `Transcribe` capability may return.
///
/// Modeled as an explicit sum type rather than an error carrying a
/// stringly-typed `name` tag, per the governor's rate-limit
/// classification rules in `governor::backoff`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscribeError {
    /// The provider signalled HTTP 429 or an equivalent rate-limit response.
    #[error("rate limited{}", retry_after_s.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimit { retry_after_s: Option<u64> },

    /// A transient, retryable failure: network error, 5xx, timeout.
    #[error("transient transcription failure: {cause}")]
    Transient { cause: String },

    /// A non-retryable failure: bad audio, unsupported format, auth failure.
    #[error("fatal transcription failure: {cause}")]
    Fatal { cause: String },
}

impl TranscribeError {
    pub fn transient(cause: impl std::fmt::Display) -> Self {
        Self::Transient { cause: cause.to_string() }
    }

    pub fn fatal(cause: impl std::fmt::Display) -> Self {
        Self::Fatal { cause: cause.to_string() }
    }

    /// Rate-limit classification per the governor's detection rules:
    /// an explicit `RateLimit` variant, an HTTP 429, or a message
    /// mentioning "429" or (case-insensitively) "rate limit".
    pub fn is_rate_limited(&self) -> bool {
        match self {
            TranscribeError::RateLimit { .. } => true,
            TranscribeError::Transient { cause } | TranscribeError::Fatal { cause } => {
                cause.contains("429") || cause.to_lowercase().contains("rate limit")
            }
        }
    }
}

/// The capability a host injects so the core can transcribe one chunk.
///
/// `cfg` carries the per-job model/language/temperature/prompt selection;
/// the implementation is expected to apply it to the outbound request.
#[async_trait]
pub trait Transcribe: Send + Sync {
    async fn transcribe(&self, chunk_path: &Path, cfg: &JobConfig) -> Result<String, TranscribeError>;
}

/// Adapts a plain async closure into a `Transcribe` implementation, for
/// tests and for hosts that would rather hand over a function pointer
/// than implement the trait.
pub struct TranscribeFn<F>(pub F);

#[async_trait]
impl<F, Fut> Transcribe for TranscribeFn<F>
where
    F: Fn(&Path, &JobConfig) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, TranscribeError>> + Send,
{
    async fn transcribe(&self, chunk_path: &Path, cfg: &JobConfig) -> Result<String, TranscribeError> {
        (self.0)(chunk_path, cfg).await
    }
}

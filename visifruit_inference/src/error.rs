//! Inference transport errors.

use thiserror::Error;
use visifruit::detection::BackendKind;
use visifruit::frame::FrameError;

/// Why the remote path did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    /// Breaker open; no network call attempted.
    #[error("circuit breaker open")]
    CircuitOpen,
    /// Remote inference disabled in configuration.
    #[error("remote inference disabled")]
    Disabled,
    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Server answered with a non-2xx status (401/403 = auth rejected).
    #[error("HTTP status {0}")]
    Status(u16),
    /// Request or body transfer failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body was not the expected JSON.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Inference transport error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    /// Remote path failed or was skipped.
    #[error("remote backend unavailable: {0}")]
    RemoteUnavailable(RemoteFailure),

    /// Local model missing or failed; the caller skips the cycle.
    #[error("local model unavailable: {0}")]
    LocalModelUnavailable(String),

    /// A backend exceeded its time budget.
    #[error("{backend} inference timed out after {after_ms} ms")]
    Timeout { backend: BackendKind, after_ms: u64 },

    /// Frame failed validation.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    /// Frame could not be converted or encoded.
    #[error("frame encoding failed: {0}")]
    Compression(String),
}

impl InferenceError {
    /// True if this outcome counts as a failure for breaker accounting.
    ///
    /// Calls short-circuited by an open breaker never reached the network
    /// and are not counted again.
    pub fn is_breaker_failure(&self) -> bool {
        match self {
            Self::RemoteUnavailable(RemoteFailure::CircuitOpen | RemoteFailure::Disabled) => false,
            Self::RemoteUnavailable(_) => true,
            Self::Timeout { backend, .. } => *backend == BackendKind::Remote,
            _ => false,
        }
    }

    /// True if the local fallback may serve the frame instead.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_)
                | Self::Timeout {
                    backend: BackendKind::Remote,
                    ..
                }
        )
    }
}

impl From<image::ImageError> for InferenceError {
    fn from(e: image::ImageError) -> Self {
        Self::Compression(e.to_string())
    }
}

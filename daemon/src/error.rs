//! Error taxonomy for the voice session
//!
//! Every variant is recovered by the session controller: it resolves to a
//! transition back to Idle plus a user-visible message. None of them is fatal
//! to the daemon.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to the user by the session controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Speech recognition is not available.")]
    CaptureUnavailable,

    #[error("Speech recognition error: {0}")]
    CaptureFailed(String),

    #[error("The assistant is not available: {0}")]
    BackendUnavailable(String),

    #[error("The assistant took too long to respond.")]
    BackendTimeout,

    #[error("Error contacting the assistant: {0}")]
    BackendRemoteError(String),

    #[error("Speech playback is not available: {0}")]
    PlaybackUnavailable(String),

    #[error("Request cancelled.")]
    Cancelled,
}

/// Machine-readable error classification for clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CaptureUnavailable,
    CaptureFailed,
    BackendUnavailable,
    BackendTimeout,
    BackendRemoteError,
    PlaybackUnavailable,
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::CaptureUnavailable => ErrorKind::CaptureUnavailable,
            SessionError::CaptureFailed(_) => ErrorKind::CaptureFailed,
            SessionError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            SessionError::BackendTimeout => ErrorKind::BackendTimeout,
            SessionError::BackendRemoteError(_) => ErrorKind::BackendRemoteError,
            SessionError::PlaybackUnavailable(_) => ErrorKind::PlaybackUnavailable,
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Snapshot form, as rendered by clients
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// An error as carried in snapshots and events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_stable() {
        let report = SessionError::BackendTimeout.report();
        assert_eq!(report.kind, ErrorKind::BackendTimeout);
        assert_eq!(report.message, "The assistant took too long to respond.");
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::PlaybackUnavailable).unwrap();
        assert_eq!(json, "\"playback_unavailable\"");
    }
}

//! Events module for voice session transitions
//!
//! Provides structured event types the UI layer renders: state changes,
//! transcripts, replies, appended turns and surfaced errors.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::state::{SessionState, Turn};

/// Events emitted by the session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved between states
    StateChanged {
        from: SessionState,
        to: SessionState,
        /// Time spent in the state being left
        duration_ms: u64,
    },

    /// Capture produced a final transcript
    TranscriptReady { transcript: String },

    /// The backend answered
    ReplyReady { reply: String },

    /// A completed exchange was added to the conversation log
    TurnAppended { index: usize, turn: Turn },

    /// A failure returned the session to idle
    Error { kind: ErrorKind, message: String },

    /// The user cut playback short
    PlaybackInterrupted,

    /// The user abandoned an in-flight backend request
    RequestCancelled,

    MuteChanged { muted: bool },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to, duration_ms } => {
                write!(f, "STATE_CHANGED {} -> {} ({}ms)", from, to, duration_ms)
            }
            SessionEvent::TranscriptReady { transcript } => {
                write!(f, "TRANSCRIPT_READY ({} chars)", transcript.chars().count())
            }
            SessionEvent::ReplyReady { reply } => {
                write!(f, "REPLY_READY ({} chars)", reply.chars().count())
            }
            SessionEvent::TurnAppended { index, .. } => write!(f, "TURN_APPENDED #{}", index),
            SessionEvent::Error { kind, .. } => write!(f, "ERROR ({:?})", kind),
            SessionEvent::PlaybackInterrupted => write!(f, "PLAYBACK_INTERRUPTED"),
            SessionEvent::RequestCancelled => write!(f, "REQUEST_CANCELLED"),
            SessionEvent::MuteChanged { muted } => write!(f, "MUTE_CHANGED ({})", muted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::StateChanged {
            from: SessionState::Listening,
            to: SessionState::Processing,
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_changed"));
        assert!(json.contains("\"from\":\"listening\""));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"turn_appended","index":0,"turn":{"transcript":"Hello","reply":"Hi there"}}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SessionEvent::TurnAppended {
                index: 0,
                turn: Turn::new("Hello", "Hi there"),
            }
        );
    }

    #[test]
    fn test_display_hides_content() {
        let event = SessionEvent::TranscriptReady {
            transcript: "my secret".to_string(),
        };
        assert_eq!(event.to_string(), "TRANSCRIPT_READY (9 chars)");
    }
}

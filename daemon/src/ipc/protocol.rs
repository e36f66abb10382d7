//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SessionEvent;
use crate::state::{ActivateOutcome, SessionSnapshot, Turn};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon and session status
    GetStatus,

    /// Request the conversation log
    GetLog,

    /// Press the voice control
    Activate,

    /// Release the voice control (push-to-talk)
    Release,

    /// Abort the active capture, request or playback
    Cancel,

    ToggleMute,

    SetMuted { muted: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to session event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    Log { turns: Vec<Turn> },

    Activated { outcome: ActivateOutcome },

    Released { stopped: bool },

    Cancelled { cancelled: bool },

    Muted { muted: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: SessionEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    #[serde(flatten)]
    pub session: SessionSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetMuted { muted: true };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"set_muted","muted":true}"#);
    }

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(r#"{"type":"activate"}"#).unwrap();
        assert_eq!(req, Request::Activate);
    }

    #[test]
    fn test_status_flattens_session() {
        let resp = Response::Status(DaemonStatus {
            version: "0.1.0".to_string(),
            uptime_secs: 5,
            session: SessionSnapshot {
                state: SessionState::Speaking,
                muted: false,
                transcript: Some("Hello".to_string()),
                reply: Some("Hi there".to_string()),
                error: None,
                turns: 1,
            },
        });
        let json: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["state"], "speaking");
        assert_eq!(json["reply"], "Hi there");
        assert_eq!(json["uptime_secs"], 5);
    }

    #[test]
    fn test_event_push_serialization() {
        let resp = Response::Event {
            event: SessionEvent::MuteChanged { muted: true },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"type":"event","event":{"type":"mute_changed","muted":true}}"#);
    }
}

//! Client-side handle to a running voice session
//!
//! The session runs as a single task; everything else talks to it through
//! this handle, so only the session ever mutates its own state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::ErrorReport;

use super::log::Turn;
use super::machine::SessionState;

/// What a press of the single voice control did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivateOutcome {
    /// Capture started
    Listening,
    /// Capture stopped without a transcript
    Stopped,
    /// Playback was cut short
    Interrupted,
    /// A request is in flight; nothing changed
    Ignored,
    /// No speech recognition engine is present
    Unavailable,
}

/// Read-only view of the session for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub muted: bool,
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub error: Option<ErrorReport>,
    /// Number of turns in the conversation log
    pub turns: usize,
}

/// Requests handled by the session task
#[derive(Debug)]
pub(crate) enum Command {
    Activate(oneshot::Sender<ActivateOutcome>),
    Release(oneshot::Sender<bool>),
    Cancel(oneshot::Sender<bool>),
    /// `None` toggles
    SetMuted(Option<bool>, oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Log(oneshot::Sender<Vec<Turn>>),
}

/// Cloneable handle for driving a session from other tasks
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .ok()
            .context("voice session is not running")?;
        reply_rx.await.context("voice session dropped the request")
    }

    /// The single voice control. Effect depends on the current state.
    pub async fn activate(&self) -> Result<ActivateOutcome> {
        self.request(Command::Activate).await
    }

    /// Push-to-talk release: stops capture, never touches playback
    pub async fn release(&self) -> Result<bool> {
        self.request(Command::Release).await
    }

    /// Abort whatever is active, including an in-flight request
    pub async fn cancel(&self) -> Result<bool> {
        self.request(Command::Cancel).await
    }

    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(|tx| Command::SetMuted(None, tx)).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<bool> {
        self.request(|tx| Command::SetMuted(Some(muted), tx)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn log(&self) -> Result<Vec<Turn>> {
        self.request(Command::Log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_fails_when_session_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SessionHandle::new(tx);
        assert!(handle.activate().await.is_err());
    }

    #[test]
    fn test_request_waits_for_session() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx);
        let mut snapshot = tokio_test::task::spawn(handle.snapshot());
        tokio_test::assert_pending!(snapshot.poll());

        match rx.try_recv().unwrap() {
            Command::Snapshot(reply) => reply
                .send(SessionSnapshot {
                    state: SessionState::Idle,
                    muted: true,
                    transcript: None,
                    reply: None,
                    error: None,
                    turns: 0,
                })
                .unwrap(),
            other => panic!("unexpected command: {other:?}"),
        }

        let snapshot = tokio_test::assert_ready_ok!(snapshot.poll());
        assert!(snapshot.muted);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&ActivateOutcome::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");
    }
}

//! Voice session state machine
//!
//! Provides an explicit state machine with four states:
//! - Idle: Default state, nothing live
//! - Listening: One capture attempt in progress
//! - Processing: One backend request in flight
//! - Speaking: One reply being spoken

mod handle;
mod log;
mod machine;

pub use handle::{ActivateOutcome, SessionHandle, SessionSnapshot};
pub use log::Turn;
pub use machine::{Engines, SessionSettings, SessionState};

#[cfg(test)]
pub(crate) use handle::Command;

use machine::VoiceSession;

use tokio::sync::{broadcast, mpsc};

use crate::events::SessionEvent;

/// Start a session on its own task and return a handle to it
pub fn spawn(
    engines: Engines,
    settings: SessionSettings,
    event_tx: broadcast::Sender<SessionEvent>,
) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let mut session = VoiceSession::new(engines, settings, event_tx);
    let task = tokio::spawn(async move { session.run(command_rx).await });
    (SessionHandle::new(command_tx), task)
}

//! Speech capability boundary
//!
//! The session controller only needs two abstract capabilities: "capture one
//! utterance and hand back a final transcript" and "speak this text until it
//! finishes or is cancelled". Both are modelled as a single async call that
//! resolves to exactly one terminal outcome.

mod command;
mod language;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use command::{CommandCapture, CommandSynthesizer, CommandTemplate};
pub use language::{LanguagePolicy, ScriptHeuristic};

/// Terminal result of one capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The engine produced a final transcript
    Final(String),
    /// The engine failed mid-capture
    Failed(String),
    /// The engine could not be started at all
    Unavailable(String),
    /// Capture ended without a result (cancelled or nothing heard)
    Stopped,
}

/// Terminal result of one speak request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Whether the engine is present at all
    fn is_available(&self) -> bool;

    /// Capture one utterance. Must resolve promptly once `cancel` fires.
    async fn capture(&self, cancel: CancellationToken) -> CaptureOutcome;
}

/// Text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Speak `text` using the voice for `language`.
    ///
    /// Must stop producing audio as soon as `cancel` fires.
    async fn speak(&self, text: &str, language: &str, cancel: CancellationToken) -> PlaybackOutcome;

    /// Silence everything this engine is currently saying
    fn cancel_all(&self);
}

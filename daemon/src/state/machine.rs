//! Core voice session state machine
//!
//! Handles transitions between Idle, Listening, Processing and Speaking. The
//! session owns the only live capture, request or playback handle, and runs
//! each command or terminal result to completion before taking the next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{converse_with_timeout, Backend, BackendError};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::voice::{CaptureOutcome, LanguagePolicy, PlaybackOutcome, SpeechCapture, SpeechSynthesizer};

use super::handle::{ActivateOutcome, Command, SessionSnapshot};
use super::log::{ConversationLog, Turn};

/// The four possible states of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the user to activate
    Idle,
    /// Microphone open, waiting for a final transcript
    Listening,
    /// Transcript sent to the backend, waiting for a reply
    Processing,
    /// Reply being spoken
    Speaking,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Processing => write!(f, "Processing"),
            SessionState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on each backend call
    pub request_timeout: Duration,
    /// System instruction sent with every transcript
    pub persona: Option<String>,
    /// Pause between silencing playback and opening the microphone
    pub settle_delay: Duration,
    /// Interrupting playback goes straight back to listening
    pub interrupt_relistens: bool,
    /// Initial value of the mute flag
    pub start_muted: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            persona: None,
            settle_delay: Duration::from_millis(150),
            interrupt_relistens: false,
            start_muted: false,
        }
    }
}

/// External capabilities the session drives
#[derive(Clone)]
pub struct Engines {
    pub capture: Arc<dyn SpeechCapture>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub backend: Arc<dyn Backend>,
    pub language: Arc<dyn LanguagePolicy>,
}

/// Terminal result reported by one of the session's own tasks
#[derive(Debug)]
pub(crate) enum Completion {
    Capture { id: u64, outcome: CaptureOutcome },
    Backend { id: u64, result: Result<String, BackendError> },
    Playback { id: u64, outcome: PlaybackOutcome },
}

impl Completion {
    fn id(&self) -> u64 {
        match self {
            Completion::Capture { id, .. }
            | Completion::Backend { id, .. }
            | Completion::Playback { id, .. } => *id,
        }
    }
}

/// The single live handle, if any
#[derive(Debug, Default)]
enum ActiveHandle {
    #[default]
    None,
    Capture { id: u64, cancel: CancellationToken },
    Request { id: u64, cancel: CancellationToken, transcript: String },
    Playback { id: u64, cancel: CancellationToken },
}

impl ActiveHandle {
    fn id(&self) -> Option<u64> {
        match self {
            ActiveHandle::None => None,
            ActiveHandle::Capture { id, .. }
            | ActiveHandle::Request { id, .. }
            | ActiveHandle::Playback { id, .. } => Some(*id),
        }
    }

    fn cancel(&self) {
        match self {
            ActiveHandle::None => {}
            ActiveHandle::Capture { cancel, .. }
            | ActiveHandle::Request { cancel, .. }
            | ActiveHandle::Playback { cancel, .. } => cancel.cancel(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ActiveHandle::None => "none",
            ActiveHandle::Capture { .. } => "capture",
            ActiveHandle::Request { .. } => "request",
            ActiveHandle::Playback { .. } => "playback",
        }
    }
}

/// Wait out the settle delay, then capture, unless cancelled first
async fn run_capture(
    capture: Arc<dyn SpeechCapture>,
    settle_delay: Duration,
    cancel: CancellationToken,
) -> CaptureOutcome {
    tokio::select! {
        _ = cancel.cancelled() => return CaptureOutcome::Stopped,
        _ = tokio::time::sleep(settle_delay) => {}
    }
    capture.capture(cancel).await
}

/// The voice session controller
pub struct VoiceSession {
    state: SessionState,
    /// Time when the current state was entered
    state_entered_at: Instant,
    active: ActiveHandle,
    next_handle_id: u64,
    muted: bool,
    transcript: Option<String>,
    reply: Option<String>,
    error: Option<SessionError>,
    log: ConversationLog,
    engines: Engines,
    settings: SessionSettings,
    /// Channel for emitting session events
    event_tx: broadcast::Sender<SessionEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Option<mpsc::UnboundedReceiver<Completion>>,
}

impl VoiceSession {
    pub fn new(
        engines: Engines,
        settings: SessionSettings,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::Idle,
            state_entered_at: Instant::now(),
            active: ActiveHandle::None,
            next_handle_id: 0,
            muted: settings.start_muted,
            transcript: None,
            reply: None,
            error: None,
            log: ConversationLog::new(),
            engines,
            settings,
            event_tx,
            completion_tx,
            completion_rx: Some(completion_rx),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn log(&self) -> &[Turn] {
        self.log.turns()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            muted: self.muted,
            transcript: self.transcript.clone(),
            reply: self.reply.clone(),
            error: self.error.as_ref().map(SessionError::report),
            turns: self.log.len(),
        }
    }

    /// Run the session until every command sender is gone
    pub(crate) async fn run(&mut self, mut command_rx: mpsc::Receiver<Command>) {
        let Some(mut completion_rx) = self.completion_rx.take() else {
            warn!("voice session is already running");
            return;
        };

        info!("voice session started in Idle state");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completion_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
        }

        self.shutdown();
        info!("voice session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Activate(reply) => {
                let _ = reply.send(self.activate());
            }
            Command::Release(reply) => {
                let _ = reply.send(self.release());
            }
            Command::Cancel(reply) => {
                let _ = reply.send(self.cancel());
            }
            Command::SetMuted(muted, reply) => {
                let muted = muted.unwrap_or(!self.muted);
                let _ = reply.send(self.set_muted(muted));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Log(reply) => {
                let _ = reply.send(self.log.turns().to_vec());
            }
        }
    }

    /// The single user-facing control
    pub fn activate(&mut self) -> ActivateOutcome {
        match self.state {
            SessionState::Idle => self.start_listening(),
            SessionState::Listening => {
                self.stop_listening();
                ActivateOutcome::Stopped
            }
            SessionState::Speaking => {
                self.interrupt_playback();
                if self.settings.interrupt_relistens {
                    self.start_listening()
                } else {
                    ActivateOutcome::Interrupted
                }
            }
            SessionState::Processing => {
                debug!("activation ignored while a request is in flight");
                ActivateOutcome::Ignored
            }
        }
    }

    /// Stop capture if listening; returns whether anything was stopped
    pub fn release(&mut self) -> bool {
        if self.state == SessionState::Listening {
            self.stop_listening();
            true
        } else {
            false
        }
    }

    /// Abort the active capture, request or playback
    pub fn cancel(&mut self) -> bool {
        match self.state {
            SessionState::Idle => false,
            SessionState::Listening => {
                self.stop_listening();
                true
            }
            SessionState::Speaking => {
                self.interrupt_playback();
                true
            }
            SessionState::Processing => {
                self.destroy_handle();
                info!("backend request cancelled");
                self.emit(SessionEvent::RequestCancelled);
                self.set_error(SessionError::Cancelled);
                self.transition_to(SessionState::Idle);
                true
            }
        }
    }

    pub fn set_muted(&mut self, muted: bool) -> bool {
        if self.muted != muted {
            self.muted = muted;
            info!(muted, "mute changed");
            self.emit(SessionEvent::MuteChanged { muted });
        }
        self.muted
    }

    /// Apply a terminal result, unless it comes from a handle that is no
    /// longer the current one
    pub(crate) fn handle_completion(&mut self, completion: Completion) {
        if self.active.id() != Some(completion.id()) {
            debug!(
                stale = completion.id(),
                current = ?self.active.id(),
                "dropping result from stale handle"
            );
            return;
        }

        match completion {
            Completion::Capture { outcome, .. } => self.on_capture_finished(outcome),
            Completion::Backend { result, .. } => self.on_backend_finished(result),
            Completion::Playback { outcome, .. } => self.on_playback_finished(outcome),
        }
    }

    fn start_listening(&mut self) -> ActivateOutcome {
        // Never talk over the user
        self.engines.synthesizer.cancel_all();
        self.transcript = None;
        self.reply = None;
        self.error = None;

        if !self.engines.capture.is_available() {
            self.fail(SessionError::CaptureUnavailable);
            return ActivateOutcome::Unavailable;
        }

        let (id, cancel) = self.new_handle("capture");
        let capture = Arc::clone(&self.engines.capture);
        let settle_delay = self.settings.settle_delay;
        let task_cancel = cancel.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = run_capture(capture, settle_delay, task_cancel).await;
            let _ = completion_tx.send(Completion::Capture { id, outcome });
        });

        self.active = ActiveHandle::Capture { id, cancel };
        self.transition_to(SessionState::Listening);
        ActivateOutcome::Listening
    }

    fn stop_listening(&mut self) {
        self.destroy_handle();
        self.transition_to(SessionState::Idle);
    }

    fn interrupt_playback(&mut self) {
        self.destroy_handle();
        info!("playback interrupted");
        self.emit(SessionEvent::PlaybackInterrupted);
        self.transition_to(SessionState::Idle);
    }

    fn on_capture_finished(&mut self, outcome: CaptureOutcome) {
        self.destroy_handle();

        match outcome {
            CaptureOutcome::Final(text) if !text.trim().is_empty() => {
                self.start_request(text.trim().to_string());
            }
            CaptureOutcome::Final(_) | CaptureOutcome::Stopped => {
                debug!("capture ended without a transcript");
                self.transition_to(SessionState::Idle);
            }
            CaptureOutcome::Failed(reason) => self.fail(SessionError::CaptureFailed(reason)),
            CaptureOutcome::Unavailable(reason) => {
                warn!(%reason, "speech capture engine unavailable");
                self.fail(SessionError::CaptureUnavailable);
            }
        }
    }

    fn start_request(&mut self, transcript: String) {
        info!(chars = transcript.chars().count(), "transcript ready");
        self.transcript = Some(transcript.clone());
        self.emit(SessionEvent::TranscriptReady {
            transcript: transcript.clone(),
        });

        if let Err(e) = self.engines.backend.check() {
            self.fail(e.into());
            return;
        }

        let (id, cancel) = self.new_handle("request");
        let backend = Arc::clone(&self.engines.backend);
        let persona = self.settings.persona.clone();
        let timeout = self.settings.request_timeout;
        let task_cancel = cancel.clone();
        let completion_tx = self.completion_tx.clone();
        let text = transcript.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                // Dropping the call aborts the HTTP request
                _ = task_cancel.cancelled() => return,
                result = converse_with_timeout(backend.as_ref(), &text, persona.as_deref(), timeout) => result,
            };
            let _ = completion_tx.send(Completion::Backend { id, result });
        });

        self.active = ActiveHandle::Request {
            id,
            cancel,
            transcript,
        };
        self.transition_to(SessionState::Processing);
    }

    fn on_backend_finished(&mut self, result: Result<String, BackendError>) {
        let ActiveHandle::Request { transcript, .. } = self.destroy_handle() else {
            warn!("backend result without a request handle");
            return;
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        let turn = Turn::new(transcript, reply.clone());
        let index = self.log.append(turn.clone());
        info!(index, chars = reply.chars().count(), "turn appended");
        self.reply = Some(reply.clone());
        self.emit(SessionEvent::ReplyReady {
            reply: reply.clone(),
        });
        self.emit(SessionEvent::TurnAppended { index, turn });

        if self.muted {
            self.transition_to(SessionState::Idle);
        } else {
            self.start_playback(reply);
        }
    }

    fn start_playback(&mut self, text: String) {
        if !self.engines.synthesizer.is_available() {
            self.fail(SessionError::PlaybackUnavailable(
                "no speech engine configured".to_string(),
            ));
            return;
        }

        let language = self.engines.language.language_for(&text).to_string();
        let (id, cancel) = self.new_handle("playback");
        debug!(id, %language, "speaking reply");

        let synthesizer = Arc::clone(&self.engines.synthesizer);
        let task_cancel = cancel.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_cancel.cancelled() => return,
                outcome = synthesizer.speak(&text, &language, task_cancel.clone()) => outcome,
            };
            let _ = completion_tx.send(Completion::Playback { id, outcome });
        });

        self.active = ActiveHandle::Playback { id, cancel };
        self.transition_to(SessionState::Speaking);
    }

    fn on_playback_finished(&mut self, outcome: PlaybackOutcome) {
        self.destroy_handle();

        match outcome {
            PlaybackOutcome::Completed | PlaybackOutcome::Cancelled => {
                self.transition_to(SessionState::Idle);
            }
            PlaybackOutcome::Failed(reason) => self.fail(SessionError::PlaybackUnavailable(reason)),
        }
    }

    /// Surface an error and return to Idle
    fn fail(&mut self, error: SessionError) {
        warn!(kind = ?error.kind(), %error, "voice session error");
        self.destroy_handle();
        self.set_error(error);
        self.transition_to(SessionState::Idle);
    }

    fn set_error(&mut self, error: SessionError) {
        self.emit(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.error = Some(error);
    }

    fn new_handle(&mut self, kind: &'static str) -> (u64, CancellationToken) {
        self.next_handle_id += 1;
        let id = self.next_handle_id;
        debug!(id, kind, "handle created");
        (id, CancellationToken::new())
    }

    /// Cancel and forget the live handle, returning it
    fn destroy_handle(&mut self) -> ActiveHandle {
        let handle = std::mem::take(&mut self.active);
        if let Some(id) = handle.id() {
            handle.cancel();
            debug!(id, kind = handle.kind(), "handle destroyed");
        }
        handle
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: SessionState) {
        let old_state = self.state;
        if new_state == old_state {
            return;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();

        self.emit(SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
            duration_ms,
        });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }

    /// Tear down whatever is live
    fn shutdown(&mut self) {
        self.destroy_handle();
        self.engines.synthesizer.cancel_all();
        self.transition_to(SessionState::Idle);
    }
}

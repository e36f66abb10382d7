//! voice-chat-daemon: Background daemon for a push-to-talk voice assistant
//!
//! This daemon provides:
//! - A voice session state machine (idle, listening, processing, speaking)
//! - Speech capture and playback through pluggable engines
//! - A conversational backend client with a bounded request timeout
//! - IPC server for UI clients to drive the session and render its events

mod backend;
mod config;
mod error;
mod events;
mod ipc;
mod lifecycle;
mod state;
mod voice;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{Backend, GeminiBackend, ProxyBackend};
use crate::config::{BackendKind, Config};
use crate::events::SessionEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::{Engines, SessionSettings};
use crate::voice::{CommandCapture, CommandSynthesizer, ScriptHeuristic, SpeechCapture, SpeechSynthesizer};

/// How long the session gets to tear down live handles on exit
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(2);

fn build_engines(config: &Config) -> Result<Engines> {
    let client = backend::http_client(config.request_timeout)?;
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Gemini => Arc::new(GeminiBackend::new(client, config.gemini.clone())),
        BackendKind::Proxy => Arc::new(ProxyBackend::new(client, config.proxy_url.clone())),
    };

    let capture: Arc<dyn SpeechCapture> = Arc::new(CommandCapture::new(
        config.capture_command.clone(),
        config.capture_language.clone(),
    ));
    let synthesizer: Arc<dyn SpeechSynthesizer> =
        Arc::new(CommandSynthesizer::new(config.tts_command.clone()));

    // Report missing pieces now rather than on the first press
    if let Err(e) = backend.check() {
        warn!(backend = backend.name(), %e, "backend not configured, requests will fail");
    }
    if !capture.is_available() {
        warn!("VOICE_CAPTURE_COMMAND is not set, speech capture is unavailable");
    }
    if !synthesizer.is_available() {
        warn!("VOICE_TTS_COMMAND is empty, replies will not be spoken");
    }

    Ok(Engines {
        capture,
        synthesizer,
        backend,
        language: Arc::new(ScriptHeuristic::default()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-chat-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        backend = ?config.backend,
        timeout_secs = config.request_timeout.as_secs(),
        "configuration loaded"
    );

    // Register signal handlers before anything long-running starts
    let mut shutdown = ShutdownSignal::new()?;

    // Session -> IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let engines = build_engines(&config)?;
    let settings = SessionSettings {
        request_timeout: config.request_timeout,
        persona: config.persona.clone(),
        settle_delay: config.settle_delay,
        interrupt_relistens: config.interrupt_relistens,
        start_muted: config.start_muted,
    };
    let (session, mut session_task) = state::spawn(engines, settings, event_tx.clone());

    let server = Server::new(&config.socket_path, session.clone(), event_tx)?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        result = &mut session_task => {
            if let Err(e) = result {
                error!(?e, "voice session task failed");
            }
            info!("voice session exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;
    drop(server);
    drop(session);

    // The session stops once the last handle is gone
    if !session_task.is_finished()
        && tokio::time::timeout(SESSION_STOP_TIMEOUT, session_task).await.is_err()
    {
        warn!("voice session did not stop in time");
    }

    info!("voice-chat-daemon stopped");

    Ok(())
}

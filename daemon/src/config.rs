//! Configuration loading and management
//!
//! Every setting is a command-line flag with an environment fallback, and the
//! environment is optionally seeded from a `.env` file in the working
//! directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};

use crate::backend::GeminiSettings;
use crate::voice::CommandTemplate;

/// Persona instruction used when `VOICE_PERSONA` is unset
pub const DEFAULT_PERSONA: &str = "You are Rev, the official assistant for Revolt Motors. \
    Only answer questions related to Revolt Motors, its products, services, and mission. \
    Politely refuse to answer anything else.";

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TTS_COMMAND: &str = "espeak-ng -v {lang}";

/// Which conversational backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Gemini API, called directly
    Gemini,
    /// JSON proxy holding the credentials
    Proxy,
}

/// Voice chat daemon - push-to-talk voice assistant
#[derive(Parser)]
#[command(name = "voice-chat-daemon", version, about)]
pub struct Args {
    /// Directory for runtime data [default: ~/.local/share/voice-chat]
    #[arg(long, env = "VOICE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// IPC socket path [default: <data-dir>/daemon.sock]
    #[arg(long, env = "VOICE_SOCKET_PATH")]
    socket_path: Option<PathBuf>,

    /// Conversational backend
    #[arg(long, env = "VOICE_BACKEND", value_enum, ignore_case = true, default_value_t = BackendKind::Gemini)]
    backend: BackendKind,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_GEMINI_API_BASE)]
    gemini_api_base: String,

    /// Chat endpoint of a proxy that holds the credentials
    #[arg(long, env = "VOICE_PROXY_URL")]
    proxy_url: Option<String>,

    /// Upper bound on each backend call, in seconds
    #[arg(
        long,
        env = "VOICE_REQUEST_TIMEOUT_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    request_timeout_secs: u64,

    /// System instruction sent with every transcript
    #[arg(long, env = "VOICE_PERSONA", default_value = DEFAULT_PERSONA, hide_default_value = true)]
    persona: String,

    /// Send transcripts without a system instruction
    #[arg(long, env = "VOICE_NO_PERSONA", value_parser = BoolishValueParser::new())]
    no_persona: bool,

    /// Speech-to-text command; prints the final transcript on stdout
    #[arg(long, env = "VOICE_CAPTURE_COMMAND")]
    capture_command: Option<String>,

    /// Language tag substituted for `{lang}` in the capture command
    #[arg(long, env = "VOICE_CAPTURE_LANGUAGE", default_value = "en-US")]
    capture_language: String,

    /// Text-to-speech command; reads the reply on stdin
    #[arg(long, env = "VOICE_TTS_COMMAND", default_value = DEFAULT_TTS_COMMAND)]
    tts_command: String,

    /// Never speak replies
    #[arg(long, env = "VOICE_NO_TTS", value_parser = BoolishValueParser::new())]
    no_tts: bool,

    /// Start with replies muted
    #[arg(long, env = "VOICE_START_MUTED", value_parser = BoolishValueParser::new())]
    start_muted: bool,

    /// Pause between silencing playback and opening the microphone, in ms
    #[arg(long, env = "VOICE_SETTLE_DELAY_MS", default_value_t = 150)]
    settle_delay_ms: u64,

    /// Interrupting playback starts listening again
    #[arg(long, env = "VOICE_INTERRUPT_RELISTENS", value_parser = BoolishValueParser::new())]
    interrupt_relistens: bool,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub backend: BackendKind,
    pub gemini: GeminiSettings,
    pub proxy_url: Option<String>,

    /// Upper bound on each backend call
    pub request_timeout: Duration,

    /// System instruction sent with every transcript; `None` sends none
    pub persona: Option<String>,

    pub capture_command: CommandTemplate,
    pub capture_language: String,
    pub tts_command: CommandTemplate,

    pub start_muted: bool,
    pub settle_delay: Duration,
    pub interrupt_relistens: bool,
}

impl Config {
    /// Load configuration from `.env`, the environment, flags and defaults
    pub fn load() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_args(Args::parse(), std::env::var_os("HOME").map(PathBuf::from))
    }

    /// Resolve parsed arguments; `home` anchors the default data directory
    pub fn from_args(args: Args, home: Option<PathBuf>) -> Result<Self> {
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => home
                .context("HOME is not set and VOICE_DATA_DIR is missing")?
                .join(".local")
                .join("share")
                .join("voice-chat"),
        };
        let socket_path = args
            .socket_path
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let persona = Some(args.persona.trim().to_string())
            .filter(|persona| !args.no_persona && !persona.is_empty());
        let tts_command = if args.no_tts {
            CommandTemplate::default()
        } else {
            CommandTemplate::parse(&args.tts_command)
        };

        Ok(Self {
            socket_path,
            data_dir,
            backend: args.backend,
            gemini: GeminiSettings {
                api_key: non_blank(args.gemini_api_key),
                model: args.gemini_model,
                api_base: args.gemini_api_base,
            },
            proxy_url: non_blank(args.proxy_url),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            persona,
            capture_command: CommandTemplate::parse(args.capture_command.as_deref().unwrap_or_default()),
            capture_language: args.capture_language,
            tts_command,
            start_muted: args.start_muted,
            settle_delay: Duration::from_millis(args.settle_delay_ms),
            interrupt_relistens: args.interrupt_relistens,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(flags: &[&str]) -> Result<Config> {
        let args = Args::try_parse_from(std::iter::once("voice-chat-daemon").chain(flags.iter().copied()))?;
        Config::from_args(args, Some(PathBuf::from("/home/rev")))
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/rev/.local/share/voice-chat"));
        assert_eq!(config.socket_path, config.data_dir.join("daemon.sock"));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.persona.as_deref(), Some(DEFAULT_PERSONA));
        assert_eq!(config.gemini.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.capture_language, "en-US");
        assert!(!config.tts_command.is_empty());
        assert_eq!(config.settle_delay, Duration::from_millis(150));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            "--data-dir",
            "/tmp/voice",
            "--backend",
            "Proxy",
            "--proxy-url",
            "http://localhost:3001/api/chat",
            "--request-timeout-secs",
            "3",
            "--no-persona",
            "--no-tts",
            "--start-muted",
            "--interrupt-relistens",
            "--capture-command",
            "whisper-stream --lang {lang}",
        ])
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/voice/daemon.sock"));
        assert_eq!(config.backend, BackendKind::Proxy);
        assert_eq!(config.proxy_url.as_deref(), Some("http://localhost:3001/api/chat"));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert!(config.persona.is_none());
        assert!(config.tts_command.is_empty());
        assert!(!config.capture_command.is_empty());
        assert!(config.start_muted);
        assert!(config.interrupt_relistens);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&["--backend", "openai"]).is_err());
        assert!(config(&["--request-timeout-secs", "0"]).is_err());
        assert!(config(&["--request-timeout-secs", "soon"]).is_err());
        assert!(config(&["--settle-delay-ms", "-5"]).is_err());
    }

    #[test]
    fn test_missing_home_needs_data_dir() {
        let args = Args::try_parse_from(["voice-chat-daemon"]).unwrap();
        assert!(Config::from_args(args, None).is_err());
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let config = config(&["--gemini-api-key", "secret-key"]).unwrap();
        assert_eq!(config.gemini.api_key.as_deref(), Some("secret-key"));
        assert!(!format!("{config:?}").contains("secret-key"));
    }

    #[test]
    fn test_blank_key_counts_as_unset() {
        let config = config(&["--gemini-api-key", "  "]).unwrap();
        assert!(config.gemini.api_key.is_none());
    }
}

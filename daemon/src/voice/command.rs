//! Speech engines backed by external commands
//!
//! Capture runs a speech-to-text command and reads the transcript from its
//! stdout. Playback runs a text-to-speech command and feeds the text on
//! stdin. Cancelling either kills the child process.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CaptureOutcome, PlaybackOutcome, SpeechCapture, SpeechSynthesizer};

/// Placeholder replaced by the language tag in command templates
const LANG_PLACEHOLDER: &str = "{lang}";

/// A whitespace-separated argv with an optional `{lang}` placeholder.
///
/// No shell is involved, so the text being spoken never reaches an
/// interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Self {
        Self {
            argv: template.split_whitespace().map(str::to_owned).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Program and arguments with the language substituted
    pub fn render(&self, language: &str) -> Option<(String, Vec<String>)> {
        let (program, args) = self.argv.split_first()?;
        let args = args
            .iter()
            .map(|arg| arg.replace(LANG_PLACEHOLDER, language))
            .collect();
        Some((program.clone(), args))
    }

    fn command(&self, language: &str) -> Option<Command> {
        let (program, args) = self.render(language)?;
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        Some(command)
    }
}

/// Last non-empty line of a process's stderr
fn stderr_tail(stderr: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
}

/// Write `text` to the child's stdin, close it, and wait for exit
async fn feed_and_wait(child: &mut Child, stdin: Option<ChildStdin>, text: &str) -> std::io::Result<ExitStatus> {
    if let Some(mut stdin) = stdin {
        stdin.write_all(text.as_bytes()).await?;
        stdin.shutdown().await?;
    }
    child.wait().await
}

/// Speech-to-text through an external command
pub struct CommandCapture {
    template: CommandTemplate,
    language: String,
}

impl CommandCapture {
    pub fn new(template: CommandTemplate, language: impl Into<String>) -> Self {
        Self {
            template,
            language: language.into(),
        }
    }
}

#[async_trait]
impl SpeechCapture for CommandCapture {
    fn is_available(&self) -> bool {
        !self.template.is_empty()
    }

    async fn capture(&self, cancel: CancellationToken) -> CaptureOutcome {
        let Some(mut command) = self.template.command(&self.language) else {
            return CaptureOutcome::Failed("no capture command configured".to_string());
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return CaptureOutcome::Unavailable(format!("cannot run capture command: {e}"));
            }
            Err(e) => return CaptureOutcome::Failed(format!("failed to start capture command: {e}")),
        };
        debug!(pid = ?child.id(), "capture command started");

        tokio::select! {
            // Dropping the child kills it
            _ = cancel.cancelled() => {
                debug!("capture command cancelled");
                CaptureOutcome::Stopped
            }
            output = child.wait_with_output() => match output {
                Ok(output) if output.status.success() => {
                    let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if transcript.is_empty() {
                        CaptureOutcome::Stopped
                    } else {
                        CaptureOutcome::Final(transcript)
                    }
                }
                Ok(output) => CaptureOutcome::Failed(
                    stderr_tail(&output.stderr)
                        .unwrap_or_else(|| format!("capture command exited with {}", output.status)),
                ),
                Err(e) => CaptureOutcome::Failed(e.to_string()),
            },
        }
    }
}

/// Text-to-speech through an external command
pub struct CommandSynthesizer {
    template: CommandTemplate,
    /// Cancelled and replaced by `cancel_all`
    epoch: Mutex<CancellationToken>,
}

impl CommandSynthesizer {
    pub fn new(template: CommandTemplate) -> Self {
        Self {
            template,
            epoch: Mutex::new(CancellationToken::new()),
        }
    }

    fn current_epoch(&self) -> CancellationToken {
        self.epoch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn is_available(&self) -> bool {
        !self.template.is_empty()
    }

    async fn speak(&self, text: &str, language: &str, cancel: CancellationToken) -> PlaybackOutcome {
        let Some(mut command) = self.template.command(language) else {
            return PlaybackOutcome::Failed("no speech command configured".to_string());
        };
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return PlaybackOutcome::Failed(format!("failed to start speech command: {e}")),
        };
        debug!(pid = ?child.id(), language, "speech command started");

        let epoch = self.current_epoch();
        let stdin = child.stdin.take();

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = epoch.cancelled() => {}
            result = feed_and_wait(&mut child, stdin, text) => {
                return match result {
                    Ok(status) if status.success() => PlaybackOutcome::Completed,
                    Ok(status) => PlaybackOutcome::Failed(format!("speech command exited with {status}")),
                    Err(e) => PlaybackOutcome::Failed(e.to_string()),
                };
            }
        }

        if let Err(e) = child.start_kill() {
            warn!(?e, "failed to kill speech command");
        }
        PlaybackOutcome::Cancelled
    }

    fn cancel_all(&self) {
        let mut epoch = self
            .epoch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        epoch.cancel();
        *epoch = CancellationToken::new();
    }
}

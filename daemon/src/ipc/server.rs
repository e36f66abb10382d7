//! Unix domain socket server for IPC
//!
//! Provides request-response access to the voice session and pushes session
//! events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::state::SessionHandle;

use super::protocol::{DaemonStatus, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    session: SessionHandle,
    /// Source of session events for subscribed clients
    events: broadcast::Sender<SessionEvent>,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        session: SessionHandle,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            session,
            events,
            start_time: Instant::now(),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let session = self.session.clone();
                    let events = self.events.clone();
                    let start_time = self.start_time;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, session, events, start_time) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one client until it disconnects
async fn handle_client(
    stream: UnixStream,
    session: SessionHandle,
    events: broadcast::Sender<SessionEvent>,
    start_time: Instant,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();

    // Reading is not cancel-safe, so it gets its own task
    let (request_tx, mut request_rx) = mpsc::channel(8);
    let reader_task = tokio::spawn(async move {
        if let Err(e) = read_requests(reader, request_tx).await {
            warn!(?e, "failed to read from client");
        }
    });

    let mut subscription: Option<broadcast::Receiver<SessionEvent>> = None;

    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let response = match request {
                    Some(Ok(request)) => {
                        debug!(?request, "received request");
                        if request == Request::Subscribe && subscription.is_none() {
                            subscription = Some(events.subscribe());
                            debug!("client subscribed to notifications");
                        }
                        process_request(request, &session, start_time).await
                    }
                    Some(Err(message)) => Response::error("bad_request", message),
                    None => {
                        debug!("client disconnected");
                        break Ok(());
                    }
                };
                if let Err(e) = write_message(&mut writer, &response).await {
                    break Err(e);
                }
            }
            event = next_event(&mut subscription) => match event {
                Ok(event) => {
                    if let Err(e) = write_message(&mut writer, &Response::Event { event }).await {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    subscription = None;
                }
            },
        }
    };

    reader_task.abort();
    result
}

/// Next event for a subscribed client; never resolves otherwise
async fn next_event(
    subscription: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Parse framed requests off the socket. Malformed JSON is reported back to
/// the client rather than dropping the connection.
async fn read_requests<R: AsyncRead + Unpin>(
    mut reader: R,
    request_tx: mpsc::Sender<Result<Request, String>>,
) -> Result<()> {
    while let Some(body) = read_message(&mut reader).await? {
        let request = serde_json::from_slice::<Request>(&body)
            .map_err(|e| format!("failed to parse request: {e}"));
        if request_tx.send(request).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Read one length-prefixed message. `None` on clean EOF.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large ({len} bytes)");
    }

    // Read message body
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message. A message over the size limit is
/// replaced by a `too_large` error so the peer never sees a frame it would
/// refuse.
async fn write_message<W: AsyncWrite + Unpin, T: serde::Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let mut msg_bytes = serde_json::to_vec(msg)?;
    if msg_bytes.len() > MAX_MESSAGE_LEN {
        warn!(len = msg_bytes.len(), "outgoing message too large");
        let error = Response::error(
            "too_large",
            format!("response of {} bytes exceeds the {MAX_MESSAGE_LEN} byte limit", msg_bytes.len()),
        );
        msg_bytes = serde_json::to_vec(&error)?;
    }
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

/// Process a request and return a response
async fn process_request(request: Request, session: &SessionHandle, start_time: Instant) -> Response {
    let result = match request {
        Request::Ping => return Response::Pong,
        Request::Subscribe => return Response::Subscribed,
        Request::GetStatus => session.snapshot().await.map(|session| {
            Response::Status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: start_time.elapsed().as_secs(),
                session,
            })
        }),
        Request::GetLog => session.log().await.map(|turns| Response::Log { turns }),
        Request::Activate => session
            .activate()
            .await
            .map(|outcome| Response::Activated { outcome }),
        Request::Release => session
            .release()
            .await
            .map(|stopped| Response::Released { stopped }),
        Request::Cancel => session
            .cancel()
            .await
            .map(|cancelled| Response::Cancelled { cancelled }),
        Request::ToggleMute => session.toggle_mute().await.map(|muted| Response::Muted { muted }),
        Request::SetMuted { muted } => session
            .set_muted(muted)
            .await
            .map(|muted| Response::Muted { muted }),
    };

    result.unwrap_or_else(|e| {
        warn!(?e, "session request failed");
        Response::error("session_unavailable", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActivateOutcome, SessionSnapshot, SessionState, Turn};

    #[tokio::test]
    async fn test_framing_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_message(&mut client, &Request::Ping).await.unwrap();
        drop(client);

        let body = read_message(&mut server).await.unwrap().unwrap();
        let request: Request = serde_json::from_slice(&body).unwrap();
        assert_eq!(request, Request::Ping);
        assert!(read_message(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_MESSAGE_LEN as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_response_replaced_with_error() {
        let turns = vec![Turn::new("Hello", "x".repeat(MAX_MESSAGE_LEN))];
        let mut buf = Vec::new();
        write_message(&mut buf, &Response::Log { turns }).await.unwrap();

        let body = read_message(&mut buf.as_slice()).await.unwrap().unwrap();
        match serde_json::from_slice::<Response>(&body).unwrap() {
            Response::Error { code, .. } => assert_eq!(code, "too_large"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_request_reported() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel(4);
        let reader = tokio::spawn(read_requests(server, tx));

        let body = br#"{"type":"explode"}"#;
        client.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();
        drop(client);

        assert!(rx.recv().await.unwrap().is_err());
        reader.await.unwrap().unwrap();
    }

    /// Answers session commands the way a live session would
    fn fake_session() -> SessionHandle {
        use crate::state::Command;

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Activate(reply) => {
                        let _ = reply.send(ActivateOutcome::Listening);
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(SessionSnapshot {
                            state: SessionState::Listening,
                            muted: false,
                            transcript: None,
                            reply: None,
                            error: None,
                            turns: 0,
                        });
                    }
                    _ => {}
                }
            }
        });
        SessionHandle::new(tx)
    }

    #[tokio::test]
    async fn test_process_request() {
        let session = fake_session();
        let start = Instant::now();

        assert_eq!(process_request(Request::Ping, &session, start).await, Response::Pong);
        assert_eq!(
            process_request(Request::Activate, &session, start).await,
            Response::Activated {
                outcome: ActivateOutcome::Listening
            }
        );
        match process_request(Request::GetStatus, &session, start).await {
            Response::Status(status) => assert_eq!(status.session.state, SessionState::Listening),
            other => panic!("unexpected response: {other:?}"),
        }
        // Unanswered command: the fake drops the reply sender
        assert!(matches!(
            process_request(Request::Cancel, &session, start).await,
            Response::Error { .. }
        ));
    }
}

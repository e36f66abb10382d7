//! Conversational backend client
//!
//! Sends a transcript plus the persona instruction to a remote endpoint and
//! returns the reply text. The client never touches session state; the
//! controller decides what to do with the result.

mod gemini;
mod proxy;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::error::SessionError;

pub use gemini::{GeminiBackend, GeminiSettings};
pub use proxy::ProxyBackend;

/// Classified backend failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Missing credentials or endpoint, or the endpoint cannot be reached
    #[error("{0}")]
    Unavailable(String),

    #[error("no response within the request timeout")]
    Timeout,

    /// The endpoint answered without a usable reply
    #[error("{0}")]
    Remote(String),
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => SessionError::BackendUnavailable(reason),
            BackendError::Timeout => SessionError::BackendTimeout,
            BackendError::Remote(reason) => SessionError::BackendRemoteError(reason),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Remote(err.to_string())
        }
    }
}

/// A request/response conversational endpoint
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with `Unavailable` when the backend is not configured, so the
    /// problem is reported before any round trip is attempted.
    fn check(&self) -> Result<(), BackendError>;

    async fn converse(&self, transcript: &str, persona: Option<&str>) -> Result<String, BackendError>;
}

/// Run one backend call bounded by `timeout`.
///
/// On expiry the call's future is dropped, which aborts the HTTP request.
pub async fn converse_with_timeout(
    backend: &dyn Backend,
    transcript: &str,
    persona: Option<&str>,
    timeout: Duration,
) -> Result<String, BackendError> {
    match tokio::time::timeout(timeout, backend.converse(transcript, persona)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout),
    }
}

/// Shared HTTP client for backends
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("voice-chat-daemon/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// Trimmed reply, or `None` when there is nothing to say
fn non_empty(reply: Option<String>) -> Option<String> {
    reply
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Turn an unsuccessful HTTP response into a `Remote` error
async fn remote_error(response: reqwest::Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        BackendError::Remote(format!("HTTP {status}"))
    } else {
        BackendError::Remote(format!("HTTP {status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Backend for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn check(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn converse(&self, _: &str, _: Option<&str>) -> Result<String, BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_classified() {
        let result = converse_with_timeout(&Slow, "Hello", None, Duration::from_secs(10)).await;
        assert_eq!(result, Err(BackendError::Timeout));
    }

    #[test]
    fn test_errors_map_to_session_taxonomy() {
        assert_eq!(
            SessionError::from(BackendError::Unavailable("no key".into())),
            SessionError::BackendUnavailable("no key".into())
        );
        assert_eq!(SessionError::from(BackendError::Timeout), SessionError::BackendTimeout);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  Hi \n".into())), Some("Hi".into()));
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(None), None);
    }
}

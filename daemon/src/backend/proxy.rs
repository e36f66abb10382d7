//! JSON proxy backend
//!
//! POSTs `{transcript, persona}` to a server that holds the real model
//! credentials and answers `{response}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{non_empty, remote_error, Backend, BackendError};

#[derive(Serialize)]
struct ProxyRequest<'a> {
    transcript: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    persona: Option<&'a str>,
}

#[derive(Deserialize)]
struct ProxyReply {
    #[serde(default, alias = "reply")]
    response: Option<String>,
}

pub struct ProxyBackend {
    client: reqwest::Client,
    url: Option<String>,
}

impl ProxyBackend {
    pub fn new(client: reqwest::Client, url: Option<String>) -> Self {
        Self { client, url }
    }

    fn url(&self) -> Result<&str, BackendError> {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| BackendError::Unavailable("proxy URL is not set".to_string()))
    }
}

#[async_trait]
impl Backend for ProxyBackend {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn check(&self) -> Result<(), BackendError> {
        self.url().map(|_| ())
    }

    async fn converse(&self, transcript: &str, persona: Option<&str>) -> Result<String, BackendError> {
        let url = self.url()?;
        debug!(%url, chars = transcript.chars().count(), "sending transcript to proxy");

        let response = self
            .client
            .post(url)
            .json(&ProxyRequest { transcript, persona })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let reply: ProxyReply = response.json().await?;
        non_empty(reply.response)
            .ok_or_else(|| BackendError::Remote("no response from the assistant".to_string()))
    }
}

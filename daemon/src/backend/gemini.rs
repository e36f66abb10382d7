//! Gemini `generateContent` backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{non_empty, remote_error, Backend, BackendError};

/// Connection settings for Gemini
#[derive(Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

impl std::fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, all text parts joined
    fn reply(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        non_empty(Some(text))
    }
}

fn request_body<'a>(transcript: &'a str, persona: Option<&'a str>) -> GenerateRequest<'a> {
    GenerateRequest {
        system_instruction: persona.map(|text| Content {
            role: None,
            parts: vec![Part { text }],
        }),
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part { text: transcript }],
        }],
    }
}

/// Talks to the Gemini API directly
pub struct GeminiBackend {
    client: reqwest::Client,
    settings: GeminiSettings,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, settings: GeminiSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BackendError::Unavailable("Gemini API key is not set".to_string()))
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn check(&self) -> Result<(), BackendError> {
        self.api_key().map(|_| ())
    }

    async fn converse(&self, transcript: &str, persona: Option<&str>) -> Result<String, BackendError> {
        let api_key = self.api_key()?;
        debug!(model = %self.settings.model, chars = transcript.chars().count(), "sending transcript to Gemini");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&request_body(transcript, persona))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let body: GenerateResponse = response.json().await?;
        body.reply()
            .ok_or_else(|| BackendError::Remote("no response from Gemini".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(api_key: Option<&str>) -> GeminiBackend {
        GeminiBackend::new(
            reqwest::Client::new(),
            GeminiSettings {
                api_key: api_key.map(str::to_owned),
                model: "gemini-1.5-flash".to_string(),
                api_base: "https://example.test/v1beta/".to_string(),
            },
        )
    }

    #[test]
    fn test_missing_key_detected_before_call() {
        assert!(matches!(backend(None).check(), Err(BackendError::Unavailable(_))));
        assert!(matches!(backend(Some("  ")).check(), Err(BackendError::Unavailable(_))));
        assert!(backend(Some("k")).check().is_ok());
    }

    #[tokio::test]
    async fn test_converse_without_key_fails_fast() {
        let result = backend(None).converse("Hello", None).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[test]
    fn test_url() {
        assert_eq!(
            backend(Some("k")).url(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body_carries_persona_as_system_instruction() {
        let json = serde_json::to_value(request_body("Hello", Some("You are Rev."))).unwrap();
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "You are Rev.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello");

        let json = serde_json::to_value(request_body("Hello", None)).unwrap();
        assert!(json.get("system_instruction").is_none());
    }

    #[test]
    fn test_reply_extraction() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi "},{"text":"there"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(body.reply(), Some("Hi there".to_string()));
    }

    #[test]
    fn test_empty_reply_is_none() {
        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(blocked.reply(), None);

        let blank: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#).unwrap();
        assert_eq!(blank.reply(), None);
    }
}

//! Gemini API client for text generation with per-model quota fall-through.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Returned when a model answers successfully but with no text.
pub const EMPTY_REPLY: &str = "Sorry, I couldn't put a reply together just now. Could you send that again?";

static RETRY_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retry in ([0-9]+(?:\.[0-9]+)?)s").expect("valid regex"));
static RETRY_DELAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retryDelay[^\d]*([0-9]+)s").expect("valid regex"));

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    /// Tried in order; a quota error moves on to the next one.
    models: Vec<String>,
    client: reqwest::Client,
}

/// Outcome of a generation attempt across all candidate models.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text { text: String, model: String },
    /// Every candidate model reported quota exhaustion.
    QuotaExceeded { retry_after: Option<u64> },
}

#[derive(Debug)]
pub enum GeminiError {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
}

impl fmt::Display for GeminiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeminiError::Http(e) => write!(f, "HTTP error: {e}"),
            GeminiError::Api { status, body } => write!(f, "API error {status}: {body}"),
            GeminiError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for GeminiError {}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    #[serde(default)]
    status: String,
}

/// Result of calling one model.
enum Attempt {
    Text(String),
    Quota(Option<u64>),
}

impl GeminiClient {
    pub fn with_base_url(api_key: String, base_url: String, models: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            models,
            client,
        }
    }

    /// Generate text for a prompt, falling through the model list on quota errors.
    pub async fn generate(&self, prompt: &str) -> Result<Generation, GeminiError> {
        let mut last_retry = None;

        for model in &self.models {
            match self.call_model(model, prompt).await? {
                Attempt::Text(text) => {
                    info!("✨ Generated {} chars with {}", text.chars().count(), model);
                    let text = if text.trim().is_empty() { EMPTY_REPLY.to_string() } else { text };
                    return Ok(Generation::Text { text, model: model.clone() });
                }
                Attempt::Quota(retry) => {
                    warn!("Quota exceeded on {} (retry hint: {:?})", model, retry);
                    last_retry = retry.or(last_retry);
                }
            }
        }

        Ok(Generation::QuotaExceeded { retry_after: last_retry })
    }

    async fn call_model(&self, model: &str, prompt: &str) -> Result<Attempt, GeminiError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!("{}/v1/models/{}:generateContent?key={}", self.base_url, model, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeminiError::Http(format!("failed to read response: {}", e.without_url())))?;

        debug!("Gemini response status for {model}: {status}");

        if is_quota_error(status, &body) {
            return Ok(Attempt::Quota(extract_retry_seconds(&body)));
        }

        if !status.is_success() {
            return Err(GeminiError::Api { status: status.as_u16(), body });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| GeminiError::Parse(e.to_string()))?;

        let text = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Attempt::Text(text))
    }
}

/// 429, or an error body whose status is `RESOURCE_EXHAUSTED`. Successful
/// responses never count, whatever the generated text says.
fn is_quota_error(status: reqwest::StatusCode, body: &str) -> bool {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status.is_success() {
        return false;
    }
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.status == "RESOURCE_EXHAUSTED",
        Err(_) => body.contains("RESOURCE_EXHAUSTED"),
    }
}

/// Pull a retry hint out of a quota error ("retry in 38.5s" or `retryDelay: "36s"`).
pub fn extract_retry_seconds(message: &str) -> Option<u64> {
    if let Some(caps) = RETRY_IN.captures(message) {
        return caps[1].parse::<f64>().ok().map(|s| s as u64);
    }
    RETRY_DELAY
        .captures(message)
        .and_then(|caps| caps[1].parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server, models: &[&str]) -> GeminiClient {
        GeminiClient::with_base_url(
            "test-key".to_string(),
            server.url(),
            models.iter().map(|m| m.to_string()).collect(),
        )
    }

    fn text_body(text: &str) -> String {
        json!({
            "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
        })
        .to_string()
    }

    fn quota_body() -> String {
        json!({
            "error": {
                "code": 429,
                "message": "You exceeded your current quota. Please retry in 38.507s.",
                "status": "RESOURCE_EXHAUSTED"
            }
        })
        .to_string()
    }

    #[test]
    fn test_extract_retry_in() {
        assert_eq!(extract_retry_seconds("Please retry in 38.507s."), Some(38));
        assert_eq!(extract_retry_seconds("Please retry in 5s"), Some(5));
    }

    #[test]
    fn test_extract_retry_delay() {
        assert_eq!(extract_retry_seconds(r#"{"retryDelay": "36s"}"#), Some(36));
        assert_eq!(extract_retry_seconds("'retryDelay': '12s'"), Some(12));
    }

    #[test]
    fn test_extract_retry_missing() {
        assert_eq!(extract_retry_seconds("quota exhausted"), None);
    }

    #[tokio::test]
    async fn test_generate_success() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(text_body("Nice work today. What will you try tomorrow?"))
            .create_async()
            .await;

        let result = client(&server, &["gemini-a"]).generate("prompt").await.unwrap();
        assert_eq!(
            result,
            Generation::Text {
                text: "Nice work today. What will you try tomorrow?".to_string(),
                model: "gemini-a".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_generate_success_mentioning_quota_is_text() {
        let mut server = Server::new_async().await;
        let answer = "A RESOURCE_EXHAUSTED error in your project means you hit a limit. Pace yourself tomorrow.";
        let a = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(200)
            .with_body(text_body(answer))
            .create_async()
            .await;
        let b = server
            .mock("POST", Matcher::Regex("gemini-b:generateContent".into()))
            .with_status(200)
            .with_body(text_body("unreachable"))
            .expect(0)
            .create_async()
            .await;

        let result = client(&server, &["gemini-a", "gemini-b"]).generate("prompt").await.unwrap();
        assert_eq!(
            result,
            Generation::Text { text: answer.to_string(), model: "gemini-a".to_string() }
        );
        a.assert_async().await;
        b.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_resource_exhausted_status_falls_through() {
        let mut server = Server::new_async().await;
        let _a = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(400)
            .with_body(r#"{"error": {"code": 400, "message": "limit", "status": "RESOURCE_EXHAUSTED"}}"#)
            .create_async()
            .await;
        let _b = server
            .mock("POST", Matcher::Regex("gemini-b:generateContent".into()))
            .with_status(200)
            .with_body(text_body("from b"))
            .create_async()
            .await;

        let result = client(&server, &["gemini-a", "gemini-b"]).generate("prompt").await.unwrap();
        assert_eq!(
            result,
            Generation::Text { text: "from b".to_string(), model: "gemini-b".to_string() }
        );
    }

    #[test]
    fn test_is_quota_error() {
        use reqwest::StatusCode;
        assert!(is_quota_error(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_quota_error(StatusCode::BAD_REQUEST, &quota_body()));
        assert!(!is_quota_error(StatusCode::OK, &text_body("RESOURCE_EXHAUSTED")));
        assert!(!is_quota_error(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": 403, "message": "not RESOURCE_EXHAUSTED", "status": "PERMISSION_DENIED"}}"#
        ));
    }

    #[tokio::test]
    async fn test_generate_falls_through_on_quota() {
        let mut server = Server::new_async().await;
        let _a = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(429)
            .with_body(quota_body())
            .create_async()
            .await;
        let _b = server
            .mock("POST", Matcher::Regex("gemini-b:generateContent".into()))
            .with_status(200)
            .with_body(text_body("from b"))
            .create_async()
            .await;

        let result = client(&server, &["gemini-a", "gemini-b"]).generate("prompt").await.unwrap();
        assert_eq!(
            result,
            Generation::Text { text: "from b".to_string(), model: "gemini-b".to_string() }
        );
    }

    #[tokio::test]
    async fn test_generate_all_exhausted() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex(":generateContent".into()))
            .with_status(429)
            .with_body(quota_body())
            .expect(2)
            .create_async()
            .await;

        let result = client(&server, &["gemini-a", "gemini-b"]).generate("prompt").await.unwrap();
        assert_eq!(result, Generation::QuotaExceeded { retry_after: Some(38) });
    }

    #[tokio::test]
    async fn test_generate_other_error_stops() {
        let mut server = Server::new_async().await;
        let _a = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(403)
            .with_body(r#"{"error": {"code": 403, "status": "PERMISSION_DENIED"}}"#)
            .create_async()
            .await;
        let b = server
            .mock("POST", Matcher::Regex("gemini-b:generateContent".into()))
            .with_status(200)
            .with_body(text_body("unreachable"))
            .expect(0)
            .create_async()
            .await;

        let err = client(&server, &["gemini-a", "gemini-b"]).generate("prompt").await.unwrap_err();
        assert!(matches!(err, GeminiError::Api { status: 403, .. }));
        b.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_empty_text_uses_placeholder() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex("gemini-a:generateContent".into()))
            .with_status(200)
            .with_body(json!({"candidates": [{"content": {"parts": []}}]}).to_string())
            .create_async()
            .await;

        let result = client(&server, &["gemini-a"]).generate("prompt").await.unwrap();
        assert_eq!(
            result,
            Generation::Text { text: EMPTY_REPLY.to_string(), model: "gemini-a".to_string() }
        );
    }
}

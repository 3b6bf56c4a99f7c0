//! LINE Messaging API: webhook parsing, signature check and send client.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assistant::gateway::{GatewayError, Messenger, clamp_text};

pub const LINE_API_URL: &str = "https://api.line.me";

/// LINE rejects text messages longer than this.
const MAX_TEXT_CHARS: usize = 5000;

/// Check `X-Line-Signature`: base64 HMAC-SHA256 of the raw body keyed by the channel secret.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Deserialize, Debug)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    reply_token: Option<String>,
    source: Option<EventSource>,
    message: Option<EventMessage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    user_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EventMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// A text message event worth answering.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    pub reply_token: String,
    /// Missing for some group/room sources.
    pub user_id: Option<String>,
    pub text: String,
}

/// Extract text message events from a webhook body. Other events are skipped.
pub fn parse_text_events(body: &[u8]) -> Result<Vec<TextEvent>, serde_json::Error> {
    let parsed: WebhookBody = serde_json::from_slice(body)?;

    let events = parsed
        .events
        .into_iter()
        .filter_map(|event| {
            if event.kind != "message" {
                debug!("Skipping LINE event of type {}", event.kind);
                return None;
            }
            let message = event.message?;
            if message.kind != "text" {
                debug!("Skipping LINE message of type {}", message.kind);
                return None;
            }
            Some(TextEvent {
                reply_token: event.reply_token?,
                user_id: event.source.and_then(|s| s.user_id),
                text: message.text.unwrap_or_default().trim().to_string(),
            })
        })
        .collect();

    Ok(events)
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage<'a>>,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<TextMessage<'a>>,
}

/// LINE send client.
pub struct LineClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl LineClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, LINE_API_URL.to_string())
    }

    pub fn with_base_url(access_token: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post<T: Serialize>(&self, path: &str, payload: &T) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("LINE request failed: {e}");
                warn!("{}", msg);
                GatewayError::Http(msg)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LINE {} returned {}: {}", path, status, body);
            return Err(GatewayError::Api { status: status.as_u16(), body });
        }

        Ok(())
    }
}

impl Messenger for LineClient {
    /// The event's reply token.
    type Target = String;

    async fn reply(&self, reply_token: &String, text: &str) -> Result<(), GatewayError> {
        let text = clamp_text(text, MAX_TEXT_CHARS);
        let request = ReplyRequest {
            reply_token,
            messages: vec![TextMessage { kind: "text", text: &text }],
        };
        self.post("/v2/bot/message/reply", &request).await
    }

    async fn push(&self, user_id: &str, text: &str) -> Result<(), GatewayError> {
        info!("📤 Pushing to LINE user {}", user_id);
        let text = clamp_text(text, MAX_TEXT_CHARS);
        let request = PushRequest {
            to: user_id,
            messages: vec![TextMessage { kind: "text", text: &text }],
        };
        self.post("/v2/bot/message/push", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_accepts_valid() {
        let body = br#"{"events":[]}"#;
        let signature = sign("secret", body);
        assert!(verify_signature("secret", body, &signature));
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let signature = sign("secret", br#"{"events":[]}"#);
        assert!(!verify_signature("secret", br#"{"events":[{}]}"#, &signature));
    }

    #[test]
    fn test_signature_rejects_wrong_secret_and_garbage() {
        let body = br#"{"events":[]}"#;
        assert!(!verify_signature("other", body, &sign("secret", body)));
        assert!(!verify_signature("secret", body, "not base64!!"));
        assert!(!verify_signature("secret", body, ""));
    }

    #[test]
    fn test_parse_text_events() {
        let body = json!({
            "destination": "U0",
            "events": [
                {
                    "type": "message",
                    "replyToken": "tok-1",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "text", "id": "1", "text": "  studied today  "}
                },
                {
                    "type": "message",
                    "replyToken": "tok-2",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "sticker", "id": "2"}
                },
                {
                    "type": "follow",
                    "replyToken": "tok-3",
                    "source": {"type": "user", "userId": "U123"}
                },
                {
                    "type": "message",
                    "replyToken": "tok-4",
                    "source": {"type": "room", "roomId": "R1"},
                    "message": {"type": "text", "id": "3", "text": "hi"}
                }
            ]
        })
        .to_string();

        let events = parse_text_events(body.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                TextEvent {
                    reply_token: "tok-1".to_string(),
                    user_id: Some("U123".to_string()),
                    text: "studied today".to_string(),
                },
                TextEvent {
                    reply_token: "tok-4".to_string(),
                    user_id: None,
                    text: "hi".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(parse_text_events(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_reply_posts_to_reply_endpoint() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/v2/bot/message/reply")
            .match_header("authorization", "Bearer token-abc")
            .match_body(Matcher::Json(json!({
                "replyToken": "tok-1",
                "messages": [{"type": "text", "text": "hello"}]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = LineClient::with_base_url("token-abc".to_string(), server.url());
        client.reply(&"tok-1".to_string(), "hello").await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_surfaces_api_errors() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v2/bot/message/push")
            .with_status(400)
            .with_body(r#"{"message":"The request body has 1 error(s)"}"#)
            .create_async()
            .await;

        let client = LineClient::with_base_url("token-abc".to_string(), server.url());
        let err = client.push("U123", "hello").await.unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 400, .. }));
    }
}

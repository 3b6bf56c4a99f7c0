//! HTTP server for the LINE webhook.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assistant::engine::{Engine, NO_USER_REPLY};
use crate::assistant::gateway::Messenger;
use crate::assistant::line::{self, LineClient, TextEvent};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub line: Arc<LineClient>,
    pub channel_secret: Arc<str>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callback", post(callback))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening for LINE webhooks on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await
}

async fn health() -> &'static str {
    "ok"
}

/// Bad signatures get 400. Everything else gets 200, even when handling
/// fails, so LINE does not keep redelivering the same events.
async fn callback(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !line::verify_signature(&state.channel_secret, &body, signature) {
        warn!("Rejected webhook with invalid signature");
        return StatusCode::BAD_REQUEST;
    }

    let events = match line::parse_text_events(&body) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to parse webhook body: {e}");
            return StatusCode::OK;
        }
    };

    for event in events {
        handle_event(&state, event).await;
    }

    StatusCode::OK
}

async fn handle_event(state: &AppState, event: TextEvent) {
    let Some(user_id) = event.user_id else {
        if let Err(e) = state.line.reply(&event.reply_token, NO_USER_REPLY).await {
            warn!("Failed to reply to event without user: {e}");
        }
        return;
    };

    let preview: String = event.text.chars().take(100).collect();
    info!("📨 Message from {}: \"{}\"", user_id, preview);

    let reply = match state.engine.handle_text(&user_id, &event.text).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Failed to handle message from {}: {}", user_id, e);
            return;
        }
    };

    if let Err(e) = state.line.reply(&event.reply_token, &reply).await {
        warn!("Failed to reply to {}: {}", user_id, e);
    }
}

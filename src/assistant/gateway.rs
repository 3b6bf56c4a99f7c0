//! Outbound side of the messaging platforms.

use std::fmt;
use std::future::Future;

#[derive(Debug)]
pub enum GatewayError {
    /// Transport failure talking to the platform.
    Http(String),
    /// The platform rejected the request.
    Api { status: u16, body: String },
    /// The recipient id is not valid for this platform.
    InvalidRecipient(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Http(e) => write!(f, "HTTP error: {e}"),
            GatewayError::Api { status, body } => write!(f, "platform error {status}: {body}"),
            GatewayError::InvalidRecipient(id) => write!(f, "invalid recipient: {id}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Sends replies and pushes on one messaging platform.
pub trait Messenger: Send + Sync {
    /// Whatever the platform needs to answer a specific inbound message.
    type Target: Send + Sync;

    /// Answer an inbound message.
    fn reply(&self, target: &Self::Target, text: &str) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Send a message the user did not ask for.
    fn push(&self, user_id: &str, text: &str) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Safely truncate a string to a platform's length limit, counted in chars.
pub fn clamp_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

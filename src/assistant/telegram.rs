//! Telegram client using teloxide.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatKind, MessageId, ReplyParameters};
use tracing::{error, info, warn};

use crate::assistant::engine::Engine;
use crate::assistant::gateway::{GatewayError, Messenger, clamp_text};

/// Telegram rejects text messages longer than this.
const MAX_TEXT_CHARS: usize = 4096;

/// Where to send a reply: the chat and the message being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelegramReply {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<(), GatewayError> {
        let text = clamp_text(text, MAX_TEXT_CHARS);
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id)));
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            GatewayError::Http(msg)
        })
    }
}

impl Messenger for TelegramClient {
    type Target = TelegramReply;

    async fn reply(&self, target: &TelegramReply, text: &str) -> Result<(), GatewayError> {
        self.send(target.chat_id, text, Some(target.message_id)).await
    }

    async fn push(&self, user_id: &str, text: &str) -> Result<(), GatewayError> {
        let chat_id = parse_chat_id(user_id)?;
        info!("📤 Pushing to Telegram chat {}", chat_id);
        self.send(chat_id, text, None).await
    }
}

/// Users are stored by their private chat id.
fn parse_chat_id(user_id: &str) -> Result<i64, GatewayError> {
    user_id
        .parse::<i64>()
        .map_err(|_| GatewayError::InvalidRecipient(user_id.to_string()))
}

/// Run the update dispatcher until ctrl-c.
pub async fn run(bot: Bot, engine: Arc<Engine>, telegram: Arc<TelegramClient>) {
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine, telegram])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(
    msg: Message,
    engine: Arc<Engine>,
    telegram: Arc<TelegramClient>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    // Check-ins are one-to-one; groups have no single user to log for.
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }

    let target = TelegramReply {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    };

    let user_id = msg.chat.id.0.to_string();
    info!("📨 Message from Telegram chat {}", user_id);

    match engine.handle_text(&user_id, text).await {
        Ok(reply) => {
            if let Err(e) = telegram.reply(&target, &reply).await {
                warn!("Failed to reply to {}: {}", user_id, e);
            }
        }
        Err(e) => error!("Failed to handle message from {}: {}", user_id, e),
    }

    Ok(())
}

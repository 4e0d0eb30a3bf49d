//! Telegram update handlers.

use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use super::messaging::{self, Layout};
use crate::pipeline::{InboundMessage, Outcome, Pipeline};

/// Rate-limit identity of a message's sender.
///
/// Anonymous admins and channel posts carry a `sender_chat`; they are keyed
/// on that chat instead of the placeholder user Telegram puts in `from`.
#[must_use]
pub fn sender_key(msg: &Message) -> String {
    sender_identity(
        msg.sender_chat.as_ref().map(|chat| chat.id.0),
        msg.from.as_ref().map(|user| user.id.0),
    )
}

fn sender_identity(sender_chat: Option<i64>, user: Option<u64>) -> String {
    match (sender_chat, user) {
        (Some(chat), _) => format!("chat:{chat}"),
        (None, Some(user)) => user.to_string(),
        (None, None) => "0".to_string(),
    }
}

/// Text of a message, falling back to the caption of media messages.
#[must_use]
pub fn message_body(msg: &Message) -> Option<&str> {
    msg.text().or_else(|| msg.caption())
}

/// Handles a new message: resolves the galleries it links and replies.
///
/// # Errors
///
/// Returns an error if sending the response fails after retries.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    pipeline: Arc<Pipeline>,
    layout: Layout,
) -> anyhow::Result<()> {
    handle(bot, msg, pipeline, layout, false).await
}

/// Handles an edited message.
///
/// Edits go through the pipeline like new messages and are dropped there.
///
/// # Errors
///
/// Returns an error if sending the response fails after retries.
pub async fn handle_edited_message(
    bot: Bot,
    msg: Message,
    pipeline: Arc<Pipeline>,
    layout: Layout,
) -> anyhow::Result<()> {
    handle(bot, msg, pipeline, layout, true).await
}

async fn handle(
    bot: Bot,
    msg: Message,
    pipeline: Arc<Pipeline>,
    layout: Layout,
    edited: bool,
) -> anyhow::Result<()> {
    let Some(body) = message_body(&msg) else {
        return Ok(());
    };

    let sender = sender_key(&msg);
    let room = msg.chat.id.0.to_string();
    let inbound = InboundMessage {
        sender: &sender,
        room: &room,
        body,
        edited,
    };

    match pipeline.handle(&inbound).await {
        Outcome::Galleries(galleries) if !galleries.is_empty() => {
            messaging::send_galleries(&bot, msg.chat.id, layout, &galleries).await
        }
        Outcome::Rejected(rejection) => {
            debug!("Dropping message from {} in {}: {}", sender, room, rejection);
            Ok(())
        }
        Outcome::Galleries(_) | Outcome::Ignored | Outcome::NoLinks => Ok(()),
    }
}

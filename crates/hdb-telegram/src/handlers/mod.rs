//! Telegram update handlers.
//!
//! Only the claim commands are handled; every other message in a helpdesk
//! group is ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use hdb_core::domain::{ChatId, MessageId, MessageRef};

use crate::router::AppState;

pub mod commands;

use commands::{ClaimCommand, CommandContext, Sender};

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(command) = msg.text().and_then(ClaimCommand::parse) else {
        return Ok(());
    };

    if !state.cfg.allows_chat(msg.chat.id.0) {
        let _ = bot
            .send_message(msg.chat.id, "This chat is not a helpdesk chat.")
            .await;
        return Ok(());
    }

    let ctx = context_of(&msg);
    commands::run(&state, command, &ctx).await;
    Ok(())
}

fn context_of(msg: &Message) -> CommandContext {
    let chat_id = ChatId(msg.chat.id.0);
    CommandContext {
        message: MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        },
        reply_to: msg.reply_to_message().map(|r| MessageRef {
            chat_id,
            message_id: MessageId(r.id.0),
        }),
        sender: msg.from().map(|u| Sender {
            identity: u.id.0.to_string(),
            display_name: u.full_name(),
        }),
    }
}

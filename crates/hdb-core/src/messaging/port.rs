use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    Result,
};

/// Cross-messenger port.
///
/// Telegram is the only implementation; the notifier and command replies go
/// through this so the claim flow can be exercised without a bot token.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    /// Send `html` as a reply to `to` in the same chat.
    async fn reply_html(&self, to: MessageRef, html: &str) -> Result<MessageRef>;
}

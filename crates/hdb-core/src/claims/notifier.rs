use std::sync::Arc;

use crate::{
    domain::{ChatId, MessageRef},
    formatting::ticket_notification_html,
    messaging::port::MessagingPort,
    Result,
};

use super::{coordinator::ClaimCoordinator, record::ClaimKey};

#[derive(Clone, Debug)]
pub struct TicketNotification {
    pub ticket_id: String,
    pub summary: Option<String>,
}

/// Posts ticket notifications to a group chat and registers them for claiming.
pub struct TicketNotifier {
    messenger: Arc<dyn MessagingPort>,
    claims: Arc<ClaimCoordinator>,
}

impl TicketNotifier {
    pub fn new(messenger: Arc<dyn MessagingPort>, claims: Arc<ClaimCoordinator>) -> Self {
        Self { messenger, claims }
    }

    /// Send the notification, then record it. A failed record write does not
    /// fail the post.
    pub async fn post(&self, chat_id: ChatId, ticket: &TicketNotification) -> Result<MessageRef> {
        let html = ticket_notification_html(&ticket.ticket_id, ticket.summary.as_deref());
        let msg = self.messenger.send_html(chat_id, &html).await?;

        let key = ClaimKey::from(msg);
        // Logged by the coordinator.
        let _ = self
            .claims
            .store_ticket_notification(&ticket.ticket_id, &key.chat_id, &key.notification_message_id)
            .await;

        Ok(msg)
    }
}

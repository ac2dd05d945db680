use tracing::warn;

use hdb_core::{
    claims::{notifier::TicketNotification, ClaimKey},
    formatting::{claim_reply_html, escape_html, unclaim_reply_html},
};

use crate::router::AppState;

const HELP_HTML: &str = "<b>Helpdesk claims</b>\n\n\
Reply to a ticket notification with:\n\
• <code>/claim</code> to take the ticket\n\
• <code>/unclaim</code> (or <code>/release</code>) to hand it back\n\n\
<code>/ticket &lt;id&gt; [summary]</code> posts a new notification.";

const NEEDS_REPLY_HTML: &str = "↪️ Reply to the ticket notification with this command.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimCommand {
    Ticket {
        ticket_id: Option<String>,
        summary: Option<String>,
    },
    Claim,
    Unclaim,
    Help,
}

impl ClaimCommand {
    /// Parse a command message; anything that is not one of ours is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('/') {
            return None;
        }
        let (cmd, args) = parse_command(text);
        match cmd.as_str() {
            "claim" => Some(Self::Claim),
            "unclaim" | "release" => Some(Self::Unclaim),
            "help" | "start" => Some(Self::Help),
            "ticket" => {
                let mut parts = args.splitn(2, char::is_whitespace);
                let ticket_id = parts
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let summary = parts
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(Self::Ticket { ticket_id, summary })
            }
            _ => None,
        }
    }
}

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[derive(Clone, Debug)]
pub struct Sender {
    pub identity: String,
    pub display_name: String,
}

/// Messenger-neutral view of the message that carried a command.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub message: hdb_core::domain::MessageRef,
    pub reply_to: Option<hdb_core::domain::MessageRef>,
    pub sender: Option<Sender>,
}

/// Execute `command` and send the reply (if any) back to the command message.
pub async fn run(state: &AppState, command: ClaimCommand, ctx: &CommandContext) {
    let Some(html) = respond(state, command, ctx).await else {
        return;
    };
    if let Err(e) = state.messenger.reply_html(ctx.message, &html).await {
        warn!(error = %e, "failed to send command reply");
    }
}

/// Execute `command` and return the reply text. `None` means nothing to say.
pub async fn respond(state: &AppState, command: ClaimCommand, ctx: &CommandContext) -> Option<String> {
    match command {
        ClaimCommand::Help => Some(HELP_HTML.to_string()),

        ClaimCommand::Ticket { ticket_id, summary } => {
            let Some(ticket_id) = ticket_id else {
                return Some("Usage: <code>/ticket &lt;id&gt; [summary]</code>".to_string());
            };
            let ticket = TicketNotification { ticket_id, summary };
            match state.notifier.post(ctx.message.chat_id, &ticket).await {
                Ok(_) => None,
                Err(e) => {
                    warn!(ticket_id = %ticket.ticket_id, error = %e, "failed to post ticket notification");
                    Some(format!(
                        "❌ Could not post ticket {}.",
                        escape_html(&ticket.ticket_id)
                    ))
                }
            }
        }

        ClaimCommand::Claim => {
            let (key, sender) = match claim_target(ctx) {
                Ok(v) => v,
                Err(html) => return Some(html),
            };
            let result = state
                .claims
                .claim_ticket_notification(&key, &sender.identity, &sender.display_name, None)
                .await;
            Some(claim_reply_html(&result, &sender.identity))
        }

        ClaimCommand::Unclaim => {
            let (key, sender) = match claim_target(ctx) {
                Ok(v) => v,
                Err(html) => return Some(html),
            };
            let result = state
                .claims
                .unclaim_ticket_notification(&key, &sender.identity)
                .await;
            Some(unclaim_reply_html(&result))
        }
    }
}

fn claim_target(ctx: &CommandContext) -> Result<(ClaimKey, &Sender), String> {
    let Some(target) = ctx.reply_to else {
        return Err(NEEDS_REPLY_HTML.to_string());
    };
    let Some(sender) = ctx.sender.as_ref() else {
        return Err("❌ Cannot tell who sent this command.".to_string());
    };
    Ok((ClaimKey::from(target), sender))
}

//! Telegram HTML for ticket notifications and claim command replies.

use crate::claims::{ClaimError, ClaimOutcome, ClaimResult, TicketClaimRecord, UnclaimOutcome};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn ticket_notification_html(ticket_id: &str, summary: Option<&str>) -> String {
    let mut out = format!("🎫 <b>New ticket {}</b>", escape_html(ticket_id));
    if let Some(s) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str("\n\n");
        out.push_str(&escape_html(s));
    }
    out.push_str("\n\nReply <code>/claim</code> to take it.");
    out
}

fn holder_label(record: &TicketClaimRecord) -> String {
    match &record.claim {
        Some(c) => escape_html(c.display_name.as_deref().unwrap_or(&c.identity)),
        None => "someone else".to_string(),
    }
}

/// Reply to `/claim` sent by `claimant`.
pub fn claim_reply_html(result: &ClaimResult<ClaimOutcome>, claimant: &str) -> String {
    match result {
        Ok(out) if !out.was_claimed => format!(
            "✅ You claimed ticket <b>{}</b>.",
            escape_html(&out.record.ticket_id)
        ),
        Ok(out) if out.record.is_claimed_by(claimant) => format!(
            "👍 You already hold ticket <b>{}</b>.",
            escape_html(&out.record.ticket_id)
        ),
        Ok(out) => format!(
            "⛔ Ticket <b>{}</b> is already claimed by {}.",
            escape_html(&out.record.ticket_id),
            holder_label(&out.record)
        ),
        Err(e) => error_html(e),
    }
}

pub fn unclaim_reply_html(result: &ClaimResult<UnclaimOutcome>) -> String {
    match result {
        Ok(out) if out.was_unclaimed => {
            let ticket = out
                .record
                .as_ref()
                .map(|r| escape_html(&r.ticket_id))
                .unwrap_or_default();
            format!("↩️ Ticket <b>{ticket}</b> released. Anyone can claim it now.")
        }
        Ok(_) => "⚠️ The ticket changed while releasing it. Check its state and try again.".to_string(),
        Err(e) => error_html(e),
    }
}

fn error_html(e: &ClaimError) -> String {
    match e {
        ClaimError::NotFound { .. } => {
            "❓ That message is not a ticket notification I know about.".to_string()
        }
        ClaimError::InvalidRecord { .. } => {
            "❌ The stored claim for this ticket is damaged. Ask an admin to repost it.".to_string()
        }
        ClaimError::Storage { .. } => {
            "❌ Claim storage is unavailable right now. Try again in a moment.".to_string()
        }
        ClaimError::NotClaimed => "ℹ️ Nobody has claimed this ticket.".to_string(),
        ClaimError::NotClaimer { .. } => "⛔ This isn't your claim to release.".to_string(),
    }
}

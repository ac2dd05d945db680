//! Ticket claim records and their stored JSON form.
//!
//! The stored layout is flat camelCase JSON. Decoding goes through
//! [`StoredClaimRecord`] (every field optional) and then an explicit
//! validation step into [`TicketClaimRecord`]; nothing missing is defaulted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::MessageRef;

pub const RECORD_KEY_PREFIX: &str = "ticket_claim";
pub const LOCK_KEY_PREFIX: &str = "ticket_claim_lock";

/// Identifies one ticket notification instance: (chat, notification message).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClaimKey {
    pub chat_id: String,
    pub notification_message_id: String,
}

impl ClaimKey {
    pub fn new(chat_id: impl Into<String>, notification_message_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            notification_message_id: notification_message_id.into(),
        }
    }

    pub fn record_key(&self) -> String {
        format!(
            "{RECORD_KEY_PREFIX}:{}:{}",
            self.chat_id, self.notification_message_id
        )
    }

    pub fn lock_key(&self) -> String {
        format!(
            "{LOCK_KEY_PREFIX}:{}:{}",
            self.chat_id, self.notification_message_id
        )
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.notification_message_id)
    }
}

impl From<MessageRef> for ClaimKey {
    fn from(m: MessageRef) -> Self {
        Self::new(m.chat_id.0.to_string(), m.message_id.0.to_string())
    }
}

/// Ticket-system state captured at claim time so an unclaim can roll it back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviousState {
    pub status: Option<String>,
    pub assignee_tag: Option<String>,
    pub assignee_name: Option<String>,
    pub group_name: Option<String>,
}

impl PreviousState {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.assignee_tag.is_none()
            && self.assignee_name.is_none()
            && self.group_name.is_none()
    }
}

/// Who currently holds a claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimHolder {
    pub identity: String,
    pub display_name: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketClaimRecord {
    pub ticket_id: String,
    pub chat_id: String,
    pub notification_message_id: String,
    pub created_at: DateTime<Utc>,
    /// `None` while the notification is unclaimed.
    pub claim: Option<ClaimHolder>,
    pub previous_state: Option<PreviousState>,
}

impl TicketClaimRecord {
    pub fn unclaimed(ticket_id: impl Into<String>, key: &ClaimKey, created_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            chat_id: key.chat_id.clone(),
            notification_message_id: key.notification_message_id.clone(),
            created_at,
            claim: None,
            previous_state: None,
        }
    }

    pub fn key(&self) -> ClaimKey {
        ClaimKey::new(self.chat_id.clone(), self.notification_message_id.clone())
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    pub fn claimed_by(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.identity.as_str())
    }

    pub fn is_claimed_by(&self, identity: &str) -> bool {
        self.claimed_by() == Some(identity)
    }

    /// Stamp a claim. A snapshot already on the record is kept; `previous`
    /// only fills an empty slot.
    pub fn with_claim(mut self, holder: ClaimHolder, previous: Option<PreviousState>) -> Self {
        if self.previous_state.is_none() {
            self.previous_state = previous.filter(|p| !p.is_empty());
        }
        self.claim = Some(holder);
        self
    }

    /// Drop the claim, keeping the previous-state snapshot.
    pub fn released(mut self) -> Self {
        self.claim = None;
        self
    }

    pub fn encode(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(&StoredClaimRecord::from(self))?)
    }

    pub fn decode(raw: &str) -> Result<Self, RecordError> {
        let stored: StoredClaimRecord = serde_json::from_str(raw)?;
        Self::try_from(stored)
    }

    /// Decode a payload read from `key`, rejecting records that name a different key.
    pub fn decode_for(key: &ClaimKey, raw: &str) -> Result<Self, RecordError> {
        let record = Self::decode(raw)?;
        if record.chat_id != key.chat_id || record.notification_message_id != key.notification_message_id {
            return Err(RecordError::Inconsistent("record key does not match storage key"));
        }
        Ok(record)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("inconsistent record: {0}")]
    Inconsistent(&'static str),
}

/// Wire form of a record as written to the store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredClaimRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_assignee_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_group_name: Option<String>,
}

impl From<&TicketClaimRecord> for StoredClaimRecord {
    fn from(r: &TicketClaimRecord) -> Self {
        let prev = r.previous_state.clone().unwrap_or_default();
        Self {
            ticket_id: Some(r.ticket_id.clone()),
            chat_id: Some(r.chat_id.clone()),
            notification_message_id: Some(r.notification_message_id.clone()),
            created_at: Some(r.created_at),
            claimed: Some(r.is_claimed()),
            claimed_at: r.claim.as_ref().map(|c| c.claimed_at),
            claimed_by_identity: r.claim.as_ref().map(|c| c.identity.clone()),
            claimed_by_display_name: r.claim.as_ref().and_then(|c| c.display_name.clone()),
            previous_status: prev.status,
            previous_assignee_tag: prev.assignee_tag,
            previous_assignee_name: prev.assignee_name,
            previous_group_name: prev.group_name,
        }
    }
}

impl TryFrom<StoredClaimRecord> for TicketClaimRecord {
    type Error = RecordError;

    fn try_from(s: StoredClaimRecord) -> Result<Self, Self::Error> {
        let ticket_id = required(s.ticket_id, "ticketId")?;
        let chat_id = required(s.chat_id, "chatId")?;
        let notification_message_id = required(s.notification_message_id, "notificationMessageId")?;
        let created_at = s.created_at.ok_or(RecordError::MissingField("createdAt"))?;
        let claimed = s.claimed.ok_or(RecordError::MissingField("claimed"))?;

        let claim = if claimed {
            let identity = required(s.claimed_by_identity, "claimedByIdentity")?;
            let claimed_at = s.claimed_at.ok_or(RecordError::MissingField("claimedAt"))?;
            Some(ClaimHolder {
                identity,
                display_name: s.claimed_by_display_name.filter(|n| !n.trim().is_empty()),
                claimed_at,
            })
        } else {
            if s.claimed_at.is_some()
                || s.claimed_by_identity.is_some()
                || s.claimed_by_display_name.is_some()
            {
                return Err(RecordError::Inconsistent("unclaimed record carries claim fields"));
            }
            None
        };

        let previous = PreviousState {
            status: s.previous_status,
            assignee_tag: s.previous_assignee_tag,
            assignee_name: s.previous_assignee_name,
            group_name: s.previous_group_name,
        };

        Ok(Self {
            ticket_id,
            chat_id,
            notification_message_id,
            created_at,
            claim,
            previous_state: (!previous.is_empty()).then_some(previous),
        })
    }
}

fn required(v: Option<String>, field: &'static str) -> Result<String, RecordError> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(RecordError::MissingField(field)),
    }
}

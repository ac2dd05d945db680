//! Claim / unclaim protocols over a [`ClaimStore`].
//!
//! Claim exclusivity hinges on the store's atomic create-if-absent lock: the
//! first caller whose `acquire_lock` returns true is the only one that stamps
//! the record. Unclaim re-validates ownership inside an optimistic update so a
//! concurrent writer is detected instead of overwritten.
//!
//! Lock and record are written separately on the claim path. A crash between
//! the two leaves the lock in place (up to its TTL) while the record still
//! reads unclaimed; later claimers are refused until the lock expires.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{
    record::{ClaimHolder, ClaimKey, PreviousState, TicketClaimRecord},
    store::{ClaimStore, Mutation, OptimisticOutcome, StoreError},
};

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(86_400);

// A losing claimer may reload before the winner has written its record.
const WINNER_SETTLE_ATTEMPTS: usize = 3;
const WINNER_SETTLE_DELAY: Duration = Duration::from_millis(25);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("no claim record for {key}")]
    NotFound { key: String },

    #[error("invalid claim record at {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("claim storage unavailable ({endpoint}): {message}")]
    Storage { endpoint: String, message: String },

    #[error("notification is not claimed")]
    NotClaimed,

    #[error("notification is claimed by {claimed_by}")]
    NotClaimer { claimed_by: String },
}

impl ClaimError {
    /// Stable machine-readable tag.
    pub fn reason(&self) -> &'static str {
        match self {
            ClaimError::NotFound { .. } => "not_found",
            ClaimError::InvalidRecord { .. } => "invalid_record",
            ClaimError::Storage { .. } => "storage_error",
            ClaimError::NotClaimed => "not_claimed",
            ClaimError::NotClaimer { .. } => "not_claimer",
        }
    }

    fn not_found(key: &ClaimKey) -> Self {
        ClaimError::NotFound {
            key: key.record_key(),
        }
    }
}

impl From<StoreError> for ClaimError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Backend { endpoint, message } => ClaimError::Storage { endpoint, message },
            StoreError::InvalidRecord { key, source } => ClaimError::InvalidRecord {
                key,
                reason: source.to_string(),
            },
        }
    }
}

pub type ClaimResult<T> = std::result::Result<T, ClaimError>;

#[derive(Clone, Debug)]
pub struct ClaimOutcome {
    /// True when somebody already held the claim; false when this call won it.
    pub was_claimed: bool,
    pub record: TicketClaimRecord,
}

#[derive(Clone, Debug)]
pub struct UnclaimOutcome {
    /// False when a concurrent writer kept changing the record; `record` then
    /// carries the latest state observed.
    pub was_unclaimed: bool,
    pub record: Option<TicketClaimRecord>,
}

pub struct ClaimCoordinator {
    store: Arc<dyn ClaimStore>,
    lock_ttl: Duration,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self {
            store,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn ClaimStore> {
        &self.store
    }

    /// Record a freshly posted ticket notification as unclaimed.
    ///
    /// Any lock left behind under the same key is cleared. Callers treat a
    /// failure as best-effort; it is logged here.
    pub async fn store_ticket_notification(
        &self,
        ticket_id: &str,
        chat_id: &str,
        notification_message_id: &str,
    ) -> ClaimResult<TicketClaimRecord> {
        let key = ClaimKey::new(chat_id, notification_message_id);
        let record = TicketClaimRecord::unclaimed(ticket_id, &key, Utc::now());

        let written = async {
            self.store.put(&key, &record).await?;
            self.store.release_lock(&key).await
        }
        .await;

        if let Err(e) = written {
            warn!(key = %key, ticket_id, error = %e, "failed to persist ticket notification");
            return Err(e.into());
        }

        info!(key = %key, ticket_id, "ticket notification stored");
        Ok(record)
    }

    pub async fn claim_ticket_notification(
        &self,
        key: &ClaimKey,
        identity: &str,
        display_name: &str,
        previous: Option<PreviousState>,
    ) -> ClaimResult<ClaimOutcome> {
        let current = self.load(key).await?;
        if current.is_claimed() {
            info!(key = %key, identity, holder = ?current.claimed_by(), "claim refused: already claimed");
            return Ok(ClaimOutcome {
                was_claimed: true,
                record: current,
            });
        }

        if !self.store.acquire_lock(key, identity, self.lock_ttl).await? {
            let record = self.await_winner(key).await?;
            info!(key = %key, identity, holder = ?record.claimed_by(), "claim lost the race");
            return Ok(ClaimOutcome {
                was_claimed: true,
                record,
            });
        }

        let fresh = match self.load(key).await {
            Ok(r) => r,
            Err(e) => {
                self.release_lock_quietly(key).await;
                return Err(e);
            }
        };
        if fresh.is_claimed() {
            // Only reachable once an old lock has expired under a live claim.
            self.release_lock_quietly(key).await;
            return Ok(ClaimOutcome {
                was_claimed: true,
                record: fresh,
            });
        }

        let holder = ClaimHolder {
            identity: identity.to_string(),
            display_name: Some(display_name.trim().to_string()).filter(|n| !n.is_empty()),
            claimed_at: Utc::now(),
        };
        let claimed = fresh.with_claim(holder, previous);

        if let Err(e) = self.store.put(key, &claimed).await {
            warn!(key = %key, identity, error = %e, "claim won but record write failed");
            self.release_lock_quietly(key).await;
            return Err(e.into());
        }

        info!(key = %key, identity, ticket_id = %claimed.ticket_id, "ticket claimed");
        Ok(ClaimOutcome {
            was_claimed: false,
            record: claimed,
        })
    }

    pub async fn unclaim_ticket_notification(
        &self,
        key: &ClaimKey,
        identity: &str,
    ) -> ClaimResult<UnclaimOutcome> {
        let current = self.load(key).await?;
        ensure_releasable(&current, identity)?;

        let decide = |fresh: Option<&TicketClaimRecord>| match fresh {
            Some(r) if r.is_claimed_by(identity) => Mutation::Commit {
                record: r.clone().released(),
                release_lock: true,
            },
            _ => Mutation::Skip,
        };

        match self.store.optimistic_update(key, &decide).await? {
            OptimisticOutcome::Committed(record) => {
                info!(key = %key, identity, "ticket unclaimed");
                Ok(UnclaimOutcome {
                    was_unclaimed: true,
                    record: Some(record),
                })
            }
            OptimisticOutcome::Skipped(latest) => {
                let latest = latest.ok_or_else(|| ClaimError::not_found(key))?;
                ensure_releasable(&latest, identity)?;
                Ok(UnclaimOutcome {
                    was_unclaimed: false,
                    record: Some(latest),
                })
            }
            OptimisticOutcome::Contended(latest) => {
                warn!(key = %key, identity, "unclaim gave up after concurrent modifications");
                Ok(UnclaimOutcome {
                    was_unclaimed: false,
                    record: latest,
                })
            }
        }
    }

    async fn load(&self, key: &ClaimKey) -> ClaimResult<TicketClaimRecord> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| ClaimError::not_found(key))
    }

    async fn await_winner(&self, key: &ClaimKey) -> ClaimResult<TicketClaimRecord> {
        let mut record = self.load(key).await?;
        for _ in 0..WINNER_SETTLE_ATTEMPTS {
            if record.is_claimed() {
                break;
            }
            sleep(WINNER_SETTLE_DELAY).await;
            record = self.load(key).await?;
        }
        Ok(record)
    }

    async fn release_lock_quietly(&self, key: &ClaimKey) {
        if let Err(e) = self.store.release_lock(key).await {
            warn!(key = %key, error = %e, "failed to release claim lock");
        }
    }
}

fn ensure_releasable(record: &TicketClaimRecord, identity: &str) -> ClaimResult<()> {
    match record.claimed_by() {
        None => Err(ClaimError::NotClaimed),
        Some(holder) if holder != identity => Err(ClaimError::NotClaimer {
            claimed_by: holder.to_string(),
        }),
        Some(_) => Ok(()),
    }
}

use std::time::Duration;

use async_trait::async_trait;

use super::record::{ClaimKey, RecordError, TicketClaimRecord};

/// Number of WATCH/EXEC attempts an optimistic update makes before giving up.
pub const OPTIMISTIC_ATTEMPTS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Remote,
    Local,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend {endpoint} failed: {message}")]
    Backend { endpoint: String, message: String },

    #[error("invalid record at {key}: {source}")]
    InvalidRecord {
        key: String,
        #[source]
        source: RecordError,
    },
}

impl StoreError {
    pub fn backend(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid(key: &ClaimKey, source: RecordError) -> Self {
        Self::InvalidRecord {
            key: key.record_key(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What an optimistic update wants to do with the freshly read record.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// Write `record`; when `release_lock` is set the claim lock is deleted in
    /// the same atomic step.
    Commit {
        record: TicketClaimRecord,
        release_lock: bool,
    },
    /// Leave the key untouched.
    Skip,
}

/// Decision handed to [`ClaimStore::optimistic_update`]. It must accept a
/// record borrowed for any lifetime, since stores read it inside the call.
pub type Decide<'a> =
    dyn for<'r> Fn(Option<&'r TicketClaimRecord>) -> Mutation + Send + Sync + 'a;

#[derive(Clone, Debug)]
pub enum OptimisticOutcome {
    Committed(TicketClaimRecord),
    /// The decision function declined; carries the record it was shown.
    Skipped(Option<TicketClaimRecord>),
    /// Every attempt lost to a concurrent writer; carries the latest state seen.
    Contended(Option<TicketClaimRecord>),
}

/// Storage port used by the claim protocols.
///
/// Implementations convert every backend failure into [`StoreError`]; nothing
/// else escapes.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Human-readable endpoint for diagnostics (`redis://host:port`, `local`).
    fn endpoint(&self) -> String;

    async fn get(&self, key: &ClaimKey) -> StoreResult<Option<TicketClaimRecord>>;

    async fn put(&self, key: &ClaimKey, record: &TicketClaimRecord) -> StoreResult<()>;

    /// Atomic create-if-absent of the claim lock. True iff this call created it.
    async fn acquire_lock(&self, key: &ClaimKey, holder: &str, ttl: Duration) -> StoreResult<bool>;

    async fn release_lock(&self, key: &ClaimKey) -> StoreResult<()>;

    /// Read, decide, and write back only if `key` was not modified in between.
    async fn optimistic_update(
        &self,
        key: &ClaimKey,
        decide: &Decide<'_>,
    ) -> StoreResult<OptimisticOutcome>;
}

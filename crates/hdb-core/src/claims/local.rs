use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{
    record::{ClaimKey, TicketClaimRecord},
    store::{
        ClaimStore, Decide, Mutation, OptimisticOutcome, StoreBackend, StoreError, StoreResult,
    },
};

#[derive(Debug)]
struct LocalLock {
    holder: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct LocalState {
    /// Stored payloads by record key, kept in wire form so reads validate the
    /// same way the remote store does.
    records: HashMap<String, String>,
    locks: HashMap<String, LocalLock>,
}

/// In-process claim store, used only when no remote store is configured.
///
/// Gives mutual exclusion between tasks of one process; there is no
/// cross-process safety.
#[derive(Debug, Default)]
pub struct LocalClaimStore {
    state: Mutex<LocalState>,
}

impl LocalClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lock holder, ignoring expired locks.
    pub async fn lock_holder(&self, key: &ClaimKey) -> Option<String> {
        let st = self.state.lock().await;
        st.locks
            .get(&key.lock_key())
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone())
    }

    /// Store a raw payload as-is (used to seed records written by other tools).
    pub async fn insert_raw(&self, key: &ClaimKey, payload: impl Into<String>) {
        let mut st = self.state.lock().await;
        st.records.insert(key.record_key(), payload.into());
    }
}

fn decode(key: &ClaimKey, raw: Option<&String>) -> StoreResult<Option<TicketClaimRecord>> {
    raw.map(|r| TicketClaimRecord::decode_for(key, r).map_err(|e| StoreError::invalid(key, e)))
        .transpose()
}

fn encode(key: &ClaimKey, record: &TicketClaimRecord) -> StoreResult<String> {
    record.encode().map_err(|e| StoreError::invalid(key, e))
}

#[async_trait]
impl ClaimStore for LocalClaimStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Local
    }

    fn endpoint(&self) -> String {
        "local".to_string()
    }

    async fn get(&self, key: &ClaimKey) -> StoreResult<Option<TicketClaimRecord>> {
        let st = self.state.lock().await;
        decode(key, st.records.get(&key.record_key()))
    }

    async fn put(&self, key: &ClaimKey, record: &TicketClaimRecord) -> StoreResult<()> {
        let payload = encode(key, record)?;
        let mut st = self.state.lock().await;
        st.records.insert(key.record_key(), payload);
        Ok(())
    }

    async fn acquire_lock(&self, key: &ClaimKey, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut st = self.state.lock().await;
        st.locks.retain(|_, l| l.expires_at > now);
        let lock_key = key.lock_key();
        if st.locks.contains_key(&lock_key) {
            return Ok(false);
        }
        st.locks.insert(
            lock_key,
            LocalLock {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &ClaimKey) -> StoreResult<()> {
        let mut st = self.state.lock().await;
        st.locks.remove(&key.lock_key());
        Ok(())
    }

    async fn optimistic_update(
        &self,
        key: &ClaimKey,
        decide: &Decide<'_>,
    ) -> StoreResult<OptimisticOutcome> {
        // The state mutex is held across read and write, so there is nothing to
        // watch for.
        let mut st = self.state.lock().await;
        let current = decode(key, st.records.get(&key.record_key()))?;
        match decide(current.as_ref()) {
            Mutation::Skip => Ok(OptimisticOutcome::Skipped(current)),
            Mutation::Commit {
                record,
                release_lock,
            } => {
                st.records.insert(key.record_key(), encode(key, &record)?);
                if release_lock {
                    st.locks.remove(&key.lock_key());
                }
                Ok(OptimisticOutcome::Committed(record))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::record::ClaimHolder;
    use chrono::Utc;

    fn key() -> ClaimKey {
        ClaimKey::new("chatA", "msg1")
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = LocalClaimStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire_lock(&key(), "+1111", ttl).await.unwrap());
        assert!(!store.acquire_lock(&key(), "+2222", ttl).await.unwrap());
        assert_eq!(store.lock_holder(&key()).await.as_deref(), Some("+1111"));

        store.release_lock(&key()).await.unwrap();
        assert!(store.acquire_lock(&key(), "+2222", ttl).await.unwrap());
        assert_eq!(store.lock_holder(&key()).await.as_deref(), Some("+2222"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_reacquired() {
        let store = LocalClaimStore::new();
        assert!(store
            .acquire_lock(&key(), "+1111", Duration::from_secs(5))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.lock_holder(&key()).await, None);
        assert!(store
            .acquire_lock(&key(), "+2222", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_locks_are_pruned_on_acquire() {
        let store = LocalClaimStore::new();
        let other = ClaimKey::new("chatA", "msg2");
        store
            .acquire_lock(&key(), "+1111", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .acquire_lock(&other, "+2222", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let third = ClaimKey::new("chatA", "msg3");
        assert!(store
            .acquire_lock(&third, "+3333", Duration::from_secs(60))
            .await
            .unwrap());
        let st = store.state.lock().await;
        assert_eq!(st.locks.len(), 2);
        assert!(!st.locks.contains_key(&key().lock_key()));
    }

    #[tokio::test]
    async fn invalid_payload_surfaces_as_invalid_record() {
        let store = LocalClaimStore::new();
        store.insert_raw(&key(), r#"{"chatId":"chatA"}"#).await;
        let err = store.get(&key()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn optimistic_update_commits_and_drops_lock() {
        let store = LocalClaimStore::new();
        let rec = TicketClaimRecord::unclaimed("TCK-1", &key(), Utc::now());
        store.put(&key(), &rec).await.unwrap();
        store
            .acquire_lock(&key(), "+1111", Duration::from_secs(60))
            .await
            .unwrap();

        let out = store
            .optimistic_update(&key(), &|cur| Mutation::Commit {
                record: cur.cloned().unwrap(),
                release_lock: true,
            })
            .await
            .unwrap();
        assert!(matches!(out, OptimisticOutcome::Committed(_)));
        assert_eq!(store.lock_holder(&key()).await, None);

        let out = store
            .optimistic_update(&key(), &|_| Mutation::Skip)
            .await
            .unwrap();
        assert!(matches!(out, OptimisticOutcome::Skipped(Some(_))));
    }

    #[tokio::test]
    async fn decision_may_borrow_caller_state() {
        let store = LocalClaimStore::new();
        let rec = TicketClaimRecord::unclaimed("TCK-1", &key(), Utc::now())
            .with_claim(
                ClaimHolder {
                    identity: "+1111".to_string(),
                    display_name: Some("Alice".to_string()),
                    claimed_at: Utc::now(),
                },
                None,
            );
        store.put(&key(), &rec).await.unwrap();

        let identity = String::from("+1111");
        let decide = |cur: Option<&TicketClaimRecord>| match cur {
            Some(r) if r.is_claimed_by(&identity) => Mutation::Commit {
                record: r.clone().released(),
                release_lock: false,
            },
            _ => Mutation::Skip,
        };
        let out = store.optimistic_update(&key(), &decide).await.unwrap();
        match out {
            OptimisticOutcome::Committed(r) => assert!(!r.is_claimed()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

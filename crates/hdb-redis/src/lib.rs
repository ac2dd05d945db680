//! Redis adapter for the claim store.
//!
//! Claim locks use `SET key holder NX EX ttl`; unclaims run as
//! WATCH / GET / MULTI SET DEL EXEC on a dedicated connection. The shared
//! multiplexed connection is opened on first use and reused until it breaks;
//! the next operation after an I/O failure or timeout dials a fresh one.

use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, RedisError, RedisResult};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use hdb_core::claims::{
    record::{ClaimKey, TicketClaimRecord},
    store::{
        ClaimStore, Decide, Mutation, OptimisticOutcome, StoreBackend, StoreError, StoreResult,
        OPTIMISTIC_ATTEMPTS,
    },
};

/// Upper bound on records kept for read fallback.
pub const CACHE_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

pub struct RedisClaimStore {
    endpoint: String,
    client: redis::Client,
    settings: RedisSettings,
    conn: Mutex<Option<MultiplexedConnection>>,
    /// Last known record per key; only consulted when a remote read fails.
    cache: Mutex<HashMap<String, TicketClaimRecord>>,
}

impl RedisClaimStore {
    /// Build the store. No connection is made until the first operation.
    pub fn new(settings: RedisSettings) -> StoreResult<Self> {
        let endpoint = format!("redis://{}:{}", settings.host, settings.port);
        let client = redis::Client::open(format!("{endpoint}/"))
            .map_err(|e| StoreError::backend(endpoint.clone(), format!("invalid redis url: {e}")))?;
        Ok(Self {
            endpoint,
            client,
            settings,
            conn: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn fail(&self, op: &str, message: impl std::fmt::Display) -> StoreError {
        StoreError::backend(self.endpoint.clone(), format!("{op}: {message}"))
    }

    fn is_broken(e: &RedisError) -> bool {
        e.is_io_error() || e.is_unrecoverable_error()
    }

    /// Run `fut` under the operation timeout. A broken or stalled socket
    /// discards the shared connection so the next call reconnects.
    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> StoreResult<T> {
        match timeout(self.settings.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                if Self::is_broken(&e) {
                    self.discard_connection(op).await;
                }
                Err(self.fail(op, e))
            }
            Err(_) => {
                self.discard_connection(op).await;
                Err(self.fail(
                    op,
                    format!("timed out after {:?}", self.settings.op_timeout),
                ))
            }
        }
    }

    async fn open_connection(&self) -> StoreResult<MultiplexedConnection> {
        match timeout(
            self.settings.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(self.fail("connect", e)),
            Err(_) => Err(self.fail(
                "connect",
                format!("timed out after {:?}", self.settings.connect_timeout),
            )),
        }
    }

    async fn shared_connection(&self) -> StoreResult<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.open_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn discard_connection(&self, op: &str) {
        if self.conn.lock().await.take().is_some() {
            warn!(endpoint = %self.endpoint, op, "dropping redis connection; next call reconnects");
        }
    }

    fn decode(key: &ClaimKey, raw: Option<String>) -> StoreResult<Option<TicketClaimRecord>> {
        raw.map(|r| TicketClaimRecord::decode_for(key, &r).map_err(|e| StoreError::invalid(key, e)))
            .transpose()
    }

    async fn remember(&self, key: &ClaimKey, record: Option<&TicketClaimRecord>) {
        let mut cache = self.cache.lock().await;
        match record {
            Some(r) => {
                let record_key = key.record_key();
                if cache.len() >= CACHE_CAPACITY && !cache.contains_key(&record_key) {
                    // Oldest notification goes first.
                    let oldest = cache
                        .iter()
                        .min_by_key(|(_, cached)| cached.created_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        cache.remove(&oldest);
                    }
                }
                cache.insert(record_key, r.clone());
            }
            None => {
                cache.remove(&key.record_key());
            }
        }
    }

    async fn read_remote(&self, key: &ClaimKey) -> StoreResult<Option<String>> {
        let mut conn = self.shared_connection().await?;
        let raw = self
            .bounded(
                "GET",
                redis::cmd("GET")
                    .arg(key.record_key())
                    .query_async::<Option<String>>(&mut conn),
            )
            .await?;
        Ok(raw)
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Remote
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn get(&self, key: &ClaimKey) -> StoreResult<Option<TicketClaimRecord>> {
        match self.read_remote(key).await {
            Ok(raw) => {
                let record = Self::decode(key, raw)?;
                self.remember(key, record.as_ref()).await;
                Ok(record)
            }
            Err(e) => {
                let cached = self.cache.lock().await.get(&key.record_key()).cloned();
                match cached {
                    Some(record) => {
                        warn!(key = %key, error = %e, "redis read failed, serving cached record");
                        Ok(Some(record))
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn put(&self, key: &ClaimKey, record: &TicketClaimRecord) -> StoreResult<()> {
        let payload = record.encode().map_err(|e| StoreError::invalid(key, e))?;
        let mut conn = self.shared_connection().await?;
        self.bounded(
            "SET",
            redis::cmd("SET")
                .arg(key.record_key())
                .arg(payload)
                .query_async::<()>(&mut conn),
        )
        .await?;
        self.remember(key, Some(record)).await;
        Ok(())
    }

    async fn acquire_lock(&self, key: &ClaimKey, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.shared_connection().await?;
        let created: Option<String> = self
            .bounded(
                "SET NX",
                redis::cmd("SET")
                    .arg(key.lock_key())
                    .arg(holder)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async::<Option<String>>(&mut conn),
            )
            .await?;
        Ok(created.is_some())
    }

    async fn release_lock(&self, key: &ClaimKey) -> StoreResult<()> {
        let mut conn = self.shared_connection().await?;
        self.bounded(
            "DEL",
            redis::cmd("DEL")
                .arg(key.lock_key())
                .query_async::<()>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn optimistic_update(
        &self,
        key: &ClaimKey,
        decide: &Decide<'_>,
    ) -> StoreResult<OptimisticOutcome> {
        let record_key = key.record_key();
        // WATCH state belongs to the connection, so this one is never shared.
        // Dropping it on any early return discards the watch.
        let mut conn = self.open_connection().await?;
        let mut seen = None;

        for attempt in 1..=OPTIMISTIC_ATTEMPTS {
            self.bounded(
                "WATCH",
                redis::cmd("WATCH")
                    .arg(&record_key)
                    .query_async::<()>(&mut conn),
            )
            .await?;
            let raw = self
                .bounded(
                    "GET",
                    redis::cmd("GET")
                        .arg(&record_key)
                        .query_async::<Option<String>>(&mut conn),
                )
                .await?;
            let current = Self::decode(key, raw)?;

            let (record, release_lock) = match decide(current.as_ref()) {
                Mutation::Skip => {
                    self.remember(key, current.as_ref()).await;
                    return Ok(OptimisticOutcome::Skipped(current));
                }
                Mutation::Commit {
                    record,
                    release_lock,
                } => (record, release_lock),
            };

            let payload = record.encode().map_err(|e| StoreError::invalid(key, e))?;
            let mut pipe = redis::pipe();
            pipe.atomic().cmd("SET").arg(&record_key).arg(payload).ignore();
            if release_lock {
                pipe.cmd("DEL").arg(key.lock_key()).ignore();
            }

            // EXEC answers nil when the watched key changed.
            let committed = self
                .bounded("EXEC", pipe.query_async::<Option<()>>(&mut conn))
                .await?;
            if committed.is_some() {
                self.remember(key, Some(&record)).await;
                return Ok(OptimisticOutcome::Committed(record));
            }

            debug!(key = %key, attempt, "optimistic update aborted by a concurrent write");
            seen = current;
        }

        let latest = match self.read_remote(key).await.and_then(|raw| Self::decode(key, raw)) {
            Ok(fresh) => {
                self.remember(key, fresh.as_ref()).await;
                fresh
            }
            Err(_) => seen,
        };
        Ok(OptimisticOutcome::Contended(latest))
    }
}

#[cfg(test)]
mod fake_server;

use std::sync::Arc;

use tracing::info;

use hdb_core::{
    claims::{local::LocalClaimStore, ClaimCoordinator, ClaimStore},
    config::{Config, StoreSelection},
};
use hdb_redis::{RedisClaimStore, RedisSettings};

fn build_store(cfg: &Config) -> Result<Arc<dyn ClaimStore>, hdb_core::Error> {
    match cfg.store_selection() {
        StoreSelection::Redis { host, port } => {
            let store = RedisClaimStore::new(RedisSettings {
                host,
                port,
                connect_timeout: cfg.redis_connect_timeout,
                op_timeout: cfg.redis_op_timeout,
            })
            .map_err(|e| hdb_core::Error::Config(e.to_string()))?;
            Ok(Arc::new(store))
        }
        StoreSelection::Local => {
            info!("REDIS_HOST not set; claims are coordinated in this process only");
            Ok(Arc::new(LocalClaimStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), hdb_core::Error> {
    hdb_core::logging::init("hdb")?;

    let cfg = Arc::new(Config::load()?);
    let store = build_store(&cfg)?;
    info!(backend = ?store.backend(), endpoint = %store.endpoint(), "claim store selected");
    let claims = Arc::new(ClaimCoordinator::new(store).with_lock_ttl(cfg.claim_lock_ttl));

    hdb_telegram::router::run_polling(cfg, claims)
        .await
        .map_err(|e| hdb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}

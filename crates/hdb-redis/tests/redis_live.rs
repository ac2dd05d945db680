//! Claim protocol against a real Redis.
//!
//! Runs only when `REDIS_TEST_HOST` is set (optionally `REDIS_TEST_PORT`).
//! Two store instances stand in for two bot processes.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use hdb_core::claims::{
    record::ClaimHolder,
    store::{Mutation, OptimisticOutcome, OPTIMISTIC_ATTEMPTS},
    ClaimCoordinator, ClaimKey, ClaimStore, TicketClaimRecord,
};
use hdb_redis::{RedisClaimStore, RedisSettings};

fn settings() -> Option<RedisSettings> {
    let host = std::env::var("REDIS_TEST_HOST").ok()?;
    let port = std::env::var("REDIS_TEST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    Some(RedisSettings {
        host,
        port,
        connect_timeout: Duration::from_secs(2),
        op_timeout: Duration::from_secs(2),
    })
}

fn unique_chat() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("test-{}-{nanos}", std::process::id())
}

fn process(settings: &RedisSettings) -> Arc<ClaimCoordinator> {
    let store: Arc<dyn ClaimStore> = Arc::new(RedisClaimStore::new(settings.clone()).unwrap());
    Arc::new(ClaimCoordinator::new(store).with_lock_ttl(Duration::from_secs(60)))
}

#[tokio::test]
async fn claim_release_reclaim_across_processes() {
    let Some(settings) = settings() else {
        return;
    };
    let chat = unique_chat();
    let key = ClaimKey::new(chat.clone(), "msg1");
    let a = process(&settings);
    let b = process(&settings);

    a.store_ticket_notification("TCK-100", &chat, "msg1")
        .await
        .unwrap();

    let first = a
        .claim_ticket_notification(&key, "+1111", "Alice", None)
        .await
        .unwrap();
    assert!(!first.was_claimed);

    let second = b
        .claim_ticket_notification(&key, "+2222", "Bob", None)
        .await
        .unwrap();
    assert!(second.was_claimed);
    assert_eq!(second.record.claimed_by(), Some("+1111"));

    let err = b
        .unclaim_ticket_notification(&key, "+2222")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "not_claimer");

    let released = b
        .unclaim_ticket_notification(&key, "+1111")
        .await
        .unwrap();
    assert!(released.was_unclaimed);

    let again = a
        .claim_ticket_notification(&key, "+2222", "Bob", None)
        .await
        .unwrap();
    assert!(!again.was_claimed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_processes_produce_one_winner() {
    let Some(settings) = settings() else {
        return;
    };
    let chat = unique_chat();
    let key = ClaimKey::new(chat.clone(), "msg1");
    let seed = process(&settings);
    seed.store_ticket_notification("TCK-200", &chat, "msg1")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let coord = process(&settings);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            coord
                .claim_ticket_notification(&key, &format!("+{i}"), "Tech", None)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for h in handles {
        if !h.await.unwrap().was_claimed {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

/// Release `key` while a second client rewrites the record during the first
/// `disturbed` attempts, which makes each of those EXECs abort.
async fn release_under_interference(
    settings: &RedisSettings,
    disturbed: usize,
) -> (OptimisticOutcome, usize) {
    let key = ClaimKey::new(unique_chat(), "msg1");
    let store = RedisClaimStore::new(settings.clone()).unwrap();
    let record = TicketClaimRecord::unclaimed("TCK-300", &key, Utc::now()).with_claim(
        ClaimHolder {
            identity: "+1111".to_string(),
            display_name: Some("Alice".to_string()),
            claimed_at: Utc::now(),
        },
        None,
    );
    store.put(&key, &record).await.unwrap();

    let client =
        redis::Client::open(format!("redis://{}:{}/", settings.host, settings.port)).unwrap();
    let writer = Mutex::new(client.get_connection().unwrap());
    let payload = record.encode().unwrap();
    let attempts = AtomicUsize::new(0);

    let decide = |cur: Option<&TicketClaimRecord>| {
        if attempts.fetch_add(1, Ordering::SeqCst) < disturbed {
            let mut conn = writer.lock().unwrap();
            redis::cmd("SET")
                .arg(key.record_key())
                .arg(&payload)
                .query::<()>(&mut *conn)
                .unwrap();
        }
        match cur {
            Some(r) => Mutation::Commit {
                record: r.clone().released(),
                release_lock: true,
            },
            None => Mutation::Skip,
        }
    };
    let out = store.optimistic_update(&key, &decide).await.unwrap();
    (out, attempts.load(Ordering::SeqCst))
}

#[tokio::test]
async fn optimistic_update_survives_one_concurrent_write() {
    let Some(settings) = settings() else {
        return;
    };
    let (out, attempts) = release_under_interference(&settings, 1).await;
    assert_eq!(attempts, 2);
    match out {
        OptimisticOutcome::Committed(r) => assert!(!r.is_claimed()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn optimistic_update_reports_contention_after_every_attempt_aborts() {
    let Some(settings) = settings() else {
        return;
    };
    let (out, attempts) = release_under_interference(&settings, OPTIMISTIC_ATTEMPTS).await;
    assert_eq!(attempts, OPTIMISTIC_ATTEMPTS);
    match out {
        OptimisticOutcome::Contended(Some(latest)) => {
            assert_eq!(latest.claimed_by(), Some("+1111"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

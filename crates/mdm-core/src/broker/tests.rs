use super::*;
use std::time::Duration;

async fn open_broker(cfg: BrokerConfig) -> Broker {
    let pool = crate::db::open_memory_pool().await.unwrap();
    Broker::new(pool, cfg).await.unwrap()
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(50),
        factor: 2,
        jitter: 0.0,
        max_delay: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn fifo_within_priority() {
    let broker = open_broker(BrokerConfig::default()).await;
    broker.enqueue("a", PRIORITY_NORMAL, "a").await.unwrap();
    // Same priority: strictly FIFO even with identical enqueue timestamps
    // (row id breaks the tie).
    broker.enqueue("b", PRIORITY_NORMAL, "b").await.unwrap();
    broker.enqueue("c", PRIORITY_NORMAL, "c").await.unwrap();

    let r1 = broker.try_reserve().await.unwrap().unwrap();
    let r2 = broker.try_reserve().await.unwrap().unwrap();
    let r3 = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r1.job_id, "a");
    assert_eq!(r2.job_id, "b");
    assert_eq!(r3.job_id, "c");
}

#[tokio::test]
async fn higher_priority_runs_first() {
    let broker = open_broker(BrokerConfig::default()).await;
    broker.enqueue("low", PRIORITY_NORMAL, "").await.unwrap();
    broker.enqueue("high", PRIORITY_HIGH, "").await.unwrap();

    let first = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(first.job_id, "high");
}

#[tokio::test]
async fn capacity_caps_live_reservations() {
    let broker = open_broker(BrokerConfig {
        capacity: 2,
        ..Default::default()
    })
    .await;
    for i in 0..4 {
        broker
            .enqueue(&format!("j{}", i), PRIORITY_NORMAL, "")
            .await
            .unwrap();
    }

    let r1 = broker.try_reserve().await.unwrap().unwrap();
    let _r2 = broker.try_reserve().await.unwrap().unwrap();
    assert!(broker.try_reserve().await.unwrap().is_none(), "cap is 2");

    broker.ack(&r1).await.unwrap();
    assert!(broker.try_reserve().await.unwrap().is_some(), "ack frees the slot");
}

#[tokio::test]
async fn nack_schedules_backoff_then_dead() {
    let broker = open_broker(BrokerConfig {
        backoff: fast_backoff(),
        ..Default::default()
    })
    .await;
    broker.enqueue("j", PRIORITY_NORMAL, "").await.unwrap();

    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.attempt, 1);
    let outcome = broker.nack(&r, "boom").await.unwrap();
    let delay = match outcome {
        NackOutcome::Retry { delay } => delay,
        NackOutcome::Dead => panic!("first failure must retry"),
    };
    assert_eq!(delay, Duration::from_millis(50));

    // Not deliverable until the backoff elapses.
    assert!(broker.try_reserve().await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(70)).await;
    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.attempt, 2);

    // Second failure exhausts max_attempts=2.
    let outcome = broker.nack(&r, "boom again").await.unwrap();
    assert_eq!(outcome, NackOutcome::Dead);
    assert!(broker.try_reserve().await.unwrap().is_none());
    assert_eq!(broker.outstanding().await.unwrap(), 0);
}

#[tokio::test]
async fn remove_skips_reserved_entries() {
    let broker = open_broker(BrokerConfig::default()).await;
    broker.enqueue("queued", PRIORITY_NORMAL, "").await.unwrap();
    broker.enqueue("live", PRIORITY_HIGH, "").await.unwrap();

    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.job_id, "live");

    assert!(broker.remove("queued").await.unwrap());
    assert!(!broker.remove("live").await.unwrap(), "reserved entry stays");
    assert!(!broker.remove("queued").await.unwrap(), "idempotent");
}

#[tokio::test]
async fn pause_preserves_entry_and_resume_reactivates() {
    let broker = open_broker(BrokerConfig::default()).await;
    broker.enqueue("j", PRIORITY_HIGH, "payload").await.unwrap();

    let r = broker.try_reserve().await.unwrap().unwrap();
    broker.nack_paused(&r).await.unwrap();

    assert!(broker.try_reserve().await.unwrap().is_none(), "paused is not deliverable");
    assert!(!broker.has_live_entry("j").await.unwrap());

    assert!(broker.resume("j").await.unwrap());
    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.job_id, "j");
    assert_eq!(r.attempt, 1, "resume is a fresh attempt");
    assert!(!broker.resume("j").await.unwrap(), "nothing paused anymore");
}

#[tokio::test]
async fn stale_reservation_is_released_and_counts_as_attempt() {
    let broker = open_broker(BrokerConfig {
        staleness: Duration::from_millis(50),
        backoff: BackoffPolicy {
            max_attempts: 2,
            ..fast_backoff()
        },
        ..Default::default()
    })
    .await;
    broker.enqueue("j", PRIORITY_NORMAL, "").await.unwrap();

    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.attempt, 1);
    // No heartbeat: after the window the entry is claimable again.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.attempt, 2, "release counted toward attempts");

    // Going silent again exhausts attempts and the entry dies.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(broker.try_reserve().await.unwrap().is_none());
}

#[tokio::test]
async fn heartbeat_keeps_reservation_alive() {
    let broker = open_broker(BrokerConfig {
        staleness: Duration::from_millis(60),
        ..Default::default()
    })
    .await;
    broker.enqueue("j", PRIORITY_NORMAL, "").await.unwrap();

    let r = broker.try_reserve().await.unwrap().unwrap();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.heartbeat(&r).await.unwrap();
    }
    assert_eq!(broker.release_stale().await.unwrap(), 0);
    assert!(broker.has_live_entry("j").await.unwrap());
}

#[tokio::test]
async fn release_all_reserved_for_startup() {
    let broker = open_broker(BrokerConfig::default()).await;
    broker.enqueue("j", PRIORITY_NORMAL, "").await.unwrap();
    let _r = broker.try_reserve().await.unwrap().unwrap();

    assert_eq!(broker.release_all_reserved().await.unwrap(), 1);
    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.job_id, "j");
}

#[tokio::test]
async fn reserve_blocks_until_enqueue() {
    let broker = open_broker(BrokerConfig::default()).await;
    let waiter = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.reserve().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    broker.enqueue("j", PRIORITY_NORMAL, "").await.unwrap();
    let r = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r.job_id, "j");
}

#[tokio::test]
async fn reenqueue_resets_attempts() {
    let broker = open_broker(BrokerConfig {
        backoff: fast_backoff(),
        ..Default::default()
    })
    .await;
    broker.enqueue("j", PRIORITY_NORMAL, "one").await.unwrap();
    let r = broker.try_reserve().await.unwrap().unwrap();
    broker.nack(&r, "x").await.unwrap();

    broker.enqueue("j", PRIORITY_HIGH, "two").await.unwrap();
    let r = broker.try_reserve().await.unwrap().unwrap();
    assert_eq!(r.attempt, 1);
    assert_eq!(r.payload, "two");
}

//! Durable work queue with priority, a global concurrency cap, and retry
//! backoff.
//!
//! Queue entries live in the same SQLite file as the job rows, so enqueued
//! work survives an orchestrator restart. Reservation is a single claim
//! transaction: highest priority first, FIFO within a priority, and never
//! more than `capacity` live reservations. A reservation that stops
//! heartbeating is released back after a staleness window and the release
//! counts as a failed attempt.

mod policy;

#[cfg(test)]
mod tests;

pub use policy::BackoffPolicy;

use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::job_store::JobId;
use crate::util::unix_millis;

/// Priority classes. Higher runs first; ties are FIFO by enqueue time.
pub const PRIORITY_HIGH: i64 = 5;
pub const PRIORITY_NORMAL: i64 = 3;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Global cap on concurrent reservations.
    pub capacity: usize,
    pub backoff: BackoffPolicy,
    /// A reservation without a heartbeat for this long is considered lost.
    pub staleness: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            backoff: BackoffPolicy::default(),
            staleness: Duration::from_secs(30),
        }
    }
}

/// A claimed queue item. Hold it while driving the job; settle it with
/// `ack`, `nack`, or `nack_paused`.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub token: i64,
    pub job_id: JobId,
    pub payload: String,
    /// 1-based attempt number for this delivery.
    pub attempt: u32,
}

/// Result of a nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Rescheduled; next delivery no earlier than the embedded delay.
    Retry { delay: Duration },
    /// Attempts exhausted; the entry is parked as dead.
    Dead,
}

#[derive(Clone)]
pub struct Broker {
    pool: Pool<Sqlite>,
    cfg: BrokerConfig,
    wake: Arc<Notify>,
}

impl Broker {
    pub async fn new(pool: Pool<Sqlite>, cfg: BrokerConfig) -> anyhow::Result<Self> {
        let broker = Self {
            pool,
            cfg,
            wake: Arc::new(Notify::new()),
        };
        broker.migrate().await?;
        Ok(broker)
    }

    pub fn capacity(&self) -> usize {
        self.cfg.capacity
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL UNIQUE,
                priority INTEGER NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                not_before INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL,
                reserved_at INTEGER,
                heartbeat_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_ready
            ON queue (state, priority DESC, enqueued_at ASC);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add (or re-activate) a queue entry for a job. Re-enqueueing an
    /// existing entry resets its attempts; priority and payload are updated.
    pub async fn enqueue(
        &self,
        job_id: &str,
        priority: i64,
        payload: &str,
    ) -> anyhow::Result<()> {
        let now = unix_millis();
        sqlx::query(
            r#"
            INSERT INTO queue (job_id, priority, payload, state, attempts, not_before, enqueued_at)
            VALUES (?1, ?2, ?3, 'ready', 0, 0, ?4)
            ON CONFLICT(job_id) DO UPDATE SET
                priority = excluded.priority,
                payload = excluded.payload,
                state = 'ready',
                attempts = 0,
                not_before = 0,
                enqueued_at = excluded.enqueued_at,
                reserved_at = NULL,
                heartbeat_at = NULL
            "#,
        )
        .bind(job_id)
        .bind(priority)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Claim the next deliverable entry, or None when the cap is reached or
    /// nothing is due. The claim is one transaction so concurrent workers
    /// never double-reserve.
    pub async fn try_reserve(&self) -> anyhow::Result<Option<Reservation>> {
        self.release_stale().await?;

        let now = unix_millis();
        let mut tx = self.pool.begin().await?;

        let reserved: i64 = sqlx::query(r#"SELECT COUNT(*) AS n FROM queue WHERE state = 'reserved'"#)
            .fetch_one(&mut *tx)
            .await?
            .get("n");
        if reserved >= self.cfg.capacity as i64 {
            tx.commit().await?;
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT id, job_id, payload, attempts FROM queue
            WHERE state = 'ready' AND not_before <= ?1
            ORDER BY priority DESC, enqueued_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let token: i64 = row.get("id");
        let job_id: String = row.get("job_id");
        let payload: String = row.get("payload");
        let attempts: i64 = row.get("attempts");

        sqlx::query(
            r#"
            UPDATE queue
            SET state = 'reserved',
                attempts = attempts + 1,
                reserved_at = ?1,
                heartbeat_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(token)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(Reservation {
            token,
            job_id,
            payload,
            attempt: attempts as u32 + 1,
        }))
    }

    /// Block until an entry can be claimed. Wakes on enqueue/settle and on a
    /// short tick for entries whose backoff delay expires.
    pub async fn reserve(&self) -> anyhow::Result<Reservation> {
        loop {
            if let Some(reservation) = self.try_reserve().await? {
                return Ok(reservation);
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
        }
    }

    /// Mark the item done and free the slot.
    pub async fn ack(&self, reservation: &Reservation) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM queue WHERE id = ?1 AND state = 'reserved'"#)
            .bind(reservation.token)
            .execute(&self.pool)
            .await?;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Report a failed attempt. Either reschedules with backoff or, when
    /// attempts are exhausted, parks the entry as dead.
    pub async fn nack(&self, reservation: &Reservation, reason: &str) -> anyhow::Result<NackOutcome> {
        let outcome = if self.cfg.backoff.allows_retry(reservation.attempt) {
            let delay = self.cfg.backoff.delay_after(reservation.attempt);
            let not_before = unix_millis() + delay.as_millis() as i64;
            sqlx::query(
                r#"
                UPDATE queue
                SET state = 'ready', not_before = ?1, reserved_at = NULL, heartbeat_at = NULL
                WHERE id = ?2 AND state = 'reserved'
                "#,
            )
            .bind(not_before)
            .bind(reservation.token)
            .execute(&self.pool)
            .await?;
            tracing::info!(
                job_id = %reservation.job_id,
                attempt = reservation.attempt,
                delay_ms = delay.as_millis() as u64,
                reason,
                "retry scheduled"
            );
            NackOutcome::Retry { delay }
        } else {
            sqlx::query(
                r#"
                UPDATE queue
                SET state = 'dead', reserved_at = NULL, heartbeat_at = NULL
                WHERE id = ?1 AND state = 'reserved'
                "#,
            )
            .bind(reservation.token)
            .execute(&self.pool)
            .await?;
            tracing::warn!(job_id = %reservation.job_id, attempt = reservation.attempt, reason, "attempts exhausted");
            NackOutcome::Dead
        };
        self.wake.notify_waiters();
        Ok(outcome)
    }

    /// Park a reservation as paused: the entry is preserved (so resume can
    /// re-activate it) but is not deliverable and holds no slot.
    pub async fn nack_paused(&self, reservation: &Reservation) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE queue
            SET state = 'paused', reserved_at = NULL, heartbeat_at = NULL
            WHERE id = ?1 AND state = 'reserved'
            "#,
        )
        .bind(reservation.token)
        .execute(&self.pool)
        .await?;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Re-activate a paused entry as a fresh attempt at its original
    /// priority. Returns false when no paused entry exists for the job.
    pub async fn resume(&self, job_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET state = 'ready', attempts = 0, not_before = 0
            WHERE job_id = ?1 AND state = 'paused'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        self.wake.notify_waiters();
        Ok(result.rows_affected() > 0)
    }

    /// Drop a job's queue entry if it is not currently reserved. Idempotent;
    /// returns whether an entry was removed. A reserved entry stays until
    /// its worker settles it.
    pub async fn remove(&self, job_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(r#"DELETE FROM queue WHERE job_id = ?1 AND state != 'reserved'"#)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        self.wake.notify_waiters();
        Ok(result.rows_affected() > 0)
    }

    /// Keep a reservation alive while its job runs.
    pub async fn heartbeat(&self, reservation: &Reservation) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE queue SET heartbeat_at = ?1 WHERE id = ?2 AND state = 'reserved'"#)
            .bind(unix_millis())
            .bind(reservation.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release reservations whose heartbeat went silent. Entries with
    /// attempts left go back to ready; the rest are parked as dead.
    pub async fn release_stale(&self) -> anyhow::Result<u64> {
        let cutoff = unix_millis() - self.cfg.staleness.as_millis() as i64;
        let dead = sqlx::query(
            r#"
            UPDATE queue
            SET state = 'dead', reserved_at = NULL, heartbeat_at = NULL
            WHERE state = 'reserved' AND heartbeat_at < ?1 AND attempts >= ?2
            "#,
        )
        .bind(cutoff)
        .bind(self.cfg.backoff.max_attempts as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        let released = sqlx::query(
            r#"
            UPDATE queue
            SET state = 'ready', not_before = 0, reserved_at = NULL, heartbeat_at = NULL
            WHERE state = 'reserved' AND heartbeat_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if released > 0 || dead > 0 {
            tracing::warn!(released, dead, "stale reservations released");
            self.wake.notify_waiters();
        }
        Ok(released + dead)
    }

    /// Force-release every reservation, regardless of heartbeat age. Used at
    /// startup: after a restart no worker can be driving them.
    pub async fn release_all_reserved(&self) -> anyhow::Result<u64> {
        let released = sqlx::query(
            r#"
            UPDATE queue
            SET state = 'ready', not_before = 0, reserved_at = NULL, heartbeat_at = NULL
            WHERE state = 'reserved'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if released > 0 {
            self.wake.notify_waiters();
        }
        Ok(released)
    }

    /// Whether the job has any live queue entry (ready, reserved, or due
    /// later). Paused and dead entries don't count.
    pub async fn has_live_entry(&self, job_id: &str) -> anyhow::Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 FROM queue WHERE job_id = ?1 AND state IN ('ready', 'reserved')"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Count of entries that will still be delivered (ready now or after
    /// backoff) plus live reservations. Drives the drain loop.
    pub async fn outstanding(&self) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM queue WHERE state IN ('ready', 'reserved')"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Earliest `not_before` among ready entries, for drain-loop sleeping.
    pub async fn next_due_millis(&self) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query(
            r#"SELECT MIN(not_before) AS t FROM queue WHERE state = 'ready'"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("t"))
    }
}

//! Postgres-backed work queue.
//!
//! All four operations are single SQL statements: statement atomicity gives
//! `claim` its select-lock-update transaction, and `complete`/`sweep` their
//! atomic move-to-history. Claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never block each other and never observe the same eligible row,
//! and `ORDER BY random()` so a poisoned row cannot pin the queue head.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;

use super::event::{Event, EventId};
use super::time::from_slack_ts;
use super::{Result, StoreError, WorkQueue};

/// Default schema the queue tables live in.
const DEFAULT_SCHEMA: &str = "harness";

fn is_valid_schema_ident(schema: &str) -> bool {
    !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Durable work queue over a shared connection pool.
///
/// Each operation acquires one connection for the duration of a single
/// statement; no transaction outlives a call.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    schema: String,
}

impl PgQueue {
    /// Creates a queue over the given pool, using the default schema.
    pub fn new(pool: PgPool) -> Self {
        PgQueue {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Overrides the schema the queue tables live in.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Returns the schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn checked_schema(&self) -> Result<&str> {
        if is_valid_schema_ident(&self.schema) {
            Ok(&self.schema)
        } else {
            Err(StoreError::InvalidSchema(self.schema.clone()))
        }
    }

    /// Creates the schema, tables, and index if they do not exist.
    ///
    /// Safe to run on every startup; concurrent harnesses sharing a database
    /// serialize on the DDL locks.
    pub async fn migrate(&self) -> Result<()> {
        let schema = self.checked_schema()?;

        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{schema}\".active (
                    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    attempts INT NOT NULL DEFAULT 0,
                    visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    claimed_at TIMESTAMPTZ[] NOT NULL DEFAULT '{{}}',
                    kind TEXT NOT NULL,
                    payload JSONB NOT NULL
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS active_visible_at_attempts_idx
                 ON \"{schema}\".active (visible_at, attempts)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{schema}\".history (
                    id BIGINT PRIMARY KEY,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    attempts INT NOT NULL,
                    visible_at TIMESTAMPTZ NOT NULL,
                    claimed_at TIMESTAMPTZ[] NOT NULL,
                    kind TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    processed BOOLEAN NOT NULL
                )"
            ),
        ];

        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkQueue for PgQueue {
    #[instrument(skip(self, payload), fields(kind = kind))]
    async fn enqueue(&self, kind: &str, payload: &serde_json::Value) -> Result<()> {
        let schema = self.checked_schema()?;

        // The platform timestamp rides in the payload as decimal seconds;
        // convert it exactly once, here at the insertion boundary.
        let ts = payload
            .get("event_ts")
            .or_else(|| payload.get("ts"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let occurred_at = from_slack_ts(ts)?;

        let sql = format!(
            "INSERT INTO \"{schema}\".active (occurred_at, kind, payload)
             VALUES ($1, $2, $3)"
        );
        sqlx::query(&sql)
            .bind(occurred_at)
            .bind(kind)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim(&self, max_attempts: u32, lease: Duration) -> Result<Option<Event>> {
        let schema = self.checked_schema()?;

        // clock_timestamp() (not now()) so concurrent claims inside
        // overlapping statements record distinct claim times.
        let sql = format!(
            "WITH candidate AS (
                SELECT id
                FROM \"{schema}\".active
                WHERE visible_at <= clock_timestamp()
                  AND attempts < $1
                ORDER BY random()
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE \"{schema}\".active a
            SET visible_at = clock_timestamp() + ($2::bigint * interval '1 second'),
                attempts = a.attempts + 1,
                claimed_at = a.claimed_at || clock_timestamp()
            FROM candidate
            WHERE a.id = candidate.id
            RETURNING a.id, a.occurred_at, a.attempts, a.visible_at,
                      a.claimed_at, a.kind, a.payload"
        );

        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(max_attempts as i32)
            .bind(lease.as_secs() as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(event)
    }

    #[instrument(skip(self), fields(event_id = %id))]
    async fn complete(&self, id: EventId, processed: bool) -> Result<()> {
        let schema = self.checked_schema()?;

        let sql = format!(
            "WITH moved AS (
                DELETE FROM \"{schema}\".active
                WHERE id = $1
                RETURNING id, occurred_at, attempts, visible_at, claimed_at, kind, payload
            )
            INSERT INTO \"{schema}\".history
                (id, occurred_at, attempts, visible_at, claimed_at, kind, payload, processed)
            SELECT id, occurred_at, attempts, visible_at, claimed_at, kind, payload, $2
            FROM moved"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(processed)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn sweep(&self, max_attempts: u32, max_age: Duration) -> Result<u64> {
        let schema = self.checked_schema()?;

        let sql = format!(
            "WITH expired AS (
                DELETE FROM \"{schema}\".active
                WHERE attempts >= $1
                   OR visible_at <= now() - ($2::bigint * interval '1 second')
                RETURNING id, occurred_at, attempts, visible_at, claimed_at, kind, payload
            )
            INSERT INTO \"{schema}\".history
                (id, occurred_at, attempts, visible_at, claimed_at, kind, payload, processed)
            SELECT id, occurred_at, attempts, visible_at, claimed_at, kind, payload, false
            FROM expired"
        );
        let result = sqlx::query(&sql)
            .bind(max_attempts as i32)
            .bind(max_age.as_secs() as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

impl std::fmt::Debug for PgQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgQueue")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use sqlx::postgres::PgPoolOptions;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn schema_ident_validation() {
        assert!(is_valid_schema_ident("harness"));
        assert!(is_valid_schema_ident("harness_test_123"));
        assert!(!is_valid_schema_ident(""));
        assert!(!is_valid_schema_ident("bad-name"));
        assert!(!is_valid_schema_ident("public; drop table x"));
    }

    #[tokio::test]
    async fn invalid_schema_is_rejected_before_touching_the_pool() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let queue = PgQueue::new(pool).with_schema("not a schema");
        let err = queue
            .enqueue("app_mention", &mention_payload("1700000000.000100"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSchema(_)));
    }

    // ─── Contract tests against a real database ───
    //
    // These run only when HARNESS_TEST_DATABASE_URL is set. Each run uses
    // its own schema so concurrent suites don't collide.

    fn test_db_url() -> Option<String> {
        std::env::var("HARNESS_TEST_DATABASE_URL").ok()
    }

    fn test_schema(name: &str) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("harness_test_{name}_{ts}")
    }

    fn mention_payload(ts: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "app_mention",
            "ts": ts,
            "event_ts": ts,
            "team": "T123",
            "user": "U123",
            "channel": "C123",
            "text": "<@U999> hello",
        })
    }

    async fn connect(name: &str) -> Option<PgQueue> {
        let url = test_db_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect test database");
        let queue = PgQueue::new(pool).with_schema(test_schema(name));
        queue.migrate().await.expect("migrate test schema");
        Some(queue)
    }

    async fn history_rows(queue: &PgQueue) -> Vec<(i64, i32, bool, Vec<chrono::DateTime<chrono::Utc>>)> {
        let sql = format!(
            "SELECT id, attempts, processed, claimed_at FROM \"{}\".history ORDER BY id",
            queue.schema()
        );
        sqlx::query(&sql)
            .fetch_all(&queue.pool)
            .await
            .unwrap()
            .into_iter()
            .map(|row| {
                (
                    row.get::<i64, _>(0),
                    row.get::<i32, _>(1),
                    row.get::<bool, _>(2),
                    row.get(3),
                )
            })
            .collect()
    }

    async fn active_count(queue: &PgQueue) -> i64 {
        let sql = format!("SELECT count(*) FROM \"{}\".active", queue.schema());
        sqlx::query_scalar(&sql).fetch_one(&queue.pool).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_claim_complete_moves_row_to_history() {
        let Some(queue) = connect("happy").await else {
            return;
        };

        queue
            .enqueue("app_mention", &mention_payload("1700000000.000000"))
            .await
            .unwrap();

        let event = queue
            .claim(3, Duration::from_secs(600))
            .await
            .unwrap()
            .expect("row should be claimable");
        assert_eq!(event.attempts, 1);
        assert_eq!(event.claimed_at.len(), 1);
        assert_eq!(event.occurred_at.timestamp(), 1_700_000_000);

        // While leased, the row is invisible to other claimants.
        assert!(queue.claim(3, Duration::from_secs(600)).await.unwrap().is_none());

        queue.complete(event.id, true).await.unwrap();

        assert_eq!(active_count(&queue).await, 0);
        let history = history_rows(&queue).await;
        assert_eq!(history.len(), 1);
        let (_, attempts, processed, claimed_at) = &history[0];
        assert_eq!(*attempts, 1);
        assert!(*processed);
        assert_eq!(claimed_at.len(), 1);
    }

    #[tokio::test]
    async fn claim_respects_attempt_budget_and_sweep_archives() {
        let Some(queue) = connect("budget").await else {
            return;
        };

        queue
            .enqueue("app_mention", &mention_payload("1700000000.000000"))
            .await
            .unwrap();

        // Burn the whole budget with zero-length leases.
        let mut last_claims = Vec::new();
        for expected_attempts in 1..=3 {
            let event = queue
                .claim(3, Duration::from_secs(0))
                .await
                .unwrap()
                .expect("row should be claimable while budget remains");
            assert_eq!(event.attempts, expected_attempts);
            assert_eq!(event.claimed_at.len() as i32, expected_attempts);
            last_claims = event.claimed_at;
        }

        // clock_timestamp() advances between claims, so the claim history
        // is strictly increasing.
        assert!(last_claims.windows(2).all(|w| w[0] < w[1]));

        // Budget exhausted: no more claims even though the lease expired.
        assert!(queue.claim(3, Duration::from_secs(0)).await.unwrap().is_none());

        // The sweep archives it as unprocessed.
        let swept = queue.sweep(3, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(swept, 1);
        let history = history_rows(&queue).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1, 3);
        assert!(!history[0].2);
    }

    #[tokio::test]
    async fn sweep_archives_stale_rows_without_attempts() {
        let Some(queue) = connect("stale").await else {
            return;
        };

        queue
            .enqueue("app_mention", &mention_payload("1700000000.000000"))
            .await
            .unwrap();

        // Fresh row, generous horizon: nothing to sweep.
        assert_eq!(queue.sweep(3, Duration::from_secs(3600)).await.unwrap(), 0);

        // Zero horizon: the row's visible_at is already in the past.
        assert_eq!(queue.sweep(3, Duration::from_secs(0)).await.unwrap(), 1);
        let history = history_rows(&queue).await;
        assert_eq!(history[0].1, 0);
        assert!(!history[0].2);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_row() {
        let Some(queue) = connect("concurrent").await else {
            return;
        };

        for i in 0..20 {
            queue
                .enqueue(
                    "app_mention",
                    &mention_payload(&format!("17000000{i:02}.000000")),
                )
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(event) =
                    queue.claim(3, Duration::from_secs(600)).await.unwrap()
                {
                    claimed.push(event.id);
                }
                claimed
            }));
        }

        let mut all: Vec<EventId> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        assert_eq!(all.len(), 20, "every row claimed exactly once");
        all.sort_by_key(|id| id.0);
        all.dedup();
        assert_eq!(all.len(), 20, "no row claimed by two workers");
    }
}

//! Durable work queue for inbound mentions.
//!
//! The queue lives in Postgres as two tables: `active` holds current work,
//! `history` holds archived rows (processed or given up on). Four operations
//! cover the whole lifecycle:
//!
//! - `enqueue` - insert a new row, visible immediately
//! - `claim` - atomically take one eligible row and lease it
//! - `complete` - move a row to history, marking the outcome
//! - `sweep` - archive rows that exhausted their attempts or aged out
//!
//! Row-level locks are the only synchronization for queue state; workers
//! coordinate purely through `claim`'s visibility timeout.

pub mod event;
pub mod postgres;
pub mod time;

pub use event::{Event, EventId, HistoryEvent};
pub use postgres::PgQueue;
pub use time::{TimestampError, from_slack_ts, to_slack_ts};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by queue operations.
///
/// Storage failures collapse into a single kind: callers never retry
/// internally, because the claim lifecycle (visibility expiry) is the
/// retry path.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or could not execute the operation.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// The payload lacks a usable event timestamp.
    #[error("payload has no usable event timestamp: {0}")]
    BadPayload(#[from] TimestampError),

    /// The configured schema name is not a valid identifier.
    #[error("invalid schema name: {0:?}")]
    InvalidSchema(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The work-queue contract the workers and ingress depend on.
///
/// [`PgQueue`] is the production implementation; tests drive the same
/// worker code against an in-memory queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Inserts a new event, deriving `occurred_at` from the payload's
    /// `event_ts`. The row is claimable immediately.
    async fn enqueue(&self, kind: &str, payload: &serde_json::Value) -> Result<()>;

    /// Atomically claims one eligible row, chosen uniformly at random among
    /// eligible rows, and hides it for `lease`. Returns `None` when nothing
    /// is claimable.
    async fn claim(&self, max_attempts: u32, lease: Duration) -> Result<Option<Event>>;

    /// Moves a row from `active` to `history` with the given outcome.
    async fn complete(&self, id: EventId, processed: bool) -> Result<()>;

    /// Archives every row whose attempts reached `max_attempts` or whose
    /// visibility timestamp is older than `max_age`, marking them
    /// unprocessed. Returns the number of rows archived.
    async fn sweep(&self, max_attempts: u32, max_age: Duration) -> Result<u64>;
}

#[async_trait]
impl<Q> WorkQueue for std::sync::Arc<Q>
where
    Q: WorkQueue + ?Sized,
{
    async fn enqueue(&self, kind: &str, payload: &serde_json::Value) -> Result<()> {
        (**self).enqueue(kind, payload).await
    }

    async fn claim(&self, max_attempts: u32, lease: Duration) -> Result<Option<Event>> {
        (**self).claim(max_attempts, lease).await
    }

    async fn complete(&self, id: EventId, processed: bool) -> Result<()> {
        (**self).complete(id, processed).await
    }

    async fn sweep(&self, max_attempts: u32, max_age: Duration) -> Result<u64> {
        (**self).sweep(max_attempts, max_age).await
    }
}

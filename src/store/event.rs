//! Row types for the durable work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::slack::MentionEvent;

/// Identifier of a queued event, assigned by the database.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(n: i64) -> Self {
        EventId(n)
    }
}

/// A live row in the `active` table.
///
/// The payload is carried verbatim as the JSON document Slack delivered;
/// [`Event::mention`] provides a typed view when the processor needs one.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    /// Surrogate key.
    pub id: EventId,

    /// When the originating platform event occurred.
    pub occurred_at: DateTime<Utc>,

    /// How many times a worker has claimed this row.
    pub attempts: i32,

    /// The row is claimable iff `visible_at <= now()`.
    pub visible_at: DateTime<Utc>,

    /// One timestamp per successful claim, in claim order.
    pub claimed_at: Vec<DateTime<Utc>>,

    /// Event category (e.g. `app_mention`).
    pub kind: String,

    /// The original platform event, untouched.
    pub payload: serde_json::Value,
}

impl Event {
    /// Parses the payload as a Slack mention.
    pub fn mention(&self) -> Result<MentionEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Whether this claim is the last one the retry budget allows.
    ///
    /// Processors use this to choose between "I'll try again" and a
    /// permanent-failure message.
    pub fn is_final_attempt(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts as i32
    }
}

/// An archived row in the `history` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEvent {
    pub id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub attempts: i32,
    pub visible_at: DateTime<Utc>,
    pub claimed_at: Vec<DateTime<Utc>>,
    pub kind: String,
    pub payload: serde_json::Value,

    /// `true` when archived after successful completion, `false` when
    /// archived by the sweep (exhausted attempts or expiry).
    pub processed: bool,
}

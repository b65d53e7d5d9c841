//! The pluggable event processor contract.
//!
//! The harness is generic infrastructure: it guarantees durable, at-least-once
//! delivery of mentions but knows nothing about what a response looks like.
//! Applications supply a value implementing [`EventProcessor`]; the harness
//! invokes it once per claim with the shared [`HarnessContext`].

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::task::TaskTracker;

use crate::slack::SlackClient;
use crate::store::Event;

/// Opaque processor failure.
///
/// The worker does not distinguish failure causes: any error is retryable
/// and retried via lease expiry until the attempt budget runs out.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared resources handed to every processor invocation.
///
/// A plain record of handles; nothing global. The task tracker lets a
/// processor spawn sibling tasks that stay inside the harness scope and are
/// awaited on shutdown.
#[derive(Clone)]
pub struct HarnessContext {
    /// Web API client for replies, reactions, and user lookups.
    pub slack: SlackClient,

    /// The harness's database pool, for processors that keep their own state.
    pub pool: PgPool,

    /// Spawn handle scoped to the harness lifetime.
    pub tasks: TaskTracker,
}

impl std::fmt::Debug for HarnessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessContext")
            .field("slack", &self.slack)
            .finish_non_exhaustive()
    }
}

/// Business logic invoked once per claimed event.
///
/// Returning `Ok` marks the event processed and archives it. Returning any
/// error leaves the row leased; it becomes claimable again when the lease
/// expires. Implementations may inspect [`Event::attempts`] (e.g. via
/// [`Event::is_final_attempt`]) to tailor user-visible messages on the last
/// try.
///
/// Processors may block on network I/O; the claim lease must comfortably
/// exceed the worst-case invocation time (default: 10 minutes).
#[async_trait]
pub trait EventProcessor: Send + Sync + 'static {
    async fn process(&self, ctx: &HarnessContext, event: &Event) -> Result<(), BoxError>;
}

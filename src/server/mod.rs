//! HTTP server for the harness ingress.
//!
//! This module implements the HTTP surface of the harness:
//! - `POST /slack/events` - the Slack Events API callback: verifies the
//!   request signature, durably enqueues mentions, and acknowledges Slack
//! - `GET /health` - liveness probe
//!
//! The response to an Events API request *is* the platform acknowledgement,
//! so the handler never acknowledges before the enqueue has committed.

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::events_handler;

use crate::store::WorkQueue;
use crate::trigger::Trigger;

/// Shared application state, passed to handlers via axum's `State`.
pub struct AppState<Q> {
    inner: Arc<AppStateInner<Q>>,
}

struct AppStateInner<Q> {
    /// Durable work queue mentions are written to.
    queue: Q,

    /// Wake signal to the worker cohort.
    trigger: Trigger,

    /// Slack signing secret for request verification.
    signing_secret: Vec<u8>,
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q> AppState<Q> {
    /// Creates state from the queue, trigger, and signing secret.
    pub fn new(queue: Q, trigger: Trigger, signing_secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                trigger,
                signing_secret: signing_secret.into(),
            }),
        }
    }

    /// Returns the work queue.
    pub fn queue(&self) -> &Q {
        &self.inner.queue
    }

    /// Returns the worker trigger.
    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    /// Returns the signing secret.
    pub fn signing_secret(&self) -> &[u8] {
        &self.inner.signing_secret
    }
}

/// Builds the axum router with all endpoints.
pub fn build_router<Q>(app_state: AppState<Q>) -> axum::Router
where
    Q: WorkQueue + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/slack/events", post(events_handler::<Q>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

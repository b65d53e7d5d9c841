//! Wake-up signal from the ingress to the worker cohort.
//!
//! The trigger is a bounded token bucket: each `signal` deposits one token,
//! each token releases exactly one waiting worker (no broadcast, so a single
//! enqueue never wakes the whole cohort). When the bucket is full extra
//! signals are dropped; workers catch up through their jittered polling
//! fallback, so the trigger is best-effort by design.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Why a worker woke from [`Trigger::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A signal token was consumed.
    Triggered,

    /// The timeout elapsed; this is a polling wakeup.
    TimedOut,
}

struct Inner {
    tokens: Semaphore,
    capacity: usize,
}

/// Bounded single-producer/multi-consumer wake signal.
///
/// Cheap to clone; all clones share the same token bucket.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<Inner>,
}

impl Trigger {
    /// Creates a trigger holding at most `capacity` pending tokens.
    ///
    /// One slot per worker is sufficient: a token only needs to survive
    /// until some worker's next wait.
    pub fn new(capacity: usize) -> Self {
        Trigger {
            inner: Arc::new(Inner {
                tokens: Semaphore::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Deposits one wake token; drops it if the bucket is full.
    ///
    /// The fullness check races with concurrent signals, so the bucket can
    /// briefly overshoot. That only causes a spurious wake, and a spurious
    /// wake drains zero rows.
    pub fn signal(&self) {
        if self.inner.tokens.available_permits() < self.inner.capacity {
            self.inner.tokens.add_permits(1);
        }
    }

    /// Waits for a token or until `timeout` elapses.
    ///
    /// Exactly one waiter is released per token.
    pub async fn wait(&self, timeout: Duration) -> Wake {
        match tokio::time::timeout(timeout, self.inner.tokens.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Wake::Triggered
            }
            // The semaphore is never closed while a Trigger exists.
            Ok(Err(_)) | Err(_) => Wake::TimedOut,
        }
    }

    /// Number of pending tokens (test observability).
    pub fn pending(&self) -> usize {
        self.inner.tokens.available_permits()
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("pending", &self.pending())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

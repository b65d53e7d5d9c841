//! The worker cohort: long-lived tasks that drain the queue.
//!
//! Each worker runs the same loop: wait on the trigger with a jittered
//! timeout, drain a bounded batch of claimable events through the processor,
//! and (on timeout wakeups) sweep expired work to history. Workers are
//! staggered at startup so the cohort's polling wakeups spread out instead
//! of landing together.
//!
//! # Failure Model
//!
//! Workers never fail the harness. A processor error or a store error ends
//! the current batch and nothing else: the claimed row keeps its lease, the
//! lease expires, and some worker picks the row up again. The retry budget
//! and the sweep bound how long that can go on.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::processor::{EventProcessor, HarnessContext};
use crate::store::WorkQueue;
use crate::trigger::{Trigger, Wake};

/// Per-worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable identifier within the harness lifetime.
    pub worker_id: usize,

    /// Delay before the first wait, to de-synchronize the cohort.
    pub initial_stagger: Duration,

    /// Base sleep between polling wakeups.
    pub base_sleep: Duration,

    /// Jitter bounds (seconds) applied around `base_sleep` on every wait.
    pub min_jitter_secs: i64,
    pub max_jitter_secs: i64,

    /// Maximum events drained per wakeup.
    pub batch_cap: usize,

    /// Retry budget per event.
    pub max_attempts: u32,

    /// Claim visibility timeout. Must comfortably exceed the processor's
    /// worst-case invocation time.
    pub lease: Duration,

    /// Sweep horizon for idle rows.
    pub max_age: Duration,
}

/// Computes the startup stagger for a worker.
///
/// Worker 0 starts immediately so the first wakeup after startup is fast;
/// the rest of the cohort sleeps a uniformly random 1..base_sleep seconds.
pub fn initial_stagger(worker_id: usize, base_sleep: Duration) -> Duration {
    let base_secs = base_sleep.as_secs();
    if worker_id == 0 || base_secs <= 1 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(1..base_secs))
}

/// One member of the worker cohort.
pub struct Worker<Q, P> {
    config: WorkerConfig,
    queue: Arc<Q>,
    trigger: Trigger,
    processor: Arc<P>,
    ctx: HarnessContext,
}

impl<Q, P> Worker<Q, P>
where
    Q: WorkQueue + 'static,
    P: EventProcessor,
{
    /// Creates a worker over the shared queue, trigger, and processor.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<Q>,
        trigger: Trigger,
        processor: Arc<P>,
        ctx: HarnessContext,
    ) -> Self {
        Worker {
            config,
            queue,
            trigger,
            processor,
            ctx,
        }
    }

    /// Runs the worker loop until the shutdown token fires.
    ///
    /// Every failure mode inside the loop is recovered locally; this future
    /// only resolves on shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let worker_id = self.config.worker_id;

        if !self.config.initial_stagger.is_zero() {
            debug!(
                worker_id,
                stagger_secs = self.config.initial_stagger.as_secs(),
                "worker initial stagger"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.initial_stagger) => {}
            }
        }

        info!(worker_id, "worker started");

        loop {
            let timeout = self.sleep_with_jitter();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                wake = self.trigger.wait(timeout) => {
                    self.run_cycle(wake, &shutdown).await;
                }
            }
        }

        info!(worker_id, "worker stopped");
    }

    /// One wakeup: drain a batch, then sweep if this was a polling wakeup.
    #[instrument(skip(self, shutdown), fields(worker_id = self.config.worker_id, reason = ?wake))]
    async fn run_cycle(&self, wake: Wake, shutdown: &CancellationToken) {
        self.drain_batch(shutdown).await;

        // The sweep rides on timeout wakeups only: triggered wakeups chase
        // fresh work, and every worker times out within one jittered period.
        if wake == Wake::TimedOut
            && let Err(error) = self
                .queue
                .sweep(self.config.max_attempts, self.config.max_age)
                .await
        {
            warn!(%error, "sweep failed");
        }
    }

    /// Claims and processes up to `batch_cap` events.
    ///
    /// One trigger token may correspond to many enqueues under burst; the
    /// batch amortizes the wakeup. The cap keeps one worker from
    /// monopolizing a sustained burst, and the first failure ends the batch
    /// so the retry budget isn't burned in a tight loop.
    ///
    /// Shutdown is checked between events: the event in flight finishes,
    /// the rest of the batch is left for the leases to cover.
    async fn drain_batch(&self, shutdown: &CancellationToken) {
        for _ in 0..self.config.batch_cap {
            if shutdown.is_cancelled() {
                return;
            }

            let event = match self
                .queue
                .claim(self.config.max_attempts, self.config.lease)
                .await
            {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("no claimable event");
                    return;
                }
                Err(error) => {
                    warn!(%error, "claim failed, ending batch");
                    return;
                }
            };

            let event_id = event.id;
            debug!(%event_id, attempts = event.attempts, "processing event");

            match self.processor.process(&self.ctx, &event).await {
                Ok(()) => {
                    if let Err(error) = self.queue.complete(event_id, true).await {
                        // The lease will expire and the event will be
                        // processed again; at-least-once allows that.
                        warn!(%event_id, %error, "complete failed, ending batch");
                        return;
                    }
                }
                Err(error) => {
                    warn!(
                        %event_id,
                        attempts = event.attempts,
                        %error,
                        "event processing failed, leaving row for retry"
                    );
                    return;
                }
            }
        }
    }

    /// Base sleep with uniform jitter, clamped to at least one second.
    fn sleep_with_jitter(&self) -> Duration {
        let jitter = rand::thread_rng()
            .gen_range(self.config.min_jitter_secs..=self.config.max_jitter_secs);
        let secs = (self.config.base_sleep.as_secs() as i64 + jitter).max(1);
        Duration::from_secs(secs as u64)
    }
}

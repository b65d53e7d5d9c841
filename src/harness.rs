//! Harness orchestrator.
//!
//! Owns every shared resource (database pool, Slack client, trigger) and
//! runs the whole cohort under one task scope: N workers plus the ingress
//! HTTP server. Any child's fatal failure cancels the siblings and becomes
//! the harness's return value; external cancellation shuts everything down
//! cooperatively.
//!
//! In-flight processor invocations are not interrupted mid-event: workers
//! notice cancellation between events, and leases cover workers that die
//! uncleanly.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::{ConfigError, HarnessConfig};
use crate::processor::{EventProcessor, HarnessContext};
use crate::server::{AppState, build_router};
use crate::slack::SlackClient;
use crate::store::{PgQueue, StoreError};
use crate::trigger::Trigger;
use crate::worker::{Worker, WorkerConfig, initial_stagger};

/// Fatal orchestration failures.
///
/// Everything here terminates the harness; transient per-event trouble never
/// reaches this type.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The connection pool could not be established.
    #[error("database connection failed: {0}")]
    Database(#[source] sqlx::Error),

    /// Queue schema bootstrap failed.
    #[error("queue bootstrap failed: {0}")]
    Store(#[from] StoreError),

    /// The ingress listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The ingress server failed while running.
    #[error("ingress server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// The event-processing harness.
///
/// Embeds in a larger bot application: construct with a configuration and a
/// processor, then [`run`](EventHarness::run) it. The harness guarantees
/// at-least-once processing of every mention it acknowledges.
pub struct EventHarness<P> {
    config: HarnessConfig,
    processor: Arc<P>,
}

impl<P: EventProcessor> EventHarness<P> {
    /// Creates a harness around the given processor.
    pub fn new(config: HarnessConfig, processor: P) -> Self {
        EventHarness {
            config,
            processor: Arc::new(processor),
        }
    }

    /// Runs until a fatal failure occurs.
    pub async fn run(self) -> Result<(), HarnessError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Runs until `shutdown` fires or a fatal failure occurs.
    ///
    /// Startup order matters: the pool connects and the schema is
    /// bootstrapped before the ingress binds, so a harness that accepts a
    /// request can always enqueue it.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<(), HarnessError> {
        self.config.validate()?;
        let tunables = &self.config.workers;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(self.config.pool_size())
            .connect_with(self.config.database.connect_options())
            .await
            .map_err(HarnessError::Database)?;

        let queue = Arc::new(
            PgQueue::new(pool.clone()).with_schema(self.config.queue_schema.clone()),
        );
        queue.migrate().await?;

        let slack = SlackClient::new(self.config.slack.bot_token.clone());
        let trigger = Trigger::new(tunables.num_workers);
        let tracker = TaskTracker::new();
        let ctx = HarnessContext {
            slack,
            pool,
            tasks: tracker.clone(),
        };

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|source| HarnessError::Bind {
                addr: self.config.listen_addr,
                source,
            })?;

        // First fatal child failure wins; it also cancels the cohort.
        let failure: Arc<Mutex<Option<HarnessError>>> = Arc::default();

        for worker_id in 0..tunables.num_workers {
            let worker_config = WorkerConfig {
                worker_id,
                initial_stagger: initial_stagger(worker_id, tunables.base_sleep),
                base_sleep: tunables.base_sleep,
                min_jitter_secs: tunables.min_jitter_secs,
                max_jitter_secs: tunables.max_jitter_secs,
                batch_cap: tunables.batch_cap,
                max_attempts: tunables.max_attempts,
                lease: tunables.lease,
                max_age: tunables.max_age,
            };
            let worker = Worker::new(
                worker_config,
                Arc::clone(&queue),
                trigger.clone(),
                Arc::clone(&self.processor),
                ctx.clone(),
            );
            tracker.spawn(worker.run(shutdown.clone()));
        }

        let app_state = AppState::new(
            Arc::clone(&queue),
            trigger.clone(),
            self.config.slack.signing_secret.clone(),
        );
        let router = build_router(app_state);

        {
            let shutdown = shutdown.clone();
            let failure = Arc::clone(&failure);
            tracker.spawn(async move {
                let graceful = {
                    let shutdown = shutdown.clone();
                    async move { shutdown.cancelled().await }
                };
                if let Err(error) = axum::serve(listener, router)
                    .with_graceful_shutdown(graceful)
                    .await
                {
                    error!(%error, "ingress server failed");
                    *failure.lock().expect("failure slot poisoned") =
                        Some(HarnessError::Server(error));
                    shutdown.cancel();
                }
            });
        }

        info!(
            workers = tunables.num_workers,
            addr = %self.config.listen_addr,
            schema = %queue.schema(),
            "harness started"
        );

        tracker.close();
        tracker.wait().await;

        match failure.lock().expect("failure slot poisoned").take() {
            Some(error) => Err(error),
            None => {
                info!("harness stopped cleanly");
                Ok(())
            }
        }
    }
}

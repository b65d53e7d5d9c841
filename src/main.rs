//! Mention Harness - Main entry point.
//!
//! This binary runs the harness with a small demonstration processor that
//! echoes mentions back in-thread. Real deployments embed the library and
//! supply their own processor.

use std::process::ExitCode;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mention_harness::processor::BoxError;
use mention_harness::{Event, EventHarness, EventProcessor, HarnessConfig, HarnessContext};

/// Replies to each mention in its thread.
///
/// Demonstrates the attempts-aware contract: on the final attempt the reply
/// admits defeat instead of promising a retry that will never come.
struct EchoProcessor {
    max_attempts: u32,
}

#[async_trait]
impl EventProcessor for EchoProcessor {
    async fn process(&self, ctx: &HarnessContext, event: &Event) -> Result<(), BoxError> {
        let mention = event.mention()?;

        let reply = format!("You said: {}", mention.text);
        match ctx
            .slack
            .post_message(&mention.channel, Some(mention.reply_thread_ts()), &reply)
            .await
        {
            Ok(()) => Ok(()),
            Err(error) => {
                if event.is_final_attempt(self.max_attempts) {
                    // Best effort; the row is archived by the sweep either way.
                    let _ = ctx
                        .slack
                        .post_message(
                            &mention.channel,
                            Some(mention.reply_thread_ts()),
                            "I couldn't handle that mention and I'm giving up.",
                        )
                        .await;
                }
                Err(error.into())
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mention_harness=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        addr = %config.listen_addr,
        workers = config.workers.num_workers,
        "starting mention harness"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let processor = EchoProcessor {
        max_attempts: config.workers.max_attempts,
    };

    match EventHarness::new(config, processor).run_until(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "harness failed");
            ExitCode::FAILURE
        }
    }
}

//! Error types for Slack Web API calls.

use thiserror::Error;

/// Errors from the Slack Web API client.
#[derive(Debug, Error)]
pub enum SlackApiError {
    /// Transport-level failure (connection, TLS, timeout).
    #[error("slack transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Slack answered with `ok: false`.
    #[error("slack api {method} failed: {error}")]
    Api {
        /// The Web API method that was called (e.g. `chat.postMessage`).
        method: &'static str,
        /// Slack's error code (e.g. `channel_not_found`, `ratelimited`).
        error: String,
    },

    /// The response body did not decode as the expected shape.
    #[error("slack api {method} returned an unexpected response: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

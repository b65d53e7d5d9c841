//! Slack Events API endpoint handler.
//!
//! Accepts event callbacks from Slack, verifies the request signature, and
//! durably enqueues mentions before returning 200 OK. The 200 is Slack's
//! acknowledgement: if the enqueue fails, the handler answers with an error
//! status instead and Slack redelivers the event. Processing happens
//! asynchronously in the worker cohort; the handler only deposits a wake
//! token once the row has committed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::slack::types::EventsRequest;
use crate::slack::verify_signature;
use crate::store::{StoreError, WorkQueue};

/// Header carrying the request timestamp.
const HEADER_TIMESTAMP: &str = "x-slack-request-timestamp";
/// Header carrying the request signature.
const HEADER_SIGNATURE: &str = "x-slack-signature";

/// Requests older (or newer) than this are rejected as replays.
const REPLAY_WINDOW_SECS: i64 = 300;

/// Event kinds the harness enqueues; everything else is acknowledged and
/// dropped.
const MENTION_KINDS: &[&str] = &["app_mention"];

/// Errors that can occur while handling an Events API request.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Request timestamp is not a number.
    #[error("invalid request timestamp")]
    InvalidTimestamp,

    /// Request timestamp is outside the replay window.
    #[error("stale request timestamp")]
    StaleTimestamp,

    /// Signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Body is not valid JSON for the Events API.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The enqueue failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::MissingHeader(_)
            | IngressError::InvalidTimestamp
            | IngressError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            IngressError::StaleTimestamp | IngressError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            // A malformed payload will never enqueue; don't ask Slack to retry it.
            IngressError::Store(StoreError::BadPayload(_)) => StatusCode::BAD_REQUEST,
            // Slack redelivers on non-2xx: the only retry path for lost enqueues.
            IngressError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Events API handler.
///
/// # Contract, in order
///
/// 1. Verify the signature and timestamp freshness before parsing anything.
/// 2. For mentions: enqueue to the durable queue. This MUST complete before
///    the acknowledgement below.
/// 3. Acknowledge (return 200) and emit one wake signal. The row is visible
///    the moment the insert commits, so a worker woken by the signal always
///    finds it.
pub async fn events_handler<Q>(
    State(app_state): State<AppState<Q>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressError>
where
    Q: WorkQueue + 'static,
{
    let timestamp = get_header(&headers, HEADER_TIMESTAMP)?;
    let signature = get_header(&headers, HEADER_SIGNATURE)?;

    // Freshness first: an attacker replaying a captured request should fail
    // before we spend time on HMAC or parsing.
    let ts_secs: i64 = timestamp
        .parse()
        .map_err(|_| IngressError::InvalidTimestamp)?;
    let skew = (chrono::Utc::now().timestamp() - ts_secs).abs();
    if skew > REPLAY_WINDOW_SECS {
        warn!(skew, "rejecting request outside the replay window");
        return Err(IngressError::StaleTimestamp);
    }

    if !verify_signature(&timestamp, &body, &signature, app_state.signing_secret()) {
        warn!("rejecting request with invalid signature");
        return Err(IngressError::InvalidSignature);
    }

    let request: EventsRequest = serde_json::from_slice(&body)?;

    match request {
        EventsRequest::UrlVerification { challenge } => {
            info!("answering url_verification challenge");
            Ok((StatusCode::OK, challenge).into_response())
        }

        EventsRequest::EventCallback { event } => {
            let kind = event
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            if !MENTION_KINDS.contains(&kind.as_str()) {
                debug!(kind, "ignoring non-mention event");
                return Ok((StatusCode::OK, "ignored").into_response());
            }

            // Durability before acknowledgement: a crash after this line
            // loses nothing, a crash before it makes Slack redeliver.
            app_state.queue().enqueue(&kind, &event).await?;

            debug!(kind, "mention enqueued");
            app_state.trigger().signal();
            Ok((StatusCode::OK, "ok").into_response())
        }

        EventsRequest::Other => {
            debug!("ignoring unrecognized events api request");
            Ok((StatusCode::OK, "ignored").into_response())
        }
    }
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, IngressError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(IngressError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use crate::slack::{compute_signature, format_signature_header};
    use crate::test_utils::MemoryQueue;
    use crate::trigger::{Trigger, Wake};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-signing-secret";

    fn mention_callback(ts: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "event_callback",
            "team_id": "T123",
            "event": {
                "type": "app_mention",
                "ts": ts,
                "event_ts": ts,
                "team": "T123",
                "user": "U123",
                "channel": "C123",
                "text": "<@U999> hello",
            },
        })
    }

    fn signed_request(secret: &[u8], timestamp: &str, body: &serde_json::Value) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let signature = compute_signature(timestamp, &body_bytes, secret);

        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", timestamp)
            .header("x-slack-signature", format_signature_header(&signature))
            .body(Body::from(body_bytes))
            .unwrap()
    }

    fn fresh_timestamp() -> String {
        chrono::Utc::now().timestamp().to_string()
    }

    fn test_state() -> (AppState<Arc<MemoryQueue>>, Arc<MemoryQueue>, Trigger) {
        let queue = Arc::new(MemoryQueue::new());
        let trigger = Trigger::new(5);
        let state = AppState::new(Arc::clone(&queue), trigger.clone(), SECRET);
        (state, queue, trigger)
    }

    #[tokio::test]
    async fn url_verification_echoes_the_challenge() {
        let (state, _queue, _trigger) = test_state();
        let app = build_router(state);

        let body = serde_json::json!({
            "type": "url_verification",
            "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P",
        });
        let request = signed_request(SECRET, &fresh_timestamp(), &body);

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &bytes[..],
            b"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
        );
    }

    #[tokio::test]
    async fn mention_is_enqueued_before_the_ack_and_signals_workers() {
        let (state, queue, trigger) = test_state();
        let app = build_router(state);

        let request = signed_request(SECRET, &fresh_timestamp(), &mention_callback("1700000000.000100"));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(queue.active_len(), 1);
        assert_eq!(trigger.wait(Duration::from_millis(10)).await, Wake::Triggered);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_without_enqueueing() {
        let (state, queue, trigger) = test_state();
        let app = build_router(state);

        let request = signed_request(b"wrong-secret", &fresh_timestamp(), &mention_callback("1.000000"));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(queue.active_len(), 0);
        assert_eq!(trigger.pending(), 0);
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let (state, queue, _trigger) = test_state();
        let app = build_router(state);

        let stale = (chrono::Utc::now().timestamp() - 3600).to_string();
        let request = signed_request(SECRET, &stale, &mention_callback("1.000000"));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(queue.active_len(), 0);
    }

    #[tokio::test]
    async fn missing_headers_are_a_bad_request() {
        let (state, _queue, _trigger) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_mention_events_are_acknowledged_and_dropped() {
        let (state, queue, trigger) = test_state();
        let app = build_router(state);

        let body = serde_json::json!({
            "type": "event_callback",
            "event": { "type": "reaction_added", "event_ts": "1.000000" },
        });
        let request = signed_request(SECRET, &fresh_timestamp(), &body);
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(queue.active_len(), 0);
        assert_eq!(trigger.pending(), 0);
    }

    #[tokio::test]
    async fn enqueue_failure_declines_the_ack() {
        let (state, queue, trigger) = test_state();
        queue.fail_next_enqueue();
        let app = build_router(state);

        let request = signed_request(SECRET, &fresh_timestamp(), &mention_callback("1.000000"));
        let response = app.oneshot(request).await.unwrap();

        // Slack sees a non-2xx and will redeliver; no signal was emitted.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(queue.active_len(), 0);
        assert_eq!(trigger.pending(), 0);
    }
}

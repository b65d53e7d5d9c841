//! Wire shapes for the Slack Events API and Web API.

use serde::{Deserialize, Serialize};

/// A parsed `app_mention` (or message) event payload.
///
/// This is a typed view over the verbatim JSON document the queue stores;
/// unknown fields are preserved so nothing Slack sends is lost when the
/// payload is re-serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEvent {
    /// Message timestamp; doubles as the message's identity within a channel.
    pub ts: String,

    /// Thread parent timestamp, when the mention happened inside a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,

    /// Workspace ID.
    pub team: String,

    /// Message text, mention markup included.
    pub text: String,

    /// Event type (`app_mention`).
    #[serde(rename = "type")]
    pub kind: String,

    /// User who mentioned the bot.
    pub user: String,

    /// Channel the mention occurred in.
    pub channel: String,

    /// Event timestamp as decimal seconds since the epoch.
    pub event_ts: String,

    /// Everything else Slack sent (blocks, client_msg_id, ...).
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl MentionEvent {
    /// The timestamp replies should thread under: the existing thread if the
    /// mention was already threaded, otherwise the mention itself.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// Top-level request body of the Events API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsRequest {
    /// One-time endpoint ownership check; echo the challenge back.
    UrlVerification { challenge: String },

    /// A delivered event wrapped in its callback envelope.
    EventCallback { event: serde_json::Value },

    /// Anything else Slack may add; acknowledged and ignored.
    #[serde(other)]
    Other,
}

/// A Slack user as returned by `users.info`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// IANA timezone, when the workspace exposes it.
    #[serde(default)]
    pub tz: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_round_trips_unknown_fields() {
        let raw = serde_json::json!({
            "type": "app_mention",
            "ts": "1700000000.000100",
            "event_ts": "1700000000.000100",
            "team": "T123",
            "user": "U123",
            "channel": "C123",
            "text": "<@U999> hello",
            "client_msg_id": "abc-123",
            "blocks": [{"type": "rich_text"}],
        });

        let mention: MentionEvent = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(mention.kind, "app_mention");
        assert!(mention.rest.contains_key("client_msg_id"));

        let back = serde_json::to_value(&mention).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn reply_thread_prefers_existing_thread() {
        let mut mention: MentionEvent = serde_json::from_value(serde_json::json!({
            "type": "app_mention",
            "ts": "2.000000",
            "event_ts": "2.000000",
            "team": "T",
            "user": "U",
            "channel": "C",
            "text": "hi",
        }))
        .unwrap();

        assert_eq!(mention.reply_thread_ts(), "2.000000");
        mention.thread_ts = Some("1.000000".to_string());
        assert_eq!(mention.reply_thread_ts(), "1.000000");
    }

    #[test]
    fn events_request_variants_parse() {
        let challenge: EventsRequest = serde_json::from_value(serde_json::json!({
            "type": "url_verification",
            "challenge": "tok",
        }))
        .unwrap();
        assert!(matches!(
            challenge,
            EventsRequest::UrlVerification { ref challenge } if challenge == "tok"
        ));

        let callback: EventsRequest = serde_json::from_value(serde_json::json!({
            "type": "event_callback",
            "team_id": "T123",
            "event": {"type": "app_mention"},
        }))
        .unwrap();
        assert!(matches!(callback, EventsRequest::EventCallback { .. }));

        let other: EventsRequest = serde_json::from_value(serde_json::json!({
            "type": "app_rate_limited",
        }))
        .unwrap();
        assert!(matches!(other, EventsRequest::Other));
    }
}

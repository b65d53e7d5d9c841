//! Slack platform integration: Web API client, request signing, wire types.
//!
//! The harness core treats Slack as an external collaborator reached through
//! these interfaces. Processors receive the [`SlackClient`] through the
//! harness context; the ingress uses [`signature`] to authenticate inbound
//! Events API requests before anything else happens.

pub mod client;
pub mod error;
pub mod signature;
pub mod types;

pub use client::SlackClient;
pub use error::SlackApiError;
pub use signature::{compute_signature, format_signature_header, verify_signature};
pub use types::{EventsRequest, MentionEvent, SlackUser};

//! Slack request signature verification using HMAC-SHA256.
//!
//! Slack signs Events API requests with a shared signing secret. The
//! signature arrives in the `X-Slack-Signature` header as `v0=<hex>` and is
//! computed over the string `v0:<timestamp>:<body>`, where the timestamp
//! comes from `X-Slack-Request-Timestamp`. Verification is the first step in
//! ingress processing; invalid signatures are rejected before parsing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature version prefix Slack currently uses.
const VERSION: &str = "v0";

/// Parses a Slack signature header (e.g. `v0=abc123...`) into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex).
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("v0=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature for a request.
///
/// Also used by tests to generate expected signatures.
pub fn compute_signature(timestamp: &str, body: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a Slack-style header value (`v0=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{VERSION}={}", hex::encode(signature))
}

/// Verifies a Slack request signature.
///
/// Returns `true` if the signature matches the timestamp and body under the
/// given secret. Uses constant-time comparison.
pub fn verify_signature(timestamp: &str, body: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

//! Webhook authentication.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body and sends
//! `X-Hub-Signature-256: sha256=<hex>`. GitLab instead echoes a shared
//! secret in `X-Gitlab-Token`. Both checks run before the body is parsed,
//! and both compare in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Decodes a `sha256=<hex>` header into raw signature bytes.
///
/// Returns `None` for a missing prefix, another algorithm, or bad hex.
///
/// ```
/// use hook_relay::webhooks::signature::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=abcd"), Some(vec![0xab, 0xcd]));
/// assert!(parse_signature_header("sha1=abcd").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        // HMAC accepts keys of any length.
        Err(_) => Vec::new(),
    }
}

/// Formats signature bytes as a `sha256=<hex>` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Checks an `X-Hub-Signature-256` header against the body.
///
/// ```
/// use hook_relay::webhooks::signature::{compute_signature, format_signature_header, verify_signature};
///
/// let header = format_signature_header(&compute_signature(b"{}", b"s3cret"));
/// assert!(verify_signature(b"{}", &header, b"s3cret"));
/// assert!(!verify_signature(b"{}", &header, b"other"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Compares a shared-secret token without leaking where it differs.
pub fn verify_token(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

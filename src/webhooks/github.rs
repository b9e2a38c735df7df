//! GitHub deliveries.
//!
//! Headers:
//! - `X-GitHub-Event` - event name (e.g. `pull_request`)
//! - `X-GitHub-Delivery` - unique delivery ID
//! - `X-Hub-Signature-256` - HMAC-SHA256 of the body

use super::signature::verify_signature;
use super::{Hook, HookError, HookEvent, HookPayload, require_header};
use crate::event::parser::IncomingRequest;

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

const EVENTS: &[HookEvent] = &[
    HookEvent {
        name: "pull_request",
        title: "Pull request review requested",
        description: "Someone asked you to review a pull request",
    },
    HookEvent {
        name: "issue_comment",
        title: "Comment on your issue",
        description: "Someone commented on an issue or pull request you opened",
    },
];

/// Verifies GitHub signatures with a shared webhook secret.
pub struct GitHubHook {
    secret: Vec<u8>,
}

impl GitHubHook {
    /// Verifies deliveries against the webhook `secret`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        GitHubHook {
            secret: secret.into(),
        }
    }
}

impl Hook for GitHubHook {
    fn name(&self) -> &str {
        "github"
    }

    fn events(&self) -> &[HookEvent] {
        EVENTS
    }

    fn parse(&self, request: &IncomingRequest, allowlist: &[String]) -> Result<HookPayload, HookError> {
        let event = require_header(request, HEADER_EVENT)?;
        let signature = require_header(request, HEADER_SIGNATURE)?;

        // Authenticate before looking at the body.
        if !verify_signature(&request.body, signature, &self.secret) {
            return Err(HookError::InvalidSignature);
        }
        if !allowlist.iter().any(|a| a == event) {
            return Err(HookError::EventNotAllowed(event.to_string()));
        }

        let body: serde_json::Value = serde_json::from_slice(&request.body)?;
        let subject = body["repository"]["full_name"].as_str().map(str::to_string);
        Ok(HookPayload {
            hook: self.name().to_string(),
            event: event.to_string(),
            delivery: request.header(HEADER_DELIVERY).map(str::to_string),
            subject,
            body,
        })
    }

    fn check(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("webhook secret is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::signature::{compute_signature, format_signature_header};
    use axum::http::HeaderMap;

    const SECRET: &[u8] = b"It's a Secret to Everybody";

    fn signed(event: &str, body: &str, secret: &[u8]) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EVENT, event.parse().unwrap());
        headers.insert(HEADER_DELIVERY, "72d3162e".parse().unwrap());
        let signature = format_signature_header(&compute_signature(body.as_bytes(), secret));
        headers.insert(HEADER_SIGNATURE, signature.parse().unwrap());
        IncomingRequest::new(headers, body.to_string())
    }

    fn all() -> Vec<String> {
        vec!["pull_request".into(), "issue_comment".into()]
    }

    #[test]
    fn decodes_signed_delivery() {
        let body = r#"{"action":"opened","repository":{"full_name":"octo/repo"}}"#;
        let payload = GitHubHook::new(SECRET)
            .parse(&signed("pull_request", body, SECRET), &all())
            .unwrap();
        assert_eq!(payload.event, "pull_request");
        assert_eq!(payload.subject.as_deref(), Some("octo/repo"));
        assert_eq!(payload.delivery.as_deref(), Some("72d3162e"));
        assert_eq!(payload.body["action"], "opened");
    }

    #[test]
    fn rejects_bad_signature() {
        let err = GitHubHook::new(SECRET)
            .parse(&signed("pull_request", "{}", b"wrong"), &all())
            .unwrap_err();
        assert!(matches!(err, HookError::InvalidSignature));
    }

    #[test]
    fn ping_is_not_allowed() {
        let err = GitHubHook::new(SECRET)
            .parse(&signed("ping", r#"{"zen":"hi"}"#, SECRET), &all())
            .unwrap_err();
        assert!(matches!(err, HookError::EventNotAllowed(e) if e == "ping"));
    }

    #[test]
    fn missing_signature_header() {
        let mut request = signed("pull_request", "{}", SECRET);
        request.headers.remove(HEADER_SIGNATURE);
        let err = GitHubHook::new(SECRET).parse(&request, &all()).unwrap_err();
        assert!(matches!(err, HookError::MissingHeader(HEADER_SIGNATURE)));
    }

    #[test]
    fn empty_secret_fails_check() {
        assert!(GitHubHook::new(Vec::<u8>::new()).check().is_err());
        assert!(GitHubHook::new(SECRET).check().is_ok());
    }
}

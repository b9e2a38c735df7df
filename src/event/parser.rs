//! Request-to-event conversion.
//!
//! A [`Parser`] turns one HTTP request into at most one [`Event`]:
//!
//! * `Ok(Some(event))` - a canonical event was produced
//! * `Ok(None)` - well-formed but uninteresting (not on the allowlist)
//! * `Err(e)` - authentication failure, malformed body, or internal error
//!
//! A [`ParseError`] maps to HTTP 500 unless it carries a [`StatusError`].

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::Event;
use crate::validate::Validate;

/// Describes one event type a parser can produce, for preference UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDescriptor {
    /// The event type, e.g. `com.gitlab.push`.
    pub key: String,
    /// Short human-readable name.
    pub title: String,
    /// When this event type is emitted.
    pub description: String,
}

impl TypeDescriptor {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        TypeDescriptor {
            key: key.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// The parts of an HTTP request a parser may look at.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    /// Request headers as received.
    pub headers: HeaderMap,
    /// Raw request body; signature checks need the exact bytes.
    pub body: Bytes,
}

impl IncomingRequest {
    /// Wraps a received request.
    pub fn new(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        IncomingRequest {
            headers,
            body: body.into(),
        }
    }

    /// Returns a header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An error that dictates the HTTP response status.
///
/// Two status errors are equal when their codes and reason messages are
/// equal, whatever they were wrapped in on the way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (HTTP {})", .code.as_u16())]
pub struct StatusError {
    /// HTTP status to answer with.
    pub code: StatusCode,
    /// Response body.
    pub reason: String,
}

impl StatusError {
    /// Creates a status error with an arbitrary code.
    pub fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        StatusError {
            code,
            reason: reason.into(),
        }
    }

    /// A `400 Bad Request`.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    /// A `401 Unauthorized`, for failed signature or token checks.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, reason)
    }
}

/// Error type for parse failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request was rejected with a specific HTTP status.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// JSON deserialization failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body decoded but does not describe a valid event.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Something on our side went wrong.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParseError {
    /// The HTTP status this failure should produce.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ParseError::Status(e) => e.code,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the status-bearing error, if this is one.
    pub fn as_status(&self) -> Option<&StatusError> {
        match self {
            ParseError::Status(e) => Some(e),
            _ => None,
        }
    }
}

/// Converts webhook requests into events.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Parses one request. See the module docs for the three outcomes.
    async fn parse(
        &self,
        cancel: &CancellationToken,
        request: &IncomingRequest,
    ) -> Result<Option<Event>, ParseError>;

    /// All event types this parser can produce.
    fn event_types(&self) -> Vec<TypeDescriptor>;

    /// Startup self-check, if this parser has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_defaults_to_500() {
        let err = ParseError::Malformed("no".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ParseError::from(json_err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_error_carries_code() {
        let err = ParseError::from(StatusError::unauthorized("bad token"));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "bad token (HTTP 401)");
    }

    #[test]
    fn status_error_equality_survives_wrapping() {
        let original = StatusError::bad_request("missing header");
        let wrapped = ParseError::from(original.clone());
        assert_eq!(wrapped.as_status(), Some(&original));
        assert_ne!(wrapped.as_status(), Some(&StatusError::bad_request("other")));
    }

    #[test]
    fn header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gitlab-event", "Push Hook".parse().unwrap());
        let req = IncomingRequest::new(headers, "{}");
        assert_eq!(req.header("x-gitlab-event"), Some("Push Hook"));
        assert_eq!(req.header("x-missing"), None);
    }
}

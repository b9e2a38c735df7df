//! Slack chat transport.
//!
//! Posts the rendered message to `chat.postMessage` as a direct message to
//! the recipient's Slack user id (the identifier stored under the configured
//! `(namespace, kind)`, `slack.com/id` by default). Rich options attached to
//! the notification for the `slack` transport (e.g. `blocks`) are merged into
//! the request body.
//!
//! Failures are categorized like other upstream API errors:
//!
//! - HTTP 429, 5xx, network errors and Slack's own `ratelimited` /
//!   `internal_error` style codes are **transient**
//! - a missing Slack id, auth failures and unknown recipients are
//!   **permanent**

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transport, TransportError, TransportKey};
use crate::identifier::{ID, NamespaceAndKind};
use crate::notification::Notification;
use crate::validate::{Validate, ValidationError};

/// Transport key of [`SlackTransport`].
pub const SLACK_KEY: &str = "slack";
/// Namespace of Slack identifiers; the member id uses kind `id`.
pub const SLACK_NAMESPACE: &str = "slack.com";
/// Base URL of the Slack Web API.
pub const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Transport that delivers direct messages through the Slack Web API.
pub struct SlackTransport {
    client: Client,
    token: String,
    api_url: String,
    user_id: NamespaceAndKind,
}

impl SlackTransport {
    /// Creates a transport for the public Slack API.
    pub fn new(token: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(SlackTransport {
            client,
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            user_id: slack_user_id_key(),
        })
    }

    /// Points the transport at a different API base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Reads the chat id from a different identifier key.
    pub fn with_user_id_key(mut self, key: NamespaceAndKind) -> Self {
        self.user_id = key;
        self
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        method: &str,
        body: &Value,
    ) -> Result<SlackResponse, TransportError> {
        let request = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .bearer_auth(&self.token)
            .json(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::cancelled()),
            response = request => response.map_err(from_reqwest)?,
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(TransportError::transient(format!(
                "slack {} returned HTTP {}",
                method, status
            )));
        }
        if !status.is_success() {
            return Err(TransportError::permanent(format!(
                "slack {} returned HTTP {}",
                method, status
            )));
        }

        let parsed: SlackResponse = response.json().await.map_err(from_reqwest)?;
        match parsed.error.as_deref() {
            _ if parsed.ok => Ok(parsed),
            Some(code) if is_transient_code(code) => Err(TransportError::transient(format!(
                "slack {} failed: {}",
                method, code
            ))),
            code => Err(TransportError::permanent(format!(
                "slack {} failed: {}",
                method,
                code.unwrap_or("unknown error")
            ))),
        }
    }
}

/// The default key for Slack user ids: `slack.com/id`.
pub fn slack_user_id_key() -> NamespaceAndKind {
    NamespaceAndKind::from_static(Some(SLACK_NAMESPACE), ID)
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Slack error codes that resolve with time.
fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "ratelimited"
            | "rate_limited"
            | "internal_error"
            | "fatal_error"
            | "service_unavailable"
            | "request_timeout"
    )
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    let message = format!("slack request failed: {}", err);
    if err.is_decode() || err.is_builder() {
        TransportError::permanent(message).with_source(err)
    } else {
        TransportError::transient(message).with_source(err)
    }
}

#[async_trait]
impl Transport for SlackTransport {
    fn key(&self) -> TransportKey {
        TransportKey::new(SLACK_KEY)
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let recipient = notification
            .recipient()
            .must_get(&self.user_id)
            .map_err(|e| TransportError::permanent(e.to_string()))?;

        let key = self.key();
        let mut body = Map::new();
        if let Some(Value::Object(options)) = notification.options(&key) {
            body.extend(options.clone());
        }
        body.insert("channel".into(), json!(recipient.value()));
        body.insert("text".into(), json!(notification.render(&key)));

        self.call(cancel, "chat.postMessage", &Value::Object(body))
            .await?;
        debug!(
            id = %notification.context().id(),
            channel = %recipient.value(),
            "Posted Slack message"
        );
        Ok(())
    }

    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[async_trait]
impl Validate for SlackTransport {
    /// Checks the token with `auth.test`.
    async fn validate(&self, cancel: &CancellationToken) -> Result<(), ValidationError> {
        self.call(cancel, "auth.test", &json!({}))
            .await
            .map(|_| ())
            .map_err(|e| ValidationError::new("slack transport", e.to_string()).with_source(e))
    }
}

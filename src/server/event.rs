//! Webhook ingestion endpoint.
//!
//! `POST /event/{parser}` runs the whole pipeline inline: parse, process,
//! dispatch. Delivery failures are logged but never change the response;
//! the relay does not promise synchronous delivery to callers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::AppState;
use crate::event::parser::{IncomingRequest, ParseError};
use crate::processor::{ProcessError, run_chain};

/// Body when the parser ignores the event.
pub const NOT_INTERESTED: &str = "thanks but we're not interested in that event";
/// Body when the processor chain produced nothing.
pub const NO_NOTIFICATIONS: &str = "no notifications to send";
/// Body once every notification has been handed to the notifier.
pub const DISPATCHED: &str = "Notifications dispatched\n";

/// Errors that end an ingestion request early.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no parser registered for {0:?}")]
    UnknownParser(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            IngestError::UnknownParser(_) => (StatusCode::NOT_FOUND, self.to_string()),
            IngestError::Parse(e) => match e.as_status() {
                Some(status) => (status.code, status.reason.clone()),
                None => (e.status_code(), self.to_string()),
            },
            IngestError::Process(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, message).into_response()
    }
}

/// Ingestion handler.
///
/// # Response
///
/// - 200 OK: event ignored, or it produced no notifications
/// - 202 Accepted: every notification was handed to the dispatcher
/// - 4xx: the parser rejected the request with a specific status
/// - 404 Not Found: unknown parser
/// - 500 Internal Server Error: parse or processor failure
#[instrument(skip(app_state, headers, body), fields(parser = %key))]
pub async fn event_handler(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), IngestError> {
    let parser = app_state
        .parser(&key)
        .ok_or_else(|| IngestError::UnknownParser(key.clone()))?;

    // Cancelled if the client goes away and this future is dropped.
    let cancel = app_state.request_token();
    let _guard = cancel.clone().drop_guard();

    let request = IncomingRequest::new(headers, body);
    let event = match parser.parse(&cancel, &request).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!("Parser ignored request");
            return Ok((StatusCode::OK, NOT_INTERESTED));
        }
        Err(e) => {
            warn!(error = %e, status = e.status_code().as_u16(), "Failed to parse event");
            return Err(e.into());
        }
    };

    let context = event.context();
    debug!(id = context.id(), event_type = context.event_type(), "Parsed event");

    let notifications = run_chain(app_state.processors(), &cancel, &event)
        .await
        .map_err(|e| {
            error!(id = context.id(), error = %e, "Processor chain failed");
            e
        })?;
    if notifications.is_empty() {
        return Ok((StatusCode::OK, NO_NOTIFICATIONS));
    }

    let total = notifications.len();
    let mut failed = 0usize;
    for notification in &notifications {
        if let Err(e) = app_state.notifier().push(&cancel, notification).await {
            failed += 1;
            warn!(
                id = context.id(),
                to = %notification.recipient(),
                error = %e,
                "Notification delivery failed"
            );
        }
    }
    if failed > 0 {
        warn!(id = context.id(), failed, total, "Some notifications failed");
    } else {
        info!(id = context.id(), event_type = context.event_type(), total, "Notifications dispatched");
    }

    Ok((StatusCode::ACCEPTED, DISPATCHED))
}

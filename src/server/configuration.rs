//! Introspection of registered sources and transports.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;
use crate::event::parser::TypeDescriptor;

/// A registered parser and the event types it can emit.
#[derive(Debug, Serialize)]
pub struct SourceDescription {
    /// Path segment under `/event/`.
    pub key: String,
    pub event_types: Vec<TypeDescriptor>,
}

/// A registered transport.
#[derive(Debug, Serialize)]
pub struct TransportDescription {
    pub key: String,
}

/// Body of `GET /configuration`.
#[derive(Debug, Serialize)]
pub struct Configuration {
    /// Sorted by key.
    pub sources: Vec<SourceDescription>,
    /// Transports in dispatch order.
    pub transports: Vec<TransportDescription>,
}

/// `GET /configuration`
pub async fn configuration_handler(State(app_state): State<AppState>) -> Json<Configuration> {
    let sources = app_state
        .parsers()
        .iter()
        .map(|(key, parser)| SourceDescription {
            key: key.clone(),
            event_types: parser.event_types(),
        })
        .collect();
    let transports = app_state
        .transport_keys()
        .into_iter()
        .map(|key| TransportDescription {
            key: key.to_string(),
        })
        .collect();
    Json(Configuration {
        sources,
        transports,
    })
}

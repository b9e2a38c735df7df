//! User preference endpoints.
//!
//! Both endpoints answer with the *hydrated* preferences: only registered
//! event types and transports appear, and registered pairs the user never
//! set show the server's default.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::AppState;
use crate::preference::{PreferenceMap, hydrate};
use crate::user::UserError;

/// Request and response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesBody {
    /// `event type → transport → bool`.
    pub preferences: PreferenceMap,
}

/// Errors from the preference endpoints.
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("malformed preferences: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("user store error: {0}")]
    Store(UserError),
}

impl PreferencesError {
    fn from_store(key: &str, e: UserError) -> Self {
        if e.is_not_found() {
            PreferencesError::NotFound(key.to_string())
        } else {
            warn!(user = %key, error = %e, "User store failed");
            PreferencesError::Store(e)
        }
    }
}

impl IntoResponse for PreferencesError {
    fn into_response(self) -> Response {
        let status = match &self {
            PreferencesError::NotFound(_) => StatusCode::NOT_FOUND,
            PreferencesError::Malformed(_) => StatusCode::BAD_REQUEST,
            PreferencesError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn hydrated(app_state: &AppState, stored: &PreferenceMap) -> PreferencesBody {
    let cancel = app_state.request_token();
    let _guard = cancel.clone().drop_guard();
    PreferencesBody {
        preferences: hydrate(
            &cancel,
            stored,
            &app_state.event_types(),
            &app_state.transport_keys(),
            app_state.default_preference(),
        )
        .await,
    }
}

/// `GET /users/{key}/preferences`
pub async fn get_preferences(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PreferencesBody>, PreferencesError> {
    let user = app_state
        .store()
        .get(&key)
        .await
        .map_err(|e| PreferencesError::from_store(&key, e))?;
    Ok(Json(hydrated(&app_state, &user.preferences).await))
}

/// `PUT /users/{key}/preferences`
///
/// Replaces the stored preferences with the body's `preferences` as given;
/// the response shows them hydrated.
pub async fn put_preferences(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<PreferencesBody>, PreferencesError> {
    let PreferencesBody { preferences } = serde_json::from_slice(&body)?;
    app_state
        .store()
        .set_preferences(&key, preferences.clone())
        .await
        .map_err(|e| PreferencesError::from_store(&key, e))?;
    info!(user = %key, "Preferences updated");
    Ok(Json(hydrated(&app_state, &preferences).await))
}

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db::refresh_schema_text;
use crate::error::PilotError;
use crate::middleware::json_body::JsonBody;
use crate::middleware::session::{CurrentSession, clear_session_cookie, session_cookie};
use crate::router::PilotState;
use crate::service::session::{self, CredentialBundle, SettingsPatch};

#[derive(Debug, Serialize)]
pub struct SettingsUpdated {
    pub message: &'static str,
    pub settings: CredentialBundle,
}

/// GET /api/settings -> the current bundle, or `{}` without a session.
pub async fn get_settings(CurrentSession(session): CurrentSession) -> Response {
    match session {
        Some(bundle) => Json(bundle).into_response(),
        None => Json(json!({})).into_response(),
    }
}

/// POST /api/settings -> merge the submitted fields and re-issue the token.
/// A changed connection URI refreshes the cached schema before responding.
pub async fn update_settings(
    State(state): State<PilotState>,
    CurrentSession(current): CurrentSession,
    jar: CookieJar,
    JsonBody(patch): JsonBody<SettingsPatch>,
) -> Result<(CookieJar, Json<SettingsUpdated>), PilotError> {
    let bundle = session::update(current, patch, Utc::now(), refresh_schema_text).await;
    let token = session::encode(&bundle, &state.session_key)?;
    if !session::fits_in_cookie(&token) {
        warn!(
            token_bytes = token.len(),
            limit = session::MAX_COOKIE_BYTES,
            "session token exceeds browser cookie limit; the client will likely drop it"
        );
    }
    let jar = jar.add(session_cookie(token, &bundle, state.config.secure_cookie));

    info!(
        has_model_key = bundle.model_api_key.is_some(),
        has_store_uri = bundle.store_connection_uri.is_some(),
        has_schema = bundle.rendered_schema.is_some(),
        "settings updated"
    );
    Ok((
        jar,
        Json(SettingsUpdated {
            message: "Settings updated successfully",
            settings: bundle,
        }),
    ))
}

/// DELETE /api/settings -> drop the session cookie.
pub async fn delete_settings(jar: CookieJar) -> impl IntoResponse {
    info!("settings cleared");
    (
        jar.remove(clear_session_cookie()),
        Json(json!({ "message": "Settings cleared successfully" })),
    )
}

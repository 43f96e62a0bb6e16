use axum::{Json, extract::State};

use crate::error::PilotError;
use crate::middleware::json_body::JsonBody;
use crate::middleware::session::CurrentSession;
use crate::router::PilotState;
use crate::service::completion::suggest;
use crate::service::session::EffectiveSettings;
use crate::types::query::{EditorCompletionRequest, EditorCompletionResponse};

/// POST /api/completions -> one inline suggestion for the SQL editor.
pub async fn completions_handler(
    State(state): State<PilotState>,
    CurrentSession(session): CurrentSession,
    JsonBody(request): JsonBody<EditorCompletionRequest>,
) -> Result<Json<EditorCompletionResponse>, PilotError> {
    let settings = EffectiveSettings::resolve(session.as_ref(), &state.config);
    let api_key = settings.require_model_key()?;

    let completion = suggest(
        &state.mistral,
        &state.config.completion_model,
        api_key,
        &request.completion_metadata,
        &settings.schema_text,
    )
    .await?;
    Ok(Json(EditorCompletionResponse { completion }))
}

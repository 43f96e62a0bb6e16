use axum::{Json, extract::State};
use tracing::{info, warn};

use crate::error::PilotError;
use crate::middleware::json_body::JsonBody;
use crate::middleware::session::CurrentSession;
use crate::router::PilotState;
use crate::service::session::EffectiveSettings;
use crate::service::sql_policy::GateChecks;
use crate::service::synthesizer::QuerySynthesizer;
use crate::types::query::{ChatRequest, QueryCandidate};

/// Layers applied to a synthesized candidate before it is returned.
///
/// Outside safe mode only the dry run runs. In safe mode the denylist is added
/// too, because the retrieval-only instruction is a prompt, not a guarantee.
pub fn candidate_checks(safe_mode: bool) -> GateChecks {
    if safe_mode {
        GateChecks::BOTH
    } else {
        GateChecks::DRY_RUN_ONLY
    }
}

/// POST /api/chat -> synthesize a query from the conversation and vet it
/// against the live store.
pub async fn chat_handler(
    State(state): State<PilotState>,
    CurrentSession(session): CurrentSession,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Json<QueryCandidate>, PilotError> {
    let settings = EffectiveSettings::resolve(session.as_ref(), &state.config);
    let api_key = settings.require_model_key()?;
    let uri = settings.require_store_uri()?;
    if request.messages.is_empty() {
        return Err(PilotError::BadRequest(
            "messages must contain at least one turn".to_string(),
        ));
    }

    let safe_mode = state.config.safe_sql_mode;
    let candidate = QuerySynthesizer::new(&state.mistral, &state.config.chat_model)
        .synthesize(api_key, &request.messages, &settings.schema_text, safe_mode)
        .await
        .inspect_err(|e| warn!(error = %e, "query synthesis failed"))?;

    if candidate.sql_query.trim().is_empty() {
        info!("model declined to produce a query");
        return Ok(Json(candidate));
    }

    state
        .policy
        .admit(&candidate.sql_query, uri, candidate_checks(safe_mode))
        .await?;
    Ok(Json(candidate))
}

use axum::{Json, extract::State};

use crate::db::{QueryExecutor, QueryOutput};
use crate::error::PilotError;
use crate::middleware::json_body::JsonBody;
use crate::middleware::session::CurrentSession;
use crate::router::PilotState;
use crate::service::session::EffectiveSettings;
use crate::service::sql_policy::GateChecks;
use crate::types::query::QueryRequest;

/// Layers applied to caller-submitted SQL.
pub fn direct_checks(dry_run_direct_sql: bool) -> GateChecks {
    if dry_run_direct_sql {
        GateChecks::BOTH
    } else {
        GateChecks::STATIC_ONLY
    }
}

/// POST /api/querydb -> run the statement and return its rows.
pub async fn querydb_handler(
    State(state): State<PilotState>,
    CurrentSession(session): CurrentSession,
    JsonBody(request): JsonBody<QueryRequest>,
) -> Result<Json<QueryOutput>, PilotError> {
    let settings = EffectiveSettings::resolve(session.as_ref(), &state.config);
    let uri = settings.require_store_uri()?;

    let checks = direct_checks(state.config.dry_run_direct_sql);
    let output = QueryExecutor::new(&state.policy, checks)
        .execute(&request.sql, uri)
        .await?;
    Ok(Json(output))
}

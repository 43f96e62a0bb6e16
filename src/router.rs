use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use cookie::Key;

use crate::api::mistral_api::MistralApi;
use crate::config::Config;
use crate::error::PilotError;
use crate::handlers::{chat, completions, querydb, settings};
use crate::service::session::session_key;
use crate::service::sql_policy::SqlPolicy;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Request-independent state; every handler call is otherwise stateless.
#[derive(Clone)]
pub struct PilotState {
    pub config: Arc<Config>,
    pub session_key: Key,
    pub mistral: MistralApi,
    pub policy: Arc<SqlPolicy>,
}

impl PilotState {
    pub fn new(config: Config) -> Result<Self, PilotError> {
        let session_key = session_key(&config.session_secret)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("querypilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let mistral = MistralApi::new(client, config.mistral_base_url.clone());
        Ok(Self {
            config: Arc::new(config),
            session_key,
            mistral,
            policy: Arc::new(SqlPolicy::standard()?),
        })
    }

    pub fn with_mistral(mut self, mistral: MistralApi) -> Self {
        self.mistral = mistral;
        self
    }
}

pub fn pilot_router(state: PilotState) -> Router {
    Router::new()
        .route(
            "/api/settings",
            get(settings::get_settings)
                .post(settings::update_settings)
                .delete(settings::delete_settings),
        )
        .route("/api/chat", post(chat::chat_handler))
        .route("/api/querydb", post(querydb::querydb_handler))
        .route("/api/completions", post(completions::completions_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PilotError;

/// Minimum length of `SESSION_SECRET`; the session key is expanded from it.
pub const MIN_SECRET_LEN: usize = 32;

const ENV_KEYS: &[&str] = &[
    "session_secret",
    "mistral_api_key",
    "postgres_url",
    "db_schema",
    "safe_sql_mode",
    "dry_run_direct_sql",
    "mistral_base_url",
    "chat_model",
    "completion_model",
    "listen_addr",
    "loglevel",
    "secure_cookie",
];

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session_secret: String,

    /// Fallbacks used when the caller has no session value.
    pub mistral_api_key: Option<String>,
    pub postgres_url: Option<String>,
    pub db_schema: Option<String>,

    /// Selects the retrieval-only synthesis instruction.
    pub safe_sql_mode: bool,
    /// Also dry-run caller-submitted SQL before executing it.
    pub dry_run_direct_sql: bool,

    pub mistral_base_url: Url,
    pub chat_model: String,
    pub completion_model: String,

    pub listen_addr: String,
    pub loglevel: String,
    pub secure_cookie: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            mistral_api_key: None,
            postgres_url: None,
            db_schema: None,
            safe_sql_mode: false,
            dry_run_direct_sql: false,
            mistral_base_url: Url::parse("https://api.mistral.ai/").expect("static url"),
            chat_model: "codestral-2508".to_string(),
            completion_model: "codestral-latest".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            loglevel: "info".to_string(),
            secure_cookie: false,
        }
    }
}

impl Config {
    /// Build the configuration from defaults overlaid with environment variables.
    pub fn load() -> Result<Self, PilotError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Env::raw().only(ENV_KEYS)),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, PilotError> {
        let cfg: Config = figment
            .extract()
            .map_err(|e| PilotError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PilotError> {
        if self.session_secret.trim().is_empty() {
            return Err(PilotError::Config(
                "SESSION_SECRET is not defined; it is required for session management".to_string(),
            ));
        }
        if self.session_secret.len() < MIN_SECRET_LEN {
            return Err(PilotError::Config(format!(
                "SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(pairs: &[(&str, &str)]) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for (k, v) in pairs {
            figment = figment.merge((*k, *v));
        }
        figment
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = Config::from_figment(with(&[])).unwrap_err();
        assert!(matches!(err, PilotError::Config(ref m) if m.contains("SESSION_SECRET")));
    }

    #[test]
    fn short_secret_is_fatal() {
        let err = Config::from_figment(with(&[("session_secret", "too-short")])).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[test]
    fn defaults_apply_around_secret() {
        let figment = with(&[("session_secret", "0123456789abcdef0123456789abcdef")])
            .merge(("safe_sql_mode", true));
        let cfg = Config::from_figment(figment).unwrap();
        assert!(cfg.safe_sql_mode);
        assert!(!cfg.dry_run_direct_sql);
        assert_eq!(cfg.chat_model, "codestral-2508");
        assert_eq!(cfg.mistral_base_url.as_str(), "https://api.mistral.ai/");
        assert!(cfg.mistral_api_key.is_none());
    }
}

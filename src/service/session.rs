//! Client-held credential sessions.
//!
//! The server keeps no session table. A `CredentialBundle` is sealed into an
//! opaque token (AES-256-GCM via the cookie crate's private jar) and handed
//! back to the client on every change. Sealing and opening are pure functions
//! of the bundle, the key and the clock.

use crate::config::{Config, MIN_SECRET_LEN};
use crate::error::PilotError;
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, CookieJar, Key};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, info};

/// Name of the cookie carrying the token; also bound into the seal.
pub const SESSION_COOKIE: &str = "user-settings";

pub const SESSION_TTL_DAYS: i64 = 7;

/// Browsers drop cookies whose name and value exceed this many bytes.
pub const MAX_COOKIE_BYTES: usize = 4096;

pub fn session_ttl() -> Duration {
    Duration::days(SESSION_TTL_DAYS)
}

/// Derive the sealing key from the configured secret.
pub fn session_key(secret: &str) -> Result<Key, PilotError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(PilotError::Config(format!(
            "SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes"
        )));
    }
    Ok(Key::derive_from(secret.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    #[serde(default, alias = "mistralApiKey", skip_serializing_if = "Option::is_none")]
    pub model_api_key: Option<String>,
    #[serde(default, alias = "postgresUrl", skip_serializing_if = "Option::is_none")]
    pub store_connection_uri: Option<String>,
    #[serde(default, alias = "schema", skip_serializing_if = "Option::is_none")]
    pub rendered_schema: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

/// Partial settings submitted by the client. `None` keeps the current value,
/// an empty string clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, alias = "mistralApiKey")]
    pub model_api_key: Option<String>,
    #[serde(default, alias = "postgresUrl")]
    pub store_connection_uri: Option<String>,
}

impl CredentialBundle {
    /// An empty bundle valid from `now` for the session TTL.
    pub fn issue(now: DateTime<Utc>) -> Self {
        Self {
            model_api_key: None,
            store_connection_uri: None,
            rendered_schema: None,
            issued_at: now,
            expires_at: now + session_ttl(),
        }
    }

    /// Same credentials, fresh validity window.
    pub fn reissued(self, now: DateTime<Utc>) -> Self {
        Self {
            issued_at: now,
            expires_at: now + session_ttl(),
            ..self
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.issued_at <= self.expires_at && now < self.expires_at
    }

    /// Merge `patch` over `self`. Returns the merged bundle and the new
    /// connection URI when it changed to a non-empty value.
    pub fn merge(self, patch: SettingsPatch) -> (Self, Option<String>) {
        let mut next = self;
        if let Some(key) = patch.model_api_key {
            next.model_api_key = non_empty(key);
        }
        let mut changed_uri = None;
        if let Some(uri) = patch.store_connection_uri {
            let uri = non_empty(uri);
            if uri != next.store_connection_uri {
                // cached schema described the previous store
                next.rendered_schema = None;
                changed_uri = uri.clone();
            }
            next.store_connection_uri = uri;
        }
        (next, changed_uri)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Seal a bundle into an opaque token.
pub fn encode(bundle: &CredentialBundle, key: &Key) -> Result<String, PilotError> {
    let payload = serde_json::to_string(bundle)?;
    let mut jar = CookieJar::new();
    jar.private_mut(key)
        .add(Cookie::new(SESSION_COOKIE, payload));
    jar.get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| PilotError::Config("session token could not be sealed".to_string()))
}

/// Whether a sealed token still fits in a browser cookie.
pub fn fits_in_cookie(token: &str) -> bool {
    SESSION_COOKIE.len() + 1 + token.len() <= MAX_COOKIE_BYTES
}

/// Open a token. Tampered, foreign, malformed and expired tokens all yield
/// `None`: a bad token means "no session", never an error.
pub fn decode(token: &str, key: &Key, now: DateTime<Utc>) -> Option<CredentialBundle> {
    let jar = CookieJar::new();
    let Some(opened) = jar
        .private(key)
        .decrypt(Cookie::new(SESSION_COOKIE, token.to_string()))
    else {
        debug!("session token failed verification");
        return None;
    };
    let bundle: CredentialBundle = match serde_json::from_str(opened.value()) {
        Ok(b) => b,
        Err(e) => {
            debug!(error = %e, "session payload malformed");
            return None;
        }
    };
    if !bundle.is_live(now) {
        debug!(expires_at = %bundle.expires_at, "session token expired");
        return None;
    }
    Some(bundle)
}

/// Apply a settings update. When the connection URI changes, `refresh` is
/// awaited for the new URI before the bundle is returned; a `None` from it
/// leaves the bundle without schema text.
pub async fn update<F, Fut>(
    current: Option<CredentialBundle>,
    patch: SettingsPatch,
    now: DateTime<Utc>,
    refresh: F,
) -> CredentialBundle
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let base = current.unwrap_or_else(|| CredentialBundle::issue(now));
    let (mut next, changed_uri) = base.merge(patch);

    if let Some(uri) = changed_uri {
        match refresh(uri).await {
            Some(text) => {
                info!(bytes = text.len(), "schema cached in session");
                next.rendered_schema = Some(text);
            }
            None => info!("session saved without schema context"),
        }
    }
    next.reissued(now)
}

/// Credentials in force for one request: session values first, configured
/// defaults second.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub model_api_key: Option<String>,
    pub store_connection_uri: Option<String>,
    pub schema_text: String,
}

pub const NO_SCHEMA: &str = "No schema provided";

impl EffectiveSettings {
    pub fn resolve(session: Option<&CredentialBundle>, config: &Config) -> Self {
        let pick = |from_session: Option<&String>, fallback: &Option<String>| {
            from_session.or(fallback.as_ref()).cloned()
        };
        Self {
            model_api_key: pick(
                session.and_then(|s| s.model_api_key.as_ref()),
                &config.mistral_api_key,
            ),
            store_connection_uri: pick(
                session.and_then(|s| s.store_connection_uri.as_ref()),
                &config.postgres_url,
            ),
            schema_text: pick(
                session.and_then(|s| s.rendered_schema.as_ref()),
                &config.db_schema,
            )
            .unwrap_or_else(|| NO_SCHEMA.to_string()),
        }
    }

    pub fn require_model_key(&self) -> Result<&str, PilotError> {
        self.model_api_key
            .as_deref()
            .ok_or(PilotError::MissingSetting("Mistral API key"))
    }

    pub fn require_store_uri(&self) -> Result<&str, PilotError> {
        self.store_connection_uri
            .as_deref()
            .ok_or(PilotError::MissingSetting("PostgreSQL URL"))
    }
}

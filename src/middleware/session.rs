use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use std::convert::Infallible;
use time::OffsetDateTime;

use crate::router::PilotState;
use crate::service::session::{CredentialBundle, SESSION_COOKIE, decode};

/// The caller's session, if it carries a valid, unexpired token.
/// Never rejects: a missing or bad token is simply no session.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Option<CredentialBundle>);

impl FromRequestParts<PilotState> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &PilotState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let bundle = jar
            .get(SESSION_COOKIE)
            .and_then(|c| decode(c.value(), &state.session_key, Utc::now()));
        Ok(Self(bundle))
    }
}

/// Cookie carrying `token`, expiring with the bundle.
pub fn session_cookie(token: String, bundle: &CredentialBundle, secure: bool) -> Cookie<'static> {
    let expires = OffsetDateTime::from_unix_timestamp(bundle.expires_at.timestamp())
        .unwrap_or_else(|_| OffsetDateTime::now_utc());
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .expires(expires)
        .build()
}

/// Removal cookie; attributes must match the ones used when setting it.
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub mod admin;
pub mod auth;
pub mod health;
pub mod session;

use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::identity::{Persistence, TokenError};
use crate::session::{AuthSession, SessionState};
use crate::AppState;

/// Value of cookie `name` in the request's `Cookie` headers.
pub(crate) fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value for a session. Without `max_age` the cookie ends with
/// the browser session.
pub(crate) fn session_cookie(config: &SessionConfig, session_id: &str, max_age: Option<i64>) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", config.cookie_name, session_id);
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(crate) fn expired_cookie(config: &SessionConfig) -> String {
    session_cookie(config, "", Some(0))
}

/// Session addressed by the request cookie.
pub(crate) async fn cookie_session(state: &AppState, headers: &HeaderMap) -> Option<Arc<AuthSession>> {
    let id = cookie_value(headers, &state.config.session.cookie_name)?;
    state.registry.get(id).await
}

/// Session of the request: the cookie session if there is one, else a
/// transient session reconciled from a bearer ID token.
pub(crate) async fn current_session(state: &AppState, headers: &HeaderMap) -> Result<Option<Arc<AuthSession>>, ApiError> {
    if let Some(session) = cookie_session(state, headers).await {
        return Ok(Some(session));
    }

    let Some(verifier) = &state.verifier else {
        return Ok(None);
    };

    let principal = match verifier.authenticate(headers).await {
        Ok(principal) => principal,
        Err(TokenError::MissingHeader) => return Ok(None),
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            return Err(ApiError::Unauthenticated);
        }
    };

    let session = state.registry.transient();
    session.set_persistence(Persistence::Session).await;
    session.on_auth_state_change(Some(principal)).await?;
    Ok(Some(Arc::new(session)))
}

/// Session state of the request; no session reads as signed out.
pub(crate) async fn current_state(state: &AppState, headers: &HeaderMap) -> Result<SessionState, ApiError> {
    Ok(current_session(state, headers)
        .await?
        .map(|session| session.state())
        .unwrap_or(SessionState::SignedOut))
}

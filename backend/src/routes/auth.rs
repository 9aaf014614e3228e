//! Sign-in, registration and sign-out endpoints (`/api/auth/*`).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use homestay_common::{AppUser, AuthResponse, LoginRequest, PopupOutcome, RegisterRequest};

use super::{cookie_session, current_session, expired_cookie, session_cookie};
use crate::error::{ApiError, ApiResult};
use crate::session::AuthSession;
use crate::AppState;

/// Session to sign into: the cookie session, or a new untracked one that
/// is registered by [`signed_in`] once the attempt succeeds.
async fn sign_in_session(state: &AppState, headers: &HeaderMap) -> Arc<AuthSession> {
    match cookie_session(state, headers).await {
        Some(session) => session,
        None => Arc::new(state.registry.transient()),
    }
}

/// Success response carrying the landing page and a refreshed cookie.
async fn signed_in(state: &AppState, session: &Arc<AuthSession>, user: AppUser) -> Response {
    state.registry.insert(session.clone()).await;
    let cookie = session_cookie(&state.config.session, session.id(), session.cookie_max_age().await);
    let body = AuthResponse {
        redirect_to: state.guard.landing_for(user.role).to_string(),
        user,
    };
    ([(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

/// POST /api/auth/login - Email/password sign-in
async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Response> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::InvalidRequest("email and password are required".to_string()));
    }
    state.throttle.check(&body.email)?;

    let session = sign_in_session(&state, &headers).await;
    let user = session
        .login(body.email.trim(), &body.password, body.remember_session)
        .await?;

    tracing::info!(session = %session.id(), uid = %user.uid, role = %user.role, "Password sign-in");
    Ok(signed_in(&state, &session, user).await)
}

/// POST /api/auth/register - Create an account and sign it in
async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Response> {
    let display_name = body.display_name();
    let session = sign_in_session(&state, &headers).await;
    let user = session
        .register(body.email.trim(), &body.password, display_name.as_deref())
        .await?;

    tracing::info!(session = %session.id(), uid = %user.uid, "Account registered");
    Ok(signed_in(&state, &session, user).await)
}

/// POST /api/auth/provider - Third-party sign-in popup outcome
async fn provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(outcome): Json<PopupOutcome>,
) -> ApiResult<Response> {
    let session = sign_in_session(&state, &headers).await;
    let user = session.login_with_provider(outcome).await?;

    tracing::info!(session = %session.id(), uid = %user.uid, role = %user.role, "Provider sign-in");
    Ok(signed_in(&state, &session, user).await)
}

/// POST /api/auth/logout - Sign out and drop the session
async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(session) = cookie_session(&state, &headers).await {
        session.logout().await;
        state.registry.remove(session.id()).await;
    }

    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, expired_cookie(&state.config.session))],
    )
        .into_response()
}

/// POST /api/auth/refresh-role - Re-read the role after an out-of-band change
async fn refresh_role(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<AuthResponse>> {
    let session = current_session(&state, &headers)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    let user = session.refresh_role().await?;

    Ok(Json(AuthResponse {
        redirect_to: state.guard.landing_for(user.role).to_string(),
        user,
    }))
}

/// POST /api/auth/token - Renew the provider session
async fn renew(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Response> {
    let session = cookie_session(&state, &headers)
        .await
        .ok_or(ApiError::Unauthenticated)?;
    let user = session.renew().await?;
    Ok(signed_in(&state, &session, user).await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/provider", post(provider))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh-role", post(refresh_role))
        .route("/api/auth/token", post(renew))
        .with_state(state)
}

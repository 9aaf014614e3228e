//! Admin API routes (`/admin/api/*`).
//!
//! Provides role record management for the business dashboard:
//! - `GET /admin/api/users` lists role records, newest first
//! - `PATCH /admin/api/users/:id/role` changes a role
//! - `DELETE /admin/api/users/:id` deletes a role record
//!
//! Every route sits behind the route guard with an admin-only requirement.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch},
    Json, Router,
};
use homestay_common::{Role, RoleRecord, RoleRequirement, UpdateRoleRequest, UsersResponse};

use super::current_state;
use crate::error::{ApiError, ApiResult};
use crate::guard::{authorize, GuardDecision};
use crate::roles::StoreError;
use crate::AppState;

/// Seconds a client should wait before retrying while the session resolves.
const RETRY_AFTER_SECS: u64 = 1;

/// Middleware that applies the route guard with an admin requirement.
async fn require_admin(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let session_state = match current_state(&state, request.headers()).await {
        Ok(session_state) => session_state,
        Err(e) => return e.into_response(),
    };

    let required = RoleRequirement::from(Role::Admin);
    match authorize(&session_state, Some(&required)) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Pending => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
        )
            .into_response(),
        GuardDecision::RedirectToLogin => see_other(state.guard.login_path()),
        GuardDecision::RedirectToLanding => {
            tracing::info!(
                uid = session_state.user().map(|u| u.uid.as_str()).unwrap_or_default(),
                path = %request.uri().path(),
                "Admin route refused"
            );
            see_other(state.guard.landing_path())
        }
    }
}

fn see_other(location: &str) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, location.to_string())]).into_response()
}

/// GET /admin/api/users - List role records
async fn api_users_list(State(state): State<Arc<AppState>>) -> ApiResult<Json<UsersResponse>> {
    let users = state.store.list().await?;
    let total = users.len();
    Ok(Json(UsersResponse { users, total }))
}

/// PATCH /admin/api/users/:id/role - Change the role of a record
async fn api_users_update_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateRoleRequest>,
) -> ApiResult<Json<RoleRecord>> {
    let record = state.store.update_role(&id, body.role).await?;
    tracing::info!(id = %id, uid = %record.principal_id, role = %record.role, "Role changed");
    Ok(Json(record))
}

/// DELETE /admin/api/users/:id - Delete a role record
async fn api_users_delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.store.delete(&id).await? {
        tracing::info!(id = %id, "Role record deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Store(StoreError::NotFound(id)))
    }
}

/// Build the admin router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/users", get(api_users_list))
        .route("/api/users/:id/role", patch(api_users_update_role))
        .route("/api/users/:id", delete(api_users_delete))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

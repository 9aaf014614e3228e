use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.registry.len().await;
    let body = format!(
        "# HELP homestay_up Whether the service is up\n\
         # TYPE homestay_up gauge\n\
         homestay_up 1\n\
         # HELP homestay_info Service information\n\
         # TYPE homestay_info gauge\n\
         homestay_info{{version=\"{}\"}} 1\n\
         # HELP homestay_active_sessions Browser sessions held by the gateway\n\
         # TYPE homestay_active_sessions gauge\n\
         homestay_active_sessions {}\n",
        version, sessions
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

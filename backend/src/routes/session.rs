//! Session snapshot, live session events and guard decisions.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::stream::Stream;
use homestay_common::{GuardResponse, SessionSnapshot};
use serde::Deserialize;
use tokio_stream::StreamExt as TokioStreamExt;

use super::{cookie_session, current_session, current_state};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/session - Current session snapshot
async fn snapshot(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<SessionSnapshot>> {
    let snapshot = match current_session(&state, &headers).await? {
        Some(session) => session.snapshot(),
        None => SessionSnapshot {
            resolved: true,
            user: None,
        },
    };
    Ok(Json(snapshot))
}

/// GET /api/session/events - SSE stream of session snapshots
///
/// The first event carries the current snapshot; later events follow every
/// published change until the session is dropped.
async fn events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = cookie_session(&state, &headers)
        .await
        .ok_or(ApiError::Unauthenticated)?;

    let stream = TokioStreamExt::filter_map(session.subscribe().into_stream(), |session_state| {
        match serde_json::to_string(&session_state.snapshot()) {
            Ok(data) => Some(Ok(Event::default().event("session").data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode session event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[derive(Debug, Deserialize)]
struct GuardQuery {
    path: String,
}

/// GET /api/guard?path= - Guard decision for a navigation attempt
async fn guard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<GuardQuery>,
) -> ApiResult<Json<GuardResponse>> {
    let session_state = current_state(&state, &headers).await?;
    let response = state.guard.check(&query.path, &session_state);
    tracing::debug!(path = %query.path, outcome = ?response.outcome, "Guard decision");
    Ok(Json(response))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/session", get(snapshot))
        .route("/api/session/events", get(events))
        .route("/api/guard", get(guard))
        .with_state(state)
}

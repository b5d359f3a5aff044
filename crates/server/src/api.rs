//! Read-only HTTP query API.

use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use scriba_application::queries::ListParams;
use scriba_domain::{DomainError, JobId};
use tracing::error;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "consumer": state.metrics.snapshot(),
    }))
    .into_response()
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "job id is not a canonical UUID")
        }
    };

    match state.queries.get(&job_id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => internal_error(e),
    }
}

async fn list_jobs(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    match state.queries.list(&params).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => internal_error(e),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn internal_error(e: DomainError) -> Response {
    error!(error = %e, "query failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

mod datasets;
mod inference;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub struct Limits {
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

/// All routes with the middleware stack applied.
pub fn router(state: AppState, limits: Limits) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/datasets", get(datasets::list))
        .route("/preprocess", post(datasets::preprocess))
        .route("/dataset/{id}", get(datasets::get).delete(datasets::delete))
        .route(
            "/dataset/{id}/text_prompt",
            get(datasets::text_prompt).put(datasets::update_text_prompt),
        )
        .route("/dataset/{id}/images", get(datasets::images))
        .route("/dataset/{id}/image/{kind}/{filename}", get(datasets::image))
        .route("/inference/list", get(inference::list))
        .route("/inference/{id}/start", post(inference::start))
        .route("/inference/{id}/status", get(inference::status))
        .route("/inference/{id}/stop", post(inference::stop))
        .route("/inference/{id}/log", get(inference::log))
        .layer(DefaultBodyLimit::max(limits.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            limits.request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "data_dir": state.store.root().display().to_string(),
    }))
}

/// Parse a JSON body by hand so malformed input is reported like any other
/// invalid request instead of with axum's rejection text.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| AppError::BadRequest(format!("Invalid JSON body: {err}")))
}

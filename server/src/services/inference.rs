use super::parse_body;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::io;
use supervisor::{types::ConnectionParams, InferenceStatus, StopOutcome, SupervisorError};
use tokio_util::io::ReaderStream;

/// Launch the worker for a preprocessed dataset. The body is optional; any
/// connection field left out takes its default.
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let params: ConnectionParams = if body.iter().all(u8::is_ascii_whitespace) {
        ConnectionParams::default()
    } else {
        parse_body(&body)?
    };
    let record = state
        .supervisor
        .start(id.clone(), params)
        .await
        .map_err(|err| AppError::for_dataset(&id, err))?;
    Ok(Json(json!({
        "dataset_id": record.dataset_id,
        "pid": record.pid,
        "bundle_path": record.bundle_path,
        "log_path": record.log_path,
        "started": record.started,
        "status": "started",
        "message": "Inference started successfully",
    })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let status = state
        .supervisor
        .status(id.clone())
        .await
        .map_err(|err| AppError::for_dataset(&id, err))?;
    let label = status.label();
    let body = match status {
        InferenceStatus::NotRunning => json!({
            "dataset_id": id,
            "status": label,
        }),
        InferenceStatus::Stopped => json!({
            "dataset_id": id,
            "status": label,
            "message": "Process no longer running",
        }),
        InferenceStatus::Stopping(record) => json!({
            "dataset_id": id,
            "status": label,
            "pid": record.pid,
            "started": record.started,
            "bundle_path": record.bundle_path,
            "log_path": record.log_path,
        }),
        InferenceStatus::Running { record, usage } => json!({
            "dataset_id": id,
            "status": label,
            "pid": record.pid,
            "started": record.started,
            "bundle_path": record.bundle_path,
            "log_path": record.log_path,
            "cpu_percent": usage.cpu_percent,
            "memory_mb": usage.memory_mb,
        }),
    };
    Ok(Json(body))
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let outcome = state
        .supervisor
        .stop(id.clone())
        .await
        .map_err(|err| AppError::for_dataset(&id, err))?;
    let body = match outcome {
        StopOutcome::Stopped { forced } => json!({
            "dataset_id": id,
            "status": "stopped",
            "forced": forced,
            "message": "Inference stopped successfully",
        }),
        StopOutcome::AlreadyStopped => json!({
            "dataset_id": id,
            "status": "already_stopped",
            "forced": false,
            "message": "Process was not running",
        }),
    };
    Ok(Json(body))
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let running: Vec<Value> = state
        .supervisor
        .list()
        .await?
        .into_iter()
        .map(|record| {
            json!({
                "dataset_id": record.dataset_id,
                "pid": record.pid,
                "started": record.started,
                "bundle_path": record.bundle_path,
            })
        })
        .collect();
    Ok(Json(json!({
        "count": running.len(),
        "running_inference": running,
    })))
}

/// Whatever the worker has written so far.
pub async fn log(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let path = state.store.log_path(&id)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(AppError::for_dataset(
                &id,
                SupervisorError::NotFound("Log file not found".into()),
            ))
        }
        Err(err) => return Err(SupervisorError::from(err).into()),
    };
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

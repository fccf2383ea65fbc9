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
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use supervisor::{
    store::{DatasetMetadata, ImageKind, NewImage},
    types::ImageBlob,
};
use tokio_util::io::ReaderStream;

#[derive(Deserialize)]
struct PreprocessRequest {
    description: Option<String>,
    images: Option<Vec<ImagePayload>>,
}

#[derive(Deserialize)]
struct ImagePayload {
    #[serde(default)]
    data: String,
    #[serde(default)]
    index: u32,
}

impl ImagePayload {
    fn decode(self) -> AppResult<NewImage> {
        let data = STANDARD
            .decode(self.data.trim())
            .map_err(|err| {
                AppError::BadRequest(format!("Invalid image data at index {}: {err}", self.index))
            })?;
        Ok(NewImage {
            index: self.index,
            data: ImageBlob::from(data),
        })
    }
}

#[derive(Deserialize)]
struct TextPromptRequest {
    text_prompt: Option<String>,
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let datasets = state.store.list().await?;
    Ok(Json(json!({
        "count": datasets.len(),
        "datasets": datasets,
    })))
}

/// Store the uploaded images as a new dataset and preprocess it before
/// answering. The dataset stays on disk when preprocessing fails.
pub async fn preprocess(State(state): State<AppState>, body: Bytes) -> AppResult<Json<Value>> {
    let request: PreprocessRequest = parse_body(&body)?;
    let (Some(description), Some(images)) = (request.description, request.images) else {
        return Err(AppError::BadRequest("Missing required fields".into()));
    };
    let images = images
        .into_iter()
        .map(ImagePayload::decode)
        .collect::<AppResult<Vec<_>>>()?;

    let metadata = state.store.create(&description, images).await?;
    let dataset_id = metadata.id;
    let reference_dir = state.store.reference_dir(&dataset_id)?;
    let output_dir = state.store.dataset_dir(&dataset_id)?;
    state
        .preprocessor
        .run(&reference_dir, &output_dir, &description)
        .await
        .map_err(|err| AppError::for_dataset(&dataset_id, err))?;

    Ok(Json(json!({
        "dataset_id": dataset_id,
        "description": description,
        "image_count": metadata.image_count,
        "status": "completed",
        "message": "Preprocessing completed successfully",
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DatasetMetadata>> {
    Ok(Json(state.store.get(&id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.store.delete(&id).await?;
    Ok(Json(json!({
        "message": format!("Dataset {id} deleted successfully"),
        "dataset_id": id,
    })))
}

pub async fn text_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let text_prompt = state.store.text_prompt(&id).await?;
    Ok(Json(json!({
        "dataset_id": id,
        "text_prompt": text_prompt,
    })))
}

pub async fn update_text_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let request: TextPromptRequest = parse_body(&body)?;
    let text_prompt = request
        .text_prompt
        .ok_or_else(|| AppError::BadRequest("Missing text_prompt field".into()))?;
    state.store.update_description(&id, &text_prompt).await?;
    Ok(Json(json!({
        "dataset_id": id,
        "text_prompt": text_prompt,
        "message": "Text prompt updated successfully",
    })))
}

pub async fn images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let images = state.store.list_images(&id).await?;
    Ok(Json(json!({
        "dataset_id": id,
        "reference_images": images.reference_images,
        "verification_images": images.verification_images,
    })))
}

pub async fn image(
    State(state): State<AppState>,
    Path((id, kind, filename)): Path<(String, String, String)>,
) -> AppResult<Response> {
    let kind: ImageKind = kind.parse()?;
    let path = state.store.image_path(&id, kind, &filename).await?;
    let content_type = if filename.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    };
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(supervisor::SupervisorError::from)?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

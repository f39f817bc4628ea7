use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use super::{created, ensure_matching_id, fetch_one, AppState};
use crate::error::{ApiError, ApiJson};
use crate::storage::{from_document, to_document, Document, Filter, Patch, Projection};
use crate::user_models::{FileMeta, FileRecord, FILES, FILE_CONTENT_FIELDS};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

fn metadata_projection() -> Projection {
    Projection::exclude(&FILE_CONTENT_FIELDS)
}

pub async fn list_files(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Document>>, ApiError> {
    let files = state
        .store
        .select_all(FILES, None, Some(&metadata_projection()))
        .await?;
    Ok(Json(files))
}

/// `POST /files`: a `json` part with the metadata and a `file` part with
/// the bytes.
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut meta: Option<FileMeta> = None;
    let mut upload: Option<(Vec<u8>, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "json" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid json part: {}", e)))?;
                let parsed = serde_json::from_str(&text)
                    .map_err(|e| ApiError::bad_request(format!("invalid file metadata: {}", e)))?;
                meta = Some(parsed);
            }
            "file" => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid file part: {}", e)))?;
                upload = Some((bytes.to_vec(), content_type));
            }
            other => tracing::debug!(part = other, "ignoring multipart field"),
        }
    }

    let meta = meta.ok_or_else(|| ApiError::bad_request("expected json content, none found"))?;
    let (data, part_type) =
        upload.ok_or_else(|| ApiError::bad_request("expected file content, none found"))?;
    if meta.id.trim().is_empty() {
        return Err(ApiError::bad_request("expected id, none found"));
    }
    if data.is_empty() {
        return Err(ApiError::bad_request("no file data"));
    }

    let file_type = meta
        .file_type
        .clone()
        .filter(|t| !t.is_empty())
        .or(part_type)
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let record = FileRecord::new(meta, file_type, &data);
    state.store.insert_one(FILES, to_document(&record)?).await?;

    tracing::info!(
        file_id = %record.id,
        file_type = %record.file_type,
        bytes = data.len(),
        "file stored"
    );
    Ok(created(&record.id))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let file = fetch_one(&state, FILES, &id, Some(&metadata_projection()), "file").await?;
    Ok(Json(file))
}

pub async fn update_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Document>,
) -> Result<Json<Document>, ApiError> {
    ensure_matching_id(&id, &body)?;
    state.store.update_one(FILES, &id, Patch::set(body)).await?;

    let file = fetch_one(&state, FILES, &id, Some(&metadata_projection()), "file").await?;
    Ok(Json(file))
}

/// Raw bytes, served inline so browsers can preview them.
pub async fn get_file_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record: FileRecord = from_document(fetch_one(&state, FILES, &id, None, "file").await?)?;
    let data = record
        .data()
        .map_err(|e| ApiError::Internal(format!("stored file {} is corrupt: {}", record.id, e)))?;

    let disposition = format!("inline; filename=\"{}\"", record.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, record.file_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

pub async fn get_file_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let projection = Projection::include(&["id", "file_text"]);
    let file = fetch_one(&state, FILES, &id, Some(&projection), "file").await?;
    let text = file.get("file_text").cloned().unwrap_or_else(|| json!(""));
    Ok(Json(json!({ "file_text": text })))
}

/// Files derived from `id`, e.g. its translated renditions.
pub async fn list_translations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    fetch_one(&state, FILES, &id, Some(&Projection::include(&["id"])), "file").await?;

    let filter = Filter::new().eq("file_from", id.as_str());
    let files = state
        .store
        .select_all(FILES, Some(&filter), Some(&metadata_projection()))
        .await?;
    Ok(Json(files))
}

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::error::{ApiError, ApiJson};
use crate::ml::{translate_segments, Segment, TranslatedSegment};

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub target_language: Option<String>,
}

/// `POST /extract_text`: OCR over a multipart `file` part. The MIME type is
/// the part's content type unless a `mime_type` field overrides it.
pub async fn extract_text(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<Segment>>, ApiError> {
    let mut data: Option<Vec<u8>> = None;
    let mut mime_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if mime_type.is_none() {
                    mime_type = field.content_type().map(str::to_string);
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid file part: {}", e)))?;
                data = Some(bytes.to_vec());
            }
            "mime_type" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid mime_type part: {}", e)))?;
                mime_type = Some(text.trim().to_string());
            }
            _ => {}
        }
    }

    let data = data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::bad_request("expected file content, none found"))?;
    let mime_type = mime_type
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("expected a file content type, none found"))?;

    let segments = state.extractor.extract(&data, &mime_type).await?;
    tracing::info!(%mime_type, bytes = data.len(), segments = segments.len(), "text extracted");
    Ok(Json(segments))
}

pub async fn translate_text(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<TranslateRequest>,
) -> Result<Json<Vec<TranslatedSegment>>, ApiError> {
    let target = payload
        .target_language
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.default_target_language.clone());

    let translated =
        translate_segments(state.translator.as_ref(), &payload.segments, &target).await?;
    tracing::info!(target_language = %target, segments = translated.len(), "segments translated");
    Ok(Json(translated))
}

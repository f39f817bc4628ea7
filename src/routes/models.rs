use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use super::{created, ensure_matching_id, fetch_one, AppState};
use crate::error::{ApiError, ApiJson};
use crate::models::{LangModel, MODELS};
use crate::storage::{to_document, Document, Patch};

pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.store.select_all(MODELS, None, None).await?))
}

pub async fn create_model(
    State(state): State<Arc<AppState>>,
    ApiJson(model): ApiJson<LangModel>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if model.id.trim().is_empty() {
        return Err(ApiError::bad_request("expected id, none found"));
    }
    if model.model_name.trim().is_empty() {
        return Err(ApiError::bad_request("expected model_name, none found"));
    }
    state.store.insert_one(MODELS, to_document(&model)?).await?;

    tracing::info!(model_id = %model.id, model_name = %model.model_name, "model registered");
    Ok(created(&model.id))
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(fetch_one(&state, MODELS, &id, None, "model").await?))
}

pub async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Document>,
) -> Result<Json<Document>, ApiError> {
    ensure_matching_id(&id, &body)?;
    state.store.update_one(MODELS, &id, Patch::set(body)).await?;
    Ok(Json(fetch_one(&state, MODELS, &id, None, "model").await?))
}

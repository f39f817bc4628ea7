//! HTTP surface: validation and response shaping in front of the store and
//! the ML adapters.

mod chats;
mod files;
mod ml;
mod models;
mod users;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::ml::{ChatCompleter, TextExtractor, Translator};
use crate::session::SessionStore;
use crate::storage::{Document, DocumentStore, Filter, Projection, ID_FIELD};
use crate::user_storage::UserStorage;

/// Uploads (files and OCR input) may be large scans.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub users: UserStorage,
    pub sessions: SessionStore,
    pub extractor: Arc<dyn TextExtractor>,
    pub translator: Arc<dyn Translator>,
    pub completer: Arc<dyn ChatCompleter>,
    /// Used when a chat's `lang_model` is not in the registry.
    pub default_model: String,
    pub default_target_language: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        translator: Arc<dyn Translator>,
        completer: Arc<dyn ChatCompleter>,
    ) -> Self {
        Self {
            users: UserStorage::new(store.clone()),
            store,
            sessions: SessionStore::new(),
            extractor,
            translator,
            completer,
            default_model: "gpt-3.5-turbo".to_string(),
            default_target_language: "en".to_string(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/:id", get(chats::get_chat).put(chats::update_chat))
        .route("/chats/:id/messages", post(chats::append_messages))
        .route("/chats/:id/query", post(chats::query_chat))
        .route("/files", get(files::list_files).post(files::create_file))
        .route("/files/:id", get(files::get_file).put(files::update_file))
        .route("/files/:id/data", get(files::get_file_data))
        .route("/files/:id/text", get(files::get_file_text))
        .route("/files/:id/translations", get(files::list_translations))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:id", get(users::get_user).put(users::update_user))
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/logout", post(users::logout))
        .route("/whoami", get(users::whoami))
        .route("/models", get(models::list_models).post(models::create_model))
        .route("/models/:id", get(models::get_model).put(models::update_model))
        .route("/extract_text", post(ml::extract_text))
        .route("/translate_text", post(ml::translate_text))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// The body of a `PUT /<resource>/{id}` must name the same record as the path.
pub(crate) fn ensure_matching_id(id: &str, body: &Document) -> Result<(), ApiError> {
    match body.get(ID_FIELD).and_then(Value::as_str) {
        Some(body_id) if body_id == id => Ok(()),
        _ => Err(ApiError::bad_request("mismatched ids")),
    }
}

pub(crate) fn created(id: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

/// One record by id, or a 404 naming the resource kind.
pub(crate) async fn fetch_one(
    state: &AppState,
    collection: &str,
    id: &str,
    projection: Option<&Projection>,
    kind: &str,
) -> Result<Document, ApiError> {
    state
        .store
        .select_one(collection, Some(&Filter::by_id(id)), projection)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind)))
}

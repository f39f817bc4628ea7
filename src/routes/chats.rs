use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::{created, ensure_matching_id, fetch_one, AppState};
use crate::error::{ApiError, ApiJson};
use crate::ml::prompts::{self, FALLBACK_REPLY, SYSTEM_PROMPT};
use crate::ml::PromptMessage;
use crate::models::{
    AppendMessagesRequest, Chat, ChatMessage, CreateChatRequest, LangModel, QueryRequest,
    QueryResponse, CHATS, MODELS,
};
use crate::storage::{from_document, to_document, Document, Filter, Patch, Projection};
use crate::user_models::FILES;

pub async fn list_chats(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.store.select_all(CHATS, None, None).await?))
}

pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateChatRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if payload.id.trim().is_empty() {
        return Err(ApiError::bad_request("expected id, none found"));
    }
    let chat = Chat::new(payload);
    state.store.insert_one(CHATS, to_document(&chat)?).await?;

    tracing::info!(chat_id = %chat.id, lang_model = %chat.lang_model, "chat created");
    Ok(created(&chat.id))
}

pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(fetch_one(&state, CHATS, &id, None, "chat").await?))
}

pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(mut body): ApiJson<Document>,
) -> Result<Json<Document>, ApiError> {
    ensure_matching_id(&id, &body)?;
    body.entry("updated_at")
        .or_insert_with(|| json!(Utc::now()));

    state.store.update_one(CHATS, &id, Patch::set(body)).await?;
    Ok(Json(fetch_one(&state, CHATS, &id, None, "chat").await?))
}

pub async fn append_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<AppendMessagesRequest>,
) -> Result<Json<Document>, ApiError> {
    let messages = payload.into_messages();
    if messages.is_empty() {
        return Err(ApiError::bad_request("expected messages, none found"));
    }
    push_messages(&state, &id, &messages).await?;
    Ok(Json(fetch_one(&state, CHATS, &id, None, "chat").await?))
}

/// Answers a message in the context of a chat and records both sides of
/// the exchange in its history.
pub async fn query_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("expected message, none found"));
    }
    let chat: Chat = from_document(fetch_one(&state, CHATS, &id, None, "chat").await?)?;

    let reply = match prompts::canned_reply(message) {
        Some(canned) => canned.to_string(),
        None => {
            let model = resolve_model(&state, &chat.lang_model).await?;
            let prompt = build_prompt(&state, &chat, message).await?;
            tracing::debug!(chat_id = %chat.id, %model, messages = prompt.len(), "querying model");

            let completion = state.completer.complete(&model, &prompt).await?;
            if completion.trim().is_empty() {
                FALLBACK_REPLY.to_string()
            } else {
                completion
            }
        }
    };

    let exchange = [
        ChatMessage::new(message.to_string(), true),
        ChatMessage::new(reply.clone(), false),
    ];
    push_messages(&state, &chat.id, &exchange).await?;

    Ok(Json(QueryResponse { response: reply }))
}

async fn push_messages(state: &AppState, id: &str, messages: &[ChatMessage]) -> Result<(), ApiError> {
    let items = messages
        .iter()
        .map(|m| serde_json::to_value(m).map_err(|e| ApiError::Internal(e.to_string())))
        .collect::<Result<Vec<Value>, ApiError>>()?;

    let mut patch = Patch::push("messages", items);
    patch
        .set
        .insert("updated_at".to_string(), json!(Utc::now()));
    state.store.update_one(CHATS, id, patch).await?;
    Ok(())
}

/// The registry entry named by the chat, or the configured default model.
async fn resolve_model(state: &AppState, lang_model: &str) -> Result<String, ApiError> {
    let entry = state
        .store
        .select_one(MODELS, Some(&Filter::by_id(lang_model)), None)
        .await?;
    match entry {
        Some(doc) => {
            let model: LangModel = from_document(doc)?;
            Ok(model.model_name)
        }
        None => {
            tracing::warn!(lang_model, default = %state.default_model, "unknown model, using default");
            Ok(state.default_model.clone())
        }
    }
}

async fn build_prompt(state: &AppState, chat: &Chat, message: &str) -> Result<Vec<PromptMessage>, ApiError> {
    let mut prompt = vec![PromptMessage::system(SYSTEM_PROMPT)];

    if !chat.file_group.is_empty() {
        let projection = Projection::include(&["id", "file_name", "file_text"]);
        let files = state
            .store
            .select_ids(FILES, &chat.file_group, None, Some(&projection))
            .await?;
        let documents: Vec<(String, String)> = files
            .iter()
            .map(|doc| (text_field(doc, "file_name"), text_field(doc, "file_text")))
            .collect();
        if let Some(context) = prompts::document_context(&documents) {
            prompt.push(PromptMessage::system(context));
        }
    }

    for past in &chat.messages {
        prompt.push(if past.is_user {
            PromptMessage::user(past.message.clone())
        } else {
            PromptMessage::assistant(past.message.clone())
        });
    }
    prompt.push(PromptMessage::user(message));
    Ok(prompt)
}

fn text_field(doc: &Document, field: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHATS: &str = "chats";
pub const MODELS: &str = "models";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(message: String, is_user: bool) -> Self {
        Self {
            message,
            is_user,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_group: Vec<String>,
    pub file_group: Vec<String>,
    pub lang_model: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Body of `POST /chats`. Timestamps default to now and `updated_by` to the creator.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub id: String,
    #[serde(default)]
    pub user_group: Vec<String>,
    #[serde(default)]
    pub file_group: Vec<String>,
    pub lang_model: String,
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Chat {
    pub fn new(request: CreateChatRequest) -> Self {
        let created_at = request.created_at.unwrap_or_else(Utc::now);
        Self {
            updated_at: request.updated_at.unwrap_or(created_at),
            updated_by: request
                .updated_by
                .unwrap_or_else(|| request.created_by.clone()),
            id: request.id,
            user_group: request.user_group,
            file_group: request.file_group,
            lang_model: request.lang_model,
            created_at,
            created_by: request.created_by,
            messages: Vec::new(),
        }
    }
}

/// Body of `POST /chats/{id}/messages`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppendMessagesRequest {
    Many { messages: Vec<ChatMessage> },
    One { message: ChatMessage },
}

impl AppendMessagesRequest {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            AppendMessagesRequest::Many { messages } => messages,
            AppendMessagesRequest::One { message } => vec![message],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
}

/// An entry of the language-model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangModel {
    pub id: String,
    pub model_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_chat_fills_audit_fields() {
        let request: CreateChatRequest = serde_json::from_value(json!({
            "id": "c1",
            "lang_model": "m1",
            "created_by": "u1"
        }))
        .unwrap();
        let chat = Chat::new(request);
        assert_eq!(chat.updated_by, "u1");
        assert_eq!(chat.updated_at, chat.created_at);
        assert!(chat.user_group.is_empty());
        assert!(chat.messages.is_empty());
    }

    #[test]
    fn append_request_accepts_one_or_many() {
        let one: AppendMessagesRequest = serde_json::from_value(json!({
            "message": {"message": "hi", "is_user": true, "timestamp": "2024-01-01T00:00:00Z"}
        }))
        .unwrap();
        assert_eq!(one.into_messages().len(), 1);

        let many: AppendMessagesRequest = serde_json::from_value(json!({
            "messages": [
                {"message": "a", "is_user": true, "timestamp": "2024-01-01T00:00:00Z"},
                {"message": "b", "is_user": false, "timestamp": "2024-01-01T00:00:01Z"}
            ]
        }))
        .unwrap();
        assert_eq!(many.into_messages().len(), 2);
    }
}

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const USERS: &str = "users";
pub const FILES: &str = "files";

/// Fields never returned by the file listing endpoints.
pub const FILE_CONTENT_FIELDS: [&str; 2] = ["file_data", "file_text"];

/// Stored user. `password` holds the bcrypt hash, never the plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password: String,
}

impl User {
    pub fn new(id: Option<String>, username: String, password_hash: String) -> Self {
        Self {
            id: id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            username,
            password: password_hash,
        }
    }
}

/// Body of `POST /users` and `POST /register`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
}

/// Metadata part of a `POST /files` upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default)]
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_from: Option<String>,
    #[serde(default)]
    pub file_text: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Stored file. The payload is kept base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_from: Option<String>,
    pub file_data: String,
    #[serde(default)]
    pub file_text: String,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl FileRecord {
    pub fn new(meta: FileMeta, file_type: String, data: &[u8]) -> Self {
        Self {
            id: meta.id,
            file_name: meta.file_name,
            file_type,
            file_from: meta.file_from.filter(|from| !from.is_empty()),
            file_data: BASE64.encode(data),
            file_text: meta.file_text.unwrap_or_default(),
            languages: meta.languages,
        }
    }

    pub fn data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.file_data)
    }
}

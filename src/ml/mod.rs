//! Adapters to external ML services: OCR, translation, chat completion.
//!
//! Each adapter is a thin client over one REST endpoint, exposed through a
//! trait so the HTTP layer can be exercised without network access.

pub mod openai;
pub mod prompts;
pub mod translate;
pub mod vision;

use std::path::Path;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiClient;
pub use translate::TranslateClient;
pub use vision::VisionClient;

#[derive(Debug, thiserror::Error)]
pub enum MlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unusable credentials: {0}")]
    Credentials(String),
}

/// One piece of text found by OCR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Polygon corners as `[x, y]`; pixels for images, page fractions for PDFs.
    #[serde(default)]
    pub bounding_box: Vec<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSegment {
    pub original_text: String,
    pub translated_text: String,
    pub bounding_box: Vec<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extracts text segments from an image (`image/*`) or a PDF.
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<Vec<Segment>, MlError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, MlError>;
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, model: &str, messages: &[PromptMessage]) -> Result<String, MlError>;
}

/// Translates every segment with one call each, keeping boxes and pages.
pub async fn translate_segments(
    translator: &dyn Translator,
    segments: &[Segment],
    target_language: &str,
) -> Result<Vec<TranslatedSegment>, MlError> {
    let mut translated = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = translator.translate(&segment.text, target_language).await?;
        translated.push(TranslatedSegment {
            original_text: segment.text.clone(),
            translated_text: text,
            bounding_box: segment.bounding_box.clone(),
            page: segment.page,
        });
    }
    Ok(translated)
}

/// Google Cloud credentials: an API key or an OAuth access token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// On-disk shape of a credentials file. `type` is only read to explain
/// why a Google-issued key file cannot be used as is.
#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl GoogleCredentials {
    /// Reads a JSON file holding `api_key` and/or `access_token`. Files
    /// with neither are rejected, including service-account key files,
    /// which would need an OAuth token exchange first.
    pub fn from_file(path: &Path) -> Result<Self, MlError> {
        let raw = std::fs::read_to_string(path)?;
        let file: CredentialsFile = serde_json::from_str(&raw).map_err(|e| {
            MlError::Parse(format!(
                "invalid credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let credentials = GoogleCredentials {
            api_key: file.api_key,
            access_token: file.access_token,
        };
        if credentials.is_configured() {
            return Ok(credentials);
        }
        let reason = match file.kind.as_deref() {
            Some("service_account") => format!(
                "{} is a service-account key; mint an access token (e.g. `gcloud auth print-access-token`) \
                 and store it as access_token, or set GOOGLE_API_KEY",
                path.display()
            ),
            Some(other) => format!(
                "{} has credential type {:?} but no api_key or access_token",
                path.display(),
                other
            ),
            None => format!("{} has no api_key or access_token", path.display()),
        };
        Err(MlError::Credentials(reason))
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
            || self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Attaches the bearer token, falling back to the `key` query parameter.
    pub(crate) fn authorize(
        &self,
        request: RequestBuilder,
        service: &'static str,
    ) -> Result<RequestBuilder, MlError> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(request.bearer_auth(token));
        }
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(request.query(&[("key", key)]));
        }
        Err(MlError::NotConfigured(service))
    }
}

//! Google Cloud Translation (v2, "basic") over REST.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GoogleCredentials, MlError, Translator};

pub const DEFAULT_TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

const SERVICE: &str = "Cloud Translation";

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslationList,
}

#[derive(Debug, Deserialize)]
struct TranslationList {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
    #[serde(default)]
    #[allow(dead_code)]
    detected_source_language: Option<String>,
}

fn first_translation(response: TranslateResponse) -> Result<String, MlError> {
    response
        .data
        .translations
        .into_iter()
        .next()
        .map(|t| t.translated_text)
        .ok_or_else(|| MlError::Parse("translation response had no translations".to_string()))
}

pub struct TranslateClient {
    http: Client,
    url: String,
    credentials: GoogleCredentials,
}

impl TranslateClient {
    pub fn new(http: Client, url: impl Into<String>, credentials: GoogleCredentials) -> Self {
        Self {
            http,
            url: url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl Translator for TranslateClient {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, MlError> {
        let body = json!({
            "q": text,
            "target": target_language,
            "format": "text"
        });
        let request = self.http.post(&self.url);
        let resp = self
            .credentials
            .authorize(request, SERVICE)?
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(MlError::Api {
                status,
                message: text,
            });
        }

        let data: TranslateResponse = resp.json().await?;
        first_translation(data)
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ml::openai::DEFAULT_OPENAI_URL;
use crate::ml::translate::DEFAULT_TRANSLATE_URL;
use crate::ml::vision::DEFAULT_VISION_URL;
use crate::ml::{GoogleCredentials, MlError};
use crate::storage::mongo::MongoSettings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Minutes a login stays valid.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

impl ServerConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes.saturating_mul(60))
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_session_ttl_minutes() -> u64 {
    24 * 60
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Mongodb,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
    /// Persistence file for the local backend; `None` keeps data in memory.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub manage_service: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            uri: default_uri(),
            database: default_database(),
            schema_dir: default_schema_dir(),
            data_file: None,
            manage_service: false,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn mongo_settings(&self) -> MongoSettings {
        MongoSettings {
            uri: self.uri.clone(),
            database: self.database.clone(),
            schema_dir: self.schema_dir.clone(),
            manage_service: self.manage_service,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

fn default_uri() -> String {
    "mongodb://localhost:27017/".to_string()
}
fn default_database() -> String {
    "samvad".to_string()
}
fn default_schema_dir() -> PathBuf {
    PathBuf::from("schemas")
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleConfig {
    /// JSON file with `api_key` or `access_token`.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vision_url")]
    pub vision_url: String,
    #[serde(default = "default_translate_url")]
    pub translate_url: String,
    #[serde(default = "default_target_language")]
    pub default_target_language: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            credentials_file: None,
            api_key: None,
            vision_url: default_vision_url(),
            translate_url: default_translate_url(),
            default_target_language: default_target_language(),
        }
    }
}

impl GoogleConfig {
    /// Credentials from the file (if any), with an inline `api_key` taking precedence.
    ///
    /// A file without usable credentials fails startup unless an inline key
    /// is set, in which case it is skipped with a warning.
    pub fn credentials(&self) -> Result<GoogleCredentials> {
        let inline_key = self.api_key.as_ref().filter(|k| !k.is_empty());
        let mut credentials = match &self.credentials_file {
            Some(path) => match GoogleCredentials::from_file(path) {
                Ok(credentials) => credentials,
                Err(MlError::Credentials(reason)) if inline_key.is_some() => {
                    tracing::warn!(%reason, "ignoring credentials file, using inline api_key");
                    GoogleCredentials::default()
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to read Google credentials: {}", path.display())
                    })
                }
            },
            None => GoogleCredentials::default(),
        };
        if let Some(key) = inline_key {
            credentials.api_key = Some(key.clone());
        }
        Ok(credentials)
    }
}

fn default_vision_url() -> String {
    DEFAULT_VISION_URL.to_string()
}
fn default_translate_url() -> String {
    DEFAULT_TRANSLATE_URL.to_string()
}
fn default_target_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_url(),
            model: default_model(),
        }
    }
}

fn default_openai_url() -> String {
    DEFAULT_OPENAI_URL.to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

impl Config {
    /// Reads `path` if given, otherwise starts from defaults; then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::parse(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overrides fields from environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup("MONGODB_URI") {
            self.store.uri = uri;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Some(key) = lookup("GOOGLE_API_KEY") {
            self.google.api_key = Some(key);
        }
        if let Some(path) = lookup("GOOGLE_APPLICATION_CREDENTIALS") {
            self.google.credentials_file = Some(PathBuf::from(path));
        }
    }
}

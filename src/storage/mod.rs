//! Generic collection access over a document database.
//!
//! Every resource (chats, files, users, models) goes through the same
//! [`DocumentStore`] operations, parametrized by collection name. Documents
//! are flat JSON objects keyed by an application-assigned `id` string.
//!
//! Two backends implement the trait:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | MongoDB | [`mongo`] | production, validators enforced by the server |
//! | Local JSON | [`local`] | development and tests, validators enforced in-process |

pub mod local;
pub mod mongo;
pub mod schema;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub use local::LocalStore;
pub use mongo::MongoStore;

/// A schema-less record as stored in a collection.
pub type Document = Map<String, Value>;

/// Collections that must exist (with validators) before the API serves traffic.
pub const REQUIRED_COLLECTIONS: [&str; 4] = ["chats", "files", "users", "models"];

/// Field every document is keyed by.
pub const ID_FIELD: &str = "id";

/// Internal identifier assigned by the database; never returned to callers.
pub const INTERNAL_ID_FIELD: &str = "_id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document has no 'id' field")]
    MissingId,
    #[error("document with id '{0}' already exists")]
    DuplicateId(String),
    #[error("document with id '{0}' not found")]
    NotFound(String),
    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),
    #[error("document rejected by validator: {0}")]
    Validation(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("database unreachable: {0}")]
    Unreachable(String),
    #[error("database error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Equality conditions on top-level fields, plus an optional `id` membership test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub eq: Vec<(String, Value)>,
    pub ids: Option<Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.eq.push((field.to_string(), value.into()));
        self
    }

    /// Restricts matches to documents whose `id` is one of `ids`.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let eq_ok = self
            .eq
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value));
        let ids_ok = match &self.ids {
            Some(ids) => doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .map(|id| ids.iter().any(|candidate| candidate == id))
                .unwrap_or(false),
            None => true,
        };
        eq_ok && ids_ok
    }
}

/// Field selection applied to query results.
///
/// The internal `_id` is dropped regardless of the projection chosen.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn exclude(fields: &[&str]) -> Self {
        Projection::Exclude(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn include(fields: &[&str]) -> Self {
        Projection::Include(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn apply(&self, doc: &Document) -> Document {
        let mut out: Document = match self {
            Projection::All => doc.clone(),
            Projection::Include(fields) => doc
                .iter()
                .filter(|(key, _)| fields.iter().any(|f| f == *key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Projection::Exclude(fields) => doc
                .iter()
                .filter(|(key, _)| !fields.iter().any(|f| f == *key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        out.remove(INTERNAL_ID_FIELD);
        out
    }
}

/// Field-level merge applied by `update_*`.
///
/// `set` replaces top-level fields; `push` appends items to array fields,
/// creating the array if the field is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub set: Document,
    pub push: Vec<(String, Vec<Value>)>,
}

impl Patch {
    pub fn set(fields: Document) -> Self {
        Self {
            set: fields,
            push: Vec::new(),
        }
    }

    pub fn push(field: &str, items: Vec<Value>) -> Self {
        Self {
            set: Document::new(),
            push: vec![(field.to_string(), items)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.iter().all(|(_, items)| items.is_empty())
    }

    /// Applies the patch to an in-memory document.
    pub fn apply_to(&self, doc: &mut Document) -> Result<(), StoreError> {
        if let Some(new_id) = self.set.get(ID_FIELD) {
            if doc.get(ID_FIELD) != Some(new_id) {
                return Err(StoreError::Validation("'id' cannot be changed".to_string()));
            }
        }
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for (field, items) in &self.push {
            let slot = doc
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(existing) => existing.extend(items.iter().cloned()),
                _ => {
                    return Err(StoreError::Validation(format!(
                        "field '{}' is not an array",
                        field
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Serializes a typed record into a storable document.
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Validation(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Deserializes a stored document into a typed record.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Returns the `id` of a document, if it has a string one.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Generic collection CRUD shared by every backend.
///
/// No operation spans more than one document transactionally; batch
/// operations check ids up front and then write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Verifies the connection and creates missing required collections.
    async fn start(&self) -> Result<(), StoreError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), StoreError>;

    /// All matching documents; empty when the collection does not exist.
    async fn select_all(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn insert_all(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError>;

    async fn update_all(
        &self,
        collection: &str,
        ids: &[String],
        patches: Vec<Patch>,
    ) -> Result<(), StoreError>;

    async fn select_one(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .select_all(collection, filter, projection)
            .await?
            .into_iter()
            .next())
    }

    /// Documents whose `id` is in `ids` and that also match `filter`.
    async fn select_ids(
        &self,
        collection: &str,
        ids: &[String],
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError> {
        let filter = filter
            .cloned()
            .unwrap_or_default()
            .ids(ids.iter().cloned());
        self.select_all(collection, Some(&filter), projection).await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        self.insert_all(collection, vec![doc]).await
    }

    async fn update_one(&self, collection: &str, id: &str, patch: Patch) -> Result<(), StoreError> {
        self.update_all(collection, &[id.to_string()], vec![patch])
            .await
    }
}

/// Collects the ids of a batch, rejecting missing and repeated ones.
pub(crate) fn batch_ids(docs: &[Document]) -> Result<Vec<String>, StoreError> {
    let mut ids: Vec<String> = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = document_id(doc).ok_or(StoreError::MissingId)?;
        if id.is_empty() {
            return Err(StoreError::MissingId);
        }
        if ids.iter().any(|seen| seen == id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

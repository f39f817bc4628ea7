use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::schema;
use super::{
    batch_ids, document_id, Document, DocumentStore, Filter, Patch, Projection, StoreError,
    REQUIRED_COLLECTIONS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalCollection {
    #[serde(default)]
    validator: Option<Value>,
    #[serde(default)]
    records: Vec<Document>,
}

/// In-process document store, optionally persisted to a JSON file.
///
/// The whole data set is rewritten to disk after every successful write.
pub struct LocalStore {
    collections: RwLock<HashMap<String, LocalCollection>>,
    data_file: Option<PathBuf>,
    schema_dir: PathBuf,
}

impl LocalStore {
    /// Opens a store, loading `data_file` when it exists.
    pub fn open(data_file: Option<PathBuf>, schema_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let collections = match &data_file {
            Some(path) if path.exists() => {
                let data = fs::read_to_string(path)?;
                serde_json::from_str(&data)?
            }
            _ => HashMap::new(),
        };

        Ok(Self {
            collections: RwLock::new(collections),
            data_file,
            schema_dir: schema_dir.into(),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_file: None,
            schema_dir: schema_dir.into(),
        }
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }

    fn save_to_disk(&self, collections: &HashMap<String, LocalCollection>) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(collections)?;
        write_atomic(path, &json)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn validate_against(collection: &LocalCollection, doc: &Document) -> Result<(), StoreError> {
    match &collection.validator {
        Some(validator) => schema::validate(validator, doc),
        None => Ok(()),
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn start(&self) -> Result<(), StoreError> {
        tracing::info!("database: verifying local store structure");
        let mut collections = self.collections.write().await;

        let mut created = false;
        for name in REQUIRED_COLLECTIONS {
            if collections.contains_key(name) {
                continue;
            }
            tracing::info!(collection = name, "database: required collection not found, creating it");
            let validator = schema::load_validator(&self.schema_dir, name)?;
            collections.insert(
                name.to_string(),
                LocalCollection {
                    validator: Some(validator),
                    records: Vec::new(),
                },
            );
            created = true;
        }

        if created {
            self.save_to_disk(&collections)?;
        }
        tracing::info!("database: local store ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let collections = self.collections.read().await;
        self.save_to_disk(&collections)
    }

    async fn select_all(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let projection = projection.cloned().unwrap_or_default();
        Ok(coll
            .records
            .iter()
            .filter(|doc| filter.map(|f| f.matches(doc)).unwrap_or(true))
            .map(|doc| projection.apply(doc))
            .collect())
    }

    async fn insert_all(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let ids = batch_ids(&docs)?;
        if let Some(existing) = coll
            .records
            .iter()
            .filter_map(document_id)
            .find(|id| ids.iter().any(|new_id| new_id.as_str() == *id))
        {
            return Err(StoreError::DuplicateId(existing.to_string()));
        }
        for doc in &docs {
            validate_against(coll, doc)?;
        }

        coll.records.extend(docs);
        self.save_to_disk(&collections)
    }

    async fn update_all(
        &self,
        collection: &str,
        ids: &[String],
        patches: Vec<Patch>,
    ) -> Result<(), StoreError> {
        if ids.len() != patches.len() {
            return Err(StoreError::Backend(format!(
                "{} ids but {} patches",
                ids.len(),
                patches.len()
            )));
        }

        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        // Every target must exist and every patched result must validate
        // before anything is written.
        let mut staged: Vec<(usize, Document)> = Vec::with_capacity(ids.len());
        for (id, patch) in ids.iter().zip(&patches) {
            let index = coll
                .records
                .iter()
                .position(|doc| document_id(doc) == Some(id.as_str()))
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let mut updated = match staged.iter().find(|(i, _)| *i == index) {
                Some((_, doc)) => doc.clone(),
                None => coll.records[index].clone(),
            };
            patch.apply_to(&mut updated)?;
            validate_against(coll, &updated)?;
            staged.retain(|(i, _)| *i != index);
            staged.push((index, updated));
        }

        for (index, doc) in staged {
            coll.records[index] = doc;
        }
        self.save_to_disk(&collections)
    }
}

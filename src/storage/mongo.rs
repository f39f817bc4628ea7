use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, CreateCollectionOptions, FindOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};
use serde_json::Value;

use super::schema;
use super::{
    batch_ids, Document, DocumentStore, Filter, Patch, Projection, StoreError, ID_FIELD,
    INTERNAL_ID_FIELD, REQUIRED_COLLECTIONS,
};
use crate::service::{self, ServiceAction};

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        match *err.kind {
            ErrorKind::Write(_) | ErrorKind::BulkWrite(_) => StoreError::Validation(err.to_string()),
            ErrorKind::ServerSelection { .. } => StoreError::Unreachable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Backend(format!("bson encoding failed: {}", err))
    }
}

/// Server error code for a unique-index violation.
const DUPLICATE_KEY: i32 = 11000;

/// Position in the batch of the first document that hit a unique index.
fn duplicate_key_index(err: &mongodb::error::Error) -> Option<usize> {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => Some(0),
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()?
            .iter()
            .find(|e| e.code == DUPLICATE_KEY)
            .map(|e| e.index),
        _ => None,
    }
}

/// Unique index that makes the server the final arbiter of id clashes.
fn id_index() -> IndexModel {
    let options = IndexOptions::builder()
        .unique(true)
        .name("id_unique".to_string())
        .build();
    IndexModel::builder()
        .keys(doc! { ID_FIELD: 1 })
        .options(options)
        .build()
}

#[derive(Debug, Clone)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
    pub schema_dir: PathBuf,
    pub manage_service: bool,
    pub connect_timeout: Duration,
}

/// [`DocumentStore`] over a MongoDB database.
///
/// Collections are created with the `$jsonSchema` validators from
/// `schema_dir`, so write validation happens on the server.
pub struct MongoStore {
    client: Client,
    db: Database,
    settings: MongoSettings,
}

impl MongoStore {
    /// Builds the client. No connection is made until the first operation.
    pub async fn connect(settings: MongoSettings) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&settings.uri).await?;
        options.app_name = Some("samvad".to_string());
        options.server_selection_timeout = Some(settings.connect_timeout);
        options.connect_timeout = Some(settings.connect_timeout);

        let client = Client::with_options(options)?;
        let db = client.database(&settings.database);
        Ok(Self {
            client,
            db,
            settings,
        })
    }

    async fn connectable(&self) -> bool {
        match self.db.run_command(doc! { "ping": 1 }, None).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "database: ping failed");
                false
            }
        }
    }

    async fn has_collection(&self, collection: &str) -> Result<bool, StoreError> {
        let names = self.db.list_collection_names(None).await?;
        Ok(names.iter().any(|name| name == collection))
    }
}

fn to_bson_document(doc: &Document) -> Result<bson::Document, StoreError> {
    Ok(bson::to_document(doc)?)
}

fn from_bson_document(doc: bson::Document) -> Document {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn filter_document(filter: Option<&Filter>) -> Result<bson::Document, StoreError> {
    let mut out = bson::Document::new();
    let Some(filter) = filter else {
        return Ok(out);
    };
    for (field, value) in &filter.eq {
        out.insert(field.clone(), bson::to_bson(value)?);
    }
    if let Some(ids) = &filter.ids {
        let membership = doc! { "$in": ids.clone() };
        // Combine with an equality on `id` if one was also given.
        if let Some(existing) = out.remove(ID_FIELD) {
            out.insert(
                "$and",
                vec![doc! { ID_FIELD: existing }, doc! { ID_FIELD: membership }],
            );
        } else {
            out.insert(ID_FIELD, membership);
        }
    }
    Ok(out)
}

fn projection_document(projection: Option<&Projection>) -> bson::Document {
    let mut out = bson::Document::new();
    match projection {
        Some(Projection::Include(fields)) => {
            for field in fields.iter().filter(|f| f.as_str() != INTERNAL_ID_FIELD) {
                out.insert(field.clone(), 1);
            }
        }
        Some(Projection::Exclude(fields)) => {
            for field in fields {
                out.insert(field.clone(), 0);
            }
        }
        Some(Projection::All) | None => {}
    }
    out.insert(INTERNAL_ID_FIELD, 0);
    out
}

/// Checks every patch and builds its update before anything is written, so
/// a bad patch late in the batch cannot leave earlier ones applied.
fn prepare_updates(
    ids: &[String],
    patches: &[Patch],
) -> Result<Vec<(String, bson::Document)>, StoreError> {
    if ids.len() != patches.len() {
        return Err(StoreError::Backend(format!(
            "{} ids but {} patches",
            ids.len(),
            patches.len()
        )));
    }
    let mut updates = Vec::with_capacity(ids.len());
    for (id, patch) in ids.iter().zip(patches) {
        if let Some(new_id) = patch.set.get(ID_FIELD) {
            if new_id.as_str() != Some(id.as_str()) {
                return Err(StoreError::Validation("'id' cannot be changed".to_string()));
            }
        }
        let update = update_document(patch)?;
        if !update.is_empty() {
            updates.push((id.clone(), update));
        }
    }
    Ok(updates)
}

fn update_document(patch: &Patch) -> Result<bson::Document, StoreError> {
    let mut update = bson::Document::new();
    if !patch.set.is_empty() {
        update.insert("$set", to_bson_document(&patch.set)?);
    }
    let mut push = bson::Document::new();
    for (field, items) in patch.push.iter().filter(|(_, items)| !items.is_empty()) {
        let items = items
            .iter()
            .map(bson::to_bson)
            .collect::<Result<Vec<_>, _>>()?;
        push.insert(field.clone(), doc! { "$each": items });
    }
    if !push.is_empty() {
        update.insert("$push", push);
    }
    Ok(update)
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn start(&self) -> Result<(), StoreError> {
        tracing::info!("database: starting...");
        tracing::info!("database: checking for viable database connection");

        if !self.connectable().await {
            tracing::warn!("database: database connection NOT viable");
            if !self.settings.manage_service {
                return Err(StoreError::Unreachable(format!(
                    "no database reachable at {}",
                    self.settings.uri
                )));
            }
            tracing::info!("database: attempting to start the database service");
            service::run(ServiceAction::Start).await?;
            if !self.connectable().await {
                return Err(StoreError::Unreachable(format!(
                    "database still unreachable at {} after starting the service",
                    self.settings.uri
                )));
            }
        }

        tracing::info!("database: verifying database structure");
        let existing = self.db.list_collection_names(None).await?;
        for name in REQUIRED_COLLECTIONS {
            if existing.iter().any(|e| e == name) {
                continue;
            }
            tracing::info!(collection = name, "database: required collection not found, creating it");
            let validator = schema::load_validator(&self.settings.schema_dir, name)?;
            let mut options = CreateCollectionOptions::default();
            options.validator = Some(doc! { "$jsonSchema": bson::to_bson(&validator)? });
            self.db.create_collection(name, options).await?;
        }
        for name in REQUIRED_COLLECTIONS {
            self.db
                .collection::<bson::Document>(name)
                .create_index(id_index(), None)
                .await?;
        }

        tracing::info!("database: complete");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        tracing::info!("cleanup: closing database client");
        self.client.clone().shutdown().await;

        if self.settings.manage_service {
            service::run(ServiceAction::Stop).await?;
        }
        tracing::info!("cleanup: complete");
        Ok(())
    }

    async fn select_all(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError> {
        if !self.has_collection(collection).await? {
            return Ok(Vec::new());
        }

        let mut options = FindOptions::default();
        options.projection = Some(projection_document(projection));

        let cursor = self
            .db
            .collection::<bson::Document>(collection)
            .find(filter_document(filter)?, options)
            .await?;
        let docs: Vec<bson::Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(from_bson_document).collect())
    }

    async fn insert_all(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
        if !self.has_collection(collection).await? {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }

        let ids = batch_ids(&docs)?;
        let existing = self
            .select_ids(collection, &ids, None, Some(&Projection::include(&[ID_FIELD])))
            .await?;
        if let Some(dup) = existing.first().and_then(super::document_id) {
            return Err(StoreError::DuplicateId(dup.to_string()));
        }

        let docs = docs
            .iter()
            .map(to_bson_document)
            .collect::<Result<Vec<_>, _>>()?;
        self.db
            .collection::<bson::Document>(collection)
            .insert_many(docs, None)
            .await
            .map_err(|e| match duplicate_key_index(&e) {
                Some(i) => StoreError::DuplicateId(ids.get(i).cloned().unwrap_or_default()),
                None => e.into(),
            })?;
        Ok(())
    }

    async fn update_all(
        &self,
        collection: &str,
        ids: &[String],
        patches: Vec<Patch>,
    ) -> Result<(), StoreError> {
        let updates = prepare_updates(ids, &patches)?;
        if !self.has_collection(collection).await? {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }

        let found = self
            .select_ids(collection, ids, None, Some(&Projection::include(&[ID_FIELD])))
            .await?;
        if let Some(missing) = ids.iter().find(|id| {
            !found
                .iter()
                .any(|doc| super::document_id(doc) == Some(id.as_str()))
        }) {
            return Err(StoreError::NotFound(missing.clone()));
        }

        let coll = self.db.collection::<bson::Document>(collection);
        for (id, update) in updates {
            coll.update_one(doc! { ID_FIELD: id.as_str() }, update, None)
                .await?;
        }
        Ok(())
    }
}

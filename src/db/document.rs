//! MongoDB backend.

use crate::db::adapter::{BackendAdapter, ClientHandle};
use crate::db::bson_json::{bson_to_json, bson_type_name, document_to_json};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, MongoDescriptor, APPLICATION_NAME};
use bson::{Bson, Document, doc};
use futures_util::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tracing::info;

/// Documents returned by `find` when the caller does not say.
pub const DEFAULT_FIND_LIMIT: i64 = 10;
/// Documents sampled for schema inference.
pub const DEFAULT_SCHEMA_SAMPLE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    /// Types seen, most frequent first.
    pub types: Vec<String>,
    pub primary_type: String,
    pub type_distribution: BTreeMap<String, u64>,
    /// Share of sampled documents that contain the field, in [0, 1].
    pub frequency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionSchema {
    pub schema: BTreeMap<String, FieldSchema>,
    pub sample_size: u64,
    pub total_documents: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub matched_count: u64,
    pub modified_count: u64,
}

pub struct MongoBackend {
    descriptor: MongoDescriptor,
    client: ClientHandle<Client>,
}

impl MongoBackend {
    pub fn new(descriptor: MongoDescriptor) -> Self {
        Self {
            descriptor,
            client: ClientHandle::new(BackendKind::MongoDb),
        }
    }

    /// The named database, falling back to `MONGODB_DB`.
    pub fn resolve_database(&self, database: Option<&str>) -> DbResult<String> {
        match database.map(str::trim).filter(|d| !d.is_empty()) {
            Some(name) => Ok(name.to_string()),
            None => self.descriptor.database.clone().ok_or_else(|| {
                DbError::invalid_argument(
                    "database is required because MONGODB_DB is not configured",
                )
            }),
        }
    }

    async fn collection(&self, database: &str, collection: &str) -> DbResult<Collection<Document>> {
        let client = self.client.get().await?;
        Ok(client.database(database).collection::<Document>(collection))
    }

    /// Fail with NotFound unless `collection` exists in `database`.
    async fn require_collection(&self, database: &str, collection: &str) -> DbResult<()> {
        let available = self.list_collections(database).await?;
        if available.iter().any(|c| c == collection) {
            Ok(())
        } else {
            Err(DbError::not_found("Collection", collection, available))
        }
    }

    pub async fn server_info(&self) -> DbResult<JsonValue> {
        let client = self.client.get().await?;
        let info = client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await?;
        Ok(json!({
            "version": field(&info, "version"),
            "gitVersion": field(&info, "gitVersion"),
            "platform": field(&info, "platform"),
            "maxBsonObjectSize": field(&info, "maxBsonObjectSize"),
        }))
    }

    pub async fn list_databases(&self) -> DbResult<Vec<String>> {
        let client = self.client.get().await?;
        let mut names = client.list_database_names().await?;
        names.sort();
        Ok(names)
    }

    /// `dbStats` subset.
    pub async fn database_info(&self, database: &str) -> DbResult<JsonValue> {
        let client = self.client.get().await?;
        let stats = client
            .database(database)
            .run_command(doc! { "dbStats": 1 })
            .await?;
        Ok(json!({
            "name": database,
            "collections": field_or_zero(&stats, "collections"),
            "objects": field_or_zero(&stats, "objects"),
            "dataSize": field_or_zero(&stats, "dataSize"),
            "dataSizeFormatted": size_label(&stats, "dataSize"),
            "storageSize": field_or_zero(&stats, "storageSize"),
            "storageSizeFormatted": size_label(&stats, "storageSize"),
            "indexes": field_or_zero(&stats, "indexes"),
            "indexSize": field_or_zero(&stats, "indexSize"),
        }))
    }

    pub async fn list_collections(&self, database: &str) -> DbResult<Vec<String>> {
        let client = self.client.get().await?;
        let mut names = client.database(database).list_collection_names().await?;
        names.sort();
        Ok(names)
    }

    /// `collStats` subset plus index names.
    pub async fn collection_info(&self, database: &str, collection: &str) -> DbResult<JsonValue> {
        self.require_collection(database, collection).await?;
        let client = self.client.get().await?;
        let stats = client
            .database(database)
            .run_command(doc! { "collStats": collection })
            .await?;
        let indexes = client
            .database(database)
            .collection::<Document>(collection)
            .list_index_names()
            .await?;
        Ok(json!({
            "name": collection,
            "count": field_or_zero(&stats, "count"),
            "size": field_or_zero(&stats, "size"),
            "sizeFormatted": size_label(&stats, "size"),
            "storageSize": field_or_zero(&stats, "storageSize"),
            "avgObjSize": field_or_zero(&stats, "avgObjSize"),
            "indexes": indexes,
        }))
    }

    /// Infer field types from a `$sample` of the collection.
    pub async fn collection_schema(
        &self,
        database: &str,
        collection: &str,
        sample_size: i64,
    ) -> DbResult<CollectionSchema> {
        if sample_size <= 0 {
            return Err(DbError::invalid_argument("sample_size must be positive"));
        }
        let coll = self.collection(database, collection).await?;
        let sample: Vec<Document> = coll
            .aggregate(vec![doc! { "$sample": { "size": sample_size } }])
            .await?
            .try_collect()
            .await?;
        let total_documents = coll.count_documents(doc! {}).await?;

        Ok(CollectionSchema {
            schema: infer_schema(&sample),
            sample_size: sample.len() as u64,
            total_documents,
        })
    }

    pub async fn find_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        limit: i64,
    ) -> DbResult<Vec<JsonValue>> {
        let coll = self.collection(database, collection).await?;
        let documents: Vec<Document> = coll.find(filter).limit(limit).await?.try_collect().await?;
        Ok(documents.into_iter().map(document_to_json).collect())
    }

    pub async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DbResult<Vec<JsonValue>> {
        let coll = self.collection(database, collection).await?;
        let documents: Vec<Document> = coll.aggregate(pipeline).await?.try_collect().await?;
        Ok(documents.into_iter().map(document_to_json).collect())
    }

    /// Returns the inserted `_id`.
    pub async fn insert_document(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DbResult<JsonValue> {
        let coll = self.collection(database, collection).await?;
        let result = coll.insert_one(document).await?;
        Ok(bson_to_json(result.inserted_id))
    }

    pub async fn update_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbResult<UpdateSummary> {
        let coll = self.collection(database, collection).await?;
        let result = coll.update_many(filter, update).await?;
        Ok(UpdateSummary {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    /// Number of deleted documents.
    pub async fn delete_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> DbResult<u64> {
        let coll = self.collection(database, collection).await?;
        Ok(coll.delete_many(filter).await?.deleted_count)
    }

    pub async fn create_collection(&self, database: &str, collection: &str) -> DbResult<()> {
        let client = self.client.get().await?;
        client.database(database).create_collection(collection).await?;
        info!(database = %database, collection = %collection, "Collection created");
        Ok(())
    }
}

impl BackendAdapter for MongoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn target(&self) -> String {
        self.descriptor.display_url()
    }

    async fn connect(&self) -> DbResult<()> {
        let mut options = ClientOptions::parse(self.descriptor.connection_string()?).await?;
        options.app_name = Some(APPLICATION_NAME.to_string());
        options.max_pool_size = self.descriptor.max_pool_size;
        options.connect_timeout = Some(self.descriptor.connect_timeout);
        options.server_selection_timeout = Some(self.descriptor.connect_timeout);

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        if let Some(previous) = self.client.set(client).await {
            previous.shutdown().await;
        }
        info!(url = %self.descriptor.display_url(), "Connected to MongoDB");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if let Some(client) = self.client.take().await {
            client.shutdown().await;
            info!("Disconnected from MongoDB");
        }
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        let client = self.client.get().await?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

fn field(doc: &Document, key: &str) -> JsonValue {
    doc.get(key)
        .cloned()
        .map(bson_to_json)
        .unwrap_or(JsonValue::Null)
}

fn field_or_zero(doc: &Document, key: &str) -> JsonValue {
    doc.get(key)
        .cloned()
        .map(bson_to_json)
        .unwrap_or_else(|| JsonValue::from(0))
}

/// Byte counts rendered 1024-based, e.g. "1.50 MB". Stats report sizes as
/// int32, int64 or double depending on magnitude.
fn size_label(doc: &Document, key: &str) -> JsonValue {
    let bytes = match doc.get(key) {
        Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
        Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
        Some(Bson::Double(f)) if *f >= 0.0 => Some(*f as u64),
        _ => None,
    };
    bytes
        .map(|b| JsonValue::String(humansize::format_size(b, humansize::WINDOWS)))
        .unwrap_or(JsonValue::Null)
}

/// Per-field type statistics over `sample`.
///
/// `frequency` counts each document once per field, so a field present in
/// every sampled document scores exactly 1.0.
pub fn infer_schema(sample: &[Document]) -> BTreeMap<String, FieldSchema> {
    let mut observed: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for document in sample {
        for (key, value) in document {
            *observed
                .entry(key.clone())
                .or_default()
                .entry(bson_type_name(value).to_string())
                .or_default() += 1;
        }
    }

    let sampled = sample.len() as f64;
    observed
        .into_iter()
        .map(|(key, distribution)| {
            let mut types: Vec<(String, u64)> = distribution
                .iter()
                .map(|(name, count)| (name.clone(), *count))
                .collect();
            // Most frequent first, ties by name
            types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let present: u64 = distribution.values().sum();
            let schema = FieldSchema {
                primary_type: types[0].0.clone(),
                types: types.into_iter().map(|(name, _)| name).collect(),
                type_distribution: distribution,
                frequency: if sampled > 0.0 {
                    present as f64 / sampled
                } else {
                    0.0
                },
            };
            (key, schema)
        })
        .collect()
}

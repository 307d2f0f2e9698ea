//! MongoDB tools.
//!
//! Filters, documents, updates and pipelines arrive as JSON strings and are
//! parsed before the backend is touched.

use crate::context::AppContext;
use crate::db::bson_json::{parse_document, parse_pipeline};
use crate::db::document::{DEFAULT_FIND_LIMIT, DEFAULT_SCHEMA_SAMPLE};
use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use crate::tools::dispatch::{Call, dispatch_with};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

fn empty_filter() -> String {
    "{}".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DatabaseInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CollectionInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SchemaInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// Documents to sample. Default: 100
    #[serde(default)]
    pub sample_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FindInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// JSON filter, e.g. {"status": "active"}. Default: {}
    #[serde(default = "empty_filter")]
    pub filter: String,
    /// Maximum documents. Default: 10
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AggregateInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// JSON array of pipeline stages
    pub pipeline: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// JSON document to insert
    pub document: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// JSON filter selecting the documents
    pub filter: String,
    /// JSON update, e.g. {"$set": {"status": "done"}}
    pub update: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteInput {
    /// Database name. Default: MONGODB_DB
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    /// JSON filter selecting the documents
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentsOutput {
    pub count: usize,
    pub documents: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct InsertedOutput {
    pub inserted_id: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct DeletedOutput {
    pub deleted_count: u64,
}

#[derive(Debug, Serialize)]
pub struct CreatedOutput {
    pub created: String,
}

impl From<Vec<JsonValue>> for DocumentsOutput {
    fn from(documents: Vec<JsonValue>) -> Self {
        Self {
            count: documents.len(),
            documents,
        }
    }
}

pub struct MongoTools {
    context: Arc<AppContext>,
}

impl MongoTools {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    fn database(&self, requested: Option<&str>) -> DbResult<String> {
        match self.context.mongodb.get() {
            Some(mongo) => mongo.resolve_database(requested),
            None => Ok(requested.unwrap_or_default().to_string()),
        }
    }

    /// Target is `db` or `db.collection`.
    fn call(
        operation: &'static str,
        database: &DbResult<String>,
        collection: Option<&str>,
    ) -> Call {
        let call = Call::new(BackendKind::MongoDb, operation);
        match (database, collection) {
            (Ok(db), Some(coll)) => call.target(format!("{}.{}", db, coll)),
            (Ok(db), None) if !db.is_empty() => call.target(db),
            _ => call,
        }
    }

    fn timeout(&self) -> std::time::Duration {
        self.context.operation_timeout()
    }

    pub async fn server_info(&self) -> String {
        dispatch_with(
            &self.context.mongodb,
            Call::new(BackendKind::MongoDb, "server_info"),
            self.timeout(),
            Ok(()),
            |mongo, ()| async move { mongo.server_info().await },
        )
        .await
    }

    pub async fn list_databases(&self) -> String {
        dispatch_with(
            &self.context.mongodb,
            Call::new(BackendKind::MongoDb, "list_databases"),
            self.timeout(),
            Ok(()),
            |mongo, ()| async move { mongo.list_databases().await },
        )
        .await
    }

    pub async fn database_info(&self, input: DatabaseInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("database_info", &database, None);
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            database,
            |mongo, db| async move { mongo.database_info(&db).await },
        )
        .await
    }

    pub async fn list_collections(&self, input: DatabaseInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("list_collections", &database, None);
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            database,
            |mongo, db| async move { mongo.list_collections(&db).await },
        )
        .await
    }

    pub async fn collection_info(&self, input: CollectionInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("collection_info", &database, Some(&input.collection));
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            database,
            |mongo, db| async move { mongo.collection_info(&db, &collection).await },
        )
        .await
    }

    pub async fn collection_schema(&self, input: SchemaInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("collection_schema", &database, Some(&input.collection));
        let collection = input.collection;
        let sample_size = input.sample_size.unwrap_or(DEFAULT_SCHEMA_SAMPLE);
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            database,
            |mongo, db| async move {
                mongo
                    .collection_schema(&db, &collection, sample_size)
                    .await
            },
        )
        .await
    }

    pub async fn find_documents(&self, input: FindInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("find_documents", &database, Some(&input.collection));
        let limit = input.limit.unwrap_or(DEFAULT_FIND_LIMIT);
        let args = database.and_then(|db| {
            if limit <= 0 {
                return Err(DbError::invalid_argument("limit must be positive"));
            }
            Ok((db, parse_document(&input.filter, "filter")?))
        });
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            args,
            |mongo, (db, filter)| async move {
                let documents = mongo
                    .find_documents(&db, &collection, filter, limit)
                    .await?;
                Ok(DocumentsOutput::from(documents))
            },
        )
        .await
    }

    pub async fn aggregate(&self, input: AggregateInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("aggregate", &database, Some(&input.collection));
        let args = database.and_then(|db| Ok((db, parse_pipeline(&input.pipeline)?)));
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            args,
            |mongo, (db, pipeline)| async move {
                let documents = mongo.aggregate(&db, &collection, pipeline).await?;
                Ok(DocumentsOutput::from(documents))
            },
        )
        .await
    }

    pub async fn insert_document(&self, input: InsertInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("insert_document", &database, Some(&input.collection));
        let args = database.and_then(|db| Ok((db, parse_document(&input.document, "document")?)));
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            args,
            |mongo, (db, document)| async move {
                let inserted_id = mongo.insert_document(&db, &collection, document).await?;
                Ok(InsertedOutput { inserted_id })
            },
        )
        .await
    }

    pub async fn update_documents(&self, input: UpdateInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("update_documents", &database, Some(&input.collection));
        let args = database.and_then(|db| {
            let filter = parse_document(&input.filter, "filter")?;
            let update = parse_document(&input.update, "update")?;
            Ok((db, filter, update))
        });
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            args,
            |mongo, (db, filter, update)| async move {
                mongo
                    .update_documents(&db, &collection, filter, update)
                    .await
            },
        )
        .await
    }

    pub async fn delete_documents(&self, input: DeleteInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("delete_documents", &database, Some(&input.collection));
        let args = database.and_then(|db| Ok((db, parse_document(&input.filter, "filter")?)));
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            args,
            |mongo, (db, filter)| async move {
                let deleted_count = mongo.delete_documents(&db, &collection, filter).await?;
                Ok(DeletedOutput { deleted_count })
            },
        )
        .await
    }

    pub async fn create_collection(&self, input: CollectionInput) -> String {
        let database = self.database(input.database.as_deref());
        let call = Self::call("create_collection", &database, Some(&input.collection));
        let collection = input.collection;
        dispatch_with(
            &self.context.mongodb,
            call,
            self.timeout(),
            database,
            |mongo, db| async move {
                mongo.create_collection(&db, &collection).await?;
                Ok(CreatedOutput {
                    created: collection,
                })
            },
        )
        .await
    }
}

//! MCP resources.
//!
//! Each resource URI maps onto one tool handler call, so a resource read
//! returns the same envelope the matching tool would. Path segments are
//! taken literally.

use crate::context::AppContext;
use crate::db::document::DEFAULT_SCHEMA_SAMPLE;
use crate::db::flux::DEFAULT_SAMPLE_LIMIT;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, CapabilityToggles};
use crate::tools::{InfluxTools, MongoTools, PostgresTools, RedisTools, influxdb, mongodb, postgres, redis};
use std::sync::Arc;

pub const HEALTH_URI: &str = "health://status";

/// A fixed, listable resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

const fn entry(uri: &'static str, name: &'static str, description: &'static str) -> ResourceEntry {
    ResourceEntry {
        uri,
        name,
        description,
    }
}

const POSTGRES_RESOURCES: &[ResourceEntry] = &[
    entry("postgres://databases", "PostgreSQL databases", "Registered and server-side databases"),
    entry("postgres://connection", "PostgreSQL connection", "Host, port, user and connected databases"),
];

const REDIS_RESOURCES: &[ResourceEntry] = &[
    entry("redis://info", "Redis info", "INFO output grouped by section"),
    entry("redis://databases", "Redis databases", "Database indexes that hold keys"),
];

const MONGODB_RESOURCES: &[ResourceEntry] = &[
    entry("mongodb://info", "MongoDB server", "buildInfo summary"),
    entry("mongodb://databases", "MongoDB databases", "Database names"),
];

const INFLUXDB_RESOURCES: &[ResourceEntry] = &[
    entry("influxdb://info", "InfluxDB server", "Health, readiness and configured org/bucket"),
    entry("influxdb://buckets", "InfluxDB buckets", "Buckets visible to the token"),
];

/// URI patterns readable in addition to the listed resources.
pub const URI_TEMPLATES: &[&str] = &[
    "postgres://databases/{database}/tables",
    "postgres://databases/{database}/tables/{table}/schema",
    "postgres://databases/{database}/tables/{table}/sample",
    "redis://databases/{db}/keys",
    "redis://databases/{db}/keys/{key}/info",
    "redis://databases/{db}/keys/{key}/value",
    "mongodb://databases/{database}/info",
    "mongodb://databases/{database}/collections",
    "mongodb://databases/{database}/collections/{collection}/info",
    "mongodb://databases/{database}/collections/{collection}/schema",
    "mongodb://databases/{database}/collections/{collection}/sample",
    "influxdb://buckets/{bucket}/measurements",
    "influxdb://buckets/{bucket}/measurements/{measurement}/fields",
    "influxdb://buckets/{bucket}/measurements/{measurement}/tags",
    "influxdb://buckets/{bucket}/measurements/{measurement}/tags/{tag}/values",
    "influxdb://buckets/{bucket}/measurements/{measurement}/sample",
];

/// Listable resources of the enabled backends, plus health.
pub fn catalogue(toggles: &CapabilityToggles) -> Vec<ResourceEntry> {
    let mut entries = vec![entry(
        HEALTH_URI,
        "Health",
        "Per-backend status: connected, disconnected or disabled",
    )];
    for (kind, resources) in [
        (BackendKind::Postgres, POSTGRES_RESOURCES),
        (BackendKind::Redis, REDIS_RESOURCES),
        (BackendKind::MongoDb, MONGODB_RESOURCES),
        (BackendKind::InfluxDb, INFLUXDB_RESOURCES),
    ] {
        if toggles.is_enabled(kind) {
            entries.extend_from_slice(resources);
        }
    }
    entries
}

/// A parsed resource URI.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRoute {
    Health,
    PostgresDatabases,
    PostgresConnection,
    PostgresTables { database: String },
    PostgresTableSchema { database: String, table: String },
    PostgresTableSample { database: String, table: String },
    RedisInfo,
    RedisDatabases,
    RedisKeys { db: i64 },
    RedisKeyInfo { db: i64, key: String },
    RedisKeyValue { db: i64, key: String },
    MongoInfo,
    MongoDatabases,
    MongoDatabaseInfo { database: String },
    MongoCollections { database: String },
    MongoCollectionInfo { database: String, collection: String },
    MongoCollectionSchema { database: String, collection: String },
    MongoCollectionSample { database: String, collection: String },
    InfluxInfo,
    InfluxBuckets,
    InfluxMeasurements { bucket: String },
    InfluxFields { bucket: String, measurement: String },
    InfluxTags { bucket: String, measurement: String },
    InfluxTagValues { bucket: String, measurement: String, tag: String },
    InfluxSample { bucket: String, measurement: String },
}

impl ResourceRoute {
    pub fn parse(uri: &str) -> DbResult<Self> {
        let unknown = || DbError::not_found("Resource", uri, Vec::new());
        let (scheme, rest) = uri.split_once("://").ok_or_else(unknown)?;
        let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(unknown());
        }
        let s = |v: &&str| v.to_string();

        let route = match (scheme, segments.as_slice()) {
            ("health", ["status"]) => Self::Health,

            ("postgres", ["databases"]) => Self::PostgresDatabases,
            ("postgres", ["connection"]) => Self::PostgresConnection,
            ("postgres", ["databases", db, "tables"]) => Self::PostgresTables { database: s(db) },
            ("postgres", ["databases", db, "tables", t, "schema"]) => Self::PostgresTableSchema {
                database: s(db),
                table: s(t),
            },
            ("postgres", ["databases", db, "tables", t, "sample"]) => Self::PostgresTableSample {
                database: s(db),
                table: s(t),
            },

            ("redis", ["info"]) => Self::RedisInfo,
            ("redis", ["databases"]) => Self::RedisDatabases,
            ("redis", ["databases", db, "keys"]) => Self::RedisKeys { db: db_index(db)? },
            ("redis", ["databases", db, "keys", key, "info"]) => Self::RedisKeyInfo {
                db: db_index(db)?,
                key: s(key),
            },
            ("redis", ["databases", db, "keys", key, "value"]) => Self::RedisKeyValue {
                db: db_index(db)?,
                key: s(key),
            },

            ("mongodb", ["info"]) => Self::MongoInfo,
            ("mongodb", ["databases"]) => Self::MongoDatabases,
            ("mongodb", ["databases", db, "info"]) => Self::MongoDatabaseInfo { database: s(db) },
            ("mongodb", ["databases", db, "collections"]) => {
                Self::MongoCollections { database: s(db) }
            }
            ("mongodb", ["databases", db, "collections", c, "info"]) => Self::MongoCollectionInfo {
                database: s(db),
                collection: s(c),
            },
            ("mongodb", ["databases", db, "collections", c, "schema"]) => {
                Self::MongoCollectionSchema {
                    database: s(db),
                    collection: s(c),
                }
            }
            ("mongodb", ["databases", db, "collections", c, "sample"]) => {
                Self::MongoCollectionSample {
                    database: s(db),
                    collection: s(c),
                }
            }

            ("influxdb", ["info"]) => Self::InfluxInfo,
            ("influxdb", ["buckets"]) => Self::InfluxBuckets,
            ("influxdb", ["buckets", b, "measurements"]) => Self::InfluxMeasurements { bucket: s(b) },
            ("influxdb", ["buckets", b, "measurements", m, "fields"]) => Self::InfluxFields {
                bucket: s(b),
                measurement: s(m),
            },
            ("influxdb", ["buckets", b, "measurements", m, "tags"]) => Self::InfluxTags {
                bucket: s(b),
                measurement: s(m),
            },
            ("influxdb", ["buckets", b, "measurements", m, "tags", k, "values"]) => {
                Self::InfluxTagValues {
                    bucket: s(b),
                    measurement: s(m),
                    tag: s(k),
                }
            }
            ("influxdb", ["buckets", b, "measurements", m, "sample"]) => Self::InfluxSample {
                bucket: s(b),
                measurement: s(m),
            },

            _ => return Err(unknown()),
        };
        Ok(route)
    }

    /// Backend the route reads from; `None` for health.
    pub fn backend(&self) -> Option<BackendKind> {
        use ResourceRoute::*;
        match self {
            Health => None,
            PostgresDatabases
            | PostgresConnection
            | PostgresTables { .. }
            | PostgresTableSchema { .. }
            | PostgresTableSample { .. } => Some(BackendKind::Postgres),
            RedisInfo | RedisDatabases | RedisKeys { .. } | RedisKeyInfo { .. }
            | RedisKeyValue { .. } => Some(BackendKind::Redis),
            MongoInfo
            | MongoDatabases
            | MongoDatabaseInfo { .. }
            | MongoCollections { .. }
            | MongoCollectionInfo { .. }
            | MongoCollectionSchema { .. }
            | MongoCollectionSample { .. } => Some(BackendKind::MongoDb),
            InfluxInfo
            | InfluxBuckets
            | InfluxMeasurements { .. }
            | InfluxFields { .. }
            | InfluxTags { .. }
            | InfluxTagValues { .. }
            | InfluxSample { .. } => Some(BackendKind::InfluxDb),
        }
    }
}

fn db_index(raw: &str) -> DbResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|db| *db >= 0)
        .ok_or_else(|| DbError::invalid_argument(format!("'{}' is not a database index", raw)))
}

/// Read one resource. Fails only for URIs that do not name a resource;
/// backend failures come back inside the envelope.
pub async fn read(context: &Arc<AppContext>, uri: &str) -> DbResult<String> {
    let route = ResourceRoute::parse(uri)?;
    let ctx = Arc::clone(context);
    let text = match route {
        ResourceRoute::Health => {
            let report = context.health().await;
            serde_json::to_string_pretty(&report)
                .map_err(|e| DbError::internal(format!("Failed to serialize health: {}", e)))?
        }

        ResourceRoute::PostgresDatabases => PostgresTools::new(ctx).list_databases().await,
        ResourceRoute::PostgresConnection => PostgresTools::new(ctx).connection_info().await,
        ResourceRoute::PostgresTables { database } => {
            PostgresTools::new(ctx)
                .list_tables(postgres::DatabaseInput {
                    database: Some(database),
                })
                .await
        }
        ResourceRoute::PostgresTableSchema { database, table } => {
            PostgresTools::new(ctx)
                .table_info(postgres::TableInput {
                    database: Some(database),
                    table_name: table,
                })
                .await
        }
        ResourceRoute::PostgresTableSample { database, table } => {
            PostgresTools::new(ctx)
                .sample_rows(postgres::TableInput {
                    database: Some(database),
                    table_name: table,
                })
                .await
        }

        ResourceRoute::RedisInfo => RedisTools::new(ctx).info().await,
        ResourceRoute::RedisDatabases => RedisTools::new(ctx).list_databases().await,
        ResourceRoute::RedisKeys { db } => {
            RedisTools::new(ctx)
                .list_keys(redis::ListKeysInput {
                    pattern: "*".to_string(),
                    database: Some(db),
                })
                .await
        }
        ResourceRoute::RedisKeyInfo { db, key } => {
            RedisTools::new(ctx)
                .key_info(redis::KeyInput {
                    key,
                    database: Some(db),
                })
                .await
        }
        ResourceRoute::RedisKeyValue { db, key } => {
            RedisTools::new(ctx)
                .value(redis::KeyInput {
                    key,
                    database: Some(db),
                })
                .await
        }

        ResourceRoute::MongoInfo => MongoTools::new(ctx).server_info().await,
        ResourceRoute::MongoDatabases => MongoTools::new(ctx).list_databases().await,
        ResourceRoute::MongoDatabaseInfo { database } => {
            MongoTools::new(ctx)
                .database_info(mongodb::DatabaseInput {
                    database: Some(database),
                })
                .await
        }
        ResourceRoute::MongoCollections { database } => {
            MongoTools::new(ctx)
                .list_collections(mongodb::DatabaseInput {
                    database: Some(database),
                })
                .await
        }
        ResourceRoute::MongoCollectionInfo {
            database,
            collection,
        } => {
            MongoTools::new(ctx)
                .collection_info(mongodb::CollectionInput {
                    database: Some(database),
                    collection,
                })
                .await
        }
        ResourceRoute::MongoCollectionSchema {
            database,
            collection,
        } => {
            MongoTools::new(ctx)
                .collection_schema(mongodb::SchemaInput {
                    database: Some(database),
                    collection,
                    sample_size: Some(DEFAULT_SCHEMA_SAMPLE),
                })
                .await
        }
        ResourceRoute::MongoCollectionSample {
            database,
            collection,
        } => {
            MongoTools::new(ctx)
                .find_documents(mongodb::FindInput {
                    database: Some(database),
                    collection,
                    filter: "{}".to_string(),
                    limit: None,
                })
                .await
        }

        ResourceRoute::InfluxInfo => InfluxTools::new(ctx).server_info().await,
        ResourceRoute::InfluxBuckets => InfluxTools::new(ctx).list_buckets().await,
        ResourceRoute::InfluxMeasurements { bucket } => {
            InfluxTools::new(ctx)
                .list_measurements(influxdb::BucketInput {
                    bucket: Some(bucket),
                })
                .await
        }
        ResourceRoute::InfluxFields {
            bucket,
            measurement,
        } => {
            InfluxTools::new(ctx)
                .fields(influxdb::MeasurementInput {
                    bucket: Some(bucket),
                    measurement,
                })
                .await
        }
        ResourceRoute::InfluxTags {
            bucket,
            measurement,
        } => {
            InfluxTools::new(ctx)
                .tags(influxdb::MeasurementInput {
                    bucket: Some(bucket),
                    measurement,
                })
                .await
        }
        ResourceRoute::InfluxTagValues {
            bucket,
            measurement,
            tag,
        } => {
            InfluxTools::new(ctx)
                .tag_values(influxdb::TagValuesInput {
                    bucket: Some(bucket),
                    measurement,
                    tag,
                })
                .await
        }
        ResourceRoute::InfluxSample {
            bucket,
            measurement,
        } => {
            InfluxTools::new(ctx)
                .sample(influxdb::SampleInput {
                    bucket: Some(bucket),
                    measurement,
                    limit: Some(DEFAULT_SAMPLE_LIMIT),
                })
                .await
        }
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;
    use std::time::Duration;

    #[test]
    fn test_parse_postgres_routes() {
        assert_eq!(
            ResourceRoute::parse("postgres://databases").unwrap(),
            ResourceRoute::PostgresDatabases
        );
        assert_eq!(
            ResourceRoute::parse("postgres://databases/app/tables/users/sample").unwrap(),
            ResourceRoute::PostgresTableSample {
                database: "app".into(),
                table: "users".into()
            }
        );
    }

    #[test]
    fn test_parse_redis_routes() {
        assert_eq!(
            ResourceRoute::parse("redis://databases/3/keys/session:42/value").unwrap(),
            ResourceRoute::RedisKeyValue {
                db: 3,
                key: "session:42".into()
            }
        );
        let err = ResourceRoute::parse("redis://databases/x/keys").unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_parse_influx_tag_values() {
        assert_eq!(
            ResourceRoute::parse("influxdb://buckets/metrics/measurements/cpu/tags/host/values")
                .unwrap(),
            ResourceRoute::InfluxTagValues {
                bucket: "metrics".into(),
                measurement: "cpu".into(),
                tag: "host".into()
            }
        );
    }

    #[test]
    fn test_unknown_uris_are_not_found() {
        for uri in [
            "postgres://nope",
            "mysql://databases",
            "mongodb://databases//collections",
            "no-scheme",
        ] {
            let err = ResourceRoute::parse(uri).unwrap_err();
            assert_eq!(err.kind(), "not_found", "{}", uri);
        }
    }

    #[test]
    fn test_every_template_parses() {
        for template in URI_TEMPLATES {
            let uri = template
                .replace("{db}", "0")
                .replace('{', "")
                .replace('}', "");
            let route = ResourceRoute::parse(&uri).unwrap();
            assert!(route.backend().is_some(), "{}", uri);
        }
    }

    #[test]
    fn test_catalogue_follows_toggles() {
        let all = catalogue(&CapabilityToggles::all_enabled());
        assert_eq!(all.len(), 9);
        for entry in &all {
            assert!(ResourceRoute::parse(entry.uri).is_ok(), "{}", entry.uri);
        }

        let none = catalogue(&CapabilityToggles::all_disabled());
        assert_eq!(none.len(), 1);
        assert_eq!(none[0].uri, HEALTH_URI);

        let mut toggles = CapabilityToggles::all_disabled();
        toggles.redis = true;
        let uris: Vec<_> = catalogue(&toggles).iter().map(|e| e.uri).collect();
        assert_eq!(uris, vec![HEALTH_URI, "redis://info", "redis://databases"]);
    }

    #[tokio::test]
    async fn test_read_health_when_all_disabled() {
        let context = Arc::new(AppContext::disabled(Duration::from_secs(1)));
        let text = read(&context, HEALTH_URI).await.unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value["postgres"], "disabled");
        assert_eq!(value["influxdb"], "disabled");
    }

    #[tokio::test]
    async fn test_read_disabled_backend_returns_envelope() {
        let context = Arc::new(AppContext::disabled(Duration::from_secs(1)));
        let text = read(&context, "mongodb://databases/shop/collections/orders/sample")
            .await
            .unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value["backend"], "mongodb");
        assert_eq!(value["error"]["kind"], "disabled");
    }
}

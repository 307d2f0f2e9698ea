//! MCP service implementation using rmcp.
//!
//! Tools are grouped into one router per backend and only the routers of
//! enabled backends are merged in, so a disabled backend contributes no
//! tools. `health_check` and the resources are always present.

use crate::context::AppContext;
use crate::models::{BackendKind, CapabilityToggles};
use crate::resources::{self, URI_TEMPLATES};
use crate::tools::{InfluxTools, MongoTools, PostgresTools, RedisTools, influxdb, mongodb, postgres, redis};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam, ProtocolVersion, RawResource,
        ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities,
        ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tracing::debug;

pub const SERVER_NAME: &str = "multidb-mcp-server";

#[derive(Clone)]
pub struct McpService {
    /// Backends shared by every tool and resource call
    context: Arc<AppContext>,
    /// Tools of the enabled backends plus `health_check`
    tool_router: ToolRouter<Self>,
}

impl McpService {
    pub fn new(context: Arc<AppContext>) -> Self {
        let tool_router = Self::router_for(context.toggles());
        Self {
            context,
            tool_router,
        }
    }

    /// Merge the routers of the enabled backends.
    fn router_for(toggles: CapabilityToggles) -> ToolRouter<Self> {
        let mut router = Self::health_router();
        if toggles.postgres {
            router = router + Self::postgres_router();
        }
        if toggles.redis {
            router = router + Self::redis_router();
        }
        if toggles.mongodb {
            router = router + Self::mongodb_router();
        }
        if toggles.influxdb {
            router = router + Self::influxdb_router();
        }
        router
    }

    fn postgres(&self) -> PostgresTools {
        PostgresTools::new(Arc::clone(&self.context))
    }

    fn redis(&self) -> RedisTools {
        RedisTools::new(Arc::clone(&self.context))
    }

    fn mongodb(&self) -> MongoTools {
        MongoTools::new(Arc::clone(&self.context))
    }

    fn influxdb(&self) -> InfluxTools {
        InfluxTools::new(Arc::clone(&self.context))
    }

    fn instructions(toggles: CapabilityToggles) -> String {
        let enabled: Vec<&str> = toggles.enabled().iter().map(|k| k.as_str()).collect();
        let enabled = if enabled.is_empty() {
            "none".to_string()
        } else {
            enabled.join(", ")
        };
        let templates: Vec<String> = URI_TEMPLATES
            .iter()
            .filter(|t| {
                t.split_once("://")
                    .and_then(|(scheme, _)| BackendKind::from_scheme(scheme))
                    .is_some_and(|kind| toggles.is_enabled(kind))
            })
            .map(|t| format!("- {}", t))
            .collect();

        format!(
            "Tools and resources for PostgreSQL, Redis, MongoDB and InfluxDB.\n\
            \n\
            Enabled backends: {enabled}\n\
            \n\
            ## Conventions\n\
            - Tool names are prefixed with the backend: `postgres_`, `redis_`, `mongodb_`, `influxdb_`\n\
            - Every result is a JSON envelope with `backend`, `operation`, `target` and either `result` or `error`\n\
            - `error.kind` is one of configuration, connection, not_found, invalid_argument, backend, disabled, timeout\n\
            - Filters, pipelines, documents, tags and fields are passed as JSON strings\n\
            - `health_check` (or the `health://status` resource) reports each backend as connected, disconnected or disabled\n\
            \n\
            ## Resource URIs\n\
            {templates}",
            enabled = enabled,
            templates = templates.join("\n"),
        )
    }
}

#[tool_router(router = health_router)]
impl McpService {
    #[tool(
        description = "Report each backend as connected, disconnected or disabled.\nstatus is \"degraded\" when an enabled backend is unreachable."
    )]
    async fn health_check(&self) -> String {
        let report = self.context.health().await;
        serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
            format!("{{\"error\": \"Failed to serialize health report: {}\"}}", e)
        })
    }
}

#[tool_router(router = postgres_router)]
impl McpService {
    #[tool(
        description = "Run a SQL query against one PostgreSQL database and return the rows.\nUse $1, $2 placeholders with params. database defaults to POSTGRES_DB."
    )]
    async fn postgres_query(&self, Parameters(input): Parameters<postgres::QueryInput>) -> String {
        self.postgres().query(input).await
    }

    #[tool(
        description = "Execute an INSERT, UPDATE, DELETE or DDL statement and return rows_affected."
    )]
    async fn postgres_execute(
        &self,
        Parameters(input): Parameters<postgres::ExecuteInput>,
    ) -> String {
        self.postgres().execute(input).await
    }

    #[tool(
        description = "List databases: the connected ones and every non-template database on the server."
    )]
    async fn postgres_list_databases(&self) -> String {
        self.postgres().list_databases().await
    }

    #[tool(description = "List tables in the public schema of a database.")]
    async fn postgres_list_tables(
        &self,
        Parameters(input): Parameters<postgres::DatabaseInput>,
    ) -> String {
        self.postgres().list_tables(input).await
    }

    #[tool(
        description = "Describe a table's columns: name, data type, nullability and default."
    )]
    async fn postgres_get_table_info(
        &self,
        Parameters(input): Parameters<postgres::TableInput>,
    ) -> String {
        self.postgres().table_info(input).await
    }

    #[tool(description = "Show host, port, user and the databases currently connected.")]
    async fn postgres_connection_info(&self) -> String {
        self.postgres().connection_info().await
    }

    #[tool(
        description = "Create a table. columns is the column definition list, e.g. \"id SERIAL PRIMARY KEY, name TEXT\"."
    )]
    async fn postgres_create_table(
        &self,
        Parameters(input): Parameters<postgres::CreateTableInput>,
    ) -> String {
        self.postgres().create_table(input).await
    }

    #[tool(description = "Create a database and connect to it.")]
    async fn postgres_create_database(
        &self,
        Parameters(input): Parameters<postgres::CreateDatabaseInput>,
    ) -> String {
        self.postgres().create_database(input).await
    }
}

#[tool_router(router = redis_router)]
impl McpService {
    #[tool(description = "Redis INFO, grouped by section.")]
    async fn redis_info(&self) -> String {
        self.redis().info().await
    }

    #[tool(description = "List database indexes that hold keys.")]
    async fn redis_list_databases(&self) -> String {
        self.redis().list_databases().await
    }

    #[tool(description = "List keys matching a glob pattern (default \"*\").")]
    async fn redis_list_keys(&self, Parameters(input): Parameters<redis::ListKeysInput>) -> String {
        self.redis().list_keys(input).await
    }

    #[tool(description = "Show a key's type, TTL and memory usage.")]
    async fn redis_get_key_info(&self, Parameters(input): Parameters<redis::KeyInput>) -> String {
        self.redis().key_info(input).await
    }

    #[tool(
        description = "Read a key's value. Strings, lists, sets, sorted sets (with scores) and hashes are supported."
    )]
    async fn redis_get_value(&self, Parameters(input): Parameters<redis::KeyInput>) -> String {
        self.redis().value(input).await
    }

    #[tool(
        description = "Run a raw Redis command with string arguments.\nSELECT is rejected; pass database instead."
    )]
    async fn redis_execute_command(
        &self,
        Parameters(input): Parameters<redis::ExecuteCommandInput>,
    ) -> String {
        self.redis().execute_command(input).await
    }

    #[tool(description = "Set a string key, optionally with an expiry in seconds.")]
    async fn redis_set_key(&self, Parameters(input): Parameters<redis::SetKeyInput>) -> String {
        self.redis().set_key(input).await
    }

    #[tool(description = "Delete a key.")]
    async fn redis_delete_key(&self, Parameters(input): Parameters<redis::KeyInput>) -> String {
        self.redis().delete_key(input).await
    }

    #[tool(description = "Remove every key in one database index.")]
    async fn redis_flush_database(
        &self,
        Parameters(input): Parameters<redis::DatabaseInput>,
    ) -> String {
        self.redis().flush_database(input).await
    }
}

#[tool_router(router = mongodb_router)]
impl McpService {
    #[tool(description = "MongoDB build info: version, git version and max BSON size.")]
    async fn mongodb_server_info(&self) -> String {
        self.mongodb().server_info().await
    }

    #[tool(description = "List database names.")]
    async fn mongodb_list_databases(&self) -> String {
        self.mongodb().list_databases().await
    }

    #[tool(description = "dbStats for a database: collections, objects and sizes.")]
    async fn mongodb_database_info(
        &self,
        Parameters(input): Parameters<mongodb::DatabaseInput>,
    ) -> String {
        self.mongodb().database_info(input).await
    }

    #[tool(description = "List collections in a database.")]
    async fn mongodb_list_collections(
        &self,
        Parameters(input): Parameters<mongodb::DatabaseInput>,
    ) -> String {
        self.mongodb().list_collections(input).await
    }

    #[tool(description = "Collection statistics and index names.")]
    async fn mongodb_collection_info(
        &self,
        Parameters(input): Parameters<mongodb::CollectionInput>,
    ) -> String {
        self.mongodb().collection_info(input).await
    }

    #[tool(
        description = "Infer a collection's schema from a random sample (default 100 documents).\nReports types seen per field and how often each field is present."
    )]
    async fn mongodb_collection_schema(
        &self,
        Parameters(input): Parameters<mongodb::SchemaInput>,
    ) -> String {
        self.mongodb().collection_schema(input).await
    }

    #[tool(
        description = "Find documents matching a JSON filter (default {}). limit defaults to 10.\nExtended JSON such as {\"$oid\": ...} is accepted."
    )]
    async fn mongodb_find_documents(
        &self,
        Parameters(input): Parameters<mongodb::FindInput>,
    ) -> String {
        self.mongodb().find_documents(input).await
    }

    #[tool(description = "Run an aggregation pipeline given as a JSON array of stages.")]
    async fn mongodb_aggregate(
        &self,
        Parameters(input): Parameters<mongodb::AggregateInput>,
    ) -> String {
        self.mongodb().aggregate(input).await
    }

    #[tool(description = "Insert one document given as a JSON object.")]
    async fn mongodb_insert_document(
        &self,
        Parameters(input): Parameters<mongodb::InsertInput>,
    ) -> String {
        self.mongodb().insert_document(input).await
    }

    #[tool(
        description = "Update every document matching filter with an update document such as {\"$set\": {...}}."
    )]
    async fn mongodb_update_documents(
        &self,
        Parameters(input): Parameters<mongodb::UpdateInput>,
    ) -> String {
        self.mongodb().update_documents(input).await
    }

    #[tool(description = "Delete every document matching filter.")]
    async fn mongodb_delete_documents(
        &self,
        Parameters(input): Parameters<mongodb::DeleteInput>,
    ) -> String {
        self.mongodb().delete_documents(input).await
    }

    #[tool(description = "Create a collection.")]
    async fn mongodb_create_collection(
        &self,
        Parameters(input): Parameters<mongodb::CollectionInput>,
    ) -> String {
        self.mongodb().create_collection(input).await
    }
}

#[tool_router(router = influxdb_router)]
impl McpService {
    #[tool(description = "InfluxDB health and readiness, plus the configured org and bucket.")]
    async fn influxdb_server_info(&self) -> String {
        self.influxdb().server_info().await
    }

    #[tool(description = "List buckets with their retention rules.")]
    async fn influxdb_list_buckets(&self) -> String {
        self.influxdb().list_buckets().await
    }

    #[tool(description = "List measurements in a bucket (default INFLUXDB_BUCKET).")]
    async fn influxdb_list_measurements(
        &self,
        Parameters(input): Parameters<influxdb::BucketInput>,
    ) -> String {
        self.influxdb().list_measurements(input).await
    }

    #[tool(description = "List field keys of a measurement.")]
    async fn influxdb_get_fields(
        &self,
        Parameters(input): Parameters<influxdb::MeasurementInput>,
    ) -> String {
        self.influxdb().fields(input).await
    }

    #[tool(description = "List tag keys of a measurement.")]
    async fn influxdb_get_tags(
        &self,
        Parameters(input): Parameters<influxdb::MeasurementInput>,
    ) -> String {
        self.influxdb().tags(input).await
    }

    #[tool(description = "List values of one tag over the last hour.")]
    async fn influxdb_get_tag_values(
        &self,
        Parameters(input): Parameters<influxdb::TagValuesInput>,
    ) -> String {
        self.influxdb().tag_values(input).await
    }

    #[tool(
        description = "Run a Flux query. When the query has no from(), `from(bucket: ...)` is prepended."
    )]
    async fn influxdb_query(&self, Parameters(input): Parameters<influxdb::QueryInput>) -> String {
        self.influxdb().query(input).await
    }

    #[tool(description = "Latest points of a measurement from the last hour (default 10).")]
    async fn influxdb_sample_data(
        &self,
        Parameters(input): Parameters<influxdb::SampleInput>,
    ) -> String {
        self.influxdb().sample(input).await
    }

    #[tool(
        description = "Write one point. tags and fields are JSON objects; timestamp is nanoseconds or RFC 3339."
    )]
    async fn influxdb_write_data(
        &self,
        Parameters(input): Parameters<influxdb::WriteInput>,
    ) -> String {
        self.influxdb().write(input).await
    }

    #[tool(
        description = "Create a bucket in the configured org. retention_period like 30d, 12h or infinite."
    )]
    async fn influxdb_create_bucket(
        &self,
        Parameters(input): Parameters<influxdb::CreateBucketInput>,
    ) -> String {
        self.influxdb().create_bucket(input).await
    }

    #[tool(
        description = "Delete points between two RFC 3339 times, optionally restricted by a predicate such as _measurement=\"cpu\"."
    )]
    async fn influxdb_delete_data(
        &self,
        Parameters(input): Parameters<influxdb::DeleteInput>,
    ) -> String {
        self.influxdb().delete(input).await
    }
}

#[tool_handler]
impl ServerHandler for McpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: SERVER_NAME.to_owned(),
                title: Some("Multi-database MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(Self::instructions(self.context.toggles())),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources = resources::catalogue(&self.context.toggles())
            .into_iter()
            .map(|entry| {
                RawResource {
                    description: Some(entry.description.to_string()),
                    mime_type: Some("application/json".to_string()),
                    ..RawResource::new(entry.uri, entry.name)
                }
                .no_annotation()
            })
            .collect();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        debug!(uri = %request.uri, "Reading resource");
        let text = resources::read(&self.context, &request.uri)
            .await
            .map_err(McpError::from)?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tool_names(toggles: CapabilityToggles) -> Vec<String> {
        let mut names: Vec<String> = McpService::router_for(toggles)
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_all_disabled_registers_only_health() {
        assert_eq!(
            tool_names(CapabilityToggles::all_disabled()),
            vec!["health_check"]
        );
    }

    #[test]
    fn test_all_enabled_registers_every_backend() {
        let names = tool_names(CapabilityToggles::all_enabled());
        // 8 postgres + 9 redis + 12 mongodb + 11 influxdb + health_check
        assert_eq!(names.len(), 41);
        for expected in [
            "postgres_query",
            "postgres_get_table_info",
            "redis_set_key",
            "mongodb_collection_schema",
            "influxdb_delete_data",
        ] {
            assert!(names.iter().any(|n| n == expected), "{}", expected);
        }
    }

    #[test]
    fn test_disabled_backend_contributes_no_tools() {
        let mut toggles = CapabilityToggles::all_disabled();
        toggles.redis = true;
        let names = tool_names(toggles);
        assert!(names.iter().all(|n| n == "health_check" || n.starts_with("redis_")));
        assert_eq!(names.len(), 10);
    }

    #[test]
    fn test_server_info() {
        let service = McpService::new(Arc::new(AppContext::disabled(Duration::from_secs(1))));
        let info = service.get_info();
        assert_eq!(info.server_info.name, SERVER_NAME);
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("Enabled backends: none"));
        assert!(!instructions.contains("redis://"));
    }

    #[test]
    fn test_instructions_list_enabled_templates() {
        let mut toggles = CapabilityToggles::all_disabled();
        toggles.influxdb = true;
        let instructions = McpService::instructions(toggles);
        assert!(instructions.contains("Enabled backends: influxdb"));
        assert!(instructions.contains("influxdb://buckets/{bucket}/measurements"));
        assert!(!instructions.contains("postgres://"));
    }

    #[tokio::test]
    async fn test_health_check_tool() {
        let service = McpService::new(Arc::new(AppContext::disabled(Duration::from_secs(1))));
        let out = service.health_check().await;
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["mongodb"], "disabled");
    }
}

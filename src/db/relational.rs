//! PostgreSQL backend.
//!
//! One `PgPool` per database, all on the server named by the configured
//! descriptor, kept in a [`SqlRegistry`]. Connecting registers the initial
//! database and then every sibling database the server hosts.

use crate::db::adapter::BackendAdapter;
use crate::db::registry::{SqlConnection, SqlConnector, SqlRegistry};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    BackendKind, ColumnInfo, ConnectionSummary, JsonRow, APPLICATION_NAME,
    PostgresDescriptor, QueryParam, SAMPLE_ROW_LIMIT,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const LIST_DATABASES_SQL: &str =
    "SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname";

const LIST_TABLES_SQL: &str = "SELECT table_name::text AS table_name \
     FROM information_schema.tables \
     WHERE table_schema = 'public' \
     ORDER BY table_name";

const TABLE_INFO_SQL: &str = "SELECT column_name::text AS column_name, \
     data_type::text AS data_type, \
     is_nullable::text AS is_nullable, \
     column_default::text AS column_default \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// sqlx connection
// =============================================================================

/// Opens `PgPool`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl SqlConnector for PgConnector {
    type Connection = PgDatabase;

    async fn connect(&self, descriptor: &PostgresDescriptor) -> DbResult<PgDatabase> {
        let mut options = PgConnectOptions::new()
            .host(&descriptor.host)
            .port(descriptor.port)
            .username(&descriptor.user)
            .database(&descriptor.database)
            .application_name(APPLICATION_NAME);
        if let Some(password) = &descriptor.password {
            options = options.password(password);
        }

        let pool_opts = &descriptor.pool_options;
        let pool = PgPoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default())
            .acquire_timeout(descriptor.connect_timeout)
            .idle_timeout(Some(Duration::from_secs(
                pool_opts.idle_timeout_or_default(),
            )))
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!(
                        "Failed to connect to {}: {}",
                        descriptor.display_url(),
                        e
                    ),
                    "Check POSTGRES_HOST/POSTGRES_PORT, the credentials, and that the database exists",
                )
            })?;

        Ok(PgDatabase {
            database: descriptor.database.clone(),
            pool,
        })
    }
}

/// One pool bound to one database.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    database: String,
    pool: PgPool,
}

impl SqlConnection for PgDatabase {
    fn database(&self) -> &str {
        &self.database
    }

    async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn list_server_databases(&self) -> DbResult<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>(LIST_DATABASES_SQL)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Registered databases next to what the server itself reports.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseListing {
    pub connected: Vec<String>,
    pub server: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostgresConnectionInfo {
    #[serde(flatten)]
    pub summary: ConnectionSummary,
    pub connected_databases: Vec<String>,
}

/// First rows of a table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSample {
    pub table: String,
    pub limited_to: i64,
    pub rows: Vec<JsonRow>,
}

pub struct PostgresBackend<C: SqlConnector = PgConnector> {
    descriptor: PostgresDescriptor,
    registry: SqlRegistry<C>,
}

impl PostgresBackend<PgConnector> {
    pub fn new(descriptor: PostgresDescriptor) -> Self {
        Self::with_connector(descriptor, PgConnector)
    }
}

impl<C: SqlConnector> PostgresBackend<C> {
    pub fn with_connector(descriptor: PostgresDescriptor, connector: C) -> Self {
        Self {
            descriptor,
            registry: SqlRegistry::new(connector),
        }
    }

    pub fn registry(&self) -> &SqlRegistry<C> {
        &self.registry
    }

    pub fn descriptor(&self) -> &PostgresDescriptor {
        &self.descriptor
    }

    /// The initial database's connection, or any registered one.
    async fn primary(&self) -> DbResult<Arc<C::Connection>> {
        if let Ok(connection) = self.registry.get(&self.descriptor.database).await {
            return Ok(connection);
        }
        match self.registry.list().await.first() {
            Some(name) => self.registry.get(name).await,
            None => Err(DbError::not_connected(BackendKind::Postgres)),
        }
    }

    pub async fn query(
        &self,
        database: &str,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        self.registry.query(database, sql, params).await
    }

    pub async fn execute(&self, database: &str, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.registry.execute(database, sql, params).await
    }

    pub async fn list_databases(&self) -> DbResult<DatabaseListing> {
        let server = self.primary().await?.list_server_databases().await?;
        Ok(DatabaseListing {
            connected: self.registry.list().await,
            server,
        })
    }

    pub async fn list_tables(&self, database: &str) -> DbResult<Vec<String>> {
        let rows = self.registry.query(database, LIST_TABLES_SQL, &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("table_name") {
                Some(JsonValue::String(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    /// Columns of `table` in ordinal order. A table without columns does not exist.
    pub async fn table_info(&self, database: &str, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let params = [QueryParam::String(table.to_string())];
        let rows = self.registry.query(database, TABLE_INFO_SQL, &params).await?;
        if rows.is_empty() {
            let available = self.list_tables(database).await.unwrap_or_default();
            return Err(DbError::not_found("Table", table, available));
        }
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(JsonValue::Object(row)).map_err(|e| {
                    DbError::internal(format!("Unexpected column metadata shape: {}", e))
                })
            })
            .collect()
    }

    pub async fn sample_rows(&self, database: &str, table: &str) -> DbResult<TableSample> {
        let sql = format!("SELECT * FROM {} LIMIT $1", quote_ident(table));
        let params = [QueryParam::Int(SAMPLE_ROW_LIMIT)];
        let rows = self.registry.query(database, &sql, &params).await?;
        Ok(TableSample {
            table: table.to_string(),
            limited_to: SAMPLE_ROW_LIMIT,
            rows,
        })
    }

    pub async fn connection_info(&self) -> PostgresConnectionInfo {
        PostgresConnectionInfo {
            summary: ConnectionSummary {
                host: self.descriptor.host.clone(),
                port: self.descriptor.port,
                user: Some(self.descriptor.user.clone()),
                url: self.descriptor.display_url(),
            },
            connected_databases: self.registry.list().await,
        }
    }

    /// `CREATE TABLE "name" (columns)`. `columns` is the raw column list.
    pub async fn create_table(&self, database: &str, table: &str, columns: &str) -> DbResult<()> {
        if table.trim().is_empty() {
            return Err(DbError::invalid_argument("table_name must not be empty"));
        }
        if columns.trim().is_empty() {
            return Err(DbError::invalid_argument("columns must not be empty"));
        }
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), columns);
        self.registry.execute(database, &sql, &[]).await?;
        info!(database = %database, table = %table, "Table created");
        Ok(())
    }

    /// Create a database on the server and register a pool for it.
    pub async fn create_database(&self, name: &str) -> DbResult<()> {
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument("database_name must not be empty"));
        }
        let sql = format!("CREATE DATABASE {}", quote_ident(name));
        self.primary().await?.execute(&sql, &[]).await?;
        self.registry
            .add(name, &self.descriptor.with_database(name))
            .await?;
        info!(database = %name, "Database created");
        Ok(())
    }
}

impl<C: SqlConnector> BackendAdapter for PostgresBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn target(&self) -> String {
        self.descriptor.display_url()
    }

    async fn connect(&self) -> DbResult<()> {
        let initial = self.descriptor.database.clone();
        self.registry.add(&initial, &self.descriptor).await?;

        let report = self
            .registry
            .discover_and_connect_siblings(&initial, &self.descriptor)
            .await;
        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                "Some sibling databases could not be connected"
            );
        }
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        self.registry.disconnect_all().await;
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        if self.registry.ping_any().await {
            Ok(())
        } else {
            Err(DbError::not_connected(BackendKind::Postgres))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::registry::fake::{FakeConnector, FakeServer, descriptor};

    fn backend(server: FakeServer) -> PostgresBackend<FakeConnector> {
        PostgresBackend::with_connector(descriptor("postgres"), FakeConnector::new(server))
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let backend = backend(FakeServer::default());
        assert_eq!(backend.ping().await.unwrap_err().kind(), "connection");
        assert_eq!(
            backend.list_databases().await.unwrap_err().kind(),
            "connection"
        );
        assert_eq!(
            backend.query("postgres", "SELECT 1", &[]).await.unwrap_err().kind(),
            "connection"
        );
        assert_eq!(
            backend.list_tables("postgres").await.unwrap_err().kind(),
            "connection"
        );
    }

    #[tokio::test]
    async fn test_connect_registers_initial_and_siblings() {
        let backend = backend(FakeServer::with_databases(&["app", "postgres"]));
        backend.connect().await.unwrap();

        assert_eq!(backend.registry().list().await, vec!["app", "postgres"]);
        let listing = backend.list_databases().await.unwrap();
        assert_eq!(listing.connected, vec!["app", "postgres"]);
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_when_initial_database_refused() {
        let backend = backend(FakeServer::with_databases(&["postgres"]).refusing(&["postgres"]));
        let err = backend.connect().await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(backend.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_then_operations_fail() {
        let backend = backend(FakeServer::with_databases(&["postgres"]));
        backend.connect().await.unwrap();
        backend.disconnect().await.unwrap();

        assert!(backend.ping().await.is_err());
        assert_eq!(backend.status().await, crate::models::BackendStatus::Disconnected);
        let err = backend.table_info("postgres", "users").await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(err.to_string().contains("Not connected to PostgreSQL"));
    }

    #[tokio::test]
    async fn test_unknown_database_is_not_found_while_connected() {
        let backend = backend(FakeServer::with_databases(&["postgres"]));
        backend.connect().await.unwrap();
        let err = backend.sample_rows("missing", "users").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_create_database_registers_it() {
        let connector = FakeConnector::new(FakeServer::with_databases(&["postgres"]));
        let server = Arc::clone(&connector.server);
        let backend = PostgresBackend::with_connector(descriptor("postgres"), connector);
        backend.connect().await.unwrap();

        backend.create_database("reports").await.unwrap();

        assert!(backend.registry().contains("reports").await);
        let statements = server.statements.lock().unwrap().clone();
        assert_eq!(statements, vec!["CREATE DATABASE \"reports\"".to_string()]);
    }

    #[tokio::test]
    async fn test_create_table_quotes_name() {
        let connector = FakeConnector::new(FakeServer::with_databases(&["postgres"]));
        let server = Arc::clone(&connector.server);
        let backend = PostgresBackend::with_connector(descriptor("postgres"), connector);
        backend.connect().await.unwrap();

        backend
            .create_table("postgres", "my table", "id SERIAL PRIMARY KEY")
            .await
            .unwrap();

        let statements = server.statements.lock().unwrap().clone();
        assert_eq!(
            statements,
            vec!["CREATE TABLE \"my table\" (id SERIAL PRIMARY KEY)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_table_rejects_empty_columns() {
        let backend = backend(FakeServer::with_databases(&["postgres"]));
        backend.connect().await.unwrap();
        let err = backend
            .create_table("postgres", "t", "  ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_connection_info_masks_password() {
        let mut descriptor = descriptor("postgres");
        descriptor.password = Some("hunter2".to_string());
        let backend = PostgresBackend::with_connector(
            descriptor,
            FakeConnector::new(FakeServer::with_databases(&["postgres"])),
        );
        backend.connect().await.unwrap();

        let info = backend.connection_info().await;
        assert_eq!(info.connected_databases, vec!["postgres"]);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"host\":\"localhost\""));
    }
}

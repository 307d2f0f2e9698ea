//! PostgreSQL tools.
//!
//! Every tool names the logical database it runs against; omitted, it is
//! the initial database from `POSTGRES_DB`.

use crate::config::DEFAULT_POSTGRES_DATABASE;
use crate::context::AppContext;
use crate::models::{BackendKind, ExecuteResult, JsonRow, QueryParam};
use crate::tools::dispatch::{Call, dispatch};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input for the postgres_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// SQL statement to run
    pub sql: String,
    /// Logical database. Default: the initial database (POSTGRES_DB, "postgres")
    #[serde(default)]
    pub database: Option<String>,
    /// Positional parameters for $1, $2... placeholders
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

/// Input for the postgres_execute tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteInput {
    /// INSERT, UPDATE, DELETE or DDL statement
    pub sql: String,
    /// Logical database. Default: the initial database
    #[serde(default)]
    pub database: Option<String>,
    /// Positional parameters for $1, $2... placeholders
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DatabaseInput {
    /// Logical database. Default: the initial database
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableInput {
    /// Logical database. Default: the initial database
    #[serde(default)]
    pub database: Option<String>,
    /// Table in the public schema
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateTableInput {
    /// Logical database. Default: the initial database
    #[serde(default)]
    pub database: Option<String>,
    /// Name of the new table
    pub table_name: String,
    /// Column definitions, e.g. "id SERIAL PRIMARY KEY, name TEXT NOT NULL"
    pub columns: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateDatabaseInput {
    /// Name of the new database
    pub database_name: String,
}

/// Rows returned by a query.
#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub row_count: usize,
    pub rows: Vec<JsonRow>,
}

#[derive(Debug, Serialize)]
pub struct CreatedOutput {
    pub created: String,
}

pub struct PostgresTools {
    context: Arc<AppContext>,
}

impl PostgresTools {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    fn database(&self, requested: Option<String>) -> String {
        requested
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .or_else(|| {
                self.context
                    .postgres
                    .get()
                    .map(|pg| pg.descriptor().database.clone())
            })
            .unwrap_or_else(|| DEFAULT_POSTGRES_DATABASE.to_string())
    }

    fn call(operation: &'static str) -> Call {
        Call::new(BackendKind::Postgres, operation)
    }

    pub async fn query(&self, input: QueryInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("query").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move {
                let rows = pg.query(&database, &input.sql, &input.params).await?;
                Ok(QueryOutput {
                    row_count: rows.len(),
                    rows,
                })
            },
        )
        .await
    }

    pub async fn execute(&self, input: ExecuteInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("execute").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move {
                let rows_affected = pg.execute(&database, &input.sql, &input.params).await?;
                Ok(ExecuteResult { rows_affected })
            },
        )
        .await
    }

    pub async fn list_databases(&self) -> String {
        dispatch(
            &self.context.postgres,
            Self::call("list_databases"),
            self.context.operation_timeout(),
            |pg| async move { pg.list_databases().await },
        )
        .await
    }

    pub async fn list_tables(&self, input: DatabaseInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("list_tables").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move { pg.list_tables(&database).await },
        )
        .await
    }

    pub async fn table_info(&self, input: TableInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("get_table_info").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move { pg.table_info(&database, &input.table_name).await },
        )
        .await
    }

    pub async fn sample_rows(&self, input: TableInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("sample_rows").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move { pg.sample_rows(&database, &input.table_name).await },
        )
        .await
    }

    pub async fn connection_info(&self) -> String {
        dispatch(
            &self.context.postgres,
            Self::call("connection_info"),
            self.context.operation_timeout(),
            |pg| async move { Ok(pg.connection_info().await) },
        )
        .await
    }

    pub async fn create_table(&self, input: CreateTableInput) -> String {
        let database = self.database(input.database);
        let call = Self::call("create_table").target(&database);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move {
                pg.create_table(&database, &input.table_name, &input.columns)
                    .await?;
                Ok(CreatedOutput {
                    created: input.table_name,
                })
            },
        )
        .await
    }

    pub async fn create_database(&self, input: CreateDatabaseInput) -> String {
        let call = Self::call("create_database").target(&input.database_name);
        dispatch(
            &self.context.postgres,
            call,
            self.context.operation_timeout(),
            |pg| async move {
                pg.create_database(&input.database_name).await?;
                Ok(CreatedOutput {
                    created: input.database_name,
                })
            },
        )
        .await
    }
}

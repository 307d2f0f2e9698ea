//! Named connections to the databases of one relational server.
//!
//! The registry maps a logical database name to one live connection. It is
//! generic over the connector so the lifecycle rules (connect before insert,
//! best-effort close, sibling discovery that never fails) do not depend on a
//! running server.
//!
//! # Concurrency
//!
//! The map sits behind a `tokio::sync::RwLock`. Connections are `Arc`ed and
//! cloned out under a read lock, so no lock is held across backend I/O.
//! Mutations (add, disconnect) connect or close outside the lock.

use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, JsonRow, PostgresDescriptor, QueryParam};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One live connection (pool) to one database.
pub trait SqlConnection: Send + Sync + 'static {
    /// Database this connection is bound to.
    fn database(&self) -> &str;

    /// Run a statement and return every row as a JSON object.
    fn query(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<Vec<JsonRow>>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[QueryParam])
    -> impl Future<Output = DbResult<u64>> + Send;

    /// Every non-template database on the server, sorted.
    fn list_server_databases(&self) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    fn ping(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn close(&self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens connections from descriptors.
pub trait SqlConnector: Send + Sync + 'static {
    type Connection: SqlConnection;

    fn connect(
        &self,
        descriptor: &PostgresDescriptor,
    ) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}

/// A sibling database that could not be connected.
#[derive(Debug, Clone, Serialize)]
pub struct SiblingFailure {
    pub database: String,
    pub error: String,
}

/// Outcome of sibling discovery. Partial coverage is a normal result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiblingReport {
    /// Databases reported by the server other than those already registered.
    pub discovered: Vec<String>,
    pub connected: Vec<String>,
    pub failed: Vec<SiblingFailure>,
    /// Set when the server catalogue itself could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
}

pub struct SqlRegistry<C: SqlConnector> {
    connector: C,
    entries: RwLock<HashMap<String, Arc<C::Connection>>>,
}

impl<C: SqlConnector> SqlRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Connect `descriptor` and register it under `name`.
    ///
    /// The registry is untouched when the connect fails. An existing entry
    /// under the same name is replaced and its connection closed.
    pub async fn add(&self, name: &str, descriptor: &PostgresDescriptor) -> DbResult<()> {
        debug!(database = %name, "Connecting database");
        let connection = Arc::new(self.connector.connect(descriptor).await?);

        let replaced = {
            let mut entries = self.entries.write().await;
            entries.insert(name.to_string(), connection)
        }; // Lock released here

        if let Some(old) = replaced {
            if let Err(e) = old.close().await {
                warn!(database = %name, error = %e, "Failed to close replaced connection");
            }
        }

        info!(database = %name, "Database registered");
        Ok(())
    }

    /// The connection registered under `name`.
    ///
    /// An empty registry means the server was never reached or has been
    /// disconnected, which is reported as not connected rather than not found.
    pub async fn get(&self, name: &str) -> DbResult<Arc<C::Connection>> {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(connection) => Ok(Arc::clone(connection)),
            None if entries.is_empty() => Err(DbError::not_connected(BackendKind::Postgres)),
            None => Err(DbError::not_found("Database", name, sorted_keys(&entries))),
        }
    }

    /// Registered names, sorted.
    pub async fn list(&self) -> Vec<String> {
        sorted_keys(&*self.entries.read().await)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn query(
        &self,
        name: &str,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let connection = self.get(name).await?;
        connection.query(sql, params).await
    }

    pub async fn execute(&self, name: &str, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let connection = self.get(name).await?;
        connection.execute(sql, params).await
    }

    /// Close every connection and empty the registry.
    ///
    /// A failing close is logged and the remaining entries are still closed.
    pub async fn disconnect_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        for (name, connection) in drained {
            match connection.close().await {
                Ok(()) => info!(database = %name, "Closed database connection"),
                Err(e) => warn!(database = %name, error = %e, "Failed to close database connection"),
            }
        }
    }

    /// True when at least one registered connection answers a ping.
    pub async fn ping_any(&self) -> bool {
        let connections: Vec<_> = self.entries.read().await.values().cloned().collect();
        for connection in connections {
            if connection.ping().await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Register every other database the server hosts, using the credentials
    /// of `template`.
    ///
    /// `name` must already be registered; its connection is used to read the
    /// server catalogue. Failures are collected in the report and logged,
    /// never returned.
    pub async fn discover_and_connect_siblings(
        &self,
        name: &str,
        template: &PostgresDescriptor,
    ) -> SiblingReport {
        let mut report = SiblingReport::default();

        let databases = match self.get(name).await {
            Ok(connection) => connection.list_server_databases().await,
            Err(e) => Err(e),
        };
        let databases = match databases {
            Ok(databases) => databases,
            Err(e) => {
                warn!(database = %name, error = %e, "Could not list sibling databases");
                report.listing_error = Some(e.to_string());
                return report;
            }
        };

        for database in databases {
            if database == name || self.contains(&database).await {
                continue;
            }
            report.discovered.push(database.clone());

            match self.add(&database, &template.with_database(&database)).await {
                Ok(()) => report.connected.push(database),
                Err(e) => {
                    warn!(database = %database, error = %e, "Failed to connect sibling database");
                    report.failed.push(SiblingFailure {
                        database,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "Sibling discovery finished"
        );
        report
    }
}

fn sorted_keys<V>(entries: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = entries.keys().cloned().collect();
    names.sort();
    names
}

//! Error types for the multi-database MCP server.
//!
//! Every failure a backend operation can produce is categorised into one
//! variant of [`DbError`]. The dispatch layer turns any of them into the
//! uniform response envelope, so nothing below it needs to format errors.

use crate::models::BackendKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Malformed or missing configuration value.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Backend unreachable, credentials rejected, or not connected.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// A named database, table, collection, key or bucket does not exist.
    #[error("{object} '{name}' not found. Available: [{}]", .available.join(", "))]
    NotFound {
        object: String,
        name: String,
        available: Vec<String>,
    },

    /// Malformed request argument, reported before any backend call.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The backend accepted the call but failed to execute it.
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        /// e.g., "42P01" for an undefined PostgreSQL table
        code: Option<String>,
    },

    #[error("{backend} is disabled in the server configuration")]
    Disabled { backend: BackendKind },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// The error every backend returns before `connect` or after `disconnect`.
    pub fn not_connected(backend: BackendKind) -> Self {
        Self::connection(
            format!("Not connected to {}", backend),
            "Check the server logs for the startup connection failure and restart once the backend is reachable",
        )
    }

    /// Create a not-found error listing the names that do exist.
    pub fn not_found(
        object: impl Into<String>,
        name: impl Into<String>,
        available: Vec<String>,
    ) -> Self {
        Self::NotFound {
            object: object.into(),
            name: name.into(),
            available,
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a backend operation error.
    pub fn backend(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Backend {
            message: message.into(),
            code,
        }
    }

    pub fn disabled(backend: BackendKind) -> Self {
        Self::Disabled { backend }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable label used in response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Connection { .. } => "connection",
            Self::NotFound { .. } => "not_found",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Backend { .. } => "backend",
            Self::Disabled { .. } => "disabled",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Disabled { .. } => {
                Some("Set the matching ENABLE_* variable to true and restart the server")
            }
            Self::Timeout { .. } => {
                Some("Narrow the operation or raise --operation-timeout")
            }
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the POSTGRES_* settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::backend(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::backend("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Check database server status or raise POSTGRES_MAX_CONNECTIONS",
            ),
            sqlx::Error::PoolClosed => DbError::not_connected(BackendKind::Postgres),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::backend(format!("Failed to decode column {}: {}", index, source), None)
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::backend(other.to_string(), None),
        }
    }
}

impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            return DbError::connection(
                err.to_string(),
                "Check that Redis is running and REDIS_HOST/REDIS_PORT are correct",
            );
        }
        if err.is_timeout() {
            return DbError::timeout("redis command", 0);
        }
        if err.kind() == redis::ErrorKind::AuthenticationFailed {
            return DbError::connection(err.to_string(), "Check REDIS_PASSWORD");
        }
        let code = err.code().map(str::to_string);
        DbError::backend(err.to_string(), code)
    }
}

impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => DbError::connection(
                err.to_string(),
                "Check that MongoDB is running and MONGODB_HOST/MONGODB_PORT are correct",
            ),
            ErrorKind::Authentication { .. } => {
                DbError::connection(err.to_string(), "Check MONGODB_USER and MONGODB_PASSWORD")
            }
            ErrorKind::InvalidArgument { .. } => DbError::invalid_argument(err.to_string()),
            ErrorKind::Command(command) => {
                DbError::backend(command.message.clone(), Some(command.code_name.clone()))
            }
            _ => DbError::backend(err.to_string(), None),
        }
    }
}

impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return DbError::timeout("influxdb request", 0);
        }
        if err.is_connect() || err.is_request() {
            return DbError::connection(
                err.to_string(),
                "Check that InfluxDB is running and INFLUXDB_HOST/INFLUXDB_PORT are correct",
            );
        }
        let code = err.status().map(|s| s.as_u16().to_string());
        DbError::backend(err.to_string(), code)
    }
}

/// JSON decoding only happens on request arguments, so a failure is the caller's.
impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid_argument(format!("Invalid JSON: {}", err))
    }
}

impl From<csv::Error> for DbError {
    fn from(err: csv::Error) -> Self {
        DbError::backend(format!("Malformed CSV response: {}", err), None)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for failures raised at the protocol level
/// (unknown resource URIs, malformed requests) rather than inside a tool.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::InvalidArgument { .. } | DbError::Configuration { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), None)
            }
            DbError::NotFound { available, .. } => rmcp::ErrorData::resource_not_found(
                err.to_string(),
                Some(serde_json::json!({ "available": available })),
            ),
            DbError::Disabled { .. } => {
                rmcp::ErrorData::invalid_request(err.to_string(), suggestion_data(err.suggestion()))
            }
            DbError::Backend { message, code } => {
                let msg = match code {
                    Some(code) => format!("{} (code: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, None)
            }
            DbError::Connection { .. } | DbError::Timeout { .. } | DbError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion()))
            }
        }
    }
}

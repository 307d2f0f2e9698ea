//! Configuration handling for the multi-database MCP server.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! Backend settings use the conventional `POSTGRES_*`, `REDIS_*`, `MONGODB_*` and
//! `INFLUXDB_*` variable names so an existing `.env` file keeps working.

use crate::error::{DbError, DbResult};
use crate::models::{
    CapabilityToggles, InfluxDescriptor, MongoDescriptor, PostgresDescriptor, RedisDescriptor,
};
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_POSTGRES_HOST: &str = "localhost";
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_DATABASE: &str = "postgres";
pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_MONGODB_HOST: &str = "localhost";
pub const DEFAULT_MONGODB_PORT: u16 = 27017;
pub const DEFAULT_INFLUXDB_HOST: &str = "localhost";
pub const DEFAULT_INFLUXDB_PORT: u16 = 8086;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connection pool configuration for the relational backend.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections per database pool (default: 10)
    pub max_connections: Option<u32>,
    /// Minimum connections per database pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if min > self.max_connections_or_default() {
                return Err(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min,
                    self.max_connections_or_default()
                ));
            }
        }
        Ok(())
    }
}

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Strip the surrounding quotes and whitespace that `.env` files and
/// container environments tend to leave on values.
pub fn clean_value(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == ' ' || c == '"' || c == '\'' || c == '\r' || c == '\n')
}

/// Parse an `ENABLE_*` toggle.
pub fn parse_toggle(raw: &str) -> Result<bool, String> {
    match clean_value(raw).to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!(
            "invalid toggle '{}': expected true/false, 1/0, yes/no or on/off",
            other
        )),
    }
}

/// Parse a TCP port, tolerating quoted values.
pub fn parse_port(raw: &str) -> Result<u16, String> {
    clean_value(raw)
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{}': {}", raw, e))
}

/// Parse a Redis database index.
pub fn parse_db_index(raw: &str) -> Result<i64, String> {
    let index = clean_value(raw)
        .parse::<i64>()
        .map_err(|e| format!("invalid database index '{}': {}", raw, e))?;
    if index < 0 {
        return Err(format!("database index must not be negative, got {}", index));
    }
    Ok(index)
}

/// Treat empty (after cleaning) values as absent.
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(clean_value)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn or_default(value: &str, default: &str) -> String {
    let cleaned = clean_value(value);
    if cleaned.is_empty() {
        default.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Configuration for the multi-database MCP server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multidb-mcp-server",
    about = "MCP server exposing PostgreSQL, Redis, MongoDB and InfluxDB as uniform tools and resources",
    version,
    author
)]
pub struct Config {
    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT",
        value_parser = parse_port
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Upper bound in seconds for every backend operation
    #[arg(
        long,
        default_value_t = DEFAULT_OPERATION_TIMEOUT_SECS,
        env = "MCP_OPERATION_TIMEOUT"
    )]
    pub operation_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "MCP_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable the PostgreSQL backend
    #[arg(long, default_value = "true", env = "ENABLE_POSTGRES", value_parser = parse_toggle, action = ArgAction::Set)]
    pub enable_postgres: bool,

    /// Enable the Redis backend
    #[arg(long, default_value = "true", env = "ENABLE_REDIS", value_parser = parse_toggle, action = ArgAction::Set)]
    pub enable_redis: bool,

    /// Enable the MongoDB backend
    #[arg(long, default_value = "true", env = "ENABLE_MONGODB", value_parser = parse_toggle, action = ArgAction::Set)]
    pub enable_mongodb: bool,

    /// Enable the InfluxDB backend
    #[arg(long, default_value = "true", env = "ENABLE_INFLUXDB", value_parser = parse_toggle, action = ArgAction::Set)]
    pub enable_influxdb: bool,

    /// PostgreSQL host
    #[arg(long, default_value = DEFAULT_POSTGRES_HOST, env = "POSTGRES_HOST")]
    pub postgres_host: String,

    /// PostgreSQL port
    #[arg(long, default_value_t = DEFAULT_POSTGRES_PORT, env = "POSTGRES_PORT", value_parser = parse_port)]
    pub postgres_port: u16,

    /// PostgreSQL user
    #[arg(long, default_value = DEFAULT_POSTGRES_USER, env = "POSTGRES_USER")]
    pub postgres_user: String,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub postgres_password: Option<String>,

    /// Initial PostgreSQL database; every other database on the server is discovered from it
    #[arg(long, env = "POSTGRES_DB")]
    pub postgres_db: Option<String>,

    /// Maximum pooled connections per PostgreSQL database
    #[arg(long, env = "POSTGRES_MAX_CONNECTIONS")]
    pub postgres_max_connections: Option<u32>,

    /// Minimum pooled connections per PostgreSQL database
    #[arg(long, env = "POSTGRES_MIN_CONNECTIONS")]
    pub postgres_min_connections: Option<u32>,

    /// Redis host
    #[arg(long, default_value = DEFAULT_REDIS_HOST, env = "REDIS_HOST")]
    pub redis_host: String,

    /// Redis port
    #[arg(long, default_value_t = DEFAULT_REDIS_PORT, env = "REDIS_PORT", value_parser = parse_port)]
    pub redis_port: u16,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Redis database index for the shared connection
    #[arg(long, default_value = "0", env = "REDIS_DB", value_parser = parse_db_index)]
    pub redis_db: i64,

    /// MongoDB host
    #[arg(long, default_value = DEFAULT_MONGODB_HOST, env = "MONGODB_HOST")]
    pub mongodb_host: String,

    /// MongoDB port
    #[arg(long, default_value_t = DEFAULT_MONGODB_PORT, env = "MONGODB_PORT", value_parser = parse_port)]
    pub mongodb_port: u16,

    /// MongoDB user
    #[arg(long, env = "MONGODB_USER")]
    pub mongodb_user: Option<String>,

    /// MongoDB password
    #[arg(long, env = "MONGODB_PASSWORD", hide_env_values = true)]
    pub mongodb_password: Option<String>,

    /// Default MongoDB database for tools that do not name one
    #[arg(long, env = "MONGODB_DB")]
    pub mongodb_db: Option<String>,

    /// Maximum MongoDB connection pool size
    #[arg(long, env = "MONGODB_MAX_POOL_SIZE")]
    pub mongodb_max_pool_size: Option<u32>,

    /// InfluxDB host
    #[arg(long, default_value = DEFAULT_INFLUXDB_HOST, env = "INFLUXDB_HOST")]
    pub influxdb_host: String,

    /// InfluxDB port
    #[arg(long, default_value_t = DEFAULT_INFLUXDB_PORT, env = "INFLUXDB_PORT", value_parser = parse_port)]
    pub influxdb_port: u16,

    /// InfluxDB API token
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influxdb_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUXDB_ORG")]
    pub influxdb_org: Option<String>,

    /// Default InfluxDB bucket for tools that do not name one
    #[arg(long, env = "INFLUXDB_BUCKET")]
    pub influxdb_bucket: Option<String>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
            enable_postgres: true,
            enable_redis: true,
            enable_mongodb: true,
            enable_influxdb: true,
            postgres_host: DEFAULT_POSTGRES_HOST.to_string(),
            postgres_port: DEFAULT_POSTGRES_PORT,
            postgres_user: DEFAULT_POSTGRES_USER.to_string(),
            postgres_password: None,
            postgres_db: None,
            postgres_max_connections: None,
            postgres_min_connections: None,
            redis_host: DEFAULT_REDIS_HOST.to_string(),
            redis_port: DEFAULT_REDIS_PORT,
            redis_password: None,
            redis_db: 0,
            mongodb_host: DEFAULT_MONGODB_HOST.to_string(),
            mongodb_port: DEFAULT_MONGODB_PORT,
            mongodb_user: None,
            mongodb_password: None,
            mongodb_db: None,
            mongodb_max_pool_size: None,
            influxdb_host: DEFAULT_INFLUXDB_HOST.to_string(),
            influxdb_port: DEFAULT_INFLUXDB_PORT,
            influxdb_token: None,
            influxdb_org: None,
            influxdb_bucket: None,
        }
    }

    /// The same configuration with every backend switched off.
    pub fn all_disabled() -> Self {
        Self {
            enable_postgres: false,
            enable_redis: false,
            enable_mongodb: false,
            enable_influxdb: false,
            ..Self::default_config()
        }
    }

    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> DbResult<()> {
        if !self.mcp_endpoint.starts_with('/') {
            return Err(DbError::configuration(format!(
                "MCP endpoint must start with '/', got '{}'",
                self.mcp_endpoint
            )));
        }
        if self.mcp_endpoint.trim_end_matches('/') == "/health" {
            return Err(DbError::configuration(
                "MCP endpoint cannot be /health, that path serves the health report",
            ));
        }
        if self.operation_timeout == 0 {
            return Err(DbError::configuration(
                "operation timeout must be greater than 0",
            ));
        }
        self.postgres_pool_options()
            .validate()
            .map_err(DbError::configuration)?;
        Ok(())
    }

    pub fn toggles(&self) -> CapabilityToggles {
        CapabilityToggles {
            postgres: self.enable_postgres,
            redis: self.enable_redis,
            mongodb: self.enable_mongodb,
            influxdb: self.enable_influxdb,
        }
    }

    pub fn postgres_pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.postgres_max_connections,
            min_connections: self.postgres_min_connections,
            idle_timeout_secs: None,
        }
    }

    /// Descriptor for the initial PostgreSQL database.
    pub fn postgres_descriptor(&self) -> PostgresDescriptor {
        PostgresDescriptor {
            host: or_default(&self.postgres_host, DEFAULT_POSTGRES_HOST),
            port: self.postgres_port,
            user: or_default(&self.postgres_user, DEFAULT_POSTGRES_USER),
            password: non_empty(&self.postgres_password),
            database: non_empty(&self.postgres_db)
                .unwrap_or_else(|| DEFAULT_POSTGRES_DATABASE.to_string()),
            pool_options: self.postgres_pool_options(),
            connect_timeout: self.connect_timeout_duration(),
        }
    }

    pub fn redis_descriptor(&self) -> RedisDescriptor {
        RedisDescriptor {
            host: or_default(&self.redis_host, DEFAULT_REDIS_HOST),
            port: self.redis_port,
            password: non_empty(&self.redis_password),
            db: self.redis_db,
            connect_timeout: self.connect_timeout_duration(),
        }
    }

    pub fn mongodb_descriptor(&self) -> MongoDescriptor {
        MongoDescriptor {
            host: or_default(&self.mongodb_host, DEFAULT_MONGODB_HOST),
            port: self.mongodb_port,
            user: non_empty(&self.mongodb_user),
            password: non_empty(&self.mongodb_password),
            database: non_empty(&self.mongodb_db),
            max_pool_size: self.mongodb_max_pool_size,
            connect_timeout: self.connect_timeout_duration(),
        }
    }

    pub fn influxdb_descriptor(&self) -> InfluxDescriptor {
        InfluxDescriptor {
            host: or_default(&self.influxdb_host, DEFAULT_INFLUXDB_HOST),
            port: self.influxdb_port,
            token: non_empty(&self.influxdb_token),
            org: non_empty(&self.influxdb_org),
            bucket: non_empty(&self.influxdb_bucket),
            connect_timeout: self.connect_timeout_duration(),
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the operation timeout as a Duration.
    pub fn operation_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

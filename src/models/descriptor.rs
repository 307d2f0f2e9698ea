//! Connection descriptors.
//!
//! A descriptor is the immutable set of parameters needed to open one
//! backend connection. Descriptors are built from [`crate::config::Config`]
//! once at startup; reconnecting to a different target builds a new
//! descriptor rather than mutating an existing one.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Application name reported to PostgreSQL for every pooled session.
pub const APPLICATION_NAME: &str = "mcp-server";

/// Parameters for one PostgreSQL database on one server.
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Sensitive - never log
    pub password: Option<String>,
    pub database: String,
    pub pool_options: PoolOptions,
    pub connect_timeout: Duration,
}

impl PostgresDescriptor {
    /// Same server and credentials, different database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Display-safe connection URL (password masked).
    pub fn display_url(&self) -> String {
        masked_url(
            "postgres",
            &self.host,
            self.port,
            Some(&self.user),
            self.password.as_deref(),
            &self.database,
        )
    }
}

/// Parameters for the Redis server.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisDescriptor {
    pub host: String,
    pub port: u16,
    /// Sensitive - never log
    pub password: Option<String>,
    /// Database index the shared connection is bound to.
    pub db: i64,
    pub connect_timeout: Duration,
}

impl RedisDescriptor {
    /// Connection URL bound to database index `db`. The password is
    /// percent-encoded by the URL builder.
    pub fn url_for(&self, db: i64) -> DbResult<String> {
        let mut url = base_url("redis", &self.host, self.port)?;
        url.set_path(&format!("/{}", db));
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| DbError::configuration("REDIS_PASSWORD cannot be encoded in a URL"))?;
        }
        Ok(url.to_string())
    }

    pub fn display_url(&self) -> String {
        masked_url(
            "redis",
            &self.host,
            self.port,
            None,
            self.password.as_deref(),
            &self.db.to_string(),
        )
    }
}

/// Parameters for the MongoDB server.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoDescriptor {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    /// Sensitive - never log
    pub password: Option<String>,
    /// Database used when a tool call does not name one.
    pub database: Option<String>,
    pub max_pool_size: Option<u32>,
    pub connect_timeout: Duration,
}

impl MongoDescriptor {
    /// `mongodb://[user:pass@]host:port/`
    pub fn connection_string(&self) -> DbResult<String> {
        let mut url = base_url("mongodb", &self.host, self.port)?;
        url.set_path("/");
        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| DbError::configuration("MONGODB_USER cannot be encoded in a URL"))?;
            if let Some(password) = &self.password {
                url.set_password(Some(password)).map_err(|_| {
                    DbError::configuration("MONGODB_PASSWORD cannot be encoded in a URL")
                })?;
            }
        }
        Ok(url.to_string())
    }

    pub fn display_url(&self) -> String {
        masked_url(
            "mongodb",
            &self.host,
            self.port,
            self.user.as_deref(),
            self.password.as_deref(),
            "",
        )
    }
}

/// Parameters for the InfluxDB v2 server.
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxDescriptor {
    pub host: String,
    pub port: u16,
    /// Sensitive - never log
    pub token: Option<String>,
    pub org: Option<String>,
    /// Bucket used when a tool call does not name one.
    pub bucket: Option<String>,
    pub connect_timeout: Duration,
}

impl InfluxDescriptor {
    /// `http://host:port`
    pub fn base_url(&self) -> DbResult<Url> {
        base_url("http", &self.host, self.port)
    }

    pub fn display_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Connection summary returned by the `*_connection_info` style operations.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub url: String,
}

fn base_url(scheme: &str, host: &str, port: u16) -> DbResult<Url> {
    Url::parse(&format!("{}://{}:{}", scheme, host, port))
        .map_err(|e| DbError::configuration(format!("Invalid {} host '{}': {}", scheme, host, e)))
}

fn masked_url(
    scheme: &str,
    host: &str,
    port: u16,
    user: Option<&str>,
    password: Option<&str>,
    path: &str,
) -> String {
    let credentials = match (user, password) {
        (Some(user), Some(_)) => format!("{}:****@", user),
        (Some(user), None) => format!("{}@", user),
        (None, Some(_)) => ":****@".to_string(),
        (None, None) => String::new(),
    };
    format!("{}://{}{}:{}/{}", scheme, credentials, host, port, path)
}

//! Redis backend.
//!
//! A single `ConnectionManager` stays bound to the configured database index.
//! Calls that name another index open a short-lived multiplexed connection to
//! that index instead of issuing `SELECT`, so the shared connection never
//! changes database underneath concurrent callers.

use crate::db::adapter::{BackendAdapter, ClientHandle};
use crate::db::types::encode_binary_value;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, RedisDescriptor};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Cmd, FromRedisValue, Value};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::info;

/// `INFO` output grouped by section, e.g. `{"Server": {"redis_version": "7.2.4"}}`.
pub type InfoSections = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: String,
    /// Seconds left, or "no expiration" / "expired".
    pub ttl: JsonValue,
    pub memory_usage: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: JsonValue,
}

/// Connection a single call runs on.
enum Scoped {
    Shared(ConnectionManager),
    Temporary(MultiplexedConnection),
}

impl Scoped {
    async fn run<T: FromRedisValue>(&mut self, cmd: &Cmd) -> DbResult<T> {
        let result = match self {
            Scoped::Shared(conn) => cmd.query_async(conn).await,
            Scoped::Temporary(conn) => cmd.query_async(conn).await,
        };
        Ok(result?)
    }
}

pub struct RedisBackend {
    descriptor: RedisDescriptor,
    client: ClientHandle<ConnectionManager>,
}

/// A server-side command error becomes `None`: MEMORY USAGE is missing on
/// some Redis-compatible servers. Connection loss and timeouts still fail.
fn unsupported_as_none<T>(result: DbResult<Option<T>>) -> DbResult<Option<T>> {
    match result {
        Err(DbError::Backend { .. }) => Ok(None),
        other => other,
    }
}

impl RedisBackend {
    pub fn new(descriptor: RedisDescriptor) -> Self {
        Self {
            descriptor,
            client: ClientHandle::new(BackendKind::Redis),
        }
    }

    /// Index used when a call does not name one.
    pub fn default_db(&self) -> i64 {
        self.descriptor.db
    }

    /// Connection bound to `db`. Fails as not connected before `connect`,
    /// whatever index is requested.
    async fn connection_for(&self, db: i64) -> DbResult<Scoped> {
        let shared = self.client.get().await?;
        if db == self.descriptor.db {
            return Ok(Scoped::Shared(shared));
        }
        let client = redis::Client::open(self.descriptor.url_for(db)?)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Scoped::Temporary(conn))
    }

    pub async fn info(&self) -> DbResult<InfoSections> {
        let mut conn = self.connection_for(self.descriptor.db).await?;
        let text: String = conn.run(&redis::cmd("INFO")).await?;
        Ok(parse_info(&text))
    }

    /// Indexes that hold keys, from `INFO keyspace`. `[0]` when none do.
    pub async fn databases(&self) -> DbResult<Vec<i64>> {
        let mut conn = self.connection_for(self.descriptor.db).await?;
        let text: String = conn.run(redis::cmd("INFO").arg("keyspace")).await?;
        Ok(keyspace_databases(&parse_info(&text)))
    }

    pub async fn keys(&self, pattern: &str, db: i64) -> DbResult<Vec<String>> {
        let mut conn = self.connection_for(db).await?;
        let mut keys: Vec<String> = conn.run(redis::cmd("KEYS").arg(pattern)).await?;
        keys.sort();
        Ok(keys)
    }

    pub async fn key_info(&self, key: &str, db: i64) -> DbResult<KeyInfo> {
        let mut conn = self.connection_for(db).await?;
        let key_type = key_type(&mut conn, key).await?;
        let ttl: i64 = conn.run(redis::cmd("TTL").arg(key)).await?;
        let memory_usage =
            unsupported_as_none::<i64>(conn.run(redis::cmd("MEMORY").arg("USAGE").arg(key)).await)?;

        Ok(KeyInfo {
            key: key.to_string(),
            key_type,
            ttl: ttl_label(ttl),
            memory_usage,
        })
    }

    /// Value of `key`, read with the command matching its type.
    pub async fn value(&self, key: &str, db: i64) -> DbResult<KeyValue> {
        let mut conn = self.connection_for(db).await?;
        let key_type = key_type(&mut conn, key).await?;

        let value = match key_type.as_str() {
            "string" => value_to_json(conn.run(redis::cmd("GET").arg(key)).await?),
            "list" => value_to_json(conn.run(redis::cmd("LRANGE").arg(key).arg(0).arg(-1)).await?),
            "set" => {
                let mut members: Vec<String> = conn.run(redis::cmd("SMEMBERS").arg(key)).await?;
                members.sort();
                JsonValue::from(members)
            }
            "zset" => {
                let scored: Vec<(String, f64)> = conn
                    .run(redis::cmd("ZRANGE").arg(key).arg(0).arg(-1).arg("WITHSCORES"))
                    .await?;
                scored
                    .into_iter()
                    .map(|(member, score)| serde_json::json!({ "member": member, "score": score }))
                    .collect()
            }
            "hash" => {
                let pairs: Vec<(String, String)> = conn.run(redis::cmd("HGETALL").arg(key)).await?;
                JsonValue::Object(
                    pairs
                        .into_iter()
                        .map(|(field, value)| (field, JsonValue::String(value)))
                        .collect(),
                )
            }
            other => JsonValue::String(format!("Unsupported type: {}", other)),
        };

        Ok(KeyValue {
            key: key.to_string(),
            key_type,
            value,
        })
    }

    /// Run an arbitrary command. `SELECT` is refused: the target index is
    /// chosen with `db`.
    pub async fn execute_command(
        &self,
        command: &str,
        args: &[String],
        db: i64,
    ) -> DbResult<JsonValue> {
        let command = command.trim();
        if command.is_empty() {
            return Err(DbError::invalid_argument("command must not be empty"));
        }
        if command.eq_ignore_ascii_case("SELECT") {
            return Err(DbError::invalid_argument(
                "SELECT is not allowed; pass the target index as the database argument",
            ));
        }

        let mut cmd = redis::cmd(command);
        for arg in args {
            cmd.arg(arg);
        }
        let mut conn = self.connection_for(db).await?;
        let value: Value = conn.run(&cmd).await?;
        Ok(value_to_json(value))
    }

    pub async fn set_key(
        &self,
        key: &str,
        value: &str,
        db: i64,
        expire_seconds: Option<u64>,
    ) -> DbResult<JsonValue> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        match expire_seconds {
            Some(0) => {
                return Err(DbError::invalid_argument(
                    "expire_seconds must be greater than 0",
                ));
            }
            Some(seconds) => {
                cmd.arg("EX").arg(seconds);
            }
            None => {}
        }
        let mut conn = self.connection_for(db).await?;
        let reply: Value = conn.run(&cmd).await?;
        Ok(value_to_json(reply))
    }

    /// Number of keys removed.
    pub async fn delete_key(&self, key: &str, db: i64) -> DbResult<i64> {
        let mut conn = self.connection_for(db).await?;
        conn.run(redis::cmd("DEL").arg(key)).await
    }

    pub async fn flush_database(&self, db: i64) -> DbResult<JsonValue> {
        let mut conn = self.connection_for(db).await?;
        let reply: Value = conn.run(&redis::cmd("FLUSHDB")).await?;
        info!(db = db, "Redis database flushed");
        Ok(value_to_json(reply))
    }
}

impl BackendAdapter for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn target(&self) -> String {
        self.descriptor.display_url()
    }

    async fn connect(&self) -> DbResult<()> {
        let client = redis::Client::open(self.descriptor.url_for(self.descriptor.db)?)?;
        let mut manager = tokio::time::timeout(
            self.descriptor.connect_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            DbError::connection(
                format!(
                    "Timed out connecting to {} after {}s",
                    self.descriptor.display_url(),
                    self.descriptor.connect_timeout.as_secs()
                ),
                "Check that Redis is running and REDIS_HOST/REDIS_PORT are correct",
            )
        })??;
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;

        self.client.set(manager).await;
        info!(url = %self.descriptor.display_url(), "Connected to Redis");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        // Dropping the last manager clone closes the socket
        if self.client.take().await.is_some() {
            info!("Disconnected from Redis");
        }
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        let mut conn = self.client.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

async fn key_type(conn: &mut Scoped, key: &str) -> DbResult<String> {
    let key_type: String = conn.run(redis::cmd("TYPE").arg(key)).await?;
    if key_type == "none" {
        return Err(DbError::not_found("Key", key, Vec::new()));
    }
    Ok(key_type)
}

/// Parse `INFO` text into sections. Lines before the first `# Section`
/// header land in a section named "default".
pub fn parse_info(text: &str) -> InfoSections {
    let mut sections = InfoSections::new();
    let mut current = "default".to_string();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('#') {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
    }
    sections
}

/// Database indexes listed in the `Keyspace` section, sorted.
pub fn keyspace_databases(info: &InfoSections) -> Vec<i64> {
    let mut databases: Vec<i64> = info
        .values()
        .flat_map(|section| section.keys())
        .filter_map(|key| key.strip_prefix("db")?.parse().ok())
        .collect();
    databases.sort_unstable();
    databases.dedup();
    if databases.is_empty() {
        databases.push(0);
    }
    databases
}

pub fn ttl_label(ttl: i64) -> JsonValue {
    match ttl {
        t if t > 0 => JsonValue::from(t),
        -1 => JsonValue::String("no expiration".to_string()),
        _ => JsonValue::String("expired".to_string()),
    }
}

/// Convert a reply to JSON. Non UTF-8 bulk strings are base64 encoded.
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Nil => JsonValue::Null,
        Value::Int(i) => JsonValue::from(i),
        Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s),
            Err(e) => encode_binary_value(e.as_bytes()),
        },
        Value::SimpleString(s) => JsonValue::String(s),
        Value::Okay => JsonValue::String("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            JsonValue::Array(items.into_iter().map(value_to_json).collect())
        }
        Value::Map(pairs) => {
            let mut object = Map::new();
            for (key, value) in pairs {
                let key = match value_to_json(key) {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                object.insert(key, value_to_json(value));
            }
            JsonValue::Object(object)
        }
        Value::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::VerbatimString { text, .. } => JsonValue::String(text),
        other => JsonValue::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn backend() -> RedisBackend {
        RedisBackend::new(RedisDescriptor {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(1),
        })
    }

    const INFO_SAMPLE: &str = "# Server\r\nredis_version:7.2.4\r\nuptime_in_seconds:42\r\n\r\n# Keyspace\r\ndb0:keys=3,expires=0,avg_ttl=0\r\ndb5:keys=1,expires=1,avg_ttl=100\r\n";

    #[test]
    fn test_parse_info_sections() {
        let info = parse_info(INFO_SAMPLE);
        assert_eq!(info["Server"]["redis_version"], "7.2.4");
        assert_eq!(info["Keyspace"]["db5"], "keys=1,expires=1,avg_ttl=100");
    }

    #[test]
    fn test_keyspace_databases() {
        assert_eq!(keyspace_databases(&parse_info(INFO_SAMPLE)), vec![0, 5]);
        assert_eq!(keyspace_databases(&parse_info("# Keyspace\r\n")), vec![0]);
    }

    #[test]
    fn test_ttl_label() {
        assert_eq!(ttl_label(30), JsonValue::from(30));
        assert_eq!(ttl_label(-1), "no expiration");
        assert_eq!(ttl_label(-2), "expired");
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(Value::Nil), JsonValue::Null);
        assert_eq!(value_to_json(Value::Okay), "OK");
        assert_eq!(
            value_to_json(Value::Array(vec![
                Value::BulkString(b"a".to_vec()),
                Value::Int(2),
            ])),
            serde_json::json!(["a", 2])
        );
        assert_eq!(
            value_to_json(Value::BulkString(vec![0xFF, 0xFE])),
            JsonValue::String("//4=".to_string())
        );
        assert_eq!(
            value_to_json(Value::Map(vec![(
                Value::SimpleString("k".to_string()),
                Value::Int(1)
            )])),
            serde_json::json!({"k": 1})
        );
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let backend = backend();
        assert_eq!(backend.info().await.unwrap_err().kind(), "connection");
        assert_eq!(backend.keys("*", 3).await.unwrap_err().kind(), "connection");
        assert_eq!(backend.ping().await.unwrap_err().kind(), "connection");
        assert!(backend.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_select_is_rejected_before_connection_check() {
        let backend = backend();
        let err = backend
            .execute_command("select", &["1".to_string()], 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_zero_expiry_is_rejected() {
        let err = backend().set_key("k", "v", 0, Some(0)).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_memory_usage_tolerates_only_command_errors() {
        let unsupported = Err(DbError::backend("ERR unknown command 'MEMORY'", Some("ERR".into())));
        assert_eq!(unsupported_as_none::<i64>(unsupported).unwrap(), None);
        assert_eq!(unsupported_as_none(Ok(Some(56_i64))).unwrap(), Some(56));

        let dropped = unsupported_as_none::<i64>(Err(DbError::not_connected(BackendKind::Redis)));
        assert_eq!(dropped.unwrap_err().kind(), "connection");
        let slow = unsupported_as_none::<i64>(Err(DbError::timeout("redis command", 0)));
        assert_eq!(slow.unwrap_err().kind(), "timeout");
    }
}

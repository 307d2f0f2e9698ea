//! Redis tools.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use crate::tools::dispatch::{Call, dispatch_with};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DatabaseInput {
    /// Database index. Default: REDIS_DB
    #[serde(default)]
    pub database: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListKeysInput {
    /// Glob-style pattern. Default: "*"
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Database index. Default: REDIS_DB
    #[serde(default)]
    pub database: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KeyInput {
    pub key: String,
    /// Database index. Default: REDIS_DB
    #[serde(default)]
    pub database: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteCommandInput {
    /// Command name, e.g. "HGET". SELECT is rejected; use `database`.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Database index. Default: REDIS_DB
    #[serde(default)]
    pub database: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetKeyInput {
    pub key: String,
    pub value: String,
    /// Database index. Default: REDIS_DB
    #[serde(default)]
    pub database: Option<i64>,
    /// Expiry in seconds. Omit for no expiry
    #[serde(default)]
    pub expire_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct KeysOutput {
    pub pattern: String,
    pub count: usize,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedOutput {
    pub key: String,
    pub deleted: i64,
}

pub struct RedisTools {
    context: Arc<AppContext>,
}

impl RedisTools {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Resolve the index locally so the envelope can name it and a bad
    /// index is rejected without a round trip.
    fn database(&self, requested: Option<i64>) -> DbResult<i64> {
        let db = requested
            .or_else(|| self.context.redis.get().map(|r| r.default_db()))
            .unwrap_or(0);
        if db < 0 {
            return Err(DbError::invalid_argument(format!(
                "database index must be non-negative, got {}",
                db
            )));
        }
        Ok(db)
    }

    fn call(operation: &'static str, db: &DbResult<i64>) -> Call {
        let call = Call::new(BackendKind::Redis, operation);
        match db {
            Ok(db) => call.target(format!("db{}", db)),
            Err(_) => call,
        }
    }

    pub async fn info(&self) -> String {
        let db = self.database(None);
        dispatch_with(
            &self.context.redis,
            Self::call("info", &db),
            self.context.operation_timeout(),
            db,
            |redis, _| async move { redis.info().await },
        )
        .await
    }

    pub async fn list_databases(&self) -> String {
        dispatch_with(
            &self.context.redis,
            Call::new(BackendKind::Redis, "list_databases"),
            self.context.operation_timeout(),
            Ok(()),
            |redis, ()| async move { redis.databases().await },
        )
        .await
    }

    pub async fn list_keys(&self, input: ListKeysInput) -> String {
        let db = self.database(input.database);
        let pattern = input.pattern;
        dispatch_with(
            &self.context.redis,
            Self::call("list_keys", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move {
                let keys = redis.keys(&pattern, db).await?;
                Ok(KeysOutput {
                    pattern,
                    count: keys.len(),
                    keys,
                })
            },
        )
        .await
    }

    pub async fn key_info(&self, input: KeyInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("get_key_info", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move { redis.key_info(&input.key, db).await },
        )
        .await
    }

    pub async fn value(&self, input: KeyInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("get_value", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move { redis.value(&input.key, db).await },
        )
        .await
    }

    pub async fn execute_command(&self, input: ExecuteCommandInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("execute_command", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move {
                redis
                    .execute_command(&input.command, &input.args, db)
                    .await
            },
        )
        .await
    }

    pub async fn set_key(&self, input: SetKeyInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("set_key", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move {
                redis
                    .set_key(&input.key, &input.value, db, input.expire_seconds)
                    .await
            },
        )
        .await
    }

    pub async fn delete_key(&self, input: KeyInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("delete_key", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move {
                let deleted = redis.delete_key(&input.key, db).await?;
                Ok(DeletedOutput {
                    key: input.key,
                    deleted,
                })
            },
        )
        .await
    }

    pub async fn flush_database(&self, input: DatabaseInput) -> String {
        let db = self.database(input.database);
        dispatch_with(
            &self.context.redis,
            Self::call("flush_database", &db),
            self.context.operation_timeout(),
            db,
            |redis, db| async move { redis.flush_database(db).await },
        )
        .await
    }
}

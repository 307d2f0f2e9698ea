//! Integration tests for the Redis tools.
//!
//! Run against a live server when TEST_REDIS_URL is set, e.g.
//! `redis://:password@localhost:6379`. Keys are namespaced per test and
//! removed afterwards; nothing is flushed.

mod common;

use common::{parse, result, unique_name};
use multidb_mcp_server::config::Config;
use multidb_mcp_server::context::AppContext;
use multidb_mcp_server::resources;
use multidb_mcp_server::tools::{RedisTools, redis};
use std::sync::Arc;

async fn setup() -> Option<Arc<AppContext>> {
    let Some(url) = common::env("TEST_REDIS_URL") else {
        common::skip("TEST_REDIS_URL");
        return None;
    };
    let endpoint = common::endpoint(&url);
    let mut config = Config {
        enable_redis: true,
        redis_host: endpoint.host,
        redis_password: endpoint.password,
        ..Config::all_disabled()
    };
    if let Some(port) = endpoint.port {
        config.redis_port = port;
    }
    Some(common::start(config).await)
}

fn key_input(key: &str, database: Option<i64>) -> redis::KeyInput {
    redis::KeyInput {
        key: key.to_string(),
        database,
    }
}

#[tokio::test]
async fn test_set_get_delete_string() {
    let Some(context) = setup().await else { return };
    let tools = RedisTools::new(context.clone());
    let key = unique_name("it:string");

    let out = tools
        .set_key(redis::SetKeyInput {
            key: key.clone(),
            value: "hello".into(),
            database: None,
            expire_seconds: Some(60),
        })
        .await;
    assert_eq!(parse(&out)["target"], "db0");
    assert_eq!(result(&out), "OK");

    let value = result(&tools.value(key_input(&key, None)).await);
    assert_eq!(value["type"], "string");
    assert_eq!(value["value"], "hello");

    let info = result(&tools.key_info(key_input(&key, None)).await);
    assert!(info["ttl"].as_i64().unwrap() > 0);

    let deleted = result(&tools.delete_key(key_input(&key, None)).await);
    assert_eq!(deleted["deleted"], 1);

    let out = tools.value(key_input(&key, None)).await;
    assert_eq!(parse(&out)["error"]["kind"], "not_found");

    context.shutdown().await;
}

#[tokio::test]
async fn test_other_index_leaves_default_untouched() {
    let Some(context) = setup().await else { return };
    let tools = RedisTools::new(context.clone());
    let key = unique_name("it:indexed");

    result(
        &tools
            .set_key(redis::SetKeyInput {
                key: key.clone(),
                value: "in-db-1".into(),
                database: Some(1),
                expire_seconds: Some(60),
            })
            .await,
    );

    // The shared connection still points at db0
    let out = tools.value(key_input(&key, None)).await;
    assert_eq!(parse(&out)["error"]["kind"], "not_found");

    let uri = format!("redis://databases/1/keys/{}/value", key);
    let text = resources::read(&context, &uri).await.unwrap();
    assert_eq!(result(&text)["value"], "in-db-1");

    result(&tools.delete_key(key_input(&key, Some(1))).await);
    context.shutdown().await;
}

#[tokio::test]
async fn test_execute_command_and_select_rejected() {
    let Some(context) = setup().await else { return };
    let tools = RedisTools::new(context.clone());
    let key = unique_name("it:hash");

    let out = tools
        .execute_command(redis::ExecuteCommandInput {
            command: "HSET".into(),
            args: vec![key.clone(), "field".into(), "value".into()],
            database: None,
        })
        .await;
    assert_eq!(result(&out), 1);

    let value = result(&tools.value(key_input(&key, None)).await);
    assert_eq!(value["type"], "hash");
    assert_eq!(value["value"]["field"], "value");

    let out = tools
        .execute_command(redis::ExecuteCommandInput {
            command: "select".into(),
            args: vec!["2".into()],
            database: None,
        })
        .await;
    assert_eq!(parse(&out)["error"]["kind"], "invalid_argument");

    result(&tools.delete_key(key_input(&key, None)).await);
    context.shutdown().await;
}

#[tokio::test]
async fn test_info_sections() {
    let Some(context) = setup().await else { return };
    let info = result(&RedisTools::new(context.clone()).info().await);
    assert!(info["Server"]["redis_version"].is_string());
    context.shutdown().await;
}

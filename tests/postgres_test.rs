//! Integration tests for the PostgreSQL tools.
//!
//! Run against a live server when TEST_POSTGRES_HOST is set
//! (TEST_POSTGRES_PORT, TEST_POSTGRES_USER, TEST_POSTGRES_PASSWORD optional).

mod common;

use common::{parse, result, unique_name};
use multidb_mcp_server::config::Config;
use multidb_mcp_server::context::AppContext;
use multidb_mcp_server::resources;
use multidb_mcp_server::tools::{PostgresTools, postgres};
use std::sync::Arc;

async fn setup() -> Option<Arc<AppContext>> {
    let Some(host) = common::env("TEST_POSTGRES_HOST") else {
        common::skip("TEST_POSTGRES_HOST");
        return None;
    };
    let mut config = Config {
        enable_postgres: true,
        postgres_host: host,
        postgres_password: common::env("TEST_POSTGRES_PASSWORD"),
        ..Config::all_disabled()
    };
    if let Some(port) = common::env("TEST_POSTGRES_PORT") {
        config.postgres_port = port.parse().expect("TEST_POSTGRES_PORT must be a port");
    }
    if let Some(user) = common::env("TEST_POSTGRES_USER") {
        config.postgres_user = user;
    }
    Some(common::start(config).await)
}

#[tokio::test]
async fn test_query_with_params() {
    let Some(context) = setup().await else { return };
    let tools = PostgresTools::new(context.clone());

    let out = tools
        .query(postgres::QueryInput {
            sql: "SELECT $1::int + 1 AS next, $2::text AS label".into(),
            database: None,
            params: serde_json::from_value(serde_json::json!([41, "answer"])).unwrap(),
        })
        .await;
    let value = parse(&out);
    assert_eq!(value["target"], "postgres");
    let rows = &value["result"]["rows"];
    assert_eq!(value["result"]["row_count"], 1);
    assert_eq!(rows[0]["next"], 42);
    assert_eq!(rows[0]["label"], "answer");

    context.shutdown().await;
}

#[tokio::test]
async fn test_table_lifecycle() {
    let Some(context) = setup().await else { return };
    let tools = PostgresTools::new(context.clone());
    let table = unique_name("it_items");

    result(
        &tools
            .create_table(postgres::CreateTableInput {
                database: None,
                table_name: table.clone(),
                columns: "id SERIAL PRIMARY KEY, name TEXT NOT NULL".into(),
            })
            .await,
    );

    let inserted = result(
        &tools
            .execute(postgres::ExecuteInput {
                sql: format!("INSERT INTO \"{}\" (name) VALUES ($1), ($2)", table),
                database: None,
                params: serde_json::from_value(serde_json::json!(["a", "b"])).unwrap(),
            })
            .await,
    );
    assert_eq!(inserted["rows_affected"], 2);

    let tables = result(&tools.list_tables(postgres::DatabaseInput::default()).await);
    assert!(
        tables
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == table.as_str())
    );

    let columns = result(
        &tools
            .table_info(postgres::TableInput {
                database: None,
                table_name: table.clone(),
            })
            .await,
    );
    assert_eq!(columns[0]["column_name"], "id");
    assert_eq!(columns[1]["column_name"], "name");

    let uri = format!("postgres://databases/postgres/tables/{}/sample", table);
    let sample = parse(&resources::read(&context, &uri).await.unwrap());
    assert!(sample.get("result").is_some(), "{}", sample);

    result(
        &tools
            .execute(postgres::ExecuteInput {
                sql: format!("DROP TABLE \"{}\"", table),
                database: None,
                params: vec![],
            })
            .await,
    );

    context.shutdown().await;
}

#[tokio::test]
async fn test_unknown_table_and_database() {
    let Some(context) = setup().await else { return };
    let tools = PostgresTools::new(context.clone());

    let out = tools
        .table_info(postgres::TableInput {
            database: None,
            table_name: "definitely_not_a_table".into(),
        })
        .await;
    assert_eq!(parse(&out)["error"]["kind"], "not_found");

    let out = tools
        .list_tables(postgres::DatabaseInput {
            database: Some("definitely_not_a_database".into()),
        })
        .await;
    let value = parse(&out);
    assert_eq!(value["error"]["kind"], "not_found");
    assert!(
        value["error"]["available"]
            .as_array()
            .unwrap()
            .iter()
            .any(|d| d == "postgres")
    );

    context.shutdown().await;
}

#[tokio::test]
async fn test_backend_error_passes_message_through() {
    let Some(context) = setup().await else { return };
    let out = PostgresTools::new(context.clone())
        .query(postgres::QueryInput {
            sql: "SELEC 1".into(),
            database: None,
            params: vec![],
        })
        .await;
    let value = parse(&out);
    assert_eq!(value["error"]["kind"], "backend");
    assert!(value["error"]["message"].as_str().unwrap().contains("syntax"));

    context.shutdown().await;
}

#[tokio::test]
async fn test_health_connected() {
    let Some(context) = setup().await else { return };
    let report = context.health().await;
    assert_eq!(report.status, "ok");
    assert_eq!(serde_json::to_value(&report).unwrap()["postgres"], "connected");
    context.shutdown().await;
}

//! Integration tests for a server started with every backend switched off.
//!
//! No servers are needed: nothing is constructed, every tool answers with
//! the disabled envelope and health reports all four backends as disabled.

mod common;

use common::parse;
use multidb_mcp_server::config::Config;
use multidb_mcp_server::models::{BackendKind, BackendStatus};
use multidb_mcp_server::resources;
use multidb_mcp_server::tools::{InfluxTools, MongoTools, PostgresTools, RedisTools, influxdb, mongodb, postgres, redis};
use rmcp::ServerHandler;

#[tokio::test]
async fn test_health_reports_every_backend_disabled() {
    let context = common::start(Config::all_disabled()).await;

    let report = context.health().await;
    for kind in BackendKind::ALL {
        assert_eq!(report.get(kind), BackendStatus::Disabled);
    }
    assert_eq!(report.status, "ok");

    let text = resources::read(&context, "health://status").await.unwrap();
    let value = parse(&text);
    assert_eq!(value["redis"], "disabled");

    context.shutdown().await;
}

#[tokio::test]
async fn test_tools_return_disabled_envelope() {
    let context = common::start(Config::all_disabled()).await;

    let outputs = vec![
        (
            "postgres",
            PostgresTools::new(context.clone())
                .query(postgres::QueryInput {
                    sql: "SELECT 1".into(),
                    database: None,
                    params: vec![],
                })
                .await,
        ),
        (
            "redis",
            RedisTools::new(context.clone())
                .list_keys(redis::ListKeysInput {
                    pattern: "*".into(),
                    database: None,
                })
                .await,
        ),
        (
            "mongodb",
            MongoTools::new(context.clone())
                .find_documents(mongodb::FindInput {
                    database: Some("shop".into()),
                    collection: "orders".into(),
                    // Bad JSON: the disabled response still wins
                    filter: "{not json".into(),
                    limit: None,
                })
                .await,
        ),
        (
            "influxdb",
            InfluxTools::new(context.clone())
                .list_measurements(influxdb::BucketInput {
                    bucket: Some("metrics".into()),
                })
                .await,
        ),
    ];

    for (backend, out) in outputs {
        let value = parse(&out);
        assert_eq!(value["backend"], backend);
        assert_eq!(value["error"]["kind"], "disabled", "{}", out);
        assert!(
            value["error"]["message"]
                .as_str()
                .unwrap()
                .ends_with("is disabled in the server configuration")
        );
    }
}

#[tokio::test]
async fn test_resources_of_disabled_backends() {
    let context = common::start(Config::all_disabled()).await;

    let catalogue = resources::catalogue(&context.toggles());
    assert_eq!(catalogue.len(), 1);
    assert_eq!(catalogue[0].uri, "health://status");

    let text = resources::read(&context, "redis://databases/0/keys")
        .await
        .unwrap();
    assert_eq!(parse(&text)["error"]["kind"], "disabled");

    let err = resources::read(&context, "postgres://nowhere").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_service_info_when_disabled() {
    let context = common::start(Config::all_disabled()).await;
    let service = multidb_mcp_server::McpService::new(context);
    let info = service.get_info();
    assert_eq!(info.server_info.name, "multidb-mcp-server");
    assert!(info.instructions.unwrap().contains("Enabled backends: none"));
}

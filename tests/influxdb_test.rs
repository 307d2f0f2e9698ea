//! Integration tests for the InfluxDB tools.
//!
//! Run against a live InfluxDB 2.x when TEST_INFLUXDB_URL is set, together
//! with TEST_INFLUXDB_TOKEN, TEST_INFLUXDB_ORG and TEST_INFLUXDB_BUCKET.

mod common;

use common::{parse, result, unique_name};
use multidb_mcp_server::config::Config;
use multidb_mcp_server::context::AppContext;
use multidb_mcp_server::tools::{InfluxTools, influxdb};
use std::sync::Arc;

async fn setup() -> Option<Arc<AppContext>> {
    let Some(url) = common::env("TEST_INFLUXDB_URL") else {
        common::skip("TEST_INFLUXDB_URL");
        return None;
    };
    let endpoint = common::endpoint(&url);
    let mut config = Config {
        enable_influxdb: true,
        influxdb_host: endpoint.host,
        influxdb_token: common::env("TEST_INFLUXDB_TOKEN"),
        influxdb_org: common::env("TEST_INFLUXDB_ORG"),
        influxdb_bucket: common::env("TEST_INFLUXDB_BUCKET"),
        ..Config::all_disabled()
    };
    if let Some(port) = endpoint.port {
        config.influxdb_port = port;
    }
    Some(common::start(config).await)
}

#[tokio::test]
async fn test_server_info() {
    let Some(context) = setup().await else { return };
    let info = result(&InfluxTools::new(context.clone()).server_info().await);
    assert_eq!(info["ready"], true);
    context.shutdown().await;
}

#[tokio::test]
async fn test_write_then_read_back() {
    let Some(context) = setup().await else { return };
    let tools = InfluxTools::new(context.clone());
    let measurement = unique_name("it_cpu");

    let out = tools
        .write(influxdb::WriteInput {
            bucket: None,
            measurement: measurement.clone(),
            tags: r#"{"host": "server a"}"#.into(),
            fields: r#"{"usage": 12.5}"#.into(),
            timestamp: None,
        })
        .await;
    result(&out);

    let rows = result(
        &tools
            .sample(influxdb::SampleInput {
                bucket: None,
                measurement: measurement.clone(),
                limit: None,
            })
            .await,
    );
    assert_eq!(rows["count"], 1);
    assert_eq!(rows["rows"][0]["field"], "usage");
    assert_eq!(rows["rows"][0]["value"], 12.5);
    assert_eq!(rows["rows"][0]["tag_host"], "server a");

    let fields = result(
        &tools
            .fields(influxdb::MeasurementInput {
                bucket: None,
                measurement: measurement.clone(),
            })
            .await,
    );
    assert_eq!(fields, serde_json::json!(["usage"]));

    context.shutdown().await;
}

#[tokio::test]
async fn test_bad_fields_rejected_before_write() {
    let Some(context) = setup().await else { return };
    let out = InfluxTools::new(context.clone())
        .write(influxdb::WriteInput {
            bucket: None,
            measurement: "cpu".into(),
            tags: "{}".into(),
            fields: "not json".into(),
            timestamp: None,
        })
        .await;
    assert_eq!(parse(&out)["error"]["kind"], "invalid_argument");
    context.shutdown().await;
}

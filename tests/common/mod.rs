//! Helpers shared by the integration tests.
//!
//! Tests that need a live server read its location from `TEST_*`
//! variables and skip with a notice when they are unset.

#![allow(dead_code)]

use multidb_mcp_server::config::Config;
use multidb_mcp_server::context::AppContext;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Host, port, user and password from a URL such as `redis://:secret@localhost:6379`.
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

pub fn endpoint(raw: &str) -> Endpoint {
    let url = url::Url::parse(raw).expect("test server URL must parse");
    Endpoint {
        host: url.host_str().unwrap_or("localhost").to_string(),
        port: url.port(),
        user: Some(url.username().to_string()).filter(|u| !u.is_empty()),
        password: url.password().map(str::to_string),
    }
}

pub fn skip(var: &str) {
    eprintln!("Skipping: set {} to run this test against a live server", var);
}

pub async fn start(config: Config) -> Arc<AppContext> {
    Arc::new(AppContext::start(&config).await)
}

pub fn parse(envelope: &str) -> JsonValue {
    serde_json::from_str(envelope).expect("tool output must be JSON")
}

/// The `result` of a success envelope; panics with the envelope otherwise.
pub fn result(envelope: &str) -> JsonValue {
    let value = parse(envelope);
    assert!(value.get("error").is_none(), "unexpected error: {}", envelope);
    value["result"].clone()
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

//! InfluxDB v2 backend over the HTTP API.
//!
//! Queries are Flux, sent with `header: true` and no annotations so results
//! come back as plain CSV tables. Writes use line protocol at nanosecond
//! precision.

use crate::db::adapter::{BackendAdapter, ClientHandle};
use crate::db::flux::{self, DEFAULT_RANGE_START};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, InfluxDescriptor, JsonRow};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Serialize)]
pub struct InfluxServerInfo {
    pub status: String,
    pub version: Option<String>,
    pub ready: String,
    pub url: String,
    pub org: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRule {
    #[serde(rename = "type", default)]
    pub rule_type: String,
    #[serde(rename = "everySeconds", default)]
    pub every_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "orgID", default)]
    pub org_id: Option<String>,
    #[serde(rename = "retentionRules", default)]
    pub retention_rules: Vec<RetentionRule>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteSummary {
    pub bucket: String,
    pub line: String,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
struct OrgList {
    #[serde(default)]
    orgs: Vec<OrgEntry>,
}

#[derive(Debug, Deserialize)]
struct OrgEntry {
    id: String,
}

/// HTTP client plus the resolved base URL.
#[derive(Debug, Clone)]
struct InfluxClient {
    http: reqwest::Client,
    base: Url,
}

impl InfluxClient {
    fn endpoint(&self, path: &str) -> DbResult<Url> {
        self.base
            .join(path)
            .map_err(|e| DbError::internal(format!("Invalid InfluxDB endpoint '{}': {}", path, e)))
    }
}

pub struct InfluxBackend {
    descriptor: InfluxDescriptor,
    client: ClientHandle<InfluxClient>,
}

impl InfluxBackend {
    pub fn new(descriptor: InfluxDescriptor) -> Self {
        Self {
            descriptor,
            client: ClientHandle::new(BackendKind::InfluxDb),
        }
    }

    /// The named bucket, or the configured default.
    pub fn resolve_bucket(&self, bucket: Option<&str>) -> DbResult<String> {
        bucket
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .or_else(|| self.descriptor.bucket.clone())
            .ok_or_else(|| {
                DbError::invalid_argument("bucket is required when INFLUXDB_BUCKET is not set")
            })
    }

    fn org(&self) -> DbResult<&str> {
        self.descriptor
            .org
            .as_deref()
            .ok_or_else(|| DbError::configuration("INFLUXDB_ORG must be set for this operation"))
    }

    pub async fn server_info(&self) -> DbResult<InfluxServerInfo> {
        let client = self.client.get().await?;
        let health: JsonValue = client
            .http
            .get(client.endpoint("health")?)
            .send()
            .await?
            .json()
            .await?;
        let ready: JsonValue = client
            .http
            .get(client.endpoint("ready")?)
            .send()
            .await?
            .json()
            .await
            .unwrap_or(JsonValue::Null);

        Ok(InfluxServerInfo {
            status: text_field(&health, "status").unwrap_or_else(|| "unknown".to_string()),
            version: text_field(&health, "version"),
            ready: text_field(&ready, "status").unwrap_or_else(|| "unknown".to_string()),
            url: self.descriptor.display_url(),
            org: self.descriptor.org.clone(),
            bucket: self.descriptor.bucket.clone(),
        })
    }

    /// Buckets visible to the token. When the server refuses the listing,
    /// the configured bucket is reported on its own.
    pub async fn list_buckets(&self) -> DbResult<Vec<BucketInfo>> {
        let client = self.client.get().await?;
        let mut request = client
            .http
            .get(client.endpoint("api/v2/buckets")?)
            .query(&[("limit", "100")]);
        if let Some(org) = &self.descriptor.org {
            request = request.query(&[("org", org)]);
        }

        match check(request.send().await?).await {
            Ok(response) => {
                let mut list: BucketList = response.json().await?;
                list.buckets.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(list.buckets)
            }
            Err(e @ DbError::Backend { .. }) => {
                let Some(bucket) = self.descriptor.bucket.clone() else {
                    return Err(e);
                };
                warn!(error = %e, "Bucket listing refused, reporting configured bucket");
                Ok(vec![BucketInfo {
                    id: None,
                    name: bucket,
                    org_id: None,
                    retention_rules: Vec::new(),
                    created_at: None,
                }])
            }
            Err(e) => Err(e),
        }
    }

    /// Run a Flux query. A query without its own `from(bucket: ...)` gets
    /// one for `bucket` prepended.
    pub async fn query(&self, bucket: &str, query: &str) -> DbResult<Vec<JsonRow>> {
        let records = self.flux(&flux::with_bucket_source(query, bucket)).await?;
        Ok(records.iter().map(flux::to_query_row).collect())
    }

    pub async fn measurements(&self, bucket: &str) -> DbResult<Vec<String>> {
        match self.flux(&flux::measurements_query(bucket)).await {
            Ok(records) => Ok(flux::distinct_values(&records)),
            Err(DbError::Backend { message, .. }) => {
                warn!(error = %message, "schema.measurements failed, falling back to distinct scan");
                let records = self
                    .flux(&flux::measurements_fallback_query(bucket, DEFAULT_RANGE_START))
                    .await?;
                Ok(flux::distinct_values(&records))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fields(&self, bucket: &str, measurement: &str) -> DbResult<Vec<String>> {
        let records = self
            .flux(&flux::fields_query(bucket, measurement, DEFAULT_RANGE_START))
            .await?;
        Ok(flux::distinct_values(&records))
    }

    pub async fn tags(&self, bucket: &str, measurement: &str) -> DbResult<Vec<String>> {
        let records = self
            .flux(&flux::tag_keys_query(bucket, measurement, DEFAULT_RANGE_START))
            .await?;
        Ok(flux::distinct_values(&records)
            .into_iter()
            .filter(|key| !key.starts_with('_'))
            .collect())
    }

    pub async fn tag_values(
        &self,
        bucket: &str,
        measurement: &str,
        tag: &str,
    ) -> DbResult<Vec<String>> {
        let records = self
            .flux(&flux::tag_values_query(bucket, measurement, tag, DEFAULT_RANGE_START))
            .await?;
        Ok(flux::distinct_values(&records))
    }

    pub async fn sample(&self, bucket: &str, measurement: &str, limit: u32) -> DbResult<Vec<JsonRow>> {
        let records = self
            .flux(&flux::sample_query(bucket, measurement, limit, DEFAULT_RANGE_START))
            .await?;
        Ok(records.iter().map(flux::to_query_row).collect())
    }

    /// Write one point.
    pub async fn write(
        &self,
        bucket: &str,
        measurement: &str,
        tags: &Map<String, JsonValue>,
        fields: &Map<String, JsonValue>,
        timestamp: Option<&str>,
    ) -> DbResult<WriteSummary> {
        let line = flux::line_protocol(measurement, tags, fields, timestamp)?;
        let org = self.org()?;
        let client = self.client.get().await?;
        let response = client
            .http
            .post(client.endpoint("api/v2/write")?)
            .query(&[("org", org), ("bucket", bucket), ("precision", "ns")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line.clone())
            .send()
            .await?;
        check(response).await?;

        Ok(WriteSummary {
            bucket: bucket.to_string(),
            line,
        })
    }

    /// Create a bucket in the configured organisation. `retention` is e.g.
    /// `30d`; `infinite` keeps data forever.
    pub async fn create_bucket(&self, name: &str, retention: &str) -> DbResult<BucketInfo> {
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument("bucket name must not be empty"));
        }
        let every_seconds = flux::parse_retention(retention)?;
        let org = self.org()?;
        let client = self.client.get().await?;

        let response = client
            .http
            .get(client.endpoint("api/v2/orgs")?)
            .query(&[("org", org)])
            .send()
            .await?;
        let orgs: OrgList = check(response).await?.json().await?;
        let org_id = orgs
            .orgs
            .into_iter()
            .next()
            .map(|o| o.id)
            .ok_or_else(|| DbError::not_found("Organization", org, Vec::new()))?;

        let retention_rules: Vec<JsonValue> = every_seconds
            .map(|seconds| json!({ "type": "expire", "everySeconds": seconds }))
            .into_iter()
            .collect();
        let response = client
            .http
            .post(client.endpoint("api/v2/buckets")?)
            .json(&json!({
                "orgID": org_id,
                "name": name,
                "retentionRules": retention_rules,
            }))
            .send()
            .await?;
        let created: BucketInfo = check(response).await?.json().await?;
        info!(bucket = %created.name, "InfluxDB bucket created");
        Ok(created)
    }

    /// Delete points between two RFC 3339 instants, optionally filtered by a
    /// delete predicate such as `_measurement="cpu"`.
    pub async fn delete(
        &self,
        bucket: &str,
        start: &str,
        stop: &str,
        predicate: Option<&str>,
    ) -> DbResult<()> {
        for (name, value) in [("start", start), ("stop", stop)] {
            chrono::DateTime::parse_from_rfc3339(value).map_err(|e| {
                DbError::invalid_argument(format!("{} '{}' is not RFC 3339: {}", name, value, e))
            })?;
        }
        let org = self.org()?;
        let client = self.client.get().await?;

        let mut body = json!({ "start": start, "stop": stop });
        if let Some(predicate) = predicate.map(str::trim).filter(|p| !p.is_empty()) {
            body["predicate"] = JsonValue::String(predicate.to_string());
        }
        let response = client
            .http
            .post(client.endpoint("api/v2/delete")?)
            .query(&[("org", org), ("bucket", bucket)])
            .json(&body)
            .send()
            .await?;
        check(response).await?;
        info!(bucket = %bucket, start = %start, stop = %stop, "InfluxDB points deleted");
        Ok(())
    }

    async fn flux(&self, query: &str) -> DbResult<Vec<flux::FluxRecord>> {
        let org = self.org()?;
        let client = self.client.get().await?;
        let response = client
            .http
            .post(client.endpoint("api/v2/query")?)
            .query(&[("org", org)])
            .header("Accept", "application/csv")
            .json(&json!({
                "query": query,
                "type": "flux",
                "dialect": { "header": true, "annotations": [] },
            }))
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        flux::parse_csv(&body)
    }
}

impl BackendAdapter for InfluxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InfluxDb
    }

    fn target(&self) -> String {
        self.descriptor.display_url()
    }

    async fn connect(&self) -> DbResult<()> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.descriptor.token {
            let mut value = HeaderValue::from_str(&format!("Token {}", token))
                .map_err(|_| DbError::configuration("INFLUXDB_TOKEN contains invalid characters"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.descriptor.connect_timeout)
            .build()
            .map_err(|e| DbError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        let client = InfluxClient {
            http,
            base: self.descriptor.base_url()?,
        };

        probe_ready(&client).await?;
        self.client.set(client).await;
        info!(url = %self.descriptor.display_url(), "Connected to InfluxDB");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if self.client.take().await.is_some() {
            info!("Disconnected from InfluxDB");
        }
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        probe_ready(&self.client.get().await?).await
    }
}

async fn probe_ready(client: &InfluxClient) -> DbResult<()> {
    let response = client.http.get(client.endpoint("ready")?).send().await?;
    if response.status().is_success() {
        return Ok(());
    }
    Err(DbError::connection(
        format!("InfluxDB is not ready (HTTP {})", response.status().as_u16()),
        "Check that InfluxDB is running and INFLUXDB_HOST/INFLUXDB_PORT are correct",
    ))
}

/// Pass successful responses through; turn the rest into errors carrying the
/// server's `message`.
async fn check(response: Response) -> DbResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<JsonValue>(&body)
        .ok()
        .and_then(|v| text_field(&v, "message"))
        .unwrap_or(body);
    let message = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        format!("InfluxDB refused the request ({}); check INFLUXDB_TOKEN", message)
    } else {
        message
    };
    Err(DbError::backend(message, Some(status.as_u16().to_string())))
}

fn text_field(value: &JsonValue, name: &str) -> Option<String> {
    value.get(name)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, body_string, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CPU_CSV: &str = "\
,result,table,_start,_stop,_time,_value,_field,_measurement,host\r
,_result,0,2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,2024-01-01T00:10:00Z,23.5,usage,cpu,server1\r
";

    fn descriptor(server: &MockServer) -> InfluxDescriptor {
        let address = server.address();
        InfluxDescriptor {
            host: address.ip().to_string(),
            port: address.port(),
            token: Some("secret".to_string()),
            org: Some("acme".to_string()),
            bucket: Some("metrics".to_string()),
            connect_timeout: Duration::from_secs(2),
        }
    }

    async fn ready(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/ready"))
            .and(header("Authorization", "Token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ready"})))
            .mount(server)
            .await;
    }

    async fn connected(server: &MockServer) -> InfluxBackend {
        ready(server).await;
        let backend = InfluxBackend::new(descriptor(server));
        backend.connect().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let server = MockServer::start().await;
        let backend = InfluxBackend::new(descriptor(&server));
        let err = backend.query("metrics", "|> range(start: -1h)").await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(err.to_string().contains("Not connected to InfluxDB"));
    }

    #[tokio::test]
    async fn test_connect_fails_when_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let backend = InfluxBackend::new(descriptor(&server));
        let err = backend.connect().await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert_eq!(backend.status().await, crate::models::BackendStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_query_prepends_bucket_and_parses_rows() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .and(query_param("org", "acme"))
            .and(body_partial_json(json!({
                "query": "from(bucket: \"metrics\")\n|> range(start: -1h)",
                "type": "flux",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(CPU_CSV))
            .expect(1)
            .mount(&server)
            .await;

        let rows = backend.query("metrics", "|> range(start: -1h)").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["measurement"], "cpu");
        assert_eq!(rows[0]["value"], json!(23.5));
        assert_eq!(rows[0]["tag_host"], "server1");
    }

    #[tokio::test]
    async fn test_query_error_carries_server_message() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"code": "not found", "message": "bucket \"nope\" not found"})),
            )
            .mount(&server)
            .await;

        let err = backend.query("nope", "|> range(start: -1h)").await.unwrap_err();
        assert_eq!(err.kind(), "backend");
        assert!(err.to_string().contains("bucket \"nope\" not found"));
    }

    #[tokio::test]
    async fn test_measurements_fall_back_to_distinct_scan() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .and(body_string_contains("schema.measurements"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "no schema"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .and(body_string_contains("distinct(column: \\\"_measurement\\\")"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(",result,table,_value\r\n,_result,0,mem\r\n,_result,0,cpu\r\n"),
            )
            .mount(&server)
            .await;

        assert_eq!(backend.measurements("metrics").await.unwrap(), vec!["cpu", "mem"]);
    }

    #[tokio::test]
    async fn test_list_buckets_falls_back_to_configured_bucket() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/buckets"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
            .mount(&server)
            .await;

        let buckets = backend.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "metrics");
    }

    #[tokio::test]
    async fn test_list_buckets_sorted() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/buckets"))
            .and(query_param("org", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "buckets": [
                    {"id": "2", "name": "metrics", "retentionRules": [{"type": "expire", "everySeconds": 3600}]},
                    {"id": "1", "name": "_monitoring"},
                ]
            })))
            .mount(&server)
            .await;

        let buckets = backend.list_buckets().await.unwrap();
        assert_eq!(buckets[0].name, "_monitoring");
        assert_eq!(buckets[1].retention_rules[0].every_seconds, 3600);
    }

    #[tokio::test]
    async fn test_write_sends_line_protocol() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/write"))
            .and(query_param("bucket", "metrics"))
            .and(query_param("precision", "ns"))
            .and(body_string("cpu,host=a usage=0.5 1000"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let tags = json!({"host": "a"});
        let fields = json!({"usage": 0.5});
        let summary = backend
            .write(
                "metrics",
                "cpu",
                tags.as_object().unwrap(),
                fields.as_object().unwrap(),
                Some("1000"),
            )
            .await
            .unwrap();
        assert_eq!(summary.line, "cpu,host=a usage=0.5 1000");
    }

    #[tokio::test]
    async fn test_create_bucket_resolves_org_and_sets_retention() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/orgs"))
            .and(query_param("org", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orgs": [{"id": "org1"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/buckets"))
            .and(body_partial_json(json!({
                "orgID": "org1",
                "name": "fresh",
                "retentionRules": [{"type": "expire", "everySeconds": 2592000}],
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "b1",
                "name": "fresh",
                "orgID": "org1",
                "retentionRules": [{"type": "expire", "everySeconds": 2592000}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let bucket = backend.create_bucket("fresh", "30d").await.unwrap();
        assert_eq!(bucket.id.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_delete_validates_range_before_any_request() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        let err = backend
            .delete("metrics", "yesterday", "2024-01-02T00:00:00Z", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_delete_posts_predicate() {
        let server = MockServer::start().await;
        let backend = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/delete"))
            .and(query_param("bucket", "metrics"))
            .and(body_partial_json(json!({"predicate": "_measurement=\"cpu\""})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend
            .delete(
                "metrics",
                "2024-01-01T00:00:00Z",
                "2024-01-02T00:00:00Z",
                Some("_measurement=\"cpu\""),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_resolve_bucket() {
        let descriptor = InfluxDescriptor {
            host: "localhost".to_string(),
            port: 8086,
            token: None,
            org: None,
            bucket: None,
            connect_timeout: Duration::from_secs(1),
        };
        let backend = InfluxBackend::new(descriptor);
        assert_eq!(backend.resolve_bucket(Some("x")).unwrap(), "x");
        assert_eq!(backend.resolve_bucket(Some(" ")).unwrap_err().kind(), "invalid_argument");
    }
}

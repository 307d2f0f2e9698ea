//! InfluxDB tools.

use crate::context::AppContext;
use crate::db::flux::DEFAULT_SAMPLE_LIMIT;
use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use crate::tools::dispatch::{Call, dispatch_with, parse_json_arg};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

fn empty_object() -> String {
    "{}".to_string()
}

fn default_retention() -> String {
    "30d".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct BucketInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MeasurementInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
    pub measurement: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TagValuesInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
    pub measurement: String,
    /// Tag key
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// Flux query. `from(bucket: ...)` is prepended when missing
    pub query: String,
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SampleInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
    pub measurement: String,
    /// Maximum rows. Default: 10
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriteInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
    pub measurement: String,
    /// JSON object of tag key/values, e.g. {"host": "server1"}
    #[serde(default = "empty_object")]
    pub tags: String,
    /// JSON object of field key/values, e.g. {"usage": 0.5}
    pub fields: String,
    /// Nanosecond epoch or RFC 3339. Default: server time
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateBucketInput {
    pub bucket_name: String,
    /// Retention such as "30d", "12h" or "infinite". Default: "30d"
    #[serde(default = "default_retention")]
    pub retention_period: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteInput {
    /// Bucket name. Default: INFLUXDB_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,
    /// RFC 3339 start, e.g. "2024-01-01T00:00:00Z"
    pub start: String,
    /// RFC 3339 stop
    pub stop: String,
    /// Delete predicate, e.g. _measurement="cpu"
    #[serde(default)]
    pub predicate: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RowsOutput {
    pub count: usize,
    pub rows: Vec<crate::models::JsonRow>,
}

#[derive(Debug, Serialize)]
pub struct DeletedOutput {
    pub bucket: String,
    pub start: String,
    pub stop: String,
}

pub struct InfluxTools {
    context: Arc<AppContext>,
}

impl InfluxTools {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    fn bucket(&self, requested: Option<&str>) -> DbResult<String> {
        match self.context.influxdb.get() {
            Some(influx) => influx.resolve_bucket(requested),
            None => Ok(requested.unwrap_or_default().to_string()),
        }
    }

    fn call(operation: &'static str, bucket: &DbResult<String>) -> Call {
        let call = Call::new(BackendKind::InfluxDb, operation);
        match bucket {
            Ok(b) if !b.is_empty() => call.target(b),
            _ => call,
        }
    }

    fn timeout(&self) -> std::time::Duration {
        self.context.operation_timeout()
    }

    pub async fn server_info(&self) -> String {
        dispatch_with(
            &self.context.influxdb,
            Call::new(BackendKind::InfluxDb, "server_info"),
            self.timeout(),
            Ok(()),
            |influx, ()| async move { influx.server_info().await },
        )
        .await
    }

    pub async fn list_buckets(&self) -> String {
        dispatch_with(
            &self.context.influxdb,
            Call::new(BackendKind::InfluxDb, "list_buckets"),
            self.timeout(),
            Ok(()),
            |influx, ()| async move { influx.list_buckets().await },
        )
        .await
    }

    pub async fn list_measurements(&self, input: BucketInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        dispatch_with(
            &self.context.influxdb,
            Self::call("list_measurements", &bucket),
            self.timeout(),
            bucket,
            |influx, bucket| async move { influx.measurements(&bucket).await },
        )
        .await
    }

    pub async fn fields(&self, input: MeasurementInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let measurement = input.measurement;
        dispatch_with(
            &self.context.influxdb,
            Self::call("get_fields", &bucket),
            self.timeout(),
            bucket,
            |influx, bucket| async move { influx.fields(&bucket, &measurement).await },
        )
        .await
    }

    pub async fn tags(&self, input: MeasurementInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let measurement = input.measurement;
        dispatch_with(
            &self.context.influxdb,
            Self::call("get_tags", &bucket),
            self.timeout(),
            bucket,
            |influx, bucket| async move { influx.tags(&bucket, &measurement).await },
        )
        .await
    }

    pub async fn tag_values(&self, input: TagValuesInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let (measurement, tag) = (input.measurement, input.tag);
        dispatch_with(
            &self.context.influxdb,
            Self::call("get_tag_values", &bucket),
            self.timeout(),
            bucket,
            |influx, bucket| async move { influx.tag_values(&bucket, &measurement, &tag).await },
        )
        .await
    }

    pub async fn query(&self, input: QueryInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let query = input.query;
        dispatch_with(
            &self.context.influxdb,
            Self::call("query", &bucket),
            self.timeout(),
            bucket,
            |influx, bucket| async move {
                let rows = influx.query(&bucket, &query).await?;
                Ok(RowsOutput {
                    count: rows.len(),
                    rows,
                })
            },
        )
        .await
    }

    pub async fn sample(&self, input: SampleInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let measurement = input.measurement;
        let limit = input.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
        let call = Self::call("sample_data", &bucket);
        let args = bucket.and_then(|bucket| {
            if limit == 0 {
                return Err(DbError::invalid_argument("limit must be positive"));
            }
            Ok(bucket)
        });
        dispatch_with(
            &self.context.influxdb,
            call,
            self.timeout(),
            args,
            |influx, bucket| async move {
                let rows = influx.sample(&bucket, &measurement, limit).await?;
                Ok(RowsOutput {
                    count: rows.len(),
                    rows,
                })
            },
        )
        .await
    }

    pub async fn write(&self, input: WriteInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let call = Self::call("write_data", &bucket);
        let args = bucket.and_then(|bucket| {
            let tags: Map<String, JsonValue> = parse_json_arg("tags", &input.tags)?;
            let fields: Map<String, JsonValue> = parse_json_arg("fields", &input.fields)?;
            Ok((bucket, tags, fields))
        });
        let (measurement, timestamp) = (input.measurement, input.timestamp);
        dispatch_with(
            &self.context.influxdb,
            call,
            self.timeout(),
            args,
            |influx, (bucket, tags, fields)| async move {
                influx
                    .write(&bucket, &measurement, &tags, &fields, timestamp.as_deref())
                    .await
            },
        )
        .await
    }

    pub async fn create_bucket(&self, input: CreateBucketInput) -> String {
        let call = Call::new(BackendKind::InfluxDb, "create_bucket").target(&input.bucket_name);
        dispatch_with(
            &self.context.influxdb,
            call,
            self.timeout(),
            Ok(()),
            |influx, ()| async move {
                influx
                    .create_bucket(&input.bucket_name, &input.retention_period)
                    .await
            },
        )
        .await
    }

    pub async fn delete(&self, input: DeleteInput) -> String {
        let bucket = self.bucket(input.bucket.as_deref());
        let call = Self::call("delete_data", &bucket);
        dispatch_with(
            &self.context.influxdb,
            call,
            self.timeout(),
            bucket,
            |influx, bucket| async move {
                influx
                    .delete(&bucket, &input.start, &input.stop, input.predicate.as_deref())
                    .await?;
                Ok(DeletedOutput {
                    bucket,
                    start: input.start,
                    stop: input.stop,
                })
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Slot;
    use crate::db::InfluxBackend;
    use crate::models::InfluxDescriptor;
    use serde_json::json;
    use std::time::Duration;

    fn parse(out: &str) -> JsonValue {
        serde_json::from_str(out).unwrap()
    }

    fn disabled_tools() -> InfluxTools {
        InfluxTools::new(Arc::new(AppContext::disabled(Duration::from_secs(1))))
    }

    fn unconnected_tools(bucket: Option<&str>) -> InfluxTools {
        let mut context = AppContext::disabled(Duration::from_secs(1));
        context.influxdb = Slot::Enabled(Arc::new(InfluxBackend::new(InfluxDescriptor {
            host: "localhost".to_string(),
            port: 8086,
            token: None,
            org: Some("acme".to_string()),
            bucket: bucket.map(str::to_string),
            connect_timeout: Duration::from_secs(1),
        })));
        InfluxTools::new(Arc::new(context))
    }

    #[test]
    fn test_write_input_defaults() {
        let input: WriteInput =
            serde_json::from_value(json!({"measurement": "cpu", "fields": "{\"v\": 1}"})).unwrap();
        assert_eq!(input.tags, "{}");
        assert!(input.timestamp.is_none());

        let input: CreateBucketInput =
            serde_json::from_value(json!({"bucket_name": "fresh"})).unwrap();
        assert_eq!(input.retention_period, "30d");
    }

    #[tokio::test]
    async fn test_write_rejects_bad_fields_before_backend() {
        let out = parse(
            &unconnected_tools(Some("metrics"))
                .write(WriteInput {
                    bucket: None,
                    measurement: "cpu".into(),
                    tags: "{}".into(),
                    fields: "usage=1".into(),
                    timestamp: None,
                })
                .await,
        );
        assert_eq!(out["target"], "metrics");
        assert_eq!(out["error"]["kind"], "invalid_argument");
        assert!(out["error"]["message"].as_str().unwrap().contains("fields"));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_argument_error() {
        let out = parse(
            &unconnected_tools(None)
                .list_measurements(BucketInput::default())
                .await,
        );
        assert_eq!(out["error"]["kind"], "invalid_argument");
        assert!(out.get("target").is_none());
    }

    #[tokio::test]
    async fn test_unconnected_backend_reports_connection_error() {
        let out = parse(
            &unconnected_tools(Some("metrics"))
                .query(QueryInput {
                    query: "|> range(start: -1h)".into(),
                    bucket: None,
                })
                .await,
        );
        assert_eq!(out["error"]["kind"], "connection");
    }

    #[tokio::test]
    async fn test_every_tool_reports_disabled() {
        let tools = disabled_tools();
        let measurement = || MeasurementInput {
            bucket: None,
            measurement: "cpu".into(),
        };
        let outputs = vec![
            tools.server_info().await,
            tools.list_buckets().await,
            tools.list_measurements(BucketInput::default()).await,
            tools.fields(measurement()).await,
            tools.tags(measurement()).await,
            tools
                .tag_values(TagValuesInput {
                    bucket: None,
                    measurement: "cpu".into(),
                    tag: "host".into(),
                })
                .await,
            tools
                .sample(SampleInput {
                    bucket: None,
                    measurement: "cpu".into(),
                    limit: None,
                })
                .await,
            tools
                .create_bucket(CreateBucketInput {
                    bucket_name: "b".into(),
                    retention_period: "1d".into(),
                })
                .await,
            tools
                .delete(DeleteInput {
                    bucket: None,
                    start: "2024-01-01T00:00:00Z".into(),
                    stop: "2024-01-02T00:00:00Z".into(),
                    predicate: None,
                })
                .await,
        ];
        for out in outputs {
            let value = parse(&out);
            assert_eq!(value["backend"], "influxdb");
            assert_eq!(value["error"]["kind"], "disabled");
        }
    }
}

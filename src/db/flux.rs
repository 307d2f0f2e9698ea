//! Flux query text, annotated-CSV results and line protocol.
//!
//! Everything here is pure string work so it can be tested without a server.

use crate::error::{DbError, DbResult};
use crate::models::JsonRow;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Range used by metadata and sample queries.
pub const DEFAULT_RANGE_START: &str = "-1h";
/// Rows returned by sample queries.
pub const DEFAULT_SAMPLE_LIMIT: u32 = 10;

/// One CSV record keyed by column name.
pub type FluxRecord = BTreeMap<String, String>;

/// Escape text for a Flux string literal.
pub fn flux_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Prefix `from(bucket: ...)` unless the query already picks its source.
pub fn with_bucket_source(query: &str, bucket: &str) -> String {
    if query.contains("from(bucket:") {
        query.to_string()
    } else {
        format!("from(bucket: {})\n{}", flux_string(bucket), query)
    }
}

pub fn measurements_query(bucket: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\nschema.measurements(bucket: {})",
        flux_string(bucket)
    )
}

pub fn measurements_fallback_query(bucket: &str, start: &str) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: {})\n  |> keep(columns: [\"_measurement\"])\n  |> distinct(column: \"_measurement\")",
        flux_string(bucket),
        start
    )
}

pub fn fields_query(bucket: &str, measurement: &str, start: &str) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: {})\n  |> filter(fn: (r) => r._measurement == {})\n  |> keep(columns: [\"_field\"])\n  |> distinct(column: \"_field\")",
        flux_string(bucket),
        start,
        flux_string(measurement)
    )
}

pub fn tag_keys_query(bucket: &str, measurement: &str, start: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\nschema.tagKeys(bucket: {}, predicate: (r) => r._measurement == {}, start: {})",
        flux_string(bucket),
        flux_string(measurement),
        start
    )
}

pub fn tag_values_query(bucket: &str, measurement: &str, tag: &str, start: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\nschema.tagValues(bucket: {}, tag: {}, predicate: (r) => r._measurement == {}, start: {})",
        flux_string(bucket),
        flux_string(tag),
        flux_string(measurement),
        start
    )
}

pub fn sample_query(bucket: &str, measurement: &str, limit: u32, start: &str) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: {})\n  |> filter(fn: (r) => r._measurement == {})\n  |> limit(n: {})",
        flux_string(bucket),
        start,
        flux_string(measurement),
        limit
    )
}

/// Parse a Flux CSV response requested with `header: true` and no
/// annotations. A row whose second column is `result` is a header row and
/// starts a new table.
pub fn parse_csv(body: &str) -> DbResult<Vec<FluxRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut header: Option<Vec<String>> = None;
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        if row.get(1) == Some("result") {
            header = Some(row.iter().map(str::to_string).collect());
            continue;
        }
        let Some(columns) = &header else {
            return Err(DbError::backend(
                "Flux response has data before its header row",
                None,
            ));
        };
        records.push(
            columns
                .iter()
                .zip(row.iter())
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        );
    }
    Ok(records)
}

/// Distinct non-empty `_value`s, sorted.
pub fn distinct_values(records: &[FluxRecord]) -> Vec<String> {
    let mut values: Vec<String> = records
        .iter()
        .filter_map(|r| r.get("_value"))
        .filter(|v| !v.is_empty())
        .cloned()
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Row shape returned by queries: time, measurement, field, value and one
/// `tag_<name>` entry per non-underscore column.
pub fn to_query_row(record: &FluxRecord) -> JsonRow {
    let column = |name: &str| {
        record
            .get(name)
            .filter(|v| !v.is_empty())
            .map(|v| JsonValue::String(v.clone()))
            .unwrap_or(JsonValue::Null)
    };

    let mut row = Map::new();
    row.insert("time".to_string(), column("_time"));
    row.insert("measurement".to_string(), column("_measurement"));
    row.insert("field".to_string(), column("_field"));
    row.insert(
        "value".to_string(),
        record
            .get("_value")
            .map(|v| scalar(v))
            .unwrap_or(JsonValue::Null),
    );

    for (name, value) in record {
        if name.is_empty() || name.starts_with('_') || name == "result" || name == "table" {
            continue;
        }
        row.insert(format!("tag_{}", name), JsonValue::String(value.clone()));
    }
    row
}

/// Numbers stay numbers, everything else stays text.
fn scalar(raw: &str) -> JsonValue {
    if raw.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return JsonValue::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return JsonValue::Number(n);
        }
    }
    JsonValue::String(raw.to_string())
}

// =============================================================================
// Line protocol
// =============================================================================

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn tag_value(key: &str, value: &JsonValue) -> DbResult<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Ok(escape_key(s)),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(DbError::invalid_argument(format!(
            "tag '{}' must be a non-empty string, number or boolean",
            key
        ))),
    }
}

fn field_value(key: &str, value: &JsonValue) -> DbResult<String> {
    match value {
        JsonValue::String(s) => Ok(format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"")
        )),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(DbError::invalid_argument(format!(
            "field '{}' must be a string, number or boolean",
            key
        ))),
    }
}

/// Nanosecond timestamp from digits or an RFC 3339 string.
pub fn timestamp_nanos(raw: &str) -> DbResult<i64> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse()
            .map_err(|e| DbError::invalid_argument(format!("Invalid timestamp '{}': {}", raw, e)));
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| DbError::invalid_argument(format!("Invalid timestamp '{}': {}", raw, e)))?
        .timestamp_nanos_opt()
        .ok_or_else(|| DbError::invalid_argument(format!("Timestamp '{}' is out of range", raw)))
}

/// Build one line of line protocol. Numbers are written as floats.
pub fn line_protocol(
    measurement: &str,
    tags: &Map<String, JsonValue>,
    fields: &Map<String, JsonValue>,
    timestamp: Option<&str>,
) -> DbResult<String> {
    if measurement.trim().is_empty() {
        return Err(DbError::invalid_argument("measurement must not be empty"));
    }
    if fields.is_empty() {
        return Err(DbError::invalid_argument("at least one field is required"));
    }

    let mut line = escape_measurement(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&tag_value(key, value)?);
    }

    let fields = fields
        .iter()
        .map(|(key, value)| Ok(format!("{}={}", escape_key(key), field_value(key, value)?)))
        .collect::<DbResult<Vec<_>>>()?;
    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(ts) = timestamp.map(str::trim).filter(|t| !t.is_empty()) {
        line.push(' ');
        line.push_str(&timestamp_nanos(ts)?.to_string());
    }
    Ok(line)
}

/// Retention like `30d`, `12h`, `90m`, `3600s`, `2w`. `infinite` (or `0`)
/// means no expiry rule.
pub fn parse_retention(raw: &str) -> DbResult<Option<u64>> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() || raw == "infinite" || raw == "inf" || raw == "0" {
        return Ok(None);
    }
    let invalid = || {
        DbError::invalid_argument(format!(
            "Invalid retention period '{}'; use e.g. 30d, 12h, 90m or infinite",
            raw
        ))
    };

    let split = raw.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (amount, unit) = raw.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;
    let unit_seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(invalid()),
    };
    match amount.checked_mul(unit_seconds) {
        Some(0) => Ok(None),
        Some(seconds) => Ok(Some(seconds)),
        None => Err(invalid()),
    }
}

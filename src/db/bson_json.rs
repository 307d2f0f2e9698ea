//! JSON <-> BSON conversion for request arguments and results.
//!
//! Inputs accept the two extended-JSON forms callers actually type:
//! `{"$oid": "<24 hex>"}` and `{"$date": "<RFC 3339>" | <millis>}`.
//! Outputs render ObjectIds as hex strings and dates as RFC 3339 so results
//! read as plain JSON.

use crate::db::types::encode_binary_value;
use crate::error::{DbError, DbResult};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::{Map, Value as JsonValue};

/// Parse a JSON object argument into a document.
pub fn parse_document(text: &str, argument: &str) -> DbResult<Document> {
    let value: JsonValue = serde_json::from_str(text).map_err(|e| {
        DbError::invalid_argument(format!("{} is not valid JSON: {}", argument, e))
    })?;
    json_to_document(value, argument)
}

/// Parse a JSON array of stage objects into an aggregation pipeline.
pub fn parse_pipeline(text: &str) -> DbResult<Vec<Document>> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| DbError::invalid_argument(format!("pipeline is not valid JSON: {}", e)))?;
    match value {
        JsonValue::Array(stages) => stages
            .into_iter()
            .enumerate()
            .map(|(idx, stage)| json_to_document(stage, &format!("pipeline stage {}", idx)))
            .collect(),
        _ => Err(DbError::invalid_argument("pipeline must be a JSON array")),
    }
}

pub fn json_to_document(value: JsonValue, argument: &str) -> DbResult<Document> {
    match json_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        _ => Err(DbError::invalid_argument(format!(
            "{} must be a JSON object",
            argument
        ))),
    }
}

pub fn json_to_bson(value: JsonValue) -> DbResult<Bson> {
    Ok(match value {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(b) => Bson::Boolean(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(i),
                }
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Bson::String(s),
        JsonValue::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(json_to_bson)
                .collect::<DbResult<Vec<_>>>()?,
        ),
        JsonValue::Object(map) => {
            if let Some(special) = extended_json(&map)? {
                return Ok(special);
            }
            let mut doc = Document::new();
            for (key, value) in map {
                doc.insert(key, json_to_bson(value)?);
            }
            Bson::Document(doc)
        }
    })
}

/// `{"$oid": ..}` and `{"$date": ..}` single-key objects.
fn extended_json(map: &Map<String, JsonValue>) -> DbResult<Option<Bson>> {
    if map.len() != 1 {
        return Ok(None);
    }
    if let Some(oid) = map.get("$oid") {
        let hex = oid
            .as_str()
            .ok_or_else(|| DbError::invalid_argument("$oid must be a string"))?;
        let oid = ObjectId::parse_str(hex)
            .map_err(|e| DbError::invalid_argument(format!("Invalid ObjectId '{}': {}", hex, e)))?;
        return Ok(Some(Bson::ObjectId(oid)));
    }
    if let Some(date) = map.get("$date") {
        let millis = match date {
            JsonValue::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|e| DbError::invalid_argument(format!("Invalid $date '{}': {}", s, e)))?
                .timestamp_millis(),
            JsonValue::Number(n) => n
                .as_i64()
                .ok_or_else(|| DbError::invalid_argument("$date millis must be an integer"))?,
            _ => {
                return Err(DbError::invalid_argument(
                    "$date must be an RFC 3339 string or epoch milliseconds",
                ));
            }
        };
        return Ok(Some(Bson::DateTime(bson::DateTime::from_millis(millis))));
    }
    Ok(None)
}

pub fn bson_to_json(value: Bson) -> JsonValue {
    match value {
        Bson::Null | Bson::Undefined => JsonValue::Null,
        Bson::Boolean(b) => JsonValue::Bool(b),
        Bson::Int32(i) => JsonValue::from(i),
        Bson::Int64(i) => JsonValue::from(i),
        Bson::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        Bson::String(s) => JsonValue::String(s),
        Bson::ObjectId(oid) => JsonValue::String(oid.to_hex()),
        Bson::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            match chrono::DateTime::from_timestamp_millis(millis) {
                Some(utc) => JsonValue::String(utc.to_rfc3339()),
                None => JsonValue::from(millis),
            }
        }
        Bson::Binary(binary) => encode_binary_value(&binary.bytes),
        Bson::Array(items) => JsonValue::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        other => JsonValue::String(other.to_string()),
    }
}

pub fn document_to_json(doc: Document) -> JsonValue {
    JsonValue::Object(
        doc.into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect(),
    )
}

/// BSON type alias as used by `$type`.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Decimal128(_) => "decimal",
        _ => "other",
    }
}

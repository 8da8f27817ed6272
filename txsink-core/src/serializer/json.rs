//! JSON object encoding: one object per row, keyed by field name.

use std::sync::Arc;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Number};

use crate::error::{Error, Result};
use crate::row::{Row, RowType, SqlType, Value};
use crate::serializer::text::{self, DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT};

pub(crate) fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(v) => serde_json::Value::Bool(*v),
        Value::TinyInt(v) => serde_json::Value::from(*v),
        Value::SmallInt(v) => serde_json::Value::from(*v),
        Value::Int(v) => serde_json::Value::from(*v),
        Value::BigInt(v) => serde_json::Value::from(*v),
        Value::Float(v) => float_to_json(f64::from(*v))?,
        Value::Double(v) => float_to_json(*v)?,
        Value::String(v) => serde_json::Value::String(v.clone()),
        Value::Bytes(v) => serde_json::Value::String(BASE64_STANDARD.encode(v)),
        Value::Date(v) => serde_json::Value::String(v.format(DATE_FORMAT).to_string()),
        Value::Time(v) => serde_json::Value::String(v.format(TIME_FORMAT).to_string()),
        Value::Timestamp(v) => serde_json::Value::String(v.format(TIMESTAMP_FORMAT).to_string()),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(value_to_json).collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (key, value) in entries {
                if key.is_null() {
                    return Err(Error::Serialization(
                        "map keys must not be null".to_string(),
                    ));
                }
                object.insert(text::value_to_text(key)?, value_to_json(value)?);
            }
            serde_json::Value::Object(object)
        }
    };
    Ok(json)
}

fn float_to_json(v: f64) -> Result<serde_json::Value> {
    Number::from_f64(v)
        .map(serde_json::Value::Number)
        .ok_or_else(|| Error::Serialization(format!("{v} cannot be represented in JSON")))
}

pub(crate) fn json_to_value(json: &serde_json::Value, data_type: &SqlType) -> Result<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || Error::Serialization(format!("expected {data_type}, got {json}"));

    let value = match data_type {
        SqlType::Null => Value::Null,
        SqlType::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
        SqlType::TinyInt => Value::TinyInt(
            json.as_i64()
                .and_then(|v| i8::try_from(v).ok())
                .ok_or_else(mismatch)?,
        ),
        SqlType::SmallInt => Value::SmallInt(
            json.as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .ok_or_else(mismatch)?,
        ),
        SqlType::Int => Value::Int(
            json.as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(mismatch)?,
        ),
        SqlType::BigInt => Value::BigInt(json.as_i64().ok_or_else(mismatch)?),
        SqlType::Float => Value::Float(json.as_f64().ok_or_else(mismatch)? as f32),
        SqlType::Double => Value::Double(json.as_f64().ok_or_else(mismatch)?),
        SqlType::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        SqlType::Bytes => {
            let encoded = json.as_str().ok_or_else(mismatch)?;
            let decoded = BASE64_STANDARD
                .decode(encoded)
                .map_err(|e| Error::Serialization(format!("invalid base64 bytes: {e}")))?;
            Value::Bytes(Bytes::from(decoded))
        }
        SqlType::Date => {
            let s = json.as_str().ok_or_else(mismatch)?;
            Value::Date(NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| mismatch())?)
        }
        SqlType::Time => {
            let s = json.as_str().ok_or_else(mismatch)?;
            Value::Time(NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(|_| mismatch())?)
        }
        SqlType::Timestamp => {
            let s = json.as_str().ok_or_else(mismatch)?;
            Value::Timestamp(
                NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|_| mismatch())?,
            )
        }
        SqlType::Array(element) => Value::Array(
            json.as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(|item| json_to_value(item, element))
                .collect::<Result<Vec<_>>>()?,
        ),
        SqlType::Map(key_type, value_type) => Value::Map(
            json.as_object()
                .ok_or_else(mismatch)?
                .iter()
                .map(|(k, v)| {
                    Ok((
                        text::parse_text(k, key_type)?,
                        json_to_value(v, value_type)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    Ok(value)
}

#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub(crate) fn encode<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> Result<Vec<u8>> {
        let mut object = Map::new();
        for (name, value) in fields {
            object.insert(name.to_string(), value_to_json(value)?);
        }
        Ok(serde_json::to_vec(&serde_json::Value::Object(object))?)
    }
}

/// Reads JSON objects back into rows. Fields missing from the object are null, unknown keys are
/// ignored.
#[derive(Debug, Clone)]
pub struct JsonDeserializer {
    row_type: Arc<RowType>,
}

impl JsonDeserializer {
    pub fn new(row_type: Arc<RowType>) -> Self {
        Self { row_type }
    }

    pub fn deserialize(&self, line: &str) -> Result<Row> {
        let parsed: serde_json::Value = serde_json::from_str(line)?;
        let object = parsed.as_object().ok_or_else(|| {
            Error::Serialization(format!("expected a JSON object per row, got {parsed}"))
        })?;
        let values = self
            .row_type
            .fields()
            .iter()
            .map(|field| match object.get(&field.name) {
                Some(json) => json_to_value(json, &field.data_type),
                None => Ok(Value::Null),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Field;

    #[test]
    fn test_encode_object() {
        let serializer = JsonSerializer;
        let id = Value::BigInt(1);
        let payload = Value::Bytes(Bytes::from_static(b"hi"));
        let encoded = serializer
            .encode([("id", &id), ("payload", &payload)])
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(parsed, serde_json::json!({"id": 1, "payload": "aGk="}));
    }

    #[test]
    fn test_non_finite_float_fails() {
        let serializer = JsonSerializer;
        let nan = Value::Double(f64::NAN);
        assert!(matches!(
            serializer.encode([("x", &nan)]),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_deserialize_object() {
        let row_type = Arc::new(
            RowType::new(vec![
                Field::new("id", SqlType::Int),
                Field::new("tags", "array<string>".parse().unwrap()),
                Field::new("missing", SqlType::String),
            ])
            .unwrap(),
        );
        let deserializer = JsonDeserializer::new(row_type);
        let row = deserializer
            .deserialize(r#"{"id": 3, "tags": ["a", "b"], "extra": true}"#)
            .unwrap();
        assert_eq!(
            row,
            Row::new(vec![
                Value::Int(3),
                Value::Array(vec![Value::from("a"), Value::from("b")]),
                Value::Null,
            ])
        );

        assert!(deserializer.deserialize("[1, 2]").is_err());
        assert!(deserializer.deserialize(r#"{"id": "three"}"#).is_err());
    }
}

//! Native rows carry the broker record themselves in five fixed control columns. The layout is
//! resolved and type-checked once, when the serializer is built.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::record::SerializedRecord;
use crate::row::{Row, RowType, SqlType, Value};

pub const HEADERS: &str = "headers";
pub const KEY: &str = "key";
pub const PARTITION: &str = "partition";
pub const TIMESTAMP: &str = "timestamp";
pub const VALUE: &str = "value";

/// The control columns a native row type must contain, with their required types.
pub fn native_schema() -> Vec<(&'static str, SqlType)> {
    vec![
        (
            HEADERS,
            SqlType::Map(Box::new(SqlType::String), Box::new(SqlType::String)),
        ),
        (KEY, SqlType::Bytes),
        (PARTITION, SqlType::Int),
        (TIMESTAMP, SqlType::BigInt),
        (VALUE, SqlType::Bytes),
    ]
}

/// Positions of the control columns in the row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NativeLayout {
    headers: usize,
    key: usize,
    partition: usize,
    timestamp: usize,
    value: usize,
}

impl NativeLayout {
    pub(crate) fn new(row_type: &RowType) -> Result<Self> {
        let mut positions = Vec::with_capacity(5);
        for (name, expected) in native_schema() {
            let field = row_type
                .index_of(name)
                .and_then(|idx| row_type.field(idx).map(|field| (idx, field)));
            let Some((idx, field)) = field else {
                return Err(Error::Config(format!(
                    "Field name {{ {name} }} is not found!"
                )));
            };
            if field.data_type != expected {
                return Err(Error::Config(format!(
                    "Field name {{ {name} }} unsupported sql type {{ {} }} !",
                    field.data_type
                )));
            }
            positions.push(idx);
        }

        match positions[..] {
            [headers, key, partition, timestamp, value] => Ok(Self {
                headers,
                key,
                partition,
                timestamp,
                value,
            }),
            _ => Err(Error::Config(
                "native schema must resolve five control fields".to_string(),
            )),
        }
    }

    /// Builds the record from the control columns. The partition is left unset when the row
    /// does not carry one.
    pub(crate) fn extract(&self, row: &Row) -> Result<SerializedRecord> {
        let headers = match row.get(self.headers) {
            Some(Value::Map(entries)) => {
                let mut headers = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    match (key, value) {
                        (Value::String(k), Value::String(v)) => {
                            headers.insert(k.clone(), v.clone());
                        }
                        (Value::String(k), Value::Null) => {
                            headers.insert(k.clone(), String::new());
                        }
                        _ => {
                            return Err(Error::Serialization(format!(
                                "header entries must be strings, got {key:?} => {value:?}"
                            )));
                        }
                    }
                }
                headers
            }
            Some(Value::Null) | None => HashMap::new(),
            Some(other) => return Err(unexpected(HEADERS, other)),
        };

        let key = match row.get(self.key) {
            Some(Value::Bytes(key)) => Some(key.clone()),
            Some(Value::Null) | None => None,
            Some(other) => return Err(unexpected(KEY, other)),
        };

        let partition = match row.get(self.partition) {
            Some(Value::Int(partition)) => Some(*partition),
            Some(Value::Null) | None => None,
            Some(other) => return Err(unexpected(PARTITION, other)),
        };

        let timestamp = match row.get(self.timestamp) {
            Some(Value::BigInt(timestamp)) => Some(*timestamp),
            Some(Value::Null) | None => None,
            Some(other) => return Err(unexpected(TIMESTAMP, other)),
        };

        let value = match row.get(self.value) {
            Some(Value::Bytes(value)) => value.clone(),
            Some(Value::Null) | None => Bytes::new(),
            Some(other) => return Err(unexpected(VALUE, other)),
        };

        Ok(SerializedRecord {
            key,
            value,
            headers,
            partition,
            timestamp,
        })
    }
}

fn unexpected(name: &str, value: &Value) -> Error {
    Error::Serialization(format!("native field {name} holds unsupported value {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Field;

    fn native_row_type() -> RowType {
        let mut fields: Vec<Field> = native_schema()
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type))
            .collect();
        fields.insert(0, Field::new("extra", SqlType::String));
        RowType::new(fields).unwrap()
    }

    #[test]
    fn test_layout_accepts_superset() {
        let layout = NativeLayout::new(&native_row_type()).unwrap();
        assert_eq!(layout.headers, 1);
        assert_eq!(layout.value, 5);
    }

    #[test]
    fn test_layout_reports_missing_field() {
        let row_type = RowType::new(vec![Field::new(HEADERS, native_schema()[0].1.clone())])
            .unwrap();
        let err = NativeLayout::new(&row_type).unwrap_err();
        assert_eq!(err.to_string(), "Config Error - Field name { key } is not found!");
    }

    #[test]
    fn test_layout_reports_type_mismatch() {
        let fields = native_schema()
            .into_iter()
            .map(|(name, data_type)| {
                if name == PARTITION {
                    Field::new(name, SqlType::BigInt)
                } else {
                    Field::new(name, data_type)
                }
            })
            .collect();
        let err = NativeLayout::new(&RowType::new(fields).unwrap()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Config Error - Field name { partition } unsupported sql type { bigint } !"
        );
    }

    #[test]
    fn test_extract() {
        let layout = NativeLayout::new(&native_row_type()).unwrap();
        let row = Row::new(vec![
            Value::from("ignored"),
            Value::Map(vec![(Value::from("trace"), Value::from("abc"))]),
            Value::Null,
            Value::Int(2),
            Value::BigInt(1_700_000_000_000),
            Value::Bytes(Bytes::from_static(b"payload")),
        ]);
        let record = layout.extract(&row).unwrap();
        assert_eq!(record.key, None);
        assert_eq!(record.partition, Some(2));
        assert_eq!(record.timestamp, Some(1_700_000_000_000));
        assert_eq!(record.value, Bytes::from_static(b"payload"));
        assert_eq!(record.headers.get("trace").map(String::as_str), Some("abc"));
    }
}

//! Delimited text encoding. A row becomes the text form of each field joined by the configured
//! delimiter; [TextDeserializer] reads such a line back against the declared row type.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::row::{Row, RowType, SqlType, Value};
use crate::serializer::json;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Text form of a single value. Null is the empty string, nested values are rendered as JSON.
pub(crate) fn value_to_text(value: &Value) -> Result<String> {
    let text = match value {
        Value::Null => String::new(),
        Value::Boolean(v) => v.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bytes(v) => std::str::from_utf8(v)
            .map_err(|e| Error::Serialization(format!("bytes field is not valid UTF-8: {e}")))?
            .to_string(),
        Value::Date(v) => v.format(DATE_FORMAT).to_string(),
        Value::Time(v) => v.format(TIME_FORMAT).to_string(),
        Value::Timestamp(v) => v.format(TIMESTAMP_FORMAT).to_string(),
        Value::Array(_) | Value::Map(_) => serde_json::to_string(&json::value_to_json(value)?)?,
    };
    Ok(text)
}

/// Parses the text form of a value of `data_type`. The empty string is null, except for string
/// and bytes fields where it is the empty value.
pub(crate) fn parse_text(text: &str, data_type: &SqlType) -> Result<Value> {
    if text.is_empty() {
        return Ok(match data_type {
            SqlType::String => Value::String(String::new()),
            SqlType::Bytes => Value::Bytes(Bytes::new()),
            _ => Value::Null,
        });
    }

    let invalid = |e: &dyn std::fmt::Display| {
        Error::Serialization(format!("cannot parse {text:?} as {data_type}: {e}"))
    };

    let value = match data_type {
        SqlType::Null => Value::Null,
        SqlType::Boolean => Value::Boolean(text.parse().map_err(|e| invalid(&e))?),
        SqlType::TinyInt => Value::TinyInt(text.parse().map_err(|e| invalid(&e))?),
        SqlType::SmallInt => Value::SmallInt(text.parse().map_err(|e| invalid(&e))?),
        SqlType::Int => Value::Int(text.parse().map_err(|e| invalid(&e))?),
        SqlType::BigInt => Value::BigInt(text.parse().map_err(|e| invalid(&e))?),
        SqlType::Float => Value::Float(text.parse().map_err(|e| invalid(&e))?),
        SqlType::Double => Value::Double(text.parse().map_err(|e| invalid(&e))?),
        SqlType::String => Value::String(text.to_string()),
        SqlType::Bytes => Value::Bytes(Bytes::copy_from_slice(text.as_bytes())),
        SqlType::Date => Value::Date(
            NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| invalid(&e))?,
        ),
        SqlType::Time => Value::Time(
            NaiveTime::parse_from_str(text, TIME_FORMAT).map_err(|e| invalid(&e))?,
        ),
        SqlType::Timestamp => Value::Timestamp(
            NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(|e| invalid(&e))?,
        ),
        SqlType::Array(_) | SqlType::Map(_, _) => {
            let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| invalid(&e))?;
            json::json_to_value(&parsed, data_type)?
        }
    };
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct TextSerializer {
    delimiter: String,
}

impl TextSerializer {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    pub(crate) fn join<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> Result<String> {
        let parts = values
            .into_iter()
            .map(value_to_text)
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(&self.delimiter))
    }
}

/// Reads delimited text lines back into rows of a fixed type.
#[derive(Debug, Clone)]
pub struct TextDeserializer {
    row_type: Arc<RowType>,
    delimiter: String,
}

impl TextDeserializer {
    pub fn new(row_type: Arc<RowType>, delimiter: impl Into<String>) -> Self {
        Self {
            row_type,
            delimiter: delimiter.into(),
        }
    }

    pub fn deserialize(&self, line: &str) -> Result<Row> {
        let parts: Vec<&str> = line.split(self.delimiter.as_str()).collect();
        if parts.len() != self.row_type.len() {
            return Err(Error::Serialization(format!(
                "expected {} fields separated by {:?}, got {}",
                self.row_type.len(),
                self.delimiter,
                parts.len()
            )));
        }
        let values = parts
            .into_iter()
            .zip(self.row_type.fields())
            .map(|(part, field)| parse_text(part, &field.data_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Field;

    #[test]
    fn test_value_to_text() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_milli_opt(13, 5, 9, 250).unwrap();
        let cases = vec![
            (Value::Null, ""),
            (Value::Boolean(true), "true"),
            (Value::BigInt(-42), "-42"),
            (Value::Double(1.5), "1.5"),
            (Value::from("hello"), "hello"),
            (Value::Bytes(Bytes::from_static(b"raw")), "raw"),
            (Value::Date(date), "2024-02-29"),
            (Value::Time(time), "13:05:09.250"),
            (Value::Timestamp(date.and_time(time)), "2024-02-29 13:05:09.250"),
            (Value::Array(vec![Value::Int(1), Value::Null]), "[1,null]"),
        ];
        for (value, expected) in cases {
            assert_eq!(value_to_text(&value).unwrap(), expected, "{value:?}");
        }
    }

    #[test]
    fn test_value_to_text_rejects_invalid_utf8_bytes() {
        let value = Value::Bytes(Bytes::from_static(&[0xff, 0xfe, b'a']));
        assert!(matches!(
            value_to_text(&value),
            Err(Error::Serialization(_))
        ));
        let serializer = TextSerializer::new(",");
        assert!(serializer.join(&[Value::Int(1), value]).is_err());
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(parse_text("7", &SqlType::TinyInt).unwrap(), Value::TinyInt(7));
        assert_eq!(parse_text("", &SqlType::Int).unwrap(), Value::Null);
        assert_eq!(
            parse_text("", &SqlType::String).unwrap(),
            Value::String(String::new())
        );
        assert_eq!(
            parse_text("12:00:00", &SqlType::Time).unwrap(),
            Value::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_text(r#"{"a":"1"}"#, &"map<string,int>".parse().unwrap()).unwrap(),
            Value::Map(vec![(Value::from("a"), Value::Int(1))])
        );
        assert!(matches!(
            parse_text("abc", &SqlType::Int),
            Err(Error::Serialization(_))
        ));
        assert!(parse_text("300", &SqlType::TinyInt).is_err());
    }

    #[test]
    fn test_text_line_round_trip() {
        let row_type = Arc::new(
            RowType::new(vec![
                Field::new("id", SqlType::BigInt),
                Field::new("name", SqlType::String),
                Field::new("active", SqlType::Boolean),
                Field::new("day", SqlType::Date),
            ])
            .unwrap(),
        );
        let row = Row::new(vec![
            Value::BigInt(7),
            Value::from("seven"),
            Value::Null,
            Value::Date(NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()),
        ]);

        let serializer = TextSerializer::new("|");
        let line = serializer.join(row.values()).unwrap();
        assert_eq!(line, "7|seven||2023-12-01");

        let deserializer = TextDeserializer::new(row_type, "|");
        assert_eq!(deserializer.deserialize(&line).unwrap(), row);
        assert!(deserializer.deserialize("7|seven").is_err());
    }
}

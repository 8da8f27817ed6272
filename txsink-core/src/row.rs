//! Structured rows as handed to the sink by the upstream pipeline.
//!
//! A [Row] is a positional sequence of [Value]s. Field names and declared types live in the
//! [RowType] the writer is constructed with, so the name to index mapping is resolved once
//! and stays stable for the writer's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declared type of a row field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SqlType {
    Null,
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    String,
    Bytes,
    Date,
    Time,
    Timestamp,
    Array(Box<SqlType>),
    Map(Box<SqlType>, Box<SqlType>),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Null => write!(f, "null"),
            SqlType::Boolean => write!(f, "boolean"),
            SqlType::TinyInt => write!(f, "tinyint"),
            SqlType::SmallInt => write!(f, "smallint"),
            SqlType::Int => write!(f, "int"),
            SqlType::BigInt => write!(f, "bigint"),
            SqlType::Float => write!(f, "float"),
            SqlType::Double => write!(f, "double"),
            SqlType::String => write!(f, "string"),
            SqlType::Bytes => write!(f, "bytes"),
            SqlType::Date => write!(f, "date"),
            SqlType::Time => write!(f, "time"),
            SqlType::Timestamp => write!(f, "timestamp"),
            SqlType::Array(element) => write!(f, "array<{element}>"),
            SqlType::Map(key, value) => write!(f, "map<{key},{value}>"),
        }
    }
}

impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let lower = s.to_lowercase();
        if let Some(inner) = strip_wrapper(&lower, "array") {
            return Ok(SqlType::Array(Box::new(inner.parse()?)));
        }
        if let Some(inner) = strip_wrapper(&lower, "map") {
            let (key, value) = split_top_level_comma(inner).ok_or_else(|| {
                Error::Config(format!("map type needs a key and a value type: {s}"))
            })?;
            return Ok(SqlType::Map(
                Box::new(key.parse()?),
                Box::new(value.parse()?),
            ));
        }
        match lower.as_str() {
            "null" => Ok(SqlType::Null),
            "boolean" | "bool" => Ok(SqlType::Boolean),
            "tinyint" => Ok(SqlType::TinyInt),
            "smallint" => Ok(SqlType::SmallInt),
            "int" | "integer" => Ok(SqlType::Int),
            "bigint" | "long" => Ok(SqlType::BigInt),
            "float" => Ok(SqlType::Float),
            "double" => Ok(SqlType::Double),
            "string" | "varchar" => Ok(SqlType::String),
            "bytes" | "binary" => Ok(SqlType::Bytes),
            "date" => Ok(SqlType::Date),
            "time" => Ok(SqlType::Time),
            "timestamp" => Ok(SqlType::Timestamp),
            _ => Err(Error::Config(format!("unsupported sql type: {s}"))),
        }
    }
}

impl TryFrom<String> for SqlType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SqlType> for String {
    fn from(value: SqlType) -> Self {
        value.to_string()
    }
}

/// Returns the text between `name<` and the final `>`.
fn strip_wrapper<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

/// Splits `k,v` on the first comma that is not nested inside `<...>`.
fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((s.get(..idx)?, s.get(idx + 1..)?)),
            _ => {}
        }
    }
    None
}

/// A single named, typed field of a [RowType].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: SqlType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered field declarations of the rows flowing into a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowType {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut index = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), idx).is_some() {
                return Err(Error::Config(format!(
                    "duplicate field name in row type: {}",
                    field.name
                )));
            }
        }
        Ok(Self { fields, index })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'de> Deserialize<'de> for RowType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let fields = Vec::<Field>::deserialize(deserializer)?;
        RowType::new(fields).map_err(serde::de::Error::custom)
    }
}

impl Serialize for RowType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.fields.serialize(serializer)
    }
}

/// Value of one row field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Bytes),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value may be stored in a field declared as `data_type`. Null fits every type.
    pub fn conforms_to(&self, data_type: &SqlType) -> bool {
        match (self, data_type) {
            (Value::Null, _) => true,
            (Value::Boolean(_), SqlType::Boolean)
            | (Value::TinyInt(_), SqlType::TinyInt)
            | (Value::SmallInt(_), SqlType::SmallInt)
            | (Value::Int(_), SqlType::Int)
            | (Value::BigInt(_), SqlType::BigInt)
            | (Value::Float(_), SqlType::Float)
            | (Value::Double(_), SqlType::Double)
            | (Value::String(_), SqlType::String)
            | (Value::Bytes(_), SqlType::Bytes)
            | (Value::Date(_), SqlType::Date)
            | (Value::Time(_), SqlType::Time)
            | (Value::Timestamp(_), SqlType::Timestamp) => true,
            (Value::Array(items), SqlType::Array(element)) => {
                items.iter().all(|item| item.conforms_to(element))
            }
            (Value::Map(entries), SqlType::Map(key, value)) => entries
                .iter()
                .all(|(k, v)| k.conforms_to(key) && v.conforms_to(value)),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

/// One upstream record. Immutable once handed to the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_parse_and_display() {
        let cases = [
            ("bigint", SqlType::BigInt),
            ("STRING", SqlType::String),
            (
                "map<string,string>",
                SqlType::Map(Box::new(SqlType::String), Box::new(SqlType::String)),
            ),
            ("array<int>", SqlType::Array(Box::new(SqlType::Int))),
            (
                "map<string, array<bytes>>",
                SqlType::Map(
                    Box::new(SqlType::String),
                    Box::new(SqlType::Array(Box::new(SqlType::Bytes))),
                ),
            ),
        ];
        for (input, expected) in cases {
            let parsed: SqlType = input.parse().unwrap();
            assert_eq!(parsed, expected, "parsing {input}");
            let reparsed: SqlType = parsed.to_string().parse().unwrap();
            assert_eq!(reparsed, expected);
        }

        assert!("decimal(10,2)".parse::<SqlType>().is_err());
        assert!("map<string>".parse::<SqlType>().is_err());
    }

    #[test]
    fn test_row_type_index() {
        let row_type = RowType::new(vec![
            Field::new("id", SqlType::BigInt),
            Field::new("name", SqlType::String),
        ])
        .unwrap();
        assert_eq!(row_type.index_of("id"), Some(0));
        assert_eq!(row_type.index_of("name"), Some(1));
        assert_eq!(row_type.index_of("missing"), None);
        assert_eq!(row_type.field_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_row_type_rejects_duplicates() {
        let result = RowType::new(vec![
            Field::new("id", SqlType::BigInt),
            Field::new("id", SqlType::String),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_row_type_from_json() {
        let row_type: RowType = serde_json::from_str(
            r#"[{"name": "id", "type": "bigint"}, {"name": "headers", "type": "map<string,string>"}]"#,
        )
        .unwrap();
        assert_eq!(row_type.len(), 2);
        assert_eq!(
            row_type.field(1).unwrap().data_type,
            SqlType::Map(Box::new(SqlType::String), Box::new(SqlType::String))
        );
    }

    #[test]
    fn test_value_conforms_to() {
        assert!(Value::Null.conforms_to(&SqlType::Bytes));
        assert!(Value::Int(1).conforms_to(&SqlType::Int));
        assert!(!Value::Int(1).conforms_to(&SqlType::BigInt));
        let headers = Value::Map(vec![(Value::from("k"), Value::from("v"))]);
        assert!(headers.conforms_to(&SqlType::Map(
            Box::new(SqlType::String),
            Box::new(SqlType::String)
        )));
        assert!(!headers.conforms_to(&SqlType::Map(
            Box::new(SqlType::String),
            Box::new(SqlType::Int)
        )));
    }
}

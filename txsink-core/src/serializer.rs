//! Conversion of [Row]s into broker-ready [SerializedRecord]s.
//!
//! Everything that can be decided from the configuration and the row type alone (partition
//! strategy, key field positions, the native control columns) is checked when the
//! [RowSerializer] is built, so a misconfigured writer fails before the first row flows.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::{MessageFormat, SinkConfig};
use crate::error::{Error, Result};
use crate::partitioner::Partitioner;
use crate::record::SerializedRecord;
use crate::row::{Row, RowType};

pub(crate) mod json;
pub(crate) mod native;
pub(crate) mod text;

pub use json::{JsonDeserializer, JsonSerializer};
pub use native::native_schema;
pub use text::{TextDeserializer, TextSerializer};

#[derive(Debug, Clone)]
enum Encoding {
    Native(native::NativeLayout),
    Text(TextSerializer),
    Json(JsonSerializer),
}

/// Serializes rows of one [RowType] in the configured [MessageFormat].
#[derive(Debug, Clone)]
pub struct RowSerializer {
    row_type: Arc<RowType>,
    encoding: Encoding,
    partitioner: Partitioner,
    /// positions of the partition key fields, in configured order
    key_fields: Vec<usize>,
}

impl RowSerializer {
    /// `partition_count` is only consulted for content-based assignment and must then be the
    /// destination topic's partition count.
    pub fn new(
        config: &SinkConfig,
        row_type: Arc<RowType>,
        partition_count: Option<i32>,
    ) -> Result<Self> {
        config.check_partition_strategy()?;

        let key_fields = match &config.partition_key_fields {
            Some(names) => resolve_key_fields(names, &row_type)?,
            None => vec![],
        };

        let partitioner = match (config.partition, &config.assign_partitions) {
            (Some(partition), _) => Partitioner::fixed(partition)?,
            (None, Some(markers)) => {
                let partition_count = partition_count.ok_or_else(|| {
                    Error::Config(
                        "assign_partitions requires the partition count of the topic".to_string(),
                    )
                })?;
                Partitioner::content_based(markers.clone(), partition_count)?
            }
            (None, None) => Partitioner::BrokerDefault,
        };

        let encoding = match config.format {
            MessageFormat::Native => {
                if !key_fields.is_empty() {
                    return Err(Error::Config(
                        "partition_key_fields cannot be used with the native format, the row carries its own key"
                            .to_string(),
                    ));
                }
                Encoding::Native(native::NativeLayout::new(&row_type)?)
            }
            MessageFormat::Text => {
                Encoding::Text(TextSerializer::new(config.field_delimiter.clone()))
            }
            MessageFormat::Json => Encoding::Json(JsonSerializer),
        };

        Ok(Self {
            row_type,
            encoding,
            partitioner,
            key_fields,
        })
    }

    /// Produces exactly one record for the row. A row that does not match the declared row type
    /// is rejected as a whole.
    pub fn serialize(&self, row: &Row) -> Result<SerializedRecord> {
        self.check_row(row)?;

        match &self.encoding {
            Encoding::Native(layout) => {
                let mut record = layout.extract(row)?;
                if record.partition.is_none() {
                    record.partition = self.partitioner.partition(&record.value);
                }
                Ok(record)
            }
            Encoding::Text(serializer) => {
                let value = Bytes::from(serializer.join(row.values())?);
                let key = if self.key_fields.is_empty() {
                    None
                } else {
                    let values = self.key_fields.iter().filter_map(|idx| row.get(*idx));
                    Some(Bytes::from(serializer.join(values)?))
                };
                Ok(self.record(key, value))
            }
            Encoding::Json(serializer) => {
                let fields = self
                    .row_type
                    .fields()
                    .iter()
                    .map(|field| field.name.as_str())
                    .zip(row.values());
                let value = Bytes::from(serializer.encode(fields)?);
                let key = if self.key_fields.is_empty() {
                    None
                } else {
                    let fields = self.key_fields.iter().filter_map(|idx| {
                        let name = self.row_type.field(*idx)?.name.as_str();
                        Some((name, row.get(*idx)?))
                    });
                    Some(Bytes::from(serializer.encode(fields)?))
                };
                Ok(self.record(key, value))
            }
        }
    }

    fn record(&self, key: Option<Bytes>, value: Bytes) -> SerializedRecord {
        let partition = self.partitioner.partition(&value);
        SerializedRecord {
            key,
            value,
            partition,
            ..Default::default()
        }
    }

    fn check_row(&self, row: &Row) -> Result<()> {
        if row.arity() != self.row_type.len() {
            return Err(Error::Serialization(format!(
                "row has {} fields but the row type declares {}",
                row.arity(),
                self.row_type.len()
            )));
        }
        for (value, field) in row.values().iter().zip(self.row_type.fields()) {
            if !value.conforms_to(&field.data_type) {
                return Err(Error::Serialization(format!(
                    "unsupported value {value:?} for field {} declared as {}",
                    field.name, field.data_type
                )));
            }
        }
        Ok(())
    }
}

fn resolve_key_fields(names: &[String], row_type: &RowType) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            row_type.index_of(name).ok_or_else(|| {
                Error::Config(format!(
                    "Partition key field not found: {name}, rowType: {:?}",
                    row_type.field_names()
                ))
            })
        })
        .collect()
}

/// Parses input lines into rows: delimited text for the text format, JSON objects otherwise.
#[derive(Debug, Clone)]
pub enum RowDeserializer {
    Text(TextDeserializer),
    Json(JsonDeserializer),
}

impl RowDeserializer {
    pub fn new(config: &SinkConfig, row_type: Arc<RowType>) -> Self {
        match config.format {
            MessageFormat::Text => RowDeserializer::Text(TextDeserializer::new(
                row_type,
                config.field_delimiter.clone(),
            )),
            MessageFormat::Native | MessageFormat::Json => {
                RowDeserializer::Json(JsonDeserializer::new(row_type))
            }
        }
    }

    pub fn deserialize(&self, line: &str) -> Result<Row> {
        match self {
            RowDeserializer::Text(deserializer) => deserializer.deserialize(line),
            RowDeserializer::Json(deserializer) => deserializer.deserialize(line),
        }
    }
}

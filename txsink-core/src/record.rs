use std::collections::HashMap;

use bytes::Bytes;

/// Broker-ready form of one row. Produced exactly once per row; ownership moves to the sender
/// on send.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SerializedRecord {
    /// Record key. `None` and an empty key are distinct on the wire.
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    /// Explicit destination partition. `None` leaves the choice to the broker's default
    /// partitioning.
    pub partition: Option<i32>,
    /// Milliseconds since epoch. `None` lets the broker stamp the create time.
    pub timestamp: Option<i64>,
}

impl SerializedRecord {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

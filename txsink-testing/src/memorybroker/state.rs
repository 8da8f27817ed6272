//! Shared broker state: topic logs, transactions and the event history.

use std::collections::HashMap;

use txsink_core::record::SerializedRecord;
use txsink_core::state::TransactionState;

/// Something the broker did, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Began(String),
    /// An earlier incarnation of the id was aborted because the id was begun or fenced again.
    Fenced(String),
    Prepared(String),
    Committed(String),
    Aborted(String),
}

#[derive(Debug)]
pub(crate) struct TransactionEntry {
    /// bumped on every begin or fence of the id; handles of older epochs are dead
    pub(crate) epoch: u64,
    pub(crate) status: TransactionState,
    pub(crate) topic: String,
    pub(crate) records: Vec<SerializedRecord>,
}

#[derive(Debug)]
pub(crate) struct BrokerState {
    pub(crate) default_partitions: i32,
    /// topic -> partitions -> committed or directly produced records
    pub(crate) topics: HashMap<String, Vec<Vec<SerializedRecord>>>,
    pub(crate) transactions: HashMap<String, TransactionEntry>,
    pub(crate) events: Vec<BrokerEvent>,
    unkeyed_sequence: u64,
}

impl BrokerState {
    pub(crate) fn new(default_partitions: i32) -> Self {
        Self {
            default_partitions,
            topics: HashMap::new(),
            transactions: HashMap::new(),
            events: Vec::new(),
            unkeyed_sequence: 0,
        }
    }

    pub(crate) fn partitions(&mut self, topic: &str) -> &mut Vec<Vec<SerializedRecord>> {
        let default_partitions = usize::try_from(self.default_partitions).unwrap_or(1);
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); default_partitions])
    }

    /// Fixes the destination partition of the record the way the broker's default
    /// partitioner would.
    pub(crate) fn route(
        &mut self,
        topic: &str,
        mut record: SerializedRecord,
    ) -> Result<SerializedRecord, String> {
        let partition_count = i32::try_from(self.partitions(topic).len()).unwrap_or(i32::MAX);
        let partition = match record.partition {
            Some(partition) if (0..partition_count).contains(&partition) => partition,
            Some(partition) => {
                return Err(format!(
                    "partition {partition} out of range for {topic} with {partition_count} partitions"
                ));
            }
            None => {
                let sequence = self.unkeyed_sequence;
                self.unkeyed_sequence += 1;
                txsink_core::partitioner::default_partition(
                    record.key.as_deref(),
                    partition_count,
                    sequence,
                )
            }
        };
        record.partition = Some(partition);
        Ok(record)
    }

    /// Appends routed records to the topic log.
    pub(crate) fn append(&mut self, topic: &str, records: Vec<SerializedRecord>) {
        let partitions = self.partitions(topic);
        for record in records {
            let idx = record
                .partition
                .and_then(|p| usize::try_from(p).ok())
                .unwrap_or_default();
            if let Some(partition) = partitions.get_mut(idx) {
                partition.push(record);
            }
        }
    }

    /// Aborts a live incarnation of `id`, if any, and returns the next epoch for it.
    pub(crate) fn fence(&mut self, id: &str) -> Option<u64> {
        let entry = self.transactions.get_mut(id)?;
        let was_live = !entry.status.is_terminal();
        if was_live {
            entry.status = TransactionState::Aborted;
            entry.records.clear();
        }
        entry.epoch += 1;
        let epoch = entry.epoch;
        if was_live {
            self.events.push(BrokerEvent::Fenced(id.to_string()));
        }
        Some(epoch)
    }
}

//! In-memory transactional broker.
//!
//! Topics are vectors of partitions. Records sent through a transaction are buffered on the
//! transaction and appended to their partitions only on commit, so
//! [MemoryBroker::committed_records] shows what a read-committed consumer would see. Every
//! transactional id carries an epoch; beginning or fencing the id again bumps it and kills
//! every older handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use txsink_core::broker::{Broker, FenceOutcome};
use txsink_core::record::SerializedRecord;
use txsink_core::state::{CommitInfo, TransactionId, TransactionState};
use txsink_core::{Error, Result};

pub mod error_injector;
pub mod producer;
mod state;

pub use error_injector::ErrorInjector;
pub use producer::{MemoryProducer, MemoryTransaction};
pub use state::BrokerEvent;

use state::{BrokerState, TransactionEntry};

/// A cloneable handle to the in-memory broker. Clones share topics and transactions.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    injector: Arc<ErrorInjector>,
}

impl MemoryBroker {
    /// Creates a broker whose topics are auto-created with `default_partitions` partitions.
    pub fn new(default_partitions: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(default_partitions.max(1)))),
            injector: Arc::new(ErrorInjector::new()),
        }
    }

    /// Creates or resizes a topic. Resizing drops its records.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let partitions = usize::try_from(partitions.max(1)).unwrap_or(1);
        self.state
            .lock()
            .topics
            .insert(topic.to_string(), vec![Vec::new(); partitions]);
    }

    pub fn error_injector(&self) -> Arc<ErrorInjector> {
        Arc::clone(&self.injector)
    }

    /// Every record visible on the topic, partition by partition.
    pub fn committed_records(&self, topic: &str) -> Vec<SerializedRecord> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Records visible on one partition, in append order.
    pub fn partition_records(&self, topic: &str, partition: i32) -> Vec<SerializedRecord> {
        let Ok(idx) = usize::try_from(partition) else {
            return Vec::new();
        };
        self.state
            .lock()
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(idx))
            .cloned()
            .unwrap_or_default()
    }

    pub fn transaction_status(&self, id: &str) -> Option<TransactionState> {
        self.state
            .lock()
            .transactions
            .get(id)
            .map(|entry| entry.status)
    }

    /// Ids of the transactions that are still open or prepared.
    pub fn live_transactions(&self) -> Vec<String> {
        let mut live: Vec<String> = self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|(_, entry)| !entry.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        live.sort();
        live
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.state.lock().events.clone()
    }
}

impl Broker for MemoryBroker {
    type Producer = MemoryProducer;
    type Transaction = MemoryTransaction;

    async fn partition_count(&self, topic: &str) -> Result<i32> {
        let mut state = self.state.lock();
        Ok(i32::try_from(state.partitions(topic).len()).unwrap_or(i32::MAX))
    }

    async fn create_producer(&self, topic: &str) -> Result<Self::Producer> {
        self.state.lock().partitions(topic);
        Ok(MemoryProducer {
            state: Arc::clone(&self.state),
            injector: Arc::clone(&self.injector),
            topic: topic.to_string(),
            unflushed: 0,
        })
    }

    async fn begin_transaction(
        &self,
        topic: &str,
        id: &TransactionId,
    ) -> Result<Self::Transaction> {
        if self.injector.should_fail_begin() {
            return Err(Error::Broker(format!("Injected begin failure for {id}")));
        }
        let key = id.to_string();
        let mut state = self.state.lock();
        state.partitions(topic);
        let epoch = state.fence(&key).unwrap_or_default();
        state.transactions.insert(
            key.clone(),
            TransactionEntry {
                epoch,
                status: TransactionState::Open,
                topic: topic.to_string(),
                records: Vec::new(),
            },
        );
        state.events.push(BrokerEvent::Began(key));
        debug!(transaction_id = %id, epoch, "Began transaction");
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            injector: Arc::clone(&self.injector),
            id: id.clone(),
            epoch,
        })
    }

    async fn fence_transaction(&self, id: &TransactionId) -> Result<FenceOutcome> {
        let key = id.to_string();
        match self.state.lock().fence(&key) {
            Some(_) => Ok(FenceOutcome::Aborted),
            None => Ok(FenceOutcome::NeverUsed),
        }
    }

    async fn commit_transaction(&self, commit_info: &CommitInfo) -> Result<()> {
        if self.injector.should_fail_commit() {
            return Err(Error::Broker(format!(
                "Injected commit failure for {}",
                commit_info.transaction_id
            )));
        }
        let key = commit_info.transaction_id.to_string();
        let mut state = self.state.lock();
        let Some(entry) = state.transactions.get_mut(&key) else {
            return Err(Error::Transaction(format!("Unknown transaction {key}")));
        };
        match entry.status {
            TransactionState::Committed => Ok(()),
            TransactionState::Prepared => {
                entry.status = TransactionState::Committed;
                let records = std::mem::take(&mut entry.records);
                let topic = entry.topic.clone();
                let count = records.len();
                state.append(&topic, records);
                state.events.push(BrokerEvent::Committed(key.clone()));
                info!(transaction_id = %key, records = count, "Committed transaction");
                Ok(())
            }
            status => Err(Error::Transaction(format!(
                "Cannot commit transaction {key} in state {status}"
            ))),
        }
    }

    async fn abort_transaction(&self, commit_info: &CommitInfo) -> Result<()> {
        if self.injector.should_fail_abort() {
            return Err(Error::Broker(format!(
                "Injected abort failure for {}",
                commit_info.transaction_id
            )));
        }
        let key = commit_info.transaction_id.to_string();
        let mut state = self.state.lock();
        let Some(entry) = state.transactions.get_mut(&key) else {
            return Ok(());
        };
        if entry.status.is_terminal() {
            return Ok(());
        }
        entry.status = TransactionState::Aborted;
        entry.records.clear();
        state.events.push(BrokerEvent::Aborted(key));
        Ok(())
    }
}

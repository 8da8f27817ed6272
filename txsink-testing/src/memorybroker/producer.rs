//! Producer and transaction handles of the in-memory broker.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use txsink_core::broker::{Producer, Transaction};
use txsink_core::record::SerializedRecord;
use txsink_core::state::{TransactionId, TransactionState};
use txsink_core::{Error, Result};

use super::error_injector::ErrorInjector;
use super::state::{BrokerEvent, BrokerState};

/// Non-transactional producer. Records become visible as soon as they are sent.
pub struct MemoryProducer {
    pub(crate) state: Arc<Mutex<BrokerState>>,
    pub(crate) injector: Arc<ErrorInjector>,
    pub(crate) topic: String,
    pub(crate) unflushed: usize,
}

impl Producer for MemoryProducer {
    async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        self.injector.apply_send_pressure().await;
        if self.injector.should_fail_send() {
            return Err(Error::Broker("Injected send failure".to_string()));
        }
        let mut state = self.state.lock();
        let record = state.route(&self.topic, record).map_err(Error::Broker)?;
        state.append(&self.topic, vec![record]);
        self.unflushed += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.injector.should_fail_flush() {
            return Err(Error::Broker("Injected flush failure".to_string()));
        }
        debug!(topic = %self.topic, records = self.unflushed, "Flushed producer");
        self.unflushed = 0;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        self.flush().await
    }
}

/// Handle of one incarnation of a transactional id. Once the id is begun or fenced again the
/// handle is dead: sends and prepares fail, aborts are no-ops.
pub struct MemoryTransaction {
    pub(crate) state: Arc<Mutex<BrokerState>>,
    pub(crate) injector: Arc<ErrorInjector>,
    pub(crate) id: TransactionId,
    pub(crate) epoch: u64,
}

impl MemoryTransaction {
    /// Fails unless this handle's incarnation is still open.
    fn check_open(&self, state: &BrokerState) -> Result<()> {
        let key = self.id.to_string();
        match state.transactions.get(&key) {
            Some(entry) if entry.epoch != self.epoch => Err(Error::Transaction(format!(
                "Transaction {key} has been fenced by a newer incarnation"
            ))),
            Some(entry) if entry.status == TransactionState::Open => Ok(()),
            Some(entry) => Err(Error::Transaction(format!(
                "Transaction {key} is {}, expected open",
                entry.status
            ))),
            None => Err(Error::Transaction(format!("Unknown transaction {key}"))),
        }
    }
}

impl Transaction for MemoryTransaction {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        self.injector.apply_send_pressure().await;
        if self.injector.should_fail_send() {
            return Err(Error::Broker("Injected send failure".to_string()));
        }
        let mut state = self.state.lock();
        self.check_open(&state)?;
        let key = self.id.to_string();
        let topic = state
            .transactions
            .get(&key)
            .map(|entry| entry.topic.clone())
            .unwrap_or_default();
        let record = state.route(&topic, record).map_err(Error::Broker)?;
        if let Some(entry) = state.transactions.get_mut(&key) {
            entry.records.push(record);
        }
        Ok(())
    }

    async fn prepare(&mut self) -> Result<()> {
        if self.injector.should_fail_prepare() {
            return Err(Error::Broker("Injected prepare failure".to_string()));
        }
        let mut state = self.state.lock();
        self.check_open(&state)?;
        let key = self.id.to_string();
        if let Some(entry) = state.transactions.get_mut(&key) {
            entry.status = TransactionState::Prepared;
        }
        state.events.push(BrokerEvent::Prepared(key));
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if self.injector.should_fail_abort() {
            return Err(Error::Broker("Injected abort failure".to_string()));
        }
        let mut state = self.state.lock();
        let key = self.id.to_string();
        let Some(entry) = state.transactions.get_mut(&key) else {
            return Ok(());
        };
        if entry.epoch != self.epoch || entry.status.is_terminal() {
            return Ok(());
        }
        entry.status = TransactionState::Aborted;
        entry.records.clear();
        state.events.push(BrokerEvent::Aborted(key));
        Ok(())
    }
}

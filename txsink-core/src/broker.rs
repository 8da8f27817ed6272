//! The broker seam. Senders only talk to the log through these traits, so the same transaction
//! protocol runs against Kafka in production and against an in-memory broker in tests.

use crate::error::Result;
use crate::record::SerializedRecord;
use crate::state::{CommitInfo, TransactionId};

pub mod kafka;

/// Result of fencing a transaction id that this process never began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceOutcome {
    /// Whatever an earlier incarnation left under this id is aborted and can no longer commit.
    Aborted,
    /// The broker has never seen this id. Nothing to fence, and no higher id of the same
    /// lineage can have been used either.
    NeverUsed,
}

/// A partitioned, transactional message log.
///
/// `commit_transaction` and `abort_transaction` work out of band on the token of a prepared
/// transaction, independently of the handle that prepared it. Committing an already committed
/// transaction succeeds, and so does aborting a transaction that is terminal or unknown.
#[trait_variant::make(Send)]
pub trait Broker: Clone + Sync + 'static {
    type Producer: Producer;
    type Transaction: Transaction;

    /// Number of partitions of the topic.
    async fn partition_count(&self, topic: &str) -> Result<i32>;

    /// A producer whose sends are delivered independently of each other.
    async fn create_producer(&self, topic: &str) -> Result<Self::Producer>;

    /// Opens a transaction under `id`. An earlier incarnation of the same id that is still open
    /// or prepared is aborted first, so it can never commit.
    async fn begin_transaction(&self, topic: &str, id: &TransactionId)
    -> Result<Self::Transaction>;

    /// Aborts whatever a previous process may have left under `id`.
    async fn fence_transaction(&self, id: &TransactionId) -> Result<FenceOutcome>;

    async fn commit_transaction(&self, commit_info: &CommitInfo) -> Result<()>;

    async fn abort_transaction(&self, commit_info: &CommitInfo) -> Result<()>;
}

#[trait_variant::make(Send)]
pub trait Producer: Send + 'static {
    /// Hands the record to the broker client. Waits while the client's outbound queue is full,
    /// but does not wait for the acknowledgement.
    async fn send(&mut self, record: SerializedRecord) -> Result<()>;

    /// Waits until every record sent so far is acknowledged.
    async fn flush(&mut self) -> Result<()>;

    /// Flushes and releases the client.
    async fn close(self) -> Result<()>;
}

/// Handle of one open broker transaction.
#[trait_variant::make(Send)]
pub trait Transaction: Send + 'static {
    fn id(&self) -> &TransactionId;

    async fn send(&mut self, record: SerializedRecord) -> Result<()>;

    /// Flushes all sends and moves the transaction to the prepared state. From then on it is
    /// committed through [Broker::commit_transaction].
    async fn prepare(&mut self) -> Result<()>;

    /// Discards the transaction. Aborting an aborted or committed transaction is a no-op.
    async fn abort(&mut self) -> Result<()>;
}

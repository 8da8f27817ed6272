//! Delivery of serialized records, in one of two variants chosen once from the delivery
//! semantics.

use crate::broker::Broker;
use crate::error::Result;
use crate::record::SerializedRecord;
use crate::state::{CommitInfo, SinkState};

mod non_transactional;
mod transactional;

pub use non_transactional::NonTransactionalSender;
pub use transactional::TransactionalSender;

pub enum ProduceSender<B: Broker> {
    NonTransactional(NonTransactionalSender<B::Producer>),
    Transactional(TransactionalSender<B>),
}

impl<B: Broker> ProduceSender<B> {
    pub async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        match self {
            ProduceSender::NonTransactional(sender) => sender.send(record).await,
            ProduceSender::Transactional(sender) => sender.send(record).await,
        }
    }

    pub async fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Option<SinkState>> {
        match self {
            ProduceSender::NonTransactional(sender) => sender.snapshot_state(checkpoint_id).await,
            ProduceSender::Transactional(sender) => sender.snapshot_state(checkpoint_id).await,
        }
    }

    /// Opens the transaction for `checkpoint_id`. Sends of the non-transactional variant are
    /// never grouped, so there it does nothing.
    pub async fn begin_transaction(&mut self, checkpoint_id: u64) -> Result<()> {
        match self {
            ProduceSender::NonTransactional(_) => Ok(()),
            ProduceSender::Transactional(sender) => sender.begin_transaction(checkpoint_id).await,
        }
    }

    pub async fn prepare_commit(&mut self) -> Result<Option<CommitInfo>> {
        match self {
            ProduceSender::NonTransactional(sender) => Ok(sender.prepare_commit()),
            ProduceSender::Transactional(sender) => sender.prepare_commit().await,
        }
    }

    pub async fn abort_prepare(&mut self) -> Result<()> {
        match self {
            ProduceSender::NonTransactional(_) => Ok(()),
            ProduceSender::Transactional(sender) => sender.abort_prepare().await,
        }
    }

    pub async fn close(self) -> Result<()> {
        match self {
            ProduceSender::NonTransactional(sender) => sender.close().await,
            ProduceSender::Transactional(sender) => sender.close().await,
        }
    }
}

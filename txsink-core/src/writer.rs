//! The per-task sink writer driven by the checkpoint coordinator.

use std::sync::Arc;

use tracing::{error, info};

use crate::broker::Broker;
use crate::config::{DeliverySemantics, SinkConfig};
use crate::error::{Error, Result};
use crate::row::{Row, RowType};
use crate::sender::{NonTransactionalSender, ProduceSender, TransactionalSender};
use crate::serializer::RowSerializer;
use crate::state::{CommitInfo, SinkState, generate_transaction_prefix};

/// Serializes rows and hands them to the [ProduceSender] picked for the configured
/// [DeliverySemantics].
///
/// Calls follow the checkpoint cycle: any number of [SinkWriter::write]s, then
/// [SinkWriter::snapshot_state], then [SinkWriter::prepare_commit] (or
/// [SinkWriter::abort_prepare] when the checkpoint fails), and [SinkWriter::close] at the end.
pub struct SinkWriter<B: Broker> {
    serializer: RowSerializer,
    sender: ProduceSender<B>,
    transaction_prefix: String,
    last_checkpoint_id: u64,
}

impl<B: Broker> SinkWriter<B> {
    pub async fn new(
        config: SinkConfig,
        row_type: Arc<RowType>,
        states: Vec<SinkState>,
        broker: B,
    ) -> Result<Self> {
        let generated_prefix = generate_transaction_prefix(&mut rand::rng());
        Self::with_generated_prefix(config, row_type, states, broker, generated_prefix).await
    }

    /// Like [SinkWriter::new], with the prefix to use when neither the recovered state nor the
    /// configuration names one.
    pub async fn with_generated_prefix(
        config: SinkConfig,
        row_type: Arc<RowType>,
        states: Vec<SinkState>,
        broker: B,
        generated_prefix: String,
    ) -> Result<Self> {
        config.validate()?;

        // the newest recovered state wins over any configured prefix
        let recovered = states.into_iter().max_by_key(|state| state.checkpoint_id);
        let transaction_prefix = match &recovered {
            Some(state) => state.transaction_id_prefix.clone(),
            None => config.transaction_prefix.clone().unwrap_or(generated_prefix),
        };
        let recovered_checkpoint_id = recovered.as_ref().map(|state| state.checkpoint_id);

        let partition_count = match config.assign_partitions {
            Some(_) => Some(broker.partition_count(&config.topic).await?),
            None => None,
        };
        let serializer = RowSerializer::new(&config, row_type, partition_count)?;

        let sender = match config.semantics {
            DeliverySemantics::None | DeliverySemantics::AtLeastOnce => {
                let producer = broker.create_producer(&config.topic).await?;
                ProduceSender::NonTransactional(NonTransactionalSender::new(
                    producer,
                    config.semantics == DeliverySemantics::AtLeastOnce,
                ))
            }
            DeliverySemantics::ExactlyOnce => ProduceSender::Transactional(
                TransactionalSender::start(
                    broker,
                    config.topic.clone(),
                    transaction_prefix.clone(),
                    config.fence_window,
                    recovered_checkpoint_id,
                )
                .await?,
            ),
        };

        info!(
            semantics = %config.semantics,
            topic = %config.topic,
            transaction_prefix = %transaction_prefix,
            recovered_checkpoint_id = ?recovered_checkpoint_id,
            "Sink writer started"
        );

        Ok(Self {
            serializer,
            sender,
            transaction_prefix,
            last_checkpoint_id: recovered_checkpoint_id.unwrap_or_default(),
        })
    }

    pub async fn write(&mut self, row: &Row) -> Result<()> {
        let record = self.serializer.serialize(row)?;
        self.sender.send(record).await
    }

    /// Finishes the unit of work for `checkpoint_id` and immediately opens the next one.
    pub async fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Vec<SinkState>> {
        let state = self.sender.snapshot_state(checkpoint_id).await?;
        self.last_checkpoint_id = checkpoint_id;
        self.sender.begin_transaction(checkpoint_id + 1).await?;
        Ok(state.into_iter().collect())
    }

    pub async fn prepare_commit(&mut self) -> Result<Option<CommitInfo>> {
        self.sender.prepare_commit().await
    }

    pub async fn abort_prepare(&mut self) -> Result<()> {
        self.sender.abort_prepare().await
    }

    pub async fn close(self) -> Result<()> {
        self.sender.close().await.map_err(|e| {
            error!(?e, "Close sink writer error");
            Error::Writer(format!("Close sink writer error: {e}"))
        })
    }

    pub fn transaction_prefix(&self) -> &str {
        &self.transaction_prefix
    }

    pub fn last_checkpoint_id(&self) -> u64 {
        self.last_checkpoint_id
    }

    /// Id of the transaction open for sends, for the exactly-once writer.
    pub fn current_transaction(&self) -> Option<String> {
        match &self.sender {
            ProduceSender::Transactional(sender) => {
                sender.current_transaction().map(ToString::to_string)
            }
            ProduceSender::NonTransactional(_) => None,
        }
    }
}

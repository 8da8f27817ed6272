use rdkafka::producer::{DeliveryFuture, FutureProducer, Producer};
use tracing::{debug, info};

use crate::producer::{await_deliveries, enqueue};
use crate::{Error, KafkaClient, KafkaRecord, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Prepared,
    Finished,
}

/// An open transaction on its own transactional producer.
pub struct KafkaTransaction {
    client: KafkaClient,
    producer: FutureProducer,
    topic: String,
    transactional_id: String,
    in_flight: Vec<DeliveryFuture>,
    phase: Phase,
}

impl KafkaTransaction {
    pub(crate) fn new(
        client: KafkaClient,
        producer: FutureProducer,
        topic: impl Into<String>,
        transactional_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            producer,
            topic: topic.into(),
            transactional_id: transactional_id.into(),
            in_flight: Vec::new(),
            phase: Phase::Open,
        }
    }

    pub async fn send(&mut self, record: KafkaRecord) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::Other(format!(
                "transaction {} no longer accepts records",
                self.transactional_id
            )));
        }
        let delivery = enqueue(&self.producer, &self.topic, &record).await?;
        self.in_flight.push(delivery);
        Ok(())
    }

    /// Flushes every record of the transaction and registers it with the client, which then
    /// commits or aborts it by id.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::Other(format!(
                "transaction {} cannot be prepared twice",
                self.transactional_id
            )));
        }
        let records = self.in_flight.len();
        await_deliveries(std::mem::take(&mut self.in_flight)).await?;

        let timeout = self.client.operation_timeout();
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Other(format!("Flush task failed: {e}")))?
            .map_err(|e| Error::Kafka(format!("Failed to flush transaction: {e}")))?;

        self.client
            .register_prepared(&self.transactional_id, self.producer.clone());
        self.phase = Phase::Prepared;
        debug!(transactional_id = %self.transactional_id, records, "Transaction flushed");
        Ok(())
    }

    /// Aborts the transaction unless the client already committed it.
    pub async fn abort(&mut self) -> Result<()> {
        if self.phase == Phase::Finished || self.client.is_committed(&self.transactional_id) {
            self.phase = Phase::Finished;
            return Ok(());
        }
        if self.phase == Phase::Prepared
            && self.client.take_prepared(&self.transactional_id).is_none()
        {
            // the client already decided it
            self.phase = Phase::Finished;
            return Ok(());
        }
        // records still in flight are discarded with the transaction
        self.in_flight.clear();
        crate::abort_on(
            self.producer.clone(),
            &self.transactional_id,
            self.client.operation_timeout(),
        )
        .await?;
        self.phase = Phase::Finished;
        info!(transactional_id = %self.transactional_id, "Transaction aborted");
        Ok(())
    }
}

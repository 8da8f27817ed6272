//! [Broker] backed by a Kafka cluster.
//!
//! Kafka cannot tell whether a transactional id was ever used, so fencing always reports
//! [FenceOutcome::Aborted] and the writer's fence window bounds the scan.

use txsink_kafka::{KafkaClient, KafkaConfig, KafkaProducer, KafkaRecord, KafkaTransaction};

use crate::broker::{Broker, FenceOutcome, Producer, Transaction};
use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::record::SerializedRecord;
use crate::state::{CommitInfo, TransactionId};

impl From<SerializedRecord> for KafkaRecord {
    fn from(record: SerializedRecord) -> Self {
        KafkaRecord {
            key: record.key,
            value: record.value,
            headers: record.headers,
            partition: record.partition,
            timestamp: record.timestamp,
        }
    }
}

/// Builds the cluster client from the sink options. `kafka_config` entries are passed through.
pub fn connect(config: &SinkConfig) -> KafkaBroker {
    let mut kafka_config = KafkaConfig::new(config.bootstrap_servers.clone());
    kafka_config.client_config = config.kafka_config.clone();
    KafkaBroker {
        client: KafkaClient::new(kafka_config),
    }
}

#[derive(Clone)]
pub struct KafkaBroker {
    client: KafkaClient,
}

pub struct KafkaSinkProducer {
    producer: KafkaProducer,
    close_timeout: std::time::Duration,
}

pub struct KafkaSinkTransaction {
    id: TransactionId,
    txn: KafkaTransaction,
}

impl Broker for KafkaBroker {
    type Producer = KafkaSinkProducer;
    type Transaction = KafkaSinkTransaction;

    async fn partition_count(&self, topic: &str) -> Result<i32> {
        Ok(self.client.partition_count(topic).await?)
    }

    async fn create_producer(&self, topic: &str) -> Result<Self::Producer> {
        Ok(KafkaSinkProducer {
            producer: self.client.producer(topic)?,
            close_timeout: self.client.operation_timeout(),
        })
    }

    async fn begin_transaction(
        &self,
        topic: &str,
        id: &TransactionId,
    ) -> Result<Self::Transaction> {
        let txn = self
            .client
            .begin_transaction(topic, &id.to_string())
            .await?;
        Ok(KafkaSinkTransaction {
            id: id.clone(),
            txn,
        })
    }

    async fn fence_transaction(&self, id: &TransactionId) -> Result<FenceOutcome> {
        self.client.fence(&id.to_string()).await?;
        Ok(FenceOutcome::Aborted)
    }

    async fn commit_transaction(&self, commit_info: &CommitInfo) -> Result<()> {
        let transaction_id = commit_info.transaction_id.to_string();
        match self.client.commit(&transaction_id).await {
            Err(txsink_kafka::Error::UnknownTransaction(e)) => Err(Error::Transaction(format!(
                "Kafka can only commit {transaction_id} through the producer that prepared it, \
                 and that producer is gone ({e}). The transaction is aborted once \
                 transaction.timeout.ms expires"
            ))),
            result => Ok(result?),
        }
    }

    async fn abort_transaction(&self, commit_info: &CommitInfo) -> Result<()> {
        Ok(self
            .client
            .abort(&commit_info.transaction_id.to_string())
            .await?)
    }
}

impl Producer for KafkaSinkProducer {
    async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        Ok(self.producer.send(record.into()).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.producer.flush().await?)
    }

    async fn close(self) -> Result<()> {
        Ok(self.producer.close(self.close_timeout).await?)
    }
}

impl Transaction for KafkaSinkTransaction {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        Ok(self.txn.send(record.into()).await?)
    }

    async fn prepare(&mut self) -> Result<()> {
        Ok(self.txn.prepare().await?)
    }

    async fn abort(&mut self) -> Result<()> {
        Ok(self.txn.abort().await?)
    }
}

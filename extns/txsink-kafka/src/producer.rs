use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use tracing::{debug, error};

use crate::{Error, KafkaRecord, Result};

/// Pause before retrying a record the client's local queue had no room for.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(10);
/// Outstanding acknowledgements after which a send waits for the ones in flight.
const MAX_PENDING_DELIVERIES: usize = 10_000;

/// Hands the record to the client queue, waiting while the queue is full.
pub(crate) async fn enqueue(
    producer: &FutureProducer,
    topic: &str,
    record: &KafkaRecord,
) -> Result<DeliveryFuture> {
    let mut headers = OwnedHeaders::new();
    for (key, value) in &record.headers {
        headers = headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_str()),
        });
    }

    let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic)
        .headers(headers)
        .payload(record.value.as_ref());
    if let Some(key) = &record.key {
        future_record = future_record.key(key.as_ref());
    }
    if let Some(partition) = record.partition {
        future_record = future_record.partition(partition);
    }
    if let Some(timestamp) = record.timestamp {
        future_record = future_record.timestamp(timestamp);
    }

    loop {
        match producer.send_result(future_record) {
            Ok(delivery) => return Ok(delivery),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                future_record = returned;
                tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
            }
            Err((e, _)) => {
                error!(?e, topic, "Failed to enqueue record");
                return Err(Error::Kafka(format!("Sending payload to kafka: {e:?}")));
            }
        }
    }
}

/// Waits for every delivery and reports the first failure.
pub(crate) async fn await_deliveries(deliveries: Vec<DeliveryFuture>) -> Result<()> {
    let count = deliveries.len();
    let mut pending: FuturesUnordered<DeliveryFuture> = deliveries.into_iter().collect();
    let mut first_error = None;
    while let Some(result) = pending.next().await {
        let failure = match result {
            Ok(Ok(_)) => continue,
            Ok(Err((e, _))) => Error::Kafka(format!("Delivery failed: {e:?}")),
            Err(_) => Error::Other("Delivery was canceled".to_string()),
        };
        if first_error.is_none() {
            first_error = Some(failure);
        }
    }
    debug!(count, "Awaited deliveries");
    first_error.map_or(Ok(()), Err)
}

/// Non-transactional producer for one topic.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    in_flight: Vec<DeliveryFuture>,
}

impl KafkaProducer {
    pub(crate) fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            in_flight: Vec::new(),
        }
    }

    pub async fn send(&mut self, record: KafkaRecord) -> Result<()> {
        if self.in_flight.len() >= MAX_PENDING_DELIVERIES {
            self.flush().await?;
        }
        let delivery = enqueue(&self.producer, &self.topic, &record).await?;
        self.in_flight.push(delivery);
        Ok(())
    }

    /// Waits until every record sent so far is acknowledged.
    pub async fn flush(&mut self) -> Result<()> {
        await_deliveries(std::mem::take(&mut self.in_flight)).await
    }

    pub async fn close(mut self, timeout: Duration) -> Result<()> {
        let delivered = self.flush().await;
        let producer = self.producer;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Other(format!("Flush task failed: {e}")))?
            .map_err(|e| Error::Kafka(format!("Failed to flush producer: {e}")))?;
        delivered
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::producer::{FutureProducer, Producer};
use tracing::{info, warn};

mod producer;
mod transaction;

pub use producer::KafkaProducer;
pub use transaction::KafkaTransaction;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connecting to Kafka {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Kafka - {0}")]
    Kafka(String),

    #[error("Unknown transaction - {0}")]
    UnknownTransaction(String),

    #[error("{0}")]
    Other(String),
}

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
const CLIENT_ID: &str = "txsink";

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConfig {
    pub brokers: String,
    /// librdkafka properties applied on top of the defaults, e.g. `transaction.timeout.ms`.
    pub client_config: HashMap<String, String>,
    /// Upper bound for blocking transactional calls and metadata requests.
    pub operation_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            client_config: HashMap::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// A record ready to be produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KafkaRecord {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    /// `None` leaves the partition to the client's partitioner.
    pub partition: Option<i32>,
    /// `None` lets the client stamp the create time.
    pub timestamp: Option<i64>,
}

/// Prepared transactions waiting for the coordinator's decision, keyed by transactional id.
#[derive(Default)]
struct Registry {
    prepared: HashMap<String, FutureProducer>,
    committed: CommittedIds,
}

/// Transactional ids this process committed.
///
/// Ids of the form `<prefix>-<checkpoint>` are committed in ascending checkpoint order, so only
/// the highest committed checkpoint per prefix is kept and everything at or below it counts as
/// committed. The set stays bounded by the number of prefixes.
#[derive(Debug, Default)]
struct CommittedIds {
    highest: HashMap<String, u64>,
    others: HashSet<String>,
}

impl CommittedIds {
    fn insert(&mut self, transactional_id: &str) {
        match split_transactional_id(transactional_id) {
            Some((prefix, checkpoint_id)) => {
                let highest = self.highest.entry(prefix.to_string()).or_default();
                *highest = (*highest).max(checkpoint_id);
            }
            None => {
                self.others.insert(transactional_id.to_string());
            }
        }
    }

    fn contains(&self, transactional_id: &str) -> bool {
        match split_transactional_id(transactional_id) {
            Some((prefix, checkpoint_id)) => self
                .highest
                .get(prefix)
                .is_some_and(|highest| checkpoint_id <= *highest),
            None => self.others.contains(transactional_id),
        }
    }
}

fn split_transactional_id(transactional_id: &str) -> Option<(&str, u64)> {
    let (prefix, checkpoint_id) = transactional_id.rsplit_once('-')?;
    Some((prefix, checkpoint_id.parse().ok()?))
}

/// Entry point to the cluster: hands out producers and transactions, and commits or aborts
/// prepared transactions by id.
///
/// A transaction can only be committed through the producer that began it, so commits work
/// for transactions prepared by this process. A prepared transaction of a previous process is
/// reported as [Error::UnknownTransaction].
#[derive(Clone)]
pub struct KafkaClient {
    config: KafkaConfig,
    registry: Arc<Mutex<Registry>>,
}

impl KafkaClient {
    pub fn new(config: KafkaConfig) -> Self {
        info!(
            brokers = %config.brokers,
            overrides = ?config.client_config.keys().collect::<Vec<_>>(),
            "Kafka client configured"
        );
        Self {
            config,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", CLIENT_ID)
            .set_log_level(RDKafkaLogLevel::Warning);
        for (key, value) in &self.config.client_config {
            client_config.set(key, value);
        }
        client_config
    }

    fn create(&self, client_config: &ClientConfig) -> Result<FutureProducer> {
        client_config.create().map_err(|err| Error::Connection {
            server: self.config.brokers.clone(),
            error: err.to_string(),
        })
    }

    /// Number of partitions of `topic`, from the cluster metadata.
    pub async fn partition_count(&self, topic: &str) -> Result<i32> {
        let producer = self.create(&self.client_config())?;
        let timeout = self.config.operation_timeout;
        let topic = topic.to_string();
        tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| Error::Kafka(format!("Failed to fetch metadata: {e}")))?;
            let topic_metadata = metadata
                .topics()
                .first()
                .ok_or_else(|| Error::Kafka(format!("No metadata found for topic {topic}")))?;
            if let Some(err) = topic_metadata.error() {
                return Err(Error::Kafka(format!(
                    "Metadata error for topic {topic}: {err:?}"
                )));
            }
            i32::try_from(topic_metadata.partitions().len())
                .map_err(|e| Error::Other(format!("Partition count out of range: {e}")))
        })
        .await
        .map_err(|e| Error::Other(format!("Metadata task failed: {e}")))?
    }

    /// A plain producer. Records are delivered individually, with no transaction.
    pub fn producer(&self, topic: &str) -> Result<KafkaProducer> {
        let producer = self.create(&self.client_config())?;
        Ok(KafkaProducer::new(producer, topic))
    }

    /// Creates a producer for `transactional_id` and opens a transaction on it. Initializing
    /// the id aborts whatever an earlier producer with the same id left open or prepared.
    pub async fn begin_transaction(
        &self,
        topic: &str,
        transactional_id: &str,
    ) -> Result<KafkaTransaction> {
        let producer = self.init_transactional(transactional_id).await?;
        let begin = producer.clone();
        tokio::task::spawn_blocking(move || begin.begin_transaction())
            .await
            .map_err(|e| Error::Other(format!("Begin transaction task failed: {e}")))?
            .map_err(|e| {
                Error::Kafka(format!(
                    "Failed to begin transaction {transactional_id}: {e}"
                ))
            })?;
        Ok(KafkaTransaction::new(
            self.clone(),
            producer,
            topic,
            transactional_id,
        ))
    }

    /// Fences `transactional_id`: any transaction an earlier producer left under it is aborted
    /// and that producer can no longer write.
    pub async fn fence(&self, transactional_id: &str) -> Result<()> {
        let producer = self.init_transactional(transactional_id).await?;
        drop(producer);
        Ok(())
    }

    async fn init_transactional(&self, transactional_id: &str) -> Result<FutureProducer> {
        let mut client_config = self.client_config();
        client_config.set("transactional.id", transactional_id);
        let producer = self.create(&client_config)?;

        let timeout = self.config.operation_timeout;
        let init = producer.clone();
        tokio::task::spawn_blocking(move || init.init_transactions(timeout))
            .await
            .map_err(|e| Error::Other(format!("Init transactions task failed: {e}")))?
            .map_err(|e| {
                Error::Kafka(format!(
                    "Failed to init transactions for {transactional_id}: {e}"
                ))
            })?;
        Ok(producer)
    }

    /// Commits a transaction prepared by this process. Committing it twice is a no-op.
    pub async fn commit(&self, transactional_id: &str) -> Result<()> {
        let producer = {
            let mut registry = self.registry.lock();
            match registry.prepared.remove(transactional_id) {
                Some(producer) => Some(producer),
                None if registry.committed.contains(transactional_id) => return Ok(()),
                None => None,
            }
        };
        let Some(producer) = producer else {
            return Err(Error::UnknownTransaction(format!(
                "{transactional_id} is not prepared by this process"
            )));
        };

        let timeout = self.config.operation_timeout;
        let commit = producer.clone();
        let result = tokio::task::spawn_blocking(move || commit.commit_transaction(timeout))
            .await
            .map_err(|e| Error::Other(format!("Commit task failed: {e}")))?;

        let mut registry = self.registry.lock();
        match result {
            Ok(()) => {
                registry.committed.insert(transactional_id);
                Ok(())
            }
            Err(e) => {
                // still prepared, so a later abort can find it
                registry
                    .prepared
                    .insert(transactional_id.to_string(), producer);
                Err(Error::Kafka(format!(
                    "Failed to commit transaction {transactional_id}: {e}"
                )))
            }
        }
    }

    /// Aborts a transaction prepared by this process. Unknown or committed ids are left alone.
    pub async fn abort(&self, transactional_id: &str) -> Result<()> {
        let producer = self.registry.lock().prepared.remove(transactional_id);
        let Some(producer) = producer else {
            warn!(transactional_id, "No prepared transaction to abort");
            return Ok(());
        };
        abort_on(producer, transactional_id, self.config.operation_timeout).await
    }

    fn register_prepared(&self, transactional_id: &str, producer: FutureProducer) {
        self.registry
            .lock()
            .prepared
            .insert(transactional_id.to_string(), producer);
    }

    fn take_prepared(&self, transactional_id: &str) -> Option<FutureProducer> {
        self.registry.lock().prepared.remove(transactional_id)
    }

    fn is_committed(&self, transactional_id: &str) -> bool {
        self.registry.lock().committed.contains(transactional_id)
    }
}

async fn abort_on(
    producer: FutureProducer,
    transactional_id: &str,
    timeout: Duration,
) -> Result<()> {
    tokio::task::spawn_blocking(move || producer.abort_transaction(timeout))
        .await
        .map_err(|e| Error::Other(format!("Abort task failed: {e}")))?
        .map_err(|e| {
            Error::Kafka(format!(
                "Failed to abort transaction {transactional_id}: {e}"
            ))
        })
}

#[cfg(test)]
mod test_utils {
    use rdkafka::ClientConfig;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use uuid::Uuid;

    pub(crate) const BROKERS: &str = "localhost:9092";

    pub(crate) async fn setup_test_topic(partitions: i32) -> String {
        let topic_name = format!(
            "txsink_test_topic_{}",
            Uuid::new_v4().to_string().replace("-", "")
        );

        let admin_client = ClientConfig::new()
            .set("bootstrap.servers", BROKERS)
            .create::<AdminClient<_>>()
            .expect("Failed to create admin client");

        let topic_config =
            NewTopic::new(topic_name.as_str(), partitions, TopicReplication::Fixed(1));
        let _ = admin_client
            .create_topics(&[topic_config], &AdminOptions::new())
            .await
            .expect("Failed to create topic");

        topic_name
    }

    pub(crate) async fn consume_committed(topic: &str, expected: usize) -> Vec<String> {
        use rdkafka::consumer::{Consumer, StreamConsumer};
        use rdkafka::message::Message;
        use std::time::Duration;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", BROKERS)
            .set("group.id", format!("txsink-test-{}", Uuid::new_v4()))
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed")
            .create()
            .expect("Failed to create consumer");
        consumer.subscribe(&[topic]).expect("Failed to subscribe");

        let mut values = Vec::new();
        while values.len() < expected {
            match tokio::time::timeout(Duration::from_secs(10), consumer.recv()).await {
                Ok(Ok(msg)) => values.push(
                    String::from_utf8_lossy(msg.payload().unwrap_or_default()).to_string(),
                ),
                Ok(Err(e)) => panic!("Kafka error: {e}"),
                Err(_) => break,
            }
        }
        values
    }
}

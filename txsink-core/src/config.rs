use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::RowType;

const ENV_SETTINGS_OBJ: &str = "TXSINK_SETTINGS_OBJECT";
const DEFAULT_FIELD_DELIMITER: &str = ",";
const DEFAULT_FENCE_WINDOW: u64 = 10;
const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_STATE_PATH: &str = "txsink-state.json";

/// Delivery guarantee of a writer, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliverySemantics {
    /// Fire and forget. Sends are never awaited at checkpoints.
    #[default]
    #[serde(alias = "NON")]
    None,
    /// Every send issued before a checkpoint is acknowledged before the checkpoint completes.
    AtLeastOnce,
    /// One broker transaction per checkpoint interval, committed by the coordinator.
    ExactlyOnce,
}

impl fmt::Display for DeliverySemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliverySemantics::None => write!(f, "NONE"),
            DeliverySemantics::AtLeastOnce => write!(f, "AT_LEAST_ONCE"),
            DeliverySemantics::ExactlyOnce => write!(f, "EXACTLY_ONCE"),
        }
    }
}

/// Encoding of the record value (and key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// The row already carries `headers`, `key`, `partition`, `timestamp` and `value` columns.
    Native,
    #[default]
    Text,
    Json,
}

/// Options recognized by the sink writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub semantics: DeliverySemantics,
    pub topic: String,
    pub bootstrap_servers: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default = "default_field_delimiter")]
    pub field_delimiter: String,
    #[serde(default)]
    pub partition: Option<i32>,
    #[serde(default)]
    pub partition_key_fields: Option<Vec<String>>,
    #[serde(default)]
    pub assign_partitions: Option<Vec<String>>,
    #[serde(default)]
    pub transaction_prefix: Option<String>,
    /// Passed through to the broker client untouched.
    #[serde(default)]
    pub kafka_config: HashMap<String, String>,
    /// How many ids past the last checkpoint are fenced at recovery when the broker cannot say
    /// whether an id was ever used.
    #[serde(default = "default_fence_window")]
    pub fence_window: u64,
}

fn default_field_delimiter() -> String {
    DEFAULT_FIELD_DELIMITER.to_string()
}

fn default_fence_window() -> u64 {
    DEFAULT_FENCE_WINDOW
}

impl SinkConfig {
    pub fn new(topic: impl Into<String>, bootstrap_servers: impl Into<String>) -> Self {
        Self {
            semantics: DeliverySemantics::default(),
            topic: topic.into(),
            bootstrap_servers: bootstrap_servers.into(),
            format: MessageFormat::default(),
            field_delimiter: default_field_delimiter(),
            partition: None,
            partition_key_fields: None,
            assign_partitions: None,
            transaction_prefix: None,
            kafka_config: HashMap::new(),
            fence_window: DEFAULT_FENCE_WINDOW,
        }
    }

    /// Checks the options that do not depend on the row schema.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Config("topic must not be empty".to_string()));
        }
        if self.bootstrap_servers.trim().is_empty() {
            return Err(Error::Config(
                "bootstrap_servers must not be empty".to_string(),
            ));
        }
        if self.field_delimiter.is_empty() {
            return Err(Error::Config(
                "field_delimiter must not be empty".to_string(),
            ));
        }
        if self.semantics == DeliverySemantics::ExactlyOnce && self.fence_window == 0 {
            return Err(Error::Config(
                "fence_window must be at least 1 for EXACTLY_ONCE".to_string(),
            ));
        }
        if self
            .transaction_prefix
            .as_ref()
            .is_some_and(|prefix| prefix.trim().is_empty())
        {
            return Err(Error::Config(
                "transaction_prefix must not be blank when set".to_string(),
            ));
        }
        self.check_partition_strategy()
    }

    /// At most one of `partition`, `partition_key_fields` and `assign_partitions` may be set.
    pub fn check_partition_strategy(&self) -> Result<()> {
        let configured: Vec<&str> = [
            ("partition", self.partition.is_some()),
            ("partition_key_fields", self.partition_key_fields.is_some()),
            ("assign_partitions", self.assign_partitions.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();

        if configured.len() > 1 {
            return Err(Error::Config(format!(
                "Cannot select more than one partition strategy, got {}. You can configure only one of them",
                configured.join(" and ")
            )));
        }
        Ok(())
    }
}

/// Everything the runner needs: the sink options, the schema of the incoming rows and where the
/// local coordinator keeps its checkpoint record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub sink: SinkConfig,
    pub schema: RowType,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_checkpoint_interval_ms() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL_MS
}

impl Settings {
    /// Loads the settings from `TXSINK_SETTINGS_OBJECT`, a base64 encoded JSON document.
    pub fn load() -> Result<Self> {
        let obj = env::var(ENV_SETTINGS_OBJ)
            .map_err(|_| Error::Config(format!("{ENV_SETTINGS_OBJ} is not set")))?;
        Self::load_encoded(&obj)
    }

    pub fn load_encoded(encoded: &str) -> Result<Self> {
        let decoded = BASE64_STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("Failed to decode settings: {e:?}")))?;
        Self::parse(&decoded)
    }

    pub async fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read settings file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    fn parse(content: &[u8]) -> Result<Self> {
        let settings: Settings = serde_json::from_slice(content)
            .map_err(|e| Error::Config(format!("Failed to parse settings: {e:?}")))?;
        settings.sink.validate()?;
        if settings.checkpoint_interval_ms == 0 {
            return Err(Error::Config(
                "checkpoint_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_json() -> &'static str {
        r#"{
            "sink": {
                "semantics": "EXACTLY_ONCE",
                "topic": "orders",
                "bootstrap_servers": "localhost:9092",
                "format": "text",
                "field_delimiter": "|",
                "partition_key_fields": ["id"],
                "transaction_prefix": "T",
                "kafka_config": {"linger.ms": "5"}
            },
            "schema": [
                {"name": "id", "type": "bigint"},
                {"name": "name", "type": "string"}
            ],
            "checkpoint_interval_ms": 500
        }"#
    }

    #[test]
    fn test_load_encoded_settings() {
        let encoded = BASE64_STANDARD.encode(settings_json());
        let settings = Settings::load_encoded(&encoded).unwrap();

        assert_eq!(settings.sink.semantics, DeliverySemantics::ExactlyOnce);
        assert_eq!(settings.sink.field_delimiter, "|");
        assert_eq!(settings.sink.fence_window, DEFAULT_FENCE_WINDOW);
        assert_eq!(
            settings.sink.kafka_config.get("linger.ms").map(String::as_str),
            Some("5")
        );
        assert_eq!(settings.schema.len(), 2);
        assert_eq!(settings.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert_eq!(settings.checkpoint_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_encoded_rejects_garbage() {
        assert!(matches!(
            Settings::load_encoded("not base64!!"),
            Err(Error::Config(_))
        ));
        let encoded = BASE64_STANDARD.encode("{\"sink\": {}}");
        assert!(matches!(
            Settings::load_encoded(&encoded),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, settings_json()).await.unwrap();
        let settings = Settings::load_file(&path).await.unwrap();
        assert_eq!(settings.sink.topic, "orders");

        assert!(Settings::load_file(dir.path().join("missing.json")).await.is_err());
    }

    #[test]
    fn test_semantics_aliases() {
        let semantics: DeliverySemantics = serde_json::from_str("\"NON\"").unwrap();
        assert_eq!(semantics, DeliverySemantics::None);
        let semantics: DeliverySemantics = serde_json::from_str("\"AT_LEAST_ONCE\"").unwrap();
        assert_eq!(semantics, DeliverySemantics::AtLeastOnce);
        assert_eq!(DeliverySemantics::ExactlyOnce.to_string(), "EXACTLY_ONCE");
    }

    #[test]
    fn test_validate() {
        let config = SinkConfig::new("orders", "localhost:9092");
        assert!(config.validate().is_ok());

        let mut config = SinkConfig::new("", "localhost:9092");
        assert!(config.validate().is_err());
        config.topic = "orders".to_string();
        config.bootstrap_servers = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = SinkConfig::new("orders", "localhost:9092");
        config.semantics = DeliverySemantics::ExactlyOnce;
        config.fence_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partition_strategies_are_exclusive() {
        let mut config = SinkConfig::new("orders", "localhost:9092");
        config.partition = Some(1);
        assert!(config.validate().is_ok());

        config.partition_key_fields = Some(vec!["id".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("partition and partition_key_fields"));

        config.partition = None;
        config.assign_partitions = Some(vec!["shoe".to_string()]);
        assert!(config.validate().is_err());
    }
}

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use txsink_core::Error;
use txsink_core::config::{DeliverySemantics, MessageFormat, SinkConfig};
use txsink_core::partitioner::{default_partition, murmur2};
use txsink_core::row::{Field, Row, RowType, SqlType, Value};
use txsink_core::serializer::TextDeserializer;
use txsink_core::writer::SinkWriter;
use txsink_testing::memorybroker::MemoryBroker;

const TOPIC: &str = "events";

fn row_type() -> Arc<RowType> {
    Arc::new(
        RowType::new(vec![
            Field::new("user", SqlType::String),
            Field::new("action", SqlType::String),
            Field::new("amount", SqlType::BigInt),
        ])
        .unwrap(),
    )
}

fn row(user: &str, action: &str, amount: i64) -> Row {
    Row::new(vec![
        Value::String(user.to_string()),
        Value::String(action.to_string()),
        Value::BigInt(amount),
    ])
}

fn config(semantics: DeliverySemantics) -> SinkConfig {
    let mut config = SinkConfig::new(TOPIC, "memory:9092");
    config.semantics = semantics;
    config
}

#[tokio::test]
async fn test_none_semantics_sends_directly_and_never_flushes() {
    let broker = MemoryBroker::new(1);
    let mut writer = SinkWriter::new(
        config(DeliverySemantics::None),
        row_type(),
        vec![],
        broker.clone(),
    )
    .await
    .unwrap();
    assert!(writer.current_transaction().is_none());

    writer.write(&row("u1", "buy", 10)).await.unwrap();
    assert_eq!(broker.committed_records(TOPIC).len(), 1);

    // a failing flush is never observed
    broker.error_injector().fail_flushes(1);
    assert!(writer.snapshot_state(1).await.unwrap().is_empty());
    assert!(writer.prepare_commit().await.unwrap().is_none());
    writer.abort_prepare().await.unwrap();
    assert!(broker.live_transactions().is_empty());
}

#[tokio::test]
async fn test_at_least_once_flushes_at_snapshot() {
    let broker = MemoryBroker::new(1);
    let mut writer = SinkWriter::new(
        config(DeliverySemantics::AtLeastOnce),
        row_type(),
        vec![],
        broker.clone(),
    )
    .await
    .unwrap();
    writer.write(&row("u1", "buy", 10)).await.unwrap();

    broker.error_injector().fail_flushes(1);
    assert!(matches!(
        writer.snapshot_state(1).await,
        Err(Error::Broker(_))
    ));
    assert!(writer.snapshot_state(2).await.unwrap().is_empty());
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_send_waits_while_buffer_is_full() {
    let broker = MemoryBroker::new(1);
    let mut writer = SinkWriter::new(
        config(DeliverySemantics::None),
        row_type(),
        vec![],
        broker.clone(),
    )
    .await
    .unwrap();

    let injector = broker.error_injector();
    injector.set_buffer_full(true);
    let write = tokio::spawn(async move {
        writer.write(&row("u1", "buy", 10)).await.map(|_| writer)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!write.is_finished());
    assert!(broker.committed_records(TOPIC).is_empty());

    injector.set_buffer_full(false);
    let writer = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(broker.committed_records(TOPIC).len(), 1);
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_partition_strategies_are_exclusive() {
    let broker = MemoryBroker::new(4);

    let mut both = config(DeliverySemantics::None);
    both.partition = Some(1);
    both.partition_key_fields = Some(vec!["user".to_string()]);
    let err = SinkWriter::new(both, row_type(), vec![], broker.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));

    let mut fixed_and_assigned = config(DeliverySemantics::None);
    fixed_and_assigned.partition = Some(1);
    fixed_and_assigned.assign_partitions = Some(vec!["vip".to_string()]);
    assert!(
        SinkWriter::new(fixed_and_assigned, row_type(), vec![], broker.clone())
            .await
            .is_err()
    );

    let mut unknown_key = config(DeliverySemantics::None);
    unknown_key.partition_key_fields = Some(vec!["missing".to_string()]);
    assert!(
        SinkWriter::new(unknown_key, row_type(), vec![], broker)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_fixed_partition() {
    let broker = MemoryBroker::new(3);
    let mut config = config(DeliverySemantics::None);
    config.partition = Some(2);
    let mut writer = SinkWriter::new(config, row_type(), vec![], broker.clone())
        .await
        .unwrap();
    writer.write(&row("u1", "buy", 1)).await.unwrap();
    writer.write(&row("u2", "sell", 2)).await.unwrap();
    assert_eq!(broker.partition_records(TOPIC, 2).len(), 2);
}

#[tokio::test]
async fn test_key_fields_route_by_key_hash() {
    let broker = MemoryBroker::new(4);
    let mut config = config(DeliverySemantics::None);
    config.partition_key_fields = Some(vec!["user".to_string(), "action".to_string()]);
    let mut writer = SinkWriter::new(config, row_type(), vec![], broker.clone())
        .await
        .unwrap();
    writer.write(&row("u1", "buy", 1)).await.unwrap();

    let records = broker.committed_records(TOPIC);
    assert_eq!(records.len(), 1);
    let record = records.into_iter().next().unwrap();
    assert_eq!(record.key, Some(Bytes::from_static(b"u1,buy")));
    assert_eq!(
        record.partition,
        Some(default_partition(Some(&b"u1,buy"[..]), 4, 0))
    );
}

#[tokio::test]
async fn test_assigned_partitions_reserve_the_lower_partitions() {
    let broker = MemoryBroker::new(1);
    broker.create_topic(TOPIC, 5);
    let mut config = config(DeliverySemantics::None);
    config.assign_partitions = Some(vec!["refund".to_string(), "chargeback".to_string()]);
    let mut writer = SinkWriter::new(config, row_type(), vec![], broker.clone())
        .await
        .unwrap();

    writer.write(&row("u1", "refund", 1)).await.unwrap();
    writer.write(&row("u2", "chargeback", 2)).await.unwrap();
    writer.write(&row("u3", "buy", 3)).await.unwrap();

    assert_eq!(broker.partition_records(TOPIC, 0).len(), 1);
    assert_eq!(broker.partition_records(TOPIC, 1).len(), 1);
    let expected = (murmur2(b"u3,buy,3") & 0x7fff_ffff) % 3 + 2;
    let other = broker.partition_records(TOPIC, expected);
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].value, Bytes::from_static(b"u3,buy,3"));
}

#[tokio::test]
async fn test_text_records_read_back_as_the_same_rows() {
    let broker = MemoryBroker::new(1);
    let mut config = config(DeliverySemantics::None);
    config.field_delimiter = "|".to_string();
    let mut writer = SinkWriter::new(config, row_type(), vec![], broker.clone())
        .await
        .unwrap();
    let rows = vec![row("u1", "buy", 10), row("u2", "sell", -3)];
    for row in &rows {
        writer.write(row).await.unwrap();
    }

    let deserializer = TextDeserializer::new(row_type(), "|");
    let read_back: Vec<Row> = broker
        .committed_records(TOPIC)
        .iter()
        .map(|record| deserializer.deserialize(std::str::from_utf8(&record.value).unwrap()))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(read_back, rows);
}

#[tokio::test]
async fn test_json_records_carry_a_json_key() {
    let broker = MemoryBroker::new(2);
    let mut config = config(DeliverySemantics::None);
    config.format = MessageFormat::Json;
    config.partition_key_fields = Some(vec!["user".to_string()]);
    let mut writer = SinkWriter::new(config, row_type(), vec![], broker.clone())
        .await
        .unwrap();
    writer.write(&row("u1", "buy", 10)).await.unwrap();

    let record = broker.committed_records(TOPIC).into_iter().next().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&record.value).unwrap();
    assert_eq!(
        value,
        serde_json::json!({"user": "u1", "action": "buy", "amount": 10})
    );
    let key: serde_json::Value = serde_json::from_slice(&record.key.unwrap()).unwrap();
    assert_eq!(key, serde_json::json!({"user": "u1"}));
}

#[tokio::test]
async fn test_row_not_matching_the_schema_is_rejected() {
    let broker = MemoryBroker::new(1);
    let mut writer = SinkWriter::new(
        config(DeliverySemantics::None),
        row_type(),
        vec![],
        broker.clone(),
    )
    .await
    .unwrap();
    let short = Row::new(vec![Value::String("u1".to_string())]);
    assert!(matches!(
        writer.write(&short).await,
        Err(Error::Serialization(_))
    ));
    let mistyped = Row::new(vec![
        Value::String("u1".to_string()),
        Value::Int(1),
        Value::BigInt(1),
    ]);
    assert!(writer.write(&mistyped).await.is_err());
    assert!(broker.committed_records(TOPIC).is_empty());
}

#[tokio::test]
async fn test_non_utf8_bytes_are_never_sent_as_text() {
    let broker = MemoryBroker::new(1);
    let row_type = Arc::new(RowType::new(vec![Field::new("payload", SqlType::Bytes)]).unwrap());
    let mut writer = SinkWriter::new(
        config(DeliverySemantics::None),
        row_type,
        vec![],
        broker.clone(),
    )
    .await
    .unwrap();
    let row = Row::new(vec![Value::Bytes(Bytes::from_static(&[0xff, 0xfe, b'a']))]);
    assert!(matches!(
        writer.write(&row).await,
        Err(Error::Serialization(_))
    ));
    assert!(broker.committed_records(TOPIC).is_empty());
}

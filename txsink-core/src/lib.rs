//! A sink that streams schema-typed rows into a partitioned message log with either
//! best-effort or exactly-once delivery.
//!
//! Exactly-once delivery runs one broker transaction per checkpoint interval. The
//! [writer::SinkWriter] stages the open transaction at each snapshot and immediately begins the
//! next one; the [coordinator::CheckpointCoordinator] prepares, persists and commits. A writer
//! recovering from a persisted [state::SinkState] fences every transaction a crashed
//! predecessor may have left behind before it begins new work.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use crate::error::{Error, Result};

pub mod broker;
pub mod committer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod partitioner;
pub mod record;
pub mod row;
pub mod sender;
pub mod serializer;
pub mod state;
pub mod writer;

use crate::broker::Broker;
use crate::config::Settings;
use crate::coordinator::{CheckpointCoordinator, FileStateStore, StateStore};
use crate::serializer::RowDeserializer;

/// Runs the sink against the Kafka cluster named in the settings.
pub async fn run<R>(settings: Settings, input: R, cancel: CancellationToken) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
{
    let broker = broker::kafka::connect(&settings.sink);
    let store = FileStateStore::new(settings.state_path.clone());
    run_with(settings, broker, store, input, cancel).await
}

/// Reads newline-delimited rows from `input` and writes them through a restored
/// [CheckpointCoordinator]. A checkpoint is taken every checkpoint interval and once more at the
/// end of the input. On cancellation the writer is closed, which discards the open transaction.
pub async fn run_with<B, S, R>(
    settings: Settings,
    broker: B,
    store: S,
    input: R,
    cancel: CancellationToken,
) -> Result<()>
where
    B: Broker,
    S: StateStore,
    R: AsyncBufRead + Unpin + Send,
{
    let row_type = Arc::new(settings.schema.clone());
    let deserializer = RowDeserializer::new(&settings.sink, Arc::clone(&row_type));
    let mut coordinator =
        CheckpointCoordinator::restore(settings.sink.clone(), row_type, broker, store).await?;
    info!(
        checkpoint_id = coordinator.checkpoint_id(),
        "Sink restored, reading rows"
    );

    let mut lines = input.lines();
    let mut ticker = tokio::time::interval(settings.checkpoint_interval());
    // the first tick completes immediately
    ticker.tick().await;

    let mut rows_since_checkpoint = 0usize;
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Cancellation requested, closing sink writer");
                return coordinator.close().await;
            }

            _ = ticker.tick() => {
                let checkpoint_id = coordinator.checkpoint().await?;
                debug!(checkpoint_id, rows = rows_since_checkpoint, "Periodic checkpoint");
                rows_since_checkpoint = 0;
            }

            line = lines.next_line() => {
                let line = line.map_err(|e| Error::Io(format!("Failed to read input: {e}")))?;
                let Some(line) = line else {
                    let checkpoint_id = coordinator.checkpoint().await?;
                    info!(checkpoint_id, rows = rows_since_checkpoint, "Input exhausted");
                    return coordinator.close().await;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let row = deserializer.deserialize(&line)?;
                coordinator.write(&row).await?;
                rows_since_checkpoint += 1;
            }
        }
    }
}

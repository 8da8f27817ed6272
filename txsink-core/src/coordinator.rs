//! A local, single-writer checkpoint coordinator.
//!
//! Each checkpoint runs snapshot, prepare, persist (with the pending commits), commit, persist
//! (pending commits cleared). A commit that fails keeps its transaction pending, and the next
//! checkpoint persists and commits it again together with its own. A record that still lists
//! pending commits at restart means the process died before they went through; those
//! transactions are committed again before the writer is rebuilt.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::committer::SinkCommitter;
use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::row::{Row, RowType};
use crate::state::{CommitInfo, SinkState};
use crate::writer::SinkWriter;

/// What the coordinator persists after every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: u64,
    pub states: Vec<SinkState>,
    #[serde(default)]
    pub pending_commits: Vec<CommitInfo>,
}

/// Durable storage for the latest [CheckpointRecord].
#[trait_variant::make(Send)]
pub trait StateStore: Sync + 'static {
    async fn load(&self) -> Result<Option<CheckpointRecord>>;

    /// Replaces the stored record. Either the old or the new record survives a crash.
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;
}

/// Keeps the record as JSON in a single file, replaced atomically through a rename.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<CheckpointRecord>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::State(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let record = serde_json::from_slice(&content).map_err(|e| {
            Error::State(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let content = serde_json::to_vec_pretty(record)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            Error::State(format!("Failed to write {}: {e}", temp_path.display()))
        })?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| {
                Error::State(format!(
                    "Failed to replace {}: {e}",
                    self.path.display()
                ))
            })
    }
}

/// Drives one [SinkWriter] through the checkpoint cycle and persists its state.
pub struct CheckpointCoordinator<B: Broker, S: StateStore> {
    writer: SinkWriter<B>,
    committer: SinkCommitter<B>,
    store: S,
    checkpoint_id: u64,
    /// Prepared transactions whose commit has not succeeded yet. Every persisted record lists
    /// them until they are committed.
    pending_commits: Vec<CommitInfo>,
}

impl<B: Broker, S: StateStore> CheckpointCoordinator<B, S> {
    /// Loads the last record, finishes its pending commits and builds the writer from the
    /// recovered states. Checkpoint ids continue after the stored one.
    pub async fn restore(
        config: SinkConfig,
        row_type: Arc<RowType>,
        broker: B,
        store: S,
    ) -> Result<Self> {
        let committer = SinkCommitter::new(broker.clone());
        let record = store.load().await?.unwrap_or_default();

        if !record.pending_commits.is_empty() {
            info!(
                checkpoint_id = record.checkpoint_id,
                pending = record.pending_commits.len(),
                "Finishing commits of the last checkpoint"
            );
            if let Err(e) = committer.commit(record.pending_commits.clone()).await {
                error!(
                    checkpoint_id = record.checkpoint_id,
                    ?e,
                    "Failed to finish the pending commits"
                );
                return Err(pending_commit_error(&record, e));
            }
            store
                .save(&CheckpointRecord {
                    pending_commits: vec![],
                    ..record.clone()
                })
                .await?;
        }

        let writer = SinkWriter::new(config, row_type, record.states, broker).await?;
        Ok(Self {
            writer,
            committer,
            store,
            checkpoint_id: record.checkpoint_id,
            pending_commits: vec![],
        })
    }

    pub async fn write(&mut self, row: &Row) -> Result<()> {
        self.writer.write(row).await
    }

    /// Runs one checkpoint and returns its id.
    pub async fn checkpoint(&mut self) -> Result<u64> {
        let checkpoint_id = self.checkpoint_id + 1;
        // the writer has begun the next transaction once the snapshot ran, so the id of a
        // failed checkpoint is never handed out again
        self.checkpoint_id = checkpoint_id;
        let states = self.writer.snapshot_state(checkpoint_id).await?;

        let commit_info = match self.writer.prepare_commit().await {
            Ok(commit_info) => commit_info,
            Err(e) => {
                error!(checkpoint_id, ?e, "Checkpoint failed during prepare");
                self.abort_prepare().await;
                return Err(e);
            }
        };
        // commits that failed in earlier checkpoints stay pending next to the new one
        let prepared = commit_info.is_some();
        let mut pending_commits = self.pending_commits.clone();
        pending_commits.extend(commit_info);

        let record = CheckpointRecord {
            checkpoint_id,
            states,
            pending_commits,
        };
        if let Err(e) = self.store.save(&record).await {
            error!(checkpoint_id, ?e, "Checkpoint failed while persisting state");
            // only this checkpoint's transaction, the earlier pending ones stay prepared
            if prepared {
                self.abort_prepare().await;
            }
            return Err(e);
        }
        self.pending_commits = record.pending_commits.clone();

        if !self.pending_commits.is_empty() {
            if let Err(e) = self.committer.commit(self.pending_commits.clone()).await {
                error!(
                    checkpoint_id,
                    pending = self.pending_commits.len(),
                    ?e,
                    "Checkpoint failed during commit, retrying with the next checkpoint"
                );
                return Err(e);
            }
            self.pending_commits.clear();
            self.store
                .save(&CheckpointRecord {
                    pending_commits: vec![],
                    ..record
                })
                .await?;
        }
        info!(checkpoint_id, "Checkpoint complete");
        Ok(checkpoint_id)
    }

    async fn abort_prepare(&mut self) {
        if let Err(abort_err) = self.writer.abort_prepare().await {
            warn!(?abort_err, "Failed to abort the prepared transaction");
        }
    }

    /// Prepared transactions still waiting for a successful commit.
    pub fn pending_commits(&self) -> &[CommitInfo] {
        &self.pending_commits
    }

    pub fn checkpoint_id(&self) -> u64 {
        self.checkpoint_id
    }

    pub fn writer(&self) -> &SinkWriter<B> {
        &self.writer
    }

    pub async fn close(self) -> Result<()> {
        self.writer.close().await
    }
}

/// Error for pending commits that cannot be finished at restart. The stored record keeps them,
/// so every restart fails the same way until the operator decides what happens to them.
fn pending_commit_error(record: &CheckpointRecord, err: Error) -> Error {
    let ids = record
        .pending_commits
        .iter()
        .map(|commit_info| commit_info.transaction_id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::State(format!(
        "Cannot finish the pending commits [{ids}] of checkpoint {}: {err}. \
         If the broker no longer holds these prepared transactions, remove them from \
         pending_commits in the state file to restart without their rows",
        record.checkpoint_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TransactionId;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let record = CheckpointRecord {
            checkpoint_id: 3,
            states: vec![SinkState::new("T", 3)],
            pending_commits: vec![CommitInfo::new(TransactionId::new("T", 3))],
        };
        store.save(&record).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(record.clone()));

        let cleared = CheckpointRecord {
            pending_commits: vec![],
            ..record
        };
        store.save(&cleared).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cleared));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = FileStateStore::new(&path);
        assert!(matches!(store.load().await, Err(Error::State(_))));
    }
}

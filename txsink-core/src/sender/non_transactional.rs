use tracing::{debug, info};

use crate::broker::Producer;
use crate::error::Result;
use crate::record::SerializedRecord;
use crate::state::{CommitInfo, SinkState};

/// Best-effort sender. Every send is an independent delivery; nothing is ever committed.
pub struct NonTransactionalSender<P> {
    producer: P,
    /// when set, a snapshot completes only after every earlier send is acknowledged
    flush_on_snapshot: bool,
    sent_since_snapshot: usize,
}

impl<P: Producer> NonTransactionalSender<P> {
    pub fn new(producer: P, flush_on_snapshot: bool) -> Self {
        Self {
            producer,
            flush_on_snapshot,
            sent_since_snapshot: 0,
        }
    }

    pub async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        self.producer.send(record).await?;
        self.sent_since_snapshot += 1;
        Ok(())
    }

    pub async fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Option<SinkState>> {
        if self.flush_on_snapshot {
            self.producer.flush().await?;
            debug!(
                checkpoint_id,
                records = self.sent_since_snapshot,
                "Flushed sends at checkpoint"
            );
        }
        self.sent_since_snapshot = 0;
        Ok(None)
    }

    pub fn prepare_commit(&self) -> Option<CommitInfo> {
        None
    }

    pub async fn close(self) -> Result<()> {
        info!("Closing non-transactional producer");
        self.producer.close().await
    }
}

//! One broker transaction per checkpoint interval.
//!
//! The transaction for checkpoint `c` is named `<prefix>-<c>`. At a snapshot the open
//! transaction is staged and the writer immediately begins `<prefix>-<c+1>`, so sends for the
//! next interval never wait on the coordinator's commit decision for the previous one. At most
//! three transactions are tracked at a time:
//!
//! - `current`: open for sends
//! - `staged`: snapshotted, not yet prepared
//! - `prepared`: prepared, its [CommitInfo] handed to the coordinator

use tracing::{error, info, warn};

use crate::broker::{Broker, FenceOutcome, Transaction};
use crate::error::{Error, Result};
use crate::record::SerializedRecord;
use crate::state::{CommitInfo, SinkState, TransactionId};

pub struct TransactionalSender<B: Broker> {
    broker: B,
    topic: String,
    prefix: String,
    fence_window: u64,
    current: Option<B::Transaction>,
    staged: Option<B::Transaction>,
    prepared: Option<B::Transaction>,
    /// highest id this sender ever began; ids at or below it are never begun again
    last_begun: Option<TransactionId>,
    sent_in_current: usize,
}

impl<B: Broker> TransactionalSender<B> {
    /// Creates the sender and opens the first transaction. With a recovered checkpoint `n`, every
    /// id from `<prefix>-<n+1>` on that a crashed predecessor may have left behind is fenced
    /// first, then `<prefix>-<n+1>` is begun afresh.
    pub async fn start(
        broker: B,
        topic: impl Into<String>,
        prefix: impl Into<String>,
        fence_window: u64,
        recovered_checkpoint_id: Option<u64>,
    ) -> Result<Self> {
        let mut sender = Self {
            broker,
            topic: topic.into(),
            prefix: prefix.into(),
            fence_window,
            current: None,
            staged: None,
            prepared: None,
            last_begun: None,
            sent_in_current: 0,
        };

        let last_checkpoint_id = recovered_checkpoint_id.unwrap_or_default();
        if let Some(checkpoint_id) = recovered_checkpoint_id {
            sender.fence_from(checkpoint_id + 1).await?;
        }
        sender.begin_transaction(last_checkpoint_id + 1).await?;
        Ok(sender)
    }

    /// Aborts `<prefix>-<first>` and the ids after it, until the broker reports an id that was
    /// never used or `fence_window` ids are fenced.
    async fn fence_from(&mut self, first: u64) -> Result<()> {
        let mut fenced = 0u64;
        for checkpoint_id in first..first.saturating_add(self.fence_window) {
            let id = TransactionId::new(self.prefix.clone(), checkpoint_id);
            match self.broker.fence_transaction(&id).await? {
                FenceOutcome::Aborted => {
                    fenced += 1;
                    info!(transaction_id = %id, "Fenced transaction of a previous writer");
                }
                FenceOutcome::NeverUsed => break,
            }
        }
        info!(
            prefix = %self.prefix,
            first_checkpoint_id = first,
            fenced,
            "Fencing complete"
        );
        Ok(())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Id of the transaction currently open for sends.
    pub fn current_transaction(&self) -> Option<&TransactionId> {
        self.current.as_ref().map(|txn| txn.id())
    }

    pub async fn begin_transaction(&mut self, checkpoint_id: u64) -> Result<()> {
        let id = TransactionId::new(self.prefix.clone(), checkpoint_id);
        if let Some(last) = self
            .last_begun
            .as_ref()
            .filter(|last| checkpoint_id <= last.checkpoint_id)
        {
            error!(attempted = %id, last = %last, "Transaction ids must strictly increase");
            return Err(Error::FencingViolation {
                attempted: id.to_string(),
                last: last.to_string(),
            });
        }
        if let Some(open) = &self.current {
            return Err(Error::Transaction(format!(
                "transaction {} is still open, snapshot it before beginning {id}",
                open.id()
            )));
        }

        let txn = self.broker.begin_transaction(&self.topic, &id).await?;
        info!(transaction_id = %id, "Began transaction");
        self.current = Some(txn);
        self.last_begun = Some(id);
        self.sent_in_current = 0;
        Ok(())
    }

    pub async fn send(&mut self, record: SerializedRecord) -> Result<()> {
        let txn = self.current.as_mut().ok_or_else(|| {
            Error::Transaction("no transaction is open for sends".to_string())
        })?;
        txn.send(record).await?;
        self.sent_in_current += 1;
        Ok(())
    }

    /// Stages the open transaction for `prepare_commit` and returns the state to persist for
    /// `checkpoint_id`. The caller begins the next transaction.
    pub async fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Option<SinkState>> {
        if let Some(mut older) = self.staged.take() {
            // never prepared, so the coordinator never saw it
            warn!(
                transaction_id = %older.id(),
                "Aborting staged transaction that was never prepared"
            );
            older.abort().await?;
        }
        // the prepared transaction of the previous interval belongs to the coordinator now
        self.prepared = None;

        match self.current.take() {
            Some(txn) => {
                if txn.id().checkpoint_id != checkpoint_id {
                    warn!(
                        transaction_id = %txn.id(),
                        checkpoint_id,
                        "Snapshot for a checkpoint other than the open transaction's"
                    );
                }
                info!(
                    transaction_id = %txn.id(),
                    checkpoint_id,
                    records = self.sent_in_current,
                    "Snapshot staged transaction"
                );
                self.staged = Some(txn);
            }
            None => warn!(checkpoint_id, "Snapshot without an open transaction"),
        }
        self.sent_in_current = 0;

        Ok(Some(SinkState::new(self.prefix.clone(), checkpoint_id)))
    }

    /// Prepares the staged transaction. `None` when nothing was staged since the last prepare.
    pub async fn prepare_commit(&mut self) -> Result<Option<CommitInfo>> {
        let Some(mut txn) = self.staged.take() else {
            return Ok(None);
        };
        if let Err(e) = txn.prepare().await {
            error!(transaction_id = %txn.id(), ?e, "Failed to prepare transaction");
            // keep it staged so abort_prepare can discard it
            self.staged = Some(txn);
            return Err(e);
        }
        let commit_info = CommitInfo::new(txn.id().clone());
        info!(transaction_id = %txn.id(), "Prepared transaction");
        self.prepared = Some(txn);
        Ok(Some(commit_info))
    }

    /// Aborts the transaction of the last snapshot, whether it is still staged or already
    /// prepared. The transaction open for the next interval is left alone.
    pub async fn abort_prepare(&mut self) -> Result<()> {
        let Some(mut txn) = self.staged.take().or_else(|| self.prepared.take()) else {
            return Ok(());
        };
        txn.abort().await?;
        info!(transaction_id = %txn.id(), "Aborted transaction of the last snapshot");
        Ok(())
    }

    /// Aborts the open and the staged transaction. A prepared transaction is left for the
    /// coordinator to decide.
    pub async fn close(mut self) -> Result<()> {
        let mut result = Ok(());
        for mut txn in [self.current.take(), self.staged.take()]
            .into_iter()
            .flatten()
        {
            match txn.abort().await {
                Ok(()) => info!(
                    transaction_id = %txn.id(),
                    "Aborted unfinished transaction on close"
                ),
                Err(e) => {
                    error!(transaction_id = %txn.id(), ?e, "Failed to abort transaction on close");
                    result = Err(e);
                }
            }
        }
        if let Some(txn) = &self.prepared {
            info!(transaction_id = %txn.id(), "Leaving prepared transaction to the coordinator");
        }
        result
    }
}

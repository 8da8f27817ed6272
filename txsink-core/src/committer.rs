use tracing::info;

use crate::broker::Broker;
use crate::error::Result;
use crate::state::CommitInfo;

/// Applies the coordinator's global decision to prepared transactions.
#[derive(Clone)]
pub struct SinkCommitter<B> {
    broker: B,
}

impl<B: Broker> SinkCommitter<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    /// Commits the transactions in ascending checkpoint order. Transactions that are already
    /// committed are skipped by the broker.
    pub async fn commit(&self, mut commit_infos: Vec<CommitInfo>) -> Result<()> {
        commit_infos.sort_by_key(CommitInfo::checkpoint_id);
        commit_infos.dedup();
        for commit_info in &commit_infos {
            self.broker.commit_transaction(commit_info).await?;
            info!(transaction_id = %commit_info.transaction_id, "Committed transaction");
        }
        Ok(())
    }

    /// Aborts the transactions. Terminal or unknown transactions are left as they are.
    pub async fn abort(&self, commit_infos: Vec<CommitInfo>) -> Result<()> {
        for commit_info in &commit_infos {
            self.broker.abort_transaction(commit_info).await?;
            info!(transaction_id = %commit_info.transaction_id, "Aborted transaction");
        }
        Ok(())
    }
}

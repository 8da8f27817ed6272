//! Durable state exchanged with the checkpoint coordinator.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random prefixes are drawn from `0..PREFIX_RANGE` and zero padded to four digits.
const PREFIX_RANGE: u32 = 10_000;
const GENERATED_PREFIX_NAME: &str = "TxSink";

/// Name of the broker transaction for one checkpoint interval: `<prefix>-<checkpoint_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    pub prefix: String,
    pub checkpoint_id: u64,
}

impl TransactionId {
    pub fn new(prefix: impl Into<String>, checkpoint_id: u64) -> Self {
        Self {
            prefix: prefix.into(),
            checkpoint_id,
        }
    }

    /// The id of the transaction that follows this one in the same lineage.
    pub fn next(&self) -> Self {
        Self::new(self.prefix.clone(), self.checkpoint_id + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.checkpoint_id)
    }
}

/// Generates a transaction id prefix for writers that were not given one. The randomness source
/// is injectable so that tests can pin the generated ids.
pub fn generate_transaction_prefix<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{GENERATED_PREFIX_NAME}{:04}",
        rng.random_range(0..PREFIX_RANGE)
    )
}

/// Snapshot a writer persists at each checkpoint and consumes again only at restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkState {
    pub transaction_id_prefix: String,
    pub checkpoint_id: u64,
}

impl SinkState {
    pub fn new(transaction_id_prefix: impl Into<String>, checkpoint_id: u64) -> Self {
        Self {
            transaction_id_prefix: transaction_id_prefix.into(),
            checkpoint_id,
        }
    }
}

/// Token for a prepared transaction. The coordinator consumes it exactly once, either to commit
/// or to abort the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitInfo {
    pub transaction_id: TransactionId,
}

impl CommitInfo {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self { transaction_id }
    }

    pub fn checkpoint_id(&self) -> u64 {
        self.transaction_id.checkpoint_id
    }
}

/// Broker-side lifecycle of one transaction, as an in-memory broker reports it through its
/// inspection methods.
///
/// `Open -> Prepared -> {Committed | Aborted}`, or `Open -> Aborted` when fenced or failed
/// before its snapshot. Terminal states are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Prepared,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Open => write!(f, "open"),
            TransactionState::Prepared => write!(f, "prepared"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::Aborted => write!(f, "aborted"),
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Serialization Error - {0}")]
    Serialization(String),

    #[error("Broker Error - {0}")]
    Broker(String),

    #[error("Transaction Error - {0}")]
    Transaction(String),

    /// A transaction id at or below one this writer lineage already used was about to be
    /// begun. Checkpoint ids are assigned monotonically, so this is an invariant violation.
    #[error("Fencing violation - attempted to begin {attempted} after {last}")]
    FencingViolation { attempted: String, last: String },

    #[error("Writer Error - {0}")]
    Writer(String),

    #[error("State Error - {0}")]
    State(String),

    #[error("IO Error - {0}")]
    Io(String),
}

impl From<txsink_kafka::Error> for Error {
    fn from(value: txsink_kafka::Error) -> Self {
        Error::Broker(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}

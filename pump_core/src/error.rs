use chrono::{DateTime, Utc};
use pump_traits::CommError;
use thiserror::Error;

/// Errors surfaced by pump operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PumpManagerError {
    #[error("another pod operation is in progress")]
    Busy,
    #[error("pod communication failed: {0}")]
    CommunicationFailure(#[from] CommError),
    #[error("invalid program: {0}")]
    InvalidProgram(String),
    #[error("pump data is stale and could not be refreshed: {cause}")]
    StaleData {
        last_status_date: Option<DateTime<Utc>>,
        cause: CommError,
    },
    #[error("storing doses failed: {0}")]
    PersistenceFailure(String),
    #[error("no active pod")]
    NoActivePod,
}

impl PumpManagerError {
    /// True when a pod command may have executed even though it reported failure.
    pub fn may_have_executed(&self) -> bool {
        match self {
            Self::CommunicationFailure(e) => e.may_have_executed(),
            _ => false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing pod communication façade")]
    MissingComm,
    #[error("missing dose store")]
    MissingStore,
    #[error("missing pump state")]
    MissingState,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Failure reported by a dose store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("dose store unavailable: {0}")]
    Unavailable(String),
    #[error("dose store rejected records: {0}")]
    Rejected(String),
}

/// Failure converting pump state to or from its raw key/value form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateCodecError {
    #[error("raw state has no version key")]
    MissingVersion,
    #[error("unsupported raw state version {0}")]
    UnsupportedVersion(u64),
    #[error("malformed raw state: {0}")]
    Malformed(String),
    #[error("state could not be encoded: {0}")]
    Encode(String),
}

/// Outcome of a pump operation.
pub type PumpResult<T> = std::result::Result<T, PumpManagerError>;

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

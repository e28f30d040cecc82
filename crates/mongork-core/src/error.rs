//! Error types for mongork.

use thiserror::Error;

use crate::models::Direction;

/// Result type alias using mongork's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by errors that wrap step or callback failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Server error codes meaning "multi-statement transactions are not available
/// on this topology" (IllegalOperation, NoSuchTransaction, and the
/// standalone/no-replication code).
pub const TRANSACTION_UNSUPPORTED_CODES: [i32; 3] = [20, 251, 303];

/// Server error codes meaning a change stream can no longer resume from the
/// requested point (ChangeStreamHistoryLost, ChangeStreamFatalError).
pub const RESUME_POINT_LOST_CODES: [i32; 2] = [286, 280];

/// Duplicate key violation on a unique index.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Server error codes for an index that already exists under another name
/// or with other options (IndexOptionsConflict, IndexKeySpecsConflict).
pub const INDEX_CONFLICT_CODES: [i32; 2] = [85, 86];

const TRANSACTION_UNSUPPORTED_MESSAGES: [&str; 2] = [
    "transactions are not supported",
    "transaction numbers are only allowed",
];

/// Core error type for mongork operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Version string does not match `YYYYMMDD[_HHMMSS][_slug]`
    #[error("Invalid version format: {0} (expected YYYYMMDD[_HHMMSS][_slug])")]
    InvalidVersionFormat(String),

    /// A step with this version is already registered
    #[error("Migration already registered: {0}")]
    DuplicateVersion(String),

    /// Version is not registered
    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    /// Another engine run holds the lock
    #[error("Failed to acquire migration lock: another run is in progress")]
    LockContention,

    /// Recorded fingerprint disagrees with the step's current definition
    #[error("Checksum mismatch for {version}: expected {expected}, got {got}")]
    ChecksumMismatch {
        version: String,
        expected: String,
        got: String,
    },

    /// Backend topology cannot run multi-statement transactions
    #[error("Transactions unsupported: {0}")]
    TransactionUnsupported(String),

    /// Step mutation (or its commit) failed
    #[error("Failed to run migration {version} ({direction}): {source}")]
    StepExecutionFailed {
        version: String,
        direction: Direction,
        #[source]
        source: BoxError,
    },

    /// Ledger insert/delete failed after the step mutation
    #[error("Failed to record migration {version} in ledger: {source}")]
    LedgerWriteFailed {
        version: String,
        #[source]
        source: BoxError,
    },

    /// Mutually exclusive filter criteria were combined
    #[error("Invalid filter combination: {0}")]
    InvalidFilterCombination(String),

    /// Namespace is not `db.collection`
    #[error("Invalid namespace: {0} (expected db.collection)")]
    InvalidNamespace(String),

    /// Time bound is neither RFC 3339 nor YYYY-MM-DD
    #[error("Invalid time: {0} (use RFC3339 or YYYY-MM-DD)")]
    InvalidTimeFormat(String),

    /// Operation kind outside the oplog vocabulary
    #[error("Unsupported op: {0}")]
    InvalidOperation(String),

    /// Regular expression failed to compile
    #[error("Invalid regex: {0}")]
    InvalidPattern(String),

    /// Change stream ended with an error
    #[error("Change stream disconnected: {0}")]
    StreamDisconnected(String),

    /// Resume token refers to history the server no longer has
    #[error("Resume point lost: {0}")]
    ResumePointLost(String),

    /// No replication log on this deployment
    #[error("Oplog collection not found (requires replica set)")]
    OplogSourceNotFound,

    /// Raw event could not be normalized
    #[error("Event decode error: {0}")]
    EventDecode(String),

    /// Caller's render callback failed
    #[error("Render error: {0}")]
    Render(#[source] BoxError),

    /// Caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database operation failed (wraps mongodb::error::Error)
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a step mutation failure with its version and direction.
    pub fn step_failed(version: &str, direction: Direction, source: impl Into<BoxError>) -> Self {
        Error::StepExecutionFailed {
            version: version.to_string(),
            direction,
            source: source.into(),
        }
    }

    /// Wrap a ledger write failure with its version.
    pub fn ledger_failed(version: &str, source: impl Into<BoxError>) -> Self {
        Error::LedgerWriteFailed {
            version: version.to_string(),
            source: source.into(),
        }
    }

    /// Whether this error (or anything in its source chain) says the backend
    /// cannot run multi-statement transactions.
    pub fn is_transaction_unsupported(&self) -> bool {
        chain_matches(self, |err| {
            if let Some(Error::TransactionUnsupported(_)) = err.downcast_ref::<Error>() {
                return true;
            }
            if let Some(db_err) = err.downcast_ref::<mongodb::error::Error>() {
                if server_code(db_err).is_some_and(|c| TRANSACTION_UNSUPPORTED_CODES.contains(&c)) {
                    return true;
                }
            }
            let msg = err.to_string().to_lowercase();
            TRANSACTION_UNSUPPORTED_MESSAGES
                .iter()
                .any(|needle| msg.contains(needle))
        })
    }

    /// Whether this error is a duplicate-key violation.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Error::Database(e) => server_code(e) == Some(DUPLICATE_KEY_CODE),
            _ => false,
        }
    }

    /// Whether an index build was rejected because an equivalent index
    /// already exists with a different name or options.
    pub fn is_index_conflict(&self) -> bool {
        match self {
            Error::Database(e) => server_code(e).is_some_and(is_index_conflict_code),
            _ => false,
        }
    }
}

pub fn is_index_conflict_code(code: i32) -> bool {
    INDEX_CONFLICT_CODES.contains(&code)
}

/// Extract the server error code from a driver error, when it carries one.
pub fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => Some(cmd.code),
        ErrorKind::Write(WriteFailure::WriteError(w)) => Some(w.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(w)) => Some(w.code),
        _ => None,
    }
}

fn chain_matches(
    err: &(dyn std::error::Error + 'static),
    pred: impl Fn(&(dyn std::error::Error + 'static)) -> bool,
) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if pred(e) {
            return true;
        }
        current = e.source();
    }
    false
}

impl From<bson::ser::Error> for Error {
    fn from(e: bson::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bson::de::Error> for Error {
    fn from(e: bson::de::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

//! FeeSync Error Types

use thiserror::Error;

use crate::queue::QueueStatus;

/// Result type alias for FeeSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// FeeSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Business rule errors
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    // Remote backend errors
    #[error("Remote submission failed: {0}")]
    RemoteSubmission(String),

    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Remote record not found: {table}/{id}")]
    RemoteNotFound { table: String, id: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Data unavailable offline: no cached copy of '{0}'")]
    OfflineUnavailable(String),

    // Local store errors
    #[error("Local store error: {0}")]
    Store(String),

    #[error("Queue item not found: {0}")]
    QueueItemNotFound(String),

    #[error("Queue item {local_id} cannot move from {from} to {to}")]
    InvalidTransition {
        local_id: String,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Audit errors (logged, never surfaced to the primary mutation)
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

/// Named business rule failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid amount '{0}': must be a positive number")]
    InvalidAmount(String),

    #[error("{0} payments need online confirmation and cannot be recorded offline")]
    MethodRequiresOnline(String),

    #[error("unknown term '{0}'")]
    UnknownTerm(String),

    #[error("payment reference '{0}' already exists")]
    DuplicateReference(String),

    #[error("{term} {year} is outstanding: paid {paid:.2} of {fee:.2}")]
    OutstandingTerm {
        term: String,
        year: i32,
        paid: f64,
        fee: f64,
    },

    #[error("no fee configured for grade '{grade}' in {term} {year}")]
    MissingFee {
        grade: String,
        term: String,
        year: i32,
    },

    #[error("{term} {year} is before the student's admission ({admission_term} {admission_year})")]
    BeforeAdmission {
        term: String,
        year: i32,
        admission_term: String,
        admission_year: i32,
    },

    #[error("student {0} not found")]
    UnknownStudent(String),

    #[error("student {0} has not been synced yet")]
    StudentNotSynced(String),

    #[error("a reason is required for this change")]
    MissingReason,

    #[error("role '{0}' may not perform this change")]
    NotPermitted(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::Network(_)
        )
    }

    /// Check if this error is a business rule rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Message recorded on a failed queue item
    pub fn item_message(&self) -> String {
        match self {
            Error::Validation(v) => v.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            let target = e.url().map(|u| u.to_string()).unwrap_or_default();
            Error::ConnectionTimeout(target)
        } else if e.is_connect() || e.is_request() {
            Error::Network(e.to_string())
        } else if let Some(status) = e.status() {
            Error::RemoteRejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Error::RemoteSubmission(e.to_string())
        }
    }
}

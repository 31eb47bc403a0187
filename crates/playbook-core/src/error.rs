use thiserror::Error;

/// Failure of a single call against the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The request never produced a response (connection, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status
    #[error("Store returned status {code}: {body}")]
    Status {
        /// HTTP-like status code
        code: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The addressed record or association does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Request or response could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store refused the operation (validation, injected failure)
    #[error("Operation rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same call later could succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result alias for store calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Engine-level failure that stops a sync before any write is issued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Existing records could not be loaded
    #[error("Failed to load existing records: {0}")]
    Load(#[source] StoreError),

    /// The engine was configured with invalid values
    #[error("Configuration error: {0}")]
    Configuration(String),
}

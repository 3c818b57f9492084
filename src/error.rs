//! Error types for the dispatch core.

use thiserror::Error;

/// Result type used throughout the dispatch core.
pub type DispatchResult<T = ()> = Result<T, DispatchError>;

/// Errors the dispatch core can produce.
///
/// None of these escape `dispatch_submission`, `dispatch_file`, or
/// `finalize` in normal operation: missing-reference and bucket-anomaly
/// conditions are logged and skipped, not raised.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The shared store rejected an operation or the connection failed.
    #[error("store error: {0}")]
    Store(String),

    /// The queue backend rejected a push/pop.
    #[error("queue error: {0}")]
    Queue(String),

    /// A submission task arrived for an `sid` with no active-task record.
    #[error("untracked submission: {0}")]
    UntrackedSubmission(String),

    /// Serialization/deserialization of a store or queue payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or was invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A value was in a state the caller did not expect.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl DispatchError {
    pub fn store<T: std::fmt::Display>(msg: T) -> Self {
        Self::Store(msg.to_string())
    }

    pub fn queue<T: std::fmt::Display>(msg: T) -> Self {
        Self::Queue(msg.to_string())
    }

    pub fn serialization<T: std::fmt::Display>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    pub fn invalid_state<T: std::fmt::Display>(msg: T) -> Self {
        Self::InvalidState(msg.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

//! Error taxonomy shared across the workspace.
//!
//! One variant per failure class: validation errors are rejected
//! synchronously before anything persists, per-recipient send errors
//! become recorded outcomes (not errors), and nothing here is allowed
//! to take down the timer runner.

use thiserror::Error;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum RentRelayError {
    /// Malformed input: trigger spec, rule tree, schedule fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced schedule or tenant does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// SQLite or serialization failure while reading/writing state.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The SMS gateway rejected a request at the batch level.
    #[error("send error: {0}")]
    Send(String),

    /// An execution for this schedule is already in flight.
    #[error("schedule {0} is already running")]
    AlreadyRunning(i64),

    /// Configuration file problems.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RentRelayError>;

impl From<serde_json::Error> for RentRelayError {
    fn from(e: serde_json::Error) -> Self {
        RentRelayError::Persistence(format!("json: {e}"))
    }
}

//! Error types for the upload core.

use thiserror::Error;

/// Errors raised by the scheduler and batcher themselves.
///
/// Failures of individual uploads are not represented here; they travel
/// with the job's [`UploadOutcome`](crate::UploadOutcome).
#[derive(Debug, Error)]
pub enum PushError {
    /// Construction parameters were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The processing loop is no longer running.
    #[error("processing loop stopped")]
    LoopStopped,

    /// The processing loop panicked.
    #[error("processing loop panicked: {0}")]
    LoopPanicked(String),
}

/// Error delivered to a destination waiter.
///
/// `Clone` because a single resolver failure is fanned out to every waiter
/// in the batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// The resolver answered but issued nothing for this name.
    #[error("no destination issued for {0}")]
    NotIssued(String),

    /// The batched resolver call failed.
    #[error("destination resolver failed: {0}")]
    Resolver(String),

    /// The batcher has stopped and will not resolve further requests.
    #[error("destination batcher stopped")]
    Stopped,
}

impl From<tokio::task::JoinError> for PushError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            PushError::LoopPanicked(err.to_string())
        } else {
            PushError::LoopStopped
        }
    }
}

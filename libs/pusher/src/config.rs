//! Construction parameters for the scheduler and the batcher.

use std::time::Duration;

use crate::error::PushError;

/// Default number of uploads allowed in flight at once.
pub const DEFAULT_MAX_JOBS: usize = 16;

/// Default number of extra requests drained into one resolver batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 8;

/// Default wait between drain-phase checks after `finish()`.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_secs(1);

/// Upload scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherConfig {
    /// Maximum number of concurrently running upload jobs.
    pub max_jobs: usize,

    /// How long the drain phase waits for a completion before re-checking.
    pub drain_poll: Duration,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }
}

impl PusherConfig {
    /// Config with the given concurrency bound and default timings.
    pub fn with_max_jobs(max_jobs: usize) -> Self {
        Self {
            max_jobs,
            ..Default::default()
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), PushError> {
        if self.max_jobs == 0 {
            return Err(PushError::InvalidConfig(
                "max_jobs must be at least 1".to_string(),
            ));
        }
        if self.drain_poll.is_zero() {
            return Err(PushError::InvalidConfig(
                "drain_poll must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Destination batcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Project the destinations are issued for.
    pub project: String,

    /// Run the destinations are issued for.
    pub run_id: String,

    /// Extra queued requests drained after the first one of a batch.
    pub max_batch_size: usize,
}

impl BatcherConfig {
    /// Config for a project/run pair with the default batch size.
    pub fn new(project: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            run_id: run_id.into(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Reject values the batcher cannot run with.
    pub fn validate(&self) -> Result<(), PushError> {
        if self.project.trim().is_empty() {
            return Err(PushError::InvalidConfig("project must not be empty".to_string()));
        }
        if self.run_id.trim().is_empty() {
            return Err(PushError::InvalidConfig("run_id must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(PushError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

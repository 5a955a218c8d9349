//! Configuration for the push agent.
//!
//! Every setting is a command-line flag with a `RUNPUSH_*` environment
//! fallback; flags win over the environment.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use runpush_core::{BatcherConfig, PusherConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_JOBS};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    #[value(alias = "text")]
    Pretty,
}

/// Push agent configuration.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Base URL of the upload-URL service.
    #[arg(long, env = "RUNPUSH_RESOLVER_URL", default_value = "http://127.0.0.1:8080")]
    pub resolver_url: String,

    /// Project the run belongs to.
    #[arg(long, env = "RUNPUSH_PROJECT", default_value = "uncategorized")]
    pub project: String,

    /// Run to upload files for. Required.
    #[arg(long, env = "RUNPUSH_RUN_ID")]
    pub run_id: Option<String>,

    /// Maximum concurrent uploads.
    #[arg(long, env = "RUNPUSH_MAX_JOBS", default_value_t = DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Extra requests drained into one destination batch.
    #[arg(long = "max-batch", env = "RUNPUSH_MAX_BATCH", default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Timeout for each HTTP request in seconds.
    #[arg(long, env = "RUNPUSH_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Log output format.
    #[arg(
        long,
        env = "RUNPUSH_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Json
    )]
    pub log_format: LogFormat,
}

impl Config {
    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Scheduler settings.
    pub fn pusher_config(&self) -> PusherConfig {
        PusherConfig::with_max_jobs(self.max_jobs)
    }

    /// Batcher settings; fails if no run id was configured.
    pub fn batcher_config(&self) -> Result<BatcherConfig> {
        let Some(run_id) = self.run_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            bail!("a run id is required (set RUNPUSH_RUN_ID or pass --run-id)");
        };
        Ok(BatcherConfig {
            max_batch_size: self.max_batch_size,
            ..BatcherConfig::new(self.project.clone(), run_id)
        })
    }
}

//! Upload job execution.
//!
//! A job is one attempt to push a file's current content. Jobs never talk to
//! the scheduler's state directly; the scheduler spawns [`run`] and forwards
//! the returned outcome into its own event queue.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::{debug, warn};

use crate::transport::Transport;

/// A request to (re-)upload a file under a save name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Logical name the content is stored under remotely.
    pub save_name: String,

    /// Local source path.
    pub path: PathBuf,

    /// Copy the source to a private temporary file before uploading.
    pub copy: bool,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(save_name: impl Into<String>, path: impl Into<PathBuf>, copy: bool) -> Self {
        Self {
            save_name: save_name.into(),
            path: path.into(),
            copy,
        }
    }
}

/// Result of one job attempt, as reported back to the scheduler.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Save name the job uploaded.
    pub save_name: String,

    /// Scheduler-assigned job id.
    pub job_id: u64,

    /// Source path the job was started with.
    pub path: PathBuf,

    /// `Err` carries the rendered transport (or staging) error.
    pub result: Result<(), String>,
}

impl UploadOutcome {
    /// Returns true if the upload succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run one upload attempt to completion.
///
/// Always returns an outcome, including when the transport panics, so the
/// caller can free the job's slot.
pub(crate) async fn run(
    job_id: u64,
    request: UploadRequest,
    transport: Arc<dyn Transport>,
) -> UploadOutcome {
    debug!(save_name = %request.save_name, job_id, path = %request.path.display(), "Upload started");

    let result = attempt(job_id, &request, transport)
        .await
        .map_err(|e| format!("{e:#}"));

    debug!(save_name = %request.save_name, job_id, ok = result.is_ok(), "Upload finished");

    UploadOutcome {
        save_name: request.save_name,
        job_id,
        path: request.path,
        result,
    }
}

async fn attempt(
    job_id: u64,
    request: &UploadRequest,
    transport: Arc<dyn Transport>,
) -> anyhow::Result<()> {
    if !request.copy {
        return upload(transport, request.save_name.clone(), request.path.clone()).await;
    }

    let staged = staging_path(&request.path, job_id);
    let copied = tokio::fs::copy(&request.path, &staged)
        .await
        .with_context(|| {
            format!(
                "failed to stage {} at {}",
                request.path.display(),
                staged.display()
            )
        });

    let result = match copied {
        Ok(_) => upload(transport, request.save_name.clone(), staged.clone()).await,
        Err(e) => Err(e),
    };

    remove_staged(&staged).await;
    result
}

/// Invoke the transport on its own task so a panic surfaces as an error.
async fn upload(
    transport: Arc<dyn Transport>,
    save_name: String,
    path: PathBuf,
) -> anyhow::Result<()> {
    tokio::spawn(async move { transport.upload(&save_name, &path).await })
        .await
        .map_err(|e| anyhow!("upload task failed: {e}"))?
}

async fn remove_staged(staged: &Path) {
    match tokio::fs::remove_file(staged).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %staged.display(), error = %e, "Failed to remove staged copy");
        }
    }
}

/// Sibling temporary path for a job's isolating copy: `<path>.<job_id>.tmp`.
pub(crate) fn staging_path(path: &Path, job_id: u64) -> PathBuf {
    let mut staged = OsString::from(path.as_os_str());
    staged.push(format!(".{job_id}.tmp"));
    PathBuf::from(staged)
}

//! Upload scheduler.
//!
//! [`FilePusher`] accepts file-changed notifications and keeps at most
//! `max_jobs` uploads in flight. All scheduling state lives on a single
//! event-loop task:
//!
//! - **One job per save name**: a change for a name that is already uploading
//!   marks the running job for restart instead of starting a second job
//! - **Latest wins**: the restart (or a queued upload) always uses the most
//!   recently notified path and copy flag for that name
//! - **FIFO backlog**: overflow waits in arrival order, one entry per name
//! - **Drain on finish**: `finish()` lets in-flight and queued work complete
//!   before the loop exits
//!
//! Jobs report back only through the loop's event channel, so the active map
//! and backlog never need a lock.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::PusherConfig;
use crate::error::PushError;
use crate::job::{self, UploadOutcome, UploadRequest};
use crate::transport::Transport;

/// Capacity of the outcome broadcast; slow subscribers observe a lag error.
const OUTCOME_BUFFER: usize = 1024;

// =============================================================================
// Events
// =============================================================================

/// Events consumed by the scheduler loop, in arrival order.
#[derive(Debug)]
enum PushEvent {
    /// Content for a save name changed and should be (re-)uploaded.
    FileChanged(UploadRequest),

    /// A job finished, successfully or not.
    JobDone(UploadOutcome),

    /// No further changes will be notified.
    Finish,
}

// =============================================================================
// Summary
// =============================================================================

/// A failed upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub save_name: String,
    pub job_id: u64,
    pub path: PathBuf,
    pub error: String,
}

/// What the scheduler did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Jobs started, including restarts.
    pub attempts: u64,

    /// Jobs that completed successfully.
    pub succeeded: u64,

    /// Jobs whose transport call (or staging copy) failed.
    pub failures: Vec<UploadFailure>,
}

impl PushSummary {
    /// Returns true if no job failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, outcome: &UploadOutcome) {
        match &outcome.result {
            Ok(()) => self.succeeded += 1,
            Err(error) => self.failures.push(UploadFailure {
                save_name: outcome.save_name.clone(),
                job_id: outcome.job_id,
                path: outcome.path.clone(),
                error: error.clone(),
            }),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running upload scheduler.
///
/// Dropping the handle without calling [`finish`](Self::finish) still
/// finishes the scheduler; outstanding work drains in the background.
pub struct FilePusher {
    events: mpsc::UnboundedSender<PushEvent>,
    outcomes: broadcast::Sender<UploadOutcome>,
    task: Option<JoinHandle<PushSummary>>,
    finished: AtomicBool,
}

impl FilePusher {
    /// Start a scheduler on the current tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: PusherConfig) -> Result<Self, PushError> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);

        info!(max_jobs = config.max_jobs, "Starting file pusher");

        let scheduler = Scheduler::new(transport, &config, tx.clone(), outcomes.clone());
        let task = tokio::spawn(scheduler.run(rx));

        Ok(Self {
            events: tx,
            outcomes,
            task: Some(task),
            finished: AtomicBool::new(false),
        })
    }

    /// Record that `save_name`'s content at `path` should be uploaded.
    ///
    /// Never blocks. With `copy` set, the job uploads a private copy of the
    /// file so later local writes cannot tear the transfer.
    pub fn notify_changed(&self, save_name: impl Into<String>, path: impl Into<PathBuf>, copy: bool) {
        let request = UploadRequest::new(save_name, path, copy);
        if let Err(mpsc::error::SendError(event)) = self.events.send(PushEvent::FileChanged(request)) {
            warn!(event = ?event, "File pusher stopped, dropping change notification");
        }
    }

    /// Signal that no more changes will be notified. Returns immediately.
    pub fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PushEvent::Finish);
        }
    }

    /// Check if the scheduler loop is still active.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Observe every job outcome as it is reported.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadOutcome> {
        self.outcomes.subscribe()
    }

    /// Finish, wait for all work to drain and return the summary.
    pub async fn join(mut self) -> Result<PushSummary, PushError> {
        self.finish();
        let task = self.task.take().ok_or(PushError::LoopStopped)?;
        Ok(task.await?)
    }
}

impl Drop for FilePusher {
    fn drop(&mut self) {
        self.finish();
    }
}

// =============================================================================
// Scheduler Loop
// =============================================================================

/// A job currently in flight.
#[derive(Debug)]
struct ActiveJob {
    job_id: u64,

    /// Latest request notified for this name; used if the job restarts.
    latest: UploadRequest,

    needs_restart: bool,
}

/// Scheduling state, owned exclusively by the loop task.
struct Scheduler {
    transport: Arc<dyn Transport>,
    max_jobs: usize,
    drain_poll: Duration,

    /// Sender cloned into each job for its completion event.
    events: mpsc::UnboundedSender<PushEvent>,
    outcomes: broadcast::Sender<UploadOutcome>,

    active: HashMap<String, ActiveJob>,

    /// Latest queued request per name; `backlog` holds each name once.
    pending: HashMap<String, UploadRequest>,
    backlog: VecDeque<String>,

    next_job_id: u64,
    summary: PushSummary,
}

impl Scheduler {
    fn new(
        transport: Arc<dyn Transport>,
        config: &PusherConfig,
        events: mpsc::UnboundedSender<PushEvent>,
        outcomes: broadcast::Sender<UploadOutcome>,
    ) -> Self {
        Self {
            transport,
            max_jobs: config.max_jobs,
            drain_poll: config.drain_poll,
            events,
            outcomes,
            active: HashMap::new(),
            pending: HashMap::new(),
            backlog: VecDeque::new(),
            next_job_id: 0,
            summary: PushSummary::default(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PushEvent>) -> PushSummary {
        // The loop holds a sender itself, so the channel only yields `None`
        // if every handle and job is gone.
        while let Some(event) = rx.recv().await {
            if matches!(event, PushEvent::Finish) {
                break;
            }
            self.handle(event);
        }

        debug!(
            active = self.active.len(),
            backlog = self.backlog.len(),
            "Finish requested, draining uploads"
        );

        loop {
            if self.active.is_empty() {
                // Nothing in flight means nothing queued; only late events remain.
                match rx.try_recv() {
                    Ok(event) => {
                        self.handle(event);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            match tokio::time::timeout(self.drain_poll, rx.recv()).await {
                Ok(Some(event)) => self.handle(event),
                Ok(None) => break,
                Err(_) => {
                    trace!(
                        active = self.active.len(),
                        backlog = self.backlog.len(),
                        "Waiting for uploads to finish"
                    );
                }
            }
        }

        info!(
            attempts = self.summary.attempts,
            succeeded = self.summary.succeeded,
            failed = self.summary.failures.len(),
            "File pusher drained"
        );

        self.summary
    }

    fn handle(&mut self, event: PushEvent) {
        match event {
            PushEvent::FileChanged(request) => self.on_file_changed(request),
            PushEvent::JobDone(outcome) => self.on_job_done(outcome),
            PushEvent::Finish => {}
        }
    }

    fn on_file_changed(&mut self, request: UploadRequest) {
        if let Some(job) = self.active.get_mut(&request.save_name) {
            debug!(
                save_name = %request.save_name,
                job_id = job.job_id,
                "File changed during upload, marking for restart"
            );
            job.latest = request;
            job.needs_restart = true;
        } else if self.active.len() < self.max_jobs {
            self.start_job(request);
        } else {
            self.enqueue(request);
        }
    }

    fn on_job_done(&mut self, outcome: UploadOutcome) {
        let job = match self.active.entry(outcome.save_name.clone()) {
            Entry::Occupied(entry) if entry.get().job_id == outcome.job_id => entry.remove(),
            _ => {
                warn!(
                    save_name = %outcome.save_name,
                    job_id = outcome.job_id,
                    "Completion for unknown upload job"
                );
                return;
            }
        };

        if let Err(error) = &outcome.result {
            warn!(
                save_name = %outcome.save_name,
                job_id = outcome.job_id,
                error = %error,
                "Upload failed"
            );
        }
        self.summary.record(&outcome);
        let _ = self.outcomes.send(outcome);

        if job.needs_restart {
            info!(
                save_name = %job.latest.save_name,
                previous_job_id = job.job_id,
                "Restarting upload with latest content"
            );
            self.start_job(job.latest);
        } else if let Some(request) = self.next_pending() {
            self.start_job(request);
        }
    }

    fn enqueue(&mut self, request: UploadRequest) {
        let save_name = request.save_name.clone();
        if self.pending.insert(save_name.clone(), request).is_none() {
            self.backlog.push_back(save_name);
        }
        trace!(backlog = self.backlog.len(), "Upload queued");
    }

    fn next_pending(&mut self) -> Option<UploadRequest> {
        while let Some(save_name) = self.backlog.pop_front() {
            if let Some(request) = self.pending.remove(&save_name) {
                return Some(request);
            }
        }
        None
    }

    fn start_job(&mut self, request: UploadRequest) {
        self.next_job_id += 1;
        let job_id = self.next_job_id;
        self.summary.attempts += 1;

        let events = self.events.clone();
        let transport = Arc::clone(&self.transport);
        let job_request = request.clone();
        tokio::spawn(async move {
            let outcome = job::run(job_id, job_request, transport).await;
            let _ = events.send(PushEvent::JobDone(outcome));
        });

        self.active.insert(
            request.save_name.clone(),
            ActiveJob {
                job_id,
                latest: request,
                needs_restart: false,
            },
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Destination batcher - coalesces concurrent destination lookups.
//!
//! Callers ask for one save name at a time; the batcher loop waits for the
//! first request, greedily drains whatever else is already queued (without
//! waiting for more), and resolves the whole batch with a single resolver
//! call. Duplicate names in a batch share one lookup and every waiter gets
//! the same answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::BatcherConfig;
use crate::error::{DestinationError, PushError};
use crate::transport::DestinationResolver;

type Reply<D> = oneshot::Sender<Result<D, DestinationError>>;

enum BatchEvent<D> {
    Request { save_name: String, reply: Reply<D> },
    Finish,
}

/// Cloneable handle to a destination batcher loop.
///
/// The loop stops after [`finish`](Self::finish) or once every handle has
/// been dropped.
pub struct DestinationBatcher<D> {
    requests: mpsc::UnboundedSender<BatchEvent<D>>,
    stopped: watch::Receiver<bool>,
}

impl<D> Clone for DestinationBatcher<D> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<D: Send + 'static> DestinationBatcher<D> {
    /// Start a batcher loop on the current tokio runtime.
    pub fn new<R>(resolver: Arc<R>, config: BatcherConfig) -> Result<Self, PushError>
    where
        R: DestinationResolver<Destination = D>,
    {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = watch::channel(false);

        info!(
            project = %config.project,
            run_id = %config.run_id,
            max_batch_size = config.max_batch_size,
            "Starting destination batcher"
        );

        tokio::spawn(run_batch_loop(resolver, config, rx, stopped_tx));

        Ok(Self {
            requests: tx,
            stopped: stopped_rx,
        })
    }

    /// Wait until a destination is resolved for `save_name`.
    pub async fn request_destination(
        &self,
        save_name: impl Into<String>,
    ) -> Result<D, DestinationError> {
        let response = self.enqueue(save_name.into())?;
        response.await.map_err(|_| DestinationError::Stopped)?
    }

    /// Blocking variant of [`request_destination`](Self::request_destination)
    /// for callers outside the async runtime.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_request_destination(
        &self,
        save_name: impl Into<String>,
    ) -> Result<D, DestinationError> {
        let response = self.enqueue(save_name.into())?;
        response.blocking_recv().map_err(|_| DestinationError::Stopped)?
    }

    /// Stop the loop once the batch in progress has been answered.
    pub fn finish(&self) {
        let _ = self.requests.send(BatchEvent::Finish);
    }

    /// Check if the batcher loop is still active.
    pub fn is_running(&self) -> bool {
        !*self.stopped.borrow() && self.stopped.has_changed().is_ok()
    }

    /// Finish and wait for the loop to exit.
    pub async fn join(mut self) {
        self.finish();
        // An Err means the loop dropped its sender without reporting; it is gone either way.
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }

    fn enqueue(
        &self,
        save_name: String,
    ) -> Result<oneshot::Receiver<Result<D, DestinationError>>, DestinationError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(BatchEvent::Request { save_name, reply })
            .map_err(|_| DestinationError::Stopped)?;
        Ok(response)
    }
}

/// Requests collected for one resolver call.
struct Batch<D> {
    /// Waiters per distinct name; ordered so resolver input is deterministic.
    waiters: BTreeMap<String, Vec<Reply<D>>>,

    /// Requests that arrived after the finish marker.
    rejected: Vec<Reply<D>>,

    finish: bool,
}

impl<D> Batch<D> {
    fn collect(events: Vec<BatchEvent<D>>) -> Self {
        let mut batch = Self {
            waiters: BTreeMap::new(),
            rejected: Vec::new(),
            finish: false,
        };
        for event in events {
            match event {
                BatchEvent::Finish => batch.finish = true,
                BatchEvent::Request { reply, .. } if batch.finish => batch.rejected.push(reply),
                BatchEvent::Request { save_name, reply } => {
                    batch.waiters.entry(save_name).or_default().push(reply);
                }
            }
        }
        batch
    }
}

async fn run_batch_loop<R: DestinationResolver>(
    resolver: Arc<R>,
    config: BatcherConfig,
    mut rx: mpsc::UnboundedReceiver<BatchEvent<R::Destination>>,
    stopped: watch::Sender<bool>,
) {
    let mut batches: u64 = 0;

    while let Some(first) = rx.recv().await {
        let mut events = vec![first];
        for _ in 0..config.max_batch_size {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        let batch = Batch::collect(events);
        if !batch.waiters.is_empty() {
            batches += 1;
            dispatch(resolver.as_ref(), &config, batch.waiters).await;
        }
        for reply in batch.rejected {
            let _ = reply.send(Err(DestinationError::Stopped));
        }
        if batch.finish {
            break;
        }
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        if let BatchEvent::Request { reply, .. } = event {
            let _ = reply.send(Err(DestinationError::Stopped));
        }
    }

    let _ = stopped.send(true);
    info!(batches, "Destination batcher stopped");
}

async fn dispatch<R: DestinationResolver>(
    resolver: &R,
    config: &BatcherConfig,
    waiters: BTreeMap<String, Vec<Reply<R::Destination>>>,
) {
    let names: Vec<String> = waiters.keys().cloned().collect();
    debug!(batch_size = names.len(), "Resolving upload destinations");

    match resolver
        .resolve(&config.project, &config.run_id, &names)
        .await
    {
        Ok(mut resolved) => {
            for (save_name, replies) in waiters {
                let result = resolved
                    .remove(&save_name)
                    .ok_or_else(|| DestinationError::NotIssued(save_name.clone()));
                for reply in replies {
                    let _ = reply.send(result.clone());
                }
            }
        }
        Err(e) => {
            warn!(batch_size = names.len(), error = %e, "Destination resolver failed");
            let error = DestinationError::Resolver(format!("{e:#}"));
            for reply in waiters.into_values().flatten() {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }
}

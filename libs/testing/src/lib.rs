//! Test doubles for the upload core.
//!
//! - [`RecordingTransport`]: records every upload, tracks concurrency and can
//!   hold uploads open until a test releases them
//! - [`RecordingResolver`]: records every batched lookup and can hold its
//!   first call so requests pile up behind it

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use runpush_core::{DestinationResolver, Transport};
use tokio::sync::{oneshot, Notify};

// =============================================================================
// Transport
// =============================================================================

/// One recorded transport invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub save_name: String,
    pub path: PathBuf,

    /// File content at the time the upload started, if readable.
    pub content: Option<Vec<u8>>,
}

#[derive(Default)]
struct TransportState {
    calls: Vec<UploadCall>,
    in_flight: HashMap<String, usize>,
    current: usize,
    peak: usize,
    overlapping: HashSet<String>,
    gates: HashMap<String, VecDeque<oneshot::Sender<()>>>,
    open: bool,
}

/// Transport that records calls instead of uploading.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
    changed: Notify,
    failing: HashSet<String>,
}

impl RecordingTransport {
    /// Uploads complete as soon as they are recorded.
    pub fn new() -> Self {
        let transport = Self::default();
        transport.lock().open = true;
        transport
    }

    /// Uploads stay in flight until [`release`](Self::release)d.
    pub fn gated() -> Self {
        Self::default()
    }

    /// Make every upload of `save_name` fail.
    pub fn fail_on(mut self, save_name: &str) -> Self {
        self.failing.insert(save_name.to_string());
        self
    }

    /// All calls so far, in start order.
    pub fn calls(&self) -> Vec<UploadCall> {
        self.lock().calls.clone()
    }

    /// Paths uploaded for `save_name`, in start order.
    pub fn paths_for(&self, save_name: &str) -> Vec<PathBuf> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.save_name == save_name)
            .map(|call| call.path.clone())
            .collect()
    }

    /// Highest number of uploads observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak
    }

    /// Uploads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().current
    }

    /// Names that were ever uploading twice at the same time.
    pub fn overlapping_names(&self) -> HashSet<String> {
        self.lock().overlapping.clone()
    }

    /// Complete the oldest held upload of `save_name`.
    pub fn release(&self, save_name: &str) -> bool {
        let gate = self
            .lock()
            .gates
            .get_mut(save_name)
            .and_then(VecDeque::pop_front);
        match gate {
            Some(gate) => gate.send(()).is_ok(),
            None => false,
        }
    }

    /// Complete every held upload and stop holding new ones.
    pub fn open(&self) {
        let gates: Vec<_> = {
            let mut state = self.lock();
            state.open = true;
            state.gates.drain().flat_map(|(_, gates)| gates).collect()
        };
        for gate in gates {
            let _ = gate.send(());
        }
    }

    /// Wait until at least `count` uploads have started.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.lock().calls.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn upload(&self, save_name: &str, path: &Path) -> anyhow::Result<()> {
        let gate = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.calls.push(UploadCall {
                save_name: save_name.to_string(),
                path: path.to_path_buf(),
                content: std::fs::read(path).ok(),
            });

            let count = state.in_flight.entry(save_name.to_string()).or_default();
            *count += 1;
            if *count > 1 {
                state.overlapping.insert(save_name.to_string());
            }
            state.current += 1;
            state.peak = state.peak.max(state.current);

            if state.open {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state
                    .gates
                    .entry(save_name.to_string())
                    .or_default()
                    .push_back(tx);
                Some(rx)
            }
        };
        self.changed.notify_waiters();

        if let Some(gate) = gate {
            let _ = gate.await;
        }

        {
            let mut state = self.lock();
            if let Some(count) = state.in_flight.get_mut(save_name) {
                *count -= 1;
            }
            state.current -= 1;
        }

        if self.failing.contains(save_name) {
            anyhow::bail!("upload of {save_name} rejected");
        }
        Ok(())
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolver that issues `https://storage.test/{project}/{run_id}/{name}`.
#[derive(Default)]
pub struct RecordingResolver {
    calls: Mutex<Vec<Vec<String>>>,
    changed: Notify,
    missing: HashSet<String>,
    fail: bool,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
}

impl RecordingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver whose first call waits until the returned sender fires.
    pub fn held() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Self {
            hold: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (resolver, tx)
    }

    /// Leave `save_name` out of every response.
    pub fn without(mut self, save_name: &str) -> Self {
        self.missing.insert(save_name.to_string());
        self
    }

    /// Fail every call.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Names passed to each call, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait until at least `count` calls have been made.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.calls().len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Destination this resolver issues for a name.
    pub fn destination(project: &str, run_id: &str, save_name: &str) -> String {
        format!("https://storage.test/{project}/{run_id}/{save_name}")
    }
}

#[async_trait]
impl DestinationResolver for RecordingResolver {
    type Destination = String;

    async fn resolve(
        &self,
        project: &str,
        run_id: &str,
        names: &[String],
    ) -> anyhow::Result<HashMap<String, String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(names.to_vec());
        self.changed.notify_waiters();

        let hold = self
            .hold
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        if self.fail {
            anyhow::bail!("upload url service unavailable");
        }

        Ok(names
            .iter()
            .filter(|name| !self.missing.contains(*name))
            .map(|name| (name.clone(), Self::destination(project, run_id, name)))
            .collect())
    }
}

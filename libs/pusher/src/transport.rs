//! Seams to the external collaborators: the upload transport and the
//! destination resolver.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

/// Performs one upload of a local file under its save name.
///
/// Invoked once per job attempt. Errors are reported back through the
/// job's outcome; the scheduler never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn upload(&self, save_name: &str, path: &Path) -> anyhow::Result<()>;
}

/// Issues upload destinations for a batch of save names.
#[async_trait]
pub trait DestinationResolver: Send + Sync + 'static {
    /// Opaque descriptor handed back to each requester.
    type Destination: Clone + Debug + Send + Sync + 'static;

    /// Resolve every name in `names` with a single call.
    ///
    /// Names missing from the returned map are reported to their waiters as
    /// not issued.
    async fn resolve(
        &self,
        project: &str,
        run_id: &str,
        names: &[String],
    ) -> anyhow::Result<HashMap<String, Self::Destination>>;
}

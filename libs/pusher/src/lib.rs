//! # runpush-core
//!
//! Concurrent upload scheduling for a changing set of local files.
//!
//! ## Components
//!
//! - [`FilePusher`]: accepts file-changed notifications and runs up to a fixed
//!   number of uploads at once. A change for a file that is already uploading
//!   restarts that upload after it completes, using the latest content;
//!   overflow waits in a FIFO backlog.
//! - [`DestinationBatcher`]: coalesces concurrent destination lookups into
//!   single batched resolver calls and hands each caller its own result.
//!
//! The network transport and the destination service are supplied by the
//! caller through the [`Transport`] and [`DestinationResolver`] traits.
//!
//! ```text
//! notify_changed ──▶ event loop ──spawn──▶ job ──▶ Transport::upload
//!                        ▲                  │
//!                        └──── JobDone ─────┘
//! ```

mod batcher;
mod config;
mod error;
mod job;
mod pusher;
mod transport;

pub use batcher::DestinationBatcher;
pub use config::{
    BatcherConfig, PusherConfig, DEFAULT_DRAIN_POLL, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_JOBS,
};
pub use error::{DestinationError, PushError};
pub use job::{UploadOutcome, UploadRequest};
pub use pusher::{FilePusher, PushSummary, UploadFailure};
pub use transport::{DestinationResolver, Transport};

//! runpush agent library.
//!
//! Wires the upload core to HTTP: destinations come from an upload-URL
//! service through a [`DestinationBatcher`](runpush_core::DestinationBatcher),
//! and file content is `PUT` to the issued URL.
//!
//! ## Modules
//!
//! - `cli`: command-line arguments
//! - `config`: settings as flags with `RUNPUSH_*` environment fallbacks
//! - `http`: HTTP resolver and transport
//! - `notify`: parsing change notifications from stdin or arguments

pub mod cli;
pub mod config;
pub mod http;
pub mod notify;

pub use config::{Config, LogFormat};
pub use http::{HttpResolver, HttpTransport, UploadDestination};

//! Command-line arguments.

use clap::Parser;

use crate::config::Config;

/// Upload changed run files with bounded concurrency.
///
/// With no FILES, change notifications are read from stdin, one per line:
/// `save_name<TAB>path[<TAB>copy]`.
#[derive(Debug, Parser)]
#[command(name = "push-agent", version)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    /// Upload a private copy of each file given as an argument.
    #[arg(long)]
    pub copy: bool,

    /// Files to upload, as `save_name=path` or a plain path.
    pub files: Vec<String>,
}

//! runpush push agent
//!
//! Uploads changed run files to remote storage. Change notifications come
//! from the command line or, when no files are given, from stdin; each file
//! is uploaded at most once at a time and re-uploaded if it changes while in
//! flight.
//!
//! ## Architecture
//!
//! - **FilePusher**: bounded scheduler with per-file restart
//! - **DestinationBatcher**: batches upload-URL lookups across concurrent jobs
//! - **HttpTransport**: streams the file with `PUT` to the issued URL

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use runpush_agent::cli::Cli;
use runpush_agent::{notify, HttpResolver, HttpTransport, LogFormat};
use runpush_core::{DestinationBatcher, FilePusher};
use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = &cli.config;

    init_tracing(config.log_format);

    info!(
        project = %config.project,
        run_id = ?config.run_id,
        resolver_url = %config.resolver_url,
        max_jobs = config.max_jobs,
        "Configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let resolver = Arc::new(HttpResolver::new(client.clone(), config.resolver_url.clone()));
    let destinations = DestinationBatcher::new(resolver, config.batcher_config()?)?;
    let transport = Arc::new(HttpTransport::new(client, destinations.clone()));
    let pusher = FilePusher::new(transport, config.pusher_config())?;

    if cli.files.is_empty() {
        info!("Reading change notifications from stdin");
        let stdin = BufReader::new(tokio::io::stdin());
        let notified = notify::read_notifications(stdin, |request| {
            pusher.notify_changed(request.save_name, request.path, request.copy);
        })
        .await
        .context("failed to read stdin")?;
        debug!(notified, "Stdin closed");
    } else {
        for arg in &cli.files {
            let request = notify::parse_arg(arg, cli.copy)?;
            pusher.notify_changed(request.save_name, request.path, request.copy);
        }
    }

    let summary = pusher.join().await?;
    destinations.join().await;

    for failure in &summary.failures {
        error!(
            save_name = %failure.save_name,
            path = %failure.path.display(),
            error = %failure.error,
            "Upload failed"
        );
    }

    info!(
        attempts = summary.attempts,
        succeeded = summary.succeeded,
        failed = summary.failures.len(),
        "Push agent finished"
    );

    if !summary.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

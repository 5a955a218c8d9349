//! HTTP resolver and transport.
//!
//! The resolver asks the upload-URL service for a batch of destinations:
//!
//! ```text
//! POST {base}/v1/projects/{project}/runs/{run_id}/upload-urls
//! {"files": ["output.log", ...]}
//!
//! 200 {"files": {"output.log": {"url": "...", "headers": {...}}}}
//! ```
//!
//! The transport streams file content to the issued URL with `PUT`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use runpush_core::{DestinationBatcher, DestinationResolver, Transport};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Where and how to upload one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDestination {
    /// Pre-authorized upload URL.
    pub url: String,

    /// Headers the storage backend requires on the upload request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct UploadUrlsRequest<'a> {
    files: &'a [String],
}

#[derive(Debug, Deserialize)]
struct UploadUrlsResponse {
    #[serde(default)]
    files: HashMap<String, UploadDestination>,
}

/// Destination resolver backed by the upload-URL service.
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResolver {
    /// Create a new resolver.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, project: &str, run_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/runs/{}/upload-urls",
            self.base_url.trim_end_matches('/'),
            project,
            run_id
        )
    }
}

#[async_trait]
impl DestinationResolver for HttpResolver {
    type Destination = UploadDestination;

    async fn resolve(
        &self,
        project: &str,
        run_id: &str,
        names: &[String],
    ) -> Result<HashMap<String, UploadDestination>> {
        let url = self.endpoint(project, run_id);
        debug!(url = %url, count = names.len(), "Requesting upload URLs");

        let response = self
            .client
            .post(&url)
            .json(&UploadUrlsRequest { files: names })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch upload URLs");
            anyhow::bail!("Failed to fetch upload URLs: {} - {}", status, body);
        }

        let payload: UploadUrlsResponse = response.json().await?;
        Ok(payload.files)
    }
}

/// Transport that uploads with HTTP `PUT`.
pub struct HttpTransport {
    client: reqwest::Client,
    destinations: DestinationBatcher<UploadDestination>,
}

impl HttpTransport {
    /// Create a new transport sharing `destinations` for URL lookups.
    pub fn new(
        client: reqwest::Client,
        destinations: DestinationBatcher<UploadDestination>,
    ) -> Self {
        Self {
            client,
            destinations,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(&self, save_name: &str, path: &Path) -> Result<()> {
        let destination = self
            .destinations
            .request_destination(save_name)
            .await
            .with_context(|| format!("no upload destination for {save_name}"))?;

        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();

        let mut request = self
            .client
            .put(&destination.url)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file));
        for (name, value) in &destination.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(save_name = %save_name, status = %status, body = %body, "Upload rejected");
            anyhow::bail!("Upload of {} rejected: {} - {}", save_name, status, body);
        }

        debug!(save_name = %save_name, bytes = size, "Uploaded file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let resolver = HttpResolver::new(reqwest::Client::new(), "http://urls.local/");
        assert_eq!(
            resolver.endpoint("vision", "r42"),
            "http://urls.local/v1/projects/vision/runs/r42/upload-urls"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let files = vec!["output.log".to_string(), "config.yaml".to_string()];
        let body = serde_json::to_value(UploadUrlsRequest { files: &files }).unwrap();
        assert_eq!(body, serde_json::json!({"files": ["output.log", "config.yaml"]}));
    }

    #[test]
    fn test_response_parsing() {
        let payload: UploadUrlsResponse = serde_json::from_value(serde_json::json!({
            "files": {
                "output.log": {"url": "https://storage.local/a?sig=1"},
                "model.bin": {
                    "url": "https://storage.local/b?sig=2",
                    "headers": {"Content-Type": "application/octet-stream"}
                }
            }
        }))
        .unwrap();

        assert_eq!(payload.files.len(), 2);
        assert!(payload.files["output.log"].headers.is_empty());
        assert_eq!(
            payload.files["model.bin"].headers["Content-Type"],
            "application/octet-stream"
        );
    }

    #[test]
    fn test_empty_response_has_no_files() {
        let payload: UploadUrlsResponse = serde_json::from_str("{}").unwrap();
        assert!(payload.files.is_empty());
    }
}

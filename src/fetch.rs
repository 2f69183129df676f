use crate::config::Endpoint;
use crate::{LOKI_QUERY_PATH, NODE_LABEL};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unable to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One client for the whole run; auth headers are set once as defaults and
/// every request carries the configured timeout.
pub struct LogFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl LogFetcher {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &endpoint.headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
        })
    }

    /// One `query_range` call scoped to the window and the node's label,
    /// returning the raw response body.
    pub async fn fetch_node(
        &self,
        node: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
        limit: u32,
    ) -> Result<String, FetchError> {
        let (from, to) = window;
        let selector = node_selector(node);
        let start = from.to_rfc3339();
        let end = to.to_rfc3339();
        let limit = limit.to_string();
        let url = format!("{}/{}", self.base_url, LOKI_QUERY_PATH);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", selector.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("limit", limit.as_str()),
                ("direction", "forward"),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }
}

fn node_selector(node: &str) -> String {
    format!("{{{NODE_LABEL}=\"{node}\"}}")
}

/// Fetch every node's window into `<node>.txt` under `run_dir`.
///
/// A failing node is logged and skipped, never aborting the run; the failed
/// names are returned so the run details can record them.
pub async fn download_all(
    fetcher: &LogFetcher,
    nodes: &[String],
    window: (DateTime<Utc>, DateTime<Utc>),
    limit: u32,
    run_dir: &Path,
) -> Vec<String> {
    let mut failed = Vec::new();
    for node in nodes {
        match download_node(fetcher, node, window, limit, run_dir).await {
            Ok(path) => info!("downloaded {node} to {}", path.display()),
            Err(err) => {
                error!("skipping {node}: {err}");
                failed.push(node.clone());
            }
        }
    }
    failed
}

async fn download_node(
    fetcher: &LogFetcher,
    node: &str,
    window: (DateTime<Utc>, DateTime<Utc>),
    limit: u32,
    run_dir: &Path,
) -> Result<PathBuf, FetchError> {
    let body = fetcher.fetch_node(node, window, limit).await?;
    let path = run_dir.join(format!("{node}.txt"));
    tokio::fs::write(&path, &body)
        .await
        .map_err(|source| FetchError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

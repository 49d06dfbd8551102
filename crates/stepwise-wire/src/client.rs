//! HTTP client for the step event stream

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Default path of the streaming endpoint
pub const DEFAULT_STREAM_PATH: &str = "/api/v1/convert";

/// Path of the health endpoint
pub const HEALTH_PATH: &str = "/api/v1/health";

/// A stream of raw body fragments, in arrival order
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Client that opens one event stream per query
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: reqwest::Client,
    base_url: String,
    path: String,
}

impl StreamClient {
    /// Create a client for a server base URL (e.g. `http://localhost:8000`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            path: DEFAULT_STREAM_PATH.to_string(),
        }
    }

    /// Use a different streaming endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    /// Base URL the client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the streaming endpoint
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }

    /// Send a query and return the response body as a fragment stream.
    ///
    /// A non-success status or an empty body fails here, before any
    /// fragment is produced.
    pub async fn open(&self, query: &str) -> Result<FragmentStream> {
        if self.base_url.is_empty() {
            return Err(Error::InvalidConfig("API URL is empty".to_string()));
        }

        let url = self.stream_url();
        tracing::debug!(%url, query, "Opening event stream");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body));
        }

        if response.content_length() == Some(0) {
            return Err(Error::MissingBody);
        }

        Ok(Box::pin(create_stream(response)))
    }

    /// Check whether the server reports itself healthy
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(false);
        }

        let text = response.text().await?;
        let body: serde_json::Value = serde_json::from_str(&text)?;
        Ok(body.get("status").and_then(|s| s.as_str()) == Some("healthy"))
    }
}

fn create_stream(response: reqwest::Response) -> impl Stream<Item = Result<Vec<u8>>> {
    stream! {
        let mut body = response.bytes_stream();
        let mut received = 0usize;

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    received += bytes.len();
                    yield Ok(bytes.to_vec());
                }
                Err(e) => {
                    tracing::warn!(error = %e, received, "Event stream body failed");
                    yield Err(Error::Http(e));
                    return;
                }
            }
        }

        tracing::debug!(received, "Event stream body complete");
    }
}

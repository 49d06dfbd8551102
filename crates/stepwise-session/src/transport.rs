//! Transport abstraction for opening event streams

use async_trait::async_trait;
use stepwise_wire::{FragmentStream, StreamClient};

use crate::error::Result;

/// Source of event streams, one per query
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a query and return the response body as fragments
    async fn open(&self, query: &str) -> Result<FragmentStream>;
}

/// HTTP transport backed by [`StreamClient`]
pub struct HttpTransport {
    client: StreamClient,
}

impl HttpTransport {
    /// Create a transport for a server base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: StreamClient::new(base_url),
        }
    }

    /// Create from an already configured client
    pub fn with_client(client: StreamClient) -> Self {
        Self { client }
    }

    /// The underlying client
    pub fn client(&self) -> &StreamClient {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, query: &str) -> Result<FragmentStream> {
        Ok(self.client.open(query).await?)
    }
}

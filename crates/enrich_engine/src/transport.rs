use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::ACCEPT;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::codec::{TransportError, CONTENT_TYPE};
use crate::ingress::{GenerationEndpoint, GroupRequest};

/// Raw byte stream of one group's progress records.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens the progress stream for one group.
#[async_trait::async_trait]
pub trait GroupTransport: Send + Sync {
    async fn open(&self, request: GroupRequest) -> Result<ByteStream, TransportError>;
}

/// Runs the endpoint on a background task and pipes its output through an
/// in-memory duplex.
#[derive(Clone)]
pub struct LocalTransport {
    endpoint: Arc<GenerationEndpoint>,
    buffer_size: usize,
}

impl LocalTransport {
    pub const DEFAULT_BUFFER: usize = 16 * 1024;

    pub fn new(endpoint: Arc<GenerationEndpoint>) -> Self {
        Self {
            endpoint,
            buffer_size: Self::DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl GroupTransport for LocalTransport {
    async fn open(&self, request: GroupRequest) -> Result<ByteStream, TransportError> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            endpoint.stream_group(request, server).await;
        });
        Ok(Box::new(client))
    }
}

/// Posts the group request to a remote endpoint and reads the chunked body
/// as it arrives.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| TransportError::Open(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl GroupTransport for HttpTransport {
    async fn open(&self, request: GroupRequest) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(|err| TransportError::Open(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Open(format!("http status {status}")));
        }

        let body: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>> =
            Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(body)))
    }
}

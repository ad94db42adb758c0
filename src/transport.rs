//! Seam to the messaging/delivery collaborator
//!
//! The pipeline never talks to the network directly; it goes through the
//! [`Transport`] trait so tests can substitute an in-memory implementation.
//! [`HttpTransport`] is the stock implementation for embedders that address
//! remote files by URL.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use log::info;
use reqwest::{Body, Client};
use std::io;
use std::path::Path;
use std::pin::Pin;
use tokio_util::io::ReaderStream;

use crate::error::Error;

/// Byte stream yielded by a fetch. Chunk errors are surfaced as `io::Error`
/// so implementations can forward transport failures mid-stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Operations the pipeline consumes from the messaging/delivery collaborator.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a byte stream for a remote file.
    async fn fetch(&self, remote_id: &str) -> Result<ByteStream, Error>;

    /// Hand the finished archive over to the owner.
    async fn deliver_document(
        &self,
        owner_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<(), Error>;

    /// Send or update the owner's progress text.
    async fn send_or_edit_text(&self, owner_id: i64, text: &str) -> Result<(), Error>;
}

/// HTTP transport: `remote_id` is a URL, delivery is a streamed POST to a
/// configured endpoint, progress texts go to an optional notify endpoint.
pub struct HttpTransport {
    client: Client,
    deliver_endpoint: String,
    notify_endpoint: Option<String>,
}

impl HttpTransport {
    pub fn new(
        deliver_endpoint: impl Into<String>,
        notify_endpoint: Option<String>,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(HttpTransport {
            client,
            deliver_endpoint: deliver_endpoint.into(),
            notify_endpoint,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, remote_id: &str) -> Result<ByteStream, Error> {
        let response = self
            .client
            .get(remote_id)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("download request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "download failed: {} - {}",
                status, text
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        Ok(Box::pin(stream))
    }

    async fn deliver_document(
        &self,
        owner_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<(), Error> {
        let file = tokio::fs::File::open(local_path).await?;
        let total_bytes = file.metadata().await?.len();
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.zip".to_string());

        let body = Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .client
            .post(&self.deliver_endpoint)
            .query(&[("target", owner_id.to_string()), ("name", file_name)])
            .header("content-length", total_bytes)
            .header("x-caption", caption)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("delivery request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "delivery failed: {} - {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn send_or_edit_text(&self, owner_id: i64, text: &str) -> Result<(), Error> {
        let Some(endpoint) = self.notify_endpoint.as_deref() else {
            // No notify endpoint configured; progress still lands in the log.
            info!("notify: {} text={}", owner_id, text);
            return Ok(());
        };
        let payload = serde_json::json!({ "target": owner_id, "text": text });
        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("notify request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "notify failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

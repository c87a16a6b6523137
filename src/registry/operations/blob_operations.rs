//! Blob operations that carry no upload session:
//! - Blob download (GET /v2/{name}/blobs/{digest})
//! - Existence and metadata checks (HEAD /v2/{name}/blobs/{digest})
//! - Cross-repository mount (POST /v2/{name}/blobs/uploads/?mount={digest}&from={repo})

use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::handlers::ValidationErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::{ByteStream, Transport, TransportRequest};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

/// Digest and size of a blob the registry already holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub digest: Digest,
    pub size: u64,
}

/// Live blob body from a download. Dropping it closes the underlying connection.
pub struct BlobStream {
    inner: ByteStream,
    content_length: Option<u64>,
}

impl BlobStream {
    pub fn new(inner: ByteStream, content_length: Option<u64>) -> Self {
        Self {
            inner,
            content_length,
        }
    }

    /// Length declared by the registry, when it sent one
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Drain the stream into memory, checking the result against the declared length
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let capacity = self.content_length.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut buffer = Vec::with_capacity(capacity);
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.check_length(buffer.len() as u64)?;
        Ok(buffer)
    }

    /// Copy the stream into `writer`, returning the number of bytes written
    pub async fn copy_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.inner.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        self.check_length(written)?;
        Ok(written)
    }

    fn check_length(&self, received: u64) -> Result<()> {
        match self.content_length {
            Some(declared) if declared != received => Err(RegistryError::Protocol(format!(
                "Registry declared {} bytes but sent {}",
                declared, received
            ))),
            _ => Ok(()),
        }
    }
}

impl Stream for BlobStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[derive(Clone)]
pub struct BlobOperations {
    transport: Arc<dyn Transport>,
    config: Arc<RegistryConfig>,
    output: Logger,
}

impl BlobOperations {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<RegistryConfig>, output: Logger) -> Self {
        Self {
            transport,
            config,
            output,
        }
    }

    fn blob_url(&self, repository: &str, digest: &Digest) -> Result<Url> {
        ValidationErrorHandler::validate_repository(repository)?;
        self.config
            .endpoint(&format!("/v2/{}/blobs/{}", repository, digest))
    }

    /// Open a stream over the blob's bytes; a missing blob fails with a 404 status error
    pub async fn download_blob(&self, repository: &str, digest: &Digest) -> Result<BlobStream> {
        let url = self.blob_url(repository, digest)?;
        self.output.detail(&format!(
            "registry.blob.download url={} repository={} digest={}",
            url, repository, digest
        ));

        let response = self
            .transport
            .execute(TransportRequest::new(Method::GET, url, "blob download"))
            .await?;

        let content_length = response.content_length();
        Ok(BlobStream::new(response.into_stream(), content_length))
    }

    /// Download the blob fully into memory
    pub async fn get_blob_content(&self, repository: &str, digest: &Digest) -> Result<Vec<u8>> {
        let stream = self.download_blob(repository, digest).await?;
        let content = stream.read_to_end().await?;
        self.output.detail(&format!(
            "Fetched {} ({})",
            digest.short(),
            self.output.format_size(content.len() as u64)
        ));
        Ok(content)
    }

    /// `true` if present, `false` on 404, error for anything else
    pub async fn has_blob(&self, repository: &str, digest: &Digest) -> Result<bool> {
        let url = self.blob_url(repository, digest)?;
        self.output.detail(&format!(
            "registry.blob.check url={} repository={} digest={}",
            url, repository, digest
        ));

        match self
            .transport
            .execute(TransportRequest::new(Method::HEAD, url, "blob existence check"))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                self.output
                    .detail(&format!("Blob {} does not exist in {}", digest.short(), repository));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Size of a blob the registry holds, from the HEAD response's `Content-Length`
    pub async fn blob_metadata(&self, repository: &str, digest: &Digest) -> Result<Descriptor> {
        let url = self.blob_url(repository, digest)?;
        self.output.detail(&format!(
            "registry.blob.check url={} repository={} digest={}",
            url, repository, digest
        ));

        let response = self
            .transport
            .execute(TransportRequest::new(Method::HEAD, url, "blob metadata"))
            .await?;

        let size = response.content_length().ok_or_else(|| {
            RegistryError::Protocol(format!(
                "Registry sent no Content-Length for blob {}",
                digest
            ))
        })?;

        Ok(Descriptor {
            digest: digest.clone(),
            size,
        })
    }

    /// Ask the registry to link `digest` from `from_repository` into `repository`
    pub async fn mount_blob(
        &self,
        repository: &str,
        digest: &Digest,
        from_repository: &str,
    ) -> Result<()> {
        ValidationErrorHandler::validate_repository(repository)?;
        ValidationErrorHandler::validate_repository(from_repository)?;

        let mut url = self
            .config
            .endpoint(&format!("/v2/{}/blobs/uploads/", repository))?;
        url.query_pairs_mut()
            .append_pair("mount", digest.as_str())
            .append_pair("from", from_repository);

        self.output.detail(&format!(
            "registry.blob.mount url={} repository={} digest={} from={}",
            url, repository, digest, from_repository
        ));

        let request = TransportRequest::new(Method::POST, url, "blob mount")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .header(CONTENT_LENGTH, HeaderValue::from(0u64));

        let response = self.transport.execute(request).await?;
        if response.status.as_u16() == 202 {
            // registry fell back to opening an upload session
            self.output.detail(&format!(
                "Mount of {} from {} was answered with an upload session",
                digest.short(),
                from_repository
            ));
        }
        Ok(())
    }
}

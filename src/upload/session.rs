//! Upload session initiation and bookkeeping
//!
//! `POST /v2/{repository}/blobs/uploads/` opens a session; the registry answers
//! with a `Location` naming it. Every later write goes to the most recent
//! location the registry handed out.

use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::handlers::ValidationErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::{Transport, TransportRequest, TransportResponse};
use crate::upload::range::ByteRange;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, RANGE};
use std::sync::Arc;
use url::Url;

/// In-progress resumable upload, owned by a single upload call
#[derive(Debug, Clone)]
pub struct UploadSession {
    repository: String,
    location: Url,
    cursor: u64,
}

impl UploadSession {
    pub fn new(repository: &str, location: Url) -> Self {
        Self {
            repository: repository.to_string(),
            location,
            cursor: 0,
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Bytes written so far
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Current location with `digest=` appended to whatever query it already carries
    pub fn location_with_digest(&self, digest: &Digest) -> Url {
        let mut url = self.location.clone();
        url.query_pairs_mut().append_pair("digest", digest.as_str());
        url
    }

    /// Record a completed partial write and adopt the location the registry returned.
    ///
    /// A `Range: 0-<n>` header, when present, must agree with the new cursor.
    /// Relative locations resolve against the current one.
    pub fn advance(&mut self, written: ByteRange, response: &TransportResponse) -> Result<()> {
        if written.start != self.cursor {
            return Err(RegistryError::Protocol(format!(
                "Chunk starts at {} but session cursor is at {}",
                written.start, self.cursor
            )));
        }
        self.cursor = written.end;

        if let Some(range) = response.header_str(RANGE) {
            let acknowledged = parse_range_end(range).ok_or_else(|| {
                RegistryError::Protocol(format!("Unparseable Range header: {}", range))
            })?;
            if acknowledged != self.cursor {
                return Err(RegistryError::Protocol(format!(
                    "Registry acknowledged {} bytes but {} were written",
                    acknowledged, self.cursor
                )));
            }
        }

        if let Some(location) = response.location(&self.location)? {
            self.location = location;
        }
        Ok(())
    }
}

/// Parse `0-<last>` (optionally prefixed with `bytes=`) into the exclusive end offset
fn parse_range_end(value: &str) -> Option<u64> {
    let value = value.trim();
    let value = value.strip_prefix("bytes=").unwrap_or(value);
    let (start, last) = value.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if start != 0 || last < start {
        return None;
    }
    Some(last + 1)
}

/// Opens upload sessions on the registry
#[derive(Clone)]
pub struct SessionInitiator {
    transport: Arc<dyn Transport>,
    config: Arc<RegistryConfig>,
    output: Logger,
}

impl SessionInitiator {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<RegistryConfig>, output: Logger) -> Self {
        Self {
            transport,
            config,
            output,
        }
    }

    /// Open a new upload session; every failure is reported as [`RegistryError::SessionInit`]
    pub async fn initiate(&self, repository: &str) -> Result<UploadSession> {
        self.try_initiate(repository)
            .await
            .map_err(|source| RegistryError::SessionInit {
                repository: repository.to_string(),
                source: Box::new(source),
            })
    }

    async fn try_initiate(&self, repository: &str) -> Result<UploadSession> {
        ValidationErrorHandler::validate_repository(repository)?;
        let url = self
            .config
            .endpoint(&format!("/v2/{}/blobs/uploads/", repository))?;

        self.output.detail(&format!(
            "registry.blob.initiate-upload url={} repository={}",
            url, repository
        ));

        let request = TransportRequest::new(Method::POST, url, "upload session initiation")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .header(CONTENT_LENGTH, HeaderValue::from(0u64));

        let response = self.transport.execute(request).await?;
        let location = response.location(&self.config.base_url)?.ok_or_else(|| {
            RegistryError::Protocol(format!(
                "Registry returned {} without a Location header for the upload session",
                response.status
            ))
        })?;

        self.output
            .detail(&format!("Upload session opened at {}", location));
        Ok(UploadSession::new(repository, location))
    }
}

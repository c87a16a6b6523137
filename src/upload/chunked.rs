//! Blob upload engine: single-shot and chunked (resumable) disciplines
//!
//! Blobs up to the configured chunk size go up in one `PUT` carrying the whole
//! payload. Larger blobs open a session, send `chunk_size` bytes per `PATCH`
//! in strict order, and finish with a `PUT ?digest=` carrying the remainder.

use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::handlers::ValidationErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::{RequestBody, Transport, TransportRequest};
use crate::upload::range::{ByteRange, UploadPlan};
use crate::upload::session::{SessionInitiator, UploadSession};
use crate::upload::source::{BlobSource, range_body};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue};
use std::sync::Arc;
use std::time::Instant;

const OCTET_STREAM: &str = "application/octet-stream";

pub struct ChunkedUploader {
    transport: Arc<dyn Transport>,
    config: Arc<RegistryConfig>,
    sessions: SessionInitiator,
    output: Logger,
}

impl ChunkedUploader {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<RegistryConfig>, output: Logger) -> Self {
        let sessions = SessionInitiator::new(Arc::clone(&transport), Arc::clone(&config), output.clone());
        Self {
            transport,
            config,
            sessions,
            output,
        }
    }

    /// Upload the whole of `source` with one finalizing `PUT`, whatever its size
    pub async fn upload_blob(
        &self,
        repository: &str,
        digest: &Digest,
        source: Arc<dyn BlobSource>,
    ) -> Result<()> {
        ValidationErrorHandler::validate_repository(repository)?;
        let session = self.sessions.initiate(repository).await?;
        let range = ByteRange::new(0, source.len());

        self.output.detail(&format!(
            "registry.blob.upload url={} repository={} digest={}",
            session.location(),
            repository,
            digest
        ));

        self.finalize(session, digest, source, range, false).await
    }

    /// Upload `source`, splitting it into `chunk_size` pieces when it exceeds one chunk
    pub async fn upload_blob_chunked(
        &self,
        repository: &str,
        digest: &Digest,
        source: Arc<dyn BlobSource>,
    ) -> Result<()> {
        let chunk_size = self.config.chunk_size;
        if chunk_size == 0 {
            return Err(RegistryError::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        let total = source.len();
        if total <= chunk_size {
            return self.upload_blob(repository, digest, source).await;
        }

        ValidationErrorHandler::validate_repository(repository)?;
        let plan = UploadPlan::new(total, chunk_size);
        let started = Instant::now();

        self.output.step(&format!(
            "Uploading {} ({}) to {} in {} writes",
            digest.short(),
            self.output.format_size(total),
            repository,
            plan.write_count()
        ));

        let mut session = self.sessions.initiate(repository).await?;
        for range in plan.partials() {
            self.write_chunk(&mut session, Arc::clone(&source), *range)
                .await?;
        }

        self.output.detail(&format!(
            "registry.blob.upload url={} Content-Range={} repository={} digest={}",
            session.location(),
            plan.last().content_range().unwrap_or_default(),
            repository,
            digest
        ));
        self.finalize(session, digest, source, plan.last(), true)
            .await?;

        self.output.detail(&format!(
            "Chunked upload of {} finished in {}",
            digest.short(),
            self.output.format_duration(started.elapsed())
        ));
        Ok(())
    }

    /// `PATCH` one full chunk and move the session forward
    async fn write_chunk(
        &self,
        session: &mut UploadSession,
        source: Arc<dyn BlobSource>,
        range: ByteRange,
    ) -> Result<()> {
        let content_range = range.content_range().ok_or_else(|| {
            RegistryError::Validation("Partial writes must carry at least one byte".to_string())
        })?;

        self.output.detail(&format!(
            "registry.blob.upload url={} Content-Range={}",
            session.location(),
            content_range
        ));

        let request = TransportRequest::new(Method::PATCH, session.location().clone(), "blob chunk upload")
            .header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))
            .header(CONTENT_LENGTH, HeaderValue::from(range.len()))
            .header(CONTENT_RANGE, range_header(&content_range)?)
            .body(range_body(source, range));

        let response = self.transport.execute(request).await?;
        session.advance(range, &response)
    }

    /// `PUT ?digest=` closing the session; `with_range` adds `Content-Range` for the final slice
    async fn finalize(
        &self,
        session: UploadSession,
        digest: &Digest,
        source: Arc<dyn BlobSource>,
        range: ByteRange,
        with_range: bool,
    ) -> Result<()> {
        let url = session.location_with_digest(digest);

        let mut request = TransportRequest::new(Method::PUT, url, "blob upload")
            .header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))
            .header(CONTENT_LENGTH, HeaderValue::from(range.len()));

        if with_range {
            if let Some(content_range) = range.content_range() {
                request = request.header(CONTENT_RANGE, range_header(&content_range)?);
            }
        }

        let body = if range.is_empty() {
            RequestBody::empty()
        } else {
            range_body(source, range)
        };

        self.transport.execute(request.body(body)).await?;
        self.output.detail(&format!(
            "Blob {} committed to {}",
            digest.short(),
            session.repository()
        ));
        Ok(())
    }
}

fn range_header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RegistryError::Validation(format!("Invalid Content-Range {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::transport::mock::{MockTransport, RecordedRequest};
    use crate::upload::source::MemorySource;

    const BASE: &str = "http://registry.test";

    fn uploader(mock: Arc<MockTransport>, chunk_size: u64) -> ChunkedUploader {
        let config = RegistryConfig::new(BASE).unwrap().with_chunk_size(chunk_size);
        ChunkedUploader::new(mock, Arc::new(config), Logger::new_quiet())
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn writes(requests: &[RecordedRequest]) -> Vec<&RecordedRequest> {
        requests
            .iter()
            .filter(|r| r.method == Method::PATCH || r.method == Method::PUT)
            .collect()
    }

    #[tokio::test]
    async fn test_small_blob_is_single_put_with_digest() {
        let data = payload(1000);
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/v2/app/blobs/uploads/s1")], b"")
            .respond(201, &[], b"");

        uploader(mock.clone(), 1000)
            .upload_blob_chunked("app", &digest, Arc::new(MemorySource::new(data.clone())))
            .await
            .unwrap();

        let requests = mock.requests();
        let writes = writes(&requests);
        assert_eq!(writes.len(), 1);
        let put = writes[0];
        assert_eq!(put.method, Method::PUT);
        assert_eq!(put.url.path(), "/v2/app/blobs/uploads/s1");
        assert_eq!(put.query("digest"), Some(digest.to_string()));
        assert_eq!(put.header("content-length"), Some("1000"));
        assert_eq!(put.header("content-type"), Some(OCTET_STREAM));
        assert_eq!(put.header("content-range"), None);
        assert_eq!(put.body.as_deref(), Some(&data[..]));
    }

    #[tokio::test]
    async fn test_twenty_million_bytes_use_two_patches_and_a_put() {
        let data = payload(20_000_000);
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/v2/app/blobs/uploads/a")], b"")
            .respond(202, &[("Location", "/v2/app/blobs/uploads/b"), ("Range", "0-8095999")], b"")
            .respond(202, &[("Location", "/v2/app/blobs/uploads/c"), ("Range", "0-16191999")], b"")
            .respond(201, &[], b"");

        uploader(mock.clone(), 8_096_000)
            .upload_blob_chunked("app", &digest, Arc::new(MemorySource::new(data.clone())))
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].method, Method::POST);
        let writes = writes(&requests);
        assert_eq!(writes.len(), 3);

        let expected = [
            (Method::PATCH, "/v2/app/blobs/uploads/a", "0-8095999", 0usize, 8_096_000usize),
            (Method::PATCH, "/v2/app/blobs/uploads/b", "8096000-16191999", 8_096_000, 16_192_000),
            (Method::PUT, "/v2/app/blobs/uploads/c", "16192000-19999999", 16_192_000, 20_000_000),
        ];
        for (request, (method, path, range, start, end)) in writes.iter().zip(expected) {
            assert_eq!(request.method, method);
            assert_eq!(request.url.path(), path);
            assert_eq!(request.header("content-range"), Some(range));
            let len = (end - start).to_string();
            assert_eq!(request.header("content-length"), Some(len.as_str()));
            assert_eq!(request.body.as_deref(), Some(&data[start..end]));
        }

        assert_eq!(writes[0].query("digest"), None);
        assert_eq!(writes[1].query("digest"), None);
        assert_eq!(writes[2].query("digest"), Some(digest.to_string()));
    }

    #[tokio::test]
    async fn test_exact_multiple_finalizes_with_empty_put() {
        let data = payload(30);
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/u/1")], b"")
            .respond(202, &[("Location", "/u/2")], b"")
            .respond(202, &[("Location", "/u/3")], b"")
            .respond(202, &[("Location", "/u/4")], b"")
            .respond(201, &[], b"");

        uploader(mock.clone(), 10)
            .upload_blob_chunked("app", &digest, Arc::new(MemorySource::new(data)))
            .await
            .unwrap();

        let requests = mock.requests();
        let writes = writes(&requests);
        assert_eq!(writes.len(), 4);
        assert!(writes[..3].iter().all(|r| r.method == Method::PATCH));
        let put = writes[3];
        assert_eq!(put.method, Method::PUT);
        assert_eq!(put.url.path(), "/u/4");
        assert_eq!(put.header("content-length"), Some("0"));
        assert_eq!(put.header("content-range"), None);
        assert_eq!(put.body.as_deref(), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_failed_chunk_aborts_upload() {
        let data = payload(25);
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/u/1")], b"")
            .respond(202, &[("Location", "/u/2")], b"")
            .respond(416, &[], b"RANGE_INVALID")
            .respond(201, &[], b"");

        let err = uploader(mock.clone(), 10)
            .upload_blob_chunked("app", &digest, Arc::new(MemorySource::new(data)))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(416));
        // POST + two PATCHes; the final PUT is never sent
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_session_failure_stops_before_any_write() {
        let data = payload(25);
        let mock = Arc::new(MockTransport::new());
        mock.respond(404, &[], b"NAME_UNKNOWN");

        let err = uploader(mock.clone(), 10)
            .upload_blob_chunked("app", &Digest::sha256(&data), Arc::new(MemorySource::new(data)))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::SessionInit { .. }));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_monolithic_upload_ignores_chunk_size() {
        let data = payload(50);
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/u/1?_state=s")], b"")
            .respond(201, &[], b"");

        uploader(mock.clone(), 10)
            .upload_blob("app", &digest, Arc::new(MemorySource::new(data.clone())))
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, Method::PUT);
        assert_eq!(requests[1].query("_state").as_deref(), Some("s"));
        assert_eq!(requests[1].query("digest"), Some(digest.to_string()));
        assert_eq!(requests[1].body.as_deref(), Some(&data[..]));
    }

    #[tokio::test]
    async fn test_range_mismatch_aborts_upload() {
        let data = payload(25);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/u/1")], b"")
            .respond(202, &[("Location", "/u/2"), ("Range", "0-3")], b"");

        let err = uploader(mock.clone(), 10)
            .upload_blob_chunked("app", &Digest::sha256(&data), Arc::new(MemorySource::new(data)))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Protocol(_)));
        assert_eq!(mock.requests().len(), 2);
    }
}

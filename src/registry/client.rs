// This file contains the RegistryClient, the single entry point for blob
// transfers against one registry. It owns the transport and configuration
// and hands out the upload, download and lookup operations built on them.

use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::auth::CredentialAuthenticator;
use crate::registry::operations::{BlobOperations, BlobStream, Descriptor};
use crate::registry::transport::{HttpTransport, Transport};
use crate::upload::source::BlobSource;
use crate::upload::{ChunkedUploader, SessionInitiator, UploadSession};
use std::sync::Arc;

pub struct RegistryClientBuilder {
    config: RegistryConfig,
    transport: Option<Arc<dyn Transport>>,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            transport: None,
            output: Logger::default(),
        }
    }

    /// Use a caller-supplied transport instead of the default reqwest one
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let http = HttpTransport::new(&self.config, self.output.clone())?;
                let authenticator = CredentialAuthenticator::new(
                    http.client().clone(),
                    self.config.auth.clone(),
                    self.output.clone(),
                );
                Arc::new(http.with_authenticator(Arc::new(authenticator)))
            }
        };

        let config = Arc::new(self.config);
        self.output.detail(&format!(
            "Registry client for {} (chunk size {})",
            config.base_url,
            self.output.format_size(config.chunk_size)
        ));

        Ok(RegistryClient {
            blobs: BlobOperations::new(Arc::clone(&transport), Arc::clone(&config), self.output.clone()),
            sessions: SessionInitiator::new(Arc::clone(&transport), Arc::clone(&config), self.output.clone()),
            uploader: ChunkedUploader::new(transport, Arc::clone(&config), self.output.clone()),
            config,
            output: self.output,
        })
    }
}

/// Client for the blob endpoints of one registry
pub struct RegistryClient {
    config: Arc<RegistryConfig>,
    blobs: BlobOperations,
    sessions: SessionInitiator,
    uploader: ChunkedUploader,
    output: Logger,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        RegistryClientBuilder::new(config).build()
    }

    pub fn builder(config: RegistryConfig) -> RegistryClientBuilder {
        RegistryClientBuilder::new(config)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.output
    }

    pub async fn initiate_upload(&self, repository: &str) -> Result<UploadSession> {
        self.sessions.initiate(repository).await
    }

    /// Monolithic upload: one session, one `PUT` with the whole blob
    pub async fn upload_blob(
        &self,
        repository: &str,
        digest: &Digest,
        source: Arc<dyn BlobSource>,
    ) -> Result<()> {
        self.uploader.upload_blob(repository, digest, source).await
    }

    /// Chunked upload using the configured chunk size
    pub async fn upload_blob_chunked(
        &self,
        repository: &str,
        digest: &Digest,
        source: Arc<dyn BlobSource>,
    ) -> Result<()> {
        self.uploader
            .upload_blob_chunked(repository, digest, source)
            .await
    }

    pub async fn download_blob(&self, repository: &str, digest: &Digest) -> Result<BlobStream> {
        self.blobs.download_blob(repository, digest).await
    }

    pub async fn get_blob_content(&self, repository: &str, digest: &Digest) -> Result<Vec<u8>> {
        self.blobs.get_blob_content(repository, digest).await
    }

    pub async fn has_blob(&self, repository: &str, digest: &Digest) -> Result<bool> {
        self.blobs.has_blob(repository, digest).await
    }

    pub async fn blob_metadata(&self, repository: &str, digest: &Digest) -> Result<Descriptor> {
        self.blobs.blob_metadata(repository, digest).await
    }

    pub async fn mount_blob(
        &self,
        repository: &str,
        digest: &Digest,
        from_repository: &str,
    ) -> Result<()> {
        self.blobs
            .mount_blob(repository, digest, from_repository)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::transport::mock::MockTransport;
    use crate::upload::MemorySource;
    use reqwest::Method;

    fn client(mock: Arc<MockTransport>, chunk_size: u64) -> RegistryClient {
        let config = RegistryConfig::new("http://registry.test")
            .unwrap()
            .with_chunk_size(chunk_size);
        RegistryClient::builder(config)
            .with_transport(mock)
            .with_logger(Logger::new_quiet())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = RegistryConfig::new("http://registry.test")
            .unwrap()
            .with_chunk_size(0);
        assert!(matches!(
            RegistryClient::new(config),
            Err(RegistryError::Validation(_)) | Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn test_build_default_transport() {
        let config = RegistryConfig::new("localhost:5000").unwrap();
        let client = RegistryClient::new(config).unwrap();
        assert_eq!(client.config().base_url.as_str(), "https://localhost:5000/");
    }

    #[tokio::test]
    async fn test_initiate_upload_returns_session() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/v2/app/blobs/uploads/abc")], b"");
        let session = client(mock, 10).initiate_upload("app").await.unwrap();
        assert_eq!(session.repository(), "app");
        assert_eq!(session.location().path(), "/v2/app/blobs/uploads/abc");
    }

    #[tokio::test]
    async fn test_chunked_upload_uses_configured_chunk_size() {
        let data = b"abcdefghijklmnopqrstuvwxy".to_vec();
        let digest = Digest::sha256(&data);
        let mock = Arc::new(MockTransport::new());
        mock.respond(202, &[("Location", "/v2/app/blobs/uploads/1")], b"")
            .respond(202, &[("Location", "/v2/app/blobs/uploads/2")], b"")
            .respond(202, &[("Location", "/v2/app/blobs/uploads/3")], b"")
            .respond(201, &[], b"");

        client(mock.clone(), 10)
            .upload_blob_chunked("app", &digest, Arc::new(MemorySource::new(data)))
            .await
            .unwrap();

        let methods: Vec<Method> = mock.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![Method::POST, Method::PATCH, Method::PATCH, Method::PUT]);
        assert_eq!(mock.remaining(), 0);
    }
}

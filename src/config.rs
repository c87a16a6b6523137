//! Configuration for registry access: base address, chunking and credentials

use crate::error::handlers::ValidationErrorHandler;
use crate::error::{RegistryError, Result};
use std::env;
use url::Url;

/// Chunk size used by the chunked upload engine, and the single-shot threshold
pub const DEFAULT_CHUNK_SIZE: u64 = 8_096_000;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_USER_AGENT: &str = concat!("docker-blob-transfer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }
}

/// Everything a [`RegistryClient`](crate::registry::RegistryClient) needs, built once and
/// handed to the client explicitly.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: Url,
    pub chunk_size: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub skip_tls: bool,
    pub user_agent: String,
    pub auth: AuthConfig,
}

impl RegistryConfig {
    /// Create a configuration for the registry at `address`.
    ///
    /// An address without a scheme is assumed to be `https://`.
    pub fn new(address: &str) -> Result<Self> {
        Ok(Self {
            base_url: Self::parse_address(address)?,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            skip_tls: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth: AuthConfig::default(),
        })
    }

    /// Load configuration from `REGISTRY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from the same variables as [`from_env`](Self::from_env),
    /// resolved through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup("REGISTRY_ADDRESS")
            .ok_or_else(|| RegistryError::Config("REGISTRY_ADDRESS not set".to_string()))?;
        let mut config = Self::new(&address)?;

        config.auth = AuthConfig::new(lookup("REGISTRY_USERNAME"), lookup("REGISTRY_PASSWORD"));
        config.skip_tls = lookup("SKIP_TLS").is_some_and(|v| v == "true" || v == "1");

        if let Some(value) = lookup("CHUNK_SIZE") {
            config.chunk_size = value
                .parse()
                .map_err(|_| RegistryError::Config(format!("Invalid CHUNK_SIZE: {}", value)))?;
        }
        if let Some(value) = lookup("REGISTRY_TIMEOUT") {
            config.timeout_secs = value.parse().map_err(|_| {
                RegistryError::Config(format!("Invalid REGISTRY_TIMEOUT: {}", value))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(RegistryError::Config(format!(
                "Unsupported registry scheme: {}",
                self.base_url.scheme()
            )));
        }
        if self.chunk_size == 0 {
            return Err(RegistryError::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        ValidationErrorHandler::validate_timeout(self.timeout_secs)?;
        ValidationErrorHandler::validate_credentials(&self.auth.username, &self.auth.password)?;
        Ok(())
    }

    /// Append an API path such as `/v2/library/alpine/blobs/uploads/` to the base address,
    /// keeping any path prefix the address carries
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let prefixed = format!("{}/", base.path());
            base.set_path(&prefixed);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    fn parse_address(address: &str) -> Result<Url> {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(RegistryError::Config(
                "Registry address cannot be empty".to_string(),
            ));
        }

        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| RegistryError::Config(format!("Invalid registry address {}: {}", address, e)))?;
        if url.host_str().is_none() {
            return Err(RegistryError::Config(format!(
                "Registry address has no host: {}",
                address
            )));
        }
        Ok(url)
    }
}

//! Content digests identifying blobs
//!
//! A [`Digest`] is carried around in its canonical `algorithm:encoded` form.
//! Verifying that bytes actually match a digest is the registry's job; the
//! only hashing done here is [`Digest::sha256`] for callers that need to
//! name local content before uploading it.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// SHA256 digest of zero bytes
pub const EMPTY_SHA256_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string such as `sha256:<64 hex chars>`
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, encoded) = value.split_once(':').ok_or_else(|| {
            RegistryError::Validation(format!("Digest missing algorithm prefix: {}", value))
        })?;

        if !Self::is_valid_algorithm(algorithm) {
            return Err(RegistryError::Validation(format!(
                "Invalid digest algorithm: {}",
                algorithm
            )));
        }
        if encoded.is_empty()
            || !encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'))
        {
            return Err(RegistryError::Validation(format!(
                "Invalid digest encoding: {}",
                value
            )));
        }
        if algorithm == "sha256"
            && !(encoded.len() == 64
                && encoded
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)))
        {
            return Err(RegistryError::Validation(format!(
                "Invalid SHA256 digest: expected 64 lowercase hex characters, got '{}'",
                encoded
            )));
        }

        Ok(Self(value.to_string()))
    }

    /// Compute the sha256 digest of `data`
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Stream a file through sha256 without loading it into memory
    pub async fn sha256_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref()).await?;
        let mut hasher = sha2::Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(format!("sha256:{}", hex::encode(hasher.finalize()))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(alg, _)| alg).unwrap_or_default()
    }

    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, enc)| enc).unwrap_or_default()
    }

    /// Truncated form for log lines
    pub fn short(&self) -> &str {
        let end = self.0.len().min(self.algorithm().len() + 1 + 12);
        &self.0[..end]
    }

    // alg-component ([+._-] alg-component)*, alg-component = [a-z0-9]+
    fn is_valid_algorithm(algorithm: &str) -> bool {
        !algorithm.is_empty()
            && algorithm
                .split(['+', '.', '_', '-'])
                .all(|part| {
                    !part.is_empty()
                        && part
                            .chars()
                            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Digest::parse(&value).map_err(serde::de::Error::custom)
    }
}

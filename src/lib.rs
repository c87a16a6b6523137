//! Docker Blob Transfer Library
//!
//! Client side of the registry blob protocol: single-shot and chunked uploads,
//! streaming downloads, existence and size checks, and cross-repository mounts.

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod registry;
pub mod upload;

pub use config::{AuthConfig, RegistryConfig};
pub use digest::Digest;
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use registry::{BlobStream, Descriptor, RegistryClient, RegistryClientBuilder};
pub use upload::{BlobSource, ByteRange, FileSource, MemorySource, UploadSession};

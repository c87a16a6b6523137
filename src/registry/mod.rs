//! Registry module for Docker Registry HTTP API v2 blob endpoints
//!
//! This module provides the transport, authentication challenge handling and
//! the client that ties blob download, probing, mounting and uploads together.

pub mod auth;
pub mod client;
pub mod operations;
pub mod transport;

pub use crate::config::{AuthConfig, RegistryConfig};
pub use auth::{Authenticator, Challenge, CredentialAuthenticator};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use operations::{BlobOperations, BlobStream, Descriptor};
pub use transport::{HttpTransport, RequestBody, Transport, TransportRequest, TransportResponse};

//! Error types and handlers for registry blob operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connectivity failures and unreadable response bodies
    #[error("Network error: {0}")]
    Network(String),

    /// Request or connect deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The registry answered with a non-success status
    #[error("{operation} failed (HTTP {status}): {body}")]
    Status {
        status: u16,
        operation: String,
        body: String,
    },

    /// A required response header was absent or unparseable
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The upload session could not be opened
    #[error("Could not open upload session for {repository}: {source}")]
    SessionInit {
        repository: String,
        #[source]
        source: Box<RegistryError>,
    },

    /// Authentication challenge could not be answered
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// HTTP status reported by the registry, if this error is a peer rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Status { status, .. } => Some(*status),
            RegistryError::SessionInit { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(format!("Invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Protocol(format!("Malformed JSON response: {}", err))
    }
}

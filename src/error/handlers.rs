//! Standardized mapping from transport failures to [`RegistryError`]

use crate::error::{RegistryError, Result};
use reqwest::StatusCode;

/// Upper bound on how much of an error body is kept in the error value
const MAX_ERROR_BODY: usize = 512;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Build a peer-rejection error from a status code and the (possibly long) body text
    pub fn status_error(status: StatusCode, body: &str, operation: &str) -> RegistryError {
        let body = body.trim();
        let body = if body.is_empty() {
            Self::describe_status(status).to_string()
        } else if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &body[..end])
        } else {
            body.to_string()
        };

        RegistryError::Status {
            status: status.as_u16(),
            operation: operation.to_string(),
            body,
        }
    }

    /// Short explanation used when the registry sends no error body
    pub fn describe_status(status: StatusCode) -> &'static str {
        match status.as_u16() {
            400 => "bad request (check digest format and data integrity)",
            401 => "authentication required",
            403 => "permission denied",
            404 => "blob or repository not found",
            405 => "operation not supported by registry",
            409 => "conflict",
            413 => "payload too large",
            416 => "requested range not satisfiable",
            429 => "rate limited",
            500 => "registry server error",
            502 | 503 => "registry unavailable",
            507 => "registry out of storage",
            _ => status.canonical_reason().unwrap_or("unexpected status"),
        }
    }

    /// 2xx and 3xx count as success for every blob endpoint
    pub fn is_success(status: StatusCode) -> bool {
        status.is_success() || status.is_redirection()
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        if error.is_timeout() {
            RegistryError::Timeout(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            RegistryError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.is_body() || error.is_decode() {
            RegistryError::Network(format!("Failed to read body during {}: {}", context, error))
        } else {
            RegistryError::Network(format!("{} network error: {}", context, error))
        }
    }
}

/// Validation error utilities
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    pub fn validate_repository(repository: &str) -> Result<()> {
        if repository.is_empty() {
            return Err(RegistryError::Validation(
                "Repository name cannot be empty".to_string(),
            ));
        }
        if repository.starts_with('/') || repository.ends_with('/') || repository.contains("//") {
            return Err(RegistryError::Validation(format!(
                "Invalid repository name: {}",
                repository
            )));
        }
        Ok(())
    }

    pub fn validate_credentials(
        username: &Option<String>,
        password: &Option<String>,
    ) -> Result<()> {
        match (username, password) {
            (Some(_), None) => Err(RegistryError::Validation(
                "Password is required when username is provided".to_string(),
            )),
            (None, Some(_)) => Err(RegistryError::Validation(
                "Username is required when password is provided".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn validate_timeout(timeout: u64) -> Result<()> {
        if timeout == 0 {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if timeout > 86400 {
            return Err(RegistryError::Validation(
                "Timeout cannot exceed 24 hours (86400 seconds)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_uses_description_for_empty_body() {
        let err = HttpErrorHandler::status_error(StatusCode::NOT_FOUND, "  ", "blob check");
        match err {
            RegistryError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "blob or repository not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_error_truncates_long_body() {
        let long = "x".repeat(2000);
        let err = HttpErrorHandler::status_error(StatusCode::BAD_REQUEST, &long, "upload");
        match err {
            RegistryError::Status { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY + 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_redirects_count_as_success() {
        assert!(HttpErrorHandler::is_success(StatusCode::ACCEPTED));
        assert!(HttpErrorHandler::is_success(StatusCode::TEMPORARY_REDIRECT));
        assert!(!HttpErrorHandler::is_success(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_repository_validation() {
        assert!(ValidationErrorHandler::validate_repository("library/alpine").is_ok());
        assert!(ValidationErrorHandler::validate_repository("").is_err());
        assert!(ValidationErrorHandler::validate_repository("/alpine").is_err());
        assert!(ValidationErrorHandler::validate_repository("a//b").is_err());
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let user = Some("u".to_string());
        assert!(ValidationErrorHandler::validate_credentials(&user, &None).is_err());
        assert!(ValidationErrorHandler::validate_credentials(&None, &None).is_ok());
    }
}

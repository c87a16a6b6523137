// Shared helpers for the integration tests
#![allow(dead_code)]

use docker_blob_transfer::{AuthConfig, Logger, RegistryClient, RegistryConfig};
use wiremock::{MockServer, Request};

/// Deterministic, non-repeating-looking test payload
pub fn create_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

pub fn config(server: &MockServer, chunk_size: u64) -> RegistryConfig {
    RegistryConfig::new(&server.uri())
        .expect("mock server uri is a valid registry address")
        .with_chunk_size(chunk_size)
        .with_timeout(30)
}

pub fn client(server: &MockServer, chunk_size: u64) -> RegistryClient {
    RegistryClient::builder(config(server, chunk_size))
        .with_logger(Logger::new_quiet())
        .build()
        .expect("Failed to build client")
}

pub fn client_with_auth(server: &MockServer, username: &str, password: &str) -> RegistryClient {
    let config = config(server, 1024 * 1024).with_auth(AuthConfig::new(
        Some(username.to_string()),
        Some(password.to_string()),
    ));
    RegistryClient::builder(config)
        .with_logger(Logger::new_quiet())
        .build()
        .expect("Failed to build client")
}

pub fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn query(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Requests the server saw, minus anything that is not a blob write
pub async fn writes(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .into_iter()
        .filter(|r| matches!(r.method.as_str(), "PATCH" | "PUT"))
        .collect()
}

//! Request/response transport for the Docker Registry HTTP API v2
//!
//! Every blob operation talks to the registry through the [`Transport`] trait.
//! [`HttpTransport`] is the reqwest-backed implementation; it turns non-success
//! statuses into [`RegistryError::Status`] and answers a single `401` challenge
//! per request by regenerating the body from its [`RequestBody`] factory and
//! resending the identical request.
//!
//! Credentials stay with the registry's origin. Requests to any other host (an
//! upload `Location` pointing at a storage backend, say) never carry the cached
//! `Authorization` value and their challenges are not answered.

use crate::config::RegistryConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::auth::{Authenticator, Challenge};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::{Origin, Url};

/// Stream of body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Future producing a fresh request body
pub type BodyFuture = BoxFuture<'static, Result<reqwest::Body>>;

type BodyFactory = Arc<dyn Fn() -> BodyFuture + Send + Sync>;

/// Request body that can be produced any number of times.
///
/// The factory is invoked once per send attempt, so a request that has to be
/// resent after an authentication challenge starts again from its first byte.
#[derive(Clone)]
pub struct RequestBody {
    length: u64,
    factory: BodyFactory,
}

impl RequestBody {
    pub fn new<F>(length: u64, factory: F) -> Self
    where
        F: Fn() -> BodyFuture + Send + Sync + 'static,
    {
        Self {
            length,
            factory: Arc::new(factory),
        }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        let length = data.len() as u64;
        Self::new(length, move || {
            let data = data.clone();
            Box::pin(async move { Ok(reqwest::Body::from(data)) })
        })
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Produce a new body instance
    pub async fn open(&self) -> Result<reqwest::Body> {
        (self.factory)().await
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A single exchange with the registry
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// Human-readable operation name used in error messages
    pub operation: String,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url, operation: &str) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            operation: operation.to_string(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response from the registry; the body is streamed lazily
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ByteStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let body: ByteStream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, headers, body)
    }

    pub fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Declared `Content-Length`, read from the header rather than the body size hint
    /// so that it is available on HEAD responses.
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
    }

    /// `Location` header resolved against `base`; `Ok(None)` when the header is absent
    pub fn location(&self, base: &Url) -> Result<Option<Url>> {
        let Some(raw) = self.headers.get(LOCATION) else {
            return Ok(None);
        };
        let raw = raw.to_str().map_err(|e| {
            RegistryError::Protocol(format!("Location header is not valid text: {}", e))
        })?;
        if raw.trim().is_empty() {
            return Err(RegistryError::Protocol("Location header is empty".to_string()));
        }
        base.join(raw.trim())
            .map(Some)
            .map_err(|e| RegistryError::Protocol(format!("Unparseable Location header {}: {}", raw, e)))
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Request/response exchange over the registry protocol.
///
/// Implementations return `Ok` only for 2xx/3xx responses and report every
/// other status as [`RegistryError::Status`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    authenticator: Option<Arc<dyn Authenticator>>,
    registry: Origin,
    authorization: RwLock<HashMap<Origin, HeaderValue>>,
    logger: Logger,
}

impl HttpTransport {
    pub fn new(config: &RegistryConfig, logger: Logger) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(10)
            .user_agent(config.user_agent.clone());

        if config.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, &config.base_url, logger))
    }

    /// Transport over `client` that authenticates only against `registry`'s origin
    pub fn with_client(client: Client, registry: &Url, logger: Logger) -> Self {
        Self {
            client,
            authenticator: None,
            registry: registry.origin(),
            authorization: RwLock::new(HashMap::new()),
            logger,
        }
    }

    /// Answer `401` challenges with credentials from `authenticator`
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether credentials may be sent to `url`
    fn is_registry(&self, url: &Url) -> bool {
        url.origin() == self.registry
    }

    fn cached_authorization(&self, url: &Url) -> Result<Option<HeaderValue>> {
        if !self.is_registry(url) {
            return Ok(None);
        }
        self.authorization
            .read()
            .map(|guard| guard.get(&url.origin()).cloned())
            .map_err(|_| RegistryError::Auth("Failed to acquire authorization read lock".to_string()))
    }

    fn store_authorization(&self, url: &Url, value: HeaderValue) -> Result<()> {
        let mut guard = self
            .authorization
            .write()
            .map_err(|_| RegistryError::Auth("Failed to acquire authorization write lock".to_string()))?;
        guard.insert(url.origin(), value);
        Ok(())
    }

    async fn send_once(
        &self,
        request: &TransportRequest,
        authorization: Option<&HeaderValue>,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value.clone());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.open().await?);
        }

        builder
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, &request.operation))
    }

    /// Resend once after a `401` when a challenge can be answered
    async fn answer_challenge(
        &self,
        request: &TransportRequest,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let Some(authenticator) = &self.authenticator else {
            return Ok(response);
        };
        if !self.is_registry(&request.url) {
            self.logger.detail(&format!(
                "registry.auth.skip url={} (not the registry origin)",
                request.url
            ));
            return Ok(response);
        }
        let Some(header) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
        else {
            return Ok(response);
        };

        let challenge = Challenge::parse(&header)?;
        self.logger.detail(&format!(
            "registry.auth.challenge url={} scheme={}",
            request.url,
            challenge.scheme()
        ));

        let authorization = authenticator.authorize(&challenge).await?;
        self.store_authorization(&request.url, authorization.clone())?;

        self.logger.detail(&format!(
            "registry.auth.resend method={} url={}",
            request.method, request.url
        ));
        self.send_once(request, Some(&authorization)).await
    }

    async fn into_transport_response(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<TransportResponse> {
        let status = response.status();
        if !HttpErrorHandler::is_success(status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(HttpErrorHandler::status_error(status, &body, operation));
        }

        let headers = response.headers().clone();
        let context = operation.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| NetworkErrorHandler::handle_network_error(&e, &context))
            .boxed();

        Ok(TransportResponse::new(status, headers, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let authorization = self.cached_authorization(&request.url)?;
        let mut response = self.send_once(&request, authorization.as_ref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            response = self.answer_challenge(&request, response).await?;
        }

        Self::into_transport_response(response, &request.operation).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for unit tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: Method,
        pub url: Url,
        pub headers: HeaderMap,
        pub body: Option<Vec<u8>>,
    }

    impl RecordedRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|v| v.to_str().ok())
        }

        pub fn query(&self, key: &str) -> Option<String> {
            self.url
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        }
    }

    enum Scripted {
        Response(StatusCode, HeaderMap, Bytes),
        Error(RegistryError),
    }

    #[derive(Default)]
    pub struct MockTransport {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, status: u16, headers: &[(&str, &str)], body: &[u8]) -> &Self {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.insert(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_str(value).unwrap(),
                );
            }
            self.script.lock().unwrap().push_back(Scripted::Response(
                StatusCode::from_u16(status).unwrap(),
                map,
                Bytes::copy_from_slice(body),
            ));
            self
        }

        pub fn fail(&self, error: RegistryError) -> &Self {
            self.script.lock().unwrap().push_back(Scripted::Error(error));
            self
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
            let body = match &request.body {
                Some(body) => {
                    let opened = body.open().await?;
                    Some(opened.as_bytes().map(|b| b.to_vec()).unwrap_or_default())
                }
                None => None,
            };
            self.requests.lock().unwrap().push(RecordedRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body,
            });

            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response for {} {}", request.method, request.url));

            match next {
                Scripted::Error(error) => Err(error),
                Scripted::Response(status, _, body) if !HttpErrorHandler::is_success(status) => {
                    Err(HttpErrorHandler::status_error(
                        status,
                        &String::from_utf8_lossy(&body),
                        &request.operation,
                    ))
                }
                Scripted::Response(status, headers, body) => {
                    Ok(TransportResponse::from_bytes(status, headers, body))
                }
            }
        }
    }
}

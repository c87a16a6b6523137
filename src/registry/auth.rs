//! Answers to registry authentication challenges
//!
//! When a request comes back `401 Unauthorized`, the transport hands the parsed
//! `WWW-Authenticate` challenge to an [`Authenticator`] and resends the request
//! with the `Authorization` value it returns. [`CredentialAuthenticator`]
//! implements the usual Docker flow:
//! 1. `Basic` challenges are answered directly from the configured credentials
//! 2. `Bearer` challenges are exchanged for a token at the challenge's realm

use crate::config::AuthConfig;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: Option<String>,
    },
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parse `Bearer realm="...",service="...",scope="..."` or `Basic realm="..."`
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        let params = parse_auth_params(params);

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Ok(Challenge::Basic {
                realm: params.get("realm").cloned(),
            }),
            "bearer" => {
                let realm = params.get("realm").cloned().ok_or_else(|| {
                    RegistryError::Auth("Bearer challenge missing realm parameter".to_string())
                })?;
                Ok(Challenge::Bearer {
                    realm,
                    service: params.get("service").cloned(),
                    scope: params.get("scope").cloned(),
                })
            }
            other => Err(RegistryError::Auth(format!(
                "Unsupported authentication scheme: {}",
                other
            ))),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Challenge::Basic { .. } => "Basic",
            Challenge::Bearer { .. } => "Bearer",
        }
    }
}

/// Split `key="value", key2=value2` into a map. Commas inside quotes are kept,
/// since scopes such as `repository:app:pull,push` contain them.
fn parse_auth_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.trim().is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

/// Produces an `Authorization` header value for a challenge
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorize(&self, challenge: &Challenge) -> Result<HeaderValue>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Authenticator backed by optional username/password credentials
pub struct CredentialAuthenticator {
    client: Client,
    auth: AuthConfig,
    output: Logger,
}

impl CredentialAuthenticator {
    pub fn new(client: Client, auth: AuthConfig, output: Logger) -> Self {
        Self {
            client,
            auth,
            output,
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.auth.username, &self.auth.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    fn basic_header(username: &str, password: &str) -> Result<HeaderValue> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
        header_value(format!("Basic {}", encoded))
    }

    async fn request_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(realm)
            .map_err(|e| RegistryError::Auth(format!("Invalid token realm {}: {}", realm, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }

        self.output.detail(&format!("registry.auth.token url={}", url));

        let mut request = self.client.get(url);
        if let Some((username, password)) = self.credentials() {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(RegistryError::Auth(format!(
                "Token request failed with status {}: {}",
                status,
                error_text.trim()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Auth(format!("Failed to parse token response: {}", e)))?;

        if let Some(expires_in) = token_response.expires_in {
            self.output
                .detail(&format!("Token expires in {} seconds", expires_in));
        }

        token_response
            .token
            .or(token_response.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RegistryError::Auth("Token response contained no token".to_string()))
    }
}

#[async_trait]
impl Authenticator for CredentialAuthenticator {
    async fn authorize(&self, challenge: &Challenge) -> Result<HeaderValue> {
        match challenge {
            Challenge::Basic { .. } => {
                let (username, password) = self.credentials().ok_or_else(|| {
                    RegistryError::Auth(
                        "Registry requires basic authentication but no credentials are configured"
                            .to_string(),
                    )
                })?;
                Self::basic_header(username, password)
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let token = self
                    .request_token(realm, service.as_deref(), scope.as_deref())
                    .await?;
                header_value(format!("Bearer {}", token))
            }
        }
    }
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::from_str(&value)
        .map_err(|e| RegistryError::Auth(format!("Invalid authorization value: {}", e)))
}

//! Box API Connection Management
//!
//! This module wraps the HTTP client used to talk to the Box API. A connection
//! owns the base URL and the bearer token, applies the network timeout to each
//! request, and turns non-2xx responses into typed errors.

use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{map_status_to_error, BoxError, Result};

/// Content type required by the metadata instance update endpoint
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Represents an authenticated HTTP session with the Box API
///
/// The underlying `reqwest::Client` keeps its own connection pool, so a single
/// `Connection` is shared by every operation of a client.
pub struct Connection {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    network_timeout: Duration,
}

impl Connection {
    /// Creates a new connection for the given API base URL and token
    pub fn new(base_url: &str, access_token: &str, network_timeout_ms: u64) -> Result<Self> {
        let network_timeout = Duration::from_millis(network_timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(network_timeout)
            .build()
            .map_err(|e| BoxError::Network {
                operation: "build client".to_string(),
                source: e,
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            network_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends a GET request and returns the decoded JSON body
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.http.get(self.url(path)).query(query);
        self.send("GET", path, request).await
    }

    /// Sends a POST request with a JSON body
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let request = self.http.post(self.url(path)).json(body);
        self.send("POST", path, request).await
    }

    /// Sends a PUT request with a JSON-Patch body
    pub async fn put_patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let payload = serde_json::to_vec(body)?;
        let request = self
            .http
            .put(self.url(path))
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(payload);
        self.send("PUT", path, request).await
    }

    /// Executes a request and maps the response
    ///
    /// The timeout applies to the whole exchange, body included.
    async fn send(&self, method: &str, path: &str, request: RequestBuilder) -> Result<Value> {
        let operation = format!("{} {}", method, path);
        debug!(%operation, "sending request");

        let exchange = async {
            let response = request
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| network_error(&operation, e))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| network_error(&operation, e))?;
            Ok::<_, BoxError>((status, body))
        };

        let (status, body) = match timeout(self.network_timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(BoxError::Timeout(operation)),
        };

        debug!(%operation, status, "received response");

        if let Some(err) = map_status_to_error(status, &body) {
            return Err(err);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            BoxError::InvalidResponse(format!("{} returned malformed JSON: {}", operation, e))
        })
    }
}

fn network_error(operation: &str, source: reqwest::Error) -> BoxError {
    if source.is_timeout() {
        BoxError::Timeout(operation.to_string())
    } else {
        BoxError::Network {
            operation: operation.to_string(),
            source,
        }
    }
}

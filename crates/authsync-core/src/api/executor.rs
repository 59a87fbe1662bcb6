//! Transport for `RequestSpec` values.
//!
//! `RequestExecutor` is the seam between the session core and the network.
//! `HttpExecutor` is the production implementation on top of reqwest.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, warn};

use super::request::{Method, RequestSpec, Response};
use super::ApiError;
use crate::config::Config;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Performs one request and reports the outcome.
///
/// Implementations must treat the spec as read-only so the same value can be
/// dispatched again with a different authorization header.
pub trait RequestExecutor: Send + Sync {
    fn execute<'a>(&'a self, spec: &'a RequestSpec) -> BoxFuture<'a, Result<Response, ApiError>>;
}

/// reqwest-backed executor resolving spec paths against a base URL.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self, spec: &RequestSpec) -> Result<reqwest::RequestBuilder, ApiError> {
        let url = self.url(&spec.path);
        let mut builder = match spec.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };

        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        for (name, value) in &spec.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        builder = builder.headers(headers);

        if let Some(ref body) = spec.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<Response, ApiError> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("status {}: {}", status, e)))?
        };
        Ok(Response::new(status, body))
    }

    async fn send(&self, spec: &RequestSpec) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.build(spec)?.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    debug!(method = ?spec.method, path = %spec.path, "Request succeeded");
                    return Self::read_body(response).await;
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::from_status(429, "rate limited"));
                    }
                    warn!(path = %spec.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

impl RequestExecutor for HttpExecutor {
    fn execute<'a>(&'a self, spec: &'a RequestSpec) -> BoxFuture<'a, Result<Response, ApiError>> {
        Box::pin(self.send(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> HttpExecutor {
        let config = Config {
            base_url: "http://localhost:3333/".to_string(),
            ..Config::default()
        };
        HttpExecutor::new(&config).unwrap()
    }

    #[test]
    fn test_url_joining() {
        let executor = executor();
        assert_eq!(executor.url("/me"), "http://localhost:3333/me");
        assert_eq!(executor.url("sessions"), "http://localhost:3333/sessions");
        assert_eq!(executor.url("https://other.example/x"), "https://other.example/x");
    }

    #[test]
    fn test_build_carries_headers_and_body() {
        let spec = RequestSpec::post("/refresh", json!({"refreshToken": "R1"})).with_bearer("A1");
        let request = executor().build(&spec).unwrap().build().unwrap();

        assert_eq!(*request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "http://localhost:3333/refresh");
        assert_eq!(
            request.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer A1"
        );
        assert!(request.body().is_some());
    }

    #[test]
    fn test_build_rejects_invalid_header() {
        let spec = RequestSpec::get("/me").with_header("x-bad", "line\nbreak");
        assert!(matches!(
            executor().build(&spec),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let config = Config {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..Config::default()
        };
        let executor = HttpExecutor::new(&config).unwrap();
        let err = executor.execute(&RequestSpec::get("/me")).await.unwrap_err();
        assert_eq!(err.status(), None);
    }
}

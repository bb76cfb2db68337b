//! Credentialed request execution with retries and error classification.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::core::credential::Credential;
use crate::core::error::{Error, HttpResponse, Result, ServiceError};
use crate::core::error_handler::ErrorHandler;
use crate::core::middleware::AuthMiddleware;
use crate::core::retry::{RetryOptions, RetryPolicy};

pub const CLIENT_VERSION_HEADER: &str = "x-client-version";
pub const CLIENT_VERSION: &str = concat!("Rust/Admin/", env!("CARGO_PKG_VERSION"));

/// Builds the authenticated transport shared by all service clients.
pub fn build_transport(
    credential: Arc<dyn Credential>,
    timeout: Duration,
) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

    Ok(ClientBuilder::new(client)
        .with(AuthMiddleware::new(credential))
        .build())
}

/// Describes one logical call. The body is kept as [`Bytes`] so that every
/// retry sends the same content.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl ApiRequest {
    /// `url` is either absolute or relative to the client's base URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serializes `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::invalid_argument(format!("Failed to serialize request: {}", e)))?;
        Ok(self.body(
            HeaderValue::from_static("application/json"),
            bytes,
        ))
    }

    pub fn body(mut self, content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
        self.headers.insert(header::CONTENT_TYPE, content_type);
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

enum AttemptOutcome {
    Success(HttpResponse),
    Failure {
        error: ServiceError,
        retry_after: Option<Duration>,
    },
}

/// Executes [`ApiRequest`]s for one service.
///
/// Each call runs attempts strictly one after another: the bearer token is
/// fetched, the request is sent, and failures are classified with the
/// service's [`ErrorHandler`]. Transient failures are retried according to
/// the [`RetryPolicy`]; everything else is returned on first occurrence.
#[derive(Clone)]
pub struct HttpClient {
    transport: ClientWithMiddleware,
    base_url: Option<String>,
    retry: RetryPolicy,
    errors: ErrorHandler,
}

impl HttpClient {
    pub fn new(transport: ClientWithMiddleware, errors: ErrorHandler) -> Self {
        Self {
            transport,
            base_url: None,
            retry: RetryPolicy::new(RetryOptions::default()),
            errors,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_retry_options(mut self, options: RetryOptions) -> Self {
        self.retry = RetryPolicy::new(options);
        self
    }

    pub fn with_error_handler(mut self, errors: ErrorHandler) -> Self {
        self.errors = errors;
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn retry_options(&self) -> &RetryOptions {
        self.retry.options()
    }

    /// Sends the request and decodes a 2xx body as `T`.
    ///
    /// A body that does not decode is reported as an
    /// [`ErrorKind::Unknown`](crate::core::error::ErrorKind::Unknown) service
    /// error and is never retried.
    pub async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.send(request, cancel).await?;
        match serde_json::from_str(&response.body) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.errors.classify_deserialization_error(err, response).into()),
        }
    }

    /// Sends the request, retrying transient failures, and returns the 2xx response.
    pub async fn send(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let (error, retry_after) = match self.attempt(request, attempt, cancel).await? {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Failure { error, retry_after } => (error, retry_after),
            };

            if !self.retry.should_retry(attempt, error.kind()) {
                return Err(error.into());
            }

            let delay = self.retry.delay_with_hint(attempt, retry_after);
            warn!(
                attempt = attempt + 1,
                kind = ?error.kind(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        let req = self.build_request(request)?;
        debug!(
            attempt = attempt + 1,
            method = %req.method(),
            url = %req.url(),
            "sending request"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.transport.execute(req) => result,
        };
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                return Ok(AttemptOutcome::Failure {
                    error: self.errors.classify_transport_error(err),
                    retry_after: None,
                })
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.text() => body,
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                return Ok(AttemptOutcome::Failure {
                    error: self.errors.classify_transport_error(err.into()),
                    retry_after: None,
                })
            }
        };
        debug!(attempt = attempt + 1, %status, "received response");

        let response = HttpResponse {
            status,
            headers,
            body,
        };
        if status.is_success() {
            return Ok(AttemptOutcome::Success(response));
        }

        let retry_after = retry_after(&response.headers);
        Ok(AttemptOutcome::Failure {
            error: self.errors.classify_http_error(response),
            retry_after,
        })
    }

    fn build_request(&self, request: &ApiRequest) -> Result<reqwest::Request> {
        let url = self.resolve_url(request)?;
        let mut req = reqwest::Request::new(request.method.clone(), url);
        *req.headers_mut() = request.headers.clone();
        req.headers_mut().insert(
            HeaderName::from_static(CLIENT_VERSION_HEADER),
            HeaderValue::from_static(CLIENT_VERSION),
        );
        if let Some(body) = &request.body {
            *req.body_mut() = Some(reqwest::Body::from(body.clone()));
        }
        Ok(req)
    }

    fn resolve_url(&self, request: &ApiRequest) -> Result<Url> {
        let raw = if request.url.starts_with("http://") || request.url.starts_with("https://") {
            request.url.clone()
        } else {
            let base = self.base_url.as_deref().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "relative URL '{}' used without a base URL",
                    request.url
                ))
            })?;
            let path = request.url.trim_start_matches('/');
            if path.is_empty() {
                base.to_string()
            } else {
                format!("{}/{}", base.trim_end_matches('/'), path)
            }
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| Error::invalid_argument(format!("invalid URL '{}': {}", raw, e)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

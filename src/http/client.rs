//! Retrying HTTP client.
//!
//! [`HttpClient`] executes one logical request, retrying transient failures
//! according to its [`RetryPolicy`]. The body is read inside each attempt, so
//! a connection dropped mid-body counts as a failed attempt and is retried
//! like any other network fault.
//!
//! [`HttpClient::execute`] buffers the body in memory and suits small JSON
//! and image responses. [`HttpClient::stream_to`] hands each chunk to a
//! [`BodySink`] as it arrives, so large payloads never sit in memory whole.
//!
//! The client knows nothing about credentials or work items; callers attach
//! whatever headers and body they need to an [`HttpRequest`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, RETRY_AFTER};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::{ClientBuildError, HttpError};
use super::retry::{FailureType, RetryDecision, RetryPolicy, parse_retry_after};

/// A single outbound request description, cheap to replay across attempts.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: String,
    bearer: Option<String>,
    json: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            json: None,
        }
    }

    /// Attaches an `Authorization: Bearer` header.
    #[must_use]
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A successful (2xx) response with its fully read body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    url: String,
    status: u16,
    body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the URL the response was fetched from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the response, returning the body bytes.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Destination for a streamed response body.
///
/// The sink may see several attempts: [`BodySink::reset`] runs before the
/// body of every attempt, so a retry after a broken stream starts over from
/// an empty destination.
#[async_trait]
pub trait BodySink: Send {
    /// Error raised by the sink. Sink errors are never retried.
    type Error: Send;

    /// Discards whatever a previous attempt wrote.
    async fn reset(&mut self) -> Result<(), Self::Error>;

    /// Appends one body chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;
}

/// Failure of [`HttpClient::stream_to`].
#[derive(Debug)]
pub enum StreamError<E> {
    /// The request failed; retries, if any, are exhausted.
    Http(HttpError),
    /// The sink rejected a write.
    Sink(E),
}

impl<E> From<HttpError> for StreamError<E> {
    fn from(error: HttpError) -> Self {
        Self::Http(error)
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    request_timeout: Duration,
    referer: Option<String>,
}

impl HttpClientBuilder {
    /// Sets the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the whole-request timeout (per attempt).
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sends a fixed `Referer` header with every request.
    #[must_use]
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError::InvalidHeader`] when the referer is not a
    /// valid header value, or [`ClientBuildError::Backend`] when the TLS
    /// backend cannot be initialized.
    pub fn build(self) -> Result<HttpClient, ClientBuildError> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = self.referer.as_deref() {
            let value =
                HeaderValue::from_str(referer).map_err(|_| ClientBuildError::InvalidHeader {
                    name: "Referer",
                    value: referer.to_string(),
                })?;
            headers.insert(REFERER, value);
        }

        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()?;

        debug!(
            max_attempts = self.retry_policy.max_attempts(),
            connect_timeout_ms = self.connect_timeout.as_millis(),
            request_timeout_ms = self.request_timeout.as_millis(),
            "built HTTP client"
        );

        Ok(HttpClient {
            client,
            retry_policy: self.retry_policy,
        })
    }
}

/// HTTP client with a retry policy attached.
///
/// Designed to be created once and cloned into every pipeline; clones share
/// the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry_policy: RetryPolicy,
}

impl HttpClient {
    /// Starts building a client with the given retry policy and default timeouts
    /// (30s connect, 5min request).
    #[must_use]
    pub fn builder(retry_policy: RetryPolicy) -> HttpClientBuilder {
        HttpClientBuilder {
            retry_policy,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            referer: None,
        }
    }

    /// Creates a client with default timeouts and the given retry policy.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self::builder(retry_policy)
            .build()
            .expect("failed to build HTTP client with static configuration")
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Executes a request, retrying transient failures.
    ///
    /// Retry state (attempt counter, last error, next delay) lives only for
    /// the duration of this call.
    ///
    /// # Errors
    ///
    /// Returns the last observed [`HttpError`] once the failure is permanent
    /// or the attempt ceiling is reached.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "sending request");

            let error = match self.attempt_once(request).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            match self.next_delay(&error, attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(error),
            }
        }
    }

    /// Executes a request, streaming the body into `sink` chunk by chunk.
    ///
    /// Retries follow the same policy as [`HttpClient::execute`]; the sink is
    /// reset before every attempt's body. Returns the number of body bytes
    /// written by the successful attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Http`] with the last observed error once retries
    /// are exhausted, or [`StreamError::Sink`] as soon as the sink fails.
    #[instrument(skip(self, request, sink), fields(method = %request.method, url = %request.url))]
    pub async fn stream_to<S>(
        &self,
        request: &HttpRequest,
        sink: &mut S,
    ) -> Result<u64, StreamError<S::Error>>
    where
        S: BodySink + ?Sized,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "sending streamed request");

            let error = match self.stream_once(request, &mut *sink).await {
                Ok(written) => return Ok(written),
                Err(StreamError::Sink(error)) => return Err(StreamError::Sink(error)),
                Err(StreamError::Http(error)) => error,
            };

            match self.next_delay(&error, attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(StreamError::Http(error)),
            }
        }
    }

    /// Decides whether `error` on attempt `attempt` earns another attempt,
    /// and after how long.
    fn next_delay(&self, error: &HttpError, attempt: u32) -> Option<Duration> {
        let failure_type = self.retry_policy.classify(error);
        let retry_after = if failure_type == FailureType::RateLimited {
            retry_after_delay(error)
        } else {
            None
        };

        match self.retry_policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay: backoff_delay,
                attempt: next_attempt,
            } => {
                let delay = self.retry_policy.retry_delay(backoff_delay, retry_after);
                info!(
                    attempt = next_attempt,
                    max_attempts = self.retry_policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = retry_after.is_some(),
                    error = %error,
                    "retrying request"
                );
                Some(delay)
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(attempts = attempt, %reason, error = %error, "not retrying request");
                None
            }
        }
    }

    /// Sends the request and checks the status, leaving the body unread.
    async fn send(&self, request: &HttpRequest) -> Result<reqwest::Response, HttpError> {
        let url = request.url.as_str();
        Url::parse(url).map_err(|_| HttpError::invalid_url(url))?;

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| map_transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(HttpError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Performs one buffered attempt: send, check status, read the body.
    async fn attempt_once(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url.as_str();
        let response = self.send(request).await?;
        let status = response.status().as_u16();

        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_transport_error(url, e))?;
            body.extend_from_slice(&chunk);
        }

        debug!(status, bytes = body.len(), "response received");

        Ok(HttpResponse {
            url: url.to_string(),
            status,
            body,
        })
    }

    /// Performs one streamed attempt, writing each chunk to `sink` as it arrives.
    async fn stream_once<S>(
        &self,
        request: &HttpRequest,
        sink: &mut S,
    ) -> Result<u64, StreamError<S::Error>>
    where
        S: BodySink + ?Sized,
    {
        let url = request.url.as_str();
        let response = self.send(request).await?;
        sink.reset().await.map_err(StreamError::Sink)?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_transport_error(url, e))?;
            sink.write_chunk(&chunk).await.map_err(StreamError::Sink)?;
            written += chunk.len() as u64;
        }

        debug!(bytes = written, "response streamed");
        Ok(written)
    }
}

fn map_transport_error(url: &str, error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::timeout(url)
    } else {
        HttpError::network(url, error)
    }
}

fn retry_after_delay(error: &HttpError) -> Option<Duration> {
    match error {
        HttpError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_sets_fields() {
        let request = HttpRequest::post("https://api.example.com/music")
            .bearer_auth("abc")
            .json(serde_json::json!({"type": "song"}));
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url(), "https://api.example.com/music");
        assert_eq!(request.bearer.as_deref(), Some("abc"));
        assert!(request.json.is_some());
    }

    #[test]
    fn test_response_json_decodes_body() {
        let response = HttpResponse {
            url: "http://x".to_string(),
            status: 200,
            body: br#"{"token":"t1"}"#.to_vec(),
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["token"], "t1");
    }

    #[test]
    fn test_retry_after_delay_only_for_status_errors() {
        let error = HttpError::http_status_with_retry_after("http://x", 429, Some("2".into()));
        assert_eq!(retry_after_delay(&error), Some(Duration::from_secs(2)));
        assert_eq!(retry_after_delay(&HttpError::timeout("http://x")), None);
    }

    #[test]
    fn test_builder_rejects_invalid_referer() {
        let result = HttpClient::builder(RetryPolicy::default())
            .referer("https://example.com/\nX-Injected: 1")
            .build();
        assert!(matches!(
            result,
            Err(ClientBuildError::InvalidHeader { name: "Referer", .. })
        ));
    }

    #[test]
    fn test_builder_accepts_valid_referer() {
        let result = HttpClient::builder(RetryPolicy::default())
            .referer("https://api.example.com/page.html")
            .build();
        assert!(result.is_ok());
    }

    /// Collects chunks in memory, counting resets.
    #[derive(Default)]
    struct VecSink {
        data: Vec<u8>,
        resets: usize,
    }

    #[async_trait]
    impl BodySink for VecSink {
        type Error = std::convert::Infallible;

        async fn reset(&mut self) -> Result<(), Self::Error> {
            self.data.clear();
            self.resets += 1;
            Ok(())
        }

        async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
            self.data.extend_from_slice(chunk);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stream_to_rejects_invalid_url_without_touching_sink() {
        let client = HttpClient::new(RetryPolicy::with_max_attempts(3));
        let mut sink = VecSink::default();
        let result = client.stream_to(&HttpRequest::get("not a url"), &mut sink).await;
        assert!(matches!(result, Err(StreamError::Http(HttpError::InvalidUrl { .. }))));
        assert_eq!(sink.resets, 0);
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_url_without_retry() {
        let client = HttpClient::new(RetryPolicy::with_max_attempts(3));
        let result = client.execute(&HttpRequest::get("not a url")).await;
        assert!(matches!(result, Err(HttpError::InvalidUrl { .. })));
    }
}

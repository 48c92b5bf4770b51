//! Retrying HTTP request executor.
//!
//! # Features
//!
//! - Bounded retry with constant or exponential backoff and optional jitter
//! - Configurable set of retryable HTTP statuses (429 and 5xx by default)
//! - `Retry-After` support for rate-limited responses
//! - Streamed response bodies; a broken stream is a retryable network fault
//! - Chunk-by-chunk delivery into a [`BodySink`] for large payloads
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use songfetch_core::http::{HttpClient, HttpRequest, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(RetryPolicy::default());
//! let response = client.execute(&HttpRequest::get("https://example.com/song.flac")).await?;
//! println!("fetched {} bytes", response.body().len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod retry;

pub use client::{BodySink, HttpClient, HttpClientBuilder, HttpRequest, HttpResponse, StreamError};
pub use constants::{BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
pub use error::{ClientBuildError, HttpError};
pub use retry::{
    Backoff, DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_WAIT,
    DEFAULT_RETRYABLE_STATUSES, FailureType, RetryDecision, RetryPolicy, parse_retry_after,
};

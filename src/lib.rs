//! songfetch core library
//!
//! Concurrent song acquisition against an unreliable remote music service:
//! a batch of song ids is fanned out under bounded parallelism, each item
//! resolves a shared access credential, fetches metadata and the audio payload
//! with automatic retry, and is handed to storage. Every item ends with exactly
//! one outcome in the batch report.
//!
//! # Architecture
//!
//! - [`http`] - retrying HTTP executor with backoff
//! - [`credential`] - shared credential with serialized refresh
//! - [`limiter`] - admission control bounding parallel pipelines
//! - [`pipeline`] - per-item workflow and outcome types
//! - [`batch`] - batch fan-out and result aggregation
//! - [`remote`] - typed client for the credential and metadata endpoints
//! - [`storage`] - song store and tagging collaborators
//! - [`input`] - song-id extraction from free-form text
//! - [`config`] - runtime settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod credential;
pub mod http;
pub mod input;
pub mod limiter;
pub mod pipeline;
pub mod remote;
pub mod storage;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchReport};
pub use config::{Settings, SettingsError};
pub use credential::{Credential, CredentialError, CredentialManager, CredentialSource};
pub use http::{HttpClient, HttpError, HttpRequest, RetryPolicy};
pub use input::extract_song_ids;
pub use limiter::{Admission, ConcurrencyLimiter, DEFAULT_CONCURRENCY, LimiterError};
pub use pipeline::{AcquiredSong, FailureKind, ItemFailure, ItemOutcome, ItemPipeline, WorkItem};
pub use remote::{MetadataApi, SongMetadata, TokenEndpoint};
pub use storage::{FileStore, PayloadWriter, SidecarTagger, SongStore, Tagger, TrackTags};

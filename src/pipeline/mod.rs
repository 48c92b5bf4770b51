//! Per-item acquisition workflow.
//!
//! [`ItemPipeline::process`] takes one [`WorkItem`] from id to stored song:
//!
//! 1. obtain the shared credential
//! 2. resolve metadata (invalidating the credential if the service rejects it)
//! 3. skip the download when the artifact already exists
//! 4. stream the payload into storage, committing it only when complete
//! 5. best-effort cover art and tagging
//!
//! Every failure is folded into an [`ItemOutcome`]; nothing escapes as an
//! error, so one bad item never takes down a batch.

mod outcome;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::credential::{CredentialError, CredentialManager};
use crate::http::{ClientBuildError, HttpClient, HttpError, HttpRequest, StreamError};
use crate::remote::{MetadataApi, MetadataError, SongMetadata, TokenEndpoint};
use crate::storage::{
    CoverArt, FileStore, SidecarTagger, SongStore, StorageError, Tagger, TrackTags,
    extension_from_url,
};

pub use outcome::{AcquiredSong, FailureKind, ItemFailure, ItemOutcome, WorkItem};

const DEFAULT_COVER_EXTENSION: &str = "jpg";

/// Internal failure type of one pipeline run, mapped to [`ItemOutcome`].
#[derive(Debug, Error)]
enum PipelineError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("no playable payload URL for song {id}")]
    NoPayload { id: String },

    #[error("payload download failed: {source}")]
    Download {
        #[source]
        source: HttpError,
        network: bool,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    fn kind(&self) -> FailureKind {
        match self {
            Self::Credential(_)
            | Self::Metadata(MetadataError::InvalidCredential { .. }) => FailureKind::Credential,
            Self::Metadata(MetadataError::Unavailable { .. })
            | Self::Download { network: true, .. } => FailureKind::Network,
            Self::Metadata(MetadataError::Rejected { .. })
            | Self::NoPayload { .. }
            | Self::Download { network: false, .. } => FailureKind::Remote,
            Self::Storage(_) => FailureKind::Storage,
        }
    }
}

/// Runs the acquisition workflow for single items.
///
/// Cheap to share: wrap it in an [`Arc`] and hand it to every task.
pub struct ItemPipeline {
    credentials: Arc<CredentialManager>,
    http: HttpClient,
    metadata: MetadataApi,
    store: Arc<dyn SongStore>,
    tagger: Arc<dyn Tagger>,
}

impl std::fmt::Debug for ItemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPipeline")
            .field("credentials", &self.credentials)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl ItemPipeline {
    /// Assembles a pipeline from its collaborators.
    pub fn new(
        credentials: Arc<CredentialManager>,
        http: HttpClient,
        metadata: MetadataApi,
        store: Arc<dyn SongStore>,
        tagger: Arc<dyn Tagger>,
    ) -> Self {
        Self {
            credentials,
            http,
            metadata,
            store,
            tagger,
        }
    }

    /// Wires the production collaborators described by `settings`: the remote
    /// token and metadata endpoints, a [`FileStore`] under the output
    /// directory, and a [`SidecarTagger`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, ClientBuildError> {
        let mut builder = HttpClient::builder(settings.retry_policy())
            .connect_timeout(settings.connect_timeout)
            .request_timeout(settings.request_timeout);
        if let Some(referer) = &settings.referer {
            builder = builder.referer(referer);
        }
        let http = builder.build()?;

        let credentials = Arc::new(CredentialManager::new(Arc::new(TokenEndpoint::new(
            http.clone(),
            &settings.token_url,
        ))));
        let metadata = MetadataApi::new(http.clone(), &settings.metadata_url, &settings.level);

        Ok(Self::new(
            credentials,
            http,
            metadata,
            Arc::new(FileStore::new(&settings.output_dir)),
            Arc::new(SidecarTagger::new()),
        ))
    }

    /// Returns the shared credential manager.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Processes one item to a terminal outcome.
    #[instrument(skip(self), fields(item = %item))]
    pub async fn process(&self, item: &WorkItem) -> ItemOutcome {
        match self.acquire(item).await {
            Ok(song) => {
                info!(
                    title = %song.title,
                    path = %song.path.display(),
                    bytes = song.bytes,
                    skipped = song.skipped,
                    "item complete"
                );
                ItemOutcome::Success(song)
            }
            Err(error) => {
                let kind = error.kind();
                warn!(%kind, error = %error, "item failed");
                ItemOutcome::failure(kind, error.to_string())
            }
        }
    }

    async fn acquire(&self, item: &WorkItem) -> Result<AcquiredSong, PipelineError> {
        let credential = self.credentials.get_credential().await?;

        let metadata = match self.metadata.fetch(item.as_str(), credential.token()).await {
            Ok(metadata) => metadata,
            Err(error @ MetadataError::InvalidCredential { .. }) => {
                // No retry here: the next item fetches a fresh credential.
                self.credentials.invalidate().await;
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        let Some(payload_url) = metadata.payload_url.as_deref() else {
            return Err(PipelineError::NoPayload {
                id: item.to_string(),
            });
        };

        let path = self.store.destination(&metadata);
        if self.store.exists(&path).await {
            debug!(path = %path.display(), "artifact already present, skipping download");
            return Ok(acquired(&metadata, &path, 0, true));
        }

        let mut writer = self.store.begin(&path).await?;
        let bytes = match self
            .http
            .stream_to(&HttpRequest::get(payload_url), writer.as_mut())
            .await
        {
            Ok(bytes) => bytes,
            Err(error) => {
                writer.discard().await;
                return Err(match error {
                    StreamError::Http(source) => PipelineError::Download {
                        network: self.http.retry_policy().is_network_failure(&source),
                        source,
                    },
                    StreamError::Sink(error) => PipelineError::Storage(error),
                });
            }
        };
        writer.commit().await?;

        self.tag(&path, &metadata).await;

        Ok(acquired(&metadata, &path, bytes, false))
    }

    /// Cover download and tag embedding. Failures are logged, never fatal.
    async fn tag(&self, path: &Path, metadata: &SongMetadata) {
        let cover = match &metadata.cover_url {
            Some(url) => self.fetch_cover(url).await,
            None => None,
        };

        let tags = TrackTags {
            title: metadata.title.clone(),
            artist: metadata.artist.clone(),
            album: metadata.album.clone(),
            cover,
            lyrics: metadata.lyrics.clone(),
        };

        if let Err(error) = self.tagger.embed(path, &tags).await {
            warn!(error = %error, "tagging failed");
        }
    }

    async fn fetch_cover(&self, url: &str) -> Option<CoverArt> {
        match self.http.execute(&HttpRequest::get(url)).await {
            Ok(response) => Some(CoverArt {
                extension: extension_from_url(url)
                    .unwrap_or_else(|| DEFAULT_COVER_EXTENSION.to_string()),
                data: response.into_body(),
            }),
            Err(error) => {
                warn!(error = %error, "cover download failed");
                None
            }
        }
    }
}

fn acquired(metadata: &SongMetadata, path: &Path, bytes: u64, skipped: bool) -> AcquiredSong {
    AcquiredSong {
        title: metadata.title.clone(),
        artist: metadata.artist.clone(),
        album: metadata.album.clone(),
        path: path.to_path_buf(),
        bytes,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_kinds() {
        let cases = [
            (
                PipelineError::Credential(CredentialError::request("down")),
                FailureKind::Credential,
            ),
            (
                PipelineError::Metadata(MetadataError::InvalidCredential {
                    reason: "bad token".into(),
                }),
                FailureKind::Credential,
            ),
            (
                PipelineError::Metadata(MetadataError::Unavailable {
                    source: HttpError::timeout("http://x"),
                }),
                FailureKind::Network,
            ),
            (
                PipelineError::Metadata(MetadataError::Rejected {
                    reason: "nope".into(),
                }),
                FailureKind::Remote,
            ),
            (PipelineError::NoPayload { id: "1".into() }, FailureKind::Remote),
            (
                PipelineError::Download {
                    source: HttpError::http_status("http://x", 404),
                    network: false,
                },
                FailureKind::Remote,
            ),
            (
                PipelineError::Download {
                    source: HttpError::timeout("http://x"),
                    network: true,
                },
                FailureKind::Network,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "{error}");
        }
    }
}

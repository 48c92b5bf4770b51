//! Typed access to the remote music service.
//!
//! Two endpoints are involved: a credential endpoint that hands out tokens
//! ([`TokenEndpoint`], plugged into the credential manager as a
//! [`CredentialSource`]) and a metadata endpoint that resolves a song id into
//! track information and a payload URL ([`MetadataApi`]).

mod dto;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::credential::{CredentialError, CredentialSource};
use crate::http::{HttpClient, HttpError, HttpRequest};
use dto::{MetadataResponse, TokenResponse};

/// Default quality level requested from the metadata endpoint.
pub const DEFAULT_LEVEL: &str = "hires";

const SONG_PAGE_URL: &str = "https://music.163.com/song?id=";

/// Placeholder used when the service omits the track title.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Placeholder used when the service omits the artist.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Placeholder used when the service omits the album.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

const DEFAULT_FORMAT: &str = "mp3";

/// Track information resolved for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    /// Remote song id.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Artist line as given by the service (may list several, `/`-separated).
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Cover-art URL, when the service provided one.
    pub cover_url: Option<String>,
    /// Audio payload URL; `None` when the song is unavailable.
    pub payload_url: Option<String>,
    /// File extension of the payload (`mp3`, `flac`, ...).
    pub format: String,
    /// Lyrics text, when present.
    pub lyrics: Option<String>,
}

/// Why a metadata lookup did not produce metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The service rejected the credential.
    #[error("credential rejected by metadata service: {reason}")]
    InvalidCredential {
        /// Service message or status.
        reason: String,
    },

    /// The service answered, but with a rejection or an unusable body.
    #[error("metadata request rejected: {reason}")]
    Rejected {
        /// Service message or decode error.
        reason: String,
    },

    /// The service could not be reached within the retry budget.
    #[error("metadata service unavailable: {source}")]
    Unavailable {
        /// Last transport or retryable-status error.
        #[source]
        source: HttpError,
    },
}

/// Credential source that POSTs the remote token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: HttpClient,
    url: String,
}

impl TokenEndpoint {
    /// Creates a token source for `url`.
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for TokenEndpoint {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<String, CredentialError> {
        let response = self
            .client
            .execute(&HttpRequest::post(&self.url))
            .await
            .map_err(|e| CredentialError::request(e.to_string()))?;

        let body: TokenResponse = response
            .json()
            .map_err(|e| CredentialError::malformed(e.to_string()))?;

        match body.token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(CredentialError::malformed("response has no token")),
        }
    }
}

/// Client for the metadata endpoint.
#[derive(Debug, Clone)]
pub struct MetadataApi {
    client: HttpClient,
    url: String,
    level: String,
}

impl MetadataApi {
    /// Creates a metadata client requesting `level` quality.
    pub fn new(client: HttpClient, url: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            level: level.into(),
        }
    }

    /// Resolves one song id using `token`.
    ///
    /// # Errors
    ///
    /// See [`MetadataError`]: HTTP 401/403 and token-related service messages
    /// map to `InvalidCredential`; exhausted transport and retryable-status
    /// failures to `Unavailable`; everything else to `Rejected`.
    #[instrument(skip(self, token), fields(url = %self.url, level = %self.level))]
    pub async fn fetch(&self, id: &str, token: &str) -> Result<SongMetadata, MetadataError> {
        let request = HttpRequest::post(&self.url)
            .bearer_auth(token)
            .json(request_body(id, &self.level, token));

        let response = self
            .client
            .execute(&request)
            .await
            .map_err(|error| self.classify_http_error(error))?;

        let body: MetadataResponse =
            response.json().map_err(|e| MetadataError::Rejected {
                reason: format!("undecodable metadata response: {e}"),
            })?;

        if !body.is_success() {
            let reason = body
                .msg
                .clone()
                .unwrap_or_else(|| format!("status {}", body.status));
            if body.mentions_token() {
                return Err(MetadataError::InvalidCredential { reason });
            }
            return Err(MetadataError::Rejected { reason });
        }

        let metadata = into_metadata(id, body);
        debug!(
            title = %metadata.title,
            has_payload = metadata.payload_url.is_some(),
            "metadata resolved"
        );
        Ok(metadata)
    }

    fn classify_http_error(&self, error: HttpError) -> MetadataError {
        match error.status() {
            Some(401 | 403) => MetadataError::InvalidCredential {
                reason: error.to_string(),
            },
            _ if self.client.retry_policy().is_network_failure(&error) => {
                MetadataError::Unavailable { source: error }
            }
            _ => MetadataError::Rejected {
                reason: error.to_string(),
            },
        }
    }
}

fn request_body(id: &str, level: &str, token: &str) -> serde_json::Value {
    json!({
        "url": format!("{SONG_PAGE_URL}{id}"),
        "level": level,
        "type": "song",
        "token": format!("{:x}", md5::compute(token)),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn into_metadata(id: &str, body: MetadataResponse) -> SongMetadata {
    let info = body.song_info.unwrap_or_default();
    let url_info = body.url_info.unwrap_or_default();

    SongMetadata {
        id: id.to_string(),
        title: non_empty(info.name).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        artist: non_empty(info.artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        album: non_empty(info.album).unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        cover_url: non_empty(info.cover),
        payload_url: non_empty(url_info.url),
        format: non_empty(url_info.kind)
            .map(|kind| kind.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        lyrics: body.lrc.and_then(|lrc| non_empty(lrc.lyric)),
    }
}

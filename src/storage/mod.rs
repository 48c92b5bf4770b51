//! Storage and tagging collaborators.
//!
//! The pipeline streams payloads into a [`PayloadWriter`] obtained from a
//! [`SongStore`] and hands track tags to a [`Tagger`]. [`FileStore`] writes songs under an output directory;
//! [`SidecarTagger`] stores lyrics and cover art next to the audio file
//! instead of encoding them into format-specific tag frames.

mod filename;
mod sidecar;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use crate::http::BodySink;
use crate::remote::SongMetadata;

pub use filename::song_file_name;
pub(crate) use filename::extension_from_url;
pub use sidecar::SidecarTagger;

/// Errors raised while persisting a payload.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A filesystem operation failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// What was being attempted (`create directory`, `write`, ...).
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors raised while embedding tags.
#[derive(Debug, Error)]
#[error("failed to tag {path}: {reason}")]
pub struct TagError {
    /// Audio file being tagged.
    pub path: PathBuf,
    /// Description of the failure.
    pub reason: String,
}

/// Cover image bytes with their file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    /// Image data.
    pub data: Vec<u8>,
    /// Extension without the dot (`jpg`, `png`).
    pub extension: String,
}

/// Descriptive tags for one acquired song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    /// Track title.
    pub title: String,
    /// Artist line.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Cover art, when it could be downloaded.
    pub cover: Option<CoverArt>,
    /// Lyrics text.
    pub lyrics: Option<String>,
}

/// Where song payloads end up.
#[async_trait]
pub trait SongStore: Send + Sync {
    /// Path the payload for `metadata` is stored at.
    fn destination(&self, metadata: &SongMetadata) -> PathBuf;

    /// Returns true when an artifact already exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Opens a writer whose content lands at `path` once committed.
    /// A partially written payload is never visible at `path`.
    async fn begin(&self, path: &Path) -> Result<Box<dyn PayloadWriter>, StorageError>;
}

/// In-progress payload write. Receives body chunks as a [`BodySink`], then is
/// either committed to its final path or discarded.
#[async_trait]
pub trait PayloadWriter: BodySink<Error = StorageError> {
    /// Finishes the write and moves the payload to its final path.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Drops everything written so far.
    async fn discard(self: Box<Self>);
}

/// Attaches descriptive metadata to a stored song.
#[async_trait]
pub trait Tagger: Send + Sync {
    /// Embeds `tags` for the song stored at `path`.
    async fn embed(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError>;
}

/// Filesystem-backed [`SongStore`].
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store writing under `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SongStore for FileStore {
    fn destination(&self, metadata: &SongMetadata) -> PathBuf {
        self.root.join(song_file_name(metadata))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn begin(&self, path: &Path) -> Result<Box<dyn PayloadWriter>, StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("create directory", parent, e))?;
        }

        let temp_path = partial_path(path, PART_SEQ.fetch_add(1, Ordering::Relaxed));
        let file = File::create(&temp_path)
            .await
            .map_err(|e| StorageError::io("create", &temp_path, e))?;

        Ok(Box::new(PartFileWriter {
            path: path.to_path_buf(),
            temp_path,
            writer: BufWriter::new(file),
        }))
    }
}

/// Writes into `<name>.<seq>.part` and renames onto the final path on commit.
struct PartFileWriter {
    path: PathBuf,
    temp_path: PathBuf,
    writer: BufWriter<File>,
}

#[async_trait]
impl BodySink for PartFileWriter {
    type Error = StorageError;

    async fn reset(&mut self) -> Result<(), StorageError> {
        self.writer
            .flush()
            .await
            .map_err(|e| StorageError::io("write", &self.temp_path, e))?;
        let file = self.writer.get_mut();
        file.set_len(0)
            .await
            .map_err(|e| StorageError::io("truncate", &self.temp_path, e))?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| StorageError::io("truncate", &self.temp_path, e))?;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| StorageError::io("write", &self.temp_path, e))
    }
}

#[async_trait]
impl PayloadWriter for PartFileWriter {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Self {
            path,
            temp_path,
            mut writer,
        } = *self;

        let flushed = writer.flush().await;
        drop(writer);
        if let Err(e) = flushed {
            remove_partial(&temp_path).await;
            return Err(StorageError::io("write", &temp_path, e));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            remove_partial(&temp_path).await;
            return Err(StorageError::io("rename", &path, e));
        }

        debug!(path = %path.display(), "payload persisted");
        Ok(())
    }

    async fn discard(self: Box<Self>) {
        let Self {
            temp_path, writer, ..
        } = *self;
        drop(writer);
        remove_partial(&temp_path).await;
    }
}

async fn remove_partial(temp_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp_path).await {
        debug!(path = %temp_path.display(), error = %e, "could not remove partial file");
    }
}

/// Distinguishes concurrent writes aimed at the same destination.
static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<name>.<seq>.part` beside the final path.
fn partial_path(path: &Path, seq: u64) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(format!(".{seq}.part"));
    path.with_file_name(name)
}

//! Sidecar tagger: lyrics and cover art as files next to the song.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{TagError, Tagger, TrackTags};

/// Writes `<stem>.lrc` and `<stem>.cover.<ext>` beside the audio file.
///
/// Title, artist and album are already carried by the file name and the batch
/// report, so only lyrics and cover art produce files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarTagger;

impl SidecarTagger {
    /// Creates a sidecar tagger.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}

#[async_trait]
impl Tagger for SidecarTagger {
    async fn embed(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        let fail = |reason: String| TagError {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(lyrics) = &tags.lyrics {
            let lrc_path = sibling(path, ".lrc");
            tokio::fs::write(&lrc_path, lyrics)
                .await
                .map_err(|e| fail(format!("writing {}: {e}", lrc_path.display())))?;
            debug!(path = %lrc_path.display(), "lyrics written");
        }

        if let Some(cover) = &tags.cover {
            let cover_path = sibling(path, &format!(".cover.{}", cover.extension));
            tokio::fs::write(&cover_path, &cover.data)
                .await
                .map_err(|e| fail(format!("writing {}: {e}", cover_path.display())))?;
            debug!(path = %cover_path.display(), "cover art written");
        }

        Ok(())
    }
}

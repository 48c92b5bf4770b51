//! File naming for acquired songs and their side artifacts.

use url::Url;

use crate::remote::{SongMetadata, UNKNOWN_ARTIST, UNKNOWN_TITLE};

/// Longest component kept in a file name, in characters.
const MAX_COMPONENT_CHARS: usize = 120;

/// Builds `"<title> - <artist>.<ext>"` for a song.
///
/// `/` in title or artist becomes `&` (multi-artist lines use it as a
/// separator); characters no filesystem accepts are dropped.
#[must_use]
pub fn song_file_name(metadata: &SongMetadata) -> String {
    let title = clean_component(&metadata.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let artist = clean_component(&metadata.artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let extension = clean_extension(&metadata.format).unwrap_or_else(|| "mp3".to_string());
    format!("{title} - {artist}.{extension}")
}

/// Sanitizes one human-readable name component, keeping spaces.
pub(crate) fn clean_component(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '/' => out.push('&'),
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {}
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    let cleaned: String = out
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn clean_extension(value: &str) -> Option<String> {
    let ext: String = value
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 8).then_some(ext)
}

/// Extension of the last path segment of `url`, without the dot.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    clean_extension(&last_segment[dot_index + 1..])
}

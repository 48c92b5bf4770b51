//! Song-id extraction from free-form text.
//!
//! Accepts any mix of bare numeric ids, song page URLs
//! (`https://music.163.com/#/song?id=186016`), and HTML playlist fragments
//! (`<a href="/song?id=186016">`). Ids come back de-duplicated in the order
//! they first appear.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::pipeline::WorkItem;

/// Longest digit run accepted as an id.
const MAX_ID_DIGITS: usize = 15;

#[allow(clippy::expect_used)]
static SONG_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"song(?:\?id=|/)(\d{1,15})\b").expect("song link regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\s,;]+").expect("token regex is valid") // Static pattern, safe to panic
});

/// Extracts song ids from `text`.
#[must_use]
pub fn extract_song_ids(text: &str) -> Vec<WorkItem> {
    let mut found: Vec<(usize, &str)> = SONG_LINK_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| (m.start(), m.as_str()))
        .collect();

    found.extend(
        TOKEN_PATTERN
            .find_iter(text)
            .filter(|m| {
                let token = m.as_str();
                token.len() <= MAX_ID_DIGITS && token.bytes().all(|b| b.is_ascii_digit())
            })
            .map(|m| (m.start(), m.as_str())),
    );

    found.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    let ids: Vec<WorkItem> = found
        .into_iter()
        .filter(|(_, id)| seen.insert(*id))
        .map(|(_, id)| WorkItem::from(id))
        .collect();

    debug!(count = ids.len(), "extracted song ids");
    ids
}

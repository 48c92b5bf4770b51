//! Wire types for the credential and metadata endpoints.

use serde::Deserialize;
use serde_json::Value;

/// Body of the credential endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of the metadata endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataResponse {
    /// Number or string depending on the server version.
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub song_info: Option<SongInfo>,
    #[serde(default)]
    pub url_info: Option<UrlInfo>,
    #[serde(default)]
    pub lrc: Option<Lyrics>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SongInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UrlInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Lyrics {
    #[serde(default)]
    pub lyric: Option<String>,
}

impl MetadataResponse {
    /// Returns true when `status` denotes success.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Value::Number(n) => n.as_u64() == Some(200),
            Value::String(s) => {
                let s = s.trim();
                s == "200" || s.eq_ignore_ascii_case("success") || s.eq_ignore_ascii_case("ok")
            }
            _ => false,
        }
    }

    /// Heuristic for a credential rejection carried in the message text.
    pub fn mentions_token(&self) -> bool {
        self.msg.as_deref().is_some_and(|msg| {
            msg.to_lowercase().contains("token") || msg.contains("令牌")
        })
    }
}

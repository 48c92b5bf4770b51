//! Shared fixtures: a mock music service and pipelines wired against it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use songfetch_core::credential::CredentialManager;
use songfetch_core::http::{Backoff, HttpClient, RetryPolicy};
use songfetch_core::remote::{MetadataApi, TokenEndpoint};
use songfetch_core::storage::{FileStore, SidecarTagger};
use songfetch_core::ItemPipeline;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "tok-1";

/// Retry policy without delays so tests run fast.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Backoff::Constant(Duration::ZERO))
}

/// Builds a pipeline talking to `server`, storing under `dir`.
pub fn pipeline(server: &MockServer, dir: &Path, max_attempts: u32) -> ItemPipeline {
    pipeline_with_policy(server, dir, fast_policy(max_attempts))
}

/// Like [`pipeline`], with an explicit retry policy.
pub fn pipeline_with_policy(server: &MockServer, dir: &Path, policy: RetryPolicy) -> ItemPipeline {
    let http = HttpClient::new(policy);
    let credentials = Arc::new(CredentialManager::new(Arc::new(TokenEndpoint::new(
        http.clone(),
        format!("{}/token", server.uri()),
    ))));
    let metadata = MetadataApi::new(http.clone(), format!("{}/music", server.uri()), "hires");
    ItemPipeline::new(
        credentials,
        http,
        metadata,
        Arc::new(FileStore::new(dir)),
        Arc::new(SidecarTagger::new()),
    )
}

/// Token endpoint answering `token`.
pub async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .mount(server)
        .await;
}

/// Matches metadata requests for song `id`.
pub fn for_song(id: &str) -> impl wiremock::Match + 'static {
    body_partial_json(json!({ "url": format!("https://music.163.com/song?id={id}") }))
}

/// Successful metadata body pointing at `/audio/<id>.mp3` on `server`.
pub fn song_body(server: &MockServer, id: &str) -> Value {
    json!({
        "status": 200,
        "song_info": {
            "name": format!("Song {id}"),
            "artist": "Artist",
            "album": "Album"
        },
        "url_info": {
            "url": format!("{}/audio/{id}.mp3", server.uri()),
            "type": "mp3"
        }
    })
}

/// Metadata and payload endpoints for a healthy song `id`.
pub async fn mount_song(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path("/music"))
        .and(for_song(id))
        .respond_with(ResponseTemplate::new(200).set_body_json(song_body(server, id)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/audio/{id}.mp3")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(id)))
        .mount(server)
        .await;
}

/// Payload bytes served for song `id`.
pub fn payload(id: &str) -> Vec<u8> {
    format!("ID3 audio bytes for {id}").into_bytes()
}

/// Payload server on a raw socket, for responses wiremock cannot produce.
pub struct RawPayloadServer {
    pub uri: String,
    pub connections: Arc<AtomicUsize>,
}

impl RawPayloadServer {
    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Starts a server answering every GET with `200 OK`. Connection `n` gets
/// `responses[n]` (the last entry repeats) as `(content_length, body)`; a
/// body shorter than its declared length drops the connection mid-body.
pub async fn raw_payload_server(responses: Vec<(usize, Vec<u8>)>) -> RawPayloadServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let (declared, body) = responses[index.min(responses.len() - 1)].clone();
            tokio::spawn(async move {
                let mut request: Vec<u8> = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n\
                     Content-Length: {declared}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.flush().await;
            });
        }
    });

    RawPayloadServer {
        uri: format!("http://{addr}"),
        connections,
    }
}

/// `*.part` files left in `dir`.
pub fn part_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.to_string_lossy().ends_with(".part"))
                .collect()
        })
        .unwrap_or_default()
}

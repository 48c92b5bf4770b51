//! Shared access credential with serialized refresh.
//!
//! [`CredentialManager`] owns the one credential every pipeline needs. The
//! credential is fetched lazily on first demand, held until someone reports it
//! invalid, then fetched again on the next demand. At most one fetch is in
//! flight at any time: callers that arrive while a fetch is running wait for it
//! and share its result, including its error.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Errors raised while obtaining a credential.
///
/// `Clone` so a single failed fetch can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The credential endpoint could not be reached or answered with an error.
    #[error("credential request failed: {reason}")]
    Request {
        /// Description of the failure.
        reason: String,
    },

    /// The endpoint answered but the response carried no usable token.
    #[error("malformed credential response: {reason}")]
    Malformed {
        /// Description of what was wrong.
        reason: String,
    },
}

impl CredentialError {
    /// Creates a request error.
    pub fn request(reason: impl Into<String>) -> Self {
        Self::Request {
            reason: reason.into(),
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// An opaque access token.
///
/// A credential is valid exactly while the manager caches it; invalidation
/// removes it from the cache.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wraps a freshly fetched token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Returns the raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Where fresh credentials come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetches a new token from the authority.
    async fn fetch(&self) -> Result<String, CredentialError>;
}

/// Result of the most recent fetch, guarded by the fetch lock.
#[derive(Debug, Default)]
struct FetchState {
    generation: u64,
    last_error: Option<CredentialError>,
}

/// Owner of the shared credential.
///
/// Share it between pipelines through an [`Arc`].
pub struct CredentialManager {
    source: Arc<dyn CredentialSource>,
    cache: RwLock<Option<Credential>>,
    fetch_lock: Mutex<FetchState>,
    /// Mirror of `FetchState::generation` readable without the lock.
    generation: AtomicU64,
    fetches: AtomicUsize,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("fetches", &self.fetches.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Creates an empty manager backed by `source`.
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(FetchState::default()),
            generation: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Returns the cached credential, fetching one if none is held.
    ///
    /// Concurrent callers on an empty cache trigger exactly one fetch. Callers
    /// that waited on a fetch which failed receive that same error; a call
    /// made after the failure completed starts a fresh fetch.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the fetch this call depended on failed.
    #[instrument(skip(self))]
    pub async fn get_credential(&self) -> Result<Credential, CredentialError> {
        if let Some(credential) = self.cached().await {
            return Ok(credential);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let mut state = self.fetch_lock.lock().await;

        if let Some(credential) = self.cached().await {
            debug!("credential populated while waiting for fetch lock");
            return Ok(credential);
        }

        if state.generation > observed {
            if let Some(error) = &state.last_error {
                debug!(%error, "sharing result of failed in-flight fetch");
                return Err(error.clone());
            }
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("fetching credential");
        let result = self.source.fetch().await;

        state.generation += 1;
        self.generation.store(state.generation, Ordering::Release);

        match result {
            Ok(token) => {
                let credential = Credential::new(token);
                *self.cache.write().await = Some(credential.clone());
                state.last_error = None;
                info!(generation = state.generation, "credential acquired");
                Ok(credential)
            }
            Err(error) => {
                warn!(%error, "credential fetch failed");
                state.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Discards the cached credential so the next demand fetches a new one.
    ///
    /// Idempotent. Returns true when a credential was actually discarded.
    #[instrument(skip(self))]
    pub async fn invalidate(&self) -> bool {
        let _state = self.fetch_lock.lock().await;
        let cleared = self.cache.write().await.take().is_some();
        if cleared {
            warn!("credential invalidated");
        }
        cleared
    }

    /// Number of fetches performed so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Returns true while a valid credential is cached.
    pub async fn is_cached(&self) -> bool {
        self.cached().await.is_some()
    }

    async fn cached(&self) -> Option<Credential> {
        self.cache.read().await.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;

    /// Hands out scripted results, counting calls.
    struct ScriptedSource {
        script: std::sync::Mutex<VecDeque<Result<String, CredentialError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<String, CredentialError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl CredentialSource for ScriptedSource {
        async fn fetch(&self) -> Result<String, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CredentialError::request("script exhausted")))
        }
    }

    #[tokio::test]
    async fn test_get_credential_caches_after_first_fetch() {
        let source = ScriptedSource::new(vec![Ok("t1".into())], Duration::ZERO);
        let manager = CredentialManager::new(source.clone());

        assert_eq!(manager.get_credential().await.unwrap().token(), "t1");
        assert_eq!(manager.get_credential().await.unwrap().token(), "t1");
        assert_eq!(manager.fetch_count(), 1);
        assert!(manager.is_cached().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let source = ScriptedSource::new(vec![Ok("t1".into())], Duration::from_millis(50));
        let manager = Arc::new(CredentialManager::new(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.get_credential().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().token(), "t1");
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.fetch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_share_failed_fetch_error() {
        let source = ScriptedSource::new(
            vec![Err(CredentialError::request("boom")), Ok("t2".into())],
            Duration::from_millis(50),
        );
        let manager = Arc::new(CredentialManager::new(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.get_credential().await }));
        }
        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap_err(),
                CredentialError::request("boom")
            );
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // A failure does not poison later calls.
        assert_eq!(manager.get_credential().await.unwrap().token(), "t2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_single_refetch() {
        let source = ScriptedSource::new(vec![Ok("t1".into()), Ok("t2".into())], Duration::ZERO);
        let manager = CredentialManager::new(source.clone());

        let first = manager.get_credential().await.unwrap();
        assert!(manager.invalidate().await);
        assert!(!manager.is_cached().await);

        let second = manager.get_credential().await.unwrap();
        assert_ne!(first.token(), second.token());
        assert_eq!(manager.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let source = ScriptedSource::new(vec![], Duration::ZERO);
        let manager = CredentialManager::new(source);
        assert!(!manager.invalidate().await);
        assert!(!manager.invalidate().await);
        assert_eq!(manager.fetch_count(), 0);
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let rendered = format!("{:?}", Credential::new("secret-token"));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("REDACTED"));
    }
}

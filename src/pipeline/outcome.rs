//! Work items and their terminal outcomes.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier of one song to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    /// Creates a work item from any id representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for WorkItem {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for WorkItem {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkItem {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Category of a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Transport failures that survived every retry.
    Network,
    /// No usable credential could be obtained, or the service rejected it.
    Credential,
    /// The service answered with a definitive rejection.
    Remote,
    /// Local persistence failed.
    Storage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Credential => "credential",
            Self::Remote => "remote",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Why an item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub reason: String,
}

impl ItemFailure {
    /// Creates a failure record.
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// What was acquired for a successful item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredSong {
    /// Track title.
    pub title: String,
    /// Artist line.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Where the payload lives.
    pub path: PathBuf,
    /// Payload size written by this run (0 when skipped).
    pub bytes: u64,
    /// True when the artifact already existed and no download happened.
    pub skipped: bool,
}

/// Terminal result of processing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The song is stored.
    Success(AcquiredSong),
    /// The item failed permanently.
    Failure(ItemFailure),
    /// The run was cancelled before the item finished.
    Cancelled,
}

impl ItemOutcome {
    /// Shorthand for a failure outcome.
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure(ItemFailure::new(kind, reason))
    }

    /// Returns true for [`ItemOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the failure kind, if this is a failure.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

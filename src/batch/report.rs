//! Aggregated batch results.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::pipeline::{AcquiredSong, FailureKind, ItemFailure, ItemOutcome, WorkItem};

/// Outcome of a batch run.
///
/// `successes + failures + cancelled == submitted` always holds. Entries keep
/// submission order within each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items that ended with a stored song.
    pub successes: Vec<(WorkItem, AcquiredSong)>,
    /// Items that failed, with their reasons.
    pub failures: Vec<(WorkItem, ItemFailure)>,
    /// Items cut short by cancellation.
    pub cancelled: Vec<WorkItem>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl BatchReport {
    /// Partitions per-item outcomes into a report.
    pub fn from_outcomes(
        outcomes: impl IntoIterator<Item = (WorkItem, ItemOutcome)>,
        elapsed: Duration,
    ) -> Self {
        let mut report = Self {
            elapsed,
            ..Self::default()
        };
        for (item, outcome) in outcomes {
            match outcome {
                ItemOutcome::Success(song) => report.successes.push((item, song)),
                ItemOutcome::Failure(failure) => report.failures.push((item, failure)),
                ItemOutcome::Cancelled => report.cancelled.push(item),
            }
        }
        report
    }

    /// Number of items submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.successes.len() + self.failures.len() + self.cancelled.len()
    }

    /// Number of successful items.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    /// Number of failed items.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of cancelled items.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    /// Number of successes that were skipped because the artifact existed.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.successes.iter().filter(|(_, song)| song.skipped).count()
    }

    /// True when every item succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    /// Failure reasons keyed by item id. Duplicate ids keep every failure.
    #[must_use]
    pub fn failure_reasons(&self) -> BTreeMap<&WorkItem, Vec<&ItemFailure>> {
        let mut reasons: BTreeMap<&WorkItem, Vec<&ItemFailure>> = BTreeMap::new();
        for (item, failure) in &self.failures {
            reasons.entry(item).or_default().push(failure);
        }
        reasons
    }

    /// Failure counts per kind.
    #[must_use]
    pub fn failures_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for (_, failure) in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Writes one JSON object per item to `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O or serialization error.
    pub fn write_jsonl(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        for (item, song) in &self.successes {
            write_line(
                &mut writer,
                &ReportLine {
                    id: item,
                    outcome: "success",
                    kind: None,
                    reason: None,
                    path: Some(&song.path),
                    skipped: Some(song.skipped),
                },
            )?;
        }
        for (item, failure) in &self.failures {
            write_line(
                &mut writer,
                &ReportLine {
                    id: item,
                    outcome: "failure",
                    kind: Some(failure.kind),
                    reason: Some(&failure.reason),
                    path: None,
                    skipped: None,
                },
            )?;
        }
        for item in &self.cancelled {
            write_line(
                &mut writer,
                &ReportLine {
                    id: item,
                    outcome: "cancelled",
                    kind: None,
                    reason: None,
                    path: None,
                    skipped: None,
                },
            )?;
        }

        writer.flush()
    }
}

#[derive(Serialize)]
struct ReportLine<'a> {
    id: &'a WorkItem,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<bool>,
}

fn write_line(writer: &mut impl Write, line: &ReportLine<'_>) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, line).map_err(std::io::Error::other)?;
    writer.write_all(b"\n")
}

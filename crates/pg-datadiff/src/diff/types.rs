//! Type definitions for verdicts, chunk windows and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous, ordered slice of rows under a fixed ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    /// Zero-based position of the first row.
    pub offset: i64,
    /// Number of rows in the window.
    pub limit: i64,
}

impl ChunkWindow {
    /// Create a new window.
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Exclusive upper row position.
    pub fn end(&self) -> i64 {
        self.offset + self.limit
    }

    /// Partition `[0, row_count]` into windows of `chunk_size` rows.
    ///
    /// Windows start at 0 and advance by `chunk_size` while the start is
    /// `<= row_count`, so a trailing partial chunk is always covered (and an
    /// exact multiple gets one trailing empty window, as both sides must
    /// agree that nothing lies beyond the end).
    pub fn partition(row_count: i64, chunk_size: i64) -> Vec<ChunkWindow> {
        let chunk_size = chunk_size.max(1);
        let mut windows = Vec::new();
        let mut offset = 0;

        while offset <= row_count {
            windows.push(ChunkWindow::new(offset, chunk_size));
            offset += chunk_size;
        }

        windows
    }
}

impl std::fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Aggregate digest of one window of rows.
///
/// An empty digest means the window lies beyond the end of the table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDigest(Option<String>);

impl RowDigest {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(Some(hex.into()))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<Option<String>> for RowDigest {
    fn from(value: Option<String>) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RowDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(hex) => write!(f, "{}", hex),
            None => write!(f, "<empty>"),
        }
    }
}

/// Outcome class of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Content confirmed identical.
    Match,
    /// Not a failure, but not a confirmable match either.
    Inconclusive,
    /// Divergence or structural absence.
    Mismatch,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Match => write!(f, "match"),
            Status::Inconclusive => write!(f, "inconclusive"),
            Status::Mismatch => write!(f, "mismatch"),
        }
    }
}

/// A status paired with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    pub reason: String,
}

impl Verdict {
    pub fn matched(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Match,
            reason: reason.into(),
        }
    }

    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Inconclusive,
            reason: reason.into(),
        }
    }

    pub fn mismatch(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Mismatch,
            reason: reason.into(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == Status::Match
    }

    pub fn is_inconclusive(&self) -> bool {
        self.status == Status::Inconclusive
    }

    pub fn is_mismatch(&self) -> bool {
        self.status == Status::Mismatch
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.reason)
    }
}

/// What a report line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Table,
    Sequence,
}

/// Verdict for one table or sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub kind: TargetKind,
    /// Table or sequence name.
    pub name: String,
    pub verdict: Verdict,
    /// Position in the per-kind scope (1-based) and scope size.
    pub position: usize,
    pub total: usize,
    pub duration_ms: u64,
}

/// Result of a full run over the resolved scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    /// Unique run identifier.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Table verdicts in scope order.
    pub tables: Vec<TargetReport>,
    /// Sequence verdicts in scope order.
    pub sequences: Vec<TargetReport>,
    /// True when the run was interrupted before the scope was exhausted.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl DiffReport {
    /// Create an empty report.
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            started_at: now,
            completed_at: now,
            tables: Vec::new(),
            sequences: Vec::new(),
            cancelled: false,
            duration_ms: 0,
        }
    }

    /// All verdicts, tables first.
    pub fn entries(&self) -> impl Iterator<Item = &TargetReport> {
        self.tables.iter().chain(self.sequences.iter())
    }

    fn count(&self, status: Status) -> usize {
        self.entries().filter(|r| r.verdict.status == status).count()
    }

    /// Number of mismatches across tables and sequences.
    pub fn failures(&self) -> usize {
        self.count(Status::Mismatch)
    }

    pub fn matches(&self) -> usize {
        self.count(Status::Match)
    }

    pub fn inconclusive(&self) -> usize {
        self.count(Status::Inconclusive)
    }

    /// True iff no evaluated unit was a mismatch.
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(count: i64, size: i64) -> Vec<(i64, i64)> {
        ChunkWindow::partition(count, size)
            .into_iter()
            .map(|w| (w.offset, w.limit))
            .collect()
    }

    #[test]
    fn test_partition_partial_last_chunk() {
        assert_eq!(windows(5, 2), vec![(0, 2), (2, 2), (4, 2)]);
    }

    #[test]
    fn test_partition_exact_multiple_adds_trailing_window() {
        assert_eq!(windows(4, 2), vec![(0, 2), (2, 2), (4, 2)]);
    }

    #[test]
    fn test_partition_chunk_larger_than_table() {
        assert_eq!(windows(3, 10_000), vec![(0, 10_000)]);
    }

    #[test]
    fn test_partition_is_gapless() {
        let parts = ChunkWindow::partition(1_234, 100);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
        assert_eq!(parts[0].offset, 0);
        assert!(parts.last().unwrap().end() > 1_234);
    }

    #[test]
    fn test_window_display() {
        assert_eq!(ChunkWindow::new(20, 10).to_string(), "[20, 30)");
    }

    #[test]
    fn test_report_counts() {
        let mut report = DiffReport::new("run");
        for (i, verdict) in [
            Verdict::matched("ok"),
            Verdict::inconclusive("table is empty"),
            Verdict::mismatch("table is missing"),
        ]
        .into_iter()
        .enumerate()
        {
            report.tables.push(TargetReport {
                kind: TargetKind::Table,
                name: format!("t{}", i),
                verdict,
                position: i + 1,
                total: 3,
                duration_ms: 0,
            });
        }

        assert_eq!(report.matches(), 1);
        assert_eq!(report.inconclusive(), 1);
        assert_eq!(report.failures(), 1);
        assert!(!report.is_success());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"mismatch\""));
    }

    #[test]
    fn test_inconclusive_only_report_succeeds() {
        let mut report = DiffReport::new("run");
        report.sequences.push(TargetReport {
            kind: TargetKind::Sequence,
            name: "users_id_seq".into(),
            verdict: Verdict::inconclusive("first sequence is less than the second (1 vs 2)"),
            position: 1,
            total: 1,
            duration_ms: 0,
        });
        assert!(report.is_success());
    }
}

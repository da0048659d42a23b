//! Chunked content-hash comparison of tables and sequences.
//!
//! - [`ChunkHasher`]: one digest per ordered window of rows, both sources
//! - [`TableComparator`]: counts, key checks and window-by-window digests
//! - [`SequenceComparator`]: `last_value` of one sequence on both sources
//!
//! Comparators never fail: every problem met while evaluating a table or a
//! sequence becomes a [`Verdict`]. When a query fails, both sources are rolled
//! back before the verdict is returned so the next unit starts clean.

pub mod chunk;
pub mod hash_query;
pub mod sequence;
pub mod table;
pub mod types;

pub use chunk::{ChunkHasher, WindowOutcome};
pub use sequence::SequenceComparator;
pub use table::TableComparator;
pub use types::{
    ChunkWindow, DiffReport, RowDigest, Status, TargetKind, TargetReport, Verdict,
};

use tracing::warn;

use crate::config::DiffConfig;
use crate::error::{DiffError, Result};
use crate::source::DataSource;

/// Settings shared by the table and sequence comparators.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Schema on the first source.
    pub schema: String,
    /// Schema on the second source.
    pub second_schema: String,
    /// Rows per window.
    pub chunk_size: i64,
    /// Stop after the row count check.
    pub count_only: bool,
    /// Compare the maximum of the sequence-backed key column instead of digests.
    pub count_with_max: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            second_schema: "public".to_string(),
            chunk_size: 10_000,
            count_only: false,
            count_with_max: false,
        }
    }
}

impl From<&DiffConfig> for CompareOptions {
    fn from(config: &DiffConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            second_schema: config.second_schema().to_string(),
            chunk_size: config.chunk_size as i64,
            count_only: config.count_only,
            count_with_max: config.count_with_max,
        }
    }
}

/// A failed query, tagged with the source it ran on.
#[derive(Debug)]
pub struct SideError {
    pub label: String,
    pub error: DiffError,
}

impl SideError {
    /// Structural absence maps to `missing_reason`, anything else names the
    /// failing source.
    fn into_verdict(self, missing_reason: &str) -> Verdict {
        if self.error.is_missing() {
            Verdict::mismatch(missing_reason)
        } else {
            Verdict::mismatch(format!(
                "query failed on {} database: {}",
                self.label, self.error
            ))
        }
    }
}

/// Tag a query result with the source it came from.
pub(crate) fn side<T, S: DataSource + ?Sized>(
    source: &S,
    result: Result<T>,
) -> std::result::Result<T, SideError> {
    result.map_err(|error| SideError {
        label: source.label().to_string(),
        error,
    })
}

/// Reset failed transaction state on both sources.
pub(crate) async fn recover<S: DataSource + ?Sized>(first: &S, second: &S) {
    let (a, b) = tokio::join!(first.rollback(), second.rollback());
    for (source, result) in [(first.label(), a), (second.label(), b)] {
        if let Err(e) = result {
            warn!("Rollback on {} database failed: {}", source, e);
        }
    }
}

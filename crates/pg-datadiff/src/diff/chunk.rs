//! Window digests for one table on both sources.

use tracing::debug;

use super::{side, ChunkWindow, RowDigest, SideError};
use crate::core::TargetTable;
use crate::error::{DiffError, Result};
use crate::source::DataSource;

/// Result of comparing one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    Identical,
    Different { first: RowDigest, second: RowDigest },
}

/// Computes and compares window digests.
pub struct ChunkHasher<'a, S: DataSource + ?Sized> {
    first: &'a S,
    second: &'a S,
    chunk_size: i64,
}

impl<'a, S: DataSource + ?Sized> ChunkHasher<'a, S> {
    pub fn new(first: &'a S, second: &'a S, chunk_size: i64) -> Self {
        Self {
            first,
            second,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Windows covering `row_count` rows, in ascending offset order.
    pub fn windows(&self, row_count: i64) -> Vec<ChunkWindow> {
        ChunkWindow::partition(row_count, self.chunk_size)
    }

    /// Digest of one window on one source.
    ///
    /// The table must carry its primary key: rows are ordered by the full key
    /// so the digest never depends on physical storage order.
    pub async fn digest(source: &S, table: &TargetTable, window: ChunkWindow) -> Result<RowDigest> {
        if !table.has_pk() {
            return Err(DiffError::Config(format!(
                "Table {} has no primary key - chunk hashing requires a deterministic order",
                table.full_name()
            )));
        }
        source.chunk_digest(table, window).await
    }

    /// Digest the same window on both sources concurrently and compare.
    ///
    /// Only returns an outcome when both queries completed.
    pub async fn compare_window(
        &self,
        first_table: &TargetTable,
        second_table: &TargetTable,
        window: ChunkWindow,
    ) -> std::result::Result<WindowOutcome, SideError> {
        let (first, second) = tokio::join!(
            Self::digest(self.first, first_table, window),
            Self::digest(self.second, second_table, window)
        );
        let first = side(self.first, first)?;
        let second = side(self.second, second)?;

        if first == second {
            Ok(WindowOutcome::Identical)
        } else {
            debug!(
                "{} window {}: digest mismatch ({} vs {})",
                first_table.full_name(),
                window,
                first,
                second
            );
            Ok(WindowOutcome::Different { first, second })
        }
    }
}

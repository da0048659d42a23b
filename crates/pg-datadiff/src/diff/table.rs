//! Table comparison: counts, primary key check and window digests.

use tracing::{debug, info, warn};

use super::chunk::{ChunkHasher, WindowOutcome};
use super::{recover, side, CompareOptions, SideError, Verdict};
use crate::core::TargetTable;
use crate::source::DataSource;

type Step<T> = std::result::Result<T, SideError>;

/// Compares one table across the two sources.
pub struct TableComparator<'a, S: DataSource + ?Sized> {
    first: &'a S,
    second: &'a S,
    options: &'a CompareOptions,
}

impl<'a, S: DataSource + ?Sized> TableComparator<'a, S> {
    pub fn new(first: &'a S, second: &'a S, options: &'a CompareOptions) -> Self {
        Self {
            first,
            second,
            options,
        }
    }

    /// Compare a table by name (resolved in the configured schemas).
    pub async fn compare_name(&self, name: &str) -> Verdict {
        self.compare(&TargetTable::new(&self.options.schema, name))
            .await
    }

    /// Compare one table. Never fails: query errors become a mismatch and
    /// both sources are rolled back.
    pub async fn compare(&self, table: &TargetTable) -> Verdict {
        match self.evaluate(table).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    "Table {}: {} database failed: {}",
                    table.full_name(),
                    err.label,
                    err.error
                );
                recover(self.first, self.second).await;
                err.into_verdict("table is missing")
            }
        }
    }

    async fn evaluate(&self, table: &TargetTable) -> Step<Verdict> {
        let second_table = table.in_schema(&self.options.second_schema);

        let (first_count, second_count) = tokio::join!(
            self.first.row_count(table),
            self.second.row_count(&second_table)
        );
        let first_count = side(self.first, first_count)?;
        let second_count = side(self.second, second_count)?;

        if first_count != second_count {
            return Ok(Verdict::mismatch(format!(
                "counts are different: {} != {}",
                first_count, second_count
            )));
        }
        if first_count == 0 {
            return Ok(Verdict::inconclusive("table is empty"));
        }
        if self.options.count_only {
            return Ok(Verdict::matched("counts are the same"));
        }

        // Key metadata comes from the first source and is read once.
        let primary_key = side(self.first, self.first.primary_key(table).await)?;

        if self.options.count_with_max {
            if let Some(verdict) = self
                .compare_max(table, &second_table, &primary_key)
                .await?
            {
                return Ok(verdict);
            }
        }

        if primary_key.is_empty() {
            return Ok(Verdict::inconclusive(
                "no primary key; comparison not possible",
            ));
        }

        let first_table = table.clone().with_primary_key(primary_key.clone());
        let second_table = second_table.with_primary_key(primary_key);

        let hasher = ChunkHasher::new(self.first, self.second, self.options.chunk_size);
        let windows = hasher.windows(first_count);
        debug!(
            "Table {}: {} rows in {} windows of {}",
            first_table.full_name(),
            first_count,
            windows.len(),
            self.options.chunk_size
        );

        for window in windows {
            match hasher
                .compare_window(&first_table, &second_table, window)
                .await?
            {
                WindowOutcome::Identical => {}
                WindowOutcome::Different { .. } => {
                    info!("Table {}: rows {} differ", first_table.full_name(), window);
                    return Ok(Verdict::mismatch(format!(
                        "data is different - rows {}",
                        window
                    )));
                }
            }
        }

        Ok(Verdict::matched("data is identical"))
    }

    /// High-water-mark comparison on the single sequence-backed key column.
    ///
    /// Returns `None` when the table does not have exactly one sequence-backed
    /// column inside its primary key; the caller then does the full
    /// comparison.
    async fn compare_max(
        &self,
        table: &TargetTable,
        second_table: &TargetTable,
        primary_key: &[String],
    ) -> Step<Option<Verdict>> {
        let columns = side(self.first, self.first.sequence_backed_columns(table).await)?;
        let column = match columns.as_slice() {
            [column] if primary_key.contains(column) => column,
            _ => {
                debug!(
                    "Table {}: {} sequence-backed columns ({:?}), falling back to full comparison",
                    table.full_name(),
                    columns.len(),
                    columns
                );
                return Ok(None);
            }
        };

        let (first_max, second_max) = tokio::join!(
            self.first.max_value(table, column),
            self.second.max_value(second_table, column)
        );
        let first_max = side(self.first, first_max)?;
        let second_max = side(self.second, second_max)?;

        let verdict = if first_max != second_max {
            Verdict::mismatch(format!(
                "max {} is different: {} != {}",
                column, first_max, second_max
            ))
        } else if first_max == 0 {
            Verdict::inconclusive(format!("max {} is zero on both sides", column))
        } else {
            Verdict::matched(format!("counts and max {} are the same ({})", column, first_max))
        };
        Ok(Some(verdict))
    }
}

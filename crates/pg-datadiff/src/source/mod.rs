//! Data sources the comparators read from.
//!
//! [`DataSource`] is the narrow contract the diff engine needs from a
//! database: catalog listings, counts, key metadata, window digests and
//! sequence positions, plus recovery from a failed transaction.
//!
//! - [`PgSource`]: PostgreSQL via deadpool-postgres, optional rustls TLS
//! - [`MemorySource`]: in-memory tables and sequences

mod memory;
mod postgres;

pub use memory::{Cell, MemorySource, MemoryTable};
pub use postgres::{PgSource, SslMode};

use async_trait::async_trait;

use crate::core::TargetTable;
use crate::diff::{ChunkWindow, RowDigest};
use crate::error::Result;

/// Read access to one of the two databases being compared.
///
/// Methods that address a relation that does not exist must return
/// [`crate::DiffError::Missing`] so callers can tell structural absence apart
/// from other failures.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short label used in logs and verdict reasons ("first", "second").
    fn label(&self) -> &str;

    /// Check that a schema exists.
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// Base table names in a schema.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Sequence names in a schema.
    async fn list_sequences(&self, schema: &str) -> Result<Vec<String>>;

    /// Exact row count of a table.
    async fn row_count(&self, table: &TargetTable) -> Result<i64>;

    /// Primary key columns in key order (empty when the table has none).
    async fn primary_key(&self, table: &TargetTable) -> Result<Vec<String>>;

    /// Columns whose values are generated from a sequence.
    async fn sequence_backed_columns(&self, table: &TargetTable) -> Result<Vec<String>>;

    /// `MAX(column)`, 0 for an empty table.
    async fn max_value(&self, table: &TargetTable, column: &str) -> Result<i64>;

    /// Digest of the rows in `window`, ordered by `table.primary_key`.
    async fn chunk_digest(&self, table: &TargetTable, window: ChunkWindow) -> Result<RowDigest>;

    /// `last_value` of a sequence.
    async fn sequence_last_value(&self, schema: &str, sequence: &str) -> Result<i64>;

    /// Reset any transaction left in a failed state.
    async fn rollback(&self) -> Result<()>;
}

//! # pg-datadiff
//!
//! Verify that two PostgreSQL databases hold the same data without pulling
//! either one across the network.
//!
//! Each table is compared by row count and then by digests of ordered,
//! fixed-size windows of rows computed server side. Each sequence is compared
//! by its `last_value`. Every table and sequence gets a three-state verdict:
//!
//! - **Match**: content confirmed identical
//! - **Inconclusive**: empty table, no primary key, lagging sequence
//! - **Mismatch**: different counts or content, missing relation, failed query
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_datadiff::{Config, DiffSession};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_datadiff::Result<()> {
//!     let config = Config::load("datadiff.yaml")?;
//!     let session = DiffSession::connect(&config).await?;
//!     let report = session.run(CancellationToken::new()).await?;
//!     println!("{} mismatches", report.failures());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod diff;
pub mod error;
pub mod session;
pub mod source;

// Re-exports for convenient access
pub use config::{Config, DiffConfig, SourceConfig};
pub use diff::{
    ChunkHasher, ChunkWindow, CompareOptions, DiffReport, RowDigest, SequenceComparator, Status,
    TableComparator, TargetKind, TargetReport, Verdict,
};
pub use error::{DiffError, Result};
pub use session::{ComparisonScope, DiffSession};
pub use source::{DataSource, MemorySource, PgSource};

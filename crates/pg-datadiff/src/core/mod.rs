//! Core types used throughout the diff engine.
//!
//! - [`schema`]: Table and sequence metadata
//! - [`identifier`]: Identifier validation, quoting and the catalog allow-list

pub mod identifier;
pub mod schema;

pub use identifier::{qualify_pg, quote_pg, quote_pg_list, validate_identifier, CatalogNames};
pub use schema::{SequenceState, TargetTable};

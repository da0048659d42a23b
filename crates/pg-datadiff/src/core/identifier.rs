//! Identifier validation and quoting for the few places where PostgreSQL
//! requires names to be inlined into query text.
//!
//! # Security
//!
//! Identifiers (schema, table, column and sequence names) cannot be bound as
//! statement parameters. Every query in this crate binds values (limits,
//! offsets, schema and relation names in catalog predicates) as parameters and
//! only inlines identifiers that were read back from the catalog of the source
//! being queried. Before inlining, names go through [`quote_pg`], which
//! rejects empty, oversized or NUL-containing names and escapes embedded
//! double quotes.
//!
//! User-supplied strings (include and exclude lists) are only ever used as set
//! filters against catalog names; see [`CatalogNames`].

use std::collections::BTreeSet;

use crate::error::{DiffError, Result};

/// Maximum identifier length accepted by PostgreSQL (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DiffError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(DiffError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(DiffError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL relation name with its schema.
pub fn qualify_pg(schema: &str, relation: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(relation)?))
}

/// Quote and join a column list, e.g. for `ORDER BY`.
pub fn quote_pg_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Names read from a source catalog.
///
/// This is the allow-list that scope resolution works against: free-text
/// names from the command line can narrow it, never extend it.
#[derive(Debug, Clone, Default)]
pub struct CatalogNames {
    names: BTreeSet<String>,
}

impl CatalogNames {
    /// Build from catalog query results. Invalid names are dropped.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names
                .into_iter()
                .filter(|n| validate_identifier(n).is_ok())
                .collect(),
        }
    }

    /// Names in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }

    /// Apply an include list (intersection, ignored when empty) and an
    /// exclude list (subtraction). Result is sorted.
    pub fn filter(&self, include: &[String], exclude: &[String]) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| include.is_empty() || include.iter().any(|i| i == *n))
            .filter(|n| !exclude.iter().any(|e| e == *n))
            .cloned()
            .collect()
    }
}

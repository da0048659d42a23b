//! Catalog metadata types shared by the comparators.

use serde::{Deserialize, Serialize};

/// A table to compare, identified by schema and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Primary key column names in key order. Empty when the table has no key.
    pub primary_key: Vec<String>,
}

impl TargetTable {
    /// Create a table reference without key metadata.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            primary_key: Vec::new(),
        }
    }

    /// Attach primary key columns.
    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Same table in another schema (for the second source).
    pub fn in_schema(&self, schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: self.name.clone(),
            primary_key: self.primary_key.clone(),
        }
    }

    /// Get fully qualified name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if table has a usable primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

/// Position of one sequence on one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub name: String,
    pub last_value: i64,
}

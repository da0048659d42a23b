//! Resolution of the tables and sequences to compare.

use serde::{Deserialize, Serialize};

use crate::config::DiffConfig;
use crate::core::CatalogNames;

/// Tables and sequences selected for one run, both sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonScope {
    pub tables: Vec<String>,
    pub sequences: Vec<String>,
}

impl ComparisonScope {
    /// Build the scope from a catalog snapshot of the first database.
    ///
    /// Include and exclude lists only filter catalog names, so every name in
    /// the scope is a relation that exists on the first database. Sequences
    /// are never filtered.
    pub fn resolve(tables: Vec<String>, sequences: Vec<String>, config: &DiffConfig) -> Self {
        let tables = if config.compare_tables() {
            CatalogNames::new(tables).filter(&config.include_tables, &config.exclude_tables)
        } else {
            Vec::new()
        };
        let sequences = if config.compare_sequences() {
            CatalogNames::new(sequences).iter().cloned().collect()
        } else {
            Vec::new()
        };

        Self { tables, sequences }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.sequences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_include_intersects_and_exclude_subtracts() {
        let config = DiffConfig {
            include_tables: names(&["orders", "users", "ghost"]),
            exclude_tables: names(&["users"]),
            ..Default::default()
        };
        let scope = ComparisonScope::resolve(
            names(&["users", "orders", "audit"]),
            names(&["users_id_seq"]),
            &config,
        );
        assert_eq!(scope.tables, names(&["orders"]));
        assert_eq!(scope.sequences, names(&["users_id_seq"]));
    }

    #[test]
    fn test_sorted_and_mode_filtered() {
        let tables = names(&["b", "a", "c"]);
        let sequences = names(&["z_seq", "a_seq"]);

        let scope = ComparisonScope::resolve(tables.clone(), sequences.clone(), &DiffConfig::default());
        assert_eq!(scope.tables, names(&["a", "b", "c"]));
        assert_eq!(scope.sequences, names(&["a_seq", "z_seq"]));

        let only_data = DiffConfig {
            only_data: true,
            ..Default::default()
        };
        let scope = ComparisonScope::resolve(tables.clone(), sequences.clone(), &only_data);
        assert!(scope.sequences.is_empty());
        assert_eq!(scope.tables.len(), 3);

        let only_sequences = DiffConfig {
            only_sequences: true,
            ..Default::default()
        };
        let scope = ComparisonScope::resolve(tables, sequences, &only_sequences);
        assert!(scope.tables.is_empty());
        assert_eq!(scope.sequences.len(), 2);
    }

    #[test]
    fn test_exclude_everything_is_empty() {
        let config = DiffConfig {
            only_data: true,
            exclude_tables: names(&["users"]),
            ..Default::default()
        };
        let scope = ComparisonScope::resolve(names(&["users"]), Vec::new(), &config);
        assert!(scope.is_empty());
    }
}

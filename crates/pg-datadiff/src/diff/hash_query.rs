//! SQL query generation for the PostgreSQL source.
//!
//! Values (window limit/offset, schema and relation names used in catalog
//! predicates) are always bind parameters. Relation and column names that
//! have to appear in `FROM` or `ORDER BY` come from the catalog and are quoted
//! through [`crate::core::identifier`].

use crate::core::identifier::{qualify_pg, quote_pg, quote_pg_list};
use crate::core::TargetTable;
use crate::error::{DiffError, Result};

/// Check whether a schema exists. `$1` = schema.
pub const SCHEMA_EXISTS_QUERY: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1
)"#;

/// List base tables of a schema. `$1` = schema.
pub const LIST_TABLES_QUERY: &str = r#"
SELECT c.relname
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND NOT c.relispartition
ORDER BY c.relname"#;

/// List sequences of a schema. `$1` = schema.
pub const LIST_SEQUENCES_QUERY: &str = r#"
SELECT c.relname
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relkind = 'S'
ORDER BY c.relname"#;

/// Primary key columns in key order. `$1` = schema, `$2` = table.
pub const PRIMARY_KEY_QUERY: &str = r#"
SELECT a.attname
FROM pg_catalog.pg_constraint c
JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
WHERE n.nspname = $1
  AND t.relname = $2
  AND c.contype = 'p'
  AND a.attnum = ANY(c.conkey)
ORDER BY array_position(c.conkey, a.attnum)"#;

/// Columns whose values come from a sequence: identity columns and
/// `serial`-style columns owned by a sequence. `$1` = schema, `$2` = table.
pub const SEQUENCE_BACKED_COLUMNS_QUERY: &str = r#"
SELECT a.attname
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class t ON t.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
  AND t.relname = $2
  AND a.attnum > 0
  AND NOT a.attisdropped
  AND (
      a.attidentity IN ('a', 'd')
      OR EXISTS (
          SELECT 1
          FROM pg_catalog.pg_depend d
          JOIN pg_catalog.pg_class s ON s.oid = d.objid AND s.relkind = 'S'
          WHERE d.refobjid = t.oid
            AND d.refobjsubid = a.attnum
            AND d.deptype IN ('a', 'i')
      )
  )
ORDER BY a.attnum"#;

/// Exact row count of a table.
pub fn row_count_query(table: &TargetTable) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*)::int8 FROM {}",
        qualify_pg(&table.schema, &table.name)?
    ))
}

/// Maximum value of a sequence-backed column, 0 for an empty table.
pub fn max_value_query(table: &TargetTable, column: &str) -> Result<String> {
    Ok(format!(
        "SELECT COALESCE(MAX({})::int8, 0) FROM {}",
        quote_pg(column)?,
        qualify_pg(&table.schema, &table.name)?
    ))
}

/// Aggregate digest of one window of rows. `$1` = limit, `$2` = offset.
///
/// Rows are ordered by the full primary key, each row's text form is hashed,
/// and the per-row hashes are concatenated in key order and hashed again.
/// A window past the end of the table aggregates nothing and returns NULL.
///
/// The row is referenced as `(t.*)`: a bare `t` resolves to a column named
/// `t` before the subquery alias.
pub fn chunk_digest_query(table: &TargetTable) -> Result<String> {
    if table.primary_key.is_empty() {
        return Err(DiffError::Config(format!(
            "Table {} has no primary key - chunk hashing requires a deterministic order",
            table.full_name()
        )));
    }

    let order_by = quote_pg_list(&table.primary_key)?;
    let agg_order = table
        .primary_key
        .iter()
        .map(|c| quote_pg(c).map(|q| format!("t.{}", q)))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    Ok(format!(
        r#"SELECT md5(string_agg(md5((t.*)::text), ',' ORDER BY {agg_order}))
FROM (
    SELECT *
    FROM {relation}
    ORDER BY {order_by}
    LIMIT $1 OFFSET $2
) AS t"#,
        agg_order = agg_order,
        relation = qualify_pg(&table.schema, &table.name)?,
        order_by = order_by,
    ))
}

/// Read the current position of a sequence.
pub fn sequence_last_value_query(schema: &str, sequence: &str) -> Result<String> {
    Ok(format!(
        "SELECT last_value::int8 FROM {}",
        qualify_pg(schema, sequence)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_table() -> TargetTable {
        TargetTable::new("public", "order_items")
            .with_primary_key(vec!["order_id".to_string(), "line_no".to_string()])
    }

    #[test]
    fn test_catalog_queries_are_parameterized() {
        for query in [
            SCHEMA_EXISTS_QUERY,
            LIST_TABLES_QUERY,
            LIST_SEQUENCES_QUERY,
            PRIMARY_KEY_QUERY,
            SEQUENCE_BACKED_COLUMNS_QUERY,
        ] {
            assert!(query.contains("$1"));
        }
        assert!(PRIMARY_KEY_QUERY.contains("$2"));
        assert!(LIST_SEQUENCES_QUERY.contains("relkind = 'S'"));
    }

    #[test]
    fn test_row_count_query() {
        let query = row_count_query(&make_test_table()).unwrap();
        assert_eq!(
            query,
            "SELECT COUNT(*)::int8 FROM \"public\".\"order_items\""
        );
    }

    #[test]
    fn test_max_value_query() {
        let table = TargetTable::new("public", "users");
        let query = max_value_query(&table, "id").unwrap();
        assert!(query.contains("MAX(\"id\")"));
        assert!(query.contains("COALESCE"));
    }

    #[test]
    fn test_chunk_digest_query_orders_by_full_key() {
        let query = chunk_digest_query(&make_test_table()).unwrap();

        assert!(query.contains("ORDER BY \"order_id\", \"line_no\""));
        assert!(query.contains("ORDER BY t.\"order_id\", t.\"line_no\""));
        assert!(query.contains("LIMIT $1 OFFSET $2"));
        assert!(query.contains("md5((t.*)::text)"));
        assert!(query.contains("FROM \"public\".\"order_items\""));
    }

    #[test]
    fn test_chunk_digest_query_hashes_whole_row_when_column_named_t() {
        let table = TargetTable::new("public", "events")
            .with_primary_key(vec!["id".to_string()]);
        let query = chunk_digest_query(&table).unwrap();

        assert!(query.contains("md5((t.*)::text)"));
        assert!(!query.contains("md5(t::text)"));
    }

    #[test]
    fn test_chunk_digest_query_requires_pk() {
        let table = TargetTable::new("public", "logs");
        assert!(chunk_digest_query(&table).is_err());
    }

    #[test]
    fn test_quoting_blocks_injection_in_names() {
        let table = TargetTable::new("public", "x\"; DROP TABLE users; --")
            .with_primary_key(vec!["id".to_string()]);
        let query = chunk_digest_query(&table).unwrap();
        assert!(query.contains("\"x\"\"; DROP TABLE users; --\""));
    }

    #[test]
    fn test_sequence_last_value_query() {
        let query = sequence_last_value_query("public", "users_id_seq").unwrap();
        assert_eq!(
            query,
            "SELECT last_value::int8 FROM \"public\".\"users_id_seq\""
        );
    }
}

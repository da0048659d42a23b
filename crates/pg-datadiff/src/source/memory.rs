//! In-memory data source.
//!
//! Holds tables as plain row vectors and sequences as integers. Digests are
//! computed client side with SHA-256 using the same shape as the PostgreSQL
//! query: rows ordered by primary key, one hash per row text, hashes joined in
//! key order and hashed again.
//!
//! Like a PostgreSQL session inside a transaction block, a query against a
//! missing relation leaves the source in a failed state: every following call
//! fails until [`DataSource::rollback`] is issued.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::DataSource;
use crate::core::TargetTable;
use crate::diff::{ChunkWindow, RowDigest};
use crate::error::{DiffError, ObjectKind, Result};

/// A single cell value.
///
/// Ordering follows the variant order and then the value, which is enough to
/// give integer and text keys their natural sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cell {
    Null,
    Int(i64),
    Text(String),
}

/// Record-output form of the cell (see [`row_text`]).
impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&cell_text(self))
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Table contents and metadata.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub sequence_backed: Vec<String>,
    /// Rows in storage order.
    pub rows: Vec<Vec<Cell>>,
}

impl MemoryTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn sequence_backed(mut self, columns: &[&str]) -> Self {
        self.sequence_backed = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn row(mut self, cells: Vec<Cell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Cell>>) -> Self {
        self.rows.extend(rows);
        self
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Rows sorted by the given key columns.
    fn ordered_rows(&self, key: &[String]) -> Result<Vec<&Vec<Cell>>> {
        let indices = key
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| DiffError::Query(format!("column \"{}\" does not exist", k)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rows: Vec<&Vec<Cell>> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            let ka = indices.iter().map(|&i| &a[i]);
            let kb = indices.iter().map(|&i| &b[i]);
            ka.cmp(kb)
        });
        Ok(rows)
    }
}

/// Text form of a row, following PostgreSQL's record output: `(1,alice,)`.
///
/// NULL is written as nothing. Empty values and values containing a
/// delimiter, quote, backslash or whitespace are double-quoted with `"` and
/// `\` doubled, so cell boundaries and NULL vs `''` stay distinguishable.
fn row_text(row: &[Cell]) -> String {
    let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
    format!("({})", cells.join(","))
}

fn cell_text(cell: &Cell) -> String {
    let value = match cell {
        Cell::Null => return String::new(),
        Cell::Int(v) => return v.to_string(),
        Cell::Text(v) => v,
    };

    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return value.clone();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push(c);
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default)]
struct State {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), MemoryTable>,
    sequences: BTreeMap<(String, String), i64>,
    /// Tables whose queries never complete.
    stalled: BTreeSet<(String, String)>,
    /// Set after a failed statement, cleared by rollback.
    aborted: bool,
    /// Simulates a broken connection: every call fails while set.
    unreachable: bool,
}

/// In-memory [`DataSource`].
#[derive(Debug)]
pub struct MemorySource {
    label: String,
    state: Mutex<State>,
    digest_queries: AtomicUsize,
}

impl MemorySource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(State::default()),
            digest_queries: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| DiffError::Query(format!("{} source state is poisoned", self.label)))
    }

    /// Lock the state for a statement, honouring the failed and unreachable
    /// flags.
    fn begin(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock()?;
        if state.unreachable {
            return Err(DiffError::Query(format!(
                "connection to {} database lost",
                self.label
            )));
        }
        if state.aborted {
            return Err(DiffError::Query(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            ));
        }
        Ok(state)
    }

    fn fail(state: &mut State, kind: ObjectKind, name: String) -> DiffError {
        state.aborted = true;
        DiffError::missing(kind, name)
    }

    /// Register an empty schema.
    pub fn add_schema(&self, schema: &str) -> Result<()> {
        self.lock()?.schemas.insert(schema.to_string());
        Ok(())
    }

    /// Insert or replace a table (creating its schema).
    pub fn add_table(&self, schema: &str, name: &str, table: MemoryTable) -> Result<()> {
        let mut state = self.lock()?;
        state.schemas.insert(schema.to_string());
        state
            .tables
            .insert((schema.to_string(), name.to_string()), table);
        Ok(())
    }

    /// Run `f` against a table's contents.
    pub fn with_table<F>(&self, schema: &str, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut MemoryTable),
    {
        let mut state = self.lock()?;
        let table = state
            .tables
            .get_mut(&(schema.to_string(), name.to_string()))
            .ok_or_else(|| DiffError::missing(ObjectKind::Table, format!("{}.{}", schema, name)))?;
        f(table);
        Ok(())
    }

    /// Create or move a sequence.
    pub fn set_sequence(&self, schema: &str, name: &str, last_value: i64) -> Result<()> {
        let mut state = self.lock()?;
        state.schemas.insert(schema.to_string());
        state
            .sequences
            .insert((schema.to_string(), name.to_string()), last_value);
        Ok(())
    }

    /// Make every following call fail as if the server went away.
    pub fn set_unreachable(&self, unreachable: bool) -> Result<()> {
        self.lock()?.unreachable = unreachable;
        Ok(())
    }

    /// Make every query against a table hang, like a long-running statement.
    pub fn stall_table(&self, schema: &str, name: &str) -> Result<()> {
        self.lock()?
            .stalled
            .insert((schema.to_string(), name.to_string()));
        Ok(())
    }

    fn is_stalled(&self, table: &TargetTable) -> Result<bool> {
        Ok(self
            .lock()?
            .stalled
            .contains(&(table.schema.clone(), table.name.clone())))
    }

    /// True while a failed statement has not been rolled back.
    pub fn is_aborted(&self) -> bool {
        self.lock().map(|s| s.aborted).unwrap_or(true)
    }

    /// Number of chunk digests computed so far.
    pub fn digest_queries(&self) -> usize {
        self.digest_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self.begin()?.schemas.contains(schema))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let state = self.begin()?;
        Ok(state
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn list_sequences(&self, schema: &str) -> Result<Vec<String>> {
        let state = self.begin()?;
        Ok(state
            .sequences
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn row_count(&self, table: &TargetTable) -> Result<i64> {
        if self.is_stalled(table)? {
            std::future::pending::<()>().await;
        }
        let mut state = self.begin()?;
        let key = (table.schema.clone(), table.name.clone());
        match state.tables.get(&key) {
            Some(t) => Ok(t.rows.len() as i64),
            None => Err(Self::fail(&mut state, ObjectKind::Table, table.full_name())),
        }
    }

    async fn primary_key(&self, table: &TargetTable) -> Result<Vec<String>> {
        let state = self.begin()?;
        let key = (table.schema.clone(), table.name.clone());
        Ok(state
            .tables
            .get(&key)
            .map(|t| t.primary_key.clone())
            .unwrap_or_default())
    }

    async fn sequence_backed_columns(&self, table: &TargetTable) -> Result<Vec<String>> {
        let state = self.begin()?;
        let key = (table.schema.clone(), table.name.clone());
        Ok(state
            .tables
            .get(&key)
            .map(|t| t.sequence_backed.clone())
            .unwrap_or_default())
    }

    async fn max_value(&self, table: &TargetTable, column: &str) -> Result<i64> {
        let mut state = self.begin()?;
        let key = (table.schema.clone(), table.name.clone());
        let Some(t) = state.tables.get(&key) else {
            return Err(Self::fail(&mut state, ObjectKind::Table, table.full_name()));
        };
        let idx = t
            .column_index(column)
            .ok_or_else(|| DiffError::Query(format!("column \"{}\" does not exist", column)))?;

        Ok(t.rows
            .iter()
            .filter_map(|r| match &r[idx] {
                Cell::Int(v) => Some(*v),
                _ => None,
            })
            .max()
            .unwrap_or(0))
    }

    async fn chunk_digest(&self, table: &TargetTable, window: ChunkWindow) -> Result<RowDigest> {
        self.digest_queries.fetch_add(1, Ordering::SeqCst);
        if self.is_stalled(table)? {
            std::future::pending::<()>().await;
        }

        let mut state = self.begin()?;
        if table.primary_key.is_empty() {
            return Err(DiffError::Config(format!(
                "Table {} has no primary key - chunk hashing requires a deterministic order",
                table.full_name()
            )));
        }

        let key = (table.schema.clone(), table.name.clone());
        let Some(t) = state.tables.get(&key) else {
            return Err(Self::fail(&mut state, ObjectKind::Table, table.full_name()));
        };

        let rows = t.ordered_rows(&table.primary_key)?;
        let row_hashes: Vec<String> = rows
            .into_iter()
            .skip(window.offset.max(0) as usize)
            .take(window.limit.max(0) as usize)
            .map(|r| sha256_hex(row_text(r).as_bytes()))
            .collect();

        if row_hashes.is_empty() {
            return Ok(RowDigest::empty());
        }
        Ok(RowDigest::new(sha256_hex(row_hashes.join(",").as_bytes())))
    }

    async fn sequence_last_value(&self, schema: &str, sequence: &str) -> Result<i64> {
        let mut state = self.begin()?;
        let key = (schema.to_string(), sequence.to_string());
        match state.sequences.get(&key) {
            Some(v) => Ok(*v),
            None => Err(Self::fail(
                &mut state,
                ObjectKind::Sequence,
                format!("{}.{}", schema, sequence),
            )),
        }
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.unreachable {
            return Err(DiffError::Query(format!(
                "connection to {} database lost",
                self.label
            )));
        }
        state.aborted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> MemoryTable {
        MemoryTable::new(&["id", "name"])
            .primary_key(&["id"])
            .row(vec![Cell::Int(2), "bob".into()])
            .row(vec![Cell::Int(10), "carol".into()])
            .row(vec![Cell::Int(1), "alice".into()])
    }

    fn window(offset: i64, limit: i64) -> ChunkWindow {
        ChunkWindow::new(offset, limit)
    }

    #[test]
    fn test_row_text() {
        let row = vec![Cell::Int(1), "alice".into(), Cell::Null];
        assert_eq!(row_text(&row), "(1,alice,)");
    }

    #[test]
    fn test_row_text_quotes_like_record_output() {
        let row = vec![
            Cell::from("a,b"),
            Cell::from(""),
            Cell::from("say \"hi\""),
            Cell::from("x y"),
            Cell::Int(-3),
        ];
        assert_eq!(row_text(&row), r#"("a,b","","say ""hi""","x y",-3)"#);
    }

    #[tokio::test]
    async fn test_digest_separates_cell_boundaries_and_null() {
        let table = TargetTable::new("public", "t").with_primary_key(vec!["id".into()]);
        let digest = |cells: Vec<Cell>| {
            let table = table.clone();
            async move {
                let source = MemorySource::new("first");
                let mut row = vec![Cell::Int(1)];
                row.extend(cells);
                source
                    .add_table(
                        "public",
                        "t",
                        MemoryTable::new(&["id", "a", "b"]).primary_key(&["id"]).row(row),
                    )
                    .unwrap();
                source.chunk_digest(&table, window(0, 10)).await.unwrap()
            }
        };

        let left = digest(vec!["a,b".into(), "c".into()]).await;
        let right = digest(vec!["a".into(), "b,c".into()]).await;
        assert_ne!(left, right);

        let null = digest(vec![Cell::Null, "c".into()]).await;
        let empty = digest(vec!["".into(), "c".into()]).await;
        assert_ne!(null, empty);
    }

    #[test]
    fn test_ordered_rows_uses_natural_integer_order() {
        let table = users();
        let rows = table.ordered_rows(&["id".to_string()]).unwrap();
        let ids: Vec<&Cell> = rows.iter().map(|r| &r[0]).collect();
        assert_eq!(ids, vec![&Cell::Int(1), &Cell::Int(2), &Cell::Int(10)]);
    }

    #[tokio::test]
    async fn test_digest_is_idempotent_and_storage_order_independent() {
        let first = MemorySource::new("first");
        let second = MemorySource::new("second");
        first.add_table("public", "users", users()).unwrap();

        let mut reversed = users();
        reversed.rows.reverse();
        second.add_table("public", "users", reversed).unwrap();

        let table = TargetTable::new("public", "users").with_primary_key(vec!["id".into()]);

        let a1 = first.chunk_digest(&table, window(0, 10)).await.unwrap();
        let a2 = first.chunk_digest(&table, window(0, 10)).await.unwrap();
        let b = second.chunk_digest(&table, window(0, 10)).await.unwrap();

        assert!(!a1.is_empty());
        assert_eq!(a1, a2);
        assert_eq!(a1, b);
        assert_eq!(first.digest_queries(), 2);
    }

    #[tokio::test]
    async fn test_digest_detects_cell_and_window_changes() {
        let source = MemorySource::new("first");
        source.add_table("public", "users", users()).unwrap();
        let table = TargetTable::new("public", "users").with_primary_key(vec!["id".into()]);

        let before = source.chunk_digest(&table, window(0, 2)).await.unwrap();
        let shorter = source.chunk_digest(&table, window(0, 1)).await.unwrap();
        assert_ne!(before, shorter);

        source
            .with_table("public", "users", |t| t.rows[2][1] = "alicia".into())
            .unwrap();
        let after = source.chunk_digest(&table, window(0, 2)).await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_window_beyond_end_is_empty() {
        let source = MemorySource::new("first");
        source.add_table("public", "users", users()).unwrap();
        let table = TargetTable::new("public", "users").with_primary_key(vec!["id".into()]);

        let digest = source.chunk_digest(&table, window(3, 2)).await.unwrap();
        assert!(digest.is_empty());
    }

    #[tokio::test]
    async fn test_missing_relation_aborts_until_rollback() {
        let source = MemorySource::new("second");
        source.set_sequence("public", "users_id_seq", 5).unwrap();

        let err = source
            .sequence_last_value("public", "orders_id_seq")
            .await
            .unwrap_err();
        assert!(err.is_missing());
        assert!(source.is_aborted());

        let err = source
            .sequence_last_value("public", "users_id_seq")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transaction is aborted"));

        source.rollback().await.unwrap();
        assert_eq!(
            source
                .sequence_last_value("public", "users_id_seq")
                .await
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_max_value_and_catalog() {
        let source = MemorySource::new("first");
        source.add_table("public", "users", users()).unwrap();
        source.add_schema("archive").unwrap();

        let table = TargetTable::new("public", "users");
        assert_eq!(source.max_value(&table, "id").await.unwrap(), 10);
        assert_eq!(source.list_tables("public").await.unwrap(), vec!["users"]);
        assert!(source.schema_exists("archive").await.unwrap());
        assert!(!source.schema_exists("missing").await.unwrap());
    }
}

//! Materialized result sets and their cursors.
//!
//! A [`ResultSnapshot`] is the immutable, fully materialized output of one
//! query execution. It is shared through `Arc` (the query cache hands the same
//! snapshot to every caller) while each [`ResultSet`] carries its own cursor
//! position, so advancing one cursor never moves another.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{FolioError, Result};
use crate::value::{JoinKey, Value};

/// Column names of a result set, with a name → index lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema. When a name repeats, lookups resolve to its first position.
    pub fn new(columns: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Self { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// The immutable rows of one executed query.
#[derive(Debug)]
pub struct ResultSnapshot {
    schema: Arc<Schema>,
    rows: Vec<Vec<Value>>,
    /// Join key → first row index, per column. Built on first keyed lookup.
    key_indexes: Vec<OnceLock<HashMap<JoinKey, usize>>>,
}

impl ResultSnapshot {
    /// Create a snapshot. Every row must have exactly one value per column.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != schema.len())
        {
            return Err(FolioError::InvalidParameters(format!(
                "row {} has {} values but the schema has {} columns",
                i,
                row.len(),
                schema.len()
            )));
        }
        let key_indexes = (0..schema.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            schema: Arc::new(schema),
            rows,
            key_indexes,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of the first row whose `column` is join-equal to `key`.
    pub fn find_first(&self, column: usize, key: &JoinKey) -> Option<usize> {
        let index = self.key_indexes.get(column)?.get_or_init(|| {
            let mut index = HashMap::new();
            for (i, row) in self.rows.iter().enumerate() {
                if let Some(k) = row[column].join_key() {
                    index.entry(k).or_insert(i);
                }
            }
            index
        });
        index.get(key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    BeforeStart,
    At(usize),
    Exhausted,
}

/// A forward cursor over a shared snapshot.
#[derive(Debug, Clone)]
pub struct ResultSet {
    snapshot: Arc<ResultSnapshot>,
    position: Position,
}

impl ResultSet {
    pub fn new(snapshot: Arc<ResultSnapshot>) -> Self {
        Self {
            snapshot,
            position: Position::BeforeStart,
        }
    }

    pub fn snapshot(&self) -> &Arc<ResultSnapshot> {
        &self.snapshot
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.snapshot.schema()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn row_count(&self) -> usize {
        self.snapshot.row_count()
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn next(&mut self) -> bool {
        let next = match self.position {
            Position::BeforeStart => 0,
            Position::At(i) => i + 1,
            Position::Exhausted => return false,
        };
        if next < self.snapshot.row_count() {
            self.position = Position::At(next);
            true
        } else {
            self.position = Position::Exhausted;
            false
        }
    }

    /// Move back before the first row.
    pub fn reset(&mut self) {
        self.position = Position::BeforeStart;
    }

    /// Jump to `row`; out-of-range rows exhaust the cursor.
    pub fn seek(&mut self, row: usize) {
        self.position = if row < self.snapshot.row_count() {
            Position::At(row)
        } else {
            Position::Exhausted
        };
    }

    /// Leave the cursor without a current row ("no data").
    pub fn exhaust(&mut self) {
        self.position = Position::Exhausted;
    }

    pub fn is_done(&self) -> bool {
        self.position == Position::Exhausted
    }

    pub fn current(&self) -> Option<&[Value]> {
        match self.position {
            Position::At(i) => self.snapshot.rows.get(i).map(|r| r.as_slice()),
            _ => None,
        }
    }

    /// Value of `column` in the current row; `Null` when there is no current row.
    pub fn value_at(&self, column: usize) -> &Value {
        self.current()
            .and_then(|row| row.get(column))
            .unwrap_or(&Value::Null)
    }

    /// Value of the named column in the current row.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.schema().index_of(name).map(|i| self.value_at(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Arc<ResultSnapshot> {
        Arc::new(
            ResultSnapshot::new(
                Schema::new(vec!["id".to_string(), "name".to_string()]),
                vec![
                    vec![Value::text("1"), Value::text("A")],
                    vec![Value::text("2"), Value::text("B")],
                    vec![Value::text("2"), Value::text("B2")],
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_forward_iteration_and_reset() {
        let mut rs = ResultSet::new(snapshot());
        assert_eq!(rs.position(), Position::BeforeStart);
        assert!(rs.current().is_none());

        let mut names = Vec::new();
        while rs.next() {
            names.push(rs.field("name").unwrap().to_string());
        }
        assert_eq!(names, vec!["A", "B", "B2"]);
        assert!(rs.is_done());
        assert!(!rs.next());

        rs.reset();
        assert!(rs.next());
        assert_eq!(rs.field("id"), Some(&Value::text("1")));
    }

    #[test]
    fn test_missing_row_reads_null() {
        let mut rs = ResultSet::new(snapshot());
        assert_eq!(rs.field("name"), Some(&Value::Null));
        rs.exhaust();
        assert_eq!(rs.field("name"), Some(&Value::Null));
        assert_eq!(rs.field("nope"), None);
    }

    #[test]
    fn test_cursors_are_independent() {
        let snap = snapshot();
        let mut a = ResultSet::new(Arc::clone(&snap));
        let mut b = ResultSet::new(snap);
        a.next();
        a.next();
        b.next();
        assert_eq!(a.field("name"), Some(&Value::text("B")));
        assert_eq!(b.field("name"), Some(&Value::text("A")));
    }

    #[test]
    fn test_find_first_returns_first_match() {
        let snap = snapshot();
        let key = Value::Number(2.0).join_key().unwrap();
        assert_eq!(snap.find_first(0, &key), Some(1));
        let missing = Value::text("9").join_key().unwrap();
        assert_eq!(snap.find_first(0, &missing), None);
        assert_eq!(snap.find_first(7, &key), None);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = ResultSnapshot::new(
            Schema::new(vec!["a".to_string(), "b".to_string()]),
            vec![vec![Value::Null]],
        )
        .unwrap_err();
        assert!(matches!(err, FolioError::InvalidParameters(_)));
    }

    #[test]
    fn test_seek_out_of_range_exhausts() {
        let mut rs = ResultSet::new(snapshot());
        rs.seek(1);
        assert_eq!(rs.field("name"), Some(&Value::text("B")));
        rs.seek(10);
        assert!(rs.is_done());
    }
}

//! In-memory tables returned by the read paths.
//!
//! A [`Table`] is an ordered column list plus rows of JSON values. Typed
//! records are converted into tables at the edge so callers can work with
//! the dynamic columns produced by parameter flattening.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::record::Record;

/// Ordered collection of uniformly shaped rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Table with the given columns and no rows.
    pub fn empty<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// One row per record, columns in [`Record::COLUMNS`] order.
    pub fn from_records<R: Record>(records: &[R]) -> StoreResult<Self> {
        let mut table = Self::empty(R::COLUMNS);
        for record in records {
            let value = serde_json::to_value(record).map_err(|e| StoreError::InvalidRecord {
                message: format!("failed to convert record: {e}"),
            })?;
            let Value::Object(mut fields) = value else {
                return Err(StoreError::InvalidRecord {
                    message: "record did not serialize to an object".to_string(),
                });
            };
            let row = R::COLUMNS
                .iter()
                .map(|col| fields.remove(*col).unwrap_or(Value::Null))
                .collect();
            table.rows.push(row);
        }
        Ok(table)
    }

    /// Concatenate tables row-wise.
    ///
    /// The result has the union of all columns in first-seen order; cells a
    /// table does not have are `null`.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Self {
        let mut out = Table::default();
        for table in tables {
            let positions: Vec<usize> = table
                .columns
                .iter()
                .map(|col| out.ensure_column(col))
                .collect();
            for row in table.rows {
                let mut full = vec![Value::Null; out.columns.len()];
                for (value, &pos) in row.into_iter().zip(&positions) {
                    full[pos] = value;
                }
                out.rows.push(full);
            }
        }
        out
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Append a row. Short rows are padded with `null`.
    pub fn push_row(&mut self, mut row: Vec<Value>) -> StoreResult<()> {
        if row.len() > self.columns.len() {
            return Err(StoreError::InvalidRecord {
                message: format!(
                    "row has {} cells but table has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
        Ok(())
    }

    /// Replace a column of JSON objects with one column per leaf key.
    ///
    /// String cells are parsed as JSON; `null` and empty strings count as an
    /// empty object. Nested objects flatten to `.`-joined keys. New columns
    /// are appended in first-seen order. A flattened key that collides with a
    /// column already in the table is renamed `{name}.{key}`.
    ///
    /// Two leaves of one cell that land on the same column are an error,
    /// e.g. `{"a": {"b": 1}, "a.b": 2}`, or `{"email": .., "parameters.email": ..}`
    /// when `email` is already a column.
    ///
    /// Missing column is a no-op.
    pub fn flatten_json_column(&mut self, name: &str) -> StoreResult<()> {
        let Some(idx) = self.column_index(name) else {
            return Ok(());
        };

        self.columns.remove(idx);
        let mut flattened = Vec::with_capacity(self.rows.len());
        for row in &mut self.rows {
            let cell = row.remove(idx);
            let mut leaves = Vec::new();
            flatten_into(&mut leaves, None, as_object(name, cell)?);
            flattened.push(leaves);
        }

        let base_columns = self.columns.len();
        for (row, leaves) in self.rows.iter_mut().zip(flattened) {
            let mut written = HashSet::new();
            for (key, value) in leaves {
                let column = if self.columns[..base_columns].contains(&key) {
                    format!("{name}.{key}")
                } else {
                    key
                };
                let taken = self.columns[..base_columns].contains(&column);
                if taken || !written.insert(column.clone()) {
                    return Err(StoreError::InvalidRecord {
                        message: format!("{name} has more than one value for column {column}"),
                    });
                }
                let pos = match self.columns.iter().position(|c| *c == column) {
                    Some(pos) => pos,
                    None => {
                        self.columns.push(column);
                        self.columns.len() - 1
                    }
                };
                if row.len() <= pos {
                    row.resize(pos + 1, Value::Null);
                }
                row[pos] = value;
            }
        }

        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, Value::Null);
        }
        Ok(())
    }

    /// Serialize as CSV with a header row.
    ///
    /// Strings are written raw, `null` as an empty cell, anything else as
    /// JSON text.
    pub fn to_csv(&self) -> StoreResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|e| StoreError::csv("table", e))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(cell_text))
                .map_err(|e| StoreError::csv("table", e))?;
        }
        let buf = writer.into_inner().map_err(|e| StoreError::Io {
            message: format!("failed to flush CSV: {e}"),
        })?;
        String::from_utf8(buf).map_err(|e| StoreError::Io {
            message: format!("CSV output is not UTF-8: {e}"),
        })
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(pos) = self.column_index(name) {
            return pos;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }
}

fn as_object(column: &str, cell: Value) -> StoreResult<Map<String, Value>> {
    let parsed = match cell {
        Value::String(text) if text.trim().is_empty() => Value::Null,
        Value::String(text) => {
            serde_json::from_str(&text).map_err(|e| StoreError::InvalidRecord {
                message: format!("column '{column}' holds invalid JSON: {e}"),
            })?
        }
        other => other,
    };
    match parsed {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(StoreError::InvalidRecord {
            message: format!("column '{column}' holds a non-object value: {other}"),
        }),
    }
}

fn flatten_into(out: &mut Vec<(String, Value)>, prefix: Option<&str>, map: Map<String, Value>) {
    for (key, value) in map {
        let full = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&full), inner),
            other => out.push((full, other)),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AnswerRecord;
    use serde_json::json;

    fn params_table(cells: Vec<Value>) -> Table {
        let mut table = Table::empty(&["email", "parameters"]);
        for (i, cell) in cells.into_iter().enumerate() {
            table
                .push_row(vec![json!(format!("u{i}@x.com")), cell])
                .unwrap();
        }
        table
    }

    #[test]
    fn test_from_records_uses_canonical_columns() {
        let rec = AnswerRecord::new("a@x.com", 5, "yes", "none", 40);
        let table = Table::from_records(&[rec]).unwrap();
        assert_eq!(table.columns(), AnswerRecord::COLUMNS);
        assert_eq!(table.get(0, "question_number"), Some(&json!(5)));
        assert_eq!(table.get(0, "answer"), Some(&json!("yes")));
    }

    #[test]
    fn test_flatten_parses_json_text() {
        let mut table = params_table(vec![json!(r#"{"temperature": 0.7, "max_tokens": 64}"#)]);
        table.flatten_json_column("parameters").unwrap();
        assert_eq!(table.columns(), ["email", "temperature", "max_tokens"]);
        assert_eq!(table.get(0, "temperature"), Some(&json!(0.7)));
        assert_eq!(table.get(0, "max_tokens"), Some(&json!(64)));
    }

    #[test]
    fn test_flatten_union_of_keys() {
        let mut table = params_table(vec![
            json!(r#"{"temperature": 0.2}"#),
            json!(r#"{"top_p": 0.9}"#),
            Value::Null,
        ]);
        table.flatten_json_column("parameters").unwrap();
        assert_eq!(table.columns(), ["email", "temperature", "top_p"]);
        assert_eq!(table.get(0, "top_p"), Some(&Value::Null));
        assert_eq!(table.get(1, "temperature"), Some(&Value::Null));
        assert_eq!(table.get(1, "top_p"), Some(&json!(0.9)));
        assert_eq!(table.rows()[2], vec![json!("u2@x.com"), Value::Null, Value::Null]);
    }

    #[test]
    fn test_flatten_nested_and_collision() {
        let mut table = params_table(vec![json!(
            r#"{"email": "shadow", "sampling": {"top_k": 5, "seed": null}}"#
        )]);
        table.flatten_json_column("parameters").unwrap();
        assert_eq!(
            table.columns(),
            ["email", "parameters.email", "sampling.top_k", "sampling.seed"]
        );
        assert_eq!(table.get(0, "email"), Some(&json!("u0@x.com")));
        assert_eq!(table.get(0, "parameters.email"), Some(&json!("shadow")));
        assert_eq!(table.get(0, "sampling.top_k"), Some(&json!(5)));
    }

    #[test]
    fn test_flatten_dotted_key_clash_rejected() {
        let mut table = params_table(vec![json!(r#"{"a": {"b": 1}, "a.b": 2}"#)]);
        let err = table.flatten_json_column("parameters").unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[test]
    fn test_flatten_renamed_key_clash_rejected() {
        let mut table = params_table(vec![json!(
            r#"{"email": "shadow", "parameters.email": "other"}"#
        )]);
        let err = table.flatten_json_column("parameters").unwrap_err();
        assert!(err.to_string().contains("parameters.email"));

        // Same key in different rows is fine
        let mut table = params_table(vec![json!(r#"{"a.b": 1}"#), json!(r#"{"a": {"b": 2}}"#)]);
        table.flatten_json_column("parameters").unwrap();
        assert_eq!(table.columns(), ["email", "a.b"]);
        assert_eq!(table.get(1, "a.b"), Some(&json!(2)));
    }

    #[test]
    fn test_flatten_rejects_non_object() {
        let mut table = params_table(vec![json!("[1, 2]")]);
        let err = table.flatten_json_column("parameters").unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[test]
    fn test_flatten_missing_column_is_noop() {
        let mut table = Table::empty(&["email"]);
        table.flatten_json_column("parameters").unwrap();
        assert_eq!(table.columns(), ["email"]);
    }

    #[test]
    fn test_concat_aligns_columns() {
        let mut a = Table::empty(&["email", "x"]);
        a.push_row(vec![json!("a"), json!(1)]).unwrap();
        let mut b = Table::empty(&["y", "email"]);
        b.push_row(vec![json!(true), json!("b")]).unwrap();

        let all = Table::concat([a, b]);
        assert_eq!(all.columns(), ["email", "x", "y"]);
        assert_eq!(all.rows()[0], vec![json!("a"), json!(1), Value::Null]);
        assert_eq!(all.rows()[1], vec![json!("b"), Value::Null, json!(true)]);
    }

    #[test]
    fn test_push_row_too_wide() {
        let mut table = Table::empty(&["a"]);
        assert!(table.push_row(vec![json!(1), json!(2)]).is_err());
        table.push_row(vec![]).unwrap();
        assert_eq!(table.rows()[0], vec![Value::Null]);
    }

    #[test]
    fn test_to_csv() {
        let mut table = Table::empty(&["email", "temperature", "note"]);
        table
            .push_row(vec![json!("a@x.com"), json!(0.7), json!("hi, there")])
            .unwrap();
        table.push_row(vec![json!("b@x.com")]).unwrap();
        assert_eq!(
            table.to_csv().unwrap(),
            "email,temperature,note\na@x.com,0.7,\"hi, there\"\nb@x.com,,\n"
        );
    }

    #[test]
    fn test_column_iter() {
        let mut table = Table::empty(&["question_number"]);
        table.push_row(vec![json!(2)]).unwrap();
        table.push_row(vec![json!(7)]).unwrap();
        let max = table
            .column("question_number")
            .unwrap()
            .filter_map(Value::as_i64)
            .max();
        assert_eq!(max, Some(7));
        assert!(table.column("missing").is_none());
    }
}

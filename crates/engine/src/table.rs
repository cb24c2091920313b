use crate::error::TableError;
use crate::value::{ColumnType, Value};

/// An in-memory table: ordered named columns over rows of typed cells.
///
/// Every row has exactly `columns().len()` cells. Column names are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self { columns, rows: Vec::new() })
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |r| &r[col])
    }

    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Value]) -> bool) {
        self.rows.retain(|r| keep(r));
    }

    pub fn for_each_in_column(&mut self, col: usize, mut f: impl FnMut(&mut Value)) {
        for row in &mut self.rows {
            f(&mut row[col]);
        }
    }

    /// Append a column. `values` must have one entry per row.
    pub fn add_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), TableError> {
        if self.column_index(name).is_some() {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.rows.len() {
            return Err(TableError::RowWidth {
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Rename a column in place. Returns `false` if `from` does not exist.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<bool, TableError> {
        let Some(idx) = self.column_index(from) else {
            return Ok(false);
        };
        if from != to && self.column_index(to).is_some() {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        self.columns[idx] = to.to_string();
        Ok(true)
    }

    /// Keep the named columns that exist, in the given order.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let mut picked: Vec<(String, usize)> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if let Some(idx) = self.column_index(name) {
                if !picked.iter().any(|(n, _)| n == name) {
                    picked.push((name.to_string(), idx));
                }
            }
        }
        let rows = self
            .rows
            .iter()
            .map(|r| picked.iter().map(|(_, i)| r[*i].clone()).collect())
            .collect();
        Table {
            columns: picked.into_iter().map(|(n, _)| n).collect(),
            rows,
        }
    }

    /// Infer a column's logical type. A column whose non-empty cells are all
    /// numbers is numeric, all dates is a date column; anything else (mixed
    /// or entirely empty) is text.
    pub fn column_type(&self, col: usize) -> ColumnType {
        let mut numbers = 0usize;
        let mut dates = 0usize;
        let mut other = 0usize;
        for value in self.column_values(col) {
            match value {
                Value::Empty => {}
                Value::Number(n) if n.is_nan() => {}
                Value::Number(_) => numbers += 1,
                Value::Date(_) => dates += 1,
                Value::Text(_) => other += 1,
            }
        }
        match (numbers, dates, other) {
            (n, 0, 0) if n > 0 => ColumnType::Number,
            (0, d, 0) if d > 0 => ColumnType::Date,
            _ => ColumnType::Text,
        }
    }

    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        (0..self.columns.len())
            .map(|i| (self.columns[i].clone(), self.column_type(i)))
            .collect()
    }

    /// Number of empty cells per column, in column order.
    pub fn empty_counts(&self) -> Vec<(String, usize)> {
        (0..self.columns.len())
            .map(|i| {
                let n = self.column_values(i).filter(|v| v.is_empty()).count();
                (self.columns[i].clone(), n)
            })
            .collect()
    }
}

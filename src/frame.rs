//! Columnar, time-indexed tables.
//!
//! A [`Frame`] is the unit of data the cache stores and returns: a time index
//! plus any number of named columns of equal length.

use crate::{DfCacheError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name given to the time index when none is set.
pub const DEFAULT_INDEX_NAME: &str = "time";

/// The type of values a column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Float,
    Text,
}

/// A single column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    /// Returns the kind of values stored in the column.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Float(_) => ColumnKind::Float,
            Column::Text(_) => ColumnKind::Text,
        }
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    /// Returns true if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a new column with the values at `rows`, in that order.
    pub fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Float(values) => Column::Float(rows.iter().map(|&i| values[i]).collect()),
            Column::Text(values) => Column::Text(rows.iter().map(|&i| values[i].clone()).collect()),
        }
    }

    fn empty_like(&self) -> Column {
        match self {
            Column::Float(_) => Column::Float(Vec::new()),
            Column::Text(_) => Column::Text(Vec::new()),
        }
    }

    /// Appends `other` to this column. Returns false if the kinds differ.
    fn extend_from(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => {
                a.extend_from_slice(b);
                true
            }
            (Column::Text(a), Column::Text(b)) => {
                a.extend(b.iter().cloned());
                true
            }
            _ => false,
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::Float(values)
    }
}

impl From<Vec<String>> for Column {
    fn from(values: Vec<String>) -> Self {
        Column::Text(values)
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::Text(values.into_iter().map(str::to_string).collect())
    }
}

/// A time-indexed table with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index_name: String,
    index: Vec<Timestamp>,
    columns: Vec<(String, Column)>,
}

impl Frame {
    /// Creates a frame with the given index and no columns.
    pub fn new(index: Vec<Timestamp>) -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            index,
            columns: Vec::new(),
        }
    }

    /// Assembles a frame from already-validated parts.
    pub(crate) fn from_parts(
        index_name: String,
        index: Vec<Timestamp>,
        columns: Vec<(String, Column)>,
    ) -> Result<Self> {
        let mut frame = Self {
            index_name,
            index,
            columns: Vec::with_capacity(columns.len()),
        };
        for (name, column) in columns {
            frame.insert_column(name, column)?;
        }
        Ok(frame)
    }

    /// Sets the name of the time index.
    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = name.into();
        self
    }

    /// Adds (or replaces) a column.
    pub fn with_column(mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<Self> {
        self.insert_column(name, column)?;
        Ok(self)
    }

    /// Adds a column, replacing any existing column of the same name.
    pub fn insert_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();

        if column.len() != self.index.len() {
            return Err(DfCacheError::ColumnLength {
                column: name,
                expected: self.index.len(),
                actual: column.len(),
            });
        }

        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = column;
        } else {
            self.columns.push((name, column));
        }
        Ok(())
    }

    /// Returns a frame with the same schema and no rows.
    pub fn empty_like(&self) -> Self {
        Self {
            index_name: self.index_name.clone(),
            index: Vec::new(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.empty_like()))
                .collect(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The time index.
    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
            .ok_or_else(|| DfCacheError::MissingColumn {
                column: name.to_string(),
            })
    }

    /// Looks up a numeric column by name.
    pub fn float_column(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Float(values) => Ok(values),
            other => Err(DfCacheError::ColumnType {
                column: name.to_string(),
                expected: ColumnKind::Float,
                actual: other.kind(),
            }),
        }
    }

    /// Looks up a text column by name.
    pub fn text_column(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Text(values) => Ok(values),
            other => Err(DfCacheError::ColumnType {
                column: name.to_string(),
                expected: ColumnKind::Text,
                actual: other.kind(),
            }),
        }
    }

    /// Timestamp of the first row.
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.index.first().copied()
    }

    /// Timestamp of the last row.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.index.last().copied()
    }

    /// Returns true if the index is in ascending order.
    pub fn is_sorted(&self) -> bool {
        self.index.windows(2).all(|w| w[0] <= w[1])
    }

    /// Returns a new frame with the rows at `rows`, in that order.
    pub fn take(&self, rows: &[usize]) -> Frame {
        Frame {
            index_name: self.index_name.clone(),
            index: rows.iter().map(|&i| self.index[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.take(rows)))
                .collect(),
        }
    }

    /// Keeps rows whose timestamp lies in `[start, end]`.
    pub fn filter_range(&self, start: Timestamp, end: Timestamp) -> Frame {
        let rows: Vec<usize> = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, t)| **t >= start && **t <= end)
            .map(|(i, _)| i)
            .collect();
        self.take(&rows)
    }

    /// Returns the frame stably sorted by the time index.
    pub fn sort_by_index(&self) -> Frame {
        if self.is_sorted() {
            return self.clone();
        }
        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.sort_by_key(|&i| self.index[i]);
        self.take(&rows)
    }

    /// Concatenates frames that share one schema. Returns `None` when given no frames.
    pub fn concat<I>(frames: I) -> Result<Option<Frame>>
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut frames = frames.into_iter();
        let Some(mut out) = frames.next() else {
            return Ok(None);
        };

        for frame in frames {
            if frame.columns.len() != out.columns.len() {
                return Err(DfCacheError::SchemaMismatch(format!(
                    "expected {} columns, found {}",
                    out.columns.len(),
                    frame.columns.len()
                )));
            }

            for ((name, column), (other_name, other)) in
                out.columns.iter_mut().zip(frame.columns.iter())
            {
                if name != other_name {
                    return Err(DfCacheError::SchemaMismatch(format!(
                        "expected column '{name}', found '{other_name}'"
                    )));
                }
                if !column.extend_from(other) {
                    return Err(DfCacheError::SchemaMismatch(format!(
                        "column '{name}' is {:?} in one frame and {:?} in another",
                        column.kind(),
                        other.kind()
                    )));
                }
            }
            out.index.extend_from_slice(&frame.index);
        }

        Ok(Some(out))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.column_names().collect();
        write!(
            f,
            "Frame(rows: {}, index: {}, columns: [{}])",
            self.len(),
            self.index_name,
            names.join(", ")
        )
    }
}

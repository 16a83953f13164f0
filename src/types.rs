//! Core data model types.
//!
//! Datasets are header-first tables: the [`Schema`] is the ordered list of column names and every
//! cell is a dynamically typed [`Value`] inferred from its text.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

/// Ordered list of column names describing the shape of a [`DataSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Column names, in order.
    pub columns: Vec<String>,
}

impl Schema {
    /// Create a schema from column names.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Iterate column names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// True if the schema has a column named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Infer a typed value from raw CSV text.
    ///
    /// Empty text (after trimming) and `NaN` become [`Value::Null`]; integers, floats and
    /// `true`/`false` (any case) are recognised; everything else stays a string.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Int64(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return if v.is_nan() { Self::Null } else { Self::Float64(v) };
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        Self::Utf8(trimmed.to_owned())
    }

    /// True for [`Value::Null`] and NaN floats.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the value (bools count as 0/1).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int64(_) => "int",
            Self::Float64(_) => "float",
            Self::Bool(_) => "bool",
            Self::Utf8(_) => "string",
        }
    }
}

/// Renders the value as it is written to CSV (null is the empty string).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) if v.is_nan() => Ok(()),
            // Debug keeps a trailing `.0` on integral floats so they re-read as floats.
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Utf8(s) => f.write_str(s),
        }
    }
}

/// Serializes as the matching JSON scalar; null and NaN become `null`.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::Float64(v) if v.is_nan() => serializer.serialize_none(),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Utf8(s) => serializer.serialize_str(s),
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

/// A bounded slice of an input dataset, processed as one independent unit.
pub type DataChunk = DataSet;

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// A dataset with the given schema and no rows.
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True if the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy out one column by index. Short rows yield [`Value::Null`].
    pub fn column_values(&self, idx: usize) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(idx).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Copy out one column by name.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        self.schema.index_of(name).map(|idx| self.column_values(idx))
    }

    /// Set column `name` to `values`, replacing it in place if it exists or appending it.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` differs from the row count.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        assert!(
            values.len() == self.rows.len(),
            "column length {} does not match row count {}",
            values.len(),
            self.rows.len()
        );
        match self.schema.index_of(name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.schema.columns.push(name.to_owned());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
    }

    /// Concatenate datasets row-wise.
    ///
    /// The result schema is the union of all input schemas in first-seen order; columns a part
    /// does not have are filled with [`Value::Null`].
    pub fn concat<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = DataSet>,
    {
        let parts: Vec<DataSet> = parts.into_iter().collect();

        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for part in &parts {
            for name in &part.schema.columns {
                if !positions.contains_key(name) {
                    positions.insert(name.clone(), columns.len());
                    columns.push(name.clone());
                }
            }
        }

        let width = columns.len();
        let total = parts.iter().map(DataSet::row_count).sum();
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(total);
        for part in parts {
            if part.schema.columns == columns {
                rows.extend(part.rows);
                continue;
            }
            let mapping: Vec<usize> = part.schema.columns.iter().map(|c| positions[c]).collect();
            for row in part.rows {
                let mut out = vec![Value::Null; width];
                for (v, &dst) in row.into_iter().zip(mapping.iter()) {
                    out[dst] = v;
                }
                rows.push(out);
            }
        }

        Self::new(Schema { columns }, rows)
    }
}

//! Column-oriented tables
//!
//! The whole pipeline moves data as [`Table`] values: an ordered list of
//! named columns over a small closed set of physical types
//! (`Int64 | Float64 | Bool | String | Timestamp`), each carrying its own
//! null mask (`Vec<Option<T>>`). Rows are a *view*, not a storage format.
//!
//! ## Invariants
//!
//! - Every column in a table has the same length; [`Table::push_column`]
//!   rejects anything else.
//! - Column names are unique and column order is preserved end-to-end.
//!   Order matters on the HTTP wire, where each row is serialized as a
//!   name→value object in column order.
//! - A column never mixes physical types. The only permitted promotion at
//!   ingest is int→float when a column contains both.
//!
//! The comparator dispatches on the *declared* spec dtype, not on the
//! physical column type; [`Value`] carries the coercion accessors
//! (`as_f64`, `coerce_str`, `as_timestamp`) that bridge the two.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Errors surfaced while building or reshaping tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A column contained two incompatible physical types.
    #[error("column `{column}` mixes {first} and {second} values")]
    MixedColumn {
        /// Offending column name.
        column: String,
        /// Type of the first value seen.
        first: &'static str,
        /// Type of the incompatible value.
        second: &'static str,
    },
    /// A pushed column did not match the table's row count.
    #[error("column `{column}` has {len} rows, expected {expected}")]
    LengthMismatch {
        /// Offending column name.
        column: String,
        /// Length of the pushed column.
        len: usize,
        /// Row count already established by the table.
        expected: usize,
    },
    /// Two columns were pushed under the same name.
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
    /// A JSON row was not an object.
    #[error("row {row} is not a JSON object")]
    NotAnObject {
        /// Zero-based row index.
        row: usize,
    },
    /// A JSON cell held a nested array/object, which has no column type.
    #[error("unsupported JSON value in column `{column}` at row {row}")]
    UnsupportedJson {
        /// Offending column name.
        column: String,
        /// Zero-based row index.
        row: usize,
    },
    /// A projection referenced a column the table does not have.
    #[error("missing column `{0}`")]
    MissingColumn(String),
}

// ============================================================================
// Scalar values
// ============================================================================

/// A single cell: one of the closed set of scalar types, or null.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Missing value.
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Instant, normalized to UTC.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// True for `Value::Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view: ints widen to `f64`, everything else is `None`.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Timestamp view. Strings are parsed (RFC 3339 first, then the common
    /// naive layouts); naive datetimes are interpreted as UTC.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Str(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// String rendering used by string/category comparison. Non-null scalars
    /// of any type render to their canonical text form.
    pub fn coerce_str(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }

    /// Total order over values, used to sort key tuples canonically.
    ///
    /// Values order by type rank (null < bool < numeric < string <
    /// timestamp), then within the rank. `Int` and `Float` share the
    /// numeric rank and compare by value, so a key that arrives as `1`
    /// from one producer and `1.0` from the other still pairs up.
    pub fn key_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Str(_) => 3,
                Value::Timestamp(_) => 4,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                // Mixed int/float: compare as f64 with a total order.
                let fa = a.as_f64().unwrap_or(f64::NAN);
                let fb = b.as_f64().unwrap_or(f64::NAN);
                fa.total_cmp(&fb)
            }
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// JSON rendering for the HTTP wire and the report. Non-finite floats
    /// have no JSON number form and serialize as null.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => {
                if f.is_finite() {
                    JsonValue::from(*f)
                } else {
                    JsonValue::Null
                }
            }
            Value::Bool(b) => JsonValue::from(*b),
            Value::Str(s) => JsonValue::from(s.clone()),
            Value::Timestamp(ts) => {
                JsonValue::from(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Convert a JSON scalar to a [`Value`]. Numbers become `Int` when
/// exactly representable as `i64`, else `Float`. Nested arrays/objects
/// have no column type and return `None`.
pub fn value_from_json(v: &JsonValue) -> Option<Value> {
    match v {
        JsonValue::Null => Some(Value::Null),
        JsonValue::Bool(b) => Some(Value::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        JsonValue::String(s) => Some(Value::Str(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Parse a timestamp string: RFC 3339, then `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD HH:MM:SS[.f]`, then bare `YYYY-MM-DD`. Naive forms are
/// taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

// ============================================================================
// Columns
// ============================================================================

/// One named column's storage: typed values plus a null mask.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// 64-bit signed integers.
    Int(Vec<Option<i64>>),
    /// 64-bit floats.
    Float(Vec<Option<f64>>),
    /// Booleans.
    Bool(Vec<Option<bool>>),
    /// UTF-8 strings.
    Str(Vec<Option<String>>),
    /// UTC instants.
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl Column {
    /// Number of rows (including nulls).
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Timestamp(v) => v.len(),
        }
    }

    /// True when the column has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell at `row` as a [`Value`]; out-of-range reads are null.
    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Int(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Int),
            Column::Float(v) => {
                v.get(row).copied().flatten().map_or(Value::Null, Value::Float)
            }
            Column::Bool(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Bool),
            Column::Str(v) => v
                .get(row)
                .cloned()
                .flatten()
                .map_or(Value::Null, Value::Str),
            Column::Timestamp(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Timestamp),
        }
    }

    /// Physical type name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int(_) => "int",
            Column::Float(_) => "float",
            Column::Bool(_) => "bool",
            Column::Str(_) => "string",
            Column::Timestamp(_) => "timestamp",
        }
    }

    /// Select the rows named by `idx`, in that order.
    pub fn take(&self, idx: &[usize]) -> Column {
        match self {
            Column::Int(v) => Column::Int(idx.iter().map(|&i| v.get(i).copied().flatten()).collect()),
            Column::Float(v) => {
                Column::Float(idx.iter().map(|&i| v.get(i).copied().flatten()).collect())
            }
            Column::Bool(v) => {
                Column::Bool(idx.iter().map(|&i| v.get(i).copied().flatten()).collect())
            }
            Column::Str(v) => {
                Column::Str(idx.iter().map(|&i| v.get(i).cloned().flatten()).collect())
            }
            Column::Timestamp(v) => {
                Column::Timestamp(idx.iter().map(|&i| v.get(i).copied().flatten()).collect())
            }
        }
    }

    /// A zero-row column of the same physical type.
    pub fn empty_like(&self) -> Column {
        match self {
            Column::Int(_) => Column::Int(Vec::new()),
            Column::Float(_) => Column::Float(Vec::new()),
            Column::Bool(_) => Column::Bool(Vec::new()),
            Column::Str(_) => Column::Str(Vec::new()),
            Column::Timestamp(_) => Column::Timestamp(Vec::new()),
        }
    }

    /// Build a column from row-ordered values, inferring the physical type.
    ///
    /// Inference rules: a column of ints stays `Int`; a mix of ints and
    /// floats promotes to `Float`; any other mix is a
    /// [`TableError::MixedColumn`]. An all-null column becomes `Float`
    /// (nulls only, the least committal numeric form).
    pub fn from_values(name: &str, values: &[Value]) -> Result<Column, TableError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Kind {
            Unset,
            Int,
            Float,
            Bool,
            Str,
            Timestamp,
        }
        fn kind_name(k: Kind) -> &'static str {
            match k {
                Kind::Unset => "null",
                Kind::Int => "int",
                Kind::Float => "float",
                Kind::Bool => "bool",
                Kind::Str => "string",
                Kind::Timestamp => "timestamp",
            }
        }

        let mut kind = Kind::Unset;
        for v in values {
            let vk = match v {
                Value::Null => continue,
                Value::Int(_) => Kind::Int,
                Value::Float(_) => Kind::Float,
                Value::Bool(_) => Kind::Bool,
                Value::Str(_) => Kind::Str,
                Value::Timestamp(_) => Kind::Timestamp,
            };
            kind = match (kind, vk) {
                (Kind::Unset, k) => k,
                (k, j) if k == j => k,
                (Kind::Int, Kind::Float) | (Kind::Float, Kind::Int) => Kind::Float,
                (k, j) => {
                    return Err(TableError::MixedColumn {
                        column: name.to_string(),
                        first: kind_name(k),
                        second: kind_name(j),
                    })
                }
            };
        }

        let col = match kind {
            Kind::Int => Column::Int(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect(),
            ),
            // All-null columns land here too.
            Kind::Float | Kind::Unset => Column::Float(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Some(*i as f64),
                        Value::Float(f) => Some(*f),
                        _ => None,
                    })
                    .collect(),
            ),
            Kind::Bool => Column::Bool(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect(),
            ),
            Kind::Str => Column::Str(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            Kind::Timestamp => Column::Timestamp(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Timestamp(ts) => Some(*ts),
                        _ => None,
                    })
                    .collect(),
            ),
        };
        Ok(col)
    }
}

// ============================================================================
// Tables
// ============================================================================

/// An ordered set of equal-length named columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    cols: Vec<(String, Column)>,
}

impl Table {
    /// An empty table (no columns, no rows).
    pub fn new() -> Table {
        Table { cols: Vec::new() }
    }

    /// Build a table from `(name, column)` pairs, enforcing unique names
    /// and equal lengths.
    pub fn from_columns(
        cols: impl IntoIterator<Item = (String, Column)>,
    ) -> Result<Table, TableError> {
        let mut t = Table::new();
        for (name, col) in cols {
            t.push_column(name, col)?;
        }
        Ok(t)
    }

    /// Append a column. The first column fixes the table's row count.
    pub fn push_column(&mut self, name: String, col: Column) -> Result<(), TableError> {
        if self.cols.iter().any(|(n, _)| *n == name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if !self.cols.is_empty() && col.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                column: name,
                len: col.len(),
                expected: self.num_rows(),
            });
        }
        self.cols.push((name, col));
        Ok(())
    }

    /// Insert a column at `index`, with the same checks as `push_column`.
    pub fn insert_column(
        &mut self,
        index: usize,
        name: String,
        col: Column,
    ) -> Result<(), TableError> {
        if self.cols.iter().any(|(n, _)| *n == name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if !self.cols.is_empty() && col.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                column: name,
                len: col.len(),
                expected: self.num_rows(),
            });
        }
        let index = index.min(self.cols.len());
        self.cols.insert(index, (name, col));
        Ok(())
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.cols.first().map_or(0, |(_, c)| c.len())
    }

    /// Number of columns.
    #[inline]
    pub fn num_columns(&self) -> usize {
        self.cols.len()
    }

    /// True when the table has zero rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.cols.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// True when a column with this name exists.
    #[inline]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.cols.iter().map(|(n, _)| n.as_str())
    }

    /// Select the rows named by `idx` (in that order) across all columns.
    pub fn take(&self, idx: &[usize]) -> Table {
        Table {
            cols: self
                .cols
                .iter()
                .map(|(n, c)| (n.clone(), c.take(idx)))
                .collect(),
        }
    }

    /// A zero-row table with the same columns and physical types.
    pub fn empty_like(&self) -> Table {
        Table {
            cols: self
                .cols
                .iter()
                .map(|(n, c)| (n.clone(), c.empty_like()))
                .collect(),
        }
    }

    /// Project onto the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Table, TableError> {
        let mut t = Table::new();
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| TableError::MissingColumn(name.clone()))?;
            t.push_column(name.clone(), col.clone())?;
        }
        Ok(t)
    }

    /// Row `row` as a name→JSON object preserving column order.
    pub fn json_row(&self, row: usize) -> JsonMap<String, JsonValue> {
        let mut obj = JsonMap::new();
        for (name, col) in &self.cols {
            obj.insert(name.clone(), col.get(row).to_json());
        }
        obj
    }

    /// All rows as JSON objects, preserving column order within each row.
    pub fn to_json_rows(&self) -> Vec<JsonMap<String, JsonValue>> {
        (0..self.num_rows()).map(|i| self.json_row(i)).collect()
    }

    /// Build a table from a JSON array of row objects.
    ///
    /// Column order is first-seen key order across the rows; a key absent
    /// from a row reads as null. Nested arrays/objects are rejected.
    pub fn from_json_rows(rows: &[JsonValue]) -> Result<Table, TableError> {
        let mut names: Vec<String> = Vec::new();
        let mut objects: Vec<&JsonMap<String, JsonValue>> = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let obj = row.as_object().ok_or(TableError::NotAnObject { row: i })?;
            for key in obj.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
            objects.push(obj);
        }

        let mut t = Table::new();
        for name in names {
            let mut values = Vec::with_capacity(objects.len());
            for (i, obj) in objects.iter().enumerate() {
                let v = match obj.get(&name) {
                    None => Value::Null,
                    Some(cell) => value_from_json(cell).ok_or_else(|| {
                        TableError::UnsupportedJson {
                            column: name.clone(),
                            row: i,
                        }
                    })?,
                };
                values.push(v);
            }
            let col = Column::from_values(&name, &values)?;
            t.push_column(name, col)?;
        }
        Ok(t)
    }
}

// ============================================================================
// Tests
// ============================================================================

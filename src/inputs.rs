//! Input loading & deterministic sampling
//!
//! Loads production-shaped sample rows from disk (CSV or a JSON array of
//! row objects) into a [`Table`], and draws reproducible row samples for
//! the runner. Everything here is deterministic: the same
//! `(input, sample, seed)` triple always selects the same rows, which is
//! what makes the check usable as a CI gate.
//!
//! The CSV reader is deliberately small: comma-separated, one header
//! line, no quoting. Per-column types are inferred from the cell texts
//! (int, float, bool, empty-as-null, else string) with int→float
//! promotion handled by the column builder. Ragged rows are rejected with
//! a line-precise diagnostic.

#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::table::{Column, Table, TableError, Value};

/// Failures while loading or sampling input rows.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Reading the input file failed.
    #[error("read input {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file extension names no supported format.
    #[error("unsupported input format: {path} (expected .csv or .json)")]
    UnsupportedFormat {
        /// Offending path.
        path: String,
    },
    /// A CSV data row had a different arity than the header.
    #[error("csv line {line}: expected {expected} fields, got {got}")]
    Ragged {
        /// One-based line number.
        line: usize,
        /// Header arity.
        expected: usize,
        /// Row arity.
        got: usize,
    },
    /// The CSV input had no header line.
    #[error("csv input has no header line")]
    NoHeader,
    /// The JSON input failed to parse.
    #[error("parse json input: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON input parsed but was not an array of row objects.
    #[error("json input must be an array of row objects")]
    NotAnArray,
    /// Column construction failed (mixed types, duplicate names).
    #[error(transparent)]
    Table(#[from] TableError),
    /// `sample = 0` was requested.
    #[error("sample size must be positive")]
    EmptySample,
}

/// Load a tabular input file, dispatching on the extension
/// (`.csv` or `.json`).
pub fn load_input(path: impl AsRef<Path>) -> Result<Table, InputError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("csv") => load_csv_str(&text),
        Some("json") => load_json_str(&text),
        _ => Err(InputError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

/// Parse CSV text into a table. First non-empty line is the header.
pub fn load_csv_str(text: &str) -> Result<Table, InputError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or(InputError::NoHeader)?;
    let names: Vec<String> = header.split(',').map(|t| t.trim().to_string()).collect();

    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
    for (lineno, line) in lines {
        let cells: Vec<&str> = line.split(',').collect();
        if cells.len() != names.len() {
            return Err(InputError::Ragged {
                line: lineno + 1,
                expected: names.len(),
                got: cells.len(),
            });
        }
        for (col, cell) in columns.iter_mut().zip(cells) {
            col.push(infer_cell(cell.trim()));
        }
    }

    let mut table = Table::new();
    for (name, values) in names.into_iter().zip(columns) {
        let col = Column::from_values(&name, &values)?;
        table.push_column(name, col)?;
    }
    Ok(table)
}

/// Parse a JSON array of row objects into a table.
pub fn load_json_str(text: &str) -> Result<Table, InputError> {
    let parsed: serde_json::Value = serde_json::from_str(text)?;
    let rows = parsed.as_array().ok_or(InputError::NotAnArray)?;
    Ok(Table::from_json_rows(rows)?)
}

/// Cell-text type inference for CSV loading.
fn infer_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match cell {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(cell.to_string())
}

/// Draw `sample` rows without replacement, reproducibly in
/// `(input, sample, seed)`.
///
/// `sample = 0` is rejected; `sample ≥ len` returns the input unchanged.
/// Selected rows keep their input order.
pub fn sample_table(table: &Table, sample: usize, seed: u64) -> Result<Table, InputError> {
    if sample == 0 {
        return Err(InputError::EmptySample);
    }
    let n = table.num_rows();
    if sample >= n {
        return Ok(table.clone());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut idx = rand::seq::index::sample(&mut rng, n, sample).into_vec();
    idx.sort_unstable();
    Ok(table.take(&idx))
}

// ============================================================================
// Tests
// ============================================================================

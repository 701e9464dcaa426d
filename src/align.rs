//! Key-based alignment
//!
//! Inner-joins the offline and online feature tables on the spec's key
//! tuple and returns two equally long tables ordered by ascending key
//! tuple, so that row *i* of each side refers to the same entity. The
//! comparator trusts this positional pairing completely.
//!
//! Duplicate key tuples on either side are a hard error rather than a
//! finding: a duplicated key would silently turn the join into a
//! Cartesian product and corrupt every per-feature verdict downstream.
//! Missing key columns are equally fatal.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::table::{Table, Value};

/// Cap on example key tuples reported per side.
pub const MAX_KEY_EXAMPLES: usize = 10;

/// Alignment failures. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum AlignmentError {
    /// A key column named by the spec is absent from one side.
    #[error("{side} table is missing key column `{column}`")]
    MissingKeyColumn {
        /// Which side ("offline" or "online").
        side: &'static str,
        /// The missing column.
        column: String,
    },
    /// The same key tuple appeared twice on one side.
    #[error("duplicate key tuple in {side} table: ({key})")]
    DuplicateKey {
        /// Which side ("offline" or "online").
        side: &'static str,
        /// Rendered key tuple.
        key: String,
    },
}

/// What the join left out on each side: counts plus up to
/// [`MAX_KEY_EXAMPLES`] example key tuples.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AlignmentDiagnostics {
    /// Entities present offline but absent online.
    pub missing_in_online_count: usize,
    /// Entities present online but absent offline.
    pub missing_in_offline_count: usize,
    /// Example key tuples for entities missing online.
    pub missing_in_online_examples: Vec<Vec<Value>>,
    /// Example key tuples for entities missing offline.
    pub missing_in_offline_examples: Vec<Vec<Value>>,
}

/// A row's key values, ordered by the canonical cross-type order of
/// [`Value::key_cmp`].
#[derive(Clone, Debug)]
struct KeyTuple(Vec<Value>);

impl KeyTuple {
    fn render(&self) -> String {
        self.0
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for KeyTuple {
    fn eq(&self, other: &KeyTuple) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for KeyTuple {}

impl PartialOrd for KeyTuple {
    fn partial_cmp(&self, other: &KeyTuple) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for KeyTuple {
    fn cmp(&self, other: &KeyTuple) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.key_cmp(b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Map each row's key tuple to its row index, rejecting duplicates.
fn key_index(
    table: &Table,
    keys: &[String],
    side: &'static str,
) -> Result<BTreeMap<KeyTuple, usize>, AlignmentError> {
    let cols: Vec<_> = keys
        .iter()
        .map(|k| {
            table
                .column(k)
                .ok_or_else(|| AlignmentError::MissingKeyColumn {
                    side,
                    column: k.clone(),
                })
        })
        .collect::<Result<_, _>>()?;

    let mut index = BTreeMap::new();
    for row in 0..table.num_rows() {
        let tuple = KeyTuple(cols.iter().map(|c| c.get(row)).collect());
        if let Some(_prev) = index.insert(tuple.clone(), row) {
            return Err(AlignmentError::DuplicateKey {
                side,
                key: tuple.render(),
            });
        }
    }
    Ok(index)
}

/// Inner-join `offline` and `online` on `keys`.
///
/// Both returned tables are ordered by ascending key tuple and are
/// positionally paired: row *i* on each side is the same entity.
/// Diagnostics report the key tuples present on only one side.
pub fn align_by_keys(
    offline: &Table,
    online: &Table,
    keys: &[String],
) -> Result<(Table, Table, AlignmentDiagnostics), AlignmentError> {
    let off_index = key_index(offline, keys, "offline")?;
    let on_index = key_index(online, keys, "online")?;

    let mut off_rows = Vec::new();
    let mut on_rows = Vec::new();
    let mut diag = AlignmentDiagnostics::default();

    // Both maps iterate in ascending key order, which fixes the canonical
    // row order of the aligned outputs.
    for (tuple, &off_row) in &off_index {
        match on_index.get(tuple) {
            Some(&on_row) => {
                off_rows.push(off_row);
                on_rows.push(on_row);
            }
            None => {
                diag.missing_in_online_count += 1;
                if diag.missing_in_online_examples.len() < MAX_KEY_EXAMPLES {
                    diag.missing_in_online_examples.push(tuple.0.clone());
                }
            }
        }
    }
    for tuple in on_index.keys() {
        if !off_index.contains_key(tuple) {
            diag.missing_in_offline_count += 1;
            if diag.missing_in_offline_examples.len() < MAX_KEY_EXAMPLES {
                diag.missing_in_offline_examples.push(tuple.0.clone());
            }
        }
    }

    debug!(
        aligned = off_rows.len(),
        missing_in_online = diag.missing_in_online_count,
        missing_in_offline = diag.missing_in_offline_count,
        "aligned feature tables"
    );
    Ok((offline.take(&off_rows), online.take(&on_rows), diag))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn int_table(ids: &[i64], xs: &[i64]) -> Table {
        Table::from_columns(vec![
            (
                "id".to_string(),
                Column::Int(ids.iter().map(|&i| Some(i)).collect()),
            ),
            (
                "x".to_string(),
                Column::Int(xs.iter().map(|&i| Some(i)).collect()),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn happy_path_reports_both_sides() {
        let off = int_table(&[1, 2, 3], &[10, 20, 30]);
        let on = int_table(&[2, 3, 4], &[200, 300, 400]);
        let (off_al, on_al, diag) =
            align_by_keys(&off, &on, &["id".to_string()]).unwrap();

        assert_eq!(off_al.num_rows(), 2);
        assert_eq!(on_al.num_rows(), 2);
        let ids: Vec<Value> = (0..2).map(|i| off_al.column("id").unwrap().get(i)).collect();
        assert_eq!(ids, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(off_al.column("x").unwrap().get(0), Value::Int(20));
        assert_eq!(on_al.column("x").unwrap().get(0), Value::Int(200));

        assert_eq!(diag.missing_in_online_count, 1); // id=1
        assert_eq!(diag.missing_in_offline_count, 1); // id=4
        assert_eq!(diag.missing_in_online_examples, vec![vec![Value::Int(1)]]);
        assert_eq!(diag.missing_in_offline_examples, vec![vec![Value::Int(4)]]);
    }

    #[test]
    fn output_key_columns_agree_row_by_row() {
        let off = int_table(&[5, 1, 3], &[50, 10, 30]);
        let on = int_table(&[3, 5, 1], &[300, 500, 100]);
        let (off_al, on_al, _) = align_by_keys(&off, &on, &["id".to_string()]).unwrap();
        assert_eq!(off_al.num_rows(), on_al.num_rows());
        for i in 0..off_al.num_rows() {
            assert_eq!(
                off_al.column("id").unwrap().get(i),
                on_al.column("id").unwrap().get(i)
            );
        }
        // Ascending canonical order.
        assert_eq!(off_al.column("id").unwrap().get(0), Value::Int(1));
        assert_eq!(off_al.column("id").unwrap().get(2), Value::Int(5));
    }

    #[test]
    fn duplicate_keys_are_fatal() {
        let off = int_table(&[1, 1], &[10, 20]);
        let on = int_table(&[1], &[100]);
        let err = align_by_keys(&off, &on, &["id".to_string()]).unwrap_err();
        match err {
            AlignmentError::DuplicateKey { side, key } => {
                assert_eq!(side, "offline");
                assert_eq!(key, "1");
            }
            other => panic!("expected DuplicateKey, got {other}"),
        }
    }

    #[test]
    fn missing_key_column_is_fatal() {
        let off = int_table(&[1], &[10]);
        let on = Table::from_columns(vec![(
            "idx".to_string(),
            Column::Int(vec![Some(1)]),
        )])
        .unwrap();
        let err = align_by_keys(&off, &on, &["id".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            AlignmentError::MissingKeyColumn { side: "online", .. }
        ));
    }

    #[test]
    fn composite_keys_join_on_the_full_tuple() {
        let off = Table::from_columns(vec![
            ("uid".to_string(), Column::Int(vec![Some(1), Some(1)])),
            (
                "day".to_string(),
                Column::Str(vec![Some("mon".into()), Some("tue".into())]),
            ),
        ])
        .unwrap();
        let on = Table::from_columns(vec![
            ("uid".to_string(), Column::Int(vec![Some(1)])),
            ("day".to_string(), Column::Str(vec![Some("tue".into())])),
        ])
        .unwrap();
        let (off_al, _, diag) =
            align_by_keys(&off, &on, &["uid".to_string(), "day".to_string()]).unwrap();
        assert_eq!(off_al.num_rows(), 1);
        assert_eq!(off_al.column("day").unwrap().get(0), Value::Str("tue".into()));
        assert_eq!(diag.missing_in_online_count, 1);
    }

    #[test]
    fn example_lists_are_capped() {
        let ids: Vec<i64> = (0..40).collect();
        let xs = vec![0i64; 40];
        let off = int_table(&ids, &xs);
        let on = int_table(&[100], &[0]);
        let (_, _, diag) = align_by_keys(&off, &on, &["id".to_string()]).unwrap();
        assert_eq!(diag.missing_in_online_count, 40);
        assert_eq!(diag.missing_in_online_examples.len(), MAX_KEY_EXAMPLES);
    }

    #[test]
    fn int_and_float_keys_pair_by_value() {
        let off = int_table(&[1, 2], &[10, 20]);
        let on = Table::from_columns(vec![
            ("id".to_string(), Column::Float(vec![Some(1.0), Some(2.0)])),
            ("x".to_string(), Column::Int(vec![Some(100), Some(200)])),
        ])
        .unwrap();
        let (off_al, _, diag) = align_by_keys(&off, &on, &["id".to_string()]).unwrap();
        assert_eq!(off_al.num_rows(), 2);
        assert_eq!(diag.missing_in_online_count, 0);
    }
}

//! Check orchestration
//!
//! [`run_check`] composes the whole pipeline: load the input rows, draw a
//! deterministic sample, invoke the offline and online producers
//! (concurrently — they share no mutable state), align the two feature
//! tables by key, compare per feature, and assemble a
//! [`ComparisonReport`] with the global verdict.
//!
//! Producer and alignment failures abort the run; tolerance violations,
//! unknown categories, one-sided nulls, and missing features are findings
//! that flow into the report and flip `ok` to false.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::adapter::{ensure_key_columns, require_columns, AdapterError, Producer};
use crate::align::{align_by_keys, AlignmentDiagnostics, AlignmentError};
use crate::compare::{compare_tables, PerFeatureComparison};
use crate::inputs::{load_input, sample_table, InputError};
use crate::spec::{FeatureSpec, SpecError};
use crate::table::Table;

/// Any failure that aborts a check run, by origin.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The contract failed to load or validate.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// The input rows failed to load or sample.
    #[error(transparent)]
    Input(#[from] InputError),
    /// The sampled input lacks a key column the spec names.
    #[error("input rows: {0}")]
    InputKeys(#[source] AdapterError),
    /// The offline producer failed.
    #[error("offline adapter: {0}")]
    Offline(#[source] AdapterError),
    /// The online producer failed.
    #[error("online adapter: {0}")]
    Online(#[source] AdapterError),
    /// Alignment preconditions were violated.
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

/// Input rows: either an in-memory table or a path for
/// [`crate::inputs::load_input`].
#[derive(Clone, Debug)]
pub enum DataSource {
    /// Already-loaded rows; passed through unchanged.
    Table(Table),
    /// On-disk input, loaded by extension.
    Path(PathBuf),
}

impl From<Table> for DataSource {
    fn from(t: Table) -> DataSource {
        DataSource::Table(t)
    }
}

impl From<PathBuf> for DataSource {
    fn from(p: PathBuf) -> DataSource {
        DataSource::Path(p)
    }
}

impl From<&std::path::Path> for DataSource {
    fn from(p: &std::path::Path) -> DataSource {
        DataSource::Path(p.to_path_buf())
    }
}

/// The sole durable output of a run: the spec, alignment diagnostics,
/// per-feature results, and the global verdict.
#[derive(Clone, Debug, Serialize)]
pub struct ComparisonReport {
    /// True iff every feature passed its gate and none were missing.
    pub ok: bool,
    /// Key columns the comparison was aligned on.
    pub keys: Vec<String>,
    /// The contract the comparison quoted.
    pub spec: FeatureSpec,
    /// What the join left out on each side.
    pub alignment: AlignmentDiagnostics,
    /// One result per spec feature.
    pub per_feature: Vec<PerFeatureComparison>,
}

impl ComparisonReport {
    /// Human-readable summary (see [`crate::report::render_text`]).
    pub fn to_text(&self) -> String {
        crate::report::render_text(self)
    }

    /// Pretty-printed JSON in the report schema.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        crate::report::render_json(self)
    }

    /// Standalone HTML page (see [`crate::report::render_html`]).
    pub fn to_html(&self, json_href: Option<&str>) -> String {
        crate::report::render_html(self, json_href)
    }
}

/// Run one offline-vs-online skew check.
///
/// When `sample` is set, that many rows are drawn without replacement,
/// reproducibly in `(input, sample, seed)`; `seed` defaults to 0. The two
/// producer invocations run concurrently; each is handed the same
/// immutable sampled input.
pub async fn run_check<O, N>(
    spec: &FeatureSpec,
    data: impl Into<DataSource>,
    offline: &O,
    online: &N,
    sample: Option<usize>,
    seed: Option<u64>,
) -> Result<ComparisonReport, CheckError>
where
    O: Producer + ?Sized,
    N: Producer + ?Sized,
{
    spec.validate()?;

    let input = match data.into() {
        DataSource::Table(t) => t,
        DataSource::Path(p) => load_input(&p)?,
    };
    let input = match sample {
        Some(k) => sample_table(&input, k, seed.unwrap_or(0))?,
        None => input,
    };
    require_columns(&input, &spec.keys).map_err(CheckError::InputKeys)?;

    info!(
        rows = input.num_rows(),
        features = spec.features.len(),
        "running skew check"
    );

    let (off_res, on_res) = tokio::join!(offline.produce(&input), online.produce(&input));
    let off = ensure_key_columns(&input, off_res.map_err(CheckError::Offline)?, &spec.keys)
        .map_err(CheckError::Offline)?;
    let on = ensure_key_columns(&input, on_res.map_err(CheckError::Online)?, &spec.keys)
        .map_err(CheckError::Online)?;

    let (off_aligned, on_aligned, alignment) = align_by_keys(&off, &on, &spec.keys)?;
    let per_feature = compare_tables(&off_aligned, &on_aligned, spec);
    let ok = per_feature.iter().all(PerFeatureComparison::is_ok);

    info!(ok, aligned_rows = off_aligned.num_rows(), "skew check finished");
    Ok(ComparisonReport {
        ok,
        keys: spec.keys.clone(),
        spec: spec.clone(),
        alignment,
        per_feature,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FnAdapter;
    use crate::spec::{Dtype, Feature, NullPolicy, Tolerance};
    use crate::table::{Column, Value};

    fn demo_spec() -> FeatureSpec {
        FeatureSpec {
            version: 1,
            keys: vec!["id".to_string()],
            features: vec![Feature {
                name: "y".to_string(),
                dtype: Dtype::Float,
                nullable: true,
                tolerance: Some(Tolerance { abs: Some(0.01), rel: None }),
                categories: None,
                range: None,
                window: None,
            }],
            null_policy: NullPolicy::Same,
        }
    }

    fn demo_input() -> Table {
        Table::from_columns(vec![
            ("id".to_string(), Column::Int(vec![Some(1), Some(2), Some(3)])),
            ("x".to_string(), Column::Float(vec![Some(1.0), Some(2.0), Some(3.0)])),
        ])
        .unwrap()
    }

    /// `y = x * 2`, rounded to two decimals.
    fn offline_producer() -> FnAdapter {
        FnAdapter::new("offline", |input: &Table| {
            let x = input.column("x").unwrap();
            let y: Vec<Option<f64>> = (0..input.num_rows())
                .map(|i| x.get(i).as_f64().map(|v| (v * 200.0).round() / 100.0))
                .collect();
            let mut out = Table::new();
            out.push_column("id".to_string(), input.column("id").unwrap().clone())
                .unwrap();
            out.push_column("y".to_string(), Column::Float(y)).unwrap();
            Ok(out)
        })
    }

    /// `y = x * 2 + 0.001` — inside the declared abs tolerance.
    fn online_producer() -> FnAdapter {
        FnAdapter::new("online", |input: &Table| {
            let x = input.column("x").unwrap();
            let y: Vec<Option<f64>> = (0..input.num_rows())
                .map(|i| x.get(i).as_f64().map(|v| v * 2.0 + 0.001))
                .collect();
            let mut out = Table::new();
            out.push_column("id".to_string(), input.column("id").unwrap().clone())
                .unwrap();
            out.push_column("y".to_string(), Column::Float(y)).unwrap();
            Ok(out)
        })
    }

    #[tokio::test]
    async fn end_to_end_within_tolerance_passes() {
        let report = run_check(
            &demo_spec(),
            demo_input(),
            &offline_producer(),
            &online_producer(),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(report.ok);
        assert_eq!(report.per_feature.len(), 1);
        assert_eq!(report.per_feature[0].feature_name, "y");
        assert_eq!(report.per_feature[0].num_rows_compared, 3);
        let txt = report.to_text();
        assert!(txt.contains("OK: true"));
        assert!(txt.contains("y"));
    }

    #[tokio::test]
    async fn drift_beyond_tolerance_fails_the_gate() {
        let drifted = FnAdapter::new("drifted", |input: &Table| {
            let x = input.column("x").unwrap();
            let y: Vec<Option<f64>> = (0..input.num_rows())
                .map(|i| x.get(i).as_f64().map(|v| v * 2.0 + 0.5))
                .collect();
            let mut out = Table::new();
            out.push_column("id".to_string(), input.column("id").unwrap().clone())
                .unwrap();
            out.push_column("y".to_string(), Column::Float(y)).unwrap();
            Ok(out)
        });
        let report = run_check(
            &demo_spec(),
            demo_input(),
            &offline_producer(),
            &drifted,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(!report.ok);
        assert_eq!(report.per_feature[0].mismatch_rate, 1.0);
    }

    #[tokio::test]
    async fn sampling_is_applied_and_reproducible() {
        let ids: Vec<Option<i64>> = (0..100).map(Some).collect();
        let xs: Vec<Option<f64>> = (0..100).map(|i| Some(i as f64)).collect();
        let input = Table::from_columns(vec![
            ("id".to_string(), Column::Int(ids)),
            ("x".to_string(), Column::Float(xs)),
        ])
        .unwrap();

        let r1 = run_check(
            &demo_spec(),
            input.clone(),
            &offline_producer(),
            &online_producer(),
            Some(10),
            Some(7),
        )
        .await
        .unwrap();
        let r2 = run_check(
            &demo_spec(),
            input,
            &offline_producer(),
            &online_producer(),
            Some(10),
            Some(7),
        )
        .await
        .unwrap();

        assert_eq!(r1.per_feature[0].num_rows_compared, 10);
        assert_eq!(
            r1.alignment.missing_in_online_count,
            r2.alignment.missing_in_online_count
        );
        assert_eq!(r1.to_json().unwrap(), r2.to_json().unwrap());
    }

    #[tokio::test]
    async fn zero_sample_is_rejected() {
        let err = run_check(
            &demo_spec(),
            demo_input(),
            &offline_producer(),
            &online_producer(),
            Some(0),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckError::Input(InputError::EmptySample)));
    }

    #[tokio::test]
    async fn missing_input_key_is_rejected_before_producers_run() {
        let input = Table::from_columns(vec![(
            "x".to_string(),
            Column::Float(vec![Some(1.0)]),
        )])
        .unwrap();
        let err = run_check(
            &demo_spec(),
            input,
            &offline_producer(),
            &online_producer(),
            None,
            None,
        )
        .await
        .unwrap_err();
        match err {
            CheckError::InputKeys(AdapterError::Config(msg)) => {
                assert!(msg.contains("`id`"), "got: {msg}");
            }
            other => panic!("expected InputKeys, got {other}"),
        }
    }

    #[tokio::test]
    async fn producer_failures_name_their_side() {
        let broken = FnAdapter::new("broken", |_: &Table| {
            Err(AdapterError::Transport("connection refused".to_string()))
        });
        let err = run_check(
            &demo_spec(),
            demo_input(),
            &offline_producer(),
            &broken,
            None,
            None,
        )
        .await
        .unwrap_err();
        match err {
            CheckError::Online(_) => {}
            other => panic!("expected Online, got {other}"),
        }
    }

    #[tokio::test]
    async fn keys_omitted_by_producers_are_reattached() {
        let keyless = FnAdapter::new("keyless", |input: &Table| {
            let x = input.column("x").unwrap();
            let y: Vec<Option<f64>> = (0..input.num_rows())
                .map(|i| x.get(i).as_f64().map(|v| (v * 200.0).round() / 100.0))
                .collect();
            let mut out = Table::new();
            out.push_column("y".to_string(), Column::Float(y)).unwrap();
            Ok(out)
        });
        let report = run_check(
            &demo_spec(),
            demo_input(),
            &keyless,
            &online_producer(),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(report.ok);
        assert_eq!(report.alignment.missing_in_online_count, 0);
    }

    #[tokio::test]
    async fn report_carries_alignment_diagnostics() {
        // Online drops id=1 entirely.
        let partial = FnAdapter::new("partial", |input: &Table| {
            let keep: Vec<usize> = (0..input.num_rows())
                .filter(|&i| input.column("id").unwrap().get(i) != Value::Int(1))
                .collect();
            let sub = input.take(&keep);
            online_producer_inner(&sub)
        });
        fn online_producer_inner(input: &Table) -> Result<Table, AdapterError> {
            let x = input.column("x").unwrap();
            let y: Vec<Option<f64>> = (0..input.num_rows())
                .map(|i| x.get(i).as_f64().map(|v| v * 2.0 + 0.001))
                .collect();
            let mut out = Table::new();
            out.push_column("id".to_string(), input.column("id").unwrap().clone())
                .unwrap();
            out.push_column("y".to_string(), Column::Float(y)).unwrap();
            Ok(out)
        }

        let report = run_check(
            &demo_spec(),
            demo_input(),
            &offline_producer(),
            &partial,
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(report.alignment.missing_in_online_count, 1);
        assert_eq!(
            report.alignment.missing_in_online_examples,
            vec![vec![Value::Int(1)]]
        );
        // Alignment misses are diagnostics, not verdict flips.
        assert!(report.ok);
        assert_eq!(report.per_feature[0].num_rows_compared, 2);
    }
}

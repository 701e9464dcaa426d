//! Per-feature comparison
//!
//! Walks the spec's features over a positionally paired table pair and
//! produces one [`PerFeatureComparison`] per feature. Comparison
//! semantics dispatch on the *declared* dtype:
//!
//! - `float`/`int`: match iff `|o−n| ≤ abs ∨ |o−n| ≤ rel·max(|o|,|n|)`;
//!   with no declared tolerance the pair must be bit-equal (the stricter
//!   default). Declared `range` bounds are checked on both sides first
//!   and override any tolerance.
//! - `bool`: exact equality.
//! - `string`: byte-wise equality; `datetime`: equality of the UTC
//!   instant.
//! - `category`: string equality plus collection of values outside the
//!   declared domain; an unknown on either side is a mismatch even when
//!   both sides agree on it.
//!
//! ## Numeric edge cases
//!
//! NaN is treated as null and falls under the null policy. Same-sign
//! infinities match only when `abs = ∞` is declared; opposite-sign
//! infinities never match. At a zero reference the `rel` branch is
//! vacuous and only `abs` can succeed.
//!
//! Everything here is a *finding* that flows into the report; the
//! comparator itself never fails.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::spec::{Dtype, Feature, FeatureSpec, NullPolicy};
use crate::table::{Table, Value};

/// Category values observed outside the declared domain, per side.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UnknownCategories {
    /// Values present offline but outside the domain.
    pub offline_unknown: BTreeSet<String>,
    /// Values present online but outside the domain.
    pub online_unknown: BTreeSet<String>,
}

/// Result of comparing one feature across the aligned pair.
#[derive(Clone, Debug, Serialize)]
pub struct PerFeatureComparison {
    /// The spec feature this row describes.
    pub feature_name: String,
    /// Rows that actually entered the comparison (after null-policy
    /// exclusions).
    pub num_rows_compared: usize,
    /// `mismatches / num_rows_compared`; 0 when nothing was compared.
    pub mismatch_rate: f64,
    /// Mean `|o − n|` over rows where both sides are non-null and finite.
    /// Numeric dtypes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_absolute_difference: Option<f64>,
    /// Out-of-domain observations; category dtype only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_categories: Option<UnknownCategories>,
    /// True when the feature column was absent from either side. Fatal to
    /// the global verdict.
    pub missing: bool,
    /// Row-aligned mismatch flags over the aligned table. Carried for
    /// programmatic consumers; not part of the serialized report.
    #[serde(skip)]
    pub mismatch_mask: Vec<bool>,
}

impl PerFeatureComparison {
    /// Per-feature gate: present and zero mismatches.
    #[inline]
    pub fn is_ok(&self) -> bool {
        !self.missing && self.mismatch_rate == 0.0
    }

    fn missing_feature(name: &str) -> PerFeatureComparison {
        PerFeatureComparison {
            feature_name: name.to_string(),
            num_rows_compared: 0,
            mismatch_rate: 0.0,
            mean_absolute_difference: None,
            unknown_categories: None,
            missing: true,
            mismatch_mask: Vec::new(),
        }
    }
}

/// Compare every spec feature over a positionally paired table pair.
///
/// The tables must come from [`crate::align::align_by_keys`]; row *i* on
/// both sides is assumed to be the same entity.
pub fn compare_tables(
    offline: &Table,
    online: &Table,
    spec: &FeatureSpec,
) -> Vec<PerFeatureComparison> {
    spec.features
        .iter()
        .map(|feature| {
            match (offline.column(&feature.name), online.column(&feature.name)) {
                (Some(off), Some(on)) => {
                    compare_feature(feature, spec.null_policy, off, on, offline.num_rows())
                }
                _ => {
                    warn!(feature = %feature.name, "feature column missing from a producer output");
                    PerFeatureComparison::missing_feature(&feature.name)
                }
            }
        })
        .collect()
}

fn compare_feature(
    feature: &Feature,
    policy: NullPolicy,
    off: &crate::table::Column,
    on: &crate::table::Column,
    n_rows: usize,
) -> PerFeatureComparison {
    let domain: Option<BTreeSet<&str>> = feature
        .categories
        .as_ref()
        .map(|c| c.iter().map(String::as_str).collect());

    let mut mask = vec![false; n_rows];
    let mut compared = 0usize;
    let mut mismatches = 0usize;
    let mut abs_sum = 0.0f64;
    let mut abs_count = 0usize;
    let mut unknowns = UnknownCategories::default();

    for row in 0..n_rows {
        let vo = off.get(row);
        let vn = on.get(row);
        let null_o = is_effective_null(&vo, feature.dtype);
        let null_n = is_effective_null(&vn, feature.dtype);

        if null_o || null_n {
            match policy {
                // Excluded from the denominator and never flagged.
                NullPolicy::Ignore => continue,
                NullPolicy::Same => {
                    compared += 1;
                    if !(null_o && null_n) {
                        mask[row] = true;
                        mismatches += 1;
                    }
                }
            }
            continue;
        }

        compared += 1;
        let matched = match feature.dtype {
            Dtype::Int | Dtype::Float => match (vo.as_f64(), vn.as_f64()) {
                (Some(o), Some(n)) => {
                    if o.is_finite() && n.is_finite() {
                        abs_sum += (o - n).abs();
                        abs_count += 1;
                    }
                    numeric_match(o, n, feature)
                }
                // Non-null but not coercible to the declared dtype: loud
                // in the report rather than fatal to the run.
                _ => false,
            },
            Dtype::Bool => match (vo.as_bool(), vn.as_bool()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Dtype::String => match (vo.coerce_str(), vn.coerce_str()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Dtype::Datetime => match (vo.as_timestamp(), vn.as_timestamp()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Dtype::Category => match (vo.coerce_str(), vn.coerce_str()) {
                (Some(a), Some(b)) => {
                    // The validator guarantees a domain for category
                    // features; a missing one (spec built by hand) reads
                    // as an empty domain, so everything is unknown.
                    let a_known = domain.as_ref().is_some_and(|d| d.contains(a.as_str()));
                    let b_known = domain.as_ref().is_some_and(|d| d.contains(b.as_str()));
                    if !a_known {
                        unknowns.offline_unknown.insert(a.clone());
                    }
                    if !b_known {
                        unknowns.online_unknown.insert(b.clone());
                    }
                    // Agreeing unknowns still mismatch; the domain is
                    // part of the contract.
                    a == b && a_known && b_known
                }
                _ => false,
            },
        };
        if !matched {
            mask[row] = true;
            mismatches += 1;
        }
    }

    PerFeatureComparison {
        feature_name: feature.name.clone(),
        num_rows_compared: compared,
        mismatch_rate: if compared > 0 {
            mismatches as f64 / compared as f64
        } else {
            0.0
        },
        mean_absolute_difference: if feature.dtype.is_numeric() && abs_count > 0 {
            Some(abs_sum / abs_count as f64)
        } else {
            None
        },
        unknown_categories: (feature.dtype == Dtype::Category).then_some(unknowns),
        missing: false,
        mismatch_mask: mask,
    }
}

/// Null for policy purposes: an actual null, or NaN for numeric dtypes.
fn is_effective_null(v: &Value, dtype: Dtype) -> bool {
    if v.is_null() {
        return true;
    }
    dtype.is_numeric() && matches!(v.as_f64(), Some(f) if f.is_nan())
}

/// The tolerance algebra for one non-null numeric pair.
fn numeric_match(o: f64, n: f64, feature: &Feature) -> bool {
    // Range bounds beat tolerance on either side.
    if let Some((lo, hi)) = feature.range {
        if o < lo || o > hi || n < lo || n > hi {
            return false;
        }
    }

    if o.is_infinite() || n.is_infinite() {
        // Opposite-sign infinities never match; everything else involving
        // an infinity matches only under a declared abs = ∞.
        if o.is_infinite() && n.is_infinite() && o.is_sign_positive() != n.is_sign_positive() {
            return false;
        }
        return feature
            .tolerance
            .and_then(|t| t.abs)
            .is_some_and(|a| a == f64::INFINITY);
    }

    match feature.tolerance {
        // No tolerance: bit-equality, the stricter default.
        None => o.to_bits() == n.to_bits(),
        Some(tol) => {
            let d = (o - n).abs();
            let abs_ok = tol.abs.is_some_and(|a| d <= a);
            // At max(|o|,|n|) = 0 this branch is vacuous: only d = 0
            // passes, which abs-free specs must earn via `abs`.
            let rel_ok = tol.rel.is_some_and(|r| d <= r * o.abs().max(n.abs()));
            abs_ok || rel_ok
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

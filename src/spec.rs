//! Feature contract model & validator
//!
//! The [`FeatureSpec`] is the trust boundary between human intent and the
//! automated comparison: every downstream check quotes it. It is loaded
//! from a YAML document, validated eagerly, and never mutated afterwards.
//!
//! ## Invariants (enforced by [`FeatureSpec::validate`])
//!
//! - `version` is 1 (the only schema version so far).
//! - `keys` is non-empty; `features` is non-empty and unique by name.
//! - Tolerances carry at least one of `abs`/`rel`, both non-negative.
//! - `category` features declare a non-empty, duplicate-free domain.
//! - `range` bounds are ordered (`lo ≤ hi`).
//!
//! Validation failures are aggregated into a single [`SpecError::Invalid`]
//! naming every offending field path, so a broken contract is fixed in one
//! round-trip rather than one error at a time.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Contract load/validation failures. Fatal; no partial runs.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// Reading the spec document from disk failed.
    #[error("read spec {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document was not valid YAML for the schema.
    #[error("parse spec: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The document parsed but violated contract invariants.
    #[error("invalid feature spec: {}", .problems.join("; "))]
    Invalid {
        /// One entry per violated field path.
        problems: Vec<String>,
    },
}

/// Declared feature type; comparison semantics dispatch on this, not on
/// the physical column representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 string, byte-wise equality.
    String,
    /// String drawn from a declared domain.
    Category,
    /// Instant, compared timezone-normalized to UTC.
    Datetime,
}

impl Dtype {
    /// True for dtypes the tolerance algebra applies to.
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Dtype::Int | Dtype::Float)
    }
}

/// Rule for pairs with one- or two-sided nulls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// A row matches iff both sides are null or both compare equal.
    #[default]
    Same,
    /// Rows with a null on either side are dropped from the denominator.
    Ignore,
}

/// Allowed numeric disagreement: match iff
/// `|Δ| ≤ abs ∨ |Δ| ≤ rel·max(|o|,|n|)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Absolute bound on `|offline − online|`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs: Option<f64>,
    /// Relative bound, scaled by `max(|offline|, |online|)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<f64>,
}

/// Interval-closure marker for [`Window`] metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Closed {
    /// Closed on the left endpoint.
    Left,
    /// Closed on the right endpoint.
    Right,
    /// Closed on both endpoints.
    Both,
    /// Open interval.
    Neither,
}

/// Descriptive aggregation-window metadata. Not enforced by the
/// comparator; carried for documentation and downstream tooling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Lookback horizon in days.
    pub lookback_days: u32,
    /// Column holding the event timestamp.
    pub timestamp_col: String,
    /// Which endpoints of the window are inclusive.
    pub closed: Closed,
}

/// One declared feature: name, dtype, and comparison knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name, unique within the spec.
    pub name: String,
    /// Declared type.
    pub dtype: Dtype,
    /// Whether nulls are expected at all. Default true.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Numeric tolerance; absent means bit-equality (the stricter default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,
    /// Allowed domain for `category` features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Inclusive numeric bounds `(lo, hi)`; out-of-range values mismatch
    /// regardless of tolerance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    /// Descriptive window metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

/// The declarative feature contract. Immutable after load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Schema version; currently always 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Columns that jointly identify a row. Non-empty, ordered.
    pub keys: Vec<String>,
    /// Declared features, unique by name. Non-empty.
    pub features: Vec<Feature>,
    /// Null handling rule, shared by all features. Default `same`.
    #[serde(default)]
    pub null_policy: NullPolicy,
}

impl FeatureSpec {
    /// Load and validate a spec from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<FeatureSpec, SpecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.display().to_string(),
            source,
        })?;
        FeatureSpec::from_yaml_str(&text)
    }

    /// Parse and validate a spec from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<FeatureSpec, SpecError> {
        let spec: FeatureSpec = serde_yaml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serialize back to YAML. `from_yaml_str ∘ to_yaml` is an identity on
    /// valid specs.
    pub fn to_yaml(&self) -> Result<String, SpecError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serialize to a YAML file.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), SpecError> {
        let path = path.as_ref();
        let text = self.to_yaml()?;
        fs::write(path, text).map_err(|source| SpecError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Look up a feature by name.
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Check every contract invariant, aggregating all violations into a
    /// single error naming the offending field paths.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut problems = Vec::new();

        if self.version != 1 {
            problems.push(format!(
                "version: unsupported schema version {} (expected 1)",
                self.version
            ));
        }
        if self.keys.is_empty() {
            problems.push("keys: must name at least one column".to_string());
        }
        {
            let mut seen = BTreeSet::new();
            for key in &self.keys {
                if !seen.insert(key.as_str()) {
                    problems.push(format!("keys: duplicate key column `{key}`"));
                }
            }
        }
        if self.features.is_empty() {
            problems.push("features: must declare at least one feature".to_string());
        }

        let mut names = BTreeSet::new();
        for (i, feature) in self.features.iter().enumerate() {
            let path = format!("features[{i}]");
            if !names.insert(feature.name.as_str()) {
                problems.push(format!(
                    "{path}.name: duplicate feature name `{}`",
                    feature.name
                ));
            }

            if let Some(tol) = &feature.tolerance {
                if tol.abs.is_none() && tol.rel.is_none() {
                    problems.push(format!(
                        "{path}.tolerance: at least one of abs/rel must be set"
                    ));
                }
                if let Some(abs) = tol.abs {
                    if !(abs >= 0.0) {
                        problems.push(format!(
                            "{path}.tolerance.abs: must be non-negative (got {abs})"
                        ));
                    }
                }
                if let Some(rel) = tol.rel {
                    if !(rel >= 0.0) {
                        problems.push(format!(
                            "{path}.tolerance.rel: must be non-negative (got {rel})"
                        ));
                    }
                }
            }

            if feature.dtype == Dtype::Category {
                match &feature.categories {
                    None => problems.push(format!(
                        "{path}.categories: required for category features"
                    )),
                    Some(cats) if cats.is_empty() => problems.push(format!(
                        "{path}.categories: must be non-empty for category features"
                    )),
                    Some(cats) => {
                        let mut seen = BTreeSet::new();
                        for cat in cats {
                            if !seen.insert(cat.as_str()) {
                                problems.push(format!(
                                    "{path}.categories: duplicate value `{cat}`"
                                ));
                            }
                        }
                    }
                }
            }

            if let Some((lo, hi)) = feature.range {
                if !(lo <= hi) {
                    problems.push(format!(
                        "{path}.range: lower bound {lo} exceeds upper bound {hi}"
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SpecError::Invalid { problems })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_SPEC: &str = r#"
version: 1
keys: ["user_id", "ts"]
features:
  - name: spend_7d
    dtype: float
    nullable: true
    tolerance: { abs: 0.01, rel: 0.001 }
    window: { lookback_days: 7, timestamp_col: "ts", closed: "right" }
  - name: country
    dtype: category
    categories: [UK, US, DE]
    nullable: false
  - name: age
    dtype: int
    nullable: false
    range: [0, 120]
null_policy: same
"#;

    #[test]
    fn round_trip_yaml_is_identity() {
        let spec = FeatureSpec::from_yaml_str(FULL_SPEC).unwrap();
        assert_eq!(spec.version, 1);
        assert_eq!(spec.keys, vec!["user_id", "ts"]);
        assert_eq!(spec.features.len(), 3);
        assert_eq!(spec.null_policy, NullPolicy::Same);
        assert_eq!(spec.features[2].range, Some((0.0, 120.0)));

        let yaml = spec.to_yaml().unwrap();
        let spec2 = FeatureSpec::from_yaml_str(&yaml).unwrap();
        assert_eq!(spec, spec2);
    }

    #[test]
    fn round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.yml");
        let spec = FeatureSpec::from_yaml_str(FULL_SPEC).unwrap();
        spec.to_yaml_file(&path).unwrap();
        let spec2 = FeatureSpec::from_yaml(&path).unwrap();
        assert_eq!(spec, spec2);
    }

    #[test]
    fn defaults_are_applied() {
        let spec = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: x\n    dtype: float\n",
        )
        .unwrap();
        assert_eq!(spec.version, 1);
        assert!(spec.features[0].nullable);
        assert_eq!(spec.null_policy, NullPolicy::Same);
        assert!(spec.features[0].tolerance.is_none());
    }

    #[test]
    fn duplicate_feature_names_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: f\n    dtype: float\n  - name: f\n    dtype: float\n",
        )
        .unwrap_err();
        match err {
            SpecError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("duplicate feature name")));
            }
            other => panic!("expected Invalid, got {other}"),
        }
    }

    #[test]
    fn negative_tolerance_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: f\n    dtype: float\n    tolerance: { abs: -0.1 }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("tolerance.abs"));
    }

    #[test]
    fn empty_tolerance_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: f\n    dtype: float\n    tolerance: {}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one of abs/rel"));
    }

    #[test]
    fn reversed_range_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: age\n    dtype: int\n    range: [10, 0]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("range"));
    }

    #[test]
    fn duplicate_categories_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: c\n    dtype: category\n    categories: [A, A]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate value `A`"));
    }

    #[test]
    fn category_without_domain_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: c\n    dtype: category\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("categories: required"));
    }

    #[test]
    fn empty_keys_rejected() {
        let err = FeatureSpec::from_yaml_str(
            "keys: []\nfeatures:\n  - name: x\n    dtype: float\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("keys"));
    }

    #[test]
    fn unknown_dtype_rejected_at_parse() {
        let err = FeatureSpec::from_yaml_str(
            "keys: [id]\nfeatures:\n  - name: x\n    dtype: decimal\n",
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::Yaml(_)));
    }

    #[test]
    fn violations_are_aggregated() {
        let err = FeatureSpec::from_yaml_str(
            "keys: []\nfeatures:\n  - name: f\n    dtype: float\n    tolerance: { rel: -1 }\n    range: [5, 1]\n",
        )
        .unwrap_err();
        match err {
            SpecError::Invalid { problems } => assert!(problems.len() >= 3),
            other => panic!("expected Invalid, got {other}"),
        }
    }
}

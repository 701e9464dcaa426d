//! Crate root: public surface and pipeline-wide invariants
//!
//! SkewSentry detects training/serving skew in ML feature pipelines.
//! Given a declarative feature contract and a sample of
//! production-shaped input rows, it runs two independent feature
//! producers — the *offline* path (training) and the *online* path
//! (serving, possibly behind a network boundary) — aligns their outputs
//! by entity key, and scores per-feature disagreement under the
//! contract's tolerances. It is built as a CI-grade gate: deterministic,
//! offline, non-zero exit on violation.
//!
//! ## Invariants (pipeline-wide)
//!
//! - **Contract first.** The [`FeatureSpec`] is validated eagerly and is
//!   immutable afterwards; every downstream check quotes it. A broken
//!   contract never reaches the runner.
//! - **Row identity.** Producers preserve row identity via the key
//!   columns; the HTTP adapter's batching and retries never reorder,
//!   duplicate, split, or merge rows. The aligner restores a canonical
//!   ascending key order, so row *i* of both aligned tables is the same
//!   entity.
//! - **Findings vs. failures.** Tolerance violations, unknown
//!   categories, one-sided nulls, and missing features are *findings*
//!   that flow into the report and flip `ok`. Producer, spec, and
//!   alignment failures are typed errors that abort the run; they are
//!   never swallowed into a mismatch.
//! - **Determinism.** Sampling is reproducible in `(input, sample,
//!   seed)`; the report is a pure function of the contract and the two
//!   producer outputs.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Producer abstraction, in-process registry adapter, key reattachment.
pub mod adapter;
/// Key-based inner join with alignment diagnostics.
pub mod align;
/// Per-feature comparator (tolerance algebra, null policies, domains).
pub mod compare;
/// HTTP producer: batching, retry/backoff, wire protocol.
pub mod http_adapter;
/// Input loading (CSV / JSON rows) and deterministic sampling.
pub mod inputs;
/// Report rendering: text, JSON schema, HTML.
pub mod report;
/// Check orchestration and the comparison report.
pub mod runner;
/// Feature contract model and validator.
pub mod spec;
/// External feature-store producer.
pub mod store_adapter;
/// Column-oriented tables and scalar values.
pub mod table;

// ============================================================================
// Canonical re-exports (single definition sites, imported from the root)
// ============================================================================

pub use crate::adapter::{AdapterError, FnAdapter, FnRegistry, Producer};
pub use crate::align::{align_by_keys, AlignmentDiagnostics, AlignmentError};
pub use crate::compare::{compare_tables, PerFeatureComparison, UnknownCategories};
pub use crate::http_adapter::HttpAdapter;
pub use crate::inputs::{load_input, sample_table, InputError};
pub use crate::runner::{run_check, CheckError, ComparisonReport, DataSource};
pub use crate::spec::{
    Closed, Dtype, Feature, FeatureSpec, NullPolicy, SpecError, Tolerance, Window,
};
pub use crate::store_adapter::{OnlineStoreClient, StoreAdapter, StoreResponse};
pub use crate::table::{Column, Table, TableError, Value};

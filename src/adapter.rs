//! Producer adapters
//!
//! A producer consumes an input table and returns a feature table keyed by
//! the spec's entity keys. Three concrete shapes exist: an in-process
//! function resolved from a registry (this module), a batched HTTP client
//! ([`crate::http_adapter`]), and an external feature-store wrapper
//! ([`crate::store_adapter`]). All of them surface failures through the
//! single [`AdapterError`] category; producer failures are always fatal to
//! the run and never swallowed into a "mismatch".
//!
//! Symbolic `module:symbol` lookup from the source design is replaced by
//! an explicit [`FnRegistry`]: callers register named producers at
//! startup and reference them by name.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::table::Table;

/// Producer failure, classified by what went wrong.
///
/// `Config` covers lookup failures and missing key columns; `Transport`
/// covers network faults (the only retryable kind); `Protocol` covers
/// malformed responses; `ReturnShape` covers responses of the wrong
/// overall type.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Registry lookup failures, missing key columns, bad parameters.
    #[error("adapter configuration: {0}")]
    Config(String),
    /// Network failure or non-200 response. Retryable.
    #[error("transport: {0}")]
    Transport(String),
    /// The producer answered, but the payload is malformed.
    #[error("protocol: {0}")]
    Protocol(String),
    /// The producer returned a value of the wrong overall shape.
    #[error("return shape: {0}")]
    ReturnShape(String),
}

impl AdapterError {
    /// Prefix the message with context, preserving the error kind.
    pub fn with_context(self, context: &str) -> AdapterError {
        match self {
            AdapterError::Config(m) => AdapterError::Config(format!("{context}: {m}")),
            AdapterError::Transport(m) => AdapterError::Transport(format!("{context}: {m}")),
            AdapterError::Protocol(m) => AdapterError::Protocol(format!("{context}: {m}")),
            AdapterError::ReturnShape(m) => {
                AdapterError::ReturnShape(format!("{context}: {m}"))
            }
        }
    }
}

/// A feature producer: input table in, feature table out.
///
/// The returned table must contain the spec keys (either emitted by the
/// producer or reattached via [`ensure_key_columns`]) plus some subset of
/// the spec feature columns. Row count need not equal the input's; the
/// aligner handles misses.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Produce a feature table for `input`.
    async fn produce(&self, input: &Table) -> Result<Table, AdapterError>;
}

// ============================================================================
// In-process producers
// ============================================================================

/// Signature of a registered in-process producer.
pub type ProducerFn = dyn Fn(&Table) -> Result<Table, AdapterError> + Send + Sync;

/// Named in-process producers, registered at startup and referenced by
/// name from the CLI or the runner.
#[derive(Default)]
pub struct FnRegistry {
    map: BTreeMap<String, Arc<ProducerFn>>,
}

impl FnRegistry {
    /// An empty registry.
    pub fn new() -> FnRegistry {
        FnRegistry::default()
    }

    /// Register `func` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&Table) -> Result<Table, AdapterError> + Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(func));
    }

    /// Resolve a registered producer into an adapter.
    pub fn resolve(&self, name: &str) -> Result<FnAdapter, AdapterError> {
        match self.map.get(name) {
            Some(func) => Ok(FnAdapter {
                name: name.to_string(),
                func: Arc::clone(func),
            }),
            None => {
                let known: Vec<&str> = self.map.keys().map(String::as_str).collect();
                Err(AdapterError::Config(format!(
                    "no producer registered under `{name}` (known: {})",
                    known.join(", ")
                )))
            }
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// In-process adapter: wraps a single producer function.
#[derive(Clone)]
pub struct FnAdapter {
    name: String,
    func: Arc<ProducerFn>,
}

impl std::fmt::Debug for FnAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAdapter").field("name", &self.name).finish()
    }
}

impl FnAdapter {
    /// Wrap a closure directly, without going through a registry.
    pub fn new<F>(name: impl Into<String>, func: F) -> FnAdapter
    where
        F: Fn(&Table) -> Result<Table, AdapterError> + Send + Sync + 'static,
    {
        FnAdapter {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The producer's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Producer for FnAdapter {
    async fn produce(&self, input: &Table) -> Result<Table, AdapterError> {
        (self.func)(input).map_err(|e| e.with_context(&format!("producer `{}`", self.name)))
    }
}

// ============================================================================
// Key handling shared by all adapters
// ============================================================================

/// Check that `table` carries every key column; `Config` error otherwise.
pub fn require_columns(table: &Table, keys: &[String]) -> Result<(), AdapterError> {
    for key in keys {
        if !table.has_column(key) {
            return Err(AdapterError::Config(format!(
                "input is missing key column `{key}`"
            )));
        }
    }
    Ok(())
}

/// Reattach key columns an adapter omitted, copying them positionally
/// from the input.
///
/// Positional reattachment is only sound when the producer preserved row
/// identity, i.e. its output has exactly one row per input row in input
/// order; when the row counts differ the omission is a `Config` error.
pub fn ensure_key_columns(
    input: &Table,
    mut output: Table,
    keys: &[String],
) -> Result<Table, AdapterError> {
    for key in keys.iter().rev() {
        if output.has_column(key) {
            continue;
        }
        if output.num_rows() != input.num_rows() {
            return Err(AdapterError::Config(format!(
                "adapter output is missing key column `{key}` and has {} rows for {} input rows, \
                 so keys cannot be reattached positionally",
                output.num_rows(),
                input.num_rows()
            )));
        }
        let col = input
            .column(key)
            .ok_or_else(|| {
                AdapterError::Config(format!("input is missing key column `{key}`"))
            })?
            .clone();
        output
            .insert_column(0, key.clone(), col)
            .map_err(|e| AdapterError::Config(e.to_string()))?;
    }
    Ok(output)
}

// ============================================================================
// Tests
// ============================================================================

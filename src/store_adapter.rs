//! External feature-store producer
//!
//! Wraps an opaque online-store client (a Feast-shaped
//! `get_online_features(features, entity_rows, project?)` call) behind
//! the [`Producer`] contract. The adapter extracts the entity-key columns
//! from the input as row maps, invokes the client, and normalizes
//! whichever of the three documented response shapes comes back:
//!
//! 1. an already-tabular value,
//! 2. a list of row maps,
//! 3. a column-oriented map (column → list of values).
//!
//! Anything else is a protocol error. When the response omits the key
//! columns they are reattached positionally, relying on the store's
//! documented guarantee that rows come back in `entity_rows` order.
//!
//! The client is single-owner: the adapter takes it by value and it must
//! not be shared with the other side of the comparison.

#![forbid(unsafe_code)]

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use crate::adapter::{ensure_key_columns, AdapterError, Producer};
use crate::table::{value_from_json, Column, Table};

/// Response shapes an online store client may return.
#[derive(Debug)]
pub enum StoreResponse {
    /// Already tabular (the `to_table()`-style shape).
    Table(Table),
    /// A list of row objects.
    Rows(Vec<JsonValue>),
    /// A column-oriented map: column name → array of values.
    Columns(JsonMap<String, JsonValue>),
}

/// Minimal interface onto an online feature store.
pub trait OnlineStoreClient: Send + Sync {
    /// Fetch the named features for the given entity rows.
    fn get_online_features(
        &self,
        features: &[String],
        entity_rows: &[JsonMap<String, JsonValue>],
        project: Option<&str>,
    ) -> Result<StoreResponse, AdapterError>;
}

/// Producer backed by an [`OnlineStoreClient`].
pub struct StoreAdapter<C> {
    feature_refs: Vec<String>,
    entity_keys: Vec<String>,
    client: C,
    project: Option<String>,
}

impl<C: OnlineStoreClient> StoreAdapter<C> {
    /// Wrap `client`, fetching `feature_refs` keyed by `entity_keys`.
    pub fn new(
        feature_refs: Vec<String>,
        entity_keys: Vec<String>,
        client: C,
    ) -> StoreAdapter<C> {
        StoreAdapter {
            feature_refs,
            entity_keys,
            client,
            project: None,
        }
    }

    /// Scope requests to a store project.
    pub fn project(mut self, project: impl Into<String>) -> StoreAdapter<C> {
        self.project = Some(project.into());
        self
    }

    fn normalize(&self, resp: StoreResponse) -> Result<Table, AdapterError> {
        match resp {
            StoreResponse::Table(t) => Ok(t),
            StoreResponse::Rows(rows) => Table::from_json_rows(&rows)
                .map_err(|e| AdapterError::Protocol(format!("row-oriented store response: {e}"))),
            StoreResponse::Columns(map) => {
                let mut table = Table::new();
                let mut expected_len: Option<usize> = None;
                for (name, cells) in map {
                    let arr = cells.as_array().ok_or_else(|| {
                        AdapterError::Protocol(format!(
                            "column-oriented store response: `{name}` is not an array"
                        ))
                    })?;
                    match expected_len {
                        None => expected_len = Some(arr.len()),
                        Some(n) if n != arr.len() => {
                            return Err(AdapterError::Protocol(format!(
                                "column-oriented store response: `{name}` has {} values, \
                                 expected {n}",
                                arr.len()
                            )))
                        }
                        Some(_) => {}
                    }
                    let mut values = Vec::with_capacity(arr.len());
                    for (i, cell) in arr.iter().enumerate() {
                        values.push(value_from_json(cell).ok_or_else(|| {
                            AdapterError::Protocol(format!(
                                "column-oriented store response: unsupported value in \
                                 `{name}` at row {i}"
                            ))
                        })?);
                    }
                    let col = Column::from_values(&name, &values)
                        .map_err(|e| AdapterError::Protocol(e.to_string()))?;
                    table
                        .push_column(name, col)
                        .map_err(|e| AdapterError::Protocol(e.to_string()))?;
                }
                Ok(table)
            }
        }
    }
}

#[async_trait::async_trait]
impl<C: OnlineStoreClient> Producer for StoreAdapter<C> {
    async fn produce(&self, input: &Table) -> Result<Table, AdapterError> {
        let entity_table = input.select(&self.entity_keys).map_err(|e| {
            AdapterError::Config(format!("extract entity keys: {e}"))
        })?;
        if input.is_empty() {
            // Zero-row key frame; the store is not consulted.
            return Ok(entity_table);
        }

        let entity_rows = entity_table.to_json_rows();
        debug!(
            features = self.feature_refs.len(),
            entities = entity_rows.len(),
            "querying online store"
        );
        let resp = self
            .client
            .get_online_features(&self.feature_refs, &entity_rows, self.project.as_deref())
            .map_err(|e| e.with_context("feature store client"))?;

        let table = self.normalize(resp)?;
        ensure_key_columns(input, table, &self.entity_keys)
    }
}

// ============================================================================
// Tests
// ============================================================================

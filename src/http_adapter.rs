//! Batched HTTP producer
//!
//! Speaks a record-level request/response protocol: each request body is a
//! JSON array of row objects (name→value maps preserving input column
//! order), and a successful response is a JSON array of the same length
//! in the same order. The input is sliced into contiguous windows of
//! `batch_size` rows, each window is one independent request, and
//! response arrays are concatenated in window order.
//!
//! ## Retry discipline
//!
//! Transport failures (network faults, any non-200 status) retry up to
//! `retries` additional times per batch with a linear backoff of
//! `min(0.05·attempt, 0.5)` seconds. Protocol failures — a 200 whose body
//! is not a JSON array of row objects, or whose length disagrees with the
//! request — indicate a deterministic server bug and are never retried.
//! A retried batch is resent verbatim: the serialized body is built once
//! per batch, so retries cannot reorder, duplicate, split, or merge rows.
//!
//! The endpoint is assumed idempotent for equal request bodies; the
//! adapter does not attempt to distinguish "already applied" responses.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::adapter::{AdapterError, Producer};
use crate::table::Table;

/// Default rows per request window.
pub const DEFAULT_BATCH_SIZE: usize = 256;
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of *additional* attempts beyond the first.
pub const DEFAULT_RETRIES: u32 = 1;
/// Backoff ceiling. Kept small so gate runs iterate fast; tests rely on it.
const BACKOFF_CAP_SECS: f64 = 0.5;

/// Producer that fetches features from an HTTP endpoint in batches.
#[derive(Clone, Debug)]
pub struct HttpAdapter {
    url: String,
    batch_size: usize,
    headers: Vec<(String, String)>,
    timeout: Duration,
    retries: u32,
    client: reqwest::Client,
}

impl HttpAdapter {
    /// Adapter for `url` with default batching, timeout, and retry knobs.
    pub fn new(url: impl Into<String>) -> HttpAdapter {
        HttpAdapter {
            url: url.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            client: reqwest::Client::new(),
        }
    }

    /// Set the window length (clamped to at least 1).
    pub fn batch_size(mut self, n: usize) -> HttpAdapter {
        self.batch_size = n.max(1);
        self
    }

    /// Add a caller-supplied request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> HttpAdapter {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the per-request timeout (applies to each attempt independently).
    pub fn timeout(mut self, timeout: Duration) -> HttpAdapter {
        self.timeout = timeout;
        self
    }

    /// Set the number of additional attempts beyond the first, so total
    /// attempts per batch = `retries + 1`.
    pub fn retries(mut self, retries: u32) -> HttpAdapter {
        self.retries = retries;
        self
    }

    /// Linear backoff after `failures` completed failures, capped.
    fn backoff(failures: u32) -> Duration {
        Duration::from_secs_f64((0.05 * f64::from(failures)).min(BACKOFF_CAP_SECS))
    }

    /// One POST attempt. Classifies the outcome: transport errors are
    /// retryable, protocol errors are not.
    async fn try_post(
        &self,
        body: &[u8],
        expected_len: usize,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        let resp = req
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AdapterError::Transport(format!("read response body: {e}")))?;

        if status.as_u16() != 200 {
            return Err(AdapterError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                excerpt(&text, 200)
            )));
        }

        let parsed: JsonValue = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Protocol(format!("invalid JSON response: {e}")))?;
        let rows = match parsed {
            JsonValue::Array(rows) => rows,
            _ => {
                return Err(AdapterError::Protocol(
                    "expected a JSON array from server".to_string(),
                ))
            }
        };
        if rows.len() != expected_len {
            return Err(AdapterError::Protocol(format!(
                "response has {} rows for a {expected_len}-row request",
                rows.len()
            )));
        }
        Ok(rows)
    }

    /// Send one batch with the retry policy applied.
    async fn post_batch(
        &self,
        batch_index: usize,
        records: &[JsonMap<String, JsonValue>],
    ) -> Result<Vec<JsonValue>, AdapterError> {
        // Serialized once; every retry sends these exact bytes.
        let body = serde_json::to_vec(records)
            .map_err(|e| AdapterError::Config(format!("serialize request batch: {e}")))?;

        let mut failures: u32 = 0;
        loop {
            match self.try_post(&body, records.len()).await {
                Ok(rows) => return Ok(rows),
                Err(AdapterError::Transport(msg)) => {
                    failures += 1;
                    if failures > self.retries {
                        return Err(AdapterError::Transport(format!(
                            "batch {batch_index}: request failed after {} attempts: {msg}",
                            self.retries + 1
                        )));
                    }
                    let pause = Self::backoff(failures);
                    warn!(
                        batch = batch_index,
                        failures,
                        backoff_ms = pause.as_millis() as u64,
                        "transport failure, retrying batch"
                    );
                    tokio::time::sleep(pause).await;
                }
                Err(other) => {
                    return Err(other.with_context(&format!("batch {batch_index}")))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Producer for HttpAdapter {
    async fn produce(&self, input: &Table) -> Result<Table, AdapterError> {
        if input.is_empty() {
            // Zero-row output with the input's columns (keys included);
            // no request is issued.
            return Ok(input.empty_like());
        }

        let rows = input.to_json_rows();
        let mut out_rows: Vec<JsonValue> = Vec::with_capacity(rows.len());
        for (batch_index, window) in rows.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_index, rows = window.len(), url = %self.url, "dispatching batch");
            let resp = self.post_batch(batch_index, window).await?;
            out_rows.extend(resp);
        }

        Table::from_json_rows(&out_rows)
            .map_err(|e| AdapterError::Protocol(format!("build feature table from response: {e}")))
    }
}

/// First `limit` characters of `text`, for error excerpts.
fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

// ============================================================================
// Tests (in-process axum endpoints on ephemeral ports)
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::table::{Column, Value};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn abc_input() -> Table {
        Table::from_columns(vec![
            ("id".to_string(), Column::Int(vec![Some(1), Some(2), Some(3)])),
            ("a".to_string(), Column::Int(vec![Some(10), Some(20), Some(30)])),
            ("b".to_string(), Column::Int(vec![Some(1), Some(2), Some(3)])),
        ])
        .unwrap()
    }

    /// Echo server: for each row `{id,a,b}` returns `{id, z: a+b}`.
    async fn sum_handler(
        State(hits): State<Arc<AtomicUsize>>,
        Json(rows): Json<Vec<JsonValue>>,
    ) -> impl IntoResponse {
        hits.fetch_add(1, Ordering::SeqCst);
        let out: Vec<JsonValue> = rows
            .iter()
            .map(|r| {
                let id = r["id"].as_i64().unwrap();
                let z = r["a"].as_i64().unwrap() + r["b"].as_i64().unwrap();
                serde_json::json!({"id": id, "z": z})
            })
            .collect();
        Json(out)
    }

    #[tokio::test]
    async fn round_trip_batches_in_order() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/", post(sum_handler))
            .with_state(Arc::clone(&hits));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).batch_size(2).timeout(Duration::from_secs(2));
        let out = adapter.produce(&abc_input()).await.unwrap();

        assert_eq!(out.column_names().collect::<Vec<_>>(), vec!["id", "z"]);
        let z = out.column("z").unwrap();
        assert_eq!(
            (z.get(0), z.get(1), z.get(2)),
            (Value::Int(11), Value::Int(22), Value::Int(33))
        );
        // Three rows at batch_size=2: exactly two requests, the second
        // carrying one row.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_retried_then_succeeds() {
        async fn flaky(
            State(hits): State<Arc<AtomicUsize>>,
            Json(rows): Json<Vec<JsonValue>>,
        ) -> axum::response::Response {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                (StatusCode::INTERNAL_SERVER_ERROR, "transient").into_response()
            } else {
                Json(rows).into_response()
            }
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route("/", post(flaky)).with_state(Arc::clone(&hits));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).retries(1).timeout(Duration::from_secs(2));
        let out = adapter.produce(&abc_input()).await.unwrap();
        assert_eq!(out.num_rows(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count_and_status() {
        async fn always_broken() -> impl IntoResponse {
            (StatusCode::SERVICE_UNAVAILABLE, "boom")
        }
        let app = Router::new().route("/", post(always_broken));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).retries(1).timeout(Duration::from_secs(2));
        let err = adapter.produce(&abc_input()).await.unwrap_err();
        match err {
            AdapterError::Transport(msg) => {
                assert!(msg.contains("after 2 attempts"), "got: {msg}");
                assert!(msg.contains("HTTP 503"), "got: {msg}");
                assert!(msg.contains("boom"), "got: {msg}");
            }
            other => panic!("expected Transport, got {other}"),
        }
    }

    #[tokio::test]
    async fn protocol_error_is_not_retried() {
        async fn not_an_array(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
            hits.fetch_add(1, Ordering::SeqCst);
            Json(serde_json::json!({"rows": []}))
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/", post(not_an_array))
            .with_state(Arc::clone(&hits));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).retries(3).timeout(Duration::from_secs(2));
        let err = adapter.produce(&abc_input()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Protocol(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn length_mismatch_is_protocol_error() {
        async fn drops_rows(Json(rows): Json<Vec<JsonValue>>) -> impl IntoResponse {
            Json(rows.into_iter().skip(1).collect::<Vec<_>>())
        }
        let app = Router::new().route("/", post(drops_rows));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).timeout(Duration::from_secs(2));
        let err = adapter.produce(&abc_input()).await.unwrap_err();
        match err {
            AdapterError::Protocol(msg) => assert!(msg.contains("2 rows"), "got: {msg}"),
            other => panic!("expected Protocol, got {other}"),
        }
    }

    #[tokio::test]
    async fn error_body_excerpt_is_truncated() {
        async fn verbose_failure() -> impl IntoResponse {
            (StatusCode::BAD_GATEWAY, "x".repeat(5000))
        }
        let app = Router::new().route("/", post(verbose_failure));
        let url = spawn(app).await;

        let adapter = HttpAdapter::new(url).retries(0).timeout(Duration::from_secs(2));
        let err = adapter.produce(&abc_input()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.len() < 400, "excerpt not truncated: {} chars", msg.len());
    }

    #[tokio::test]
    async fn empty_input_issues_no_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/", post(sum_handler))
            .with_state(Arc::clone(&hits));
        let url = spawn(app).await;

        let empty = abc_input().empty_like();
        let adapter = HttpAdapter::new(url).timeout(Duration::from_secs(2));
        let out = adapter.produce(&empty).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(out.column_names().collect::<Vec<_>>(), vec!["id", "a", "b"]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        assert_eq!(HttpAdapter::backoff(1), Duration::from_millis(50));
        assert_eq!(HttpAdapter::backoff(5), Duration::from_millis(250));
        assert_eq!(HttpAdapter::backoff(10), Duration::from_millis(500));
        assert_eq!(HttpAdapter::backoff(100), Duration::from_millis(500));
    }
}

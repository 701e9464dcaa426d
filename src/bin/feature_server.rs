//! Demo online feature server
//!
//! A minimal serving path speaking the batched HTTP adapter's wire
//! protocol, useful for exercising `skewsentry check --online-url`:
//!
//! - `GET  /health`    → `{"status":"ok"}`
//! - `POST /features`  → body is a JSON array of row objects; the reply
//!   is a JSON array of the same length in the same order, one feature
//!   object per input row.
//!
//! The computed feature deliberately mirrors the `demo_online` producer:
//! `spend = floor(price * qty * 100) / 100`, with `country` passed
//! through — floor instead of round, so a check against `demo_offline`
//! surfaces a one-cent skew on boundary rows.

#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn features(Json(rows): Json<Vec<JsonValue>>) -> axum::response::Response {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            return (
                StatusCode::BAD_REQUEST,
                format!("row {i} is not an object"),
            )
                .into_response();
        };
        let (Some(price), Some(qty)) = (
            obj.get("price").and_then(JsonValue::as_f64),
            obj.get("qty").and_then(JsonValue::as_f64),
        ) else {
            // Nulls propagate; the gate's null policy decides their fate.
            out.push(json!({"spend": null, "country": obj.get("country").cloned()}));
            continue;
        };
        let spend = (price * qty * 100.0).floor() / 100.0;
        out.push(json!({
            "spend": spend,
            "country": obj.get("country").cloned().unwrap_or(JsonValue::Null),
        }));
    }
    Json(out).into_response()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feature_server=info,tower_http=info".into()),
        )
        .init();

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8099);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let app = Router::new()
        .route("/health", get(health))
        .route("/features", post(features))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "feature server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

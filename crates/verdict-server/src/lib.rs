// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel HTTP Boundary
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! HTTP surface over [`VerificationService`].
//!
//! | Route | Success | Failure |
//! |-------|---------|---------|
//! | `POST /v1/verify` | 200 `{verdict, latency_ms}` | `{error: {code, message}}` |
//! | `GET /healthz` | 200, always | — |
//! | `GET /readyz` | 200 when a model is loaded | 503 |
//! | `GET /metrics` | Prometheus text | 500 |
//! | `POST /v1/model/load` | 200 health body | `{error: {code, message}}` |
//! | `POST /v1/model/unload` | 200 health body | — |
//!
//! Error codes map to statuses as `invalid_request` 400, `busy` 429,
//! `parse_failure` 502, `model_unavailable` 503, `timeout` 504.
//! Inference runs on the blocking pool; probes never wait for it.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use verdict_core::{HealthReport, SharedMetricsRegistry, VerificationService, Verifier};
use verdict_types::{ErrorBody, VerifyError, VerifyRequestBody};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<VerificationService>,
    pub registry: SharedMetricsRegistry,
}

impl AppState {
    pub fn new(service: Arc<VerificationService>, registry: SharedMetricsRegistry) -> Self {
        Self { service, registry }
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    report: HealthReport,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/verify", post(verify_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/model/load", post(load_handler))
        .route("/v1/model/unload", post(unload_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn error_response(err: &VerifyError) -> Response {
    let status =
        StatusCode::from_u16(err.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::from(err))).into_response()
}

// Raw bytes so malformed JSON gets our error body, not the extractor's.
async fn verify_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = serde_json::from_slice::<VerifyRequestBody>(&body)
        .map_err(|e| VerifyError::InvalidRequest(format!("malformed body: {e}")))
        .and_then(VerifyRequestBody::into_request);
    let request = match request {
        Ok(r) => r,
        Err(err) => {
            state.service.metrics().request_completed(err.code().as_str());
            return error_response(&err);
        }
    };

    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || service.verify(&request))
        .await
        .unwrap_or_else(|e| {
            log::error!("verification task failed: {e}");
            Err(VerifyError::ModelUnavailable(format!(
                "verification task failed: {e}"
            )))
        });

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

// Loading waits for any in-flight inference; keep it off the runtime.
async fn load_handler(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || service.load_model())
        .await
        .unwrap_or_else(|e| {
            Err(VerifyError::ModelUnavailable(format!(
                "model load task failed: {e}"
            )))
        });
    match result {
        Ok(()) => {
            log::info!("verifier model loaded by operator request");
            health_response(StatusCode::OK, "loaded", state.service.health())
        }
        Err(err) => error_response(&err),
    }
}

async fn unload_handler(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);
    if let Err(e) = tokio::task::spawn_blocking(move || service.unload_model()).await {
        log::error!("model unload task failed: {e}");
    }
    health_response(StatusCode::OK, "unloaded", state.service.health())
}

fn health_response(status: StatusCode, label: &'static str, report: HealthReport) -> Response {
    (
        status,
        Json(HealthBody {
            status: label,
            report,
        }),
    )
        .into_response()
}

async fn healthz_handler(State(state): State<AppState>) -> Response {
    health_response(StatusCode::OK, "ok", state.service.health())
}

async fn readyz_handler(State(state): State<AppState>) -> Response {
    let report = state.service.health();
    if report.ready() {
        health_response(StatusCode::OK, "ready", report)
    } else {
        health_response(StatusCode::SERVICE_UNAVAILABLE, "not_ready", report)
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.registry.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            log::error!("failed to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

//! HTTP handlers for the QRIS proxy.

pub mod admin;
pub mod payments;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;
use crate::AppState;

/// Service banner with the route map. Doubles as the reachability probe the
/// gateway frontends ping before rendering a payment page.
pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.qris.base_url(),
        "routes": [
            "GET  /",
            "GET  /health",
            "GET  /metrics",
            "POST /payments/qr",
            "GET  /payments/:id/status",
            "POST /payments/:id/cancel",
            "GET  /payments/:id/qr.png",
            "POST /callbacks/status",
            "GET  /admin/promos",
            "POST /admin/promos",
            "POST /admin/promos/monthly"
        ]
    }))
}

/// Health check endpoint for Docker/K8s liveness probes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": state.config.service_name,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

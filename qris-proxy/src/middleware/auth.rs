//! Shared-secret guards for the admin and callback route groups.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::AppState;

/// Admin routes require a configured key. With no key configured the routes
/// are disabled outright rather than left open.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.security.admin_key.as_ref() else {
        tracing::warn!("Admin request rejected: no admin key configured");
        return unauthorized("Unauthorized: admin access is not configured");
    };

    match presented_key(&headers, "X-Admin-Key") {
        Some(key) if matches_secret(key, expected) => next.run(request).await,
        _ => {
            tracing::warn!("Failed admin authentication attempt");
            unauthorized("Unauthorized: invalid or missing admin key")
        }
    }
}

/// Callback guard, enforced only when a callback secret is configured.
pub async fn callback_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.security.callback_secret.as_ref() {
        match presented_key(&headers, "X-Callback-Secret") {
            Some(secret) if matches_secret(secret, expected) => {}
            _ => {
                tracing::warn!("Rejected status callback: invalid or missing secret");
                return unauthorized("Unauthorized: invalid or missing callback secret");
            }
        }
    }
    next.run(request).await
}

/// The credential arrives either in a service-specific header or as a bearer
/// token. A blank header falls through to the token instead of shadowing it.
fn presented_key<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
        })
}

fn matches_secret(presented: &str, expected: &Secret<String>) -> bool {
    presented
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

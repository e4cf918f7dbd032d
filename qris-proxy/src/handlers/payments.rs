//! Payment handlers: QR creation with promo pricing, plus the pass-through
//! endpoints that relay the upstream gateway verbatim.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    dtos::{CreateQrRequest, StatusCallbackRequest},
    error::AppError,
    middleware::ClientIdentity,
    models::AppliedPromo,
    services::{record_promo_applied, voucher},
    AppState,
};

/// Create a payment QR.
///
/// The discount is evaluated before the upstream call so the gateway only
/// ever sees the final amount; usage is committed to the store strictly
/// after the gateway accepted the charge. A failed upstream call is relayed
/// with its original status code and never consumes a promo.
pub async fn create_qr(
    State(state): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
    Json(payload): Json<CreateQrRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;

    let device_id = identity
        .device_id
        .as_deref()
        .or(payload.device_id.as_deref());
    let device_key = voucher::derive_device_key(
        device_id,
        identity.client_ip.as_deref(),
        state.config.security.device_pepper.expose_secret(),
    );

    let now = Utc::now();
    let snapshot = state.store.load().await?;
    let decision = voucher::evaluate(
        &snapshot.document,
        payload.amount,
        &device_key,
        payload.promo_code.as_deref(),
        now,
    );

    tracing::info!(
        amount = payload.amount,
        amount_final = decision.amount_final,
        discount = decision.discount_amount,
        "Creating payment QR"
    );

    let reply = state
        .qris
        .create_qr(decision.amount_final, payload.normalized_theme())
        .await?;

    if !reply.status.is_success() {
        tracing::warn!(status = %reply.status, "Upstream createqr failed");
        return Ok((
            reply.status,
            Json(json!({
                "success": false,
                "error": "upstream createqr failed",
                "provider": reply.body,
            })),
        )
            .into_response());
    }

    let transaction_id = extract_transaction_id(&reply.body).ok_or_else(|| {
        AppError::BadGateway("upstream createqr reply did not include idTransaksi".to_string())
    })?;

    if let Some(applied) = &decision.applied_promo {
        let mut document = snapshot.document;
        voucher::commit(&mut document, applied, &device_key, now);
        let message = format!("Record promo usage for transaction {}", transaction_id);
        state
            .store
            .save(&document, snapshot.version.as_deref(), &message)
            .await?;

        let kind = match applied {
            AppliedPromo::Custom { .. } => "custom",
            AppliedPromo::Monthly { .. } => "monthly",
        };
        record_promo_applied(kind, decision.discount_amount);
        tracing::info!(kind, discount = decision.discount_amount, "Promo redemption recorded");
    }

    let qr_url = format!(
        "{}/payments/{}/qr.png",
        public_base_url(&headers),
        urlencoding::encode(&transaction_id)
    );
    let png_path = reply
        .body
        .pointer("/data/qrPngUrl")
        .or_else(|| reply.body.get("qrPngUrl"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("/api/qr/{}.png", urlencoding::encode(&transaction_id)));
    let qr_vps_url = format!("{}{}", state.qris.base_url(), png_path);
    let pricing = serde_json::to_value(&decision).map_err(anyhow::Error::from)?;

    // Every upstream field survives; the additions live inside the `data`
    // envelope where gateway clients already look for the transaction.
    let mut body = reply.body;
    if let Some(map) = body.as_object_mut() {
        let mut data = match map.remove("data") {
            Some(Value::Object(data)) => data,
            _ => serde_json::Map::new(),
        };
        data.insert("idTransaksi".to_string(), json!(transaction_id));
        data.insert("qrUrl".to_string(), json!(qr_url));
        data.insert("qrVpsUrl".to_string(), json!(qr_vps_url));
        data.insert("pricing".to_string(), pricing);
        map.insert("data".to_string(), Value::Object(data));
    }

    Ok((StatusCode::OK, Json(body)).into_response())
}

pub async fn transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Response, AppError> {
    let reply = state.qris.transaction_status(&transaction_id).await?;
    Ok((reply.status, Json(reply.body)).into_response())
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Response, AppError> {
    tracing::info!(transaction = %transaction_id, "Cancelling transaction");
    let reply = state.qris.cancel(&transaction_id).await?;
    Ok((reply.status, Json(reply.body)).into_response())
}

/// Relay the QR PNG. Marked no-store so an expired QR is never served from a
/// cache.
pub async fn qr_image(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Response, AppError> {
    let image = state.qris.qr_image(&transaction_id).await?;
    if !image.status.is_success() {
        tracing::warn!(
            status = %image.status,
            transaction = %transaction_id,
            "Upstream QR image missing"
        );
        return Ok((
            image.status,
            Json(json!({ "success": false, "error": "QR image not found upstream" })),
        )
            .into_response());
    }

    let content_type = image
        .content_type
        .unwrap_or_else(|| "image/png".to_string());
    Ok((
        image.status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        image.bytes,
    )
        .into_response())
}

/// Forward a payment status notification to the upstream gateway.
pub async fn status_callback(
    State(state): State<AppState>,
    Json(payload): Json<StatusCallbackRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;
    tracing::info!(
        transaction = %payload.id_transaksi,
        status = %payload.status,
        "Forwarding status callback"
    );
    let reply = state.qris.set_status(&payload).await?;
    Ok((reply.status, Json(reply.body)).into_response())
}

/// The gateway moved the transaction id between the envelope and the root
/// across versions; accept both, and numeric ids as well.
fn extract_transaction_id(body: &Value) -> Option<String> {
    body.pointer("/data/idTransaksi")
        .and_then(id_string)
        .or_else(|| body.get("idTransaksi").and_then(id_string))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn public_base_url(headers: &HeaderMap) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| headers.get(header::HOST).and_then(|value| value.to_str().ok()))
        .unwrap_or("localhost");
    format!("{}://{}", proto, host)
}

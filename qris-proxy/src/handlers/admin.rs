//! Admin handlers for promo management.
//!
//! Every mutation reloads the document, applies the change and saves against
//! the loaded version. A concurrent writer surfaces as 409 and the caller
//! retries; nothing here merges documents.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    dtos::{CustomPromoUpsert, MonthlyPromoUpdate},
    error::AppError,
    services::voucher,
    AppState,
};

pub async fn list_promos(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let snapshot = state.store.load().await?;
    let catalog = voucher::admin_list_promos(&snapshot.document);
    Ok(Json(json!({ "success": true, "data": catalog })))
}

pub async fn upsert_promo(
    State(state): State<AppState>,
    Json(payload): Json<CustomPromoUpsert>,
) -> Result<Json<Value>, AppError> {
    payload.validate()?;

    let snapshot = state.store.load().await?;
    let mut document = snapshot.document;
    let (code, promo) = voucher::admin_upsert_custom(&mut document, payload)?;

    let message = format!("Upsert promo {}", code);
    state
        .store
        .save(&document, snapshot.version.as_deref(), &message)
        .await?;

    tracing::info!(code = %code, enabled = promo.enabled, "Custom promo saved");
    Ok(Json(json!({
        "success": true,
        "data": { "code": code, "promo": promo }
    })))
}

pub async fn set_monthly_promo(
    State(state): State<AppState>,
    Json(payload): Json<MonthlyPromoUpdate>,
) -> Result<Json<Value>, AppError> {
    let snapshot = state.store.load().await?;
    let mut document = snapshot.document;
    let monthly = voucher::admin_set_monthly(&mut document, payload);

    state
        .store
        .save(&document, snapshot.version.as_deref(), "Update monthly promo")
        .await?;

    tracing::info!(
        enabled = monthly.enabled,
        percent = monthly.percent,
        "Monthly promo updated"
    );
    Ok(Json(json!({ "success": true, "data": monthly })))
}

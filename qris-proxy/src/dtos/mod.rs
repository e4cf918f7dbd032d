//! Request payloads for the public, callback and admin routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::DiscountType;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQrRequest {
    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: u64,
    pub theme: Option<String>,
    pub device_id: Option<String>,
    pub promo_code: Option<String>,
}

impl CreateQrRequest {
    /// The upstream renderer knows exactly two themes; anything else falls
    /// back to the default.
    pub fn normalized_theme(&self) -> &'static str {
        match self.theme.as_deref() {
            Some("theme2") => "theme2",
            _ => "theme1",
        }
    }
}

/// Status notification forwarded verbatim to the upstream gateway. Optional
/// fields are dropped from the forwarded body rather than sent as null.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusCallbackRequest {
    #[validate(length(min = 1, message = "idTransaksi is required"))]
    pub id_transaksi: String,
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_via: Option<String>,
}

/// Partial update for the monthly promo; unset fields keep their current
/// value. Out-of-range percentages are clamped, not rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPromoUpdate {
    pub enabled: Option<bool>,
    pub percent: Option<f64>,
    pub min_amount: Option<u64>,
    pub max_discount: Option<u64>,
}

/// Create-or-update payload for a custom promo code.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomPromoUpsert {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
    pub enabled: Option<bool>,
    pub discount_type: Option<DiscountType>,
    pub value: Option<f64>,
    pub min_amount: Option<u64>,
    pub max_discount: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<u64>,
    pub per_device_limit: Option<u64>,
}

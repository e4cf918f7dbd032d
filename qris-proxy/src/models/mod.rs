//! Persisted promo document and the pricing decision types.
//!
//! The whole promo state lives in one JSON document that is loaded from the
//! remote store, mutated in memory, and written back. `BTreeMap`s keep the
//! serialized form stable across round trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The entire persisted state, loaded and saved atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PromoDocument {
    pub version: u32,
    pub monthly_promo: MonthlyPromo,
    /// Keyed by normalized (upper-case) promo code.
    pub custom_promos: BTreeMap<String, CustomPromo>,
    /// Keyed by derived device key.
    pub devices: BTreeMap<String, DeviceRecord>,
    /// Usage counters per promo code.
    pub usage: BTreeMap<String, UsageCounters>,
}

impl Default for PromoDocument {
    fn default() -> Self {
        Self {
            version: 1,
            monthly_promo: MonthlyPromo::default(),
            custom_promos: BTreeMap::new(),
            devices: BTreeMap::new(),
            usage: BTreeMap::new(),
        }
    }
}

/// First-payment-of-the-month promo, one config for all devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonthlyPromo {
    pub enabled: bool,
    pub percent: f64,
    pub min_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<u64>,
}

impl Default for MonthlyPromo {
    fn default() -> Self {
        Self {
            enabled: true,
            percent: 10.0,
            min_amount: 0,
            max_discount: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    #[default]
    Percent,
    Fixed,
}

/// Admin-managed promo code. `value` is a percentage for `percent` promos and
/// an absolute amount for `fixed` promos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomPromo {
    pub enabled: bool,
    pub discount_type: DiscountType,
    pub value: f64,
    pub min_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<u64>,
    #[serde(with = "lenient_datetime", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Total redemptions allowed across all devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u64>,
    /// Redemptions allowed per device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_device_limit: Option<u64>,
}

impl Default for CustomPromo {
    fn default() -> Self {
        Self {
            enabled: true,
            discount_type: DiscountType::Percent,
            value: 0.0,
            min_amount: 0,
            max_discount: None,
            expires_at: None,
            usage_limit: None,
            per_device_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceRecord {
    #[serde(with = "lenient_datetime", skip_serializing_if = "Option::is_none")]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_promo_state: Option<MonthlyPromoState>,
}

/// Monthly-promo consumption, scoped to exactly one calendar period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPromoState {
    /// UTC year-month, e.g. "2026-08".
    pub period_key: String,
    pub consumed: bool,
    #[serde(default, with = "lenient_datetime", skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageCounters {
    pub total_used_count: u64,
    pub per_device_used_count: BTreeMap<String, u64>,
}

/// Outcome of evaluating a charge against the promo document.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricingDecision {
    pub amount_original: u64,
    pub amount_final: u64,
    pub discount_amount: u64,
    pub applied_promo: Option<AppliedPromo>,
}

/// Which promo produced the discount. Serialized with a `kind` tag so clients
/// can branch without probing fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AppliedPromo {
    #[serde(rename_all = "camelCase")]
    Custom {
        code: String,
        discount_type: DiscountType,
        value: f64,
    },
    #[serde(rename_all = "camelCase")]
    Monthly { percent: f64 },
}

/// Read-only projection returned by the admin listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoCatalog {
    pub monthly_promo: MonthlyPromo,
    pub custom_promos: BTreeMap<String, CustomPromo>,
}

/// Timestamps in the stored document are RFC 3339 strings. Hand-edited files
/// happen; an unparseable timestamp degrades to "absent" instead of failing
/// the whole document.
pub(crate) mod lenient_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        }))
    }
}

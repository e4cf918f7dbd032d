//! Promo/voucher engine.
//!
//! Pure functions over the in-memory [`PromoDocument`]: deciding whether a
//! discount applies to a charge, recording consumption after the upstream
//! charge succeeded, and the admin mutations. No I/O and no clocks; callers
//! pass `now` in so every rule is testable with fixed timestamps.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::dtos::{CustomPromoUpsert, MonthlyPromoUpdate};
use crate::models::{
    AppliedPromo, CustomPromo, DiscountType, MonthlyPromo, MonthlyPromoState, PricingDecision,
    PromoCatalog, PromoDocument,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoucherError {
    #[error("promo code is required")]
    CodeRequired,
}

/// UTC year-month key scoping monthly-promo eligibility, e.g. "2026-08".
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Promo codes are case-insensitive and stored upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Derive the pseudonymous device key for promo bookkeeping.
///
/// A supplied device identifier wins over the network address; the key is a
/// one-way salted hash either way, so the stored document never contains the
/// raw identifier. Callers with neither share the `unknown` sentinel slot.
pub fn derive_device_key(
    device_id: Option<&str>,
    network_address: Option<&str>,
    pepper: &str,
) -> String {
    if let Some(id) = device_id.map(str::trim).filter(|s| !s.is_empty()) {
        return format!("dev:{}", hash_identity(id, pepper));
    }
    if let Some(addr) = network_address.map(str::trim).filter(|s| !s.is_empty()) {
        return format!("ip:{}", hash_identity(addr, pepper));
    }
    "unknown".to_string()
}

fn hash_identity(raw: &str, pepper: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", raw, pepper).as_bytes());
    hex::encode(digest)
}

/// Decide the discount for a charge. Read-only: usage is only consumed by
/// [`commit`], which the caller invokes after the upstream charge succeeded.
///
/// Precedence is strict and nothing stacks: an explicit promo code is tried
/// first, the monthly promo only when no code applied.
pub fn evaluate(
    doc: &PromoDocument,
    amount: u64,
    device_key: &str,
    promo_code: Option<&str>,
    now: DateTime<Utc>,
) -> PricingDecision {
    let code = promo_code.map(normalize_code).filter(|c| !c.is_empty());
    if let Some(code) = code {
        if let Some(promo) = doc.custom_promos.get(&code) {
            if custom_eligible(doc, &code, promo, amount, device_key, now) {
                let discount = custom_discount(promo, amount);
                if discount > 0 {
                    return decision(
                        amount,
                        discount,
                        Some(AppliedPromo::Custom {
                            code,
                            discount_type: promo.discount_type,
                            value: promo.value,
                        }),
                    );
                }
            }
        }
    }

    let monthly = &doc.monthly_promo;
    if monthly.enabled && amount >= monthly.min_amount && !monthly_consumed(doc, device_key, now) {
        let raw = percent_discount(amount, monthly.percent);
        let capped = monthly.max_discount.map_or(raw, |cap| raw.min(cap));
        let discount = capped.min(amount);
        if discount > 0 {
            return decision(
                amount,
                discount,
                Some(AppliedPromo::Monthly {
                    percent: clamp_percent(monthly.percent),
                }),
            );
        }
    }

    decision(amount, 0, None)
}

/// Record consumption of a promo that [`evaluate`] returned as applied.
///
/// Eligibility is not re-checked here; the caller is responsible for the
/// evaluate → upstream success → commit sequencing.
pub fn commit(doc: &mut PromoDocument, applied: &AppliedPromo, device_key: &str, now: DateTime<Utc>) {
    match applied {
        AppliedPromo::Monthly { .. } => {
            let device = doc.devices.entry(device_key.to_string()).or_default();
            if device.first_seen_at.is_none() {
                device.first_seen_at = Some(now);
            }
            device.monthly_promo_state = Some(MonthlyPromoState {
                period_key: period_key(now),
                consumed: true,
                consumed_at: Some(now),
            });
        }
        AppliedPromo::Custom { code, .. } => {
            // Both counters move together; totalUsedCount stays the sum of
            // the per-device counts.
            let counters = doc.usage.entry(code.clone()).or_default();
            counters.total_used_count += 1;
            *counters
                .per_device_used_count
                .entry(device_key.to_string())
                .or_insert(0) += 1;
        }
    }
}

/// Replace the monthly promo config, keeping current values for unset fields.
pub fn admin_set_monthly(doc: &mut PromoDocument, update: MonthlyPromoUpdate) -> MonthlyPromo {
    let current = doc.monthly_promo.clone();
    let next = MonthlyPromo {
        enabled: update.enabled.unwrap_or(current.enabled),
        percent: clamp_percent(update.percent.unwrap_or(current.percent)),
        min_amount: update.min_amount.unwrap_or(current.min_amount),
        max_discount: update.max_discount.or(current.max_discount),
    };
    doc.monthly_promo = next.clone();
    next
}

/// Insert or update a custom promo, merging supplied fields over the existing
/// entry. The code is normalized upper-case and must be non-empty.
pub fn admin_upsert_custom(
    doc: &mut PromoDocument,
    update: CustomPromoUpsert,
) -> Result<(String, CustomPromo), VoucherError> {
    let code = normalize_code(&update.code);
    if code.is_empty() {
        return Err(VoucherError::CodeRequired);
    }

    let current = doc.custom_promos.get(&code).cloned().unwrap_or_default();
    let next = CustomPromo {
        enabled: update.enabled.unwrap_or(current.enabled),
        discount_type: update.discount_type.unwrap_or(current.discount_type),
        value: sanitize_value(update.value.unwrap_or(current.value)),
        min_amount: update.min_amount.unwrap_or(current.min_amount),
        max_discount: update.max_discount.or(current.max_discount),
        expires_at: update.expires_at.or(current.expires_at),
        usage_limit: update.usage_limit.or(current.usage_limit),
        per_device_limit: update.per_device_limit.or(current.per_device_limit),
    };
    doc.custom_promos.insert(code.clone(), next.clone());
    Ok((code, next))
}

pub fn admin_list_promos(doc: &PromoDocument) -> PromoCatalog {
    PromoCatalog {
        monthly_promo: doc.monthly_promo.clone(),
        custom_promos: doc.custom_promos.clone(),
    }
}

fn custom_eligible(
    doc: &PromoDocument,
    code: &str,
    promo: &CustomPromo,
    amount: u64,
    device_key: &str,
    now: DateTime<Utc>,
) -> bool {
    if !promo.enabled || amount < promo.min_amount {
        return false;
    }
    if let Some(expires_at) = promo.expires_at {
        if now > expires_at {
            return false;
        }
    }
    let counters = doc.usage.get(code);
    if let Some(limit) = promo.usage_limit {
        let total = counters.map_or(0, |c| c.total_used_count);
        if total >= limit {
            return false;
        }
    }
    if let Some(limit) = promo.per_device_limit {
        let used = counters
            .and_then(|c| c.per_device_used_count.get(device_key))
            .copied()
            .unwrap_or(0);
        if used >= limit {
            return false;
        }
    }
    true
}

fn custom_discount(promo: &CustomPromo, amount: u64) -> u64 {
    let raw = match promo.discount_type {
        DiscountType::Percent => percent_discount(amount, promo.value),
        DiscountType::Fixed => {
            if promo.value.is_finite() {
                promo.value.max(0.0).floor() as u64
            } else {
                0
            }
        }
    };
    let capped = promo.max_discount.map_or(raw, |cap| raw.min(cap));
    capped.min(amount)
}

fn monthly_consumed(doc: &PromoDocument, device_key: &str, now: DateTime<Utc>) -> bool {
    doc.devices
        .get(device_key)
        .and_then(|d| d.monthly_promo_state.as_ref())
        .map_or(false, |state| {
            state.consumed && state.period_key == period_key(now)
        })
}

fn percent_discount(amount: u64, percent: f64) -> u64 {
    (amount as f64 * clamp_percent(percent) / 100.0).floor() as u64
}

fn sanitize_value(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn decision(amount: u64, discount: u64, applied: Option<AppliedPromo>) -> PricingDecision {
    PricingDecision {
        amount_original: amount,
        amount_final: amount.saturating_sub(discount).max(1),
        discount_amount: discount,
        applied_promo: applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 15, 12, 0, 0).unwrap()
    }

    fn doc_with_monthly(percent: f64) -> PromoDocument {
        let mut doc = PromoDocument::default();
        doc.monthly_promo = MonthlyPromo {
            enabled: true,
            percent,
            min_amount: 0,
            max_discount: None,
        };
        doc
    }

    fn doc_with_custom(code: &str, promo: CustomPromo) -> PromoDocument {
        let mut doc = PromoDocument::default();
        doc.monthly_promo.enabled = false;
        doc.custom_promos.insert(code.to_string(), promo);
        doc
    }

    fn redeem(doc: &mut PromoDocument, amount: u64, device: &str, code: Option<&str>) -> PricingDecision {
        let result = evaluate(doc, amount, device, code, fixed_now());
        if let Some(applied) = &result.applied_promo {
            commit(doc, applied, device, fixed_now());
        }
        result
    }

    #[test]
    fn percent_discount_is_floored_and_final_never_below_one() {
        for amount in [1u64, 5, 10, 99, 100, 999, 1000, 12_345] {
            for percent in [0.0f64, 1.0, 10.0, 33.0, 50.0, 99.0, 100.0] {
                let doc = doc_with_monthly(percent);
                let result = evaluate(&doc, amount, "dev:x", None, fixed_now());
                let expected = ((amount as f64) * percent / 100.0).floor() as u64;
                assert_eq!(result.discount_amount, expected);
                assert!(result.amount_final >= 1);
                assert_eq!(
                    result.amount_final,
                    (amount - result.discount_amount).max(1)
                );
            }
        }
    }

    #[test]
    fn monthly_promo_applies_ten_percent() {
        let doc = doc_with_monthly(10.0);
        let result = evaluate(&doc, 1000, "dev:x", None, fixed_now());
        assert_eq!(result.discount_amount, 100);
        assert_eq!(result.amount_final, 900);
        assert_eq!(
            result.applied_promo,
            Some(AppliedPromo::Monthly { percent: 10.0 })
        );
    }

    #[test]
    fn small_amount_with_full_discount_clamps_to_one() {
        let doc = doc_with_monthly(100.0);
        let result = evaluate(&doc, 5, "dev:x", None, fixed_now());
        assert_eq!(result.discount_amount, 5);
        assert_eq!(result.amount_final, 1);
    }

    #[test]
    fn monthly_promo_respects_min_amount_and_max_discount() {
        let mut doc = doc_with_monthly(10.0);
        doc.monthly_promo.min_amount = 500;
        let result = evaluate(&doc, 499, "dev:x", None, fixed_now());
        assert!(result.applied_promo.is_none());

        doc.monthly_promo.max_discount = Some(30);
        let result = evaluate(&doc, 1000, "dev:x", None, fixed_now());
        assert_eq!(result.discount_amount, 30);
        assert_eq!(result.amount_final, 970);
    }

    #[test]
    fn monthly_promo_consumed_once_per_period() {
        let mut doc = doc_with_monthly(10.0);
        let first = redeem(&mut doc, 1000, "dev:x", None);
        assert!(first.applied_promo.is_some());

        let second = evaluate(&doc, 1000, "dev:x", None, fixed_now());
        assert!(second.applied_promo.is_none());
        assert_eq!(second.amount_final, 1000);
    }

    #[test]
    fn monthly_promo_resets_on_period_rollover() {
        let mut doc = doc_with_monthly(10.0);
        let june = Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap();
        let july = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();

        let first = evaluate(&doc, 1000, "dev:x", None, june);
        commit(&mut doc, first.applied_promo.as_ref().unwrap(), "dev:x", june);
        assert!(evaluate(&doc, 1000, "dev:x", None, june)
            .applied_promo
            .is_none());

        let next_period = evaluate(&doc, 1000, "dev:x", None, july);
        assert!(next_period.applied_promo.is_some());
    }

    #[test]
    fn fixed_custom_code_subtracts_value() {
        let doc = doc_with_custom(
            "SAVE20",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 20.0,
                ..CustomPromo::default()
            },
        );
        let result = evaluate(&doc, 1000, "dev:x", Some("SAVE20"), fixed_now());
        assert_eq!(result.discount_amount, 20);
        assert_eq!(result.amount_final, 980);
        assert_eq!(
            result.applied_promo,
            Some(AppliedPromo::Custom {
                code: "SAVE20".to_string(),
                discount_type: DiscountType::Fixed,
                value: 20.0,
            })
        );
    }

    #[test]
    fn promo_code_is_trimmed_and_case_insensitive() {
        let doc = doc_with_custom(
            "SAVE20",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 20.0,
                ..CustomPromo::default()
            },
        );
        let result = evaluate(&doc, 1000, "dev:x", Some("  save20 "), fixed_now());
        assert!(result.applied_promo.is_some());
    }

    #[test]
    fn custom_code_takes_precedence_and_leaves_monthly_unconsumed() {
        let mut doc = doc_with_monthly(10.0);
        doc.custom_promos.insert(
            "SAVE20".to_string(),
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 20.0,
                ..CustomPromo::default()
            },
        );

        let result = redeem(&mut doc, 1000, "dev:x", Some("SAVE20"));
        assert!(matches!(
            result.applied_promo,
            Some(AppliedPromo::Custom { .. })
        ));
        assert_eq!(result.discount_amount, 20);

        // the monthly slot is still available afterwards
        let monthly = evaluate(&doc, 1000, "dev:x", None, fixed_now());
        assert!(matches!(
            monthly.applied_promo,
            Some(AppliedPromo::Monthly { .. })
        ));
    }

    #[test]
    fn expired_code_falls_through_to_monthly() {
        let mut doc = doc_with_monthly(10.0);
        doc.custom_promos.insert(
            "OLD".to_string(),
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 50.0,
                expires_at: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
                ..CustomPromo::default()
            },
        );

        let result = evaluate(&doc, 1000, "dev:x", Some("OLD"), fixed_now());
        assert!(matches!(
            result.applied_promo,
            Some(AppliedPromo::Monthly { .. })
        ));
        assert_eq!(result.discount_amount, 100);
    }

    #[test]
    fn expiry_is_inclusive() {
        let expires_at = fixed_now();
        let doc = doc_with_custom(
            "EDGE",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 10.0,
                expires_at: Some(expires_at),
                ..CustomPromo::default()
            },
        );
        assert!(evaluate(&doc, 1000, "dev:x", Some("EDGE"), expires_at)
            .applied_promo
            .is_some());
        assert!(evaluate(
            &doc,
            1000,
            "dev:x",
            Some("EDGE"),
            expires_at + chrono::Duration::seconds(1)
        )
        .applied_promo
        .is_none());
    }

    #[test]
    fn usage_limit_caps_total_redemptions_across_devices() {
        let mut doc = doc_with_custom(
            "CAP2",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 10.0,
                usage_limit: Some(2),
                ..CustomPromo::default()
            },
        );

        assert!(redeem(&mut doc, 1000, "dev:a", Some("CAP2")).applied_promo.is_some());
        assert!(redeem(&mut doc, 1000, "dev:b", Some("CAP2")).applied_promo.is_some());
        assert!(redeem(&mut doc, 1000, "dev:c", Some("CAP2")).applied_promo.is_none());
    }

    #[test]
    fn per_device_limit_is_tracked_independently() {
        let mut doc = doc_with_custom(
            "ONCE",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 10.0,
                per_device_limit: Some(1),
                ..CustomPromo::default()
            },
        );

        assert!(redeem(&mut doc, 1000, "dev:x", Some("ONCE")).applied_promo.is_some());
        assert!(redeem(&mut doc, 1000, "dev:x", Some("ONCE")).applied_promo.is_none());
        assert!(redeem(&mut doc, 1000, "dev:y", Some("ONCE")).applied_promo.is_some());
    }

    #[test]
    fn custom_percent_respects_max_discount() {
        let doc = doc_with_custom(
            "HALF",
            CustomPromo {
                discount_type: DiscountType::Percent,
                value: 50.0,
                max_discount: Some(100),
                ..CustomPromo::default()
            },
        );
        let result = evaluate(&doc, 1000, "dev:x", Some("HALF"), fixed_now());
        assert_eq!(result.discount_amount, 100);
        assert_eq!(result.amount_final, 900);
    }

    #[test]
    fn disabled_or_zero_value_code_does_not_apply() {
        let doc = doc_with_custom(
            "OFF",
            CustomPromo {
                enabled: false,
                discount_type: DiscountType::Fixed,
                value: 10.0,
                ..CustomPromo::default()
            },
        );
        assert!(evaluate(&doc, 1000, "dev:x", Some("OFF"), fixed_now())
            .applied_promo
            .is_none());

        let doc = doc_with_custom("ZERO", CustomPromo::default());
        assert!(evaluate(&doc, 1000, "dev:x", Some("ZERO"), fixed_now())
            .applied_promo
            .is_none());
    }

    #[test]
    fn evaluate_never_mutates_the_document() {
        let mut doc = doc_with_monthly(10.0);
        doc.custom_promos.insert(
            "SAVE20".to_string(),
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 20.0,
                usage_limit: Some(5),
                ..CustomPromo::default()
            },
        );

        let before = serde_json::to_string(&doc).unwrap();
        evaluate(&doc, 1000, "dev:x", Some("SAVE20"), fixed_now());
        evaluate(&doc, 1000, "dev:x", None, fixed_now());
        evaluate(&doc, 1000, "never-seen", Some("MISSING"), fixed_now());
        let after = serde_json::to_string(&doc).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn commit_keeps_total_equal_to_sum_of_device_counts() {
        let mut doc = doc_with_custom(
            "SUM",
            CustomPromo {
                discount_type: DiscountType::Fixed,
                value: 10.0,
                ..CustomPromo::default()
            },
        );

        redeem(&mut doc, 1000, "dev:a", Some("SUM"));
        redeem(&mut doc, 1000, "dev:a", Some("SUM"));
        redeem(&mut doc, 1000, "dev:b", Some("SUM"));

        let counters = doc.usage.get("SUM").unwrap();
        let sum: u64 = counters.per_device_used_count.values().sum();
        assert_eq!(counters.total_used_count, 3);
        assert_eq!(counters.total_used_count, sum);
    }

    #[test]
    fn device_key_is_stable_and_salted() {
        let a = derive_device_key(Some("tablet-1"), None, "pepper");
        let b = derive_device_key(Some("tablet-1"), None, "pepper");
        let c = derive_device_key(Some("tablet-1"), None, "other-pepper");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("dev:"));
        assert!(!a.contains("tablet-1"));
    }

    #[test]
    fn device_key_falls_back_to_address_then_sentinel() {
        let from_ip = derive_device_key(None, Some("10.0.0.9"), "pepper");
        assert!(from_ip.starts_with("ip:"));

        let blank_id = derive_device_key(Some("   "), Some("10.0.0.9"), "pepper");
        assert_eq!(blank_id, from_ip);

        assert_eq!(derive_device_key(None, None, "pepper"), "unknown");
    }

    #[test]
    fn set_monthly_clamps_percent_and_keeps_unset_fields() {
        let mut doc = doc_with_monthly(10.0);
        doc.monthly_promo.min_amount = 250;

        let next = admin_set_monthly(
            &mut doc,
            MonthlyPromoUpdate {
                enabled: None,
                percent: Some(250.0),
                min_amount: None,
                max_discount: Some(500),
            },
        );
        assert!(next.enabled);
        assert_eq!(next.percent, 100.0);
        assert_eq!(next.min_amount, 250);
        assert_eq!(next.max_discount, Some(500));
        assert_eq!(doc.monthly_promo, next);
    }

    #[test]
    fn upsert_normalizes_code_and_merges_over_existing() {
        let mut doc = PromoDocument::default();
        let (code, promo) = admin_upsert_custom(
            &mut doc,
            CustomPromoUpsert {
                code: " save20 ".to_string(),
                enabled: None,
                discount_type: Some(DiscountType::Fixed),
                value: Some(20.0),
                min_amount: None,
                max_discount: None,
                expires_at: None,
                usage_limit: Some(100),
                per_device_limit: None,
            },
        )
        .unwrap();
        assert_eq!(code, "SAVE20");
        assert!(promo.enabled);
        assert_eq!(promo.value, 20.0);

        // partial update keeps previous fields
        let (_, merged) = admin_upsert_custom(
            &mut doc,
            CustomPromoUpsert {
                code: "SAVE20".to_string(),
                enabled: Some(false),
                discount_type: None,
                value: None,
                min_amount: None,
                max_discount: None,
                expires_at: None,
                usage_limit: None,
                per_device_limit: None,
            },
        )
        .unwrap();
        assert!(!merged.enabled);
        assert_eq!(merged.discount_type, DiscountType::Fixed);
        assert_eq!(merged.value, 20.0);
        assert_eq!(merged.usage_limit, Some(100));
    }

    #[test]
    fn upsert_rejects_blank_code() {
        let mut doc = PromoDocument::default();
        let err = admin_upsert_custom(
            &mut doc,
            CustomPromoUpsert {
                code: "   ".to_string(),
                enabled: None,
                discount_type: None,
                value: None,
                min_amount: None,
                max_discount: None,
                expires_at: None,
                usage_limit: None,
                per_device_limit: None,
            },
        )
        .unwrap_err();
        assert_eq!(err, VoucherError::CodeRequired);
    }

    #[test]
    fn list_promos_projects_without_usage_or_devices() {
        let mut doc = doc_with_monthly(10.0);
        doc.custom_promos
            .insert("SAVE20".to_string(), CustomPromo::default());
        redeem(&mut doc, 1000, "dev:x", None);

        let catalog = admin_list_promos(&doc);
        assert_eq!(catalog.monthly_promo, doc.monthly_promo);
        assert_eq!(catalog.custom_promos.len(), 1);

        let json = serde_json::to_value(&catalog).unwrap();
        assert!(json.get("devices").is_none());
        assert!(json.get("usage").is_none());
    }
}

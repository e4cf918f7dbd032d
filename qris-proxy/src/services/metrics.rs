//! Metrics collection and Prometheus export.
//!
//! Request-level metrics flow through the `metrics` facade into the exporter;
//! promo counters use a dedicated Prometheus registry whose output is
//! appended to the exporter's render.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PROMO_APPLICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROMO_DISCOUNT_AMOUNT_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the recorder and the promo counters. Idempotent, so test
/// harnesses can call it once per spawned app.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    });

    let registry = PROMETHEUS_REGISTRY.get_or_init(Registry::new);

    PROMO_APPLICATIONS_TOTAL.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new(
                "promo_applications_total",
                "Promo redemptions by promo kind",
            ),
            &["kind"],
        )
        .expect("Failed to create promo_applications_total metric");
        registry
            .register(Box::new(counter.clone()))
            .expect("Failed to register promo_applications_total");
        counter
    });

    PROMO_DISCOUNT_AMOUNT_TOTAL.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new(
                "promo_discount_amount_total",
                "Total discount granted by promo kind, in the smallest currency unit",
            ),
            &["kind"],
        )
        .expect("Failed to create promo_discount_amount_total metric");
        registry
            .register(Box::new(counter.clone()))
            .expect("Failed to register promo_discount_amount_total");
        counter
    });
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    // Append custom prometheus metrics
    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record a committed promo redemption and the discount it granted.
pub fn record_promo_applied(kind: &str, discount_amount: u64) {
    if let Some(counter) = PROMO_APPLICATIONS_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
    if let Some(counter) = PROMO_DISCOUNT_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[kind]).inc_by(discount_amount);
    }
}

//! Metrics module for the redemption engine.
//! Provides Prometheus metrics for redemption, dunning, and recovery flows.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Redemption attempt duration histogram
pub static REDEMPTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "redemption_attempt_duration_seconds",
            "Redemption attempt duration"
        ),
        &["outcome"]
    )
    .expect("Failed to register REDEMPTION_DURATION")
});

/// Redemption outcomes counter
pub static REDEMPTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Dunning dispositions counter
pub static DUNNING_DISPOSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription state transitions counter
pub static SUBSCRIPTION_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook replays counter
pub static WEBHOOK_REPLAYS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sync recoveries counter
pub static SYNC_RECOVERIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Current depth of the redemption job queue
pub static QUEUE_DEPTH: OnceLock<IntGauge> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    REDEMPTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "redemption_attempts_total",
                "Total redemption attempts by workspace and outcome"
            ),
            &["workspace_id", "outcome"]
        )
        .expect("Failed to register REDEMPTIONS_TOTAL")
    });

    DUNNING_DISPOSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "redemption_dunning_dispositions_total",
                "Dunning decisions by disposition"
            ),
            &["disposition"]
        )
        .expect("Failed to register DUNNING_DISPOSITIONS_TOTAL")
    });

    SUBSCRIPTION_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "redemption_subscription_transitions_total",
                "Subscription state transitions"
            ),
            &["from", "to"]
        )
        .expect("Failed to register SUBSCRIPTION_TRANSITIONS_TOTAL")
    });

    WEBHOOK_REPLAYS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "redemption_webhook_replays_total",
                "Webhook replay requests by provider and result"
            ),
            &["provider", "result"]
        )
        .expect("Failed to register WEBHOOK_REPLAYS_TOTAL")
    });

    SYNC_RECOVERIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "redemption_sync_recoveries_total",
                "Sync session recoveries by mode and result"
            ),
            &["mode", "result"]
        )
        .expect("Failed to register SYNC_RECOVERIES_TOTAL")
    });

    QUEUE_DEPTH.get_or_init(|| {
        register_int_gauge!(opts!(
            "redemption_queue_depth",
            "Jobs currently waiting in the redemption queue"
        ))
        .expect("Failed to register QUEUE_DEPTH")
    });

    // Force initialization of lazy statics
    let _ = &*REDEMPTION_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a redemption attempt outcome.
pub fn record_redemption(workspace_id: &str, outcome: &str) {
    if let Some(counter) = REDEMPTIONS_TOTAL.get() {
        counter.with_label_values(&[workspace_id, outcome]).inc();
    }
}

/// Record a dunning disposition (retry, exhausted, permanent).
pub fn record_dunning_disposition(disposition: &str) {
    if let Some(counter) = DUNNING_DISPOSITIONS_TOTAL.get() {
        counter.with_label_values(&[disposition]).inc();
    }
}

/// Record a subscription state transition.
pub fn record_transition(from: &str, to: &str) {
    if let Some(counter) = SUBSCRIPTION_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[from, to]).inc();
    }
}

/// Record a webhook replay result.
pub fn record_webhook_replay(provider: &str, result: &str) {
    if let Some(counter) = WEBHOOK_REPLAYS_TOTAL.get() {
        counter.with_label_values(&[provider, result]).inc();
    }
}

/// Record a sync recovery result.
pub fn record_sync_recovery(mode: &str, result: &str) {
    if let Some(counter) = SYNC_RECOVERIES_TOTAL.get() {
        counter.with_label_values(&[mode, result]).inc();
    }
}

/// Update the queue depth gauge.
pub fn set_queue_depth(depth: i64) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.set(depth);
    }
}

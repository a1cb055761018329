//! Prometheus metrics for the market data multiplexer.
//!
//! Covers:
//! - Upstream subscriptions (open gauge, subscribe failures)
//! - Consumer churn (attach/detach, live attachment edges)
//! - Broadcast volume (updates, status transitions)
//! - Batcher throughput (records, flushes, flushed keys)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a startup bug. Registration happens on
//! first use, never on a hot path after that.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Live upstream subscriptions per feed kind.
pub static UPSTREAM_OPEN: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdmux_upstream_open",
        "Live upstream subscriptions",
        &["kind"]
    )
    .unwrap()
});

/// Upstream subscribe failures per feed kind.
pub static SUBSCRIBE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_subscribe_failures_total",
        "Upstream subscribe calls that failed",
        &["kind"]
    )
    .unwrap()
});

/// Consumer attach calls that created a new attachment.
pub static ATTACH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_attach_total",
        "Consumer attachments created",
        &["kind"]
    )
    .unwrap()
});

/// Consumer detach calls that removed an attachment.
pub static DETACH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_detach_total",
        "Consumer attachments removed",
        &["kind"]
    )
    .unwrap()
});

/// Live consumer x topic attachment edges.
pub static ATTACHMENTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdmux_attachments",
        "Live consumer attachments",
        &["kind"]
    )
    .unwrap()
});

/// Upstream updates fanned out.
pub static UPDATES_BROADCAST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_updates_broadcast_total",
        "Upstream updates fanned out to consumers",
        &["kind"]
    )
    .unwrap()
});

/// Connectivity transitions fanned out.
/// Labels: status (interrupted/restored/failed)
pub static STATUS_BROADCAST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_status_broadcast_total",
        "Upstream status transitions fanned out to consumers",
        &["kind", "status"]
    )
    .unwrap()
});

/// Observer or tap callbacks that panicked during broadcast.
pub static CALLBACK_PANICS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_callback_panics_total",
        "Consumer or tap callbacks that panicked during broadcast",
        &["kind"]
    )
    .unwrap()
});

/// Values recorded into a batcher.
pub static BATCH_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_batch_records_total",
        "Values recorded into the batcher",
        &["batcher"]
    )
    .unwrap()
});

/// Batcher flushes by outcome.
/// Labels: result (ok/error)
pub static BATCH_FLUSHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdmux_batch_flushes_total",
        "Batcher flush cycles",
        &["batcher", "result"]
    )
    .unwrap()
});

/// Keys per flushed batch.
pub static BATCH_FLUSH_KEYS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mdmux_batch_flush_keys",
        "Distinct keys per flushed batch",
        &["batcher"],
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record an upstream subscription opened.
    pub fn upstream_opened(kind: &str) {
        UPSTREAM_OPEN.with_label_values(&[kind]).inc();
    }

    /// Record an upstream subscription closed.
    pub fn upstream_closed(kind: &str) {
        UPSTREAM_OPEN.with_label_values(&[kind]).dec();
    }

    /// Record a failed subscribe call.
    pub fn subscribe_failed(kind: &str) {
        SUBSCRIBE_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a new attachment.
    pub fn attached(kind: &str) {
        ATTACH_TOTAL.with_label_values(&[kind]).inc();
        ATTACHMENTS.with_label_values(&[kind]).inc();
    }

    /// Record a removed attachment.
    pub fn detached(kind: &str) {
        DETACH_TOTAL.with_label_values(&[kind]).inc();
        ATTACHMENTS.with_label_values(&[kind]).dec();
    }

    /// Record an update fanned out.
    pub fn update_broadcast(kind: &str) {
        UPDATES_BROADCAST_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a status transition fanned out.
    pub fn status_broadcast(kind: &str, status: &str) {
        STATUS_BROADCAST_TOTAL
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Record a callback that panicked during broadcast.
    pub fn callback_panicked(kind: &str) {
        CALLBACK_PANICS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record values accepted by a batcher.
    pub fn batch_recorded(batcher: &str, count: usize) {
        BATCH_RECORDS_TOTAL
            .with_label_values(&[batcher])
            .inc_by(count as u64);
    }

    /// Record a flush and its size.
    pub fn batch_flushed(batcher: &str, keys: usize, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        BATCH_FLUSHES_TOTAL
            .with_label_values(&[batcher, result])
            .inc();
        BATCH_FLUSH_KEYS
            .with_label_values(&[batcher])
            .observe(keys as f64);
    }
}

/// Render the default registry in the Prometheus text format.
pub fn gather_text() -> TelemetryResult<String> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// Fieldpatch Bridge - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the pipeline.
//!
//! Gauges mirror the engine and ingress counters and are refreshed from
//! their snapshots on every scrape.

use fieldpatch::ingress::IngressSnapshot;
use fieldpatch::EngineSnapshot;
use lazy_static::lazy_static;
use prometheus::{register_gauge, Encoder, Gauge, TextEncoder};
use tracing::warn;

lazy_static! {
    // ============================================================
    // Engine Metrics (from EngineSnapshot)
    // ============================================================

    /// Batches run through the cases.
    pub static ref BATCHES_PROCESSED: Gauge = register_gauge!(
        "fieldpatch_batches_processed",
        "Batches processed by the case engine"
    ).unwrap();

    /// Batches the engine could not parse.
    pub static ref BATCHES_MALFORMED: Gauge = register_gauge!(
        "fieldpatch_batches_malformed",
        "Malformed batches skipped by the case engine"
    ).unwrap();

    /// Documents accepted by the sink.
    pub static ref DOCUMENTS_SENT: Gauge = register_gauge!(
        "fieldpatch_documents_sent",
        "Documents delivered to the sink"
    ).unwrap();

    /// Flushes refused by the null guard.
    pub static ref FLUSHES_ABORTED: Gauge = register_gauge!(
        "fieldpatch_flushes_aborted",
        "Flushes aborted for carrying too many null fields"
    ).unwrap();

    /// Share of flush attempts that were aborted.
    pub static ref ABORT_RATIO: Gauge = register_gauge!(
        "fieldpatch_abort_ratio",
        "Aborted flushes over all flush attempts (0-1)"
    ).unwrap();

    pub static ref STALE_BATCHES_DRAINED: Gauge = register_gauge!(
        "fieldpatch_stale_batches_drained",
        "Queued batches discarded after a flush"
    ).unwrap();

    pub static ref WRITE_BACKS: Gauge = register_gauge!(
        "fieldpatch_write_backs",
        "Successful device write-backs"
    ).unwrap();

    pub static ref WRITE_BACK_FAILURES: Gauge = register_gauge!(
        "fieldpatch_write_back_failures",
        "Failed device write-backs"
    ).unwrap();

    /// Trigger values that were neither 1 nor 0.
    pub static ref UNSUPPORTED_VALUES: Gauge = register_gauge!(
        "fieldpatch_unsupported_trigger_values",
        "Trigger readings with an unsupported representation"
    ).unwrap();

    // ============================================================
    // Ingress Metrics (from IngressSnapshot)
    // ============================================================

    pub static ref INGRESS_ACCEPTED: Gauge = register_gauge!(
        "fieldpatch_ingress_accepted",
        "Device updates accepted by the ingress buffer"
    ).unwrap();

    pub static ref INGRESS_MALFORMED: Gauge = register_gauge!(
        "fieldpatch_ingress_malformed",
        "Malformed device updates discarded"
    ).unwrap();

    pub static ref INGRESS_BATCHES_SENT: Gauge = register_gauge!(
        "fieldpatch_ingress_batches_sent",
        "Batches handed to the case engine"
    ).unwrap();

    /// Batches lost to backpressure.
    pub static ref INGRESS_BATCHES_DROPPED: Gauge = register_gauge!(
        "fieldpatch_ingress_batches_dropped",
        "Batches dropped because the engine queue was full"
    ).unwrap();

    pub static ref INGRESS_QUEUED: Gauge = register_gauge!(
        "fieldpatch_ingress_queued",
        "Device updates waiting for the next flush"
    ).unwrap();

    // ============================================================
    // Bridge Metrics
    // ============================================================

    /// Whether the engine thread is running (1 = running).
    pub static ref ENGINE_RUNNING: Gauge = register_gauge!(
        "fieldpatch_engine_running",
        "Case engine running state (1=running, 0=stopped)"
    ).unwrap();
}

/// Update engine gauges from a snapshot.
pub fn update_engine_metrics(snapshot: &EngineSnapshot) {
    BATCHES_PROCESSED.set(snapshot.batches_processed as f64);
    BATCHES_MALFORMED.set(snapshot.batches_malformed as f64);
    DOCUMENTS_SENT.set(snapshot.documents_sent as f64);
    FLUSHES_ABORTED.set(snapshot.flushes_aborted as f64);
    ABORT_RATIO.set(snapshot.abort_ratio());
    STALE_BATCHES_DRAINED.set(snapshot.stale_batches_drained as f64);
    WRITE_BACKS.set(snapshot.write_backs as f64);
    WRITE_BACK_FAILURES.set(snapshot.write_back_failures as f64);
    UNSUPPORTED_VALUES.set(snapshot.unsupported_values as f64);
}

/// Update ingress gauges from a snapshot.
pub fn update_ingress_metrics(snapshot: &IngressSnapshot) {
    INGRESS_ACCEPTED.set(snapshot.accepted as f64);
    INGRESS_MALFORMED.set(snapshot.malformed as f64);
    INGRESS_BATCHES_SENT.set(snapshot.batches_sent as f64);
    INGRESS_BATCHES_DROPPED.set(snapshot.batches_dropped as f64);
    INGRESS_QUEUED.set(snapshot.queued as f64);
}

pub fn update_engine_running(running: bool) {
    ENGINE_RUNNING.set(if running { 1.0 } else { 0.0 });
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

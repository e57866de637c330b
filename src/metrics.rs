//! Prometheus metrics for the controller and sidecar.
//!
//! # Metrics
//!
//! ## Counters
//! - `storage_capability_reconcile_total{outcome}` - Reconcile passes by outcome
//! - `storage_capability_queue_adds_total` - Keys handed to the work queue
//! - `storage_capability_queue_retries_total` - Keys requeued after a failure
//! - `storage_capability_probe_total{result}` - CSI probes by result
//! - `storage_capability_publish_total{outcome}` - Publisher ticks by outcome
//!
//! ## Gauges
//! - `storage_capability_queue_depth` - Keys waiting in the work queue
//!
//! ## Histograms
//! - `storage_capability_reconcile_duration_seconds` - Duration of one reconcile pass

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Buckets for reconcile durations (in seconds). Passes are dominated by one API write.
const RECONCILE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Metrics registry for one process
pub struct Metrics {
    registry: Registry,

    /// Reconcile passes by outcome (created, updated, unchanged, deleted, skipped, error)
    pub reconcile_total: IntCounterVec,
    /// Reconcile pass duration
    pub reconcile_duration: Histogram,
    /// Keys enqueued by the event router
    pub queue_adds: IntCounter,
    /// Keys requeued after a failed pass
    pub queue_retries: IntCounter,
    /// Keys waiting in the work queue
    pub queue_depth: IntGauge,
    /// Probes by result (success, error)
    pub probe_total: IntCounterVec,
    /// Publisher ticks by outcome (created, updated, unchanged, skipped, error)
    pub publish_total: IntCounterVec,
}

impl Metrics {
    /// Create the metrics and register them in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "storage_capability_reconcile_total",
                "Reconcile passes by outcome",
            ),
            &["outcome"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "storage_capability_reconcile_duration_seconds",
                "Duration of one reconcile pass in seconds",
            )
            .buckets(RECONCILE_BUCKETS.to_vec()),
        )?;
        let queue_adds = IntCounter::new(
            "storage_capability_queue_adds_total",
            "Keys handed to the work queue",
        )?;
        let queue_retries = IntCounter::new(
            "storage_capability_queue_retries_total",
            "Keys requeued after a failed reconcile pass",
        )?;
        let queue_depth = IntGauge::new(
            "storage_capability_queue_depth",
            "Keys waiting in the work queue",
        )?;
        let probe_total = IntCounterVec::new(
            Opts::new("storage_capability_probe_total", "CSI capability probes by result"),
            &["result"],
        )?;
        let publish_total = IntCounterVec::new(
            Opts::new(
                "storage_capability_publish_total",
                "ProvisionerCapability publish ticks by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(queue_adds.clone()))?;
        registry.register(Box::new(queue_retries.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(probe_total.clone()))?;
        registry.register(Box::new(publish_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            queue_adds,
            queue_retries,
            queue_depth,
            probe_total,
            publish_total,
        })
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.reconcile_total.with_label_values(&["created"]).inc();
        metrics.queue_depth.set(3);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("storage_capability_reconcile_total{outcome=\"created\"} 1"));
        assert!(text.contains("storage_capability_queue_depth 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.queue_adds.inc();
        assert_eq!(a.queue_adds.get(), 1);
        assert_eq!(b.queue_adds.get(), 0);
    }
}

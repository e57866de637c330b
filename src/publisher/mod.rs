//! Capability Publisher
//!
//! Sidecar loop next to a CSI plugin: re-probes the plugin on a fixed period
//! and creates or updates the ProvisionerCapability named after it. Failures
//! are logged and the next tick tries again.
//!
//! The get-compare-write sequence is not safe against a second concurrent
//! writer for the same provisioner; one sidecar per plugin is assumed.

use crate::crd::ProvisionerCapability;
use crate::domain::ports::CapabilityStoreRef;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::prober::Prober;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Interval between probes
    pub resync_period: Duration,
    /// Expected plugin name; `None` accepts whatever the plugin reports
    pub driver_name: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(60),
            driver_name: None,
        }
    }
}

/// Result of one publish tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    Updated,
    Unchanged,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Created => "created",
            PublishOutcome::Updated => "updated",
            PublishOutcome::Unchanged => "unchanged",
        }
    }
}

/// Keeps one ProvisionerCapability in line with its plugin
pub struct CapabilityPublisher {
    config: PublisherConfig,
    prober: Prober,
    store: CapabilityStoreRef,
    metrics: Option<Arc<Metrics>>,
    published: AtomicBool,
}

impl CapabilityPublisher {
    pub fn new(config: PublisherConfig, prober: Prober, store: CapabilityStoreRef) -> Self {
        Self {
            config,
            prober,
            store,
            metrics: None,
            published: AtomicBool::new(false),
        }
    }

    /// Record probe and publish metrics in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether at least one tick has completed successfully
    pub fn is_ready(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Probe once and reconcile the stored ProvisionerCapability
    pub async fn sync_once(&self) -> Result<PublishOutcome> {
        let probed = self.probe().await?;

        if let Some(expected) = &self.config.driver_name {
            if expected != probed.plugin_name() {
                return Err(Error::DriverNameMismatch {
                    expected: expected.clone(),
                    actual: probed.plugin_name().to_string(),
                });
            }
        }

        let name = probed.name_any();
        let outcome = match self.store.get_provisioner_capability(&name).await? {
            None => {
                info!(name = %name, version = %probed.plugin_version(), "Creating ProvisionerCapability");
                self.store.create_provisioner_capability(&probed).await?;
                PublishOutcome::Created
            }
            Some(existing) if existing.spec == probed.spec => {
                debug!(name = %name, "ProvisionerCapability is up to date");
                PublishOutcome::Unchanged
            }
            Some(mut existing) => {
                info!(name = %name, version = %probed.plugin_version(), "Updating ProvisionerCapability");
                existing.spec = probed.spec;
                self.store.update_provisioner_capability(&existing).await?;
                PublishOutcome::Updated
            }
        };

        self.published.store(true, Ordering::Release);
        Ok(outcome)
    }

    async fn probe(&self) -> Result<ProvisionerCapability> {
        let result = self.prober.probe().await;
        if let Some(metrics) = &self.metrics {
            let label = if result.is_ok() { "success" } else { "error" };
            metrics.probe_total.with_label_values(&[label]).inc();
        }
        result
    }

    /// Publish every resync period until `shutdown` fires. The first tick is immediate.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            resync_period = ?self.config.resync_period,
            driver_name = ?self.config.driver_name,
            "Starting capability publisher"
        );

        let mut interval = tokio::time::interval(self.config.resync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        info!("Capability publisher stopped");
    }

    async fn tick(&self) {
        let result = self.sync_once().await;
        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(Error::DriverNameMismatch { .. }) => "skipped",
            Err(_) => "error",
        };
        if let Some(metrics) = &self.metrics {
            metrics.publish_total.with_label_values(&[label]).inc();
        }

        match result {
            Ok(outcome) => debug!(outcome = outcome.as_str(), "Publish tick complete"),
            Err(e @ Error::DriverNameMismatch { .. }) => {
                error!(error = %e, "Plugin name does not match the configured driver name, skipping")
            }
            Err(e) => warn!(error = %e, "Failed to publish ProvisionerCapability, retrying next period"),
        }
    }
}

impl std::fmt::Debug for CapabilityPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityPublisher")
            .field("config", &self.config)
            .field("prober", &self.prober)
            .field("published", &self.is_ready())
            .finish_non_exhaustive()
    }
}

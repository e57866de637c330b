//! Capability Controller
//!
//! Runs the reconciliation workers:
//! - refuses to start on clusters older than the configured minimum version
//! - waits for all four watch caches to finish their initial list
//! - drains the work queue with N workers until the shutdown token fires
//! - routes each failure by its [`ErrorAction`]

use crate::controller::handlers::EventRouter;
use crate::controller::queue::{RateLimiterConfig, WorkQueue};
use crate::controller::reconciler::Reconciler;
use crate::controller::version::KubeVersion;
use crate::domain::ports::{CapabilityStoreRef, VersionDiscoveryRef};
use crate::error::{ErrorAction, Result};
use crate::informer::WatchCaches;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lowest cluster version whose snapshot and storage APIs the controller relies on
pub const MINIMAL_KUBERNETES_VERSION: KubeVersion = KubeVersion::new(1, 20, 0);

/// Interval between cache sync checks at startup
const CACHE_SYNC_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// Configuration
// =============================================================================

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Minimum supported cluster version
    pub min_kube_version: KubeVersion,
    /// Give up waiting for the caches after this long; `None` waits until shutdown
    pub cache_sync_timeout: Option<Duration>,
    /// Retry backoff for failed keys
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_kube_version: MINIMAL_KUBERNETES_VERSION,
            cache_sync_timeout: None,
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

/// How [`CapabilityController::run`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Shutdown was requested, before or after the workers started
    Completed,
    /// The cluster is older than the configured minimum
    VersionTooOld {
        found: KubeVersion,
        required: KubeVersion,
    },
    /// The caches did not sync before the timeout
    CachesNotSynced,
}

// =============================================================================
// Controller
// =============================================================================

/// StorageClassCapability controller
pub struct CapabilityController {
    config: ControllerConfig,
    caches: WatchCaches,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    discovery: VersionDiscoveryRef,
    metrics: Option<Arc<Metrics>>,
}

impl CapabilityController {
    pub fn new(
        config: ControllerConfig,
        caches: WatchCaches,
        store: CapabilityStoreRef,
        discovery: VersionDiscoveryRef,
    ) -> Self {
        let queue = WorkQueue::new("StorageClassCapabilities", config.rate_limiter.clone());
        let reconciler = Arc::new(Reconciler::new(caches.clone(), store));
        Self {
            config,
            caches,
            queue,
            reconciler,
            discovery,
            metrics: None,
        }
    }

    /// Record reconcile and queue metrics in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn caches(&self) -> &WatchCaches {
        &self.caches
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Event handler that feeds this controller's queue
    pub fn event_router(&self) -> EventRouter {
        let router = EventRouter::new(self.queue.clone(), self.caches.storage_classes.clone());
        match &self.metrics {
            Some(metrics) => router.with_metrics(metrics.clone()),
            None => router,
        }
    }

    /// Fetch and compare the cluster version. `Ok(Err(found))` means too old.
    pub async fn check_version(&self) -> Result<std::result::Result<KubeVersion, KubeVersion>> {
        let raw = self.discovery.server_version().await?;
        let found = KubeVersion::parse(&raw)?;
        if found.at_least(&self.config.min_kube_version) {
            Ok(Ok(found))
        } else {
            Ok(Err(found))
        }
    }

    /// Run `concurrency` workers until `shutdown` fires
    pub async fn run(&self, concurrency: usize, shutdown: CancellationToken) -> Result<RunExit> {
        info!("Starting StorageClassCapability controller");

        match self.check_version().await? {
            Ok(found) => debug!(version = %found, "Cluster version supported"),
            Err(found) => {
                error!(
                    version = %found,
                    required = %self.config.min_kube_version,
                    "Cluster version is older than the minimum supported version, controller will not run"
                );
                return Ok(RunExit::VersionTooOld {
                    found,
                    required: self.config.min_kube_version,
                });
            }
        }

        info!("Waiting for informer caches to sync");
        if !self.wait_for_cache_sync(&shutdown).await {
            if shutdown.is_cancelled() {
                info!("Shutdown requested before informer caches synced");
                return Ok(RunExit::Completed);
            }
            warn!(
                unsynced = ?self.caches.unsynced_kinds(),
                "Informer caches did not sync, controller will not run"
            );
            return Ok(RunExit::CachesNotSynced);
        }

        let concurrency = concurrency.max(1);
        info!(workers = concurrency, "Starting workers");
        let workers: Vec<_> = (0..concurrency)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    self.queue.clone(),
                    self.reconciler.clone(),
                    self.metrics.clone(),
                ))
            })
            .collect();

        shutdown.cancelled().await;
        info!("Shutting down workers");
        self.queue.shut_down();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("StorageClassCapability controller stopped");
        Ok(RunExit::Completed)
    }

    async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> bool {
        let deadline = self
            .config
            .cache_sync_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            if self.caches.all_synced() {
                info!("Informer caches synced");
                return true;
            }
            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                return false;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(CACHE_SYNC_POLL) => {}
            }
        }
    }
}

impl std::fmt::Debug for CapabilityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityController")
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker(
    id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    metrics: Option<Arc<Metrics>>,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        process_item(&queue, &reconciler, metrics.as_deref(), &key).await;
        queue.done(&key);
        if let Some(metrics) = &metrics {
            metrics.queue_depth.set(queue.len() as i64);
        }
    }
    debug!(worker = id, "Worker stopped");
}

async fn process_item(
    queue: &Arc<WorkQueue>,
    reconciler: &Reconciler,
    metrics: Option<&Metrics>,
    key: &str,
) {
    let _timer = metrics.map(|m| m.reconcile_duration.start_timer());

    match reconciler.sync(key).await {
        Ok(outcome) => {
            queue.forget(key);
            if let Some(metrics) = metrics {
                metrics
                    .reconcile_total
                    .with_label_values(&[outcome.as_str()])
                    .inc();
            }
            debug!(name = %key, outcome = outcome.as_str(), "Successfully synced");
        }
        Err(e) => {
            if let Some(metrics) = metrics {
                metrics.reconcile_total.with_label_values(&["error"]).inc();
            }
            match e.action() {
                ErrorAction::RequeueWithBackoff => {
                    warn!(
                        name = %key,
                        error = %e,
                        retries = queue.num_requeues(key),
                        "Error syncing, requeuing"
                    );
                    queue.add_rate_limited(key);
                    if let Some(metrics) = metrics {
                        metrics.queue_retries.inc();
                    }
                }
                ErrorAction::RequeueAfter(delay) => {
                    debug!(name = %key, error = %e, delay = ?delay, "Error syncing, requeuing later");
                    queue.add_after(key, delay);
                }
                ErrorAction::NoRequeue => {
                    error!(name = %key, error = %e, "Error syncing, not requeuing");
                    queue.forget(key);
                }
            }
        }
    }
}

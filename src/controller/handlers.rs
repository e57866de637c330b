//! Event Routing
//!
//! Maps watch events on the four input kinds to StorageClass names on the
//! work queue. All keys are StorageClass names; the capability for a class
//! shares its name, and so does its paired VolumeSnapshotClass.

use crate::controller::queue::WorkQueue;
use crate::crd::{ProvisionerCapability, StorageClassCapability, VolumeSnapshotClass};
use crate::domain::ports::Lister;
use crate::informer::{EventHandler, ObjectCache, WatchEvent};
use crate::metrics::Metrics;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Enqueues affected StorageClass names for every observed change
pub struct EventRouter {
    queue: Arc<WorkQueue>,
    storage_classes: Arc<ObjectCache<StorageClass>>,
    metrics: Option<Arc<Metrics>>,
}

impl EventRouter {
    pub fn new(queue: Arc<WorkQueue>, storage_classes: Arc<ObjectCache<StorageClass>>) -> Self {
        Self {
            queue,
            storage_classes,
            metrics: None,
        }
    }

    /// Count enqueued keys in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn enqueue(&self, name: String) {
        if name.is_empty() {
            warn!(queue = %self.queue.name(), "Dropping event for object without a name");
            return;
        }
        self.queue.add(name);
        if let Some(metrics) = &self.metrics {
            metrics.queue_adds.inc();
            metrics.queue_depth.set(self.queue.len() as i64);
        }
    }

    /// Names of cached StorageClasses served by `provisioner`. Empty until the
    /// StorageClass cache has synced; its initial list enqueues every class.
    pub fn storage_classes_for(&self, provisioner: &str) -> Vec<String> {
        match self.storage_classes.list() {
            Ok(storage_classes) => storage_classes
                .into_iter()
                .filter(|sc| sc.provisioner == provisioner)
                .map(|sc| sc.name_any())
                .collect(),
            Err(e) => {
                debug!(provisioner = %provisioner, error = %e, "Skipping fan-out");
                Vec::new()
            }
        }
    }
}

/// Whether an update carries no change, as on a periodic resync
fn is_resync<K: Resource>(event: &WatchEvent<K>) -> bool {
    match event {
        WatchEvent::Updated { old, new } => {
            old.resource_version().is_some() && old.resource_version() == new.resource_version()
        }
        _ => false,
    }
}

impl EventHandler<StorageClass> for EventRouter {
    fn handle(&self, event: &WatchEvent<StorageClass>) {
        if is_resync(event) {
            return;
        }
        if let WatchEvent::Deleted(deleted) = event {
            debug!(
                name = %deleted.object().name_any(),
                state_unknown = deleted.is_state_unknown(),
                "StorageClass deleted"
            );
        }
        self.enqueue(event.object().name_any());
    }
}

impl EventHandler<VolumeSnapshotClass> for EventRouter {
    fn handle(&self, event: &WatchEvent<VolumeSnapshotClass>) {
        if is_resync(event) {
            return;
        }
        self.enqueue(event.object().name_any());
    }
}

impl EventHandler<ProvisionerCapability> for EventRouter {
    fn handle(&self, event: &WatchEvent<ProvisionerCapability>) {
        let provisioner = event.object().name_any();
        let affected = self.storage_classes_for(&provisioner);
        debug!(
            provisioner = %provisioner,
            storage_classes = ?affected,
            "ProvisionerCapability changed"
        );
        for name in affected {
            self.enqueue(name);
        }
    }
}

impl EventHandler<StorageClassCapability> for EventRouter {
    fn handle(&self, event: &WatchEvent<StorageClassCapability>) {
        self.enqueue(event.object().name_any());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::desired::fixtures::{provisioner_capability, storage_class};
    use crate::controller::queue::RateLimiterConfig;
    use crate::crd::StorageClassCapabilitySpec;
    use crate::informer::DeletedObject;

    fn router(storage_classes: Vec<StorageClass>) -> (EventRouter, Arc<WorkQueue>) {
        let queue = WorkQueue::new("test", RateLimiterConfig::default());
        let cache = Arc::new(ObjectCache::with_objects(storage_classes));
        (EventRouter::new(queue.clone(), cache), queue)
    }

    async fn drain(queue: &WorkQueue) -> Vec<String> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            if let Some(key) = queue.get().await {
                queue.done(&key);
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_provisioner_capability_fans_out() {
        let (router, queue) = router(vec![
            storage_class("a", "csi.example.com", None),
            storage_class("b", "csi.example.com", None),
            storage_class("c", "other.example.com", None),
        ]);

        let pcap = Arc::new(provisioner_capability("csi.example.com"));
        router.handle(&WatchEvent::Updated {
            old: pcap.clone(),
            new: pcap,
        });

        assert_eq!(drain(&queue).await, vec!["a", "b"]);
    }

    #[test]
    fn test_fan_out_waits_for_storage_class_sync() {
        let queue = WorkQueue::new("test", RateLimiterConfig::default());
        let cache = Arc::new(ObjectCache::new());
        cache.apply(storage_class("a", "csi.example.com", None));
        let router = EventRouter::new(queue.clone(), cache.clone());

        let pcap = Arc::new(provisioner_capability("csi.example.com"));
        router.handle(&WatchEvent::Added(pcap.clone()));
        assert!(queue.is_empty());

        cache.mark_synced();
        router.handle(&WatchEvent::Added(pcap));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_storage_class_resync_is_ignored() {
        let (router, queue) = router(vec![]);
        let sc = Arc::new(storage_class("sc1", "drv1", None));

        router.handle(&WatchEvent::Updated {
            old: sc.clone(),
            new: sc.clone(),
        });
        assert!(queue.is_empty());

        let mut changed = storage_class("sc1", "drv1", Some(true));
        changed.metadata.resource_version = Some("2".into());
        router.handle(&WatchEvent::Updated {
            old: sc,
            new: Arc::new(changed),
        });
        assert_eq!(drain(&queue).await, vec!["sc1"]);
    }

    #[tokio::test]
    async fn test_deletes_and_tombstones_enqueue_own_name() {
        let (router, queue) = router(vec![]);
        router.handle(&WatchEvent::Deleted(DeletedObject::StateUnknown(Arc::new(
            storage_class("gone", "drv1", None),
        ))));
        router.handle(&WatchEvent::Deleted(DeletedObject::Final(Arc::new(
            VolumeSnapshotClass::new("snap", "drv1"),
        ))));

        assert_eq!(drain(&queue).await, vec!["gone", "snap"]);
    }

    #[tokio::test]
    async fn test_capability_change_enqueues_own_name() {
        let (router, queue) = router(vec![]);
        let sccap = Arc::new(StorageClassCapability::new(
            "sc1",
            StorageClassCapabilitySpec::default(),
        ));
        router.handle(&WatchEvent::Added(sccap.clone()));
        router.handle(&WatchEvent::Updated {
            old: sccap.clone(),
            new: sccap,
        });

        assert_eq!(drain(&queue).await, vec!["sc1"]);
    }

    #[tokio::test]
    async fn test_metrics_count_adds() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (router, _queue) = router(vec![]);
        let router = router.with_metrics(metrics.clone());

        router.handle(&WatchEvent::Added(Arc::new(storage_class("sc1", "drv1", None))));
        assert_eq!(metrics.queue_adds.get(), 1);
    }
}

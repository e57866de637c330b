//! Resource Watch Cache
//!
//! Eventually-consistent local views of the four resource kinds the controller
//! correlates, kept current by kube watchers:
//! - StorageClass (`storage.k8s.io/v1`)
//! - VolumeSnapshotClass (`snapshot.storage.k8s.io/v1`)
//! - ProvisionerCapability and StorageClassCapability (`storage.kubesphere.io/v1alpha1`)

pub mod cache;
pub mod event;
pub mod runner;

pub use cache::*;
pub use event::*;
pub use runner::*;

use crate::crd::{ProvisionerCapability, StorageClassCapability, VolumeSnapshotClass};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The four caches the reconciliation engine reads from
#[derive(Debug, Clone, Default)]
pub struct WatchCaches {
    pub storage_classes: Arc<ObjectCache<StorageClass>>,
    pub snapshot_classes: Arc<ObjectCache<VolumeSnapshotClass>>,
    pub provisioner_capabilities: Arc<ObjectCache<ProvisionerCapability>>,
    pub storage_class_capabilities: Arc<ObjectCache<StorageClassCapability>>,
}

impl WatchCaches {
    /// Create four empty, unsynced caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every cache has completed its initial list
    pub fn all_synced(&self) -> bool {
        self.unsynced_kinds().is_empty()
    }

    /// Kinds whose initial list is still outstanding
    pub fn unsynced_kinds(&self) -> Vec<&str> {
        let mut kinds = Vec::new();
        if !self.storage_classes.is_synced() {
            kinds.push(self.storage_classes.kind());
        }
        if !self.snapshot_classes.is_synced() {
            kinds.push(self.snapshot_classes.kind());
        }
        if !self.provisioner_capabilities.is_synced() {
            kinds.push(self.provisioner_capabilities.kind());
        }
        if !self.storage_class_capabilities.is_synced() {
            kinds.push(self.storage_class_capabilities.kind());
        }
        kinds
    }

    /// Start one informer per cache, all notifying `handler`
    pub fn spawn_informers<H>(
        &self,
        client: Client,
        handler: Arc<H>,
        resync_period: Duration,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>>
    where
        H: EventHandler<StorageClass>
            + EventHandler<VolumeSnapshotClass>
            + EventHandler<ProvisionerCapability>
            + EventHandler<StorageClassCapability>
            + 'static,
    {
        let mut storage_classes =
            Informer::new(self.storage_classes.clone()).with_resync(resync_period);
        storage_classes.add_handler(handler.clone());

        let mut snapshot_classes =
            Informer::new(self.snapshot_classes.clone()).with_resync(resync_period);
        snapshot_classes.add_handler(handler.clone());

        let mut provisioner_capabilities =
            Informer::new(self.provisioner_capabilities.clone()).with_resync(resync_period);
        provisioner_capabilities.add_handler(handler.clone());

        let mut storage_class_capabilities =
            Informer::new(self.storage_class_capabilities.clone()).with_resync(resync_period);
        storage_class_capabilities.add_handler(handler);

        vec![
            tokio::spawn(storage_classes.run(Api::all(client.clone()), shutdown.clone())),
            tokio::spawn(snapshot_classes.run(Api::all(client.clone()), shutdown.clone())),
            tokio::spawn(
                provisioner_capabilities.run(Api::all(client.clone()), shutdown.clone()),
            ),
            tokio::spawn(storage_class_capabilities.run(Api::all(client), shutdown)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsynced_kinds() {
        let caches = WatchCaches::new();
        assert_eq!(caches.unsynced_kinds().len(), 4);
        assert!(!caches.all_synced());

        caches.storage_classes.mark_synced();
        caches.snapshot_classes.mark_synced();
        caches.provisioner_capabilities.mark_synced();
        assert_eq!(caches.unsynced_kinds(), vec!["StorageClassCapability"]);

        caches.storage_class_capabilities.mark_synced();
        assert!(caches.all_synced());
    }
}

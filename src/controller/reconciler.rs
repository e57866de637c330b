//! Sync Handler
//!
//! Reconciles one StorageClassCapability against the current StorageClass,
//! VolumeSnapshotClass and ProvisionerCapability in the watch caches. Safe to
//! run any number of times for the same key.

use crate::controller::desired::{desired_capability, merge_capability};
use crate::domain::ports::{CapabilityStoreRef, Lister};
use crate::error::{Error, Result};
use crate::informer::WatchCaches;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Result of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new StorageClassCapability was created
    Created,
    /// The stored spec differed and was replaced
    Updated,
    /// The stored object already matched
    Unchanged,
    /// The StorageClass is gone and its capability was deleted
    Deleted,
    /// Nothing to do yet, e.g. no ProvisionerCapability for the provisioner
    Skipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::Skipped => "skipped",
        }
    }
}

/// Reads inputs from the watch caches and writes through a [`CapabilityStore`](crate::domain::ports::CapabilityStore)
pub struct Reconciler {
    caches: WatchCaches,
    store: CapabilityStoreRef,
}

impl Reconciler {
    pub fn new(caches: WatchCaches, store: CapabilityStoreRef) -> Self {
        Self { caches, store }
    }

    pub fn caches(&self) -> &WatchCaches {
        &self.caches
    }

    /// Converge the StorageClassCapability named `name`
    pub async fn sync(&self, name: &str) -> Result<SyncOutcome> {
        let Some(storage_class) = self.caches.storage_classes.get(name)? else {
            return self.delete_orphan(name).await;
        };

        if storage_class.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::InvalidObject {
                kind: "StorageClass".to_string(),
                reason: format!("{}: storageclass name must be specified", name),
            });
        }

        let Some(pcap) = self
            .caches
            .provisioner_capabilities
            .get(&storage_class.provisioner)?
        else {
            debug!(
                name = %name,
                provisioner = %storage_class.provisioner,
                "ProvisionerCapability not found, waiting for the provisioner to publish"
            );
            return Ok(SyncOutcome::Skipped);
        };

        let snapshot_class = self.caches.snapshot_classes.get(name)?;
        if snapshot_class.is_none() {
            debug!(name = %name, "VolumeSnapshotClass not found");
        }

        match self.caches.storage_class_capabilities.get(name)? {
            None => {
                let desired =
                    desired_capability(&storage_class, snapshot_class.as_deref(), &pcap);
                debug!(name = %name, spec = ?desired.spec, "Creating StorageClassCapability");
                self.store.create_storage_class_capability(&desired).await?;
                info!(name = %name, provisioner = %desired.spec.provisioner, "Created StorageClassCapability");
                Ok(SyncOutcome::Created)
            }
            Some(existing) => {
                let merged = merge_capability(
                    &existing,
                    &storage_class,
                    snapshot_class.as_deref(),
                    &pcap,
                )?;
                if merged.spec == existing.spec {
                    debug!(name = %name, "StorageClassCapability is up to date");
                    return Ok(SyncOutcome::Unchanged);
                }
                debug!(name = %name, spec = ?merged.spec, "Updating StorageClassCapability");
                self.store.update_storage_class_capability(&merged).await?;
                info!(name = %name, "Updated StorageClassCapability");
                Ok(SyncOutcome::Updated)
            }
        }
    }

    /// Delete the capability of a StorageClass that no longer exists. Nothing
    /// is sent when the capability cache has no such object; delete failures
    /// are logged and never block the queue.
    async fn delete_orphan(&self, name: &str) -> Result<SyncOutcome> {
        if self.caches.storage_class_capabilities.get(name)?.is_none() {
            debug!(name = %name, "StorageClass and StorageClassCapability both absent");
            return Ok(SyncOutcome::Unchanged);
        }

        debug!(name = %name, "StorageClass no longer exists, deleting StorageClassCapability");
        let outcome = match self.store.delete_storage_class_capability(name).await {
            Ok(()) => {
                info!(name = %name, "Deleted StorageClassCapability");
                SyncOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                debug!(name = %name, "StorageClassCapability already absent");
                SyncOutcome::Unchanged
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to delete StorageClassCapability");
                SyncOutcome::Skipped
            }
        };
        Ok(outcome)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("caches", &self.caches)
            .finish_non_exhaustive()
    }
}

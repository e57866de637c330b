//! In-Memory Adapters
//!
//! `InMemoryCapabilityStore` writes straight into the watch caches the engine
//! reads from, the way the real informers would after an API write, and logs
//! every write call. Used by tests.

use crate::crd::{ProvisionerCapability, StorageClassCapability};
use crate::domain::ports::{CapabilityStore, VersionDiscovery};
use crate::error::{Error, Result};
use crate::informer::{ObjectCache, WatchCaches};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A write issued against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    CreateProvisionerCapability(String),
    UpdateProvisionerCapability(String),
    CreateStorageClassCapability(String),
    UpdateStorageClassCapability(String),
    DeleteStorageClassCapability(String),
}

/// Capability store backed by the watch caches
pub struct InMemoryCapabilityStore {
    caches: WatchCaches,
    calls: Mutex<Vec<WriteCall>>,
    fail_next: Mutex<Option<Error>>,
    revision: AtomicU64,
}

impl InMemoryCapabilityStore {
    pub fn new(caches: WatchCaches) -> Self {
        Self {
            caches,
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            revision: AtomicU64::new(0),
        }
    }

    pub fn caches(&self) -> &WatchCaches {
        &self.caches
    }

    /// Writes issued so far, in order
    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }

    /// Make the next write fail with `error`. The call is still recorded.
    pub fn fail_next_write(&self, error: Error) {
        *self.fail_next.lock() = Some(error);
    }

    fn record(&self, call: WriteCall) -> Result<()> {
        self.calls.lock().push(call);
        match self.fail_next.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn create<K>(&self, cache: &ObjectCache<K>, obj: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let name = obj.name_any();
        if cache.peek(&name).is_some() {
            return Err(Error::ResourceExists {
                kind: cache.kind().to_string(),
                name,
            });
        }
        let mut stored = obj.clone();
        let revision = self.next_revision();
        stored.meta_mut().uid = Some(format!("{}-{}", name, revision));
        stored.meta_mut().resource_version = Some(revision.to_string());
        cache.apply(stored.clone());
        Ok(stored)
    }

    fn update<K>(&self, cache: &ObjectCache<K>, obj: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Clone,
    {
        let name = obj.name_any();
        if cache.peek(&name).is_none() {
            return Err(Error::not_found(cache.kind(), name));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.next_revision().to_string());
        cache.apply(stored.clone());
        Ok(stored)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl CapabilityStore for InMemoryCapabilityStore {
    async fn get_provisioner_capability(
        &self,
        name: &str,
    ) -> Result<Option<ProvisionerCapability>> {
        Ok(self
            .caches
            .provisioner_capabilities
            .peek(name)
            .map(|obj| obj.as_ref().clone()))
    }

    async fn create_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability> {
        self.record(WriteCall::CreateProvisionerCapability(pcap.name_any()))?;
        self.create(&self.caches.provisioner_capabilities, pcap)
    }

    async fn update_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability> {
        self.record(WriteCall::UpdateProvisionerCapability(pcap.name_any()))?;
        self.update(&self.caches.provisioner_capabilities, pcap)
    }

    async fn get_storage_class_capability(
        &self,
        name: &str,
    ) -> Result<Option<StorageClassCapability>> {
        Ok(self
            .caches
            .storage_class_capabilities
            .peek(name)
            .map(|obj| obj.as_ref().clone()))
    }

    async fn create_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability> {
        self.record(WriteCall::CreateStorageClassCapability(sccap.name_any()))?;
        self.create(&self.caches.storage_class_capabilities, sccap)
    }

    async fn update_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability> {
        self.record(WriteCall::UpdateStorageClassCapability(sccap.name_any()))?;
        self.update(&self.caches.storage_class_capabilities, sccap)
    }

    async fn delete_storage_class_capability(&self, name: &str) -> Result<()> {
        self.record(WriteCall::DeleteStorageClassCapability(name.to_string()))?;
        let cache = &self.caches.storage_class_capabilities;
        match cache.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(cache.kind(), name)),
        }
    }
}

/// Version discovery returning a fixed version string
#[derive(Debug, Clone)]
pub struct StaticVersion(String);

impl StaticVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

#[async_trait]
impl VersionDiscovery for StaticVersion {
    async fn server_version(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StorageClassCapabilitySpec;
    use assert_matches::assert_matches;

    fn sccap(name: &str) -> StorageClassCapability {
        StorageClassCapability::new(name, StorageClassCapabilitySpec::default())
    }

    #[tokio::test]
    async fn test_writes_land_in_cache() {
        let store = InMemoryCapabilityStore::new(WatchCaches::new());

        let created = store.create_storage_class_capability(&sccap("sc1")).await.unwrap();
        assert_eq!(created.resource_version().as_deref(), Some("1"));
        assert!(created.uid().is_some());

        let updated = store.update_storage_class_capability(&created).await.unwrap();
        assert_eq!(updated.resource_version().as_deref(), Some("2"));

        let cached = store.get_storage_class_capability("sc1").await.unwrap().unwrap();
        assert_eq!(cached, updated);
    }

    #[tokio::test]
    async fn test_create_existing_and_update_missing() {
        let store = InMemoryCapabilityStore::new(WatchCaches::new());
        store.create_storage_class_capability(&sccap("sc1")).await.unwrap();

        assert_matches!(
            store.create_storage_class_capability(&sccap("sc1")).await,
            Err(Error::ResourceExists { .. })
        );
        let err = store
            .update_storage_class_capability(&sccap("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = InMemoryCapabilityStore::new(WatchCaches::new());
        let err = store.delete_storage_class_capability("sc1").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            store.calls(),
            vec![WriteCall::DeleteStorageClassCapability("sc1".into())]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = InMemoryCapabilityStore::new(WatchCaches::new());
        store.fail_next_write(Error::Internal("boom".into()));

        assert!(store.create_storage_class_capability(&sccap("sc1")).await.is_err());
        assert!(store.create_storage_class_capability(&sccap("sc1")).await.is_ok());
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_static_version() {
        let discovery = StaticVersion::new("v1.29.3");
        assert_eq!(discovery.server_version().await.unwrap(), "v1.29.3");
    }
}

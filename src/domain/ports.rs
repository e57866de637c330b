//! Domain Ports - Core trait definitions for the capability controller
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the watch caches, the Kubernetes API, the cluster version
//! endpoint and the CSI plugin socket. Adapters implement these traits to
//! provide concrete functionality.

use crate::crd::{ProvisionerCapability, StorageClassCapability};
use crate::error::Result;
use crate::prober::csi::{
    ControllerGetCapabilitiesResponse, GetPluginCapabilitiesResponse, GetPluginInfoResponse,
    NodeGetCapabilitiesResponse,
};
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Watch Cache Port
// =============================================================================

/// Read side of an eventually-consistent local cache of one resource kind
pub trait Lister<K>: Send + Sync {
    /// Get an object by name. `Ok(None)` means not found.
    fn get(&self, name: &str) -> Result<Option<Arc<K>>>;

    /// List every cached object
    fn list(&self) -> Result<Vec<Arc<K>>>;

    /// Whether the initial list has been loaded
    fn has_synced(&self) -> bool;
}

// =============================================================================
// Storage API Port
// =============================================================================

/// Port for writing capability objects to the API server
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Get a ProvisionerCapability, `Ok(None)` when absent
    async fn get_provisioner_capability(&self, name: &str)
        -> Result<Option<ProvisionerCapability>>;

    /// Create a ProvisionerCapability
    async fn create_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability>;

    /// Replace a ProvisionerCapability
    async fn update_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability>;

    /// Get a StorageClassCapability, `Ok(None)` when absent
    async fn get_storage_class_capability(
        &self,
        name: &str,
    ) -> Result<Option<StorageClassCapability>>;

    /// Create a StorageClassCapability
    async fn create_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability>;

    /// Replace a StorageClassCapability
    async fn update_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability>;

    /// Delete a StorageClassCapability. Absent objects yield a not-found error.
    async fn delete_storage_class_capability(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Version Discovery Port
// =============================================================================

/// Port for the cluster version endpoint
#[async_trait]
pub trait VersionDiscovery: Send + Sync {
    /// Raw version string reported by the API server, e.g. `v1.29.3+k3s1`
    async fn server_version(&self) -> Result<String>;
}

// =============================================================================
// CSI Plugin Port
// =============================================================================

/// The four read-only CSI calls the prober issues. Implementations carry no
/// deadline of their own; the caller bounds every call.
#[async_trait]
pub trait CsiClient: Send + Sync {
    async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse>;

    async fn get_plugin_capabilities(&self) -> Result<GetPluginCapabilitiesResponse>;

    async fn controller_get_capabilities(&self) -> Result<ControllerGetCapabilitiesResponse>;

    async fn node_get_capabilities(&self) -> Result<NodeGetCapabilitiesResponse>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CapabilityStoreRef = Arc<dyn CapabilityStore>;
pub type VersionDiscoveryRef = Arc<dyn VersionDiscovery>;
pub type CsiClientRef = Arc<dyn CsiClient>;

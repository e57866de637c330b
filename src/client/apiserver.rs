//! API Server Adapters

use crate::crd::{ProvisionerCapability, StorageClassCapability};
use crate::domain::ports::{CapabilityStore, VersionDiscovery};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::debug;

/// Capability store talking to the API server
#[derive(Clone)]
pub struct KubeCapabilityStore {
    provisioner_capabilities: Api<ProvisionerCapability>,
    storage_class_capabilities: Api<StorageClassCapability>,
}

impl KubeCapabilityStore {
    pub fn new(client: Client) -> Self {
        Self {
            provisioner_capabilities: Api::all(client.clone()),
            storage_class_capabilities: Api::all(client),
        }
    }
}

/// Map a create conflict to `ResourceExists`
fn create_error<K: Resource<DynamicType = ()>>(err: kube::Error, name: String) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 => Error::ResourceExists {
            kind: K::kind(&()).into_owned(),
            name,
        },
        other => Error::Kube(other),
    }
}

#[async_trait]
impl CapabilityStore for KubeCapabilityStore {
    async fn get_provisioner_capability(
        &self,
        name: &str,
    ) -> Result<Option<ProvisionerCapability>> {
        Ok(self.provisioner_capabilities.get_opt(name).await?)
    }

    async fn create_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability> {
        debug!(name = %pcap.name_any(), "Creating ProvisionerCapability");
        self.provisioner_capabilities
            .create(&PostParams::default(), pcap)
            .await
            .map_err(|e| create_error::<ProvisionerCapability>(e, pcap.name_any()))
    }

    async fn update_provisioner_capability(
        &self,
        pcap: &ProvisionerCapability,
    ) -> Result<ProvisionerCapability> {
        debug!(name = %pcap.name_any(), "Replacing ProvisionerCapability");
        Ok(self
            .provisioner_capabilities
            .replace(&pcap.name_any(), &PostParams::default(), pcap)
            .await?)
    }

    async fn get_storage_class_capability(
        &self,
        name: &str,
    ) -> Result<Option<StorageClassCapability>> {
        Ok(self.storage_class_capabilities.get_opt(name).await?)
    }

    async fn create_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability> {
        self.storage_class_capabilities
            .create(&PostParams::default(), sccap)
            .await
            .map_err(|e| create_error::<StorageClassCapability>(e, sccap.name_any()))
    }

    async fn update_storage_class_capability(
        &self,
        sccap: &StorageClassCapability,
    ) -> Result<StorageClassCapability> {
        Ok(self
            .storage_class_capabilities
            .replace(&sccap.name_any(), &PostParams::default(), sccap)
            .await?)
    }

    async fn delete_storage_class_capability(&self, name: &str) -> Result<()> {
        self.storage_class_capabilities
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// Version discovery through the `/version` endpoint
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VersionDiscovery for KubeDiscovery {
    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        debug!(git_version = %info.git_version, platform = %info.platform, "API server version");
        Ok(info.git_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: reason.into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_create_conflict_maps_to_exists() {
        let err = create_error::<StorageClassCapability>(api_error(409, "AlreadyExists"), "sc1".into());
        assert!(matches!(
            err,
            Error::ResourceExists { ref kind, ref name } if kind == "StorageClassCapability" && name == "sc1"
        ));

        let err = create_error::<StorageClassCapability>(api_error(403, "Forbidden"), "sc1".into());
        assert!(matches!(err, Error::Kube(_)));
        assert!(err.is_retryable());
    }
}

//! Capability Probe
//!
//! Turns the four CSI capability responses into a `ProvisionerCapability`.
//! Every call gets its own deadline. Any failure aborts the whole probe.

use crate::crd::{
    ExpandMode, FeatureSet, PluginInfo, ProvisionerCapability, ProvisionerCapabilitySpec,
    SnapshotFeatures, VolumeFeatures,
};
use crate::domain::ports::CsiClientRef;
use crate::error::{Error, Result};
use crate::prober::csi::{
    controller_service_capability, node_service_capability, plugin_capability,
    ControllerGetCapabilitiesResponse, GetPluginCapabilitiesResponse,
    NodeGetCapabilitiesResponse,
};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use controller_service_capability::rpc::Type as ControllerRpc;
use node_service_capability::rpc::Type as NodeRpc;

/// Probes one CSI plugin
#[derive(Clone)]
pub struct Prober {
    client: CsiClientRef,
    timeout: Duration,
}

impl Prober {
    /// Probe through `client`, bounding each call by `timeout`
    pub fn new(client: CsiClientRef, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query the plugin and assemble its capability record
    pub async fn probe(&self) -> Result<ProvisionerCapability> {
        let info = self
            .call("GetPluginInfo", self.client.get_plugin_info())
            .await?;
        if info.name.is_empty() {
            return Err(Error::InvalidObject {
                kind: "GetPluginInfoResponse".to_string(),
                reason: "plugin reported an empty name".to_string(),
            });
        }

        let plugin = self
            .call("GetPluginCapabilities", self.client.get_plugin_capabilities())
            .await?;
        let controller = self
            .call(
                "ControllerGetCapabilities",
                self.client.controller_get_capabilities(),
            )
            .await?;
        let node = self
            .call("NodeGetCapabilities", self.client.node_get_capabilities())
            .await?;

        let features = feature_set(&plugin, &controller, &node);
        debug!(
            plugin = %info.name,
            version = %info.vendor_version,
            features = ?features,
            "Probed CSI plugin"
        );

        Ok(ProvisionerCapability::new(
            &info.name,
            ProvisionerCapabilitySpec {
                plugin_info: PluginInfo {
                    name: info.name.clone(),
                    version: info.vendor_version,
                },
                features,
            },
        ))
    }

    async fn call<T>(
        &self,
        method: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::RpcTimeout {
                method,
                timeout: self.timeout,
            })?
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Response Mapping
// =============================================================================

/// Topology support and expansion mode from the plugin capability list.
/// Unrecognised expansion entries map to `Unknown`.
pub fn plugin_features(response: &GetPluginCapabilitiesResponse) -> (bool, ExpandMode) {
    let mut topology = false;
    let mut expand = ExpandMode::Unknown;

    for capability in &response.capabilities {
        match &capability.r#type {
            Some(plugin_capability::Type::Service(service)) => {
                if service.r#type
                    == plugin_capability::service::Type::VolumeAccessibilityConstraints as i32
                {
                    topology = true;
                }
            }
            Some(plugin_capability::Type::VolumeExpansion(expansion)) => {
                expand = match plugin_capability::volume_expansion::Type::try_from(expansion.r#type)
                {
                    Ok(plugin_capability::volume_expansion::Type::Online) => ExpandMode::Online,
                    Ok(plugin_capability::volume_expansion::Type::Offline) => ExpandMode::Offline,
                    _ => ExpandMode::Unknown,
                };
            }
            None => {}
        }
    }

    (topology, expand)
}

/// RPC tokens advertised by the controller service
pub fn controller_rpcs(response: &ControllerGetCapabilitiesResponse) -> HashSet<ControllerRpc> {
    response
        .capabilities
        .iter()
        .filter_map(|capability| match &capability.r#type {
            Some(controller_service_capability::Type::Rpc(rpc)) => {
                ControllerRpc::try_from(rpc.r#type).ok()
            }
            None => None,
        })
        .collect()
}

/// RPC tokens advertised by the node service
pub fn node_rpcs(response: &NodeGetCapabilitiesResponse) -> HashSet<NodeRpc> {
    response
        .capabilities
        .iter()
        .filter_map(|capability| match &capability.r#type {
            Some(node_service_capability::Type::Rpc(rpc)) => NodeRpc::try_from(rpc.r#type).ok(),
            None => None,
        })
        .collect()
}

/// Combine the three capability responses into a feature set
pub fn feature_set(
    plugin: &GetPluginCapabilitiesResponse,
    controller: &ControllerGetCapabilitiesResponse,
    node: &NodeGetCapabilitiesResponse,
) -> FeatureSet {
    let (topology, expand) = plugin_features(plugin);
    let controller = controller_rpcs(controller);
    let node = node_rpcs(node);

    FeatureSet {
        topology,
        volume: VolumeFeatures {
            create: controller.contains(&ControllerRpc::CreateDeleteVolume),
            attach: controller.contains(&ControllerRpc::PublishUnpublishVolume),
            list: controller.contains(&ControllerRpc::ListVolumes),
            clone: controller.contains(&ControllerRpc::CloneVolume),
            stats: node.contains(&NodeRpc::GetVolumeStats),
            expand,
        },
        snapshot: SnapshotFeatures {
            create: controller.contains(&ControllerRpc::CreateDeleteSnapshot),
            list: controller.contains(&ControllerRpc::ListSnapshots),
        },
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::domain::ports::CsiClient;
    use crate::prober::csi::{
        ControllerServiceCapability, GetPluginInfoResponse, NodeServiceCapability,
        PluginCapability,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted CSI plugin
    #[derive(Default)]
    pub struct FakeCsi {
        pub name: String,
        pub version: String,
        pub plugin: Vec<PluginCapability>,
        pub controller: Vec<ControllerServiceCapability>,
        pub node: Vec<NodeServiceCapability>,
        /// Method that fails with `UNAVAILABLE`
        pub fail: Option<&'static str>,
        /// Method that never answers
        pub hang: Option<&'static str>,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl FakeCsi {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                version: "v1.0.0".to_string(),
                ..Self::default()
            }
        }

        async fn enter(&self, method: &'static str) -> Result<()> {
            self.calls.lock().push(method);
            if self.hang == Some(method) {
                std::future::pending::<()>().await;
            }
            if self.fail == Some(method) {
                return Err(Error::Rpc {
                    method,
                    status: tonic::Status::unavailable("plugin restarting"),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CsiClient for FakeCsi {
        async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse> {
            self.enter("GetPluginInfo").await?;
            Ok(GetPluginInfoResponse {
                name: self.name.clone(),
                vendor_version: self.version.clone(),
                manifest: Default::default(),
            })
        }

        async fn get_plugin_capabilities(&self) -> Result<GetPluginCapabilitiesResponse> {
            self.enter("GetPluginCapabilities").await?;
            Ok(GetPluginCapabilitiesResponse {
                capabilities: self.plugin.clone(),
            })
        }

        async fn controller_get_capabilities(&self) -> Result<ControllerGetCapabilitiesResponse> {
            self.enter("ControllerGetCapabilities").await?;
            Ok(ControllerGetCapabilitiesResponse {
                capabilities: self.controller.clone(),
            })
        }

        async fn node_get_capabilities(&self) -> Result<NodeGetCapabilitiesResponse> {
            self.enter("NodeGetCapabilities").await?;
            Ok(NodeGetCapabilitiesResponse {
                capabilities: self.node.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCsi;
    use super::*;
    use crate::prober::csi::{ControllerServiceCapability, NodeServiceCapability, PluginCapability};
    use assert_matches::assert_matches;
    use kube::ResourceExt;
    use plugin_capability::{service, volume_expansion};
    use std::sync::Arc;

    fn full_plugin(name: &str) -> FakeCsi {
        let mut csi = FakeCsi::new(name);
        csi.plugin = vec![
            PluginCapability::service(service::Type::ControllerService),
            PluginCapability::service(service::Type::VolumeAccessibilityConstraints),
            PluginCapability::volume_expansion(volume_expansion::Type::Online),
        ];
        csi.controller = vec![
            ControllerServiceCapability::rpc(ControllerRpc::CreateDeleteVolume),
            ControllerServiceCapability::rpc(ControllerRpc::PublishUnpublishVolume),
            ControllerServiceCapability::rpc(ControllerRpc::CreateDeleteSnapshot),
            ControllerServiceCapability::rpc(ControllerRpc::CloneVolume),
            ControllerServiceCapability::rpc(ControllerRpc::ExpandVolume),
        ];
        csi.node = vec![
            NodeServiceCapability::rpc(NodeRpc::StageUnstageVolume),
            NodeServiceCapability::rpc(NodeRpc::GetVolumeStats),
        ];
        csi
    }

    #[tokio::test]
    async fn test_probe_maps_capabilities() {
        let prober = Prober::new(Arc::new(full_plugin("disk.csi.example.com")), Duration::from_secs(1));

        let pcap = prober.probe().await.unwrap();
        assert_eq!(pcap.name_any(), "disk.csi.example.com");
        assert_eq!(pcap.plugin_version(), "v1.0.0");

        let features = &pcap.spec.features;
        assert!(features.topology);
        assert_eq!(features.volume.expand, ExpandMode::Online);
        assert!(features.volume.create);
        assert!(features.volume.attach);
        assert!(!features.volume.list);
        assert!(features.volume.clone);
        assert!(features.volume.stats);
        assert!(features.snapshot.create);
        assert!(!features.snapshot.list);
    }

    #[tokio::test]
    async fn test_minimal_plugin_reports_nothing() {
        let prober = Prober::new(Arc::new(FakeCsi::new("bare.csi")), Duration::from_secs(1));
        let pcap = prober.probe().await.unwrap();
        assert_eq!(pcap.spec.features, FeatureSet::default());
    }

    #[test]
    fn test_unknown_expansion_entries_are_unknown() {
        let response = GetPluginCapabilitiesResponse {
            capabilities: vec![
                PluginCapability::volume_expansion(volume_expansion::Type::Offline),
                PluginCapability {
                    r#type: Some(plugin_capability::Type::VolumeExpansion(
                        plugin_capability::VolumeExpansion { r#type: 99 },
                    )),
                },
                PluginCapability { r#type: None },
            ],
        };
        // The last recognised entry wins; an unrecognised one resets to Unknown
        assert_eq!(plugin_features(&response), (false, ExpandMode::Unknown));

        let response = GetPluginCapabilitiesResponse {
            capabilities: vec![PluginCapability::volume_expansion(volume_expansion::Type::Offline)],
        };
        assert_eq!(plugin_features(&response), (false, ExpandMode::Offline));
    }

    #[tokio::test]
    async fn test_failure_aborts_probe() {
        let mut csi = full_plugin("disk.csi.example.com");
        csi.fail = Some("ControllerGetCapabilities");
        let csi = Arc::new(csi);
        let prober = Prober::new(csi.clone(), Duration::from_secs(1));

        assert_matches!(
            prober.probe().await,
            Err(Error::Rpc { method: "ControllerGetCapabilities", .. })
        );
        assert!(!csi.calls.lock().contains(&"NodeGetCapabilities"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_call_has_a_deadline() {
        let mut csi = full_plugin("disk.csi.example.com");
        csi.hang = Some("NodeGetCapabilities");
        let prober = Prober::new(Arc::new(csi), Duration::from_secs(5));

        assert_matches!(
            prober.probe().await,
            Err(Error::RpcTimeout { method: "NodeGetCapabilities", timeout }) if timeout == Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_empty_plugin_name_is_rejected() {
        let prober = Prober::new(Arc::new(FakeCsi::new("")), Duration::from_secs(1));
        assert_matches!(prober.probe().await, Err(Error::InvalidObject { .. }));
    }
}

//! Capability CRDs
//!
//! `ProvisionerCapability` is published by the sidecar next to each CSI plugin.
//! `StorageClassCapability` is derived by the controller, one per StorageClass.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by both capability kinds
pub const GROUP: &str = "storage.kubesphere.io";

/// API version shared by both capability kinds
pub const VERSION: &str = "v1alpha1";

// =============================================================================
// ProvisionerCapability CRD
// =============================================================================

/// Capabilities reported by a CSI plugin, named after the plugin.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.kubesphere.io",
    version = "v1alpha1",
    kind = "ProvisionerCapability",
    plural = "provisionercapabilities",
    shortname = "pcap",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".spec.pluginInfo.version"}"#,
    printcolumn = r#"{"name": "Topology", "type": "boolean", "jsonPath": ".spec.features.topology"}"#,
    printcolumn = r#"{"name": "Expand", "type": "string", "jsonPath": ".spec.features.volume.expandMode"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerCapabilitySpec {
    /// Identity reported by the plugin
    pub plugin_info: PluginInfo,

    /// Feature set reported by the plugin
    #[serde(default)]
    pub features: FeatureSet,
}

/// Plugin identity from `GetPluginInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

impl ProvisionerCapability {
    /// Name of the plugin as reported by the plugin itself
    pub fn plugin_name(&self) -> &str {
        &self.spec.plugin_info.name
    }

    /// Vendor version of the plugin
    pub fn plugin_version(&self) -> &str {
        &self.spec.plugin_info.version
    }
}

// =============================================================================
// StorageClassCapability CRD
// =============================================================================

/// Capabilities available through a StorageClass. Named after the StorageClass.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.kubesphere.io",
    version = "v1alpha1",
    kind = "StorageClassCapability",
    plural = "storageclasscapabilities",
    shortname = "sccap",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Expand", "type": "string", "jsonPath": ".spec.features.volume.expandMode"}"#,
    printcolumn = r#"{"name": "Snapshot", "type": "boolean", "jsonPath": ".spec.features.snapshot.create"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassCapabilitySpec {
    /// Provisioner copied from the StorageClass
    pub provisioner: String,

    /// Features computed for the StorageClass
    #[serde(default)]
    pub features: FeatureSet,
}

// =============================================================================
// Feature Set
// =============================================================================

/// Capability flags shared by both kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    /// Plugin honours volume accessibility constraints
    #[serde(default)]
    pub topology: bool,

    #[serde(default)]
    pub volume: VolumeFeatures,

    #[serde(default)]
    pub snapshot: SnapshotFeatures,
}

/// Volume operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFeatures {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub attach: bool,
    #[serde(default)]
    pub list: bool,
    #[serde(default)]
    pub clone: bool,
    #[serde(default)]
    pub stats: bool,
    #[serde(default, rename = "expandMode")]
    pub expand: ExpandMode,
}

/// Snapshot operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFeatures {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub list: bool,
}

/// Volume expansion mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpandMode {
    #[default]
    Unknown,
    Offline,
    Online,
}

impl std::fmt::Display for ExpandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpandMode::Unknown => write!(f, "UNKNOWN"),
            ExpandMode::Offline => write!(f, "OFFLINE"),
            ExpandMode::Online => write!(f, "ONLINE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn test_expand_mode_wire_format() {
        assert_eq!(
            serde_json::to_string(&ExpandMode::Online).unwrap(),
            "\"ONLINE\""
        );
        let mode: ExpandMode = serde_json::from_str("\"OFFLINE\"").unwrap();
        assert_eq!(mode, ExpandMode::Offline);
        assert_eq!(ExpandMode::default(), ExpandMode::Unknown);
    }

    #[test]
    fn test_feature_set_field_names() {
        let mut features = FeatureSet::default();
        features.volume.expand = ExpandMode::Online;
        let value = serde_json::to_value(&features).unwrap();
        assert_eq!(value["volume"]["expandMode"], "ONLINE");
        assert_eq!(value["snapshot"]["create"], false);
    }

    #[test]
    fn test_provisioner_capability_decodes_sparse_spec() {
        let json = r#"{
            "apiVersion": "storage.kubesphere.io/v1alpha1",
            "kind": "ProvisionerCapability",
            "metadata": {"name": "disk.csi.example.com"},
            "spec": {"pluginInfo": {"name": "disk.csi.example.com", "version": "v1.2.0"}}
        }"#;
        let pcap: ProvisionerCapability = serde_json::from_str(json).unwrap();
        assert_eq!(pcap.plugin_name(), "disk.csi.example.com");
        assert_eq!(pcap.plugin_version(), "v1.2.0");
        assert_eq!(pcap.spec.features, FeatureSet::default());
    }

    #[test]
    fn test_crds_are_cluster_scoped() {
        let crd = StorageClassCapability::crd();
        assert_eq!(crd.spec.group, GROUP);
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.plural, "storageclasscapabilities");
        assert_eq!(ProvisionerCapability::version(&()), VERSION);
    }
}

//! Custom Resource Definitions
//!
//! This module contains the resource types the controller watches or owns:
//! - ProvisionerCapability: features reported by a CSI plugin
//! - StorageClassCapability: features available through a StorageClass
//! - VolumeSnapshotClass: external-snapshotter class, read-only

pub mod capability;
pub mod snapshot_class;

pub use capability::*;
pub use snapshot_class::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// CustomResourceDefinitions owned by this project
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![ProvisionerCapability::crd(), StorageClassCapability::crd()]
}

/// Render all CRDs as a multi-document YAML stream
pub fn render_crds() -> crate::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}

//! Derived-Object Builder
//!
//! Pure transform from a StorageClass, its optional VolumeSnapshotClass and the
//! ProvisionerCapability of its provisioner to the StorageClassCapability that
//! should exist for it. No I/O.

use crate::crd::{
    ExpandMode, FeatureSet, ProvisionerCapability, SnapshotFeatures, StorageClassCapability,
    StorageClassCapabilitySpec, VolumeSnapshotClass,
};
use crate::error::{Error, Result};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ObjectMeta;
use kube::ResourceExt;

/// Whether the StorageClass allows volume expansion. Unset means no.
pub fn allows_expansion(storage_class: &StorageClass) -> bool {
    storage_class.allow_volume_expansion.unwrap_or(false)
}

/// Whether the snapshot class pairs with the StorageClass and is served by the provisioner
pub fn snapshot_class_matches(
    storage_class: &StorageClass,
    snapshot_class: &VolumeSnapshotClass,
    pcap: &ProvisionerCapability,
) -> bool {
    snapshot_class.name_any() == storage_class.name_any() && snapshot_class.driver == pcap.name_any()
}

/// Compute the desired spec for a StorageClass
pub fn desired_spec(
    storage_class: &StorageClass,
    snapshot_class: Option<&VolumeSnapshotClass>,
    pcap: &ProvisionerCapability,
) -> StorageClassCapabilitySpec {
    let reported = &pcap.spec.features;

    let mut volume = reported.volume.clone();
    if !allows_expansion(storage_class) {
        volume.expand = ExpandMode::Unknown;
    }

    let snapshot = match snapshot_class {
        Some(vsc) if snapshot_class_matches(storage_class, vsc, pcap) => reported.snapshot.clone(),
        _ => SnapshotFeatures::default(),
    };

    StorageClassCapabilitySpec {
        provisioner: storage_class.provisioner.clone(),
        features: FeatureSet {
            topology: reported.topology,
            volume,
            snapshot,
        },
    }
}

/// Build a new StorageClassCapability named after the StorageClass
pub fn desired_capability(
    storage_class: &StorageClass,
    snapshot_class: Option<&VolumeSnapshotClass>,
    pcap: &ProvisionerCapability,
) -> StorageClassCapability {
    StorageClassCapability {
        metadata: ObjectMeta {
            name: Some(storage_class.name_any()),
            ..ObjectMeta::default()
        },
        spec: desired_spec(storage_class, snapshot_class, pcap),
    }
}

/// Copy of `existing` carrying the desired spec. Metadata, including the
/// resource version, is kept. A name that differs from the StorageClass is
/// rejected rather than corrected.
pub fn merge_capability(
    existing: &StorageClassCapability,
    storage_class: &StorageClass,
    snapshot_class: Option<&VolumeSnapshotClass>,
    pcap: &ProvisionerCapability,
) -> Result<StorageClassCapability> {
    let capability = existing.name_any();
    let storage_class_name = storage_class.name_any();
    if capability != storage_class_name {
        return Err(Error::NameMismatch {
            capability,
            storage_class: storage_class_name,
        });
    }

    let mut merged = existing.clone();
    merged.spec = desired_spec(storage_class, snapshot_class, pcap);
    Ok(merged)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_scenario_expansion_allowed_without_snapshot_class() {
        let sc = storage_class("sc1", "drv1", Some(true));
        let pcap = provisioner_capability("drv1");

        let sccap = desired_capability(&sc, None, &pcap);

        assert_eq!(sccap.name_any(), "sc1");
        assert_eq!(sccap.spec.provisioner, "drv1");
        assert!(sccap.spec.features.topology);
        assert!(sccap.spec.features.volume.create);
        assert_eq!(sccap.spec.features.volume.expand, ExpandMode::Online);
        assert_eq!(sccap.spec.features.snapshot, SnapshotFeatures::default());
    }

    #[test]
    fn test_expansion_disallowed_forces_unknown() {
        let pcap = provisioner_capability("drv1");
        for allow in [Some(false), None] {
            let sc = storage_class("sc1", "drv1", allow);
            let spec = desired_spec(&sc, None, &pcap);
            assert_eq!(spec.features.volume.expand, ExpandMode::Unknown);
            assert!(spec.features.topology);
            assert!(spec.features.volume.create);
        }
    }

    #[test]
    fn test_snapshot_features_require_name_and_driver_match() {
        let sc = storage_class("sc1", "drv1", Some(true));
        let pcap = provisioner_capability("drv1");

        let matching = VolumeSnapshotClass::new("sc1", "drv1");
        let spec = desired_spec(&sc, Some(&matching), &pcap);
        assert!(spec.features.snapshot.create);
        assert!(spec.features.snapshot.list);

        let other_driver = VolumeSnapshotClass::new("sc1", "drv2");
        let spec = desired_spec(&sc, Some(&other_driver), &pcap);
        assert_eq!(spec.features.snapshot, SnapshotFeatures::default());

        let other_name = VolumeSnapshotClass::new("sc2", "drv1");
        let spec = desired_spec(&sc, Some(&other_name), &pcap);
        assert_eq!(spec.features.snapshot, SnapshotFeatures::default());
    }

    #[test]
    fn test_merge_keeps_metadata() {
        let sc = storage_class("sc1", "drv1", Some(true));
        let pcap = provisioner_capability("drv1");

        let mut existing = StorageClassCapability::new("sc1", StorageClassCapabilitySpec::default());
        existing.metadata.resource_version = Some("42".to_string());
        existing.metadata.uid = Some("uid-1".to_string());

        let merged = merge_capability(&existing, &sc, None, &pcap).unwrap();
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(merged.metadata.uid.as_deref(), Some("uid-1"));
        assert_eq!(merged.spec, desired_spec(&sc, None, &pcap));
    }

    #[test]
    fn test_merge_rejects_name_mismatch() {
        let sc = storage_class("sc1", "drv1", Some(true));
        let pcap = provisioner_capability("drv1");
        let existing = StorageClassCapability::new("other", StorageClassCapabilitySpec::default());

        assert_matches!(
            merge_capability(&existing, &sc, None, &pcap),
            Err(Error::NameMismatch { capability, storage_class })
                if capability == "other" && storage_class == "sc1"
        );
    }
}

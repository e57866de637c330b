//! Cluster Inventory
//!
//! One-shot listing of StorageClasses next to the capability objects derived
//! for them, used by the `inspect` subcommand.

use crate::crd::{ExpandMode, ProvisionerCapability, StorageClassCapability};
use crate::error::Result;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// A StorageClass and the capability derived for it, if any
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassEntry {
    pub name: String,
    pub provisioner: String,
    pub allow_volume_expansion: bool,
    /// Whether a ProvisionerCapability exists for the provisioner
    pub provisioner_published: bool,
    pub capability: Option<CapabilitySummary>,
}

/// Condensed view of a StorageClassCapability
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub topology: bool,
    pub expand: ExpandMode,
    pub snapshot: bool,
    pub clone: bool,
}

/// A published ProvisionerCapability
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerEntry {
    pub name: String,
    pub version: String,
}

/// Everything the `inspect` subcommand reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub storage_classes: Vec<StorageClassEntry>,
    pub provisioners: Vec<ProvisionerEntry>,
    /// StorageClassCapabilities whose StorageClass no longer exists
    pub orphaned_capabilities: Vec<String>,
}

impl Inventory {
    /// List the three kinds from the API server
    pub async fn collect(client: Client) -> Result<Self> {
        let params = ListParams::default();
        let storage_classes = Api::<StorageClass>::all(client.clone())
            .list(&params)
            .await?
            .items;
        let provisioners = Api::<ProvisionerCapability>::all(client.clone())
            .list(&params)
            .await?
            .items;
        let capabilities = Api::<StorageClassCapability>::all(client)
            .list(&params)
            .await?
            .items;
        Ok(Self::from_objects(storage_classes, provisioners, capabilities))
    }

    /// Correlate already-listed objects
    pub fn from_objects(
        storage_classes: Vec<StorageClass>,
        provisioners: Vec<ProvisionerCapability>,
        capabilities: Vec<StorageClassCapability>,
    ) -> Self {
        let mut capabilities: BTreeMap<String, StorageClassCapability> = capabilities
            .into_iter()
            .map(|sccap| (sccap.name_any(), sccap))
            .collect();

        let mut provisioners: Vec<ProvisionerEntry> = provisioners
            .into_iter()
            .map(|pcap| ProvisionerEntry {
                name: pcap.name_any(),
                version: pcap.plugin_version().to_string(),
            })
            .collect();
        provisioners.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries: Vec<StorageClassEntry> = storage_classes
            .into_iter()
            .map(|sc| {
                let name = sc.name_any();
                let capability = capabilities.remove(&name).map(|sccap| {
                    let features = sccap.spec.features;
                    CapabilitySummary {
                        topology: features.topology,
                        expand: features.volume.expand,
                        snapshot: features.snapshot.create,
                        clone: features.volume.clone,
                    }
                });
                StorageClassEntry {
                    provisioner_published: provisioners.iter().any(|p| p.name == sc.provisioner),
                    name,
                    provisioner: sc.provisioner,
                    allow_volume_expansion: sc.allow_volume_expansion.unwrap_or(false),
                    capability,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            storage_classes: entries,
            provisioners,
            orphaned_capabilities: capabilities.into_keys().collect(),
        }
    }

    /// Plain-text tables
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "{:<24} {:<32} {:<7} {:<9} {:<8} {:<8} {:<6}",
            "STORAGECLASS", "PROVISIONER", "EXPAND", "TOPOLOGY", "MODE", "SNAPSHOT", "CLONE"
        );
        for sc in &self.storage_classes {
            match &sc.capability {
                Some(cap) => {
                    let _ = writeln!(
                        out,
                        "{:<24} {:<32} {:<7} {:<9} {:<8} {:<8} {:<6}",
                        sc.name,
                        sc.provisioner,
                        sc.allow_volume_expansion,
                        cap.topology,
                        cap.expand.to_string(),
                        cap.snapshot,
                        cap.clone
                    );
                }
                None => {
                    let reason = if sc.provisioner_published {
                        "<pending>"
                    } else {
                        "<no provisioner capability>"
                    };
                    let _ = writeln!(
                        out,
                        "{:<24} {:<32} {:<7} {}",
                        sc.name, sc.provisioner, sc.allow_volume_expansion, reason
                    );
                }
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{:<32} {:<16}", "PROVISIONER", "VERSION");
        for p in &self.provisioners {
            let _ = writeln!(out, "{:<32} {:<16}", p.name, p.version);
        }

        if !self.orphaned_capabilities.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Orphaned StorageClassCapabilities: {}",
                self.orphaned_capabilities.join(", ")
            );
        }
        out
    }
}

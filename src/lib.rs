//! Storage Capability
//!
//! Publishes what each CSI plugin can do and derives, for every StorageClass,
//! the capabilities available through it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── per CSI plugin ─────────────────────────────┐
//! │  ┌──────────────┐   gRPC    ┌──────────┐        ┌───────────────────────┐    │
//! │  │  CSI plugin  │ ◄──────── │  Prober  │ ─────► │ CapabilityPublisher   │    │
//! │  └──────────────┘           └──────────┘        └───────────┬───────────┘    │
//! └─────────────────────────────────────────────────────────────┼────────────────┘
//!                                                               │ ProvisionerCapability
//! ┌──────────────────────────────── controller ─────────────────┼────────────────┐
//! │  StorageClass, VolumeSnapshotClass,                         ▼                │
//! │  ProvisionerCapability, StorageClassCapability ──► WatchCaches               │
//! │                                                     │                        │
//! │                          EventRouter ◄──────────────┘                        │
//! │                               │ StorageClass names                           │
//! │                               ▼                                              │
//! │                          WorkQueue ──► workers ──► Reconciler                │
//! │                                                        │                     │
//! │                                                        ▼                     │
//! │                                              StorageClassCapability          │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: StorageClassCapability reconciliation engine
//! - [`prober`]: CSI capability probing
//! - [`publisher`]: ProvisionerCapability sidecar loop
//! - [`informer`]: Watch caches over the Kubernetes API
//! - [`client`]: Adapters for the domain ports
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core traits
//! - [`metrics`], [`server`]: Prometheus metrics and health endpoints
//! - [`error`]: Error types and handling

pub mod client;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod informer;
pub mod metrics;
pub mod prober;
pub mod publisher;
pub mod server;

// Re-export commonly used types
pub use client::{InMemoryCapabilityStore, Inventory, KubeCapabilityStore, KubeDiscovery, StaticVersion};

pub use controller::{
    CapabilityController, ControllerConfig, EventRouter, KubeVersion, RateLimiterConfig,
    Reconciler, RunExit, SyncOutcome, WorkQueue,
};

pub use crd::{
    ExpandMode, FeatureSet, PluginInfo, ProvisionerCapability, ProvisionerCapabilitySpec,
    SnapshotFeatures, StorageClassCapability, StorageClassCapabilitySpec, VolumeFeatures,
    VolumeSnapshotClass,
};

pub use domain::ports::{CapabilityStore, CsiClient, Lister, VersionDiscovery};

pub use error::{Error, ErrorAction, Result};

pub use informer::{ObjectCache, WatchCaches, WatchEvent};

pub use metrics::Metrics;

pub use prober::{CsiAddress, GrpcCsiClient, Prober};

pub use publisher::{CapabilityPublisher, PublishOutcome, PublisherConfig};

pub use server::HealthServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

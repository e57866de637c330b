//! StorageClassCapability Reconciliation Engine
//!
//! Level-triggered control loop keeping one StorageClassCapability per
//! StorageClass:
//!
//! ```text
//! StorageClass ─┐
//! SnapshotClass ├─> EventRouter ─> WorkQueue ─> workers ─> Reconciler ─> CapabilityStore
//! Provisioner  ─┤      (names)      (dedup,                 (desired vs
//! Capability    │                    backoff)                 cached)
//! SCCapability ─┘
//! ```

pub mod desired;
pub mod engine;
pub mod handlers;
pub mod queue;
pub mod reconciler;
pub mod version;

pub use desired::{desired_capability, desired_spec, merge_capability};
pub use engine::{CapabilityController, ControllerConfig, RunExit, MINIMAL_KUBERNETES_VERSION};
pub use handlers::EventRouter;
pub use queue::{ItemRateLimiter, RateLimiterConfig, WorkQueue};
pub use reconciler::{Reconciler, SyncOutcome};
pub use version::KubeVersion;

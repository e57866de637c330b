//! Port adapters
//!
//! - `apiserver`: the ports over a kube `Client`
//! - `memory`: the ports over the local watch caches, for tests and benches
//! - `inventory`: read-only listing for the `inspect` subcommand

pub mod apiserver;
pub mod inventory;
pub mod memory;

pub use apiserver::{KubeCapabilityStore, KubeDiscovery};
pub use inventory::Inventory;
pub use memory::{InMemoryCapabilityStore, StaticVersion, WriteCall};

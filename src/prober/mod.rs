//! CSI Capability Prober
//!
//! - `csi`: protobuf messages for the CSI v1 capability calls
//! - `client`: tonic client over a unix socket or TCP endpoint
//! - `probe`: response mapping into a `ProvisionerCapability`

pub mod client;
pub mod csi;
pub mod probe;

pub use client::{CsiAddress, GrpcCsiClient};
pub use probe::{feature_set, Prober};

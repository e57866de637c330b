//! Error types for the storage capability controller and sidecar
//!
//! Provides structured error types for the watch caches, the reconciliation
//! engine, the CSI capability prober and the Kubernetes API adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the controller and sidecar
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Invalid {kind} object: {reason}")]
    InvalidObject { kind: String, reason: String },

    #[error(
        "StorageClassCapability name should be the same as StorageClass name, but {capability} != {storage_class}"
    )]
    NameMismatch {
        capability: String,
        storage_class: String,
    },

    #[error("Watch cache for {kind} has not synced")]
    CacheNotSynced { kind: String },

    #[error("Invalid Kubernetes version: {0}")]
    InvalidVersion(String),

    // =========================================================================
    // CSI Plugin Errors
    // =========================================================================
    #[error("CSI call {method} failed: {status}")]
    Rpc {
        method: &'static str,
        status: tonic::Status,
    },

    #[error("CSI call {method} timed out after {timeout:?}")]
    RpcTimeout {
        method: &'static str,
        timeout: Duration,
    },

    #[error("CSI transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Probed driver name {actual} does not match configured driver name {expected}")]
    DriverNameMismatch { expected: String, actual: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Rpc { .. }
            | Error::RpcTimeout { .. }
            | Error::Transport(_)
            | Error::ResourceExists { .. } => ErrorAction::RequeueWithBackoff,

            // The informer will catch up shortly
            Error::CacheNotSynced { .. } => ErrorAction::RequeueAfter(Duration::from_secs(1)),

            // Structural or configuration problems - a retry would see the same input
            Error::Configuration(_)
            | Error::InvalidObject { .. }
            | Error::NameMismatch { .. }
            | Error::DriverNameMismatch { .. }
            | Error::InvalidVersion(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Build a not-found error for a resource kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

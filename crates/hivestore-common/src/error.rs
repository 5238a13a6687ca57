//! Error types for HiveStore
//!
//! One error type is shared by the layout engine and the fragment store so
//! callers can route on the failure class without knowing which component
//! raised it.

use crate::types::{DiskId, FragmentHandle, LayoutMapId};
use thiserror::Error;

/// Common result type for HiveStore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for HiveStore
#[derive(Debug, Error)]
pub enum Error {
    // Placement errors
    #[error("insufficient disks for layout: have {available}, need {required}")]
    InsufficientDisks { available: usize, required: usize },

    #[error("invalid layout map id {map_id}: must be below {limit}")]
    InvalidMapId { map_id: LayoutMapId, limit: u32 },

    #[error("invalid disk reference: {0}")]
    InvalidDisk(DiskId),

    // Fragment errors
    #[error("fragment storage error on {fragment}: {reason}")]
    FragmentStorage { fragment: String, reason: String },

    #[error("fragment not found: {fragment}")]
    FragmentNotFound { fragment: String },

    #[error("stale write checkpoint for {fragment}: {reason}")]
    StaleCheckpoint { fragment: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a fragment storage error for a state-machine or media failure
    pub fn fragment(handle: &FragmentHandle, reason: impl Into<String>) -> Self {
        Self::FragmentStorage {
            fragment: handle.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O failure raised while operating on a fragment
    pub fn fragment_io(handle: &FragmentHandle, op: &str, err: &std::io::Error) -> Self {
        Self::FragmentStorage {
            fragment: handle.to_string(),
            reason: format!("{op}: {err}"),
        }
    }

    /// Create a not-found error for a fragment
    pub fn fragment_not_found(handle: &FragmentHandle) -> Self {
        Self::FragmentNotFound {
            fragment: handle.to_string(),
        }
    }

    /// Create a stale checkpoint error
    pub fn stale_checkpoint(handle: &FragmentHandle, reason: impl Into<String>) -> Self {
        Self::StaleCheckpoint {
            fragment: handle.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The expected on-disk state does not exist. Often legitimate: the
    /// fragment may live on a different, recovering disk.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FragmentNotFound { .. })
    }

    /// Media failure or a call the fragment state machine forbids
    #[must_use]
    pub fn is_fragment_storage(&self) -> bool {
        matches!(self, Self::FragmentStorage { .. } | Self::Storage(_))
    }

    /// Errors that prevent the process from starting at all
    #[must_use]
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            Self::InsufficientDisks { .. } | Self::Configuration(_)
        )
    }
}

//! HiveStore Fragment Store - per-fragment lifecycle on local disks
//!
//! This crate implements the storage side of one physical fragment:
//! - Staged creation and atomic publish (commit) / un-publish (rollback)
//! - Positioned and appending I/O on an open handle
//! - Non-reentrant advisory locks that fail instead of waiting
//! - Footer extensions (per-fragment key/value metadata)
//! - Write checkpoints that make an interrupted write resumable
//!
//! Backends form a closed set chosen once at startup, see [`backend`].

pub mod backend;
pub mod checkpoint;
pub mod footer;
pub mod fragment;
pub mod record;
pub mod store;

// Re-exports
pub use backend::{
    AnyBackend, AnyMedium, FileBackend, FragmentBackend, FragmentMedium, MemoryBackend,
};
pub use checkpoint::WriteCheckpoint;
pub use footer::FooterExtension;
pub use fragment::{CloseSignal, Fragment, FragmentState};
pub use store::{FragmentStats, FragmentStore, SweepReport};

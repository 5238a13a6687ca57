//! Fragment storage backends
//!
//! A backend knows where a fragment's bytes, footer extension and checkpoint
//! slots live for each lifecycle state, and how to move them between the
//! staging and durable locations. Lifecycle rules (which transitions are
//! legal, locking, cursors) live in [`crate::Fragment`], not here.
//!
//! # Backends
//!
//! - `file`: one directory tree per disk, publish by rename (default)
//! - `memory`: in-process maps, for tests and ephemeral nodes
//!
//! The set is closed. [`AnyBackend`] selects one at startup and dispatches
//! with a `match`, so the per-fragment path never goes through a vtable.

pub mod file;
pub mod memory;

use crate::FragmentState;
use hivestore_common::config::{BackendKind, FragmentConfig};
use hivestore_common::{DiskId, FragmentHandle, Result};
use std::io;
use std::path::PathBuf;
use tracing::info;

pub use file::{FileBackend, FileMedium};
pub use memory::{MemoryBackend, MemoryMedium};

/// Byte-level access to one open fragment
pub trait FragmentMedium: Send + Sync {
    /// Read into `buf` starting at `offset`; returns 0 at end of fragment
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write all of `buf` at `offset`, extending the fragment if needed
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Current content length
    fn size(&self) -> io::Result<u64>;

    /// Shrink or extend the content
    fn set_len(&self, size: u64) -> io::Result<()>;

    /// Force written bytes to stable storage
    fn sync(&self) -> io::Result<()>;
}

/// Placement of fragment state on a storage medium
pub trait FragmentBackend: Send + Sync {
    /// Handle type produced by `create` and `open`
    type Medium: FragmentMedium;

    /// Backend kind, for logging
    fn kind(&self) -> BackendKind;

    /// Current lifecycle state of a fragment
    fn state(&self, handle: &FragmentHandle) -> Result<FragmentState>;

    /// Create an empty fragment in the staging location, opened read-write.
    /// Fails if the staging copy already exists.
    fn create(&self, handle: &FragmentHandle) -> Result<Self::Medium>;

    /// Open the copy held in the location for `state`
    fn open(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        writable: bool,
    ) -> Result<Self::Medium>;

    /// Atomically move the staged copy (and its footer) into the durable location
    fn publish(&self, handle: &FragmentHandle) -> Result<()>;

    /// Move the durable copy (and its footer) back to staging
    fn unpublish(&self, handle: &FragmentHandle) -> Result<()>;

    /// Remove every copy of the fragment and its companion files
    fn remove(&self, handle: &FragmentHandle) -> Result<()>;

    /// Content length of the copy held in the location for `state`
    fn length(&self, handle: &FragmentHandle, state: FragmentState) -> Result<u64>;

    /// Raw footer extension, if one was written
    fn read_footer(&self, handle: &FragmentHandle, state: FragmentState)
    -> Result<Option<Vec<u8>>>;

    /// Atomically replace the footer extension
    fn write_footer(&self, handle: &FragmentHandle, state: FragmentState, data: &[u8])
    -> Result<()>;

    /// Raw contents of one checkpoint slot
    fn read_checkpoint_slot(&self, handle: &FragmentHandle, slot: usize)
    -> Result<Option<Vec<u8>>>;

    /// Atomically replace one checkpoint slot; `flush` forces it to stable storage
    fn write_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
        data: &[u8],
        flush: bool,
    ) -> Result<()>;

    /// Remove all checkpoint slots of a fragment
    fn remove_checkpoint(&self, handle: &FragmentHandle) -> Result<()>;

    /// Fragments on a disk that have at least one checkpoint slot
    fn list_checkpoints(&self, disk: DiskId) -> Result<Vec<FragmentHandle>>;
}

/// Backend selected once at startup
pub enum AnyBackend {
    File(FileBackend),
    Memory(MemoryBackend),
}

/// Medium of an [`AnyBackend`]
pub enum AnyMedium {
    File(FileMedium),
    Memory(MemoryMedium),
}

impl AnyBackend {
    /// Build the configured backend over a set of disks
    pub fn from_config(config: &FragmentConfig, disks: &[(DiskId, PathBuf)]) -> Result<Self> {
        let backend = match config.backend {
            BackendKind::File => {
                Self::File(FileBackend::new(disks.iter().cloned(), config.sync_mode)?)
            }
            BackendKind::Memory => {
                Self::Memory(MemoryBackend::new(disks.iter().map(|(id, _)| *id)))
            }
        };
        info!(
            "Fragment backend: {} over {} disks (sync {:?})",
            config.backend,
            disks.len(),
            config.sync_mode
        );
        Ok(backend)
    }
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $e:expr) => {
        match $self {
            AnyBackend::File($b) => $e,
            AnyBackend::Memory($b) => $e,
        }
    };
}

macro_rules! dispatch_medium {
    ($self:ident, $m:ident => $e:expr) => {
        match $self {
            AnyMedium::File($m) => $e,
            AnyMedium::Memory($m) => $e,
        }
    };
}

impl FragmentMedium for AnyMedium {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        dispatch_medium!(self, m => m.read_at(buf, offset))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        dispatch_medium!(self, m => m.write_at(buf, offset))
    }

    fn size(&self) -> io::Result<u64> {
        dispatch_medium!(self, m => m.size())
    }

    fn set_len(&self, size: u64) -> io::Result<()> {
        dispatch_medium!(self, m => m.set_len(size))
    }

    fn sync(&self) -> io::Result<()> {
        dispatch_medium!(self, m => m.sync())
    }
}

impl FragmentBackend for AnyBackend {
    type Medium = AnyMedium;

    fn kind(&self) -> BackendKind {
        dispatch!(self, b => b.kind())
    }

    fn state(&self, handle: &FragmentHandle) -> Result<FragmentState> {
        dispatch!(self, b => b.state(handle))
    }

    fn create(&self, handle: &FragmentHandle) -> Result<AnyMedium> {
        match self {
            Self::File(b) => b.create(handle).map(AnyMedium::File),
            Self::Memory(b) => b.create(handle).map(AnyMedium::Memory),
        }
    }

    fn open(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        writable: bool,
    ) -> Result<AnyMedium> {
        match self {
            Self::File(b) => b.open(handle, state, writable).map(AnyMedium::File),
            Self::Memory(b) => b.open(handle, state, writable).map(AnyMedium::Memory),
        }
    }

    fn publish(&self, handle: &FragmentHandle) -> Result<()> {
        dispatch!(self, b => b.publish(handle))
    }

    fn unpublish(&self, handle: &FragmentHandle) -> Result<()> {
        dispatch!(self, b => b.unpublish(handle))
    }

    fn remove(&self, handle: &FragmentHandle) -> Result<()> {
        dispatch!(self, b => b.remove(handle))
    }

    fn length(&self, handle: &FragmentHandle, state: FragmentState) -> Result<u64> {
        dispatch!(self, b => b.length(handle, state))
    }

    fn read_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
    ) -> Result<Option<Vec<u8>>> {
        dispatch!(self, b => b.read_footer(handle, state))
    }

    fn write_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        data: &[u8],
    ) -> Result<()> {
        dispatch!(self, b => b.write_footer(handle, state, data))
    }

    fn read_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
    ) -> Result<Option<Vec<u8>>> {
        dispatch!(self, b => b.read_checkpoint_slot(handle, slot))
    }

    fn write_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
        data: &[u8],
        flush: bool,
    ) -> Result<()> {
        dispatch!(self, b => b.write_checkpoint_slot(handle, slot, data, flush))
    }

    fn remove_checkpoint(&self, handle: &FragmentHandle) -> Result<()> {
        dispatch!(self, b => b.remove_checkpoint(handle))
    }

    fn list_checkpoints(&self, disk: DiskId) -> Result<Vec<FragmentHandle>> {
        dispatch!(self, b => b.list_checkpoints(disk))
    }
}

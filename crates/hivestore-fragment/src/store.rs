//! Fragment store: the shared state behind every [`Fragment`]
//!
//! A store is built once at startup around one backend. It owns the
//! advisory lock table, the sync policy, the topology epoch stamped into
//! write checkpoints, and the statistics counters.

use crate::backend::{AnyBackend, FragmentBackend};
use crate::{Fragment, FragmentState};
use hivestore_common::config::{FragmentConfig, SyncMode};
use hivestore_common::{DiskId, FragmentHandle, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Store-wide counters
#[derive(Debug, Default)]
pub struct FragmentStats {
    pub creates: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub deletes: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    /// `lock` calls refused because the lock was already taken
    pub lock_conflicts: AtomicU64,
    pub checkpoints_saved: AtomicU64,
}

impl FragmentStats {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.creates,
            &self.commits,
            &self.rollbacks,
            &self.deletes,
            &self.bytes_read,
            &self.bytes_written,
            &self.lock_conflicts,
            &self.checkpoints_saved,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Outcome of a stale checkpoint sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Fragments with at least one checkpoint slot
    pub examined: usize,
    /// Checkpoints removed because their fragment was not transient
    pub removed: usize,
}

pub(crate) struct StoreShared<B> {
    pub(crate) backend: B,
    locks: Mutex<HashSet<FragmentHandle>>,
    pub(crate) stats: FragmentStats,
    pub(crate) sync_mode: SyncMode,
    pub(crate) topology_epoch: u64,
}

impl<B> StoreShared<B> {
    /// Take the advisory lock; never waits
    pub(crate) fn try_lock(&self, handle: &FragmentHandle) -> bool {
        self.locks.lock().insert(*handle)
    }

    pub(crate) fn unlock(&self, handle: &FragmentHandle) -> bool {
        self.locks.lock().remove(handle)
    }
}

/// Entry point for per-fragment operations
pub struct FragmentStore<B: FragmentBackend> {
    shared: Arc<StoreShared<B>>,
}

impl<B: FragmentBackend> Clone for FragmentStore<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl FragmentStore<AnyBackend> {
    /// Build the configured backend and wrap it in a store
    pub fn from_config(
        config: &FragmentConfig,
        disks: &[(DiskId, PathBuf)],
        topology_epoch: u64,
    ) -> Result<Self> {
        let backend = AnyBackend::from_config(config, disks)?;
        Ok(Self::new(backend, config.sync_mode, topology_epoch))
    }
}

impl<B: FragmentBackend> FragmentStore<B> {
    pub fn new(backend: B, sync_mode: SyncMode, topology_epoch: u64) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                backend,
                locks: Mutex::new(HashSet::new()),
                stats: FragmentStats::default(),
                sync_mode,
                topology_epoch,
            }),
        }
    }

    /// Lifecycle handle for one fragment. Cheap; nothing touches the medium
    /// until an operation is called.
    #[must_use]
    pub fn fragment(&self, handle: FragmentHandle) -> Fragment<B> {
        Fragment::new(handle, Arc::clone(&self.shared))
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    #[must_use]
    pub fn stats(&self) -> &FragmentStats {
        &self.shared.stats
    }

    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        self.shared.sync_mode
    }

    /// Topology epoch stamped into checkpoints written through this store
    #[must_use]
    pub fn topology_epoch(&self) -> u64 {
        self.shared.topology_epoch
    }

    /// Delete checkpoints on `disk` whose fragment is no longer transient.
    ///
    /// A checkpoint only means something for a transient fragment; once the
    /// fragment is committed or gone, resuming from it would be wrong.
    pub fn sweep_stale_checkpoints(&self, disk: DiskId) -> Result<SweepReport> {
        let backend = &self.shared.backend;
        let mut report = SweepReport::default();

        for handle in backend.list_checkpoints(disk)? {
            report.examined += 1;
            let state = backend.state(&handle)?;
            if state != FragmentState::Transient {
                debug!("Removing checkpoint of {} fragment {}", state, handle);
                backend.remove_checkpoint(&handle)?;
                report.removed += 1;
            }
        }

        info!(
            "Checkpoint sweep on {}: examined {}, removed {}",
            disk, report.examined, report.removed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use hivestore_common::ObjectId;

    #[test]
    fn test_lock_table_is_per_handle() {
        let store = FragmentStore::new(MemoryBackend::new([DiskId::new(0)]), SyncMode::Never, 0);
        let a = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 0);
        let b = FragmentHandle::new(DiskId::new(0), a.object_id, 1);

        assert!(store.shared.try_lock(&a));
        assert!(!store.shared.try_lock(&a));
        assert!(store.shared.try_lock(&b));
        assert!(store.shared.unlock(&a));
        assert!(!store.shared.unlock(&a));
    }

    #[test]
    fn test_stats_reset() {
        let stats = FragmentStats::default();
        FragmentStats::bump(&stats.bytes_written, 42);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 42);
        stats.reset();
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
    }
}

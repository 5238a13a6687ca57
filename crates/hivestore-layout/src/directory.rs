//! Layout directory: precomputed layouts for every map id
//!
//! Built once at startup from a disk registry. The layout table is immutable
//! afterwards, so store, retrieve and resilver lookups never take a lock.
//! Only the disabled-disk mask is mutable, behind a single `RwLock`.

use crate::engine::LayoutEngine;
use crate::layout::Layout;
use crate::mask::DiskMask;
use crate::registry::DiskRegistry;
use hivestore_common::config::LayoutConfig;
use hivestore_common::{DiskId, ErasureConfig, Error, LayoutMapId, Result};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

/// Precomputed layout table plus administrative disk state
pub struct LayoutDirectory {
    registry: Arc<DiskRegistry>,
    erasure: ErasureConfig,
    layouts: Vec<Layout>,
    disabled: RwLock<DiskMask>,
}

impl LayoutDirectory {
    /// Build one layout per map id from the registry.
    ///
    /// Fails fast when the stripe is wider than the disk population.
    pub fn initialize(registry: Arc<DiskRegistry>, config: &LayoutConfig) -> Result<Self> {
        if config.num_map_ids == 0 {
            return Err(Error::configuration("num_map_ids must be non-zero"));
        }

        let engine = LayoutEngine::new(&registry, config.erasure)?;
        let layouts: Vec<Layout> = (0..config.num_map_ids)
            .map(|id| engine.compute(LayoutMapId::new(id)))
            .collect();
        let disabled = RwLock::new(registry.initial_mask());

        info!(
            "Initialized layout directory: {} map ids, {} disks, stripe {}",
            layouts.len(),
            registry.len(),
            config.erasure
        );

        Ok(Self {
            registry,
            erasure: config.erasure,
            layouts,
            disabled,
        })
    }

    /// Disk registry the layouts were computed from
    #[must_use]
    pub fn registry(&self) -> &DiskRegistry {
        &self.registry
    }

    /// Erasure geometry
    #[must_use]
    pub fn erasure(&self) -> ErasureConfig {
        self.erasure
    }

    /// Size of the map id space
    #[must_use]
    pub fn num_map_ids(&self) -> u32 {
        self.layouts.len() as u32
    }

    /// Fingerprint of the disk population the layouts depend on
    #[must_use]
    pub fn topology_epoch(&self) -> u64 {
        self.registry.fingerprint()
    }

    /// Uniformly random map id for a brand-new object
    #[must_use]
    pub fn allocate_new_map_id(&self) -> LayoutMapId {
        LayoutMapId::new(rand::thread_rng().gen_range(0..self.num_map_ids()))
    }

    /// Map id for the chunk after `map_id` in a multi-chunk object
    #[must_use]
    pub fn next_map_id(&self, map_id: LayoutMapId) -> LayoutMapId {
        LayoutMapId::new(cyclic_next(map_id.get(), self.num_map_ids()))
    }

    /// Map id for the chunk before `map_id` in a multi-chunk object
    #[must_use]
    pub fn previous_map_id(&self, map_id: LayoutMapId) -> LayoutMapId {
        LayoutMapId::new(cyclic_previous(map_id.get(), self.num_map_ids()))
    }

    /// Layout for storing a new stripe
    pub fn layout_for_store(&self, map_id: LayoutMapId) -> Result<&Layout> {
        self.lookup(map_id)
    }

    /// Layout for reading a stripe back.
    ///
    /// Always the original layout, even if one of its disks has since
    /// failed; missing fragments are handled by retrieval fallback.
    pub fn layout_for_retrieve(&self, map_id: LayoutMapId) -> Result<&Layout> {
        self.lookup(map_id)
    }

    /// Layout consulted when moving fragments between disks
    pub fn layout_for_resilver(&self, map_id: LayoutMapId) -> Result<&Layout> {
        self.lookup(map_id)
    }

    /// Replacement layout for rebuilding fragments whose disk is gone
    pub fn layout_for_recovery(&self, map_id: LayoutMapId, mask: &DiskMask) -> Result<Layout> {
        self.check_map_id(map_id)?;
        LayoutEngine::new(&self.registry, self.erasure)?.compute_recovery(map_id, mask)
    }

    /// Replacement layout honoring the currently disabled disks
    pub fn layout_for_recovery_now(&self, map_id: LayoutMapId) -> Result<Layout> {
        let mask = self.disabled_mask();
        self.layout_for_recovery(map_id, &mask)
    }

    /// Map ids whose layout places a fragment on `disk`
    pub fn map_ids_on_disk(&self, disk: DiskId) -> Result<Vec<LayoutMapId>> {
        if self.registry.index_of(disk).is_none() {
            return Err(Error::InvalidDisk(disk));
        }
        Ok(self
            .layouts
            .iter()
            .filter(|l| l.contains(disk))
            .map(Layout::map_id)
            .collect())
    }

    /// Enable or disable a disk for recovery placement
    pub fn set_disk_enabled(&self, disk: DiskId, enabled: bool) -> Result<()> {
        let index = self
            .registry
            .index_of(disk)
            .ok_or(Error::InvalidDisk(disk))?;

        let mut mask = self.disabled.write();
        if enabled {
            mask.clear(index);
        } else {
            mask.set(index);
        }
        debug!("{} {}", disk, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Disable a disk
    pub fn set_disk_disabled(&self, disk: DiskId) -> Result<()> {
        self.set_disk_enabled(disk, false)
    }

    /// Whether a disk is currently enabled
    pub fn is_disk_enabled(&self, disk: DiskId) -> Result<bool> {
        let index = self
            .registry
            .index_of(disk)
            .ok_or(Error::InvalidDisk(disk))?;
        Ok(!self.disabled.read().contains(index))
    }

    /// Snapshot of the disabled-disk mask
    #[must_use]
    pub fn disabled_mask(&self) -> DiskMask {
        self.disabled.read().clone()
    }

    fn check_map_id(&self, map_id: LayoutMapId) -> Result<()> {
        if map_id.get() >= self.num_map_ids() {
            return Err(Error::InvalidMapId {
                map_id,
                limit: self.num_map_ids(),
            });
        }
        Ok(())
    }

    fn lookup(&self, map_id: LayoutMapId) -> Result<&Layout> {
        self.check_map_id(map_id)?;
        Ok(&self.layouts[map_id.get() as usize])
    }
}

/// Successor of `id` in `0..n`, wrapping; `n` must be non-zero
fn cyclic_next(id: u32, n: u32) -> u32 {
    let m = id % n;
    if m == n - 1 { 0 } else { m + 1 }
}

/// Predecessor of `id` in `0..n`, wrapping; `n` must be non-zero
fn cyclic_previous(id: u32, n: u32) -> u32 {
    let m = id % n;
    if m == 0 { n - 1 } else { m - 1 }
}

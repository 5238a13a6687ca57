//! Disk registry: the disk population placement draws from

use crate::mask::DiskMask;
use hivestore_common::config::DiskConfig;
use hivestore_common::{DiskId, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Disk information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Stable disk identity
    pub id: DiskId,
    /// Root of the disk's fragment tree
    pub path: PathBuf,
    /// Enabled at registration time
    pub enabled: bool,
}

impl DiskInfo {
    /// Create an enabled disk
    #[must_use]
    pub fn new(id: DiskId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            enabled: true,
        }
    }

    /// Mark the disk as disabled at registration time
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<&DiskConfig> for DiskInfo {
    fn from(config: &DiskConfig) -> Self {
        Self {
            id: DiskId::new(config.id),
            path: config.path.clone(),
            enabled: config.enabled,
        }
    }
}

/// Ordered, immutable set of known disks.
///
/// Placement draws indices into this list, so two registries built from the
/// same disks in the same order produce the same layouts.
#[derive(Clone, Debug)]
pub struct DiskRegistry {
    disks: Vec<DiskInfo>,
    index: HashMap<DiskId, usize>,
}

impl DiskRegistry {
    /// Build a registry, rejecting duplicate disk ids
    pub fn new(disks: Vec<DiskInfo>) -> Result<Self> {
        let mut index = HashMap::with_capacity(disks.len());
        for (i, disk) in disks.iter().enumerate() {
            if index.insert(disk.id, i).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate disk id {} in registry",
                    disk.id
                )));
            }
        }
        Ok(Self { disks, index })
    }

    /// Build a registry of enabled disks with the given ids and empty paths
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Result<Self> {
        Self::new(
            ids.into_iter()
                .map(|id| DiskInfo::new(DiskId::new(id), PathBuf::new()))
                .collect(),
        )
    }

    /// Build a registry from configured disks
    pub fn from_config(disks: &[DiskConfig]) -> Result<Self> {
        Self::new(disks.iter().map(DiskInfo::from).collect())
    }

    /// Number of known disks
    #[must_use]
    pub fn len(&self) -> usize {
        self.disks.len()
    }

    /// Whether no disks are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Disk at a registry index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DiskInfo> {
        self.disks.get(index)
    }

    /// Registry index of a disk
    #[must_use]
    pub fn index_of(&self, id: DiskId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Look up a disk by id
    #[must_use]
    pub fn disk(&self, id: DiskId) -> Option<&DiskInfo> {
        self.index_of(id).map(|i| &self.disks[i])
    }

    /// All disks in registry order
    pub fn iter(&self) -> impl Iterator<Item = &DiskInfo> {
        self.disks.iter()
    }

    /// Mask of disks registered as disabled
    #[must_use]
    pub fn initial_mask(&self) -> DiskMask {
        let mut mask = DiskMask::new(self.len());
        for (i, disk) in self.disks.iter().enumerate() {
            if !disk.enabled {
                mask.set(i);
            }
        }
        mask
    }

    /// Fingerprint of the registry composition.
    ///
    /// Covers the ordered disk ids only, so enabling or disabling a disk does
    /// not change it, while adding, removing or reordering disks does.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = xxhash_rust::xxh64::Xxh64::new(0);
        for disk in &self.disks {
            hasher.update(&disk.id.get().to_le_bytes());
        }
        hasher.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = DiskRegistry::from_ids([10, 11, 12]).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.index_of(DiskId::new(11)), Some(1));
        assert_eq!(registry.get(2).unwrap().id, DiskId::new(12));
        assert!(registry.disk(DiskId::new(99)).is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = DiskRegistry::from_ids([1, 2, 1]).unwrap_err();
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn test_initial_mask_tracks_disabled_disks() {
        let registry = DiskRegistry::new(vec![
            DiskInfo::new(DiskId::new(0), "/d0"),
            DiskInfo::new(DiskId::new(1), "/d1").disabled(),
        ])
        .unwrap();

        let mask = registry.initial_mask();
        assert!(!mask.contains(0));
        assert!(mask.contains(1));
    }

    #[test]
    fn test_fingerprint_follows_composition() {
        let a = DiskRegistry::from_ids([0, 1, 2]).unwrap();
        let b = DiskRegistry::from_ids([0, 1, 2]).unwrap();
        let c = DiskRegistry::from_ids([0, 1, 2, 3]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}

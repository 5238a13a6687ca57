//! Disk mask: registry indices excluded from placement

use serde::{Deserialize, Serialize};

/// Bitmap over registry indices.
///
/// A set bit means the disk is excluded (failed or disabled). Indices at or
/// beyond `len` read as excluded, so a stale mask never admits an unknown disk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskMask {
    bits: Vec<u8>,
    len: usize,
}

impl DiskMask {
    /// Create an empty mask (nothing excluded) for `len` disks
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Create a mask excluding the given indices
    #[must_use]
    pub fn with_excluded(len: usize, excluded: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::new(len);
        for index in excluded {
            mask.set(index);
        }
        mask
    }

    /// Number of disks covered by the mask
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is excluded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    /// Exclude a disk. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Re-admit a disk
    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.bits[index / 8] &= !(1 << (index % 8));
        }
    }

    /// Whether a disk is excluded
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return true;
        }
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Number of excluded disks
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of disks still available for placement
    #[must_use]
    pub fn available(&self) -> usize {
        self.len - self.count()
    }

    /// Excluded indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|i| self.contains(*i))
    }
}

//! Layout: ordered disk assignment for one stripe

use hivestore_common::{DiskId, LayoutMapId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a fragment slot within a stripe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentRole {
    /// Data fragment
    Data,
    /// Parity fragment
    Parity,
}

/// A slot whose disk differs between two layouts of the same map id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    /// Fragment slot
    pub slot: usize,
    /// Disk in the layout the diff was taken from
    pub from: DiskId,
    /// Disk in the other layout
    pub to: DiskId,
}

/// Ordered disk assignment for one stripe.
///
/// Slot 0 is the first data fragment, slot `N + M - 1` the last parity
/// fragment. Entries are pairwise distinct.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    map_id: LayoutMapId,
    data_fragments: u8,
    disks: Vec<DiskId>,
}

impl Layout {
    pub(crate) fn new(map_id: LayoutMapId, data_fragments: u8, disks: Vec<DiskId>) -> Self {
        debug_assert!(disks.len() >= data_fragments as usize);
        Self {
            map_id,
            data_fragments,
            disks,
        }
    }

    /// Map id this layout was computed for
    #[must_use]
    pub fn map_id(&self) -> LayoutMapId {
        self.map_id
    }

    /// Number of slots (N + M)
    #[must_use]
    pub fn len(&self) -> usize {
        self.disks.len()
    }

    /// Whether the layout has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Disks in slot order
    #[must_use]
    pub fn disks(&self) -> &[DiskId] {
        &self.disks
    }

    /// Disk holding a slot
    #[must_use]
    pub fn disk(&self, slot: usize) -> Option<DiskId> {
        self.disks.get(slot).copied()
    }

    /// Slot held by a disk
    #[must_use]
    pub fn slot_of(&self, disk: DiskId) -> Option<usize> {
        self.disks.iter().position(|d| *d == disk)
    }

    /// Whether a disk holds any slot
    #[must_use]
    pub fn contains(&self, disk: DiskId) -> bool {
        self.disks.contains(&disk)
    }

    /// Role of a slot
    #[must_use]
    pub fn role(&self, slot: usize) -> Option<FragmentRole> {
        if slot >= self.disks.len() {
            None
        } else if slot < self.data_fragments as usize {
            Some(FragmentRole::Data)
        } else {
            Some(FragmentRole::Parity)
        }
    }

    /// Disks holding data fragments
    #[must_use]
    pub fn data_disks(&self) -> &[DiskId] {
        &self.disks[..self.data_fragments as usize]
    }

    /// Disks holding parity fragments
    #[must_use]
    pub fn parity_disks(&self) -> &[DiskId] {
        &self.disks[self.data_fragments as usize..]
    }

    /// Slots whose disk differs in `other`.
    ///
    /// Used by resilvering to find the fragments that have to move when a
    /// layout is recomputed.
    #[must_use]
    pub fn diff(&self, other: &Self) -> Vec<SlotChange> {
        self.disks
            .iter()
            .zip(other.disks.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(slot, (from, to))| SlotChange {
                slot,
                from: *from,
                to: *to,
            })
            .collect()
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.map_id)?;
        for (slot, disk) in self.disks.iter().enumerate() {
            if slot > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", disk.get())?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(ids: &[u32]) -> Layout {
        Layout::new(
            LayoutMapId::new(7),
            2,
            ids.iter().copied().map(DiskId::new).collect(),
        )
    }

    #[test]
    fn test_roles_and_slots() {
        let l = layout(&[4, 1, 3]);

        assert_eq!(l.role(0), Some(FragmentRole::Data));
        assert_eq!(l.role(2), Some(FragmentRole::Parity));
        assert_eq!(l.role(3), None);
        assert_eq!(l.slot_of(DiskId::new(3)), Some(2));
        assert_eq!(l.data_disks(), &[DiskId::new(4), DiskId::new(1)]);
        assert_eq!(l.parity_disks(), &[DiskId::new(3)]);
        assert_eq!(l.to_string(), "map-7 [4 1 3]");
    }

    #[test]
    fn test_diff() {
        let a = layout(&[4, 1, 3]);
        let b = layout(&[4, 2, 3]);

        assert_eq!(
            a.diff(&b),
            vec![SlotChange {
                slot: 1,
                from: DiskId::new(1),
                to: DiskId::new(2)
            }]
        );
        assert!(a.diff(&a).is_empty());
    }
}

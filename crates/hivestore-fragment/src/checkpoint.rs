//! Write checkpoints for transient fragments
//!
//! A checkpoint captures how far a writer got (the offset where appends
//! resume) together with the bytes it had buffered but not yet written.
//! Checkpoints alternate between two slots; a save always overwrites the slot
//! that does not hold the newest valid checkpoint, so an interrupted save
//! can only lose itself, never the checkpoint before it.

use crate::record;
use hivestore_common::{DiskId, FragmentHandle, ObjectId, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Checkpoint file magic ("WCKP")
const CHECKPOINT_MAGIC: u32 = 0x5743_4B50;

/// Number of alternating checkpoint slots per fragment
pub const CHECKPOINT_SLOTS: usize = 2;

/// Snapshot of in-flight write progress for one transient fragment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCheckpoint {
    pub disk: DiskId,
    pub object_id: ObjectId,
    pub fragment: u8,
    /// Fingerprint of the disk population when the checkpoint was taken
    pub topology_epoch: u64,
    /// Monotonic per fragment; the newest valid slot wins on restore
    pub sequence: u64,
    /// Fragment offset where appends resume
    pub resume_offset: u64,
    /// Caller bytes buffered but not yet written to the fragment
    pub pending: Vec<u8>,
}

impl WriteCheckpoint {
    /// Whether the checkpoint was taken for `handle`
    #[must_use]
    pub fn belongs_to(&self, handle: &FragmentHandle) -> bool {
        self.disk == handle.disk
            && self.object_id == handle.object_id
            && self.fragment == handle.fragment
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        record::encode(CHECKPOINT_MAGIC, self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        record::decode(CHECKPOINT_MAGIC, data)
    }
}

/// Slot a save should write given the newest existing checkpoint
#[must_use]
pub fn next_slot(newest: Option<&(usize, WriteCheckpoint)>) -> usize {
    match newest {
        Some((slot, _)) => (slot + 1) % CHECKPOINT_SLOTS,
        None => 0,
    }
}

/// Valid checkpoints among raw slot contents, newest first.
///
/// Slots that fail to decode or belong to another fragment are skipped.
#[must_use]
pub fn by_recency(
    handle: &FragmentHandle,
    slots: impl IntoIterator<Item = (usize, Option<Vec<u8>>)>,
) -> Vec<(usize, WriteCheckpoint)> {
    let mut valid = Vec::with_capacity(CHECKPOINT_SLOTS);
    for (slot, raw) in slots {
        let Some(raw) = raw else { continue };
        match WriteCheckpoint::from_bytes(&raw) {
            Ok(c) if c.belongs_to(handle) => valid.push((slot, c)),
            Ok(_) => {
                warn!("Checkpoint slot {} of {} belongs to another fragment", slot, handle);
            }
            Err(e) => {
                warn!("Skipping unreadable checkpoint slot {} of {}: {}", slot, handle, e);
            }
        }
    }
    valid.sort_by(|(_, a), (_, b)| b.sequence.cmp(&a.sequence));
    valid
}

/// Newest valid checkpoint among raw slot contents
#[must_use]
pub fn newest(
    handle: &FragmentHandle,
    slots: impl IntoIterator<Item = (usize, Option<Vec<u8>>)>,
) -> Option<(usize, WriteCheckpoint)> {
    by_recency(handle, slots).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(handle: &FragmentHandle, sequence: u64) -> WriteCheckpoint {
        WriteCheckpoint {
            disk: handle.disk,
            object_id: handle.object_id,
            fragment: handle.fragment,
            topology_epoch: 1,
            sequence,
            resume_offset: sequence * 10,
            pending: vec![sequence as u8; 4],
        }
    }

    #[test]
    fn test_newest_prefers_higher_sequence() {
        let handle = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 1);
        let a = checkpoint(&handle, 4).to_bytes().unwrap();
        let b = checkpoint(&handle, 5).to_bytes().unwrap();

        let (slot, newest_cp) = newest(&handle, [(0, Some(a)), (1, Some(b))]).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(newest_cp.sequence, 5);
        assert_eq!(next_slot(Some(&(slot, newest_cp))), 0);
    }

    #[test]
    fn test_torn_slot_falls_back_to_older() {
        let handle = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 1);
        let good = checkpoint(&handle, 2).to_bytes().unwrap();
        let mut torn = checkpoint(&handle, 3).to_bytes().unwrap();
        torn.truncate(torn.len() / 2);

        let (slot, cp) = newest(&handle, [(0, Some(good)), (1, Some(torn))]).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(cp.sequence, 2);
    }

    #[test]
    fn test_foreign_checkpoint_ignored() {
        let handle = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 1);
        let other = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 1);
        let raw = checkpoint(&other, 9).to_bytes().unwrap();

        assert!(newest(&handle, [(0, Some(raw)), (1, None)]).is_none());
        assert_eq!(next_slot(None), 0);
    }

    #[test]
    fn test_by_recency_orders_newest_first() {
        let handle = FragmentHandle::new(DiskId::new(0), ObjectId::new(), 1);
        let older = checkpoint(&handle, 6).to_bytes().unwrap();
        let newer = checkpoint(&handle, 7).to_bytes().unwrap();

        let ordered = by_recency(&handle, [(0, Some(newer)), (1, Some(older))]);
        let sequences: Vec<_> = ordered.iter().map(|(slot, c)| (*slot, c.sequence)).collect();
        assert_eq!(sequences, vec![(0, 7), (1, 6)]);
    }
}

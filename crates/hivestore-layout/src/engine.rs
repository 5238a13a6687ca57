//! Layout engine: deterministic, distinct-disk stripe placement
//!
//! A layout is drawn from a ChaCha8 stream seeded with the map id alone, so
//! every node holding the same disk registry computes the same placement
//! without exchanging a message. Indices are drawn one at a time over the
//! registry; a draw that repeats a disk already chosen for the stripe is
//! rejected and redrawn. Draw order is slot order.

use crate::layout::Layout;
use crate::mask::DiskMask;
use crate::registry::DiskRegistry;
use hivestore_common::{ErasureConfig, Error, LayoutMapId, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// Placement engine bound to one disk population
pub struct LayoutEngine<'a> {
    registry: &'a DiskRegistry,
    erasure: ErasureConfig,
}

impl<'a> LayoutEngine<'a> {
    /// Create an engine for a registry.
    ///
    /// Fails when the stripe is wider than the disk population: no distinct
    /// assignment exists, so this is a startup error rather than a per-call one.
    pub fn new(registry: &'a DiskRegistry, erasure: ErasureConfig) -> Result<Self> {
        let required = erasure.stripe_width();
        if required == 0 {
            return Err(Error::configuration("stripe width must be non-zero"));
        }
        if required > registry.len() {
            return Err(Error::InsufficientDisks {
                available: registry.len(),
                required,
            });
        }
        if u32::try_from(registry.len()).is_err() {
            return Err(Error::configuration("disk registry too large"));
        }
        Ok(Self { registry, erasure })
    }

    /// Erasure geometry of the layouts this engine produces
    #[must_use]
    pub fn erasure(&self) -> ErasureConfig {
        self.erasure
    }

    /// Compute the layout for a map id
    #[must_use]
    pub fn compute(&self, map_id: LayoutMapId) -> Layout {
        let mut rng = Self::stream(map_id);
        let indices = self.draw_distinct(&mut rng);
        self.to_layout(map_id, &indices)
    }

    /// Compute a replacement layout that avoids masked disks.
    ///
    /// Slots whose disk is not masked keep it, so surviving fragments stay
    /// where they are. Each masked slot is refilled from the continuation of
    /// the same seeded stream, skipping masked disks and disks that already
    /// hold a slot of the stripe.
    pub fn compute_recovery(&self, map_id: LayoutMapId, mask: &DiskMask) -> Result<Layout> {
        if mask.len() != self.registry.len() {
            return Err(Error::configuration(format!(
                "disk mask covers {} disks, registry has {}",
                mask.len(),
                self.registry.len()
            )));
        }

        let required = self.erasure.stripe_width();
        let available = mask.available();
        if available < required {
            return Err(Error::InsufficientDisks {
                available,
                required,
            });
        }

        let mut rng = Self::stream(map_id);
        let mut indices = self.draw_distinct(&mut rng);
        let mut used: HashSet<usize> = indices
            .iter()
            .copied()
            .filter(|i| !mask.contains(*i))
            .collect();

        for slot in 0..indices.len() {
            if !mask.contains(indices[slot]) {
                continue;
            }
            // Terminates: fewer than `required` unmasked disks are in use and
            // at least `required` exist.
            let replacement = loop {
                let candidate = self.draw_index(&mut rng);
                if !mask.contains(candidate) && !used.contains(&candidate) {
                    break candidate;
                }
            };
            used.insert(replacement);
            indices[slot] = replacement;
        }

        Ok(self.to_layout(map_id, &indices))
    }

    fn stream(map_id: LayoutMapId) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(map_id.seed())
    }

    fn draw_index(&self, rng: &mut ChaCha8Rng) -> usize {
        // Sample over u32 so the stream is identical on 32 and 64-bit hosts.
        let count = self.registry.len() as u32;
        rng.gen_range(0..count) as usize
    }

    fn draw_distinct(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let width = self.erasure.stripe_width();
        let mut chosen = Vec::with_capacity(width);
        while chosen.len() < width {
            let candidate = self.draw_index(rng);
            if !chosen.contains(&candidate) {
                chosen.push(candidate);
            }
        }
        chosen
    }

    fn to_layout(&self, map_id: LayoutMapId, indices: &[usize]) -> Layout {
        let disks = indices
            .iter()
            .filter_map(|i| self.registry.get(*i).map(|d| d.id))
            .collect();
        Layout::new(map_id, self.erasure.data_fragments, disks)
    }
}

/// Compute the layout for a map id over a registry.
pub fn compute_layout(
    map_id: LayoutMapId,
    registry: &DiskRegistry,
    erasure: ErasureConfig,
) -> Result<Layout> {
    Ok(LayoutEngine::new(registry, erasure)?.compute(map_id))
}

/// Compute a recovery layout for a map id, avoiding masked disks.
pub fn compute_recovery_layout(
    map_id: LayoutMapId,
    registry: &DiskRegistry,
    erasure: ErasureConfig,
    mask: &DiskMask,
) -> Result<Layout> {
    LayoutEngine::new(registry, erasure)?.compute_recovery(map_id, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivestore_common::DiskId;

    fn registry(n: u32) -> DiskRegistry {
        DiskRegistry::from_ids(0..n).unwrap()
    }

    #[test]
    fn test_deterministic_placement() {
        let reg = registry(16);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_5_2).unwrap();

        for id in 0..200 {
            let map_id = LayoutMapId::new(id);
            assert_eq!(engine.compute(map_id), engine.compute(map_id));
        }
    }

    #[test]
    fn test_layout_distinct_and_full_width() {
        let reg = registry(9);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_5_2).unwrap();

        for id in 0..500 {
            let layout = engine.compute(LayoutMapId::new(id));
            assert_eq!(layout.len(), 7);
            let unique: HashSet<_> = layout.disks().iter().collect();
            assert_eq!(unique.len(), 7, "duplicate disk in {layout}");
        }
    }

    #[test]
    fn test_full_width_uses_every_disk() {
        let reg = registry(3);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_2_1).unwrap();
        let layout = engine.compute(LayoutMapId::new(5));

        let mut disks = layout.disks().to_vec();
        disks.sort();
        assert_eq!(disks, vec![DiskId::new(0), DiskId::new(1), DiskId::new(2)]);
    }

    #[test]
    fn test_stripe_wider_than_disks_is_fatal() {
        let reg = registry(4);
        let err = LayoutEngine::new(&reg, ErasureConfig::EC_5_2).err().unwrap();
        assert!(matches!(
            err,
            Error::InsufficientDisks {
                available: 4,
                required: 7
            }
        ));
    }

    #[test]
    fn test_recovery_avoids_mask_and_keeps_survivors() {
        let reg = registry(10);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_4_2).unwrap();

        for id in 0..300 {
            let map_id = LayoutMapId::new(id);
            let base = engine.compute(map_id);
            let failed = reg.index_of(base.disks()[1]).unwrap();
            let mask = DiskMask::with_excluded(10, [failed, 9]);

            let recovered = engine.compute_recovery(map_id, &mask).unwrap();
            assert_eq!(recovered.len(), base.len());
            for (slot, disk) in recovered.disks().iter().enumerate() {
                let index = reg.index_of(*disk).unwrap();
                assert!(!mask.contains(index));
                if !mask.contains(reg.index_of(base.disks()[slot]).unwrap()) {
                    assert_eq!(*disk, base.disks()[slot]);
                }
            }
            let unique: HashSet<_> = recovered.disks().iter().collect();
            assert_eq!(unique.len(), recovered.len());
        }
    }

    #[test]
    fn test_recovery_with_empty_mask_matches_base() {
        let reg = registry(8);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_4_2).unwrap();
        let map_id = LayoutMapId::new(77);

        let recovered = engine.compute_recovery(map_id, &DiskMask::new(8)).unwrap();
        assert_eq!(recovered, engine.compute(map_id));
    }

    #[test]
    fn test_recovery_insufficient_disks() {
        let reg = registry(7);
        let engine = LayoutEngine::new(&reg, ErasureConfig::EC_5_2).unwrap();
        let mask = DiskMask::with_excluded(7, [3]);

        let err = engine
            .compute_recovery(LayoutMapId::new(1), &mask)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientDisks { available: 6, .. }));
    }
}

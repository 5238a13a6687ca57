//! Core type definitions for HiveStore
//!
//! Identifiers shared by the layout engine and the fragment store, plus the
//! erasure geometry that fixes the width of a stripe.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an object (or one chunk of a multi-chunk object)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a new random object ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Stable numeric identity of a physical disk
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, From, Into, Display,
)]
#[display("disk-{_0}")]
pub struct DiskId(u32);

impl DiskId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Key selecting one deterministic stripe-to-disk assignment
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, From, Into, Display,
)]
#[display("map-{_0}")]
pub struct LayoutMapId(u32);

impl LayoutMapId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Seed for the placement generator. A pure function of the id.
    #[must_use]
    pub const fn seed(self) -> u64 {
        self.0 as u64
    }
}

/// Identity of one physical fragment: the disk it lives on, the object it
/// belongs to, and its slot number in the stripe.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentHandle {
    pub disk: DiskId,
    pub object_id: ObjectId,
    pub fragment: u8,
}

impl FragmentHandle {
    #[must_use]
    pub const fn new(disk: DiskId, object_id: ObjectId, fragment: u8) -> Self {
        Self {
            disk,
            object_id,
            fragment,
        }
    }

    /// File-name stem shared by the fragment and its companion files
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.object_id, self.fragment)
    }
}

impl fmt::Debug for FragmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentHandle({self})")
    }
}

impl fmt::Display for FragmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.object_id, self.fragment, self.disk)
    }
}

/// Erasure geometry: N data fragments plus M parity fragments per stripe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data fragments (N)
    pub data_fragments: u8,
    /// Number of parity fragments (M)
    pub parity_fragments: u8,
}

impl ErasureConfig {
    /// 5 data + 2 parity
    pub const EC_5_2: Self = Self::new(5, 2);
    /// 4 data + 2 parity
    pub const EC_4_2: Self = Self::new(4, 2);
    /// 2 data + 1 parity
    pub const EC_2_1: Self = Self::new(2, 1);

    #[must_use]
    pub const fn new(data_fragments: u8, parity_fragments: u8) -> Self {
        Self {
            data_fragments,
            parity_fragments,
        }
    }

    /// Number of fragments in one stripe (N + M)
    #[must_use]
    pub const fn stripe_width(&self) -> usize {
        self.data_fragments as usize + self.parity_fragments as usize
    }

    /// Whether a fragment slot carries data (as opposed to parity)
    #[must_use]
    pub const fn is_data_slot(&self, slot: usize) -> bool {
        slot < self.data_fragments as usize
    }
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self::EC_5_2
    }
}

impl fmt::Display for ErasureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.data_fragments, self.parity_fragments)
    }
}

//! HiveStore Layout - deterministic fragment placement
//!
//! This crate maps a layout map id to an ordered list of distinct disks, one
//! per fragment slot of an N+M stripe.
//!
//! # Components
//!
//! - [`DiskRegistry`]: the disk population, explicitly constructed and passed
//!   by reference (no global state, so several directories can coexist)
//! - [`LayoutEngine`]: seeded rejection sampling over the registry
//! - [`LayoutDirectory`]: one precomputed [`Layout`] per map id, map id
//!   allocation, and the disabled-disk mask used by recovery placement
//!
//! # Example
//! ```ignore
//! use hivestore_layout::{DiskRegistry, LayoutDirectory};
//!
//! let registry = Arc::new(DiskRegistry::from_ids(0..16)?);
//! let directory = LayoutDirectory::initialize(registry, &config.layout)?;
//! let map_id = directory.allocate_new_map_id();
//! let layout = directory.layout_for_store(map_id)?;
//! ```

pub mod directory;
pub mod engine;
pub mod layout;
pub mod mask;
pub mod registry;

pub use directory::LayoutDirectory;
pub use engine::{LayoutEngine, compute_layout, compute_recovery_layout};
pub use layout::{FragmentRole, Layout, SlotChange};
pub use mask::DiskMask;
pub use registry::{DiskInfo, DiskRegistry};

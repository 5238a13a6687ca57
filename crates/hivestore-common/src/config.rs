//! Configuration types for HiveStore
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default` so a partial TOML file is enough.

use crate::types::{DiskId, ErasureConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of layout map ids when not configured
pub const DEFAULT_NUM_MAP_IDS: u32 = 10_000;

/// Root configuration for HiveStore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Placement configuration
    pub layout: LayoutConfig,
    /// Fragment store configuration
    pub fragments: FragmentConfig,
    /// Disks known to this node
    pub disks: Vec<DiskConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Disk ids in configuration order
    pub fn disk_ids(&self) -> impl Iterator<Item = DiskId> + '_ {
        self.disks.iter().map(|d| DiskId::new(d.id))
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "hivestore-node".to_string(),
        }
    }
}

/// Placement configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Erasure geometry; its stripe width is the layout length
    pub erasure: ErasureConfig,
    /// Size of the map id space
    pub num_map_ids: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            erasure: ErasureConfig::default(),
            num_map_ids: DEFAULT_NUM_MAP_IDS,
        }
    }
}

/// Fragment store configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Storage backend, chosen once at startup
    pub backend: BackendKind,
    /// When fragment data is forced to stable storage
    pub sync_mode: SyncMode,
}

/// Fragment storage backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One directory tree per disk
    #[default]
    File,
    /// In-process maps (tests, ephemeral nodes)
    Memory,
}

impl BackendKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" | "fs" => Ok(Self::File),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!("unknown fragment backend: {s}")),
        }
    }
}

/// Fragment data synchronization mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync after every write (safest, slowest)
    Always,
    /// Sync only on commit (balanced)
    #[default]
    OnCommit,
    /// Never sync explicitly (tests, scratch disks)
    Never,
}

/// Configuration for a single disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Stable disk identity
    pub id: u32,
    /// Root directory of the disk's fragment tree
    pub path: PathBuf,
    /// Whether the disk starts enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

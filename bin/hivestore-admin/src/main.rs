//! HiveStore Admin - local operator tool
//!
//! Loads the node configuration, rebuilds the disk registry and layout
//! directory from it, and answers placement questions or tidies local
//! fragment storage.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hivestore_common::{Config, DiskId, ErasureConfig, LayoutMapId};
use hivestore_fragment::FragmentStore;
use hivestore_layout::{DiskMask, DiskRegistry, LayoutDirectory};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hivestore-admin")]
#[command(about = "HiveStore placement and fragment storage tool")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/hivestore/hivestore.toml")]
    config: String,

    /// Log level (overrides the configuration file)
    #[arg(long)]
    log_level: Option<String>,

    /// Number of data fragments per stripe
    #[arg(long)]
    data_fragments: Option<u8>,

    /// Number of parity fragments per stripe
    #[arg(long)]
    parity_fragments: Option<u8>,

    /// Size of the layout map id space
    #[arg(long)]
    num_map_ids: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the layout of one or more map ids
    Layout {
        /// Map ids to print
        #[arg(required = true)]
        map_ids: Vec<u32>,
    },
    /// Allocate a random map id for a new object
    Allocate,
    /// Verify every layout and show how fragments spread over disks
    Check,
    /// Print the replacement layout with some disks excluded
    Recover {
        /// Map id to recover
        map_id: u32,
        /// Disks to exclude (defaults to the disks disabled in the config)
        #[arg(long = "exclude")]
        exclude: Vec<u32>,
    },
    /// List map ids that place a fragment on a disk
    DiskMaps {
        /// Disk id
        disk: u32,
    },
    /// Remove write checkpoints whose fragment is no longer transient
    Sweep {
        /// Only sweep this disk
        #[arg(long)]
        disk: Option<u32>,
    },
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        eprintln!("Warning: config file {path} not found, using defaults");
        return Ok(Config::default());
    }
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("failed to parse {path}"))
}

/// Apply command-line overrides on top of the file configuration
fn apply_overrides(config: &mut Config, args: &Args) {
    let erasure = config.layout.erasure;
    config.layout.erasure = ErasureConfig::new(
        args.data_fragments.unwrap_or(erasure.data_fragments),
        args.parity_fragments.unwrap_or(erasure.parity_fragments),
    );
    if let Some(n) = args.num_map_ids {
        config.layout.num_map_ids = n;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
}

fn build_directory(config: &Config) -> Result<LayoutDirectory> {
    if config.disks.is_empty() {
        bail!("no disks configured");
    }
    let registry = Arc::new(DiskRegistry::from_config(&config.disks)?);
    let directory = LayoutDirectory::initialize(registry, &config.layout)?;
    Ok(directory)
}

fn print_layouts(directory: &LayoutDirectory, map_ids: &[u32]) -> Result<()> {
    let erasure = directory.erasure();
    for &id in map_ids {
        let layout = directory.layout_for_store(LayoutMapId::new(id))?;
        println!("{layout}");
        for (slot, disk) in layout.disks().iter().enumerate() {
            let role = if erasure.is_data_slot(slot) { "data" } else { "parity" };
            let path = directory
                .registry()
                .disk(*disk)
                .map(|d| d.path.display().to_string())
                .unwrap_or_default();
            println!("  slot {slot:>2}  {disk:<10} {role:<6} {path}");
        }
    }
    Ok(())
}

fn check(directory: &LayoutDirectory) -> Result<()> {
    let width = directory.erasure().stripe_width();
    let mut load: BTreeMap<DiskId, usize> = directory.registry().iter().map(|d| (d.id, 0)).collect();

    for id in 0..directory.num_map_ids() {
        let layout = directory.layout_for_store(LayoutMapId::new(id))?;
        if layout.len() != width {
            bail!("{} has {} slots, expected {}", layout, layout.len(), width);
        }
        for disk in layout.disks() {
            *load.entry(*disk).or_default() += 1;
        }
        let distinct: HashSet<_> = layout.disks().iter().collect();
        if distinct.len() != width {
            bail!("{} places two fragments on one disk", layout);
        }
    }

    println!("Layout check");
    println!("============");
    println!("Map ids:  {}", directory.num_map_ids());
    println!("Stripe:   {}", directory.erasure());
    println!("Epoch:    {:016x}", directory.topology_epoch());
    println!();
    let expected = directory.num_map_ids() as usize * width / load.len().max(1);
    for (disk, slots) in &load {
        println!("  {disk:<10} {slots:>8} slots (expected ~{expected})");
    }
    println!("OK");
    Ok(())
}

fn recover(directory: &LayoutDirectory, map_id: u32, exclude: &[u32]) -> Result<()> {
    let map_id = LayoutMapId::new(map_id);
    let mask = if exclude.is_empty() {
        directory.disabled_mask()
    } else {
        let registry = directory.registry();
        let mut indices = Vec::with_capacity(exclude.len());
        for &id in exclude {
            let disk = DiskId::new(id);
            let index = registry
                .index_of(disk)
                .with_context(|| format!("unknown disk {disk}"))?;
            indices.push(index);
        }
        DiskMask::with_excluded(registry.len(), indices)
    };

    let original = directory.layout_for_store(map_id)?;
    let recovery = directory.layout_for_recovery(map_id, &mask)?;
    println!("original: {original}");
    println!("recovery: {recovery}");
    for change in original.diff(&recovery) {
        println!("  slot {:>2}: {} -> {}", change.slot, change.from, change.to);
    }
    Ok(())
}

fn sweep(config: &Config, directory: &LayoutDirectory, only: Option<u32>) -> Result<()> {
    let disks: Vec<_> = config
        .disks
        .iter()
        .map(|d| (DiskId::new(d.id), d.path.clone()))
        .collect();
    let store =
        FragmentStore::from_config(&config.fragments, &disks, directory.topology_epoch())?;

    let targets: Vec<DiskId> = match only {
        Some(id) => vec![DiskId::new(id)],
        None => config.disk_ids().collect(),
    };
    let mut removed = 0;
    for disk in targets {
        let report = store.sweep_stale_checkpoints(disk)?;
        println!(
            "{disk:<10} examined {:>6}  removed {:>6}",
            report.examined, report.removed
        );
        removed += report.removed;
    }
    info!("Removed {} stale checkpoints", removed);
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file, CLI takes precedence
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Node: {}", config.node.name);
    info!("Config file: {}", args.config);

    let directory = build_directory(&config)?;

    match args.command {
        Commands::Layout { map_ids } => print_layouts(&directory, &map_ids)?,
        Commands::Allocate => println!("{}", directory.allocate_new_map_id().get()),
        Commands::Check => check(&directory)?,
        Commands::Recover { map_id, exclude } => recover(&directory, map_id, &exclude)?,
        Commands::DiskMaps { disk } => {
            let map_ids = directory.map_ids_on_disk(DiskId::new(disk))?;
            println!("{} map ids place a fragment on disk-{disk}", map_ids.len());
            for chunk in map_ids.chunks(16) {
                let line: Vec<String> = chunk.iter().map(|m| m.get().to_string()).collect();
                println!("  {}", line.join(" "));
            }
        }
        Commands::Sweep { disk } => sweep(&config, &directory, disk)?,
    }

    Ok(())
}

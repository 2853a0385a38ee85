//! basemap-reimport: CLI driver for reimport parameter experimentation and
//! diagnostics.
//!
//! Loads a network and a survey snapshot from JSON files, runs one
//! reimport against them with the in-memory collaborators and prints the
//! run statistics. Useful for:
//!
//! - Tuning snapping, drift and split tolerances on real extracts
//! - Checking how the partition grid size affects deletions near borders
//! - Inspecting the change events a run would publish
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin basemap-reimport -- [OPTIONS] <NETWORK> <SNAPSHOT>
//! ```
//!
//! `NETWORK` is a `{"nodes": [...], "edges": [...]}` document and
//! `SNAPSHOT` a JSON array of imported features. Set `RUST_LOG` (for
//! example `RUST_LOG=basemap_reconcile=debug`) to see per-edge decisions.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod mapper;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use basemap_reconcile::memory::{MemoryFeatureSource, MemoryMappings, MemoryNetwork};
use basemap_reconcile::{Collaborators, ImportedFeature, ReconcileConfig, Reimport, ReimportEvent};
use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::mapper::RawKeyMapper;

/// Run one base-map reimport against JSON files.
///
/// Reconciles the network in NETWORK against the features in SNAPSHOT and
/// prints classification, topology and anomaly counts.
#[derive(Parser)]
#[command(name = "basemap-reimport", version)]
struct Cli {
    /// Path to the persisted network (JSON).
    network_path: PathBuf,

    /// Path to the survey snapshot (JSON array of features).
    snapshot_path: PathBuf,

    /// Edge length of the square partition grid. Zero or less reads the
    /// whole snapshot as one partition.
    #[arg(long, default_value_t = 1000.0)]
    partition_size: f64,

    /// Radius within which a coordinate reuses an existing node.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_SNAP_TOLERANCE)]
    snap_tolerance: f64,

    /// Margin added around each partition when loading edges.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_MAX_EDGE_DISPLACEMENT)]
    max_edge_displacement: f64,

    /// Hausdorff bound for minor drift.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_DRIFT_TOLERANCE)]
    drift_tolerance: f64,

    /// Orthogonal tolerance when moving layer boundaries onto new geometry.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_REPROJECTION_TOLERANCE)]
    reprojection_tolerance: f64,

    /// Endpoint shift beyond which an edge's layers are reset.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_EXTREME_SHIFT)]
    extreme_shift: f64,

    /// Hausdorff distance that marks an edge as strongly altered.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_STRONG_CHANGE_DISTANCE)]
    strong_change_distance: f64,

    /// Tolerance when matching a split chain against the old geometry.
    #[arg(long, default_value_t = ReconcileConfig::DEFAULT_SPLIT_TOLERANCE)]
    split_tolerance: f64,

    /// Maximum number of partner edges followed during split detection.
    #[arg(
        long,
        default_value_t = ReconcileConfig::DEFAULT_MAX_SPLIT_HOPS,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    max_split_hops: usize,

    /// Full reconcile config as a JSON string.
    ///
    /// When provided, all other tolerance flags are ignored. Missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Write the reconciled network to this file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the published events to this file.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Output statistics as JSON instead of the human-readable report.
    #[arg(long)]
    json: bool,
}

/// Build a [`ReconcileConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual tolerance flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<ReconcileConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ReconcileConfig {
        snap_tolerance: cli.snap_tolerance,
        max_edge_displacement: cli.max_edge_displacement,
        drift_tolerance: cli.drift_tolerance,
        reprojection_tolerance: cli.reprojection_tolerance,
        extreme_shift: cli.extreme_shift,
        strong_change_distance: cli.strong_change_distance,
        split_tolerance: cli.split_tolerance,
        max_split_hops: cli.max_split_hops,
        ..ReconcileConfig::default()
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Error serializing {}: {e}", path.display()))?;
    std::fs::write(path, &json).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    eprintln!("Written {} ({} bytes)", path.display(), json.len());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let reimport = Reimport::new(config).map_err(|e| e.to_string())?;

    let mut network: MemoryNetwork = read_json(&cli.network_path)?;
    let features: Vec<ImportedFeature> = read_json(&cli.snapshot_path)?;
    info!(
        nodes = network.node_count(),
        edges = network.edge_count(),
        features = features.len(),
        "inputs loaded"
    );

    eprintln!(
        "Network: {} ({} nodes, {} edges)",
        cli.network_path.display(),
        network.node_count(),
        network.edge_count(),
    );
    eprintln!("Snapshot: {} ({} features)", cli.snapshot_path.display(), features.len());
    eprintln!("Config: {:#?}", reimport.config());
    eprintln!();

    let source = MemoryFeatureSource::grid(features, cli.partition_size);
    let mut mappings = MemoryMappings::new();
    let mut events: Vec<ReimportEvent> = Vec::new();

    let stats = reimport
        .run(Collaborators {
            source: &source,
            mapper: &RawKeyMapper,
            network: &mut network,
            mappings: &mut mappings,
            events: &mut events,
        })
        .map_err(|e| format!("Reimport error: {e}"))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|e| format!("Error serializing statistics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", stats.report());
    }

    if let Some(ref path) = cli.output {
        write_json(path, &network)?;
    }
    if let Some(ref path) = cli.events {
        write_json(path, &events)?;
    }
    Ok(())
}

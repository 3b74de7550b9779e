//! CLI entry point for p4-catalog
//!
//! Provides the catalog stages that need no external engine:
//! - Listing observations still to be processed
//! - Aggregating committed units into catalog tables
//! - Preparing observation metadata from an EDR index
//! - Merging the aggregated tables into the published catalog
//!
//! Clustering and fnotching engines are wired in through the library
//! (`CatalogProduction`).
//!
//! # Usage
//!
//! ```bash
//! p4-catalog --config catalog.toml todo
//! p4-catalog --config catalog.toml metadata --edr EDRCUMINDEX.csv
//! p4-catalog --config catalog.toml aggregate
//! p4-catalog --config catalog.toml merge
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use planet4_catalog::aggregate::aggregate_region;
use planet4_catalog::config::CatalogConfig;
use planet4_catalog::engine::CsvGroundProjector;
use planet4_catalog::layout::CatalogLayout;
use planet4_catalog::logging;
use planet4_catalog::merger::CatalogMerger;
use planet4_catalog::metadata::{prepare_metadata, write_metadata};
use planet4_catalog::production::{configured_obsids, resolve_obsids};
use planet4_catalog::table::Table;
use planet4_catalog::tracker::WorkUnitTracker;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "p4-catalog")]
#[command(about = "Planet Four catalog production", long_about = None)]
struct Cli {
    /// TOML configuration file (environment variables P4_CATALOG_* override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print observations whose output does not exist yet
    Todo,

    /// Concatenate committed unit outputs into the catalog tables
    Aggregate,

    /// Prepare the observation metadata table
    Metadata {
        /// EDR index table (CSV) covering the catalog's observations
        #[arg(long)]
        edr: PathBuf,
    },

    /// Merge aggregated tables with metadata and ground coordinates
    Merge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CatalogConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CatalogConfig::load()?,
    };
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Todo => todo(config).await,
        Commands::Aggregate => aggregate(config).await,
        Commands::Metadata { edr } => metadata(config, edr).await,
        Commands::Merge => merge(config).await,
    }
}

async fn todo(config: CatalogConfig) -> Result<()> {
    let pending = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let obsids = resolve_obsids(&config)?;
        let tracker = WorkUnitTracker::new(CatalogLayout::from_config(&config));
        Ok(tracker
            .pending(&obsids, config.overwrite)
            .into_iter()
            .map(|unit| unit.obsid)
            .collect())
    })
    .await??;

    for obsid in &pending {
        println!("{obsid}");
    }
    eprintln!("{} observations to process", pending.len());
    Ok(())
}

async fn aggregate(config: CatalogConfig) -> Result<()> {
    let summary = tokio::task::spawn_blocking(move || -> Result<_> {
        let obsids = resolve_obsids(&config)?;
        let layout = CatalogLayout::from_config(&config);
        let done = WorkUnitTracker::new(layout.clone()).completed(&obsids);
        Ok(aggregate_region(&layout, &done)?)
    })
    .await??;

    println!(
        "Aggregated {} units: {} fans, {} blotches",
        summary.units, summary.fans, summary.blotches
    );
    Ok(())
}

async fn metadata(config: CatalogConfig, edr: PathBuf) -> Result<()> {
    let rows = tokio::task::spawn_blocking(move || -> Result<usize> {
        let index = Table::read_csv(&edr).with_context(|| format!("reading {}", edr.display()))?;
        let obsids = configured_obsids(&config).context("resolving observations")?;
        let metadata = prepare_metadata(&index, obsids.as_deref())?;
        write_metadata(&CatalogLayout::from_config(&config), &metadata)?;
        Ok(metadata.len())
    })
    .await??;

    println!("Wrote metadata for {rows} observations");
    Ok(())
}

async fn merge(config: CatalogConfig) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || {
        let projector = Arc::new(CsvGroundProjector::new(CatalogLayout::from_config(&config)));
        CatalogMerger::from_config(&config, projector).merge()
    })
    .await??;

    for kind in &report.kinds {
        println!(
            "{}: {} published rows ({} dropped by joins) -> {}",
            kind.kind,
            kind.published_rows,
            kind.metadata_join.dropped + kind.ground_join.dropped,
            kind.output.display()
        );
    }
    Ok(())
}

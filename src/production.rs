//! The catalog production driver.
//!
//! One run walks the whole pipeline:
//!
//! 1. resolve the observation list (configured, or discovered from the latest
//!    dated marking database)
//! 2. select pending units with the [`WorkUnitTracker`]
//! 3. cluster every pending unit on the worker pool
//! 4. after the barrier, assign marking ids in one sequential pass
//! 5. write the clustered (L1A) files into each unit's staging directory
//! 6. fnotch, apply the cut, write the L1C files and commit each unit on the pool
//! 7. aggregate the committed units and run the [`CatalogMerger`]
//!
//! Unit failures are collected, not fatal. When any unit failed, the run stops
//! before aggregation and reports which obsids to resume; rerunning the driver
//! picks up exactly those units.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::{aggregate_region, AggregateSummary};
use crate::config::CatalogConfig;
use crate::engine::{write_markings, ClusterEngine, Fnotcher, GroundProjector};
use crate::error::{AppResult, CatalogError};
use crate::executor::{BatchOutcome, WorkerPool};
use crate::fnotch::MARKING_ID;
use crate::ids::{assign_marking_ids, MarkingId, MarkingIdAllocators, TileCandidates, UnitCandidates};
use crate::layout::{latest_file, CatalogLayout, ObsidWorkUnit, Stage};
use crate::markings::{MarkingGeometry, MarkingKind};
use crate::merger::{CatalogMerger, MergeReport};
use crate::table::Table;
use crate::tracker::WorkUnitTracker;

/// Column of the marking database naming the observation.
pub const IMAGE_NAME: &str = "image_name";

const STAGE_CLUSTERING: &str = "clustering";
const STAGE_STAGING: &str = "staging";
const STAGE_FNOTCHING: &str = "fnotching";

/// Rows kept for one committed unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitSummary {
    /// Fans kept after the cut.
    pub fans: usize,
    /// Blotches kept after the cut.
    pub blotches: usize,
    /// Fnotched rows removed by the vote-ratio cut.
    pub below_cut: usize,
}

/// What one production run did.
#[derive(Debug)]
pub struct ProductionReport {
    /// Observations known to the run.
    pub obsids: usize,
    /// Units processed by the run.
    pub pending: usize,
    /// Clustering batch result.
    pub clustering: BatchOutcome,
    /// Fnotching batch result.
    pub fnotching: BatchOutcome,
    /// Marking ids assigned.
    pub assigned_ids: usize,
    /// Units committed, with their row counts.
    pub committed: Vec<(String, UnitSummary)>,
    /// One entry per failed unit, each naming obsid and stage.
    pub failures: Vec<CatalogError>,
    /// Aggregation result, when the run got that far.
    pub aggregate: Option<AggregateSummary>,
    /// Merge result, when the run got that far.
    pub merge: Option<MergeReport>,
}

impl ProductionReport {
    /// Whether every pending unit was committed and the catalog was merged.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.merge.is_some()
    }

    /// Obsids to resume, sorted.
    pub fn failed_obsids(&self) -> Vec<String> {
        let mut obsids: Vec<String> = self
            .failures
            .iter()
            .filter_map(|e| e.obsid().map(str::to_string))
            .collect();
        obsids.sort();
        obsids.dedup();
        obsids
    }
}

/// Drives a production run with the given external engines.
pub struct CatalogProduction {
    config: CatalogConfig,
    layout: CatalogLayout,
    tracker: WorkUnitTracker,
    pool: WorkerPool,
    cluster_engine: Arc<dyn ClusterEngine>,
    fnotcher: Arc<dyn Fnotcher>,
    projector: Arc<dyn GroundProjector>,
}

impl CatalogProduction {
    /// Validates `config` and wires the components.
    pub fn new(
        config: CatalogConfig,
        cluster_engine: Arc<dyn ClusterEngine>,
        fnotcher: Arc<dyn Fnotcher>,
        projector: Arc<dyn GroundProjector>,
    ) -> AppResult<Self> {
        config.validate()?;
        let layout = CatalogLayout::from_config(&config);
        Ok(Self {
            tracker: WorkUnitTracker::new(layout.clone()),
            pool: WorkerPool::new(config.workers),
            layout,
            config,
            cluster_engine,
            fnotcher,
            projector,
        })
    }

    /// Layout of the configured catalog version.
    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    /// Configured observations, or the ones found in the latest marking database.
    pub fn resolve_obsids(&self) -> AppResult<Vec<String>> {
        resolve_obsids(&self.config)
    }

    /// Units still to be processed under the configured overwrite policy.
    pub fn pending_units(&self) -> AppResult<Vec<ObsidWorkUnit>> {
        Ok(self.tracker.pending(&self.resolve_obsids()?, self.config.overwrite))
    }

    /// Allocators for this run.
    ///
    /// Numbering continues after the highest id found in the clustered files of
    /// committed units, so resumed runs never reuse an id. With nothing
    /// committed it starts at `F000000`/`B000000`.
    pub fn allocators(&self) -> AppResult<MarkingIdAllocators> {
        let mut last: [Option<MarkingId>; 2] = [None, None];
        for unit_dir in self.layout.committed_unit_dirs()? {
            for (slot, kind) in MarkingKind::ALL.into_iter().enumerate() {
                for path in self.layout.stage_files(&unit_dir, Stage::Clustered, kind)? {
                    if let Some(id) = max_marking_id(&path, kind)? {
                        last[slot] = last[slot].max(Some(id));
                    }
                }
            }
        }
        let [fans, blotches] = last;
        if fans.is_some() || blotches.is_some() {
            info!(
                last_fan = ?fans.map(|id| id.to_string()),
                last_blotch = ?blotches.map(|id| id.to_string()),
                "continuing marking ids"
            );
        }
        Ok(MarkingIdAllocators::resuming(fans, blotches))
    }

    /// Runs every per-unit stage, then aggregation and merge.
    pub async fn run(&self) -> AppResult<ProductionReport> {
        let obsids = self.resolve_obsids()?;
        let pending = self.tracker.pending(&obsids, self.config.overwrite);
        info!(
            version = %self.config.version,
            obsids = obsids.len(),
            pending = pending.len(),
            "catalog production starting"
        );
        if self.config.overwrite {
            retire_units(&pending)?;
        }
        let mut allocators = self.allocators()?;

        let engine = Arc::clone(&self.cluster_engine);
        let clustering = self
            .pool
            .run(
                STAGE_CLUSTERING,
                pending.iter().cloned().map(|u| (u, ())).collect(),
                move |unit, ()| engine.cluster(unit),
            )
            .await;
        let clustering_outcome = clustering.outcome();
        let mut failures = clustering.failures;

        // Barrier passed: number everything in one sequential pass.
        let (units, mut candidates): (Vec<ObsidWorkUnit>, Vec<UnitCandidates>) = clustering
            .successes
            .into_iter()
            .map(|(unit, mut found)| {
                found.obsid = unit.obsid.clone();
                (unit, found)
            })
            .unzip();
        let assigned_ids = assign_marking_ids(&mut candidates, &mut allocators)?;
        info!(assigned_ids, units = units.len(), "assigned marking ids");

        let mut staged = Vec::with_capacity(units.len());
        for (unit, found) in units.into_iter().zip(candidates) {
            match stage_clustered(&self.layout, &unit, found) {
                Ok(tiles) => staged.push((unit, tiles)),
                Err(e) => {
                    warn!(obsid = %unit.obsid, stage = STAGE_STAGING, error = %e, "unit failed");
                    failures.push(CatalogError::unit_failure(&unit.obsid, STAGE_STAGING, e));
                }
            }
        }

        let fnotcher = Arc::clone(&self.fnotcher);
        let layout = self.layout.clone();
        let cut = self.config.cut;
        let fnotching = self
            .pool
            .run(STAGE_FNOTCHING, staged, move |unit, tiles: Vec<TileCandidates>| {
                finish_unit(&layout, fnotcher.as_ref(), cut, unit, &tiles)
            })
            .await;
        let fnotching_outcome = fnotching.outcome();
        failures.extend(fnotching.failures);
        let committed: Vec<(String, UnitSummary)> = fnotching
            .successes
            .into_iter()
            .map(|(unit, summary)| (unit.obsid, summary))
            .collect();

        let mut report = ProductionReport {
            obsids: obsids.len(),
            pending: pending.len(),
            clustering: clustering_outcome,
            fnotching: fnotching_outcome,
            assigned_ids,
            committed,
            failures,
            aggregate: None,
            merge: None,
        };
        if !report.failures.is_empty() {
            warn!(
                failed = ?report.failed_obsids(),
                "units failed; rerun to resume them before the catalog is merged"
            );
            return Ok(report);
        }

        report.aggregate = Some(self.aggregate(&obsids)?);
        report.merge = Some(self.merge()?);
        info!(version = %self.config.version, "catalog production finished");
        Ok(report)
    }

    /// Aggregates the committed units among `obsids`.
    pub fn aggregate(&self, obsids: &[String]) -> AppResult<AggregateSummary> {
        aggregate_region(&self.layout, &self.tracker.completed(obsids))
    }

    /// Merges the aggregated tables into the published catalog.
    pub fn merge(&self) -> AppResult<MergeReport> {
        CatalogMerger::from_config(&self.config, Arc::clone(&self.projector)).merge()
    }
}

/// Observations named by `config`, or discovered from its database directory.
pub fn resolve_obsids(config: &CatalogConfig) -> AppResult<Vec<String>> {
    match (&config.obsids, &config.database_dir) {
        (Some(obsids), _) => Ok(obsids.clone()),
        (None, Some(dir)) => discover_obsids(dir),
        (None, None) => Err(CatalogError::Configuration(
            "either obsids or database_dir must be configured".to_string(),
        )),
    }
}

/// Like [`resolve_obsids`], but `None` when no observation source is configured.
///
/// Errors from a configured source (missing database, unreadable file, missing
/// column) are propagated rather than treated as "no filter".
pub fn configured_obsids(config: &CatalogConfig) -> AppResult<Option<Vec<String>>> {
    if config.obsids.is_none() && config.database_dir.is_none() {
        return Ok(None);
    }
    resolve_obsids(config).map(Some)
}

/// Unique observation ids of the most recent dated marking database in `dir`.
pub fn discover_obsids(dir: &Path) -> AppResult<Vec<String>> {
    let path = latest_file(dir, ".csv")?;
    let database = Table::read_csv(&path)?;
    let mut obsids = database.unique_values(IMAGE_NAME, "marking database")?;
    obsids.sort();
    info!(path = %path.display(), obsids = obsids.len(), "discovered observations");
    Ok(obsids)
}

/// Highest `kind` id in one clustered file.
fn max_marking_id(path: &Path, kind: MarkingKind) -> AppResult<Option<MarkingId>> {
    let table = Table::read_csv(path)?;
    let Some(col) = table.column_index(MARKING_ID) else {
        return Ok(None);
    };
    let mut max = None;
    for row in table.rows() {
        let Some(raw) = row[col].as_str() else {
            continue;
        };
        let id: MarkingId = raw.parse()?;
        if id.kind() != kind {
            return Err(CatalogError::InvalidMarkingId(raw.to_string()));
        }
        max = max.max(Some(id));
    }
    Ok(max)
}

/// Drops the committed output of units about to be reprocessed.
///
/// A unit that then fails stays pending instead of keeping output numbered
/// by an earlier run.
fn retire_units(units: &[ObsidWorkUnit]) -> AppResult<()> {
    let mut retired = 0;
    for unit in units {
        if unit.retire()? {
            retired += 1;
        }
    }
    if retired > 0 {
        info!(retired, "removed committed output of units to overwrite");
    }
    Ok(())
}

/// Normalizes angles and writes the clustered files into a fresh staging dir.
fn stage_clustered(
    layout: &CatalogLayout,
    unit: &ObsidWorkUnit,
    found: UnitCandidates,
) -> AppResult<Vec<TileCandidates>> {
    unit.prepare_staging()?;
    let mut tiles = found.tiles;
    for tile in tiles.iter_mut() {
        tile.fans.iter_mut().for_each(|m| m.normalize());
        tile.blotches.iter_mut().for_each(|m| m.normalize());
        let root = &unit.staging_dir;
        write_markings(
            &layout.tile_file(root, &tile.tile_id, Stage::Clustered, MarkingKind::Fan),
            &tile.fans,
        )?;
        write_markings(
            &layout.tile_file(root, &tile.tile_id, Stage::Clustered, MarkingKind::Blotch),
            &tile.blotches,
        )?;
    }
    Ok(tiles)
}

/// Fnotches one staged unit, applies the cut, writes L1C files and commits.
fn finish_unit(
    layout: &CatalogLayout,
    fnotcher: &dyn Fnotcher,
    cut: f64,
    unit: &ObsidWorkUnit,
    tiles: &[TileCandidates],
) -> anyhow::Result<UnitSummary> {
    let known: HashSet<MarkingId> = tiles
        .iter()
        .flat_map(|t| {
            t.fans
                .iter()
                .filter_map(|m| m.marking_id().copied())
                .chain(t.blotches.iter().filter_map(|m| m.marking_id().copied()))
        })
        .collect();

    let fnotched = fnotcher.fnotch(unit, tiles)?;
    let mut summary = UnitSummary::default();
    for mut tile in fnotched {
        for id in tile
            .fans
            .iter()
            .map(|m| m.marking_id().copied())
            .chain(tile.blotches.iter().map(|m| m.marking_id().copied()))
        {
            match id {
                Some(id) if known.contains(&id) => {}
                Some(id) => anyhow::bail!("fnotcher returned unknown marking id {id}"),
                None => anyhow::bail!("fnotcher returned a marking without id"),
            }
        }

        let before = tile.fans.len() + tile.blotches.len();
        tile.fans.retain(|m| m.effective_vote_ratio() >= cut);
        tile.blotches.retain(|m| m.effective_vote_ratio() >= cut);
        summary.below_cut += before - tile.fans.len() - tile.blotches.len();
        summary.fans += tile.fans.len();
        summary.blotches += tile.blotches.len();

        let root = &unit.staging_dir;
        write_markings(
            &layout.tile_file(root, &tile.tile_id, Stage::Cut, MarkingKind::Fan),
            &tile.fans,
        )?;
        write_markings(
            &layout.tile_file(root, &tile.tile_id, Stage::Cut, MarkingKind::Blotch),
            &tile.blotches,
        )?;
    }
    unit.commit()?;
    info!(
        obsid = %unit.obsid,
        fans = summary.fans,
        blotches = summary.blotches,
        below_cut = summary.below_cut,
        "committed unit"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config() -> CatalogConfig {
        CatalogConfig {
            obsids: None,
            database_dir: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_source_means_no_filter() {
        assert!(configured_obsids(&config()).unwrap().is_none());
        assert!(matches!(resolve_obsids(&config()), Err(CatalogError::Configuration(_))));
    }

    #[test]
    fn test_configured_list_is_used() {
        let config = CatalogConfig {
            obsids: Some(vec!["ESP_1".into()]),
            ..config()
        };
        assert_eq!(configured_obsids(&config).unwrap(), Some(vec!["ESP_1".to_string()]));
    }

    #[test]
    fn test_broken_database_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let empty = CatalogConfig {
            database_dir: Some(tmp.path().to_path_buf()),
            ..config()
        };
        assert!(matches!(
            configured_obsids(&empty),
            Err(CatalogError::NoDatedFiles { .. })
        ));

        fs::write(tmp.path().join("2018-02-19_markings.csv"), "obsid\nESP_1\n").unwrap();
        assert!(matches!(
            configured_obsids(&empty),
            Err(CatalogError::MissingColumn { ref column, .. }) if column == IMAGE_NAME
        ));
    }
}

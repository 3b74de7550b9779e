//! Output layout of a catalog production run.
//!
//! ```text
//! <catalog_root>/<version>/
//! ├── P4_catalog_<version>_metadata.csv
//! ├── P4_catalog_<version>_tile_coords.csv
//! ├── P4_catalog_<version>_L1C_cut_0.5_fan.csv
//! ├── .staging/<obsid>/...            (units in progress)
//! ├── ground_coordinates/<obsid>_ground.csv
//! └── <obsid>/
//!     └── <tile_id>/
//!         ├── just_clustering/<tile_id>_fans.csv
//!         └── applied_cut_0.5/<tile_id>_fans.csv
//! ```

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CatalogConfig;
use crate::error::{AppResult, CatalogError};
use crate::markings::MarkingKind;

/// Name of the folder holding raw clustering output with identifiers.
pub const CLUSTERED_FOLDER: &str = "just_clustering";

const STAGING_FOLDER: &str = ".staging";

const GROUND_FOLDER: &str = "ground_coordinates";

/// Processing stage of a per-tile candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Clustering output before fnotching (L1A).
    Clustered,
    /// Fnotched output after the vote-ratio cut (L1C).
    Cut,
}

/// Path conventions for one catalog version.
#[derive(Debug, Clone)]
pub struct CatalogLayout {
    version_dir: PathBuf,
    catalog: String,
    cut: f64,
}

impl CatalogLayout {
    /// Layout rooted at `<catalog_root>/<version>`.
    pub fn new(catalog_root: impl AsRef<Path>, version: &str, cut: f64) -> Self {
        Self {
            version_dir: catalog_root.as_ref().join(version),
            catalog: format!("P4_catalog_{version}"),
            cut,
        }
    }

    /// Layout described by a configuration value.
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(&config.catalog_root, &config.version, config.cut)
    }

    /// Catalog name used as file prefix.
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// Directory holding everything of this version.
    pub fn savefolder(&self) -> &Path {
        &self.version_dir
    }

    /// Folder name of the cut-applied stage, e.g. `applied_cut_0.5`.
    pub fn cut_folder(&self) -> String {
        format!("applied_cut_{:.1}", self.cut)
    }

    /// Final output directory of one observation.
    pub fn unit_dir(&self, obsid: &str) -> PathBuf {
        self.version_dir.join(obsid)
    }

    /// Scratch directory a unit is built in before it is committed.
    pub fn staging_dir(&self, obsid: &str) -> PathBuf {
        self.version_dir.join(STAGING_FOLDER).join(obsid)
    }

    /// Per-tile candidate file below `unit_root` (either the staging or final unit dir).
    pub fn tile_file(&self, unit_root: &Path, tile_id: &str, stage: Stage, kind: MarkingKind) -> PathBuf {
        let stage_folder = match stage {
            Stage::Clustered => CLUSTERED_FOLDER.to_string(),
            Stage::Cut => self.cut_folder(),
        };
        unit_root
            .join(tile_id)
            .join(stage_folder)
            .join(format!("{tile_id}_{}.csv", kind.plural()))
    }

    /// All candidate files of one stage and kind below `unit_root`, sorted by tile.
    pub fn stage_files(&self, unit_root: &Path, stage: Stage, kind: MarkingKind) -> AppResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !unit_root.is_dir() {
            return Ok(files);
        }
        for entry in fs::read_dir(unit_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let tile_id = entry.file_name().to_string_lossy().into_owned();
            let path = self.tile_file(unit_root, &tile_id, stage, kind);
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Output directories of every committed unit of this version, sorted.
    pub fn committed_unit_dirs(&self) -> AppResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if !self.version_dir.is_dir() {
            return Ok(dirs);
        }
        for entry in fs::read_dir(&self.version_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if entry.file_type()?.is_dir() && !name.starts_with('.') && name != GROUND_FOLDER {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Ground coordinates computed for one observation.
    ///
    /// Kept outside the unit directory, whose existence marks the unit as done.
    pub fn ground_file(&self, obsid: &str) -> PathBuf {
        self.version_dir
            .join(GROUND_FOLDER)
            .join(format!("{obsid}_ground.csv"))
    }

    /// Observation metadata table.
    pub fn metadata_path(&self) -> PathBuf {
        self.version_dir.join(format!("{}_metadata.csv", self.catalog))
    }

    /// Tile-to-pixel coordinate table as produced upstream.
    pub fn tile_coords_path(&self) -> PathBuf {
        self.version_dir.join(format!("{}_tile_coords.csv", self.catalog))
    }

    /// Tile coordinate table after the working columns were dropped.
    pub fn tile_coords_path_final(&self) -> PathBuf {
        self.version_dir
            .join(format!("{}_tile_coords_final.csv", self.catalog))
    }

    /// Aggregated candidate table written by the region aggregation.
    pub fn aggregate_path(&self, kind: MarkingKind) -> PathBuf {
        self.version_dir.join(format!(
            "{}_L1C_cut_{:.1}_{}.csv",
            self.catalog,
            self.cut,
            kind.singular()
        ))
    }

    /// Locates the aggregated candidate table of `kind` by its `*_<kind>.csv` suffix.
    pub fn find_candidate_file(&self, kind: MarkingKind) -> AppResult<PathBuf> {
        find_by_suffix(&self.version_dir, &format!("_{}.csv", kind.singular()))
    }

    /// Published catalog path next to the aggregated table.
    pub fn merged_path(source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        source.with_file_name(format!("{stem}_meta_merged.csv"))
    }
}

/// First file (by name) in `dir` whose name ends with `suffix`.
pub fn find_by_suffix(dir: &Path, suffix: &str) -> AppResult<PathBuf> {
    let missing = || CatalogError::MissingSourceFile {
        what: format!("*{suffix}"),
        searched: dir.to_path_buf(),
    };
    if !dir.is_dir() {
        return Err(missing());
    }
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(suffix))
        })
        .collect();
    matches.sort();
    matches.into_iter().next().ok_or_else(missing)
}

/// The unit of resumable work: one observation and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObsidWorkUnit {
    /// Observation identifier.
    pub obsid: String,
    /// Committed output; its existence marks the unit done.
    pub output_dir: PathBuf,
    /// Where the unit is written before commit.
    pub staging_dir: PathBuf,
}

impl ObsidWorkUnit {
    /// Work unit for `obsid` under `layout`.
    pub fn new(layout: &CatalogLayout, obsid: &str) -> Self {
        Self {
            obsid: obsid.to_string(),
            output_dir: layout.unit_dir(obsid),
            staging_dir: layout.staging_dir(obsid),
        }
    }

    /// Whether the unit's output has been committed.
    pub fn is_done(&self) -> bool {
        self.output_dir.exists()
    }

    /// Clears leftovers of an interrupted attempt and recreates the staging dir.
    pub fn prepare_staging(&self) -> AppResult<()> {
        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)?;
        }
        fs::create_dir_all(&self.staging_dir)?;
        Ok(())
    }

    /// Removes committed output so the unit counts as pending again.
    ///
    /// Returns whether anything was removed.
    pub fn retire(&self) -> AppResult<bool> {
        if !self.output_dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.output_dir)?;
        Ok(true)
    }

    /// Moves the staging directory into place, replacing earlier output.
    pub fn commit(&self) -> AppResult<()> {
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir)?;
        }
        if let Some(parent) = self.output_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.staging_dir, &self.output_dir)?;
        Ok(())
    }
}

/// A data file whose name starts with an ISO date, e.g. `2018-02-19_markings.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedFile {
    path: PathBuf,
    date: NaiveDate,
}

impl DatedFile {
    /// Parses the leading `YYYY-MM-DD` of the file name; `None` if absent.
    pub fn parse(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;
        let date = NaiveDate::parse_from_str(name.get(..10)?, "%Y-%m-%d").ok()?;
        Some(Self { path, date })
    }

    /// Date encoded in the file name.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Underlying path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consumes the wrapper.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl PartialOrd for DatedFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DatedFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Most recent dated file in `dir` whose name ends with `suffix`.
pub fn latest_file(dir: &Path, suffix: &str) -> AppResult<PathBuf> {
    let none = || CatalogError::NoDatedFiles {
        dir: dir.to_path_buf(),
        pattern: format!("YYYY-MM-DD*{suffix}"),
    };
    if !dir.is_dir() {
        return Err(none());
    }
    fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
        })
        .filter_map(DatedFile::parse)
        .max()
        .map(DatedFile::into_path)
        .ok_or_else(none)
}

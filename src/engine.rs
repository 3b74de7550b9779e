//! Seams to the external engines of the pipeline.
//!
//! Clustering, fnotching and ground projection are done by collaborators outside
//! this crate. They are reached through the traits below and report failures as
//! `anyhow::Error`; the pipeline wraps those into `UnitFailure`s naming the
//! observation and stage.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::error::{AppResult, CatalogError};
use crate::ids::{TileCandidates, UnitCandidates};
use crate::layout::{CatalogLayout, ObsidWorkUnit};
use crate::table::Table;

/// Produces id-less candidate markings for one observation.
///
/// Implementations run concurrently on the worker pool and must not share
/// mutable state between calls.
pub trait ClusterEngine: Send + Sync {
    fn cluster(&self, unit: &ObsidWorkUnit) -> anyhow::Result<UnitCandidates>;
}

/// Resolves overlapping fan/blotch candidates of one observation.
///
/// Returned markings carry their input `marking_id` and a `vote_ratio`. A
/// marking compared against several neighbours may be returned more than once.
pub trait Fnotcher: Send + Sync {
    fn fnotch(&self, unit: &ObsidWorkUnit, tiles: &[TileCandidates]) -> anyhow::Result<Vec<TileCandidates>>;
}

/// Computes ground coordinates for the pixel positions of one observation.
///
/// The returned table has `Sample`, `Line`, `BodyFixedCoordinateX/Y/Z`,
/// `PlanetocentricLatitude`, `PlanetographicLatitude` and
/// `PositiveEast360Longitude` columns; extra columns are ignored.
pub trait GroundProjector: Send + Sync {
    fn ground_coordinates(&self, obsid: &str) -> anyhow::Result<Table>;
}

/// Ground projector over precomputed per-observation CSV files.
#[derive(Debug, Clone)]
pub struct CsvGroundProjector {
    layout: CatalogLayout,
}

impl CsvGroundProjector {
    /// Reads ground files laid out by `layout`.
    pub fn new(layout: CatalogLayout) -> Self {
        Self { layout }
    }
}

impl GroundProjector for CsvGroundProjector {
    fn ground_coordinates(&self, obsid: &str) -> anyhow::Result<Table> {
        let path = self.layout.ground_file(obsid);
        if !path.is_file() {
            return Err(CatalogError::MissingSourceFile {
                what: format!("ground coordinates for {obsid}"),
                searched: path,
            }
            .into());
        }
        Ok(Table::read_csv(&path)?)
    }
}

/// Writes typed markings as CSV with a header row.
///
/// Nothing is written for an empty slice.
pub fn write_markings<M: Serialize>(path: &Path, markings: &[M]) -> AppResult<()> {
    if markings.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for marking in markings {
        writer.serialize(marking)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = markings.len(), "wrote markings");
    Ok(())
}

/// Reads typed markings written by [`write_markings`].
pub fn read_markings<M: DeserializeOwned>(path: &Path) -> AppResult<Vec<M>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut markings = Vec::new();
    for record in reader.deserialize() {
        markings.push(record?);
    }
    Ok(markings)
}

//! Catalog merge: aggregated candidates plus metadata into the published tables.
//!
//! The stages run in a fixed order, each consuming the previous output:
//!
//! 1. load the fan and blotch candidate tables, the observation metadata and
//!    the tile coordinate table
//! 2. collapse duplicate fnotch rows ([`FnotchResolver`])
//! 3. join observation metadata on `obsid == OBSERVATION_ID`
//! 4. finalize and persist the tile coordinate table
//! 5. join ground coordinates on `(obsid, image_x, image_y)` after rounding
//!    both sides' pixel coordinates to 7 digits
//! 6. fill missing `vote_ratio` with 1
//! 7. rename to the published schema and cast `version` to integer
//! 8. write the published tables
//!
//! Both joins are inner joins and can lose rows. Every lost row is counted and
//! logged with its obsid; more than `max_join_drops` lost rows fail the merge
//! with [`CatalogError::JoinKeyMismatch`], and a join that loses every row
//! fails with [`CatalogError::EmptyJoin`] regardless of the tolerance.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::engine::GroundProjector;
use crate::error::{AppResult, CatalogError};
use crate::fnotch::{FnotchResolver, FnotchSummary};
use crate::layout::CatalogLayout;
use crate::markings::MarkingKind;
use crate::metadata::OBSERVATION_ID;
use crate::table::{FloatFormat, JoinReport, Table, Value};

/// Working columns removed from the tile coordinate table.
pub const DROP_FOR_TILE_COORDS: [&str; 6] = [
    "xy_hirise",
    "SampleResolution",
    "LineResolution",
    "PositiveWest360Longitude",
    "Line",
    "Sample",
];

/// Metadata columns joined onto the candidates.
pub const METADATA_TO_MERGE: [&str; 4] = [OBSERVATION_ID, "SOLAR_LONGITUDE", "north_azimuth", "map_scale"];

/// Ground coordinate columns joined onto the candidates; the first three form the key.
pub const COLS_TO_MERGE: [&str; 9] = [
    "obsid",
    "image_x",
    "image_y",
    "BodyFixedCoordinateX",
    "BodyFixedCoordinateY",
    "BodyFixedCoordinateZ",
    "PlanetocentricLatitude",
    "PlanetographicLatitude",
    "PositiveEast360Longitude",
];

const GROUND_KEY: [&str; 3] = ["obsid", "image_x", "image_y"];

/// Published fan columns, in order.
pub const FAN_COLUMNS_AS_PUBLISHED: [&str; 24] = [
    "marking_id",
    "angle",
    "distance",
    "tile_id",
    "image_x",
    "image_y",
    "n_votes",
    "obsid",
    "spread",
    "version",
    "vote_ratio",
    "x",
    "y",
    "x_angle",
    "y_angle",
    "l_s",
    "map_scale",
    "north_azimuth",
    "BodyFixedCoordinateX",
    "BodyFixedCoordinateY",
    "BodyFixedCoordinateZ",
    "PlanetocentricLatitude",
    "PlanetographicLatitude",
    "Longitude",
];

/// Published blotch columns, in order.
pub const BLOTCH_COLUMNS_AS_PUBLISHED: [&str; 24] = [
    "marking_id",
    "angle",
    "tile_id",
    "image_x",
    "image_y",
    "n_votes",
    "obsid",
    "radius_1",
    "radius_2",
    "version",
    "vote_ratio",
    "x",
    "y",
    "x_angle",
    "y_angle",
    "l_s",
    "map_scale",
    "north_azimuth",
    "BodyFixedCoordinateX",
    "BodyFixedCoordinateY",
    "BodyFixedCoordinateZ",
    "PlanetocentricLatitude",
    "PlanetographicLatitude",
    "Longitude",
];

const PUBLISHED_RENAMES: [(&str, &str); 3] = [
    ("image_id", "tile_id"),
    ("SOLAR_LONGITUDE", "l_s"),
    ("PositiveEast360Longitude", "Longitude"),
];

/// Digits both sides of the coordinate join are rounded to.
pub const COORDINATE_DECIMALS: i32 = 7;

const STAGE_METADATA: &str = "metadata join";
const STAGE_GROUND: &str = "ground coordinate join";

/// Published column order of `kind`.
pub fn published_columns(kind: MarkingKind) -> &'static [&'static str] {
    match kind {
        MarkingKind::Fan => &FAN_COLUMNS_AS_PUBLISHED,
        MarkingKind::Blotch => &BLOTCH_COLUMNS_AS_PUBLISHED,
    }
}

/// Row accounting of one join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDiscrepancy {
    /// Which join this is.
    pub stage: &'static str,
    /// Marking kind joined.
    pub kind: MarkingKind,
    /// Rows entering the join.
    pub input_rows: usize,
    /// Rows leaving the join.
    pub output_rows: usize,
    /// Input rows without a match.
    pub dropped: usize,
    /// Obsids of the dropped rows, sorted.
    pub obsids: Vec<String>,
}

impl JoinDiscrepancy {
    /// Output minus input rows.
    pub fn row_delta(&self) -> i64 {
        self.output_rows as i64 - self.input_rows as i64
    }
}

/// Result of merging one marking kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindMergeReport {
    /// Marking kind merged.
    pub kind: MarkingKind,
    /// Aggregated candidate table read.
    pub source: PathBuf,
    /// Published table written.
    pub output: PathBuf,
    /// Fnotch resolution counts.
    pub fnotch: FnotchSummary,
    /// Observation metadata join.
    pub metadata_join: JoinDiscrepancy,
    /// Ground coordinate join.
    pub ground_join: JoinDiscrepancy,
    /// Rows whose missing `vote_ratio` became 1.
    pub filled_vote_ratios: usize,
    /// Rows in the published table.
    pub published_rows: usize,
}

impl KindMergeReport {
    /// Published rows minus resolved candidate rows.
    pub fn row_delta(&self) -> i64 {
        self.published_rows as i64 - self.fnotch.output_rows as i64
    }
}

/// Result of a full merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    /// Rows in the finalized tile coordinate table.
    pub tile_coords_rows: usize,
    /// One report per marking kind.
    pub kinds: Vec<KindMergeReport>,
}

impl MergeReport {
    /// Report for `kind`, if merged.
    pub fn kind(&self, kind: MarkingKind) -> Option<&KindMergeReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Rows lost over both joins of every kind.
    pub fn total_dropped(&self) -> usize {
        self.kinds
            .iter()
            .map(|k| k.metadata_join.dropped + k.ground_join.dropped)
            .sum()
    }
}

struct KindState {
    kind: MarkingKind,
    source: PathBuf,
    table: Table,
    fnotch: FnotchSummary,
    metadata_join: JoinDiscrepancy,
}

/// Single-writer merge of the aggregated catalog tables.
pub struct CatalogMerger {
    layout: CatalogLayout,
    projector: Arc<dyn GroundProjector>,
    resolver: FnotchResolver,
    max_join_drops: usize,
}

impl CatalogMerger {
    /// Merger with zero tolerance for dropped join rows.
    pub fn new(layout: CatalogLayout, projector: Arc<dyn GroundProjector>) -> Self {
        Self {
            layout,
            projector,
            resolver: FnotchResolver::new(),
            max_join_drops: 0,
        }
    }

    /// Merger for the configured catalog version.
    pub fn from_config(config: &CatalogConfig, projector: Arc<dyn GroundProjector>) -> Self {
        Self::new(CatalogLayout::from_config(config), projector)
            .with_max_join_drops(config.max_join_drops)
    }

    /// Number of rows a join may lose before the merge fails.
    pub fn with_max_join_drops(mut self, max_join_drops: usize) -> Self {
        self.max_join_drops = max_join_drops;
        self
    }

    /// Runs all stages and writes both published tables.
    pub fn merge(&self) -> AppResult<MergeReport> {
        info!(catalog = self.layout.catalog(), "merging catalog");

        // Stage 1
        let metadata = self.load_metadata()?;
        let tile_coords = read_source(&self.layout.tile_coords_path(), "tile coordinates")?;

        let mut states = Vec::with_capacity(MarkingKind::ALL.len());
        for kind in MarkingKind::ALL {
            let source = self.layout.find_candidate_file(kind)?;
            let candidates = Table::read_csv(&source)?;
            info!(%kind, rows = candidates.len(), path = %source.display(), "loaded candidates");

            // Stage 2
            let (resolved, fnotch) = self.resolver.resolve(&candidates)?;
            if fnotch.duplicated_ids > 0 {
                info!(
                    %kind,
                    duplicated_ids = fnotch.duplicated_ids,
                    merged_percent = fnotch.merged_percent(),
                    "averaged repeated fnotch results"
                );
            }

            // Stage 3
            let (mut table, report) =
                resolved.inner_join(&metadata, &["obsid"], &[OBSERVATION_ID], STAGE_METADATA)?;
            let metadata_join = self.check_join(STAGE_METADATA, kind, &resolved, &report)?;
            table.drop_columns(&[OBSERVATION_ID]);

            states.push(KindState {
                kind,
                source,
                table,
                fnotch,
                metadata_join,
            });
        }

        // Stage 4
        let tile_coords_rows = self.finalize_tile_coords(tile_coords)?;

        // Stage 5
        let mut obsids = BTreeSet::new();
        for state in &states {
            obsids.extend(state.table.unique_values("obsid", STAGE_GROUND)?);
        }
        let ground = self.collect_ground_coordinates(&obsids)?;

        let mut kinds = Vec::with_capacity(states.len());
        for KindState {
            kind,
            source,
            mut table,
            fnotch,
            metadata_join,
        } in states
        {
            table.round_columns(&GROUND_KEY[1..], COORDINATE_DECIMALS, STAGE_GROUND)?;
            let (joined, report) = table.inner_join(&ground, &GROUND_KEY, &GROUND_KEY, STAGE_GROUND)?;
            let ground_join = self.check_join(STAGE_GROUND, kind, &table, &report)?;
            let mut table = joined;

            // Stage 6
            let filled_vote_ratios = table.fill_missing("vote_ratio", Value::Number(1.0));

            // Stage 7
            table.rename_columns(&PUBLISHED_RENAMES);
            table.cast_to_integer("version", "published schema")?;
            let published = table.select(published_columns(kind), "published schema")?;

            // Stage 8
            let output = CatalogLayout::merged_path(&source);
            published.write_csv(&output, FloatFormat::Natural)?;
            info!(
                %kind,
                rows = published.len(),
                filled_vote_ratios,
                path = %output.display(),
                "wrote published catalog"
            );

            kinds.push(KindMergeReport {
                kind,
                source,
                output,
                fnotch,
                metadata_join,
                ground_join,
                filled_vote_ratios,
                published_rows: published.len(),
            });
        }

        Ok(MergeReport {
            tile_coords_rows,
            kinds,
        })
    }

    /// Observation metadata restricted to the merge columns, one row per observation.
    fn load_metadata(&self) -> AppResult<Table> {
        let metadata = read_source(&self.layout.metadata_path(), "observation metadata")?;
        let mut metadata = metadata.select(&METADATA_TO_MERGE, "observation metadata")?;
        let duplicates = metadata.drop_duplicates();
        if duplicates > 0 {
            warn!(duplicates, "dropped duplicate metadata rows");
        }
        Ok(metadata)
    }

    /// Drops the working columns and persists the tile coordinate table.
    fn finalize_tile_coords(&self, mut tile_coords: Table) -> AppResult<usize> {
        tile_coords.drop_columns(&DROP_FOR_TILE_COORDS);
        tile_coords.rename_columns(&[("image_id", "tile_id")]);
        let path = self.layout.tile_coords_path_final();
        tile_coords.write_csv(&path, FloatFormat::Fixed(7))?;
        info!(rows = tile_coords.len(), path = %path.display(), "wrote final tile coordinates");
        Ok(tile_coords.len())
    }

    /// Ground coordinates of every obsid keyed like the candidate tables.
    ///
    /// Projector failures are attributed to the obsid they occurred for.
    fn collect_ground_coordinates(&self, obsids: &BTreeSet<String>) -> AppResult<Table> {
        let mut tables = Vec::with_capacity(obsids.len());
        for obsid in obsids {
            let mut table = self
                .projector
                .ground_coordinates(obsid)
                .map_err(|e| CatalogError::unit_failure(obsid, STAGE_GROUND, format!("{e:#}")))?;
            table.rename_columns(&[("Sample", "image_x"), ("Line", "image_y")]);
            table.set_column("obsid", Value::from(obsid.as_str()));
            let mut table = table.select(&COLS_TO_MERGE, "ground coordinates")?;
            table.round_columns(&COLS_TO_MERGE[1..], COORDINATE_DECIMALS, "ground coordinates")?;
            let duplicates = table.drop_duplicates();
            debug!(obsid = %obsid, rows = table.len(), duplicates, "collected ground coordinates");
            tables.push(table);
        }
        let mut ground = Table::concat(tables);
        if ground.columns().is_empty() {
            ground = Table::new(COLS_TO_MERGE);
        }
        Ok(ground)
    }

    /// Counts the rows a join lost and fails when the tolerance is exceeded.
    fn check_join(
        &self,
        stage: &'static str,
        kind: MarkingKind,
        left: &Table,
        report: &JoinReport,
    ) -> AppResult<JoinDiscrepancy> {
        let obsid_col = left.require_column("obsid", stage)?;
        let obsids: BTreeSet<String> = report
            .unmatched
            .iter()
            .map(|&row| left.rows()[row][obsid_col].render(FloatFormat::Natural))
            .collect();
        let discrepancy = JoinDiscrepancy {
            stage,
            kind,
            input_rows: report.left_rows,
            output_rows: report.output_rows,
            dropped: report.dropped(),
            obsids: obsids.into_iter().collect(),
        };

        if discrepancy.input_rows > 0 && discrepancy.output_rows == 0 {
            warn!(stage, %kind, input = discrepancy.input_rows, "join produced no rows");
            return Err(CatalogError::EmptyJoin {
                stage: stage.to_string(),
                kind,
                input: discrepancy.input_rows,
            });
        }
        if discrepancy.dropped > 0 {
            warn!(
                stage,
                %kind,
                dropped = discrepancy.dropped,
                input = discrepancy.input_rows,
                obsids = ?discrepancy.obsids,
                "join dropped rows"
            );
        }
        if discrepancy.dropped > self.max_join_drops {
            return Err(CatalogError::JoinKeyMismatch {
                stage: stage.to_string(),
                kind,
                dropped: discrepancy.dropped,
                input: discrepancy.input_rows,
                obsids: discrepancy.obsids,
            });
        }
        let duplicated = discrepancy.output_rows + discrepancy.dropped - discrepancy.input_rows;
        if duplicated > 0 {
            warn!(stage, %kind, duplicated, "join matched rows more than once");
        }
        info!(
            stage,
            %kind,
            input = discrepancy.input_rows,
            output = discrepancy.output_rows,
            row_delta = discrepancy.row_delta(),
            "join finished"
        );
        Ok(discrepancy)
    }
}

fn read_source(path: &Path, what: &str) -> AppResult<Table> {
    if !path.is_file() {
        return Err(CatalogError::MissingSourceFile {
            what: what.to_string(),
            searched: path.to_path_buf(),
        });
    }
    Table::read_csv(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const OBSID: &str = "ESP_011350_0945";

    const FAN_HEADER: &str = "marking_id,image_id,obsid,x,y,image_x,image_y,x_tile,y_tile,angle,spread,distance,x_angle,y_angle,n_votes,version,vote_ratio";
    const BLOTCH_HEADER: &str = "marking_id,image_id,obsid,x,y,image_x,image_y,x_tile,y_tile,angle,radius_1,radius_2,x_angle,y_angle,n_votes,version,vote_ratio";

    /// Ground tables keyed by obsid.
    struct MapProjector(HashMap<String, Table>);

    impl GroundProjector for MapProjector {
        fn ground_coordinates(&self, obsid: &str) -> anyhow::Result<Table> {
            self.0
                .get(obsid)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no projection for {obsid}"))
        }
    }

    fn ground(points: &[(f64, f64)]) -> Table {
        let mut t = Table::new([
            "Sample",
            "Line",
            "BodyFixedCoordinateX",
            "BodyFixedCoordinateY",
            "BodyFixedCoordinateZ",
            "PlanetocentricLatitude",
            "PlanetographicLatitude",
            "PositiveEast360Longitude",
            "PositiveWest360Longitude",
        ]);
        for &(sample, line) in points {
            t.push_row(vec![
                Value::Number(sample),
                Value::Number(line),
                Value::Number(100.0),
                Value::Number(200.0),
                Value::Number(-3000.0),
                Value::Number(-81.5),
                Value::Number(-81.6),
                Value::Number(295.2),
                Value::Number(64.8),
            ])
            .unwrap();
        }
        t
    }

    struct Fixture {
        _tmp: TempDir,
        layout: CatalogLayout,
    }

    impl Fixture {
        fn new(fan_rows: &[&str], blotch_rows: &[&str]) -> Self {
            let tmp = TempDir::new().unwrap();
            let layout = CatalogLayout::new(tmp.path(), "v1", 0.5);
            fs::create_dir_all(layout.savefolder()).unwrap();
            fs::write(
                layout.metadata_path(),
                format!(
                    "OBSERVATION_ID,IMAGE_CENTER_LATITUDE,SOLAR_LONGITUDE,START_TIME,map_scale,north_azimuth\n\
                     {OBSID},-81.5,187.2,2009-01-02T03:04:05,0.5,123.4\n"
                ),
            )
            .unwrap();
            fs::write(
                layout.tile_coords_path(),
                format!(
                    "image_id,obsid,x_hirise,y_hirise,xy_hirise,Sample,Line,SampleResolution\n\
                     APF0000001,{OBSID},420.0000000,324.0000000,\"(420, 324)\",420.0,324.0,0.5\n"
                ),
            )
            .unwrap();
            let write = |kind: MarkingKind, header: &str, rows: &[&str]| {
                let mut text = format!("{header}\n");
                for row in rows {
                    text.push_str(row);
                    text.push('\n');
                }
                fs::write(layout.aggregate_path(kind), text).unwrap();
            };
            write(MarkingKind::Fan, FAN_HEADER, fan_rows);
            write(MarkingKind::Blotch, BLOTCH_HEADER, blotch_rows);
            Self { _tmp: tmp, layout }
        }

        fn merger(&self, points: &[(f64, f64)]) -> CatalogMerger {
            let projector = MapProjector(HashMap::from([(OBSID.to_string(), ground(points))]));
            CatalogMerger::new(self.layout.clone(), Arc::new(projector))
        }
    }

    fn fan_row(id: &str, image_x: f64, image_y: f64, ratio: &str) -> String {
        format!("{id},APF0000001,{OBSID},10.0,20.0,{image_x},{image_y},1,1,45.0,30.0,50.0,0.7,0.7,5,1,{ratio}")
    }

    fn blotch_row(id: &str, image_x: f64, image_y: f64) -> String {
        format!("{id},APF0000001,{OBSID},10.0,20.0,{image_x},{image_y},1,1,120.0,20.0,10.0,-0.5,0.86,4,1,")
    }

    #[test]
    fn test_merge_publishes_schema_with_zero_row_delta() {
        let fans = [
            fan_row("F000000", 10.5, 20.25, "0.2"),
            fan_row("F000000", 10.5, 20.25, "0.6"),
            fan_row("F000000", 10.5, 20.25, "0.4"),
            fan_row("F000001", 750.0, 568.0, ""),
        ];
        let blotches = [blotch_row("B000000", 10.5, 20.25)];
        let fixture = Fixture::new(
            &fans.iter().map(String::as_str).collect::<Vec<_>>(),
            &blotches.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        let report = fixture.merger(&[(10.5, 20.25), (750.0, 568.0)]).merge().unwrap();

        let fan = report.kind(MarkingKind::Fan).unwrap();
        assert_eq!(fan.fnotch.input_rows, 4);
        assert_eq!(fan.published_rows, 2);
        assert_eq!(fan.row_delta(), 0);
        assert_eq!(fan.ground_join.dropped, 0);
        assert_eq!(fan.filled_vote_ratios, 1);
        assert_eq!(report.total_dropped(), 0);
        assert_eq!(report.tile_coords_rows, 1);

        let published = Table::read_csv(&fan.output).unwrap();
        assert_eq!(published.columns(), FAN_COLUMNS_AS_PUBLISHED);
        let ratio = published.get(0, "vote_ratio").and_then(Value::as_f64).unwrap();
        assert!((ratio - 0.4).abs() < 1e-9);
        assert_eq!(published.get(1, "vote_ratio"), Some(&Value::Integer(1)));
        assert_eq!(published.get(0, "version"), Some(&Value::Integer(1)));
        assert_eq!(published.get(0, "tile_id"), Some(&Value::from("APF0000001")));
        assert_eq!(published.get(0, "l_s"), Some(&Value::Number(187.2)));
        assert_eq!(published.get(0, "Longitude"), Some(&Value::Number(295.2)));

        let blotch = report.kind(MarkingKind::Blotch).unwrap();
        let published = Table::read_csv(&blotch.output).unwrap();
        assert_eq!(published.columns(), BLOTCH_COLUMNS_AS_PUBLISHED);
        assert!(blotch.output.ends_with("P4_catalog_v1_L1C_cut_0.5_blotch_meta_merged.csv"));

        let coords = Table::read_csv(fixture.layout.tile_coords_path_final()).unwrap();
        assert!(coords.has_column("tile_id"));
        assert!(coords.has_column("x_hirise"));
        for dropped in ["xy_hirise", "Sample", "Line", "SampleResolution"] {
            assert!(!coords.has_column(dropped));
        }
    }

    #[test]
    fn test_rounding_reconciles_independent_float_paths() {
        let fans = [fan_row("F000000", 0.1 + 0.2, 1.0 / 3.0, "")];
        let blotches = [blotch_row("B000000", 0.3, 0.333_333_333_4)];
        let fixture = Fixture::new(&[fans[0].as_str()], &[blotches[0].as_str()]);
        let report = fixture.merger(&[(0.3, 0.333_333_33)]).merge().unwrap();
        assert_eq!(report.total_dropped(), 0);
        assert_eq!(report.kind(MarkingKind::Fan).unwrap().published_rows, 1);
    }

    #[test]
    #[traced_test]
    fn test_coordinate_mismatch_is_flagged() {
        let fans = [
            fan_row("F000000", 10.5, 20.25, ""),
            fan_row("F000001", 750.000_001, 568.0, ""),
        ];
        let blotches = [blotch_row("B000000", 10.5, 20.25)];
        let fixture = Fixture::new(
            &fans.iter().map(String::as_str).collect::<Vec<_>>(),
            &[blotches[0].as_str()],
        );
        let points = [(10.5, 20.25), (750.0, 568.0)];

        let err = fixture.merger(&points).merge().unwrap_err();
        match err {
            CatalogError::JoinKeyMismatch {
                stage,
                kind,
                dropped,
                input,
                obsids,
            } => {
                assert_eq!(stage, STAGE_GROUND);
                assert_eq!(kind, MarkingKind::Fan);
                assert_eq!((dropped, input), (1, 2));
                assert_eq!(obsids, vec![OBSID.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(logs_contain("join dropped rows"));

        let report = fixture.merger(&points).with_max_join_drops(1).merge().unwrap();
        let fan = report.kind(MarkingKind::Fan).unwrap();
        assert_eq!(fan.ground_join.dropped, 1);
        assert_eq!(fan.ground_join.row_delta(), -1);
        assert_eq!(fan.row_delta(), -1);
    }

    #[test]
    fn test_join_losing_everything_fails_regardless_of_tolerance() {
        let fans = [fan_row("F000000", 10.5, 20.25, "")];
        let blotches = [blotch_row("B000000", 10.5, 20.25)];
        let fixture = Fixture::new(&[fans[0].as_str()], &[blotches[0].as_str()]);
        let err = fixture
            .merger(&[(99.0, 99.0)])
            .with_max_join_drops(100)
            .merge()
            .unwrap_err();
        assert!(matches!(err, CatalogError::EmptyJoin { input: 1, .. }));
    }

    #[test]
    fn test_missing_metadata_obsid_is_counted() {
        let fans = [
            fan_row("F000000", 10.5, 20.25, ""),
            fan_row("F000001", 10.5, 20.25, "").replace(OBSID, "ESP_000000_0000"),
        ];
        let blotches = [blotch_row("B000000", 10.5, 20.25)];
        let fixture = Fixture::new(
            &fans.iter().map(String::as_str).collect::<Vec<_>>(),
            &[blotches[0].as_str()],
        );
        let err = fixture.merger(&[(10.5, 20.25)]).merge().unwrap_err();
        assert!(matches!(
            err,
            CatalogError::JoinKeyMismatch { ref obsids, .. } if obsids == &["ESP_000000_0000"]
        ));
        let report = fixture.merger(&[(10.5, 20.25)]).with_max_join_drops(1).merge().unwrap();
        assert_eq!(report.kind(MarkingKind::Fan).unwrap().metadata_join.dropped, 1);
    }

    #[test]
    fn test_missing_candidate_file() {
        let fixture = Fixture::new(&[], &[]);
        fs::remove_file(fixture.layout.aggregate_path(MarkingKind::Blotch)).unwrap();
        let err = fixture.merger(&[]).merge().unwrap_err();
        assert!(matches!(err, CatalogError::MissingSourceFile { .. }));
    }

    #[test]
    fn test_projector_failure_names_obsid() {
        let fans = [fan_row("F000000", 10.5, 20.25, "")];
        let blotches = [blotch_row("B000000", 10.5, 20.25)];
        let fixture = Fixture::new(&[fans[0].as_str()], &[blotches[0].as_str()]);
        let merger = CatalogMerger::new(fixture.layout.clone(), Arc::new(MapProjector(HashMap::new())));
        let err = merger.merge().unwrap_err();
        assert_eq!(err.obsid(), Some(OBSID));
    }
}

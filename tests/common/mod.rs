//! Mock engines and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use planet4_catalog::config::CatalogConfig;
use planet4_catalog::engine::{ClusterEngine, Fnotcher};
use planet4_catalog::ids::{TileCandidates, UnitCandidates};
use planet4_catalog::layout::{CatalogLayout, ObsidWorkUnit};
use planet4_catalog::markings::{tile_to_image_coords, Blotch, Fan};
use tempfile::TempDir;

pub const ESP: &str = "ESP_011350_0945";
pub const PSP: &str = "PSP_003092_0985";

/// Tiles of every mock observation: id, x_tile, y_tile.
pub const TILES: [(&str, u32, u32); 2] = [("APF0000001", 1, 1), ("APF0000002", 2, 1)];
pub const FAN_POSITION: (f64, f64) = (100.0, 200.0);
pub const BLOTCH_POSITION: (f64, f64) = (300.0, 400.0);

pub fn fan(obsid: &str, tile: &str, x_tile: u32, y_tile: u32) -> Fan {
    let (x, y) = FAN_POSITION;
    let (image_x, image_y) = tile_to_image_coords(x, y, x_tile, y_tile);
    Fan {
        marking_id: None,
        image_id: tile.to_string(),
        obsid: obsid.to_string(),
        x,
        y,
        image_x,
        image_y,
        x_tile,
        y_tile,
        // Out of range on purpose: staging normalizes it.
        angle: -90.0,
        spread: 40.0,
        distance: 60.0,
        x_angle: 0.0,
        y_angle: -1.0,
        n_votes: 7,
        version: 1,
        vote_ratio: None,
    }
}

pub fn blotch(obsid: &str, tile: &str, x_tile: u32, y_tile: u32) -> Blotch {
    let (x, y) = BLOTCH_POSITION;
    let (image_x, image_y) = tile_to_image_coords(x, y, x_tile, y_tile);
    Blotch {
        marking_id: None,
        image_id: tile.to_string(),
        obsid: obsid.to_string(),
        x,
        y,
        image_x,
        image_y,
        x_tile,
        y_tile,
        angle: 200.0,
        radius_1: 25.0,
        radius_2: 12.0,
        x_angle: 0.5,
        y_angle: 0.5,
        n_votes: 4,
        version: 1,
        vote_ratio: None,
    }
}

/// One fan and one blotch per tile; can be told to fail for one obsid.
#[derive(Default)]
pub struct MockClusterEngine {
    pub fail_for: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockClusterEngine {
    pub fn failing_for(obsid: &str) -> Self {
        Self {
            fail_for: Some(obsid.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().map(|c| c.clone()).unwrap_or_default();
        calls.sort();
        calls
    }
}

impl ClusterEngine for MockClusterEngine {
    fn cluster(&self, unit: &ObsidWorkUnit) -> Result<UnitCandidates> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(unit.obsid.clone());
        }
        if self.fail_for.as_deref() == Some(unit.obsid.as_str()) {
            bail!("DBSCAN exploded");
        }
        // Tiles deliberately out of order.
        let tiles = TILES
            .iter()
            .rev()
            .map(|&(tile, x_tile, y_tile)| TileCandidates {
                tile_id: tile.to_string(),
                fans: vec![fan(&unit.obsid, tile, x_tile, y_tile)],
                blotches: vec![blotch(&unit.obsid, tile, x_tile, y_tile)],
            })
            .collect();
        Ok(UnitCandidates {
            obsid: unit.obsid.clone(),
            tiles,
        })
    }
}

/// On the first tile: fans win twice (0.7 and 0.9), blotches lose (0.3).
/// The second tile is never compared.
pub struct MockFnotcher;

impl Fnotcher for MockFnotcher {
    fn fnotch(&self, _unit: &ObsidWorkUnit, tiles: &[TileCandidates]) -> Result<Vec<TileCandidates>> {
        let mut out = Vec::new();
        for tile in tiles {
            let mut tile = tile.clone();
            if tile.tile_id == TILES[0].0 {
                let mut repeated = Vec::new();
                for fan in tile.fans.iter_mut() {
                    fan.vote_ratio = Some(0.7);
                    let mut again = fan.clone();
                    again.vote_ratio = Some(0.9);
                    repeated.push(again);
                }
                tile.fans.extend(repeated);
                for blotch in tile.blotches.iter_mut() {
                    blotch.vote_ratio = Some(0.3);
                }
            }
            out.push(tile);
        }
        Ok(out)
    }
}

/// A catalog root with metadata, tile coordinates and ground files for both mock obsids.
pub struct Workspace {
    pub tmp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let ws = Self {
            tmp: TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}")),
        };
        let layout = ws.layout();
        fs::create_dir_all(layout.savefolder()).unwrap();

        let mut metadata = String::from("OBSERVATION_ID,SOLAR_LONGITUDE,START_TIME,map_scale,north_azimuth\n");
        let mut coords = String::from("image_id,obsid,x_hirise,y_hirise,Sample,Line\n");
        for (obsid, ls) in [(ESP, 187.2), (PSP, 191.9)] {
            metadata.push_str(&format!("{obsid},{ls},2009-01-02T03:04:05,0.5,123.4\n"));
            let mut ground = String::from(
                "Sample,Line,BodyFixedCoordinateX,BodyFixedCoordinateY,BodyFixedCoordinateZ,\
                 PlanetocentricLatitude,PlanetographicLatitude,PositiveEast360Longitude\n",
            );
            for (tile, x_tile, y_tile) in TILES {
                let (cx, cy) = tile_to_image_coords(420.0, 324.0, x_tile, y_tile);
                coords.push_str(&format!("{tile},{obsid},{cx},{cy},{cx},{cy}\n"));
                for (x, y) in [FAN_POSITION, BLOTCH_POSITION] {
                    let (sample, line) = tile_to_image_coords(x, y, x_tile, y_tile);
                    ground.push_str(&format!(
                        "{sample},{line},120.5,210.25,-3370.125,-81.123456789,-81.2,295.5\n"
                    ));
                }
            }
            let path = layout.ground_file(obsid);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, ground).unwrap();
        }
        fs::write(layout.metadata_path(), metadata).unwrap();
        fs::write(layout.tile_coords_path(), coords).unwrap();
        ws
    }

    pub fn config(&self, obsids: &[&str]) -> CatalogConfig {
        CatalogConfig {
            catalog_root: self.tmp.path().to_path_buf(),
            version: "v1.0".to_string(),
            workers: 2,
            obsids: Some(obsids.iter().map(|o| o.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn layout(&self) -> CatalogLayout {
        CatalogLayout::from_config(&self.config(&[]))
    }
}

/// Distinct values of `column` across a published table, and its row count.
pub fn distinct(table: &planet4_catalog::table::Table, column: &str) -> (HashSet<String>, usize) {
    let col = table.column_index(column).unwrap();
    let values = table
        .rows()
        .iter()
        .map(|row| row[col].render(planet4_catalog::table::FloatFormat::Natural))
        .collect();
    (values, table.len())
}

pub fn engines(cluster: Arc<MockClusterEngine>) -> (Arc<dyn ClusterEngine>, Arc<dyn Fnotcher>) {
    (cluster, Arc::new(MockFnotcher))
}

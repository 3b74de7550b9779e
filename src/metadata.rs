//! Observation metadata table preparation.
//!
//! Input is an EDR-index-like table with one row per CCD product. The catalog
//! needs one row per observation with the map scale derived from the binning.

use std::collections::HashSet;
use tracing::info;

use crate::error::AppResult;
use crate::layout::CatalogLayout;
use crate::table::{FloatFormat, Table, Value};

/// Observation key shared by the metadata table and the merge.
pub const OBSERVATION_ID: &str = "OBSERVATION_ID";

const CCD_NAME: &str = "CCD_NAME";
const REFERENCE_CCD: &str = "RED4";
const BINNING: &str = "BINNING";
const MAP_SCALE: &str = "map_scale";
/// Pixel scale in metres of an unbinned HiRISE pixel.
const UNBINNED_SCALE: f64 = 0.25;

const REQUIRED_COLUMNS: [&str; 4] = [OBSERVATION_ID, "SOLAR_LONGITUDE", "north_azimuth", MAP_SCALE];

/// Published column order; columns absent from the input are skipped unless required.
pub const METADATA_COLUMNS: [&str; 8] = [
    OBSERVATION_ID,
    "IMAGE_CENTER_LATITUDE",
    "IMAGE_CENTER_LONGITUDE",
    "SOLAR_LONGITUDE",
    "START_TIME",
    MAP_SCALE,
    "north_azimuth",
    "# of tiles",
];

/// Reduces an EDR index to one metadata row per observation.
///
/// When `obsids` is given, other observations are dropped. Rows of CCDs other
/// than RED4 are ignored if the index has a `CCD_NAME` column.
pub fn prepare_metadata(edr: &Table, obsids: Option<&[String]>) -> AppResult<Table> {
    const CONTEXT: &str = "metadata preparation";
    let id_col = edr.require_column(OBSERVATION_ID, CONTEXT)?;
    let ccd_col = edr.column_index(CCD_NAME);
    let wanted: Option<HashSet<&str>> = obsids.map(|o| o.iter().map(String::as_str).collect());

    let mut table = edr.clone();
    let mut seen = HashSet::new();
    table.retain_rows(|t, i| {
        let row = &t.rows()[i];
        let id = row[id_col].render(FloatFormat::Natural);
        let is_reference = ccd_col.map_or(true, |c| row[c].as_str() == Some(REFERENCE_CCD));
        let is_wanted = wanted.as_ref().map_or(true, |w| w.contains(id.as_str()));
        is_reference && is_wanted && seen.insert(id)
    });

    if !table.has_column(MAP_SCALE) {
        let binning = table.require_column(BINNING, CONTEXT)?;
        let scales = table
            .rows()
            .iter()
            .map(|row| {
                row[binning]
                    .as_f64()
                    .map_or(Value::Missing, |b| Value::Number(UNBINNED_SCALE * b))
            })
            .collect();
        table.set_column_values(MAP_SCALE, scales)?;
    }

    for column in REQUIRED_COLUMNS {
        table.require_column(column, CONTEXT)?;
    }
    let present: Vec<&str> = METADATA_COLUMNS
        .into_iter()
        .filter(|c| table.has_column(c))
        .collect();
    table.select(&present, CONTEXT)
}

/// Writes the metadata table at seven decimal digits.
pub fn write_metadata(layout: &CatalogLayout, metadata: &Table) -> AppResult<()> {
    let path = layout.metadata_path();
    metadata.write_csv(&path, FloatFormat::Fixed(7))?;
    info!(rows = metadata.len(), path = %path.display(), "wrote observation metadata");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use std::fs;
    use tempfile::TempDir;

    fn edr() -> Table {
        let mut t = Table::new([
            OBSERVATION_ID,
            CCD_NAME,
            "BINNING",
            "SOLAR_LONGITUDE",
            "START_TIME",
            "north_azimuth",
            "EXTRA",
        ]);
        for (obsid, ccd, binning, ls) in [
            ("ESP_011350_0945", "RED4", 2, 187.0),
            ("ESP_011350_0945", "RED5", 1, 187.0),
            ("ESP_011350_0945", "RED4", 2, 187.0),
            ("PSP_003092_0985", "RED3", 1, 190.0),
            ("PSP_003092_0985", "RED4", 1, 190.0),
            ("ESP_099999_0900", "RED4", 4, 10.0),
        ] {
            t.push_row(vec![
                Value::from(obsid),
                Value::from(ccd),
                Value::Integer(binning),
                Value::Number(ls),
                Value::from("2009-01-02T03:04:05"),
                Value::Number(123.4),
                Value::from("x"),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_one_row_per_observation_with_map_scale() {
        let obsids = vec!["ESP_011350_0945".to_string(), "PSP_003092_0985".to_string()];
        let meta = prepare_metadata(&edr(), Some(&obsids)).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(
            meta.columns(),
            [OBSERVATION_ID, "SOLAR_LONGITUDE", "START_TIME", MAP_SCALE, "north_azimuth"]
        );
        assert_eq!(meta.get(0, MAP_SCALE), Some(&Value::Number(0.5)));
        assert_eq!(meta.get(1, MAP_SCALE), Some(&Value::Number(0.25)));
    }

    #[test]
    fn test_without_binning_or_azimuth_fails() {
        let mut t = edr();
        t.drop_columns(&["north_azimuth"]);
        let err = prepare_metadata(&t, None).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn { ref column, .. } if column == "north_azimuth"));

        let mut t = edr();
        t.drop_columns(&["BINNING"]);
        assert!(prepare_metadata(&t, None).is_err());
    }

    #[test]
    fn test_written_at_seven_digits() {
        let tmp = TempDir::new().unwrap();
        let layout = CatalogLayout::new(tmp.path(), "v1", 0.5);
        let meta = prepare_metadata(&edr(), None).unwrap();
        assert_eq!(meta.len(), 3);
        write_metadata(&layout, &meta).unwrap();
        let text = fs::read_to_string(layout.metadata_path()).unwrap();
        assert!(text.contains("187.0000000"));
        assert!(text.contains("0.2500000"));
    }
}

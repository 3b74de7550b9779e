//! Region aggregation: per-unit L1C files into one catalog table per kind.

use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::layout::{CatalogLayout, ObsidWorkUnit, Stage};
use crate::markings::MarkingKind;
use crate::table::{FloatFormat, Table, Value};

const INTEGER_COLUMNS: [&str; 3] = ["x_tile", "y_tile", "version"];

/// Row counts written by [`aggregate_region`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Committed units read.
    pub units: usize,
    /// Fan rows written.
    pub fans: usize,
    /// Blotch rows written.
    pub blotches: usize,
}

impl AggregateSummary {
    /// Rows written for `kind`.
    pub fn rows(&self, kind: MarkingKind) -> usize {
        match kind {
            MarkingKind::Fan => self.fans,
            MarkingKind::Blotch => self.blotches,
        }
    }
}

/// Concatenates the cut-applied files of every committed unit.
///
/// Output goes to [`CatalogLayout::aggregate_path`] at two decimal digits. A
/// kind without any rows gets no file; the merge then reports it as missing.
pub fn aggregate_region(layout: &CatalogLayout, units: &[ObsidWorkUnit]) -> AppResult<AggregateSummary> {
    let mut summary = AggregateSummary {
        units: units.len(),
        ..Default::default()
    };
    for kind in MarkingKind::ALL {
        let mut tables = Vec::new();
        for unit in units.iter().filter(|u| u.is_done()) {
            for path in layout.stage_files(&unit.output_dir, Stage::Cut, kind)? {
                let mut table = Table::read_csv(&path)?;
                table.set_column("obsid", Value::from(unit.obsid.as_str()));
                debug!(obsid = %unit.obsid, path = %path.display(), rows = table.len(), "collected");
                tables.push(table);
            }
        }
        let mut combined = Table::concat(tables);
        let rows = combined.len();
        match kind {
            MarkingKind::Fan => summary.fans = rows,
            MarkingKind::Blotch => summary.blotches = rows,
        }
        if rows == 0 {
            warn!(%kind, units = units.len(), "no {} found", kind.plural());
            continue;
        }
        for column in INTEGER_COLUMNS {
            combined.cast_to_integer(column, "region aggregation")?;
        }
        let path = layout.aggregate_path(kind);
        combined.write_csv(&path, FloatFormat::Fixed(2))?;
        info!(%kind, rows, path = %path.display(), "wrote aggregated catalog table");
    }
    Ok(summary)
}

//! Collapsing duplicate fnotch comparison rows.
//!
//! Fnotching compares a candidate with every overlapping candidate of the other
//! kind, so the same `marking_id` can come back several times with different
//! `vote_ratio` values. This happens for a few tenths of a percent of rows and is
//! expected. The resolver keeps one row per id: numeric columns become the
//! unweighted mean over the duplicates, everything else (obsid, tile id) is taken
//! from the first row. Duplicates that disagree on obsid or tile id are two
//! different markings sharing an id and are rejected.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{AppResult, CatalogError};
use crate::table::{FloatFormat, Table, Value};

/// Column holding the marking identifier.
pub const MARKING_ID: &str = "marking_id";

/// Columns that must agree between duplicates of one `marking_id`.
pub const IDENTITY_COLUMNS: [&str; 2] = ["obsid", "image_id"];

/// Outcome counts of one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnotchSummary {
    /// Rows before resolution.
    pub input_rows: usize,
    /// Rows after resolution, one per id.
    pub output_rows: usize,
    /// Ids that appeared more than once.
    pub duplicated_ids: usize,
}

impl FnotchSummary {
    /// Share of input rows that were merged away, in percent.
    pub fn merged_percent(&self) -> f64 {
        if self.input_rows == 0 {
            0.0
        } else {
            100.0 * (self.input_rows - self.output_rows) as f64 / self.input_rows as f64
        }
    }
}

/// Deduplicates fnotch comparison tables by `marking_id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FnotchResolver;

impl FnotchResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// One row per `marking_id`, ordered by id.
    ///
    /// A column counts as numeric when every non-missing cell in it is numeric;
    /// missing cells are skipped when averaging, and a group without any value
    /// stays missing. Fails with `ConflictingMarkingId` when duplicates of one
    /// id disagree on an identity column.
    pub fn resolve(&self, table: &Table) -> AppResult<(Table, FnotchSummary)> {
        let id_col = table.require_column(MARKING_ID, "fnotch resolution")?;
        let identity: Vec<(&str, usize)> = IDENTITY_COLUMNS
            .iter()
            .filter_map(|&name| table.column_index(name).map(|c| (name, c)))
            .collect();

        let numeric: Vec<bool> = (0..table.columns().len())
            .map(|c| {
                c != id_col
                    && table
                        .rows()
                        .iter()
                        .all(|row| matches!(row[c], Value::Missing | Value::Integer(_) | Value::Number(_)))
            })
            .collect();

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in table.rows().iter().enumerate() {
            let key = row[id_col].render(FloatFormat::Natural);
            groups.entry(key).or_default().push(i);
        }

        let mut out = Table::new(table.columns().iter().cloned());
        let mut duplicated_ids = 0;
        for members in groups.values() {
            if members.len() > 1 {
                duplicated_ids += 1;
            }
            let representative = &table.rows()[members[0]];
            for &(name, c) in &identity {
                if let Some(other) = members[1..]
                    .iter()
                    .map(|&m| &table.rows()[m][c])
                    .find(|v| **v != representative[c])
                {
                    return Err(CatalogError::ConflictingMarkingId {
                        marking_id: representative[id_col].render(FloatFormat::Natural),
                        column: name.to_string(),
                        first: representative[c].render(FloatFormat::Natural),
                        other: other.render(FloatFormat::Natural),
                    });
                }
            }
            let row = representative
                .iter()
                .enumerate()
                .map(|(c, value)| {
                    if numeric[c] && members.len() > 1 {
                        mean(members.iter().filter_map(|&m| table.rows()[m][c].as_f64()))
                    } else {
                        value.clone()
                    }
                })
                .collect();
            out.push_row(row)?;
        }

        let summary = FnotchSummary {
            input_rows: table.len(),
            output_rows: out.len(),
            duplicated_ids,
        };
        debug!(
            input = summary.input_rows,
            output = summary.output_rows,
            duplicated_ids = summary.duplicated_ids,
            merged_percent = summary.merged_percent(),
            "merged duplicate fnotch rows"
        );
        Ok((out, summary))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Value {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        Value::Missing
    } else {
        Value::Number(sum / count as f64)
    }
}

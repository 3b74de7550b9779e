//! Deciding which observations still need processing.
//!
//! A unit counts as done when its output directory exists. Units are committed
//! into that directory only after every per-unit stage succeeded, so recomputing
//! the pending set after a crash and rerunning only those units is the whole
//! recovery story. No retry state is carried anywhere else.

use std::collections::BTreeSet;
use tracing::info;

use crate::layout::{CatalogLayout, ObsidWorkUnit};

/// Read-only view over the unit directories of one catalog version.
#[derive(Debug, Clone)]
pub struct WorkUnitTracker {
    layout: CatalogLayout,
}

impl WorkUnitTracker {
    /// Tracker over the units of `layout`.
    pub fn new(layout: CatalogLayout) -> Self {
        Self { layout }
    }

    /// Sorted, de-duplicated units needing (re)processing.
    ///
    /// With `overwrite` every known obsid is returned; otherwise obsids whose
    /// output directory exists are skipped. Only existence checks are performed.
    pub fn pending<S: AsRef<str>>(&self, obsids: &[S], overwrite: bool) -> Vec<ObsidWorkUnit> {
        let known: BTreeSet<&str> = obsids.iter().map(AsRef::as_ref).collect();
        let todo: Vec<ObsidWorkUnit> = known
            .iter()
            .map(|obsid| ObsidWorkUnit::new(&self.layout, obsid))
            .filter(|unit| overwrite || !unit.is_done())
            .collect();
        info!(
            known = known.len(),
            pending = todo.len(),
            overwrite,
            "checked for unprocessed observations"
        );
        todo
    }

    /// Sorted units whose output has already been committed.
    pub fn completed<S: AsRef<str>>(&self, obsids: &[S]) -> Vec<ObsidWorkUnit> {
        let known: BTreeSet<&str> = obsids.iter().map(AsRef::as_ref).collect();
        known
            .iter()
            .map(|obsid| ObsidWorkUnit::new(&self.layout, obsid))
            .filter(ObsidWorkUnit::is_done)
            .collect()
    }

    /// Layout the tracker checks.
    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn obsids(units: &[ObsidWorkUnit]) -> Vec<&str> {
        units.iter().map(|u| u.obsid.as_str()).collect()
    }

    #[test]
    fn test_pending_is_sorted_and_unique() {
        let tmp = TempDir::new().unwrap();
        let tracker = WorkUnitTracker::new(CatalogLayout::new(tmp.path(), "v1", 0.5));
        let todo = tracker.pending(&["C", "A", "B", "A"], false);
        assert_eq!(obsids(&todo), ["A", "B", "C"]);
    }

    #[test]
    fn test_existing_output_is_skipped_unless_overwrite() {
        let tmp = TempDir::new().unwrap();
        let layout = CatalogLayout::new(tmp.path(), "v1", 0.5);
        fs::create_dir_all(layout.unit_dir("A")).unwrap();
        let tracker = WorkUnitTracker::new(layout);

        assert_eq!(obsids(&tracker.pending(&["A", "B"], false)), ["B"]);
        assert_eq!(obsids(&tracker.pending(&["A", "B"], true)), ["A", "B"]);
        assert_eq!(obsids(&tracker.completed(&["A", "B"])), ["A"]);
    }

    #[test]
    fn test_staging_leftovers_do_not_count_as_done() {
        let tmp = TempDir::new().unwrap();
        let layout = CatalogLayout::new(tmp.path(), "v1", 0.5);
        fs::create_dir_all(layout.staging_dir("A")).unwrap();
        let tracker = WorkUnitTracker::new(layout);
        assert_eq!(obsids(&tracker.pending(&["A"], false)), ["A"]);
    }

    #[test]
    fn test_missing_catalog_root_is_not_an_error() {
        let tracker = WorkUnitTracker::new(CatalogLayout::new("/nonexistent/p4", "v1", 0.5));
        assert_eq!(tracker.pending(&["A"], false).len(), 1);
    }
}

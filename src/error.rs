//! Custom error types for catalog production.
//!
//! This module defines the primary error type, `CatalogError`, for the whole pipeline.
//! Using the `thiserror` crate, it provides one consistent way to report failures,
//! from missing source tables and join discrepancies to exhausted identifier space.
//!
//! ## Error Hierarchy
//!
//! - **`MissingSourceFile`**: a candidate, metadata or coordinate table could not be found.
//!   Fatal for the stage that needed it.
//! - **`JoinKeyMismatch`** / **`EmptyJoin`**: a join silently lost rows because of key or
//!   precision mismatches. Raised as soon as the dropped-row count exceeds the configured
//!   tolerance, or unconditionally when a non-empty input joins to nothing.
//! - **`IdentifierExhaustion`**: the `16^6` identifier space of one marking kind is used up.
//!   An operator has to intervene.
//! - **`UnitFailure`**: one observation failed inside a per-unit stage. Carries the obsid
//!   and the stage so a resumed run can be targeted.
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic validation
//!   errors respectively.
//!
//! By using `#[from]`, `CatalogError` can be created from the underlying I/O and CSV errors
//! with the `?` operator.

use crate::markings::MarkingKind;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the catalog error type.
pub type AppResult<T> = std::result::Result<T, CatalogError>;

/// Primary error type for catalog production.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Figment could not parse or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but is inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unwritable CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A catalog table the stage needs does not exist.
    #[error("Catalog source not found: no {what} in {}", searched.display())]
    MissingSourceFile { what: String, searched: PathBuf },

    /// No dated file in a directory.
    #[error("No dated files matching '{pattern}' in {}", dir.display())]
    NoDatedFiles { dir: PathBuf, pattern: String },

    #[error(
        "Join key mismatch in stage '{stage}' for {kind}: {dropped} of {input} rows dropped (obsids: {})",
        obsids.join(", ")
    )]
    /// A join dropped more rows than tolerated.
    JoinKeyMismatch {
        stage: String,
        kind: MarkingKind,
        dropped: usize,
        input: usize,
        obsids: Vec<String>,
    },

    /// A non-empty input joined to nothing.
    #[error("Join in stage '{stage}' for {kind} produced no rows from {input} input rows")]
    EmptyJoin {
        stage: String,
        kind: MarkingKind,
        input: usize,
    },

    /// All `16^6` ids of a kind are used.
    #[error("Marking identifiers exhausted for {kind}")]
    IdentifierExhaustion { kind: MarkingKind },

    /// Text that is not a marking id.
    #[error("Invalid marking id '{0}'")]
    InvalidMarkingId(String),

    /// Two different markings carry the same id.
    #[error("Marking id '{marking_id}' is shared by different markings: {column} '{first}' and '{other}'")]
    ConflictingMarkingId {
        marking_id: String,
        column: String,
        first: String,
        other: String,
    },

    /// An id was assigned to a marking that already had one.
    #[error("Marking already has id '{current}', refusing to assign '{attempted}'")]
    MarkingIdReassigned { current: String, attempted: String },

    /// One observation failed in a per-unit stage.
    #[error("Unit '{obsid}' failed during {stage}: {message}")]
    UnitFailure {
        obsid: String,
        stage: String,
        message: String,
    },

    /// A required column is absent.
    #[error("Missing column '{column}' in {context}")]
    MissingColumn { column: String, context: String },

    /// A cell could not be interpreted.
    #[error("Invalid value '{value}' in column '{column}' of {context}")]
    InvalidValue {
        column: String,
        value: String,
        context: String,
    },

    /// A worker task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for CatalogError {
    fn from(value: figment::Error) -> Self {
        CatalogError::Config(Box::new(value))
    }
}

impl CatalogError {
    /// Wraps a failure reported by an external engine for one observation.
    pub fn unit_failure(
        obsid: impl Into<String>,
        stage: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        CatalogError::UnitFailure {
            obsid: obsid.into(),
            stage: stage.into(),
            message: err.to_string(),
        }
    }

    /// Observation id this error is attributed to, if any.
    pub fn obsid(&self) -> Option<&str> {
        match self {
            CatalogError::UnitFailure { obsid, .. } => Some(obsid),
            _ => None,
        }
    }

    /// Whether re-running the driver can be expected to make progress.
    ///
    /// Unit failures and I/O hiccups are retried by resuming the run; exhausted
    /// identifiers, bad configuration and join discrepancies need a human.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            CatalogError::UnitFailure { .. } | CatalogError::Io(_) | CatalogError::Join(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_failure_names_obsid_and_stage() {
        let err = CatalogError::unit_failure("ESP_011350_0945", "clustering", "boom");
        let msg = err.to_string();
        assert!(msg.contains("ESP_011350_0945"));
        assert!(msg.contains("clustering"));
        assert_eq!(err.obsid(), Some("ESP_011350_0945"));
        assert!(err.is_resumable());
    }

    #[test]
    fn test_join_mismatch_lists_obsids() {
        let err = CatalogError::JoinKeyMismatch {
            stage: "ground coordinates".into(),
            kind: MarkingKind::Fan,
            dropped: 2,
            input: 10,
            obsids: vec!["A".into(), "B".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 of 10"));
        assert!(msg.contains("A, B"));
        assert!(!err.is_resumable());
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let err = CatalogError::IdentifierExhaustion {
            kind: MarkingKind::Blotch,
        };
        assert!(!err.is_resumable());
        assert_eq!(err.to_string(), "Marking identifiers exhausted for blotch");
    }

    #[test]
    fn test_conflicting_id_names_both_values() {
        let err = CatalogError::ConflictingMarkingId {
            marking_id: "F000000".into(),
            column: "obsid".into(),
            first: "ESP_1".into(),
            other: "PSP_2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("F000000") && msg.contains("ESP_1") && msg.contains("PSP_2"));
        assert!(!err.is_resumable());
    }
}

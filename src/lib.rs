//! # Planet Four Catalog Production
//!
//! This crate turns per-tile clustering output of crowd-sourced fan and blotch
//! markings into the published Planet Four catalog. It owns the parts of the
//! pipeline where correctness is decided: resumable per-observation work units,
//! globally unique marking identifiers, averaging of repeated fnotch results, and
//! the precision-sensitive joins with observation metadata and ground coordinates.
//! Clustering, fnotching and ground projection themselves are external engines
//! reached through the traits in [`engine`].
//!
//! ## Crate Structure
//!
//! - **`error`**: the `CatalogError` enum and `AppResult` alias used throughout.
//! - **`config`**: `CatalogConfig`, loaded with figment from defaults, TOML and environment.
//! - **`logging`**: tracing-subscriber setup.
//! - **`markings`**: fan and blotch records and their geometry.
//! - **`ids`**: marking identifiers and their sequential allocation.
//! - **`layout`**: on-disk layout of a catalog version and the `ObsidWorkUnit`.
//! - **`tracker`**: `WorkUnitTracker`, which decides what still needs processing.
//! - **`table`**: small CSV-backed table used by the catalog-level stages.
//! - **`fnotch`**: `FnotchResolver`, collapsing repeated fnotch rows.
//! - **`executor`**: `WorkerPool` running per-unit jobs and reporting partial batches.
//! - **`engine`**: traits for the external clustering, fnotching and projection engines.
//! - **`aggregate`**: per-unit outputs into catalog-level candidate tables.
//! - **`metadata`**: observation metadata table preparation.
//! - **`merger`**: `CatalogMerger`, the staged join into the published tables.
//! - **`production`**: `CatalogProduction`, the driver wiring all of the above.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fnotch;
pub mod ids;
pub mod layout;
pub mod logging;
pub mod markings;
pub mod merger;
pub mod metadata;
pub mod production;
pub mod table;
pub mod tracker;

pub use error::{AppResult, CatalogError};

//! Catalog production configuration using Figment.
//!
//! Configuration is one explicit value built by the caller and passed to every
//! component; nothing reads it from a global. Sources, in increasing priority:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables (prefixed with `P4_CATALOG_`)
//!
//! # Example
//! ```no_run
//! use planet4_catalog::config::CatalogConfig;
//!
//! let config = CatalogConfig::load_from("catalog.toml")?;
//! config.validate()?;
//! println!("Producing catalog {}", config.version);
//! # Ok::<(), planet4_catalog::error::CatalogError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, CatalogError};

const ENV_PREFIX: &str = "P4_CATALOG_";

/// Top-level configuration of one production run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory under which every catalog version lives
    pub catalog_root: PathBuf,
    /// Catalog version, also the name of the version directory
    pub version: String,
    /// Reprocess observations that already have output
    #[serde(default)]
    pub overwrite: bool,
    /// Minimum vote ratio for a candidate to enter the final catalog
    #[serde(default = "default_cut")]
    pub cut: f64,
    /// Number of concurrent per-unit workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows a metadata or coordinate join may drop before the merge fails
    #[serde(default)]
    pub max_join_drops: usize,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Observations to process; discovered from `database_dir` when absent
    #[serde(default)]
    pub obsids: Option<Vec<String>>,
    /// Directory with dated marking database files
    #[serde(default)]
    pub database_dir: Option<PathBuf>,
}

// Default value functions
fn default_cut() -> f64 {
    0.5
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_root: PathBuf::from("catalog"),
            version: "v1.0".to_string(),
            overwrite: false,
            cut: default_cut(),
            workers: default_workers(),
            max_join_drops: 0,
            log_level: default_log_level(),
            obsids: None,
            database_dir: None,
        }
    }
}

impl CatalogConfig {
    /// Loads defaults overridden by `P4_CATALOG_*` environment variables.
    pub fn load() -> AppResult<Self> {
        Ok(Self::figment().merge(Env::prefixed(ENV_PREFIX)).extract()?)
    }

    /// Loads defaults, then the TOML file at `path`, then the environment.
    ///
    /// Environment variables override the file, e.g. `P4_CATALOG_OVERWRITE=true`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(CatalogConfig::default()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(CatalogError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.version.trim().is_empty() {
            return Err(CatalogError::Configuration(
                "version cannot be empty".to_string(),
            ));
        }
        if self.version.contains(['/', '\\']) {
            return Err(CatalogError::Configuration(format!(
                "version '{}' must not contain path separators",
                self.version
            )));
        }

        if !(0.0..=1.0).contains(&self.cut) {
            return Err(CatalogError::Configuration(format!(
                "Invalid cut {}. Must be within 0..=1",
                self.cut
            )));
        }

        if self.workers == 0 {
            return Err(CatalogError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }

        if let Some(obsids) = &self.obsids {
            let mut seen = HashSet::new();
            for obsid in obsids {
                if !seen.insert(obsid) {
                    return Err(CatalogError::Configuration(format!(
                        "Duplicate obsid: {obsid}"
                    )));
                }
            }
        }

        Ok(())
    }
}

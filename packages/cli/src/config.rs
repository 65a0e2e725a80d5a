//! TOML configuration for a full pipeline run.
//!
//! ```toml
//! output_dir = "out"
//!
//! [inputs]
//! plots = "plots.geojson"
//! id_column = "id"
//! raster = "forest_2023.band"
//! protected_areas = "protected.geojson"
//! farming_frontier = "frontier.geojson"
//! movements = "movements.csv"
//! entities = "entities.csv"
//! mapping = "plot_entity.csv"
//!
//! [options]
//! deforested_class = 2
//! worker_count = 4
//! backing = "auto"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};

use forest_alert_overlay::OverlayOptions;
use forest_alert_raster::models::BackingKind;
use serde::{Deserialize, Serialize};

/// Property holding the plot id when none is configured.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Errors raised while loading a pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_owned()
}

/// Input files of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputPaths {
    /// `GeoJSON` plot layer.
    pub plots: PathBuf,
    /// Feature property holding the plot id.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Classification band file.
    pub raster: PathBuf,
    /// Protected-area layer; absent means no protected areas.
    #[serde(default)]
    pub protected_areas: Option<PathBuf>,
    /// Farming frontier layer; absent means no frontier.
    #[serde(default)]
    pub farming_frontier: Option<PathBuf>,
    /// Movement table.
    pub movements: PathBuf,
    /// Entity master table.
    pub entities: PathBuf,
    /// Plot-to-entity mapping table.
    pub mapping: PathBuf,
}

/// A full pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    /// Directory receiving the three output tables.
    pub output_dir: PathBuf,
    /// Stage tunables; `worker_count` applies to every stage.
    #[serde(default)]
    pub options: OverlayOptions,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub worker_count: Option<usize>,
    pub deforested_class: Option<i64>,
    pub backing: Option<BackingKind>,
    pub output_dir: Option<PathBuf>,
    pub id_column: Option<String>,
}

impl PipelineConfig {
    /// Reads a configuration file and resolves its relative paths.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        log::debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Parses configuration text without touching paths.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the text is not a valid configuration.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        let inputs = &mut self.inputs;
        resolve(&mut inputs.plots);
        resolve(&mut inputs.raster);
        resolve(&mut inputs.movements);
        resolve(&mut inputs.entities);
        resolve(&mut inputs.mapping);
        if let Some(path) = inputs.protected_areas.as_mut() {
            resolve(path);
        }
        if let Some(path) = inputs.farming_frontier.as_mut() {
            resolve(path);
        }
        resolve(&mut self.output_dir);
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(workers) = overrides.worker_count {
            self.options.worker_count = workers;
        }
        if let Some(class) = overrides.deforested_class {
            self.options.deforested_class = class;
        }
        if let Some(backing) = overrides.backing {
            self.options.backing = backing;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if let Some(column) = overrides.id_column {
            self.inputs.id_column = column;
        }
    }
}

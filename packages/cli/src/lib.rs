#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Stage orchestration behind the `forest_alert` binary.
//!
//! Each stage can run on its own from files on disk, or all three can run
//! in sequence from a [`config::PipelineConfig`]. Inputs are loaded and
//! their schemas checked before the raster is opened.

pub mod config;
pub mod pipeline;

use forest_alert_entity::EntityError;
use forest_alert_movement::MovementError;
use forest_alert_overlay::OverlayError;
use forest_alert_parallel::ParallelError;
use forest_alert_raster::RasterError;
use forest_alert_table::TableError;

use crate::config::ConfigError;

/// Errors surfaced by the command-line stages.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Parallel(#[from] ParallelError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

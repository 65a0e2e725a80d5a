//! Runs the three stages from files, alone or chained.
//!
//! A chained run reads every tabular input before the raster is opened, so
//! a missing column fails the run before any overlay work starts.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use forest_alert_cli_utils::{IndicatifProgress, MultiProgress};
use forest_alert_entity::aggregate_by_entity_with_progress;
use forest_alert_models::{
    DirectMetrics, Entity, EntityAggregate, MovementEdge, PlotAlerts, PlotEntityLink,
};
use forest_alert_movement::{
    compute_indirect_metrics_with_progress, isolated_plots, merge_indirect,
};
use forest_alert_overlay::{
    OverlayOptions, check_unique_ids, compute_direct_metrics_with_progress,
};
use forest_alert_parallel::check_worker_count;
use forest_alert_parallel::progress::{ProgressCallback, null_progress};
use forest_alert_raster::RasterGrid;
use forest_alert_table::{layers, read, write};

use crate::CliError;
use crate::config::{InputPaths, PipelineConfig};

/// Output file of the overlay stage inside the output directory.
pub const DIRECT_METRICS_FILE: &str = "direct_metrics.csv";
/// Output file of the movement stage.
pub const PLOT_ALERTS_FILE: &str = "plot_alerts.csv";
/// Output file of the entity stage.
pub const ENTITY_ALERTS_FILE: &str = "entity_alerts.csv";

/// Where stage progress is drawn.
#[derive(Clone, Copy)]
pub struct Progress<'a>(Option<&'a MultiProgress>);

impl<'a> Progress<'a> {
    /// Draws nothing.
    #[must_use]
    pub const fn hidden() -> Self {
        Self(None)
    }

    /// Draws bars on `multi`.
    #[must_use]
    pub const fn on(multi: &'a MultiProgress) -> Self {
        Self(Some(multi))
    }

    fn plots(self, message: &str) -> Arc<dyn ProgressCallback> {
        self.0
            .map_or_else(null_progress, |multi| IndicatifProgress::plots_bar(multi, message))
    }

    fn chunks(self, message: &str) -> Arc<dyn ProgressCallback> {
        self.0
            .map_or_else(null_progress, |multi| IndicatifProgress::chunks_bar(multi, message))
    }

    fn steps(self, message: &str, total: u64) -> Arc<dyn ProgressCallback> {
        self.0.map_or_else(null_progress, |multi| {
            IndicatifProgress::steps_bar(multi, message, total)
        })
    }
}

/// Inputs of the overlay stage.
#[derive(Debug, Clone, Copy)]
pub struct DirectInputs<'a> {
    pub plots: &'a Path,
    pub id_column: &'a str,
    pub raster: &'a Path,
    pub protected_areas: Option<&'a Path>,
    pub farming_frontier: Option<&'a Path>,
}

impl<'a> From<&'a InputPaths> for DirectInputs<'a> {
    fn from(inputs: &'a InputPaths) -> Self {
        Self {
            plots: &inputs.plots,
            id_column: &inputs.id_column,
            raster: &inputs.raster,
            protected_areas: inputs.protected_areas.as_deref(),
            farming_frontier: inputs.farming_frontier.as_deref(),
        }
    }
}

/// Loads the vector inputs, then the raster, and computes direct metrics.
///
/// # Errors
///
/// Returns [`CliError`] if an input cannot be loaded or the stage fails.
pub fn run_direct(
    inputs: &DirectInputs<'_>,
    options: &OverlayOptions,
    progress: Progress<'_>,
) -> Result<Vec<DirectMetrics>, CliError> {
    check_worker_count(options.worker_count)?;

    let plots = layers::load_plots(inputs.plots, inputs.id_column)?;
    check_unique_ids(&plots)?;
    let protected = layers::load_layer(inputs.protected_areas)?;
    let farming = layers::load_layer(inputs.farming_frontier)?;

    let raster = RasterGrid::open(inputs.raster)?;
    let bar = progress.plots("Overlaying plots");
    Ok(compute_direct_metrics_with_progress(
        &plots,
        &raster,
        &protected,
        &farming,
        options,
        bar.as_ref(),
    )?)
}

/// Propagates direct alerts over the movement network and merges the flags
/// onto the direct metrics, sorted by plot id.
///
/// # Errors
///
/// Returns [`CliError::Movement`] if the stage fails.
pub fn run_indirect(
    direct: &[DirectMetrics],
    edges: &[MovementEdge],
    worker_count: usize,
    progress: Progress<'_>,
) -> Result<Vec<PlotAlerts>, CliError> {
    let isolated = isolated_plots(direct, edges);
    if !isolated.is_empty() {
        log::info!(
            "{} of {} plots appear in no movement",
            isolated.len(),
            direct.len()
        );
    }

    let bar = progress.chunks("Propagating alerts");
    let indirect =
        compute_indirect_metrics_with_progress(direct, edges, worker_count, bar.as_ref())?;

    let mut alerts = merge_indirect(direct, &indirect);
    alerts.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(alerts)
}

/// Aggregates plot alerts per entity.
///
/// # Errors
///
/// Returns [`CliError::Entity`] if the stage fails.
pub fn run_entity(
    plots: &[PlotAlerts],
    entities: &[Entity],
    mapping: &[PlotEntityLink],
    worker_count: usize,
    progress: Progress<'_>,
) -> Result<Vec<EntityAggregate>, CliError> {
    let bar = progress.chunks("Aggregating entities");
    Ok(aggregate_by_entity_with_progress(
        plots,
        entities,
        mapping,
        worker_count,
        bar.as_ref(),
    )?)
}

/// Counts reported at the end of a chained run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub plots: usize,
    pub direct_alerts: usize,
    pub indirect_alerts: usize,
    pub entities: usize,
    pub entity_alerts: usize,
}

/// Runs all three stages and writes their tables to `config.output_dir`.
///
/// # Errors
///
/// Returns [`CliError`] for the first input, stage or output that fails.
pub fn run_pipeline(
    config: &PipelineConfig,
    progress: Progress<'_>,
) -> Result<PipelineSummary, CliError> {
    let start = Instant::now();
    let workers = config.options.worker_count;
    check_worker_count(workers)?;

    // ── Tabular inputs ──────────────────────────────────────────────────
    let edges = read::read_file(&config.inputs.movements, read::read_movements)?;
    let entities = read::read_file(&config.inputs.entities, read::read_entities)?;
    let mapping = read::read_file(&config.inputs.mapping, read::read_mapping)?;

    let steps = progress.steps("Pipeline", 3);

    // ── Stage 1: direct ─────────────────────────────────────────────────
    steps.set_message("Direct alerts".to_string());
    let direct = run_direct(&DirectInputs::from(&config.inputs), &config.options, progress)?;
    write::write_file(&config.output_dir.join(DIRECT_METRICS_FILE), |file| {
        write::write_direct_metrics(file, &direct)
    })?;
    steps.inc(1);

    // ── Stage 2: indirect ───────────────────────────────────────────────
    steps.set_message("Indirect alerts".to_string());
    let alerts = run_indirect(&direct, &edges, workers, progress)?;
    write::write_file(&config.output_dir.join(PLOT_ALERTS_FILE), |file| {
        write::write_plot_alerts(file, &alerts)
    })?;
    steps.inc(1);

    // ── Stage 3: entities ───────────────────────────────────────────────
    steps.set_message("Entity alerts".to_string());
    let aggregates = run_entity(&alerts, &entities, &mapping, workers, progress)?;
    write::write_file(&config.output_dir.join(ENTITY_ALERTS_FILE), |file| {
        write::write_entity_aggregates(file, &aggregates)
    })?;
    steps.inc(1);

    let summary = PipelineSummary {
        plots: direct.len(),
        direct_alerts: direct.iter().filter(|m| m.alert_direct).count(),
        indirect_alerts: alerts.iter().filter(|a| a.alert_in || a.alert_out).count(),
        entities: aggregates.len(),
        entity_alerts: aggregates.iter().filter(|a| a.alert).count(),
    };

    let elapsed = start.elapsed();
    steps.finish(format!("Pipeline finished in {:.1}s", elapsed.as_secs_f64()));
    log::info!(
        "Pipeline finished in {:.1}s: {} plots ({} direct, {} indirect alerts), {} entities ({} alerted)",
        elapsed.as_secs_f64(),
        summary.plots,
        summary.direct_alerts,
        summary.indirect_alerts,
        summary.entities,
        summary.entity_alerts
    );

    Ok(summary)
}

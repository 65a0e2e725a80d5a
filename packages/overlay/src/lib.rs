#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-plot overlay of a classification raster and two polygon layers.
//!
//! [`compute_direct_metrics`] distributes the raster through a single
//! [`WindowSource`] backing, builds one [`WorkerContext`] shared by every
//! worker, and evaluates one plot per task. Output is sorted by plot id, so
//! the result does not depend on the worker count or completion order.

use std::collections::HashSet;

use forest_alert_models::{DirectMetrics, RecordId};
use forest_alert_parallel::progress::{NullProgress, ProgressCallback};
use forest_alert_parallel::{ParallelError, WorkerPool, check_worker_count};
use forest_alert_raster::backing::{WindowSource, select_backing};
use forest_alert_raster::mask::coverage_mask;
use forest_alert_raster::models::BackingKind;
use forest_alert_raster::window::window_for_bounds;
use forest_alert_raster::{RasterError, RasterGrid};
use forest_alert_spatial::{Plot, UnionLayer};
use serde::{Deserialize, Serialize};

/// Class code marking deforested cells unless configured otherwise.
pub const DEFAULT_DEFORESTED_CLASS: i64 = 2;

/// Worker count used unless configured otherwise.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Errors that can occur during the overlay stage.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Two plots share an identifier.
    #[error("Duplicate plot id {0}")]
    DuplicatePlotId(RecordId),

    /// The worker pool could not be set up.
    #[error(transparent)]
    Parallel(#[from] ParallelError),

    /// The raster backing could not be set up.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// A worker failed while evaluating a plot.
    #[error("Overlay failed for plot {id}: {source}")]
    Plot {
        /// The plot being evaluated.
        id: RecordId,
        /// What went wrong.
        #[source]
        source: RasterError,
    },
}

/// Tunables for [`compute_direct_metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    /// Raster class code counted as deforested.
    pub deforested_class: i64,
    /// Number of worker threads; must be at least 1.
    pub worker_count: usize,
    /// How the raster is shared with workers.
    pub backing: BackingKind,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            deforested_class: DEFAULT_DEFORESTED_CLASS,
            worker_count: DEFAULT_WORKER_COUNT,
            backing: BackingKind::Auto,
        }
    }
}

/// Read-only state shared by every overlay worker for one call.
pub struct WorkerContext<'a> {
    raster: &'a dyn WindowSource,
    protected: &'a UnionLayer,
    farming: &'a UnionLayer,
    deforested_class: i64,
}

impl<'a> WorkerContext<'a> {
    #[must_use]
    pub fn new(
        raster: &'a dyn WindowSource,
        protected: &'a UnionLayer,
        farming: &'a UnionLayer,
        deforested_class: i64,
    ) -> Self {
        Self {
            raster,
            protected,
            farming,
            deforested_class,
        }
    }

    /// Evaluates one plot.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the plot's raster window cannot be read.
    pub fn plot_metrics(&self, plot: &Plot) -> Result<DirectMetrics, RasterError> {
        let plot_area_ha = plot.area_ha();
        let deforested_ha = self.deforested_area_ha(plot)?;
        let protected_ha = self.protected.intersection_area_ha(&plot.geometry);
        let farming_ha = self.farming.intersection_area_ha(&plot.geometry);

        Ok(direct_metrics(
            plot.id.clone(),
            plot_area_ha,
            deforested_ha,
            protected_ha,
            farming_ha,
        ))
    }

    /// Area of covered cells carrying the deforested class.
    fn deforested_area_ha(&self, plot: &Plot) -> Result<f64, RasterError> {
        let Some(bounds) = plot.bounds() else {
            return Ok(0.0);
        };

        let header = self.raster.header();
        let window = window_for_bounds(&bounds, header);
        if window.is_empty() {
            return Ok(0.0);
        }

        let cells = self.raster.read_window(window)?;
        let mask = coverage_mask(
            &plot.geometry,
            &header.transform.for_window(&window),
            window.height(),
            window.width(),
        );

        let deforested = cells
            .cells()
            .iter()
            .zip(mask.as_slice())
            .filter(|&(&cell, &covered)| {
                covered && cell == self.deforested_class && Some(cell) != header.nodata
            })
            .count();

        #[allow(clippy::cast_precision_loss)]
        Ok(deforested as f64 * header.transform.pixel_area_ha())
    }
}

/// Builds a metrics row from measured areas (all in hectares).
///
/// Farming overlap is capped at the plot area so the in/out split always
/// sums to the plot area. Proportions are `0.0` for plots without area and
/// are kept within `[0, 1]`.
#[must_use]
pub fn direct_metrics(
    id: RecordId,
    plot_area_ha: f64,
    deforested_area_ha: f64,
    protected_area_ha: f64,
    farming_intersection_ha: f64,
) -> DirectMetrics {
    let farming_in_area_ha = farming_intersection_ha.min(plot_area_ha);
    let farming_out_area_ha = (plot_area_ha - farming_in_area_ha).max(0.0);
    let proportion = |area: f64| {
        if plot_area_ha > 0.0 {
            (area / plot_area_ha).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    DirectMetrics {
        id,
        plot_area_ha,
        deforested_area_ha,
        deforested_proportion: proportion(deforested_area_ha),
        protected_area_ha,
        protected_proportion: proportion(protected_area_ha),
        farming_in_area_ha,
        farming_in_proportion: proportion(farming_in_area_ha),
        farming_out_area_ha,
        farming_out_proportion: proportion(farming_out_area_ha),
        alert_direct: deforested_area_ha > 0.0,
    }
}

/// Computes [`DirectMetrics`] for every plot, sorted by plot id.
///
/// # Errors
///
/// See [`compute_direct_metrics_with_progress`].
pub fn compute_direct_metrics(
    plots: &[Plot],
    raster: &RasterGrid,
    protected: &UnionLayer,
    farming: &UnionLayer,
    options: &OverlayOptions,
) -> Result<Vec<DirectMetrics>, OverlayError> {
    compute_direct_metrics_with_progress(plots, raster, protected, farming, options, &NullProgress)
}

/// Computes [`DirectMetrics`] for every plot, sorted by plot id, ticking
/// `progress` once per plot.
///
/// Inputs are validated before the raster backing or worker pool is set up.
/// The backing is released before returning, on success or failure.
///
/// # Errors
///
/// Returns [`OverlayError`] for a zero worker count, duplicate plot ids, a
/// backing that cannot be set up, or the first plot that fails.
pub fn compute_direct_metrics_with_progress(
    plots: &[Plot],
    raster: &RasterGrid,
    protected: &UnionLayer,
    farming: &UnionLayer,
    options: &OverlayOptions,
    progress: &dyn ProgressCallback,
) -> Result<Vec<DirectMetrics>, OverlayError> {
    check_worker_count(options.worker_count)?;
    check_unique_ids(plots)?;

    log::info!(
        "Computing direct metrics for {} plots with {} workers (deforested class {})",
        plots.len(),
        options.worker_count,
        options.deforested_class
    );

    let pool = WorkerPool::new(options.worker_count)?;
    let backing = select_backing(raster, options.backing)?;
    let context = WorkerContext::new(
        backing.as_ref(),
        protected,
        farming,
        options.deforested_class,
    );

    progress.set_total(plots.len() as u64);
    progress.set_message("Overlaying plots".to_string());

    let mut metrics = pool.map(plots, |plot| {
        let row = context
            .plot_metrics(plot)
            .map_err(|source| OverlayError::Plot {
                id: plot.id.clone(),
                source,
            })?;
        progress.inc(1);
        Ok::<_, OverlayError>(row)
    })?;

    metrics.sort_by(|a, b| a.id.cmp(&b.id));

    let alerted = metrics.iter().filter(|m| m.alert_direct).count();
    progress.finish(format!("{alerted} of {} plots with direct alerts", metrics.len()));
    log::info!(
        "Direct metrics done: {alerted} of {} plots alerted",
        metrics.len()
    );

    Ok(metrics)
}

/// Rejects a plot set in which any id appears twice.
///
/// # Errors
///
/// Returns [`OverlayError::DuplicatePlotId`] naming the first repeated id.
pub fn check_unique_ids(plots: &[Plot]) -> Result<(), OverlayError> {
    let mut seen = HashSet::with_capacity(plots.len());
    for plot in plots {
        if !seen.insert(&plot.id) {
            return Err(OverlayError::DuplicatePlotId(plot.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use forest_alert_raster::codec::write_band_file;
    use forest_alert_raster::models::{AffineTransform, CellType, RasterHeader};
    use geo::{MultiPolygon, Polygon, polygon};
    use proptest::prelude::*;

    use super::*;

    const NODATA: i64 = 255;

    /// 10x10 grid of 10 m cells (0.01 ha each), top-left corner at (0, 100).
    fn header() -> RasterHeader {
        RasterHeader {
            width: 10,
            height: 10,
            cell_type: CellType::U8,
            transform: AffineTransform::north_up(0.0, 100.0, 10.0),
            nodata: Some(NODATA),
            crs: None,
        }
    }

    /// Columns 2..6 of rows 2..6 are deforested, except a no-data cell at
    /// (3, 3); everything else is forest (class 1).
    fn cells() -> Vec<i64> {
        let mut cells = vec![1; 100];
        for row in 2..6 {
            for col in 2..6 {
                cells[row * 10 + col] = 2;
            }
        }
        cells[3 * 10 + 3] = NODATA;
        cells
    }

    fn grid() -> RasterGrid {
        RasterGrid::from_cells(header(), &cells()).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]
    }

    fn options(worker_count: usize) -> OverlayOptions {
        OverlayOptions {
            worker_count,
            backing: BackingKind::MappedFile,
            ..OverlayOptions::default()
        }
    }

    fn plots() -> Vec<Plot> {
        vec![
            // Rows 2..4, cols 2..4: three deforested cells and the no-data cell.
            Plot::new(3_i64, rect(20.0, 60.0, 40.0, 80.0)),
            // Entirely forest.
            Plot::new(1_i64, rect(70.0, 0.0, 100.0, 30.0)),
            // Half outside the grid, touching cells (0..2, 0..1).
            Plot::new("edge", rect(-10.0, 80.0, 10.0, 100.0)),
            Plot::new(2_i64, MultiPolygon(vec![])),
            // Outside the grid entirely.
            Plot::new("far", rect(500.0, 500.0, 510.0, 510.0)),
        ]
    }

    #[test]
    fn counts_only_covered_deforested_cells() {
        let metrics = compute_direct_metrics(
            &plots(),
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &options(2),
        )
        .unwrap();

        let plot3 = metrics.iter().find(|m| m.id == RecordId::Int(3)).unwrap();
        assert_relative_eq!(plot3.plot_area_ha, 0.04);
        assert_relative_eq!(plot3.deforested_area_ha, 0.03, epsilon = 1e-12);
        assert_relative_eq!(plot3.deforested_proportion, 0.75, epsilon = 1e-9);
        assert!(plot3.alert_direct);

        let plot1 = metrics.iter().find(|m| m.id == RecordId::Int(1)).unwrap();
        assert_relative_eq!(plot1.deforested_area_ha, 0.0);
        assert!(!plot1.alert_direct);
    }

    #[test]
    fn output_is_sorted_by_id() {
        let metrics = compute_direct_metrics(
            &plots(),
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &options(3),
        )
        .unwrap();

        let ids: Vec<RecordId> = metrics.into_iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![
                RecordId::Int(1),
                RecordId::Int(2),
                RecordId::Int(3),
                RecordId::from("edge"),
                RecordId::from("far"),
            ]
        );
    }

    #[test]
    fn degenerate_plots_resolve_to_zero() {
        let protected = UnionLayer::from_polygons(&[rect(0.0, 0.0, 100.0, 100.0)]);
        let metrics = compute_direct_metrics(
            &plots(),
            &grid(),
            &protected,
            &UnionLayer::empty(),
            &options(1),
        )
        .unwrap();

        let empty = metrics.iter().find(|m| m.id == RecordId::Int(2)).unwrap();
        assert_relative_eq!(empty.plot_area_ha, 0.0);
        assert_relative_eq!(empty.protected_proportion, 0.0);
        assert_relative_eq!(empty.farming_out_area_ha, 0.0);
        assert!(!empty.alert_direct);

        let far = metrics.iter().find(|m| m.id == RecordId::from("far")).unwrap();
        assert_relative_eq!(far.plot_area_ha, 0.01, epsilon = 1e-12);
        assert_relative_eq!(far.deforested_area_ha, 0.0);
        assert_relative_eq!(far.farming_out_area_ha, 0.01, epsilon = 1e-12);
    }

    #[test]
    fn layers_use_exact_intersection() {
        // Protected covers the west half of plot 3, farming overlaps it
        // by a quarter.
        let protected = UnionLayer::from_polygons(&[rect(0.0, 0.0, 30.0, 100.0)]);
        let farming = UnionLayer::from_polygons(&[rect(35.0, 60.0, 100.0, 80.0)]);
        let metrics = compute_direct_metrics(
            &plots()[..1],
            &grid(),
            &protected,
            &farming,
            &options(1),
        )
        .unwrap();

        let m = &metrics[0];
        assert_relative_eq!(m.protected_area_ha, 0.02, epsilon = 1e-9);
        assert_relative_eq!(m.protected_proportion, 0.5, epsilon = 1e-9);
        assert_relative_eq!(m.farming_in_area_ha, 0.01, epsilon = 1e-9);
        assert_relative_eq!(m.farming_in_proportion, 0.25, epsilon = 1e-9);
        assert_relative_eq!(m.farming_out_area_ha, 0.03, epsilon = 1e-9);
        assert_relative_eq!(m.farming_out_proportion, 0.75, epsilon = 1e-9);
    }

    #[test]
    fn nodata_class_never_counts() {
        let mut h = header();
        h.nodata = Some(2);
        let grid = RasterGrid::from_cells(h, &cells()).unwrap();
        let metrics = compute_direct_metrics(
            &plots()[..1],
            &grid,
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &options(1),
        )
        .unwrap();
        assert!(!metrics[0].alert_direct);
    }

    #[test]
    fn custom_deforested_class() {
        let metrics = compute_direct_metrics(
            &plots()[1..2],
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &OverlayOptions {
                deforested_class: 1,
                ..options(1)
            },
        )
        .unwrap();
        assert_relative_eq!(metrics[0].deforested_area_ha, 0.09, epsilon = 1e-12);
        assert_relative_eq!(metrics[0].deforested_proportion, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn worker_count_does_not_change_output() {
        let plots: Vec<Plot> = (0..40_i64)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let x = (i % 8) as f64 * 12.0;
                #[allow(clippy::cast_precision_loss)]
                let y = (i / 8) as f64 * 18.0;
                Plot::new(i, rect(x, y, x + 15.0, y + 21.0))
            })
            .collect();
        let protected = UnionLayer::from_polygons(&[rect(10.0, 10.0, 60.0, 60.0)]);
        let farming = UnionLayer::from_polygons(&[
            rect(0.0, 50.0, 100.0, 70.0),
            rect(40.0, 0.0, 55.0, 100.0),
        ]);

        let serial =
            compute_direct_metrics(&plots, &grid(), &protected, &farming, &options(1)).unwrap();
        let parallel =
            compute_direct_metrics(&plots, &grid(), &protected, &farming, &options(4)).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn every_backing_gives_the_same_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defo.band");
        write_band_file(&path, &header(), &cells()).unwrap();
        let grid = RasterGrid::open(&path).unwrap();

        let run = |backing| {
            compute_direct_metrics(
                &plots(),
                &grid,
                &UnionLayer::empty(),
                &UnionLayer::empty(),
                &OverlayOptions {
                    backing,
                    ..options(2)
                },
            )
            .unwrap()
        };

        let streaming = run(BackingKind::Streaming);
        assert_eq!(run(BackingKind::MappedFile), streaming);
        assert_eq!(run(BackingKind::Auto), streaming);
    }

    #[test]
    fn streaming_without_source_fails_before_work() {
        let err = compute_direct_metrics(
            &plots(),
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &OverlayOptions {
                backing: BackingKind::Streaming,
                ..options(1)
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Raster(RasterError::BackingUnavailable { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let plots = vec![
            Plot::new(7_i64, rect(0.0, 0.0, 1.0, 1.0)),
            Plot::new("7", rect(2.0, 2.0, 3.0, 3.0)),
        ];
        let err = compute_direct_metrics(
            &plots,
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &options(1),
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::DuplicatePlotId(RecordId::Int(7))));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = compute_direct_metrics(
            &plots(),
            &grid(),
            &UnionLayer::empty(),
            &UnionLayer::empty(),
            &options(0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Parallel(ParallelError::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn farming_overlap_is_capped_at_plot_area() {
        let m = direct_metrics(RecordId::Int(1), 2.0, 0.0, 0.0, 2.000_000_1);
        assert_relative_eq!(m.farming_in_area_ha, 2.0);
        assert_relative_eq!(m.farming_out_area_ha, 0.0);
        assert_relative_eq!(m.farming_in_proportion, 1.0);
    }

    proptest! {
        #[test]
        fn metric_invariants_hold(
            plot_area in 0.0f64..1_000.0,
            deforested in 0.0f64..1_000.0,
            protected in 0.0f64..1_000.0,
            farming in 0.0f64..1_200.0,
        ) {
            let m = direct_metrics(RecordId::Int(0), plot_area, deforested, protected, farming);

            let split = m.farming_in_area_ha + m.farming_out_area_ha;
            prop_assert!((split - m.plot_area_ha).abs() < 1e-6);
            prop_assert!(m.farming_out_area_ha >= 0.0);
            prop_assert_eq!(m.alert_direct, m.deforested_area_ha > 0.0);

            for (area, proportion) in [
                (m.deforested_area_ha, m.deforested_proportion),
                (m.protected_area_ha, m.protected_proportion),
                (m.farming_in_area_ha, m.farming_in_proportion),
                (m.farming_out_area_ha, m.farming_out_proportion),
            ] {
                prop_assert!((0.0..=1.0).contains(&proportion));
                if plot_area > 0.0 {
                    prop_assert!((proportion - (area / plot_area).min(1.0)).abs() < 1e-12);
                } else {
                    prop_assert!(proportion == 0.0);
                }
            }
        }

        #[test]
        fn overlay_invariants_hold_for_random_plots(
            x in -20.0f64..90.0,
            y in -20.0f64..90.0,
            w in 0.5f64..60.0,
            h in 0.5f64..60.0,
        ) {
            let farming = UnionLayer::from_polygons(&[rect(0.0, 30.0, 100.0, 70.0)]);
            let protected = UnionLayer::from_polygons(&[rect(25.0, 0.0, 75.0, 100.0)]);
            let plots = vec![Plot::new(1_i64, rect(x, y, x + w, y + h))];
            let metrics =
                compute_direct_metrics(&plots, &grid(), &protected, &farming, &options(1)).unwrap();
            let m = &metrics[0];

            let split = m.farming_in_area_ha + m.farming_out_area_ha;
            prop_assert!((split - m.plot_area_ha).abs() < 1e-6);
            prop_assert_eq!(m.alert_direct, m.deforested_area_ha > 0.0);
            for proportion in [
                m.deforested_proportion,
                m.protected_proportion,
                m.farming_in_proportion,
                m.farming_out_proportion,
            ] {
                prop_assert!((0.0..=1.0).contains(&proportion));
            }
        }
    }
}

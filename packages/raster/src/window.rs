//! Mapping spatial bounding boxes onto clamped cell windows.

use forest_alert_raster_models::{CellWindow, RasterHeader};
use geo::Rect;

/// Returns the cells touched by `bounds`, clamped to the grid.
///
/// The four corners of the box are mapped into fractional cell space through
/// the inverse transform; the window runs from the `floor` of the smallest
/// to the `ceil` of the largest coordinate on each axis. Boxes that miss the
/// grid, and non-finite boxes, give an empty window.
#[must_use]
pub fn window_for_bounds(bounds: &Rect<f64>, header: &RasterHeader) -> CellWindow {
    let Some(inverse) = header.transform.inverse() else {
        return CellWindow::default();
    };

    let (min, max) = (bounds.min(), bounds.max());
    let corners = [
        inverse.apply(min.x, min.y),
        inverse.apply(min.x, max.y),
        inverse.apply(max.x, min.y),
        inverse.apply(max.x, max.y),
    ];

    let mut col_min = f64::INFINITY;
    let mut col_max = f64::NEG_INFINITY;
    let mut row_min = f64::INFINITY;
    let mut row_max = f64::NEG_INFINITY;
    for (col, row) in corners {
        col_min = col_min.min(col);
        col_max = col_max.max(col);
        row_min = row_min.min(row);
        row_max = row_max.max(row);
    }

    if ![col_min, col_max, row_min, row_max]
        .iter()
        .all(|v| v.is_finite())
    {
        return CellWindow::default();
    }

    let row_start = clamp_index(row_min.floor(), header.height);
    let col_start = clamp_index(col_min.floor(), header.width);
    CellWindow {
        row_start,
        row_end: clamp_index(row_max.ceil(), header.height).max(row_start),
        col_start,
        col_end: clamp_index(col_max.ceil(), header.width).max(col_start),
    }
}

#[allow(clippy::cast_precision_loss)]
fn clamp_index(value: f64, upper: usize) -> usize {
    if value <= 0.0 {
        0
    } else if value >= upper as f64 {
        upper
    } else {
        value as usize
    }
}

//! Polygon coverage masks.
//!
//! A cell is covered when its centre lies inside the polygon under the
//! even-odd rule. Rings are moved into fractional cell space with the
//! inverse transform and scanned at every row centre, so rotated grids need
//! no special handling.

use forest_alert_raster_models::AffineTransform;
use geo::{LineString, MultiPolygon};

/// Boolean coverage of a `height x width` block, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMask {
    width: usize,
    height: usize,
    covered: Vec<bool>,
}

impl CoverageMask {
    /// Number of columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Whether the cell at `(row, col)` is covered.
    #[must_use]
    pub fn is_covered(&self, row: usize, col: usize) -> bool {
        row < self.height && col < self.width && self.covered[row * self.width + col]
    }

    /// Coverage flags, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.covered
    }

    /// Number of covered cells.
    #[must_use]
    pub fn count(&self) -> usize {
        self.covered.iter().filter(|c| **c).count()
    }
}

struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

fn push_ring_edges(ring: &LineString<f64>, inverse: &AffineTransform, edges: &mut Vec<Edge>) {
    let points: Vec<(f64, f64)> = ring.coords().map(|c| inverse.apply(c.x, c.y)).collect();
    for pair in points.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        // Horizontal edges never cross a row centre.
        if y0 != y1 {
            edges.push(Edge { x0, y0, x1, y1 });
        }
    }
}

/// Rasterizes `geometry` onto a `height x width` block georeferenced by
/// `transform` (the transform of the block itself, not the full grid).
///
/// Returns an all-false mask if `transform` is not invertible.
#[must_use]
pub fn coverage_mask(
    geometry: &MultiPolygon<f64>,
    transform: &AffineTransform,
    height: usize,
    width: usize,
) -> CoverageMask {
    let mut covered = vec![false; height * width];
    let Some(inverse) = transform.inverse() else {
        return CoverageMask {
            width,
            height,
            covered,
        };
    };

    let mut edges = Vec::new();
    for polygon in geometry {
        push_ring_edges(polygon.exterior(), &inverse, &mut edges);
        for interior in polygon.interiors() {
            push_ring_edges(interior, &inverse, &mut edges);
        }
    }

    let mut crossings = Vec::new();
    for row in 0..height {
        #[allow(clippy::cast_precision_loss)]
        let centre = row as f64 + 0.5;

        crossings.clear();
        for edge in &edges {
            if (edge.y0 <= centre) != (edge.y1 <= centre) {
                let t = (centre - edge.y0) / (edge.y1 - edge.y0);
                crossings.push(t.mul_add(edge.x1 - edge.x0, edge.x0));
            }
        }
        crossings.sort_by(f64::total_cmp);

        let row_cells = &mut covered[row * width..(row + 1) * width];
        for span in crossings.chunks_exact(2) {
            // Cells whose centre `col + 0.5` falls in [span[0], span[1]).
            let start = first_centre_at_or_after(span[0], width);
            let end = first_centre_at_or_after(span[1], width);
            for cell in &mut row_cells[start..end.max(start)] {
                *cell = true;
            }
        }
    }

    CoverageMask {
        width,
        height,
        covered,
    }
}

#[allow(clippy::cast_precision_loss)]
fn first_centre_at_or_after(x: f64, width: usize) -> usize {
    let col = (x - 0.5).ceil();
    if col <= 0.0 {
        0
    } else if col >= width as f64 {
        width
    } else {
        col as usize
    }
}

#[cfg(test)]
mod tests {
    use geo::{Polygon, polygon};

    use super::*;

    fn unit_grid() -> AffineTransform {
        // 1 m cells, top-left corner at (0, 10).
        AffineTransform::north_up(0.0, 10.0, 1.0)
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]
    }

    #[test]
    fn aligned_square_covers_its_cells() {
        let geom = MultiPolygon(vec![square(2.0, 5.0, 5.0, 7.0)]);
        let mask = coverage_mask(&geom, &unit_grid(), 10, 10);
        assert_eq!(mask.count(), 6);
        assert!(mask.is_covered(3, 2));
        assert!(mask.is_covered(4, 4));
        assert!(!mask.is_covered(5, 2));
        assert!(!mask.is_covered(3, 5));
    }

    #[test]
    fn cells_are_covered_only_by_their_centres() {
        // Spans columns 1.4..2.6 and rows 1.4..1.6: only the centres of
        // columns 1 and 2 in row 1 fall inside.
        let geom = MultiPolygon(vec![square(1.4, 8.4, 2.6, 8.6)]);
        let mask = coverage_mask(&geom, &unit_grid(), 10, 10);
        assert_eq!(mask.count(), 2);
        assert!(mask.is_covered(1, 1));
        assert!(mask.is_covered(1, 2));
    }

    #[test]
    fn holes_are_excluded() {
        let outer = square(0.0, 0.0, 6.0, 6.0);
        let hole = square(2.0, 2.0, 4.0, 4.0);
        let geom = MultiPolygon(vec![Polygon::new(
            outer.exterior().clone(),
            vec![hole.exterior().clone()],
        )]);
        let mask = coverage_mask(&geom, &unit_grid(), 10, 10);
        assert_eq!(mask.count(), 36 - 4);
        assert!(!mask.is_covered(6, 2));
        assert!(mask.is_covered(6, 1));
    }

    #[test]
    fn multipolygon_parts_are_all_rasterized() {
        let geom = MultiPolygon(vec![
            square(0.0, 9.0, 1.0, 10.0),
            square(8.0, 0.0, 10.0, 1.0),
        ]);
        let mask = coverage_mask(&geom, &unit_grid(), 10, 10);
        assert_eq!(mask.count(), 3);
        assert!(mask.is_covered(0, 0));
        assert!(mask.is_covered(9, 9));
    }

    #[test]
    fn geometry_partly_outside_the_block_is_clipped() {
        let geom = MultiPolygon(vec![square(-5.0, 8.0, 2.0, 20.0)]);
        let mask = coverage_mask(&geom, &unit_grid(), 10, 10);
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn rotated_grid_uses_inverse_transform() {
        // Columns run along -y and rows along +x (90 degree rotation).
        let rotated = AffineTransform::from([0.0, 1.0, 0.0, -1.0, 0.0, 10.0]);
        let geom = MultiPolygon(vec![square(0.0, 9.0, 1.0, 10.0)]);
        let mask = coverage_mask(&geom, &rotated, 4, 4);
        assert_eq!(mask.count(), 1);
        assert!(mask.is_covered(0, 0));
    }

    #[test]
    fn empty_geometry_covers_nothing() {
        let mask = coverage_mask(&MultiPolygon(vec![]), &unit_grid(), 3, 3);
        assert_eq!(mask.count(), 0);
        assert_eq!(mask.as_slice().len(), 9);
    }
}

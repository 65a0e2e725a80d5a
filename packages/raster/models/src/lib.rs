#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Raster grid description types.
//!
//! A classification raster is a single band of integer class codes plus an
//! [`AffineTransform`] that georeferences every cell. These types are shared
//! between the band-file codec, the backing strategies, and the overlay
//! engine.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Square metres per hectare.
pub const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

/// Affine transform mapping a cell position to spatial coordinates.
///
/// Uses the GDAL/rasterio parameter order:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `(col, row) = (0, 0)` is the outer corner of the top-left cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct AffineTransform {
    /// Cell width along x.
    pub a: f64,
    /// Row rotation term.
    pub b: f64,
    /// x of the grid origin.
    pub c: f64,
    /// Column rotation term.
    pub d: f64,
    /// Cell height along y (negative for north-up grids).
    pub e: f64,
    /// y of the grid origin.
    pub f: f64,
}

impl From<[f64; 6]> for AffineTransform {
    fn from([a, b, c, d, e, f]: [f64; 6]) -> Self {
        Self { a, b, c, d, e, f }
    }
}

impl From<AffineTransform> for [f64; 6] {
    fn from(t: AffineTransform) -> Self {
        [t.a, t.b, t.c, t.d, t.e, t.f]
    }
}

impl AffineTransform {
    /// North-up transform with square cells of `cell_size` and the top-left
    /// corner at `(origin_x, origin_y)`.
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, cell_size: f64) -> Self {
        Self {
            a: cell_size,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -cell_size,
            f: origin_y,
        }
    }

    /// Maps a (possibly fractional) cell position to spatial coordinates.
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a.mul_add(col, self.b.mul_add(row, self.c)),
            self.d.mul_add(col, self.e.mul_add(row, self.f)),
        )
    }

    /// Determinant of the linear part.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a.mul_add(self.e, -(self.b * self.d))
    }

    /// Whether the linear part can be inverted.
    #[must_use]
    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det != 0.0
    }

    /// Inverse transform mapping spatial coordinates back to fractional
    /// cell positions, or `None` for a degenerate transform.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;
        Some(Self {
            a,
            b,
            c: -a.mul_add(self.c, b * self.f),
            d,
            e,
            f: -d.mul_add(self.c, e * self.f),
        })
    }

    /// Area of one cell in hectares, `|det| / 10_000`.
    #[must_use]
    pub fn pixel_area_ha(&self) -> f64 {
        self.determinant().abs() / SQUARE_METRES_PER_HECTARE
    }

    /// Transform of a sub-grid whose top-left cell is `window`'s origin.
    #[must_use]
    pub fn for_window(&self, window: &CellWindow) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (c, f) = self.apply(window.col_start as f64, window.row_start as f64);
        Self { c, f, ..*self }
    }
}

/// On-disk storage type of a cell.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CellType {
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Signed 16-bit.
    I16,
    /// Unsigned 32-bit.
    U32,
    /// Signed 32-bit.
    I32,
}

impl CellType {
    /// Width of one cell in bytes.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
        }
    }
}

/// Metadata describing a single-band grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterHeader {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Storage type of each cell.
    pub cell_type: CellType,
    /// Georeferencing transform.
    pub transform: AffineTransform,
    /// Cell value meaning "no data", if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<i64>,
    /// Free-text spatial reference label; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

impl RasterHeader {
    /// Total number of cells.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Size in bytes of the raw band data.
    ///
    /// Only meaningful for a header that passed [`Self::checked_byte_len`].
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.cell_count() * self.cell_type.size_bytes()
    }

    /// Size in bytes of the raw band data, or `None` when it does not fit in
    /// `usize`.
    #[must_use]
    pub const fn checked_byte_len(&self) -> Option<usize> {
        match self.width.checked_mul(self.height) {
            Some(cells) => cells.checked_mul(self.cell_type.size_bytes()),
            None => None,
        }
    }

    /// Window covering the whole grid.
    #[must_use]
    pub const fn full_window(&self) -> CellWindow {
        CellWindow {
            row_start: 0,
            row_end: self.height,
            col_start: 0,
            col_end: self.width,
        }
    }
}

/// Half-open block of cells `[row_start, row_end) x [col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellWindow {
    /// First row (inclusive).
    pub row_start: usize,
    /// Last row (exclusive).
    pub row_end: usize,
    /// First column (inclusive).
    pub col_start: usize,
    /// Last column (exclusive).
    pub col_end: usize,
}

impl CellWindow {
    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.row_end.saturating_sub(self.row_start)
    }

    /// Number of columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.col_end.saturating_sub(self.col_start)
    }

    /// Number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.height() * self.width()
    }

    /// Whether the window has zero height or zero width.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Whether the window lies inside a `width x height` grid.
    #[must_use]
    pub const fn fits(&self, width: usize, height: usize) -> bool {
        self.row_start <= self.row_end
            && self.col_start <= self.col_end
            && self.row_end <= height
            && self.col_end <= width
    }
}

/// How raster cells are made available to overlay workers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BackingKind {
    /// Probe shared memory, then a mapped temp file, then streaming.
    #[default]
    Auto,
    /// Named shared-memory segment holding the whole band.
    SharedMemory,
    /// Memory-mapped temporary file holding the whole band.
    MappedFile,
    /// Re-open the source file for every window read.
    Streaming,
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn pixel_area_uses_full_determinant() {
        let t = AffineTransform::north_up(0.0, 1000.0, 30.0);
        assert_relative_eq!(t.pixel_area_ha(), 0.09);

        let rotated = AffineTransform::from([10.0, 2.0, 0.0, 1.0, -10.0, 0.0]);
        assert_relative_eq!(rotated.pixel_area_ha(), 102.0 / 10_000.0);
    }

    #[test]
    fn inverse_round_trips_cell_positions() {
        let t = AffineTransform::from([10.0, 2.0, 500.0, 1.0, -10.0, 900.0]);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(3.5, 7.25);
        let (col, row) = inv.apply(x, y);
        assert_relative_eq!(col, 3.5, epsilon = 1e-9);
        assert_relative_eq!(row, 7.25, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_transform_has_no_inverse() {
        let t = AffineTransform::from([1.0, 2.0, 0.0, 2.0, 4.0, 0.0]);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn window_transform_shifts_origin() {
        let t = AffineTransform::north_up(100.0, 200.0, 10.0);
        let window = CellWindow {
            row_start: 2,
            row_end: 4,
            col_start: 3,
            col_end: 5,
        };
        let shifted = t.for_window(&window);
        assert_relative_eq!(shifted.c, 130.0);
        assert_relative_eq!(shifted.f, 180.0);
        assert_relative_eq!(shifted.a, 10.0);
    }

    #[test]
    fn header_serializes_transform_as_array() {
        let header = RasterHeader {
            width: 2,
            height: 3,
            cell_type: CellType::U8,
            transform: AffineTransform::north_up(0.0, 0.0, 1.0),
            nodata: Some(255),
            crs: None,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains(r#""transform":[1.0,0.0,0.0,0.0,-1.0,0.0]"#));
        assert!(json.contains(r#""cell_type":"u8""#));
        assert_eq!(header.byte_len(), 6);
    }

    #[test]
    fn backing_kind_parses_kebab_case() {
        assert_eq!(
            "shared-memory".parse::<BackingKind>().unwrap(),
            BackingKind::SharedMemory
        );
        assert_eq!(BackingKind::MappedFile.to_string(), "mapped-file");
    }
}

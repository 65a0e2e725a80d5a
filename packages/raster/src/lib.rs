#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Single-band classification rasters.
//!
//! A [`RasterGrid`] is loaded into memory once from a band file (see
//! [`codec`]). Overlay workers never touch the grid directly: they read
//! windows through a [`backing::WindowSource`], which is one of a shared
//! memory segment, a memory-mapped temporary file, or a streaming reader
//! that re-opens the source file for every window.

pub mod backing;
pub mod codec;
pub mod mask;
pub mod window;

use std::path::{Path, PathBuf};

use forest_alert_raster_models::{BackingKind, CellType, CellWindow, RasterHeader};

pub use forest_alert_raster_models as models;

/// Errors that can occur while loading or reading a raster.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// I/O error (file open, read, map).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON header could not be parsed or written.
    #[error("Header error: {0}")]
    Header(#[from] serde_json::Error),

    /// The file is not a well-formed band file.
    #[error("Invalid band file: {message}")]
    InvalidFormat {
        /// Description of what went wrong.
        message: String,
    },

    /// A cell value does not fit the declared cell type.
    #[error("Cell value {value} does not fit cell type {cell_type}")]
    CellOutOfRange {
        /// The offending value.
        value: i64,
        /// The declared storage type.
        cell_type: CellType,
    },

    /// A window extends past the grid.
    #[error("Window {window:?} is outside a {width}x{height} grid")]
    WindowOutOfBounds {
        /// The requested window.
        window: CellWindow,
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
    },

    /// A backing strategy cannot be used on this platform or for this grid.
    #[error("Backing {kind} unavailable: {message}")]
    BackingUnavailable {
        /// The strategy that failed.
        kind: BackingKind,
        /// Why it failed.
        message: String,
    },
}

impl RasterError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}

/// Decoded class codes of one window, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCells {
    window: CellWindow,
    cells: Vec<i64>,
}

impl WindowCells {
    /// Wraps decoded cells; `cells.len()` must equal `window.len()`.
    #[must_use]
    pub fn new(window: CellWindow, cells: Vec<i64>) -> Self {
        debug_assert_eq!(cells.len(), window.len());
        Self { window, cells }
    }

    /// The window these cells were read from.
    #[must_use]
    pub const fn window(&self) -> &CellWindow {
        &self.window
    }

    /// All cells, row-major within the window.
    #[must_use]
    pub fn cells(&self) -> &[i64] {
        &self.cells
    }

    /// Cell at `(row, col)` relative to the window origin.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        if row >= self.window.height() || col >= self.window.width() {
            return None;
        }
        self.cells.get(row * self.window.width() + col).copied()
    }
}

/// A classification raster held in memory as raw little-endian band bytes.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    header: RasterHeader,
    data: Vec<u8>,
    source: Option<PathBuf>,
}

impl RasterGrid {
    /// Loads a band file fully into memory, remembering its path for the
    /// streaming backing.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the file cannot be read or is malformed.
    pub fn open(path: &Path) -> Result<Self, RasterError> {
        let (header, data) = codec::read_band_file(path)?;
        log::info!(
            "Loaded raster {} ({}x{} {}, {} bytes)",
            path.display(),
            header.width,
            header.height,
            header.cell_type,
            data.len()
        );
        Ok(Self {
            header,
            data,
            source: Some(path.to_path_buf()),
        })
    }

    /// Builds a grid from decoded class codes (row-major). The grid has no
    /// source file, so the streaming backing is unavailable for it.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the header is invalid, the cell count does
    /// not match, or a value does not fit the cell type.
    pub fn from_cells(header: RasterHeader, cells: &[i64]) -> Result<Self, RasterError> {
        codec::validate_header(&header)?;
        if cells.len() != header.cell_count() {
            return Err(RasterError::invalid(format!(
                "expected {} cells, got {}",
                header.cell_count(),
                cells.len()
            )));
        }
        let data = codec::encode_cells(header.cell_type, cells)?;
        Ok(Self {
            header,
            data,
            source: None,
        })
    }

    /// Associates the grid with a band file holding identical content.
    #[must_use]
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// Grid metadata.
    #[must_use]
    pub const fn header(&self) -> &RasterHeader {
        &self.header
    }

    /// Raw band bytes (row-major, little-endian).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// File this grid was loaded from, if any.
    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Decodes a window straight from the in-memory bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::WindowOutOfBounds`] for a window outside the
    /// grid.
    pub fn read_window(&self, window: CellWindow) -> Result<WindowCells, RasterError> {
        codec::decode_window(&self.header, &self.data, window)
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tabular and vector inputs and outputs of the alert pipeline.
//!
//! Input CSV tables are matched against declarative [`columns::ColumnSpec`]
//! alias lists, resolved once per table before any row is read. Output tables
//! are written with a fixed column order.

pub mod columns;
pub mod layers;
pub mod read;
pub mod write;

use forest_alert_models::RecordId;
use forest_alert_spatial::SpatialError;

/// A required column could not be found under any accepted header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Table '{table}' has no column for {field} (accepted: {})",
    .aliases.join(", ")
)]
pub struct SchemaError {
    /// Table being read, e.g. `movements`.
    pub table: &'static str,
    /// Logical field that was required.
    pub field: &'static str,
    /// Headers accepted for the field, in priority order.
    pub aliases: Vec<String>,
}

/// Errors raised while reading or writing pipeline tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// File could not be opened, read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed `GeoJSON` document.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// Layer geometry could not be converted.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// Missing column.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A cell that cannot be coerced to the column's type.
    #[error("Table '{table}' row {row}: invalid {field} value {value:?}")]
    InvalidValue {
        table: &'static str,
        field: &'static str,
        /// 1-based data row (the header is row 0).
        row: usize,
        value: String,
    },

    /// A plot whose geometry is not polygonal.
    #[error("Plot {id}: {source}")]
    PlotGeometry {
        id: RecordId,
        #[source]
        source: SpatialError,
    },
}

//! CSV writers for the three stage outputs.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use forest_alert_models::{DirectMetrics, EntityAggregate, PlotAlerts};

use crate::TableError;

/// Column order of a direct metrics table.
pub const DIRECT_COLUMNS: [&str; 11] = [
    "id",
    "plot_area",
    "deforested_area",
    "deforested_proportion",
    "protected_areas_area",
    "protected_areas_proportion",
    "farming_in_area",
    "farming_in_proportion",
    "farming_out_area",
    "farming_out_proportion",
    "alert_direct",
];

/// Extra columns appended to [`DIRECT_COLUMNS`] for plot alerts.
pub const INDIRECT_COLUMNS: [&str; 2] = ["alert_in", "alert_out"];

fn direct_record(m: &DirectMetrics) -> [String; 11] {
    [
        m.id.to_string(),
        m.plot_area_ha.to_string(),
        m.deforested_area_ha.to_string(),
        m.deforested_proportion.to_string(),
        m.protected_area_ha.to_string(),
        m.protected_proportion.to_string(),
        m.farming_in_area_ha.to_string(),
        m.farming_in_proportion.to_string(),
        m.farming_out_area_ha.to_string(),
        m.farming_out_proportion.to_string(),
        m.alert_direct.to_string(),
    ]
}

/// Writes direct metrics with a header row.
///
/// # Errors
///
/// Returns [`TableError`] if writing fails.
pub fn write_direct_metrics<W: Write>(output: W, rows: &[DirectMetrics]) -> Result<(), TableError> {
    let mut csv = csv::Writer::from_writer(output);
    csv.write_record(DIRECT_COLUMNS)?;
    for row in rows {
        csv.write_record(direct_record(row))?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes plot alerts: the direct columns followed by `alert_in` and
/// `alert_out`.
///
/// # Errors
///
/// Returns [`TableError`] if writing fails.
pub fn write_plot_alerts<W: Write>(output: W, rows: &[PlotAlerts]) -> Result<(), TableError> {
    let mut csv = csv::Writer::from_writer(output);
    csv.write_record(DIRECT_COLUMNS.iter().chain(&INDIRECT_COLUMNS))?;
    for row in rows {
        let direct = direct_record(&row.direct);
        let flags = [row.alert_in.to_string(), row.alert_out.to_string()];
        csv.write_record(direct.iter().chain(&flags))?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes entity aggregates; columns follow the field order of
/// [`EntityAggregate`].
///
/// # Errors
///
/// Returns [`TableError`] if writing fails.
pub fn write_entity_aggregates<W: Write>(
    output: W,
    rows: &[EntityAggregate],
) -> Result<(), TableError> {
    let mut csv = csv::Writer::from_writer(output);
    if rows.is_empty() {
        csv.write_record([
            "entity_id",
            "entity_name",
            "plots_total",
            "plots_alert_direct",
            "plots_alert_in",
            "plots_alert_out",
            "deforested_area_sum",
            "alert",
        ])?;
    }
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Creates `path` (and its parent directories) and hands it to `write`.
///
/// # Errors
///
/// Returns [`TableError::Io`] if the file cannot be created, otherwise
/// whatever `write` returns.
pub fn write_file(
    path: &Path,
    write: impl FnOnce(File) -> Result<(), TableError>,
) -> Result<(), TableError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write(File::create(path)?)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

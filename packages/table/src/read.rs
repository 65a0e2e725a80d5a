//! CSV readers for the pipeline's input tables.
//!
//! Every reader resolves its columns from the header row before reading any
//! data, so a missing column fails fast with a [`SchemaError`].
//!
//! [`SchemaError`]: crate::SchemaError

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use forest_alert_models::{
    DirectMetrics, Entity, MovementEdge, PlotAlerts, PlotEntityLink, RecordId,
};

use crate::TableError;
use crate::columns::{self, ColumnSpec, coerce_area, parse_bool};

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().has_headers(true).from_reader(input)
}

struct Row<'a> {
    table: &'static str,
    index: usize,
    record: &'a StringRecord,
}

impl Row<'_> {
    fn cell(&self, column: usize) -> &str {
        self.record.get(column).unwrap_or("").trim()
    }

    fn id(&self, column: usize) -> RecordId {
        RecordId::parse(self.cell(column))
    }

    fn flag(&self, def: &ColumnSpec, column: usize) -> Result<bool, TableError> {
        let raw = self.cell(column);
        parse_bool(raw).ok_or_else(|| TableError::InvalidValue {
            table: self.table,
            field: def.field,
            row: self.index,
            value: raw.to_owned(),
        })
    }

    fn area(&self, column: Option<usize>) -> f64 {
        column.map_or(0.0, |c| coerce_area(self.cell(c)))
    }
}

struct MetricColumns {
    id: usize,
    alert_direct: usize,
    deforested_area: Option<usize>,
    plot_area: Option<usize>,
    deforested_proportion: Option<usize>,
    protected_area: Option<usize>,
    protected_proportion: Option<usize>,
    farming_in_area: Option<usize>,
    farming_in_proportion: Option<usize>,
    farming_out_area: Option<usize>,
    farming_out_proportion: Option<usize>,
}

impl MetricColumns {
    fn resolve(
        table: &'static str,
        headers: &StringRecord,
        require_area: bool,
    ) -> Result<Self, TableError> {
        let deforested_area = if require_area {
            Some(columns::DEFORESTED_AREA.resolve(table, headers)?)
        } else {
            columns::DEFORESTED_AREA.find(headers)
        };
        Ok(Self {
            id: columns::METRICS_ID.resolve(table, headers)?,
            alert_direct: columns::ALERT_DIRECT.resolve(table, headers)?,
            deforested_area,
            plot_area: columns::PLOT_AREA.find(headers),
            deforested_proportion: columns::DEFORESTED_PROPORTION.find(headers),
            protected_area: columns::PROTECTED_AREA.find(headers),
            protected_proportion: columns::PROTECTED_PROPORTION.find(headers),
            farming_in_area: columns::FARMING_IN_AREA.find(headers),
            farming_in_proportion: columns::FARMING_IN_PROPORTION.find(headers),
            farming_out_area: columns::FARMING_OUT_AREA.find(headers),
            farming_out_proportion: columns::FARMING_OUT_PROPORTION.find(headers),
        })
    }

    fn metrics(&self, row: &Row<'_>) -> Result<DirectMetrics, TableError> {
        Ok(DirectMetrics {
            id: row.id(self.id),
            plot_area_ha: row.area(self.plot_area),
            deforested_area_ha: row.area(self.deforested_area),
            deforested_proportion: row.area(self.deforested_proportion),
            protected_area_ha: row.area(self.protected_area),
            protected_proportion: row.area(self.protected_proportion),
            farming_in_area_ha: row.area(self.farming_in_area),
            farming_in_proportion: row.area(self.farming_in_proportion),
            farming_out_area_ha: row.area(self.farming_out_area),
            farming_out_proportion: row.area(self.farming_out_proportion),
            alert_direct: row.flag(&columns::ALERT_DIRECT, self.alert_direct)?,
        })
    }
}

/// Reads a direct metrics table. Only `id` and `alert_direct` are required;
/// absent metric columns read as `0.0`.
///
/// # Errors
///
/// Returns [`TableError`] on a missing column, an unreadable row or an
/// invalid flag.
pub fn read_direct_metrics<R: Read>(input: R) -> Result<Vec<DirectMetrics>, TableError> {
    const TABLE: &str = "direct metrics";
    let mut csv = reader(input);
    let columns = MetricColumns::resolve(TABLE, csv.headers()?, false)?;

    let mut rows = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        let row = Row {
            table: TABLE,
            index: i + 1,
            record: &record,
        };
        rows.push(columns.metrics(&row)?);
    }

    log::debug!("Read {} {TABLE} rows", rows.len());
    Ok(rows)
}

/// Reads a plot alerts table (direct metrics plus `alert_in`/`alert_out`).
/// `deforested_area` is required here.
///
/// # Errors
///
/// Returns [`TableError`] on a missing column, an unreadable row or an
/// invalid flag.
pub fn read_plot_alerts<R: Read>(input: R) -> Result<Vec<PlotAlerts>, TableError> {
    const TABLE: &str = "plot alerts";
    let mut csv = reader(input);
    let headers = csv.headers()?.clone();
    let columns = MetricColumns::resolve(TABLE, &headers, true)?;
    let alert_in = columns::ALERT_IN.resolve(TABLE, &headers)?;
    let alert_out = columns::ALERT_OUT.resolve(TABLE, &headers)?;

    let mut rows = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        let row = Row {
            table: TABLE,
            index: i + 1,
            record: &record,
        };
        rows.push(PlotAlerts {
            direct: columns.metrics(&row)?,
            alert_in: row.flag(&columns::ALERT_IN, alert_in)?,
            alert_out: row.flag(&columns::ALERT_OUT, alert_out)?,
        });
    }

    log::debug!("Read {} {TABLE} rows", rows.len());
    Ok(rows)
}

/// Reads two id columns into pairs, skipping rows where either id is empty.
fn read_id_pairs<R: Read>(
    table: &'static str,
    input: R,
    first: &ColumnSpec,
    second: &ColumnSpec,
) -> Result<Vec<(RecordId, RecordId)>, TableError> {
    let mut csv = reader(input);
    let headers = csv.headers()?;
    let a = first.resolve(table, headers)?;
    let b = second.resolve(table, headers)?;

    let mut pairs = Vec::new();
    let mut skipped = 0usize;
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        let row = Row {
            table,
            index: i + 1,
            record: &record,
        };
        if row.cell(a).is_empty() || row.cell(b).is_empty() {
            skipped += 1;
            continue;
        }
        pairs.push((row.id(a), row.id(b)));
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} {table} rows with an empty id");
    }
    log::debug!("Read {} {table} rows", pairs.len());
    Ok(pairs)
}

/// Reads a movement table (`origen_id`/`origin_id`,
/// `destination_id`/`destino_id`).
///
/// # Errors
///
/// Returns [`TableError`] on a missing column or an unreadable row.
pub fn read_movements<R: Read>(input: R) -> Result<Vec<MovementEdge>, TableError> {
    Ok(read_id_pairs(
        "movements",
        input,
        &columns::MOVEMENT_ORIGIN,
        &columns::MOVEMENT_DESTINATION,
    )?
    .into_iter()
    .map(|(origin, destination)| MovementEdge::new(origin, destination))
    .collect())
}

/// Reads a plot-to-entity mapping table.
///
/// # Errors
///
/// Returns [`TableError`] on a missing column or an unreadable row.
pub fn read_mapping<R: Read>(input: R) -> Result<Vec<PlotEntityLink>, TableError> {
    Ok(read_id_pairs(
        "mapping",
        input,
        &columns::MAPPING_PLOT_ID,
        &columns::MAPPING_ENTITY_ID,
    )?
    .into_iter()
    .map(|(plot, entity)| PlotEntityLink::new(plot, entity))
    .collect())
}

/// Reads the entity master table. Rows with an empty id are skipped; an
/// empty name is kept.
///
/// # Errors
///
/// Returns [`TableError`] on a missing column or an unreadable row.
pub fn read_entities<R: Read>(input: R) -> Result<Vec<Entity>, TableError> {
    const TABLE: &str = "entities";
    let mut csv = reader(input);
    let headers = csv.headers()?;
    let id = columns::ENTITY_ID.resolve(TABLE, headers)?;
    let name = columns::ENTITY_NAME.resolve(TABLE, headers)?;

    let mut entities = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        let row = Row {
            table: TABLE,
            index: i + 1,
            record: &record,
        };
        if row.cell(id).is_empty() {
            log::warn!("Skipping {TABLE} row {} with an empty id", row.index);
            continue;
        }
        entities.push(Entity::new(row.id(id), row.cell(name)));
    }

    log::debug!("Read {} {TABLE} rows", entities.len());
    Ok(entities)
}

/// Reads a table from a file with one of the readers above.
///
/// # Errors
///
/// Returns [`TableError::Io`] if the file cannot be opened, otherwise
/// whatever `read` returns.
pub fn read_file<T>(
    path: &Path,
    read: impl FnOnce(File) -> Result<T, TableError>,
) -> Result<T, TableError> {
    log::info!("Reading {}", path.display());
    read(File::open(path)?)
}

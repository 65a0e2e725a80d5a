#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Roll-up of plot alerts to arbitrary entities.
//!
//! The deduplicated plot-entity mapping is left-joined onto the plot rows
//! once. Entity ids are then split into balanced contiguous chunks; every
//! worker reads the shared join and tallies only its own entities. Partial
//! results are concatenated and attached to the entity master, so entities
//! without mapped plots still get a row.

use std::collections::{HashMap, HashSet};

use forest_alert_models::{Entity, EntityAggregate, PlotAlerts, PlotEntityLink, RecordId};
use forest_alert_parallel::progress::{NullProgress, ProgressCallback};
use forest_alert_parallel::{ParallelError, WorkerPool, check_worker_count};

/// Errors that can occur while aggregating entities.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The plot rows list the same plot twice.
    #[error("Duplicate plot id {0} in plot alerts")]
    DuplicatePlotId(RecordId),

    /// The worker pool could not be set up.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

/// Running totals for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tally {
    plots_total: u64,
    plots_alert_direct: u64,
    plots_alert_in: u64,
    plots_alert_out: u64,
    deforested_area_sum: f64,
}

impl Tally {
    /// Adds one mapping row. Unknown plots only count toward the total.
    fn add(&mut self, plot: Option<&PlotAlerts>) {
        self.plots_total += 1;
        if let Some(plot) = plot {
            self.plots_alert_direct += u64::from(plot.direct.alert_direct);
            self.plots_alert_in += u64::from(plot.alert_in);
            self.plots_alert_out += u64::from(plot.alert_out);
            self.deforested_area_sum += plot.direct.deforested_area_ha;
        }
    }

    fn into_aggregate(self, entity: &Entity) -> EntityAggregate {
        EntityAggregate {
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            plots_total: self.plots_total,
            plots_alert_direct: self.plots_alert_direct,
            plots_alert_in: self.plots_alert_in,
            plots_alert_out: self.plots_alert_out,
            deforested_area_sum: self.deforested_area_sum,
            alert: self.plots_alert_direct > 0
                || self.plots_alert_in > 0
                || self.plots_alert_out > 0,
        }
    }
}

/// Mapping rows left-joined onto plots, grouped by entity id in mapping
/// order. A `None` plot is a mapping row whose plot id is unknown.
type JoinedRows<'a> = HashMap<&'a RecordId, Vec<Option<&'a PlotAlerts>>>;

fn join_mapping<'a>(
    plots: &'a [PlotAlerts],
    mapping: &'a [PlotEntityLink],
) -> Result<JoinedRows<'a>, EntityError> {
    let mut by_id: HashMap<&RecordId, &PlotAlerts> = HashMap::with_capacity(plots.len());
    for plot in plots {
        if by_id.insert(plot.id(), plot).is_some() {
            return Err(EntityError::DuplicatePlotId(plot.id().clone()));
        }
    }

    let mut seen = HashSet::with_capacity(mapping.len());
    let mut joined: JoinedRows<'a> = HashMap::new();
    let mut unknown = 0usize;
    for link in mapping {
        if !seen.insert(link) {
            continue;
        }
        let plot = by_id.get(&link.plot_id).copied();
        unknown += usize::from(plot.is_none());
        joined.entry(&link.entity_id).or_default().push(plot);
    }

    log::debug!(
        "Joined {} distinct mapping rows ({} duplicates dropped, {unknown} unknown plots)",
        seen.len(),
        mapping.len() - seen.len()
    );

    Ok(joined)
}

/// Aggregates plot alerts per entity, one row per entity in `entities`,
/// sorted by entity id.
///
/// # Errors
///
/// See [`aggregate_by_entity_with_progress`].
pub fn aggregate_by_entity(
    plots: &[PlotAlerts],
    entities: &[Entity],
    mapping: &[PlotEntityLink],
    worker_count: usize,
) -> Result<Vec<EntityAggregate>, EntityError> {
    aggregate_by_entity_with_progress(plots, entities, mapping, worker_count, &NullProgress)
}

/// Aggregates plot alerts per entity, ticking `progress` once per chunk.
///
/// Repeated `(plot_id, entity_id)` mapping pairs count once. Mapping rows for
/// plots missing from `plots` still add to `plots_total`. Identical master
/// rows collapse to one; an id listed with two different names keeps both
/// rows.
///
/// # Errors
///
/// Returns [`EntityError`] for a zero worker count, duplicate plot ids, or a
/// worker pool that cannot start.
pub fn aggregate_by_entity_with_progress(
    plots: &[PlotAlerts],
    entities: &[Entity],
    mapping: &[PlotEntityLink],
    worker_count: usize,
    progress: &dyn ProgressCallback,
) -> Result<Vec<EntityAggregate>, EntityError> {
    check_worker_count(worker_count)?;

    log::info!(
        "Aggregating {} plots onto {} entities through {} mapping rows",
        plots.len(),
        entities.len(),
        mapping.len()
    );

    let joined = join_mapping(plots, mapping)?;

    let mut master: Vec<&Entity> = Vec::with_capacity(entities.len());
    let mut seen = HashSet::with_capacity(entities.len());
    for entity in entities {
        if seen.insert(entity) {
            master.push(entity);
        }
    }
    master.sort_by(|a, b| a.id.cmp(&b.id));

    let mut entity_ids: Vec<&RecordId> = master.iter().map(|entity| &entity.id).collect();
    entity_ids.dedup();

    let pool = WorkerPool::new(worker_count)?;
    progress.set_total(entity_ids.len().min(worker_count) as u64);
    progress.set_message("Aggregating entities".to_string());

    let partials = pool.map_chunks(&entity_ids, |chunk| {
        let tallies: Vec<(&RecordId, Tally)> = chunk
            .iter()
            .filter_map(|id| {
                let rows = joined.get(*id)?;
                let mut tally = Tally::default();
                for plot in rows {
                    tally.add(*plot);
                }
                Some((*id, tally))
            })
            .collect();
        progress.inc(1);
        Ok::<_, EntityError>(tallies)
    })?;

    let tallies: HashMap<&RecordId, Tally> = partials.into_iter().flatten().collect();

    let aggregates: Vec<EntityAggregate> = master
        .into_iter()
        .map(|entity| {
            tallies.get(&entity.id).map_or_else(
                || EntityAggregate::empty(entity),
                |tally| tally.into_aggregate(entity),
            )
        })
        .collect();

    let alerted = aggregates.iter().filter(|row| row.alert).count();
    progress.finish(format!("{alerted} of {} entities alerted", aggregates.len()));
    log::info!(
        "Entity aggregation done: {alerted} of {} entities alerted",
        aggregates.len()
    );

    Ok(aggregates)
}

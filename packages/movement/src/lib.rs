#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Indirect alerts from the movement network.
//!
//! Edges are grouped once into two read-only lookup tables:
//!
//! - `alert_in[origin]`: some edge leaving `origin` reaches a plot with a
//!   direct alert.
//! - `alert_out[destination]`: some edge arriving at `destination` comes
//!   from a plot with a direct alert.
//!
//! The flags are keyed relative to the edge, so a plot that *sends* to an
//! alerted plot gets `alert_in` and a plot that *receives* from one gets
//! `alert_out`. Plot ids are then split into balanced chunks and each chunk
//! is resolved against the shared tables.

use std::collections::{HashMap, HashSet};

use forest_alert_models::{
    DirectMetrics, IndirectFlags, IndirectMetrics, MovementEdge, PlotAlerts, RecordId,
};
use forest_alert_parallel::progress::{NullProgress, ProgressCallback};
use forest_alert_parallel::{ParallelError, WorkerPool, check_worker_count};

/// Errors that can occur while propagating alerts.
#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    /// The direct metrics list the same plot twice.
    #[error("Duplicate plot id {0} in direct metrics")]
    DuplicatePlotId(RecordId),

    /// The worker pool could not be set up.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

/// Flag lookup tables built from the edge list.
#[derive(Debug, Default)]
struct Lookups<'a> {
    alert_in: HashMap<&'a RecordId, bool>,
    alert_out: HashMap<&'a RecordId, bool>,
}

impl<'a> Lookups<'a> {
    fn build(direct: &HashMap<&RecordId, bool>, edges: &'a [MovementEdge]) -> Self {
        let mut lookups = Self::default();
        for edge in edges {
            let destination_alert = direct.get(&edge.destination).copied().unwrap_or(false);
            let origin_alert = direct.get(&edge.origin).copied().unwrap_or(false);

            *lookups.alert_in.entry(&edge.origin).or_default() |= destination_alert;
            *lookups.alert_out.entry(&edge.destination).or_default() |= origin_alert;
        }
        lookups
    }

    fn flags(&self, id: &RecordId) -> IndirectFlags {
        IndirectFlags {
            alert_in: self.alert_in.get(id).copied().unwrap_or(false),
            alert_out: self.alert_out.get(id).copied().unwrap_or(false),
        }
    }
}

/// Computes `alert_in`/`alert_out` for every plot in `direct`, sorted by
/// plot id.
///
/// # Errors
///
/// See [`compute_indirect_metrics_with_progress`].
pub fn compute_indirect_metrics(
    direct: &[DirectMetrics],
    edges: &[MovementEdge],
    worker_count: usize,
) -> Result<Vec<IndirectMetrics>, MovementError> {
    compute_indirect_metrics_with_progress(direct, edges, worker_count, &NullProgress)
}

/// Computes `alert_in`/`alert_out` for every plot in `direct`, sorted by
/// plot id, ticking `progress` once per chunk.
///
/// Edges that mention plots missing from `direct` still count: an unknown
/// plot has no direct alert, but a known plot sending to it is looked up
/// as usual.
///
/// # Errors
///
/// Returns [`MovementError`] for a zero worker count, duplicate plot ids
/// in `direct`, or a worker pool that cannot start.
pub fn compute_indirect_metrics_with_progress(
    direct: &[DirectMetrics],
    edges: &[MovementEdge],
    worker_count: usize,
    progress: &dyn ProgressCallback,
) -> Result<Vec<IndirectMetrics>, MovementError> {
    check_worker_count(worker_count)?;

    let mut alert_direct = HashMap::with_capacity(direct.len());
    for row in direct {
        if alert_direct.insert(&row.id, row.alert_direct).is_some() {
            return Err(MovementError::DuplicatePlotId(row.id.clone()));
        }
    }

    log::info!(
        "Propagating direct alerts over {} movements for {} plots",
        edges.len(),
        direct.len()
    );

    let lookups = Lookups::build(&alert_direct, edges);
    log::debug!(
        "Movement lookups: {} origins, {} destinations",
        lookups.alert_in.len(),
        lookups.alert_out.len()
    );

    let mut ids: Vec<&RecordId> = direct.iter().map(|row| &row.id).collect();
    ids.sort();

    let pool = WorkerPool::new(worker_count)?;
    progress.set_total(ids.len().min(worker_count) as u64);
    progress.set_message("Propagating movement alerts".to_string());

    let chunks = pool.map_chunks(&ids, |chunk| {
        let rows: Vec<IndirectMetrics> = chunk
            .iter()
            .map(|id| {
                let flags = lookups.flags(id);
                IndirectMetrics {
                    id: (*id).clone(),
                    alert_in: flags.alert_in,
                    alert_out: flags.alert_out,
                }
            })
            .collect();
        progress.inc(1);
        Ok::<_, MovementError>(rows)
    })?;

    let indirect: Vec<IndirectMetrics> = chunks.into_iter().flatten().collect();

    let flagged = indirect
        .iter()
        .filter(|row| row.alert_in || row.alert_out)
        .count();
    progress.finish(format!("{flagged} plots with indirect alerts"));
    log::info!(
        "Indirect metrics done: {flagged} of {} plots flagged",
        indirect.len()
    );

    Ok(indirect)
}

/// Attaches indirect flags to the direct rows, keeping `direct`'s order.
/// Plots without an indirect row get `false` for both flags.
#[must_use]
pub fn merge_indirect(direct: &[DirectMetrics], indirect: &[IndirectMetrics]) -> Vec<PlotAlerts> {
    let flags: HashMap<&RecordId, IndirectFlags> =
        indirect.iter().map(|row| (&row.id, row.flags())).collect();

    direct
        .iter()
        .map(|row| {
            let flags = flags.get(&row.id).copied().unwrap_or_default();
            PlotAlerts {
                direct: row.clone(),
                alert_in: flags.alert_in,
                alert_out: flags.alert_out,
            }
        })
        .collect()
}

/// Plots reached by no edge at all, in id order.
#[must_use]
pub fn isolated_plots<'a>(
    direct: &'a [DirectMetrics],
    edges: &[MovementEdge],
) -> Vec<&'a RecordId> {
    let connected: HashSet<&RecordId> = edges
        .iter()
        .flat_map(|edge| [&edge.origin, &edge.destination])
        .collect();

    let mut isolated: Vec<&RecordId> = direct
        .iter()
        .map(|row| &row.id)
        .filter(|id| !connected.contains(id))
        .collect();
    isolated.sort();
    isolated
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn direct_row(id: impl Into<RecordId>, alert_direct: bool) -> DirectMetrics {
        DirectMetrics {
            id: id.into(),
            plot_area_ha: 1.0,
            deforested_area_ha: if alert_direct { 0.5 } else { 0.0 },
            deforested_proportion: if alert_direct { 0.5 } else { 0.0 },
            protected_area_ha: 0.0,
            protected_proportion: 0.0,
            farming_in_area_ha: 0.0,
            farming_in_proportion: 0.0,
            farming_out_area_ha: 1.0,
            farming_out_proportion: 1.0,
            alert_direct,
        }
    }

    fn cycle() -> (Vec<DirectMetrics>, Vec<MovementEdge>) {
        let direct = vec![
            direct_row("E", true),
            direct_row("D", false),
            direct_row("C", true),
            direct_row("B", false),
            direct_row("A", true),
        ];
        let edges = vec![
            MovementEdge::new("A", "B"),
            MovementEdge::new("A", "D"),
            MovementEdge::new("B", "C"),
            MovementEdge::new("C", "D"),
            MovementEdge::new("D", "A"),
        ];
        (direct, edges)
    }

    fn flags_of(rows: &[IndirectMetrics]) -> Vec<(String, bool, bool)> {
        rows.iter()
            .map(|row| (row.id.to_string(), row.alert_in, row.alert_out))
            .collect()
    }

    #[test]
    fn propagates_one_hop_through_cycle() {
        let (direct, edges) = cycle();
        let indirect = compute_indirect_metrics(&direct, &edges, 2).unwrap();
        assert_eq!(
            flags_of(&indirect),
            vec![
                ("A".to_owned(), false, false),
                ("B".to_owned(), true, true),
                ("C".to_owned(), false, false),
                ("D".to_owned(), true, true),
                ("E".to_owned(), false, false),
            ]
        );
    }

    #[test]
    fn in_and_out_are_keyed_by_edge_side() {
        // Only the origin is alerted: the destination receives `alert_out`,
        // the origin itself gets nothing.
        let direct = vec![direct_row(1_i64, true), direct_row(2_i64, false)];
        let edges = vec![MovementEdge::new(1_i64, 2_i64)];
        let indirect = compute_indirect_metrics(&direct, &edges, 1).unwrap();
        assert_eq!(
            flags_of(&indirect),
            vec![("1".to_owned(), false, false), ("2".to_owned(), false, true)]
        );
    }

    #[test]
    fn self_loops_and_duplicate_edges() {
        let direct = vec![direct_row(1_i64, true), direct_row(2_i64, false)];
        let edges = vec![
            MovementEdge::new(1_i64, 1_i64),
            MovementEdge::new(2_i64, 1_i64),
            MovementEdge::new(2_i64, 1_i64),
        ];
        let indirect = compute_indirect_metrics(&direct, &edges, 3).unwrap();
        assert_eq!(
            flags_of(&indirect),
            vec![("1".to_owned(), true, true), ("2".to_owned(), true, false)]
        );
    }

    #[test]
    fn unknown_plots_in_edges_are_not_alerted() {
        let direct = vec![direct_row("known", false)];
        let edges = vec![
            MovementEdge::new("known", "ghost"),
            MovementEdge::new("ghost", "known"),
        ];
        let indirect = compute_indirect_metrics(&direct, &edges, 1).unwrap();
        assert_eq!(flags_of(&indirect), vec![("known".to_owned(), false, false)]);
    }

    #[test]
    fn no_edges_means_no_indirect_alerts() {
        let (direct, _) = cycle();
        let indirect = compute_indirect_metrics(&direct, &[], 2).unwrap();
        assert_eq!(indirect.len(), 5);
        assert!(indirect.iter().all(|row| !row.alert_in && !row.alert_out));
    }

    #[test]
    fn rejects_zero_workers_and_duplicates() {
        let (direct, edges) = cycle();
        assert!(matches!(
            compute_indirect_metrics(&direct, &edges, 0),
            Err(MovementError::Parallel(ParallelError::InvalidWorkerCount(0)))
        ));

        let dup = vec![direct_row(5_i64, false), direct_row("5", true)];
        assert!(matches!(
            compute_indirect_metrics(&dup, &edges, 1),
            Err(MovementError::DuplicatePlotId(RecordId::Int(5)))
        ));
    }

    #[test]
    fn merge_keeps_direct_order_and_defaults_flags() {
        let (direct, edges) = cycle();
        let indirect = compute_indirect_metrics(&direct, &edges, 2).unwrap();
        let merged = merge_indirect(&direct, &indirect[..2]);

        let ids: Vec<String> = merged.iter().map(|row| row.id().to_string()).collect();
        assert_eq!(ids, vec!["E", "D", "C", "B", "A"]);

        let b = merged.iter().find(|row| row.id() == &RecordId::from("B")).unwrap();
        assert!(b.alert_in && b.alert_out);
        // D's indirect row was left out of the slice.
        let d = merged.iter().find(|row| row.id() == &RecordId::from("D")).unwrap();
        assert!(!d.alert_in && !d.alert_out);
        assert_eq!(d.direct, direct[1]);
    }

    #[test]
    fn finds_isolated_plots() {
        let (direct, edges) = cycle();
        assert_eq!(isolated_plots(&direct, &edges), vec![&RecordId::from("E")]);
    }

    proptest! {
        #[test]
        fn worker_count_does_not_change_output(
            alerts in proptest::collection::vec(any::<bool>(), 1..40),
            raw_edges in proptest::collection::vec((0i64..50, 0i64..50), 0..120),
            workers in 2usize..8,
        ) {
            let direct: Vec<DirectMetrics> = alerts
                .iter()
                .enumerate()
                .map(|(i, alert)| direct_row(i64::try_from(i).unwrap(), *alert))
                .collect();
            let edges: Vec<MovementEdge> = raw_edges
                .into_iter()
                .map(|(o, d)| MovementEdge::new(o, d))
                .collect();

            let serial = compute_indirect_metrics(&direct, &edges, 1).unwrap();
            let parallel = compute_indirect_metrics(&direct, &edges, workers).unwrap();
            prop_assert_eq!(&serial, &parallel);

            for row in &serial {
                let expected_in = edges.iter().any(|e| {
                    e.origin == row.id
                        && direct.iter().any(|d| d.id == e.destination && d.alert_direct)
                });
                let expected_out = edges.iter().any(|e| {
                    e.destination == row.id
                        && direct.iter().any(|d| d.id == e.origin && d.alert_direct)
                });
                prop_assert_eq!(row.alert_in, expected_in);
                prop_assert_eq!(row.alert_out, expected_out);
            }
        }
    }
}

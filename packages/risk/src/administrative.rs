//! Risk averaged over the administrative hierarchy (adm1 > adm2 > adm3).
//!
//! Plot and enterprise levels are averaged separately per unit. The two
//! sides are then outer-joined, a missing side counting as zero, and the
//! mean of both sides is classified.

use std::collections::BTreeMap;

use forest_alert_models::RecordId;

use crate::{RiskLevel, mean};

/// Location of a plot or enterprise in the administrative hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdminPath {
    pub adm1_id: RecordId,
    pub adm1_name: String,
    pub adm2_id: RecordId,
    pub adm2_name: String,
    pub adm3_id: RecordId,
    pub adm3_name: String,
}

/// Averaged score of one unit and its classification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdminScore {
    pub score: f64,
    pub level: RiskLevel,
}

/// One adm3 unit with the scores of its enclosing units.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRisk {
    pub path: AdminPath,
    pub adm1: AdminScore,
    pub adm2: AdminScore,
    pub adm3: AdminScore,
}

type Adm1Key = (RecordId, String);
type Adm2Key = (RecordId, String, RecordId, String);

fn adm1_key(path: &AdminPath) -> Adm1Key {
    (path.adm1_id.clone(), path.adm1_name.clone())
}

fn adm2_key(path: &AdminPath) -> Adm2Key {
    (
        path.adm1_id.clone(),
        path.adm1_name.clone(),
        path.adm2_id.clone(),
        path.adm2_name.clone(),
    )
}

fn side_means<K: Ord>(
    rows: &[(AdminPath, RiskLevel)],
    key: impl Fn(&AdminPath) -> K,
) -> BTreeMap<K, f64> {
    let mut grouped: BTreeMap<K, Vec<f64>> = BTreeMap::new();
    for (path, level) in rows {
        grouped.entry(key(path)).or_default().push(f64::from(level.value()));
    }
    grouped
        .into_iter()
        .map(|(k, values)| (k, mean(values)))
        .collect()
}

fn level_scores<K: Ord + Clone>(
    plots: &[(AdminPath, RiskLevel)],
    enterprises: &[(AdminPath, RiskLevel)],
    key: impl Fn(&AdminPath) -> K + Copy,
) -> BTreeMap<K, AdminScore> {
    let plot_means = side_means(plots, key);
    let enterprise_means = side_means(enterprises, key);

    plot_means
        .keys()
        .chain(enterprise_means.keys())
        .map(|k| {
            let plot = plot_means.get(k).copied().unwrap_or(0.0);
            let enterprise = enterprise_means.get(k).copied().unwrap_or(0.0);
            let score = f64::midpoint(plot, enterprise);
            (
                k.clone(),
                AdminScore {
                    score,
                    level: RiskLevel::classify(score),
                },
            )
        })
        .collect()
}

/// Rolls plot and enterprise risk levels up the hierarchy. Returns one row
/// per adm3 unit seen on either side, ordered by path.
#[must_use]
pub fn administrative_risk(
    plots: &[(AdminPath, RiskLevel)],
    enterprises: &[(AdminPath, RiskLevel)],
) -> Vec<AdminRisk> {
    let adm1 = level_scores(plots, enterprises, adm1_key);
    let adm2 = level_scores(plots, enterprises, adm2_key);
    let adm3 = level_scores(plots, enterprises, AdminPath::clone);

    log::debug!(
        "Administrative rollup: {} adm1, {} adm2, {} adm3 units",
        adm1.len(),
        adm2.len(),
        adm3.len()
    );

    adm3.into_iter()
        .map(|(path, adm3)| AdminRisk {
            adm1: adm1.get(&adm1_key(&path)).copied().unwrap_or_default(),
            adm2: adm2.get(&adm2_key(&path)).copied().unwrap_or_default(),
            adm3,
            path,
        })
        .collect()
}

//! Enterprise risk from the total risk of supplier plots.

use std::collections::HashMap;

use forest_alert_models::{PlotEntityLink, RecordId};

use crate::RiskLevel;

/// Share of high-risk supplier rows that flags deforestation.
pub const DEFORESTATION_HIGH_SHARE: f64 = 0.05;

/// Minimum share of supplier rows with a known plot risk.
pub const GEOLOCATION_COVERAGE: f64 = 0.61;

/// Coverage needed for a flagged enterprise to stay at medium.
pub const MEDIUM_COVERAGE: f64 = 0.41;

/// Risk verdict for one enterprise.
#[derive(Debug, Clone, PartialEq)]
pub struct EnterpriseRisk {
    pub enterprise_id: RecordId,
    pub level: RiskLevel,
    /// Known-risk supplier rows over all supplier rows.
    pub coverage: f64,
    pub deforestation_high: bool,
    pub location_restricted: bool,
    pub municipality_critical: bool,
    pub geolocation_coverage: bool,
}

/// Evaluates every enterprise in `enterprises`, in the given order.
///
/// `suppliers` links plots to enterprises (the link's `entity_id` is the
/// enterprise). Supplier plots missing from `plot_risk` count toward the
/// supplier total but not toward coverage.
#[must_use]
pub fn enterprise_risk(
    enterprises: &[RecordId],
    suppliers: &[PlotEntityLink],
    plot_risk: &HashMap<RecordId, RiskLevel>,
) -> Vec<EnterpriseRisk> {
    let mut by_enterprise: HashMap<&RecordId, Vec<&RecordId>> = HashMap::new();
    for link in suppliers {
        by_enterprise
            .entry(&link.entity_id)
            .or_default()
            .push(&link.plot_id);
    }

    log::info!(
        "Evaluating risk for {} enterprises from {} supplier rows",
        enterprises.len(),
        suppliers.len()
    );

    enterprises
        .iter()
        .map(|id| {
            let plots = by_enterprise.get(id).map_or(&[][..], Vec::as_slice);
            evaluate(id, plots, plot_risk)
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn evaluate(
    enterprise_id: &RecordId,
    plots: &[&RecordId],
    plot_risk: &HashMap<RecordId, RiskLevel>,
) -> EnterpriseRisk {
    let known: Vec<RiskLevel> = plots
        .iter()
        .filter_map(|plot| plot_risk.get(*plot).copied())
        .collect();

    let total = plots.len() as f64;
    let high = known.iter().filter(|r| **r == RiskLevel::High).count() as f64;
    let coverage = if plots.is_empty() {
        0.0
    } else {
        known.len() as f64 / total
    };

    let deforestation_high = !plots.is_empty() && high / total >= DEFORESTATION_HIGH_SHARE;
    let location_restricted = known
        .iter()
        .any(|r| matches!(r, RiskLevel::High | RiskLevel::Medium));
    let municipality_critical = location_restricted;
    let geolocation_coverage = coverage >= GEOLOCATION_COVERAGE;

    let flagged = deforestation_high || location_restricted || municipality_critical;
    let level = if !geolocation_coverage || deforestation_high {
        RiskLevel::High
    } else if flagged && coverage >= MEDIUM_COVERAGE {
        RiskLevel::Medium
    } else if flagged {
        RiskLevel::High
    } else {
        RiskLevel::Low
    };

    EnterpriseRisk {
        enterprise_id: enterprise_id.clone(),
        level,
        coverage,
        deforestation_high,
        location_restricted,
        municipality_critical,
        geolocation_coverage,
    }
}

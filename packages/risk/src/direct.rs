//! Direct plot risk from measured deforestation and proximity to protected
//! areas.

use std::collections::HashMap;

use forest_alert_models::{DirectMetrics, RecordId};
use forest_alert_spatial::{Plot, UnionLayer};

use crate::{RiskError, RiskLevel};

/// A deforested plot closer than this to a protected area (in layer units,
/// metres for a projected reference) is high risk.
pub const PROTECTED_AREA_DISTANCE: f64 = 500.0;

/// Direct risk verdict for one plot.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectRisk {
    pub id: RecordId,
    pub deforested_area_ha: f64,
    pub deforested_proportion: f64,
    /// `None` when the protected-area layer or the plot has no geometry.
    pub distance_to_protected_area: Option<f64>,
    /// `None` when the frontier layer or the plot has no geometry.
    pub distance_to_farming_frontier: Option<f64>,
    /// [`RiskLevel::High`] or [`RiskLevel::Low`].
    pub level: RiskLevel,
}

impl DirectRisk {
    fn evaluate(metrics: &DirectMetrics, protected: Option<f64>, frontier: Option<f64>) -> Self {
        let near_protected = protected.is_some_and(|d| d < PROTECTED_AREA_DISTANCE);
        let level = if metrics.deforested_area_ha > 0.0 && near_protected {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };

        Self {
            id: metrics.id.clone(),
            deforested_area_ha: metrics.deforested_area_ha,
            deforested_proportion: metrics.deforested_proportion,
            distance_to_protected_area: protected,
            distance_to_farming_frontier: frontier,
            level,
        }
    }
}

/// Scores every row of `metrics` against the geometry of its plot, in the
/// order of `metrics`.
///
/// # Errors
///
/// Returns [`RiskError::UnknownPlot`] when a metrics row names a plot that is
/// not in `plots`.
pub fn direct_risk(
    metrics: &[DirectMetrics],
    plots: &[Plot],
    protected: &UnionLayer,
    frontier: &UnionLayer,
) -> Result<Vec<DirectRisk>, RiskError> {
    let by_id: HashMap<&RecordId, &Plot> = plots.iter().map(|plot| (&plot.id, plot)).collect();

    let rows = metrics
        .iter()
        .map(|row| {
            let plot = by_id
                .get(&row.id)
                .ok_or_else(|| RiskError::UnknownPlot(row.id.clone()))?;
            Ok(DirectRisk::evaluate(
                row,
                protected.distance(&plot.geometry),
                frontier.distance(&plot.geometry),
            ))
        })
        .collect::<Result<Vec<_>, RiskError>>()?;

    let high = rows.iter().filter(|r| r.level == RiskLevel::High).count();
    log::info!("Direct risk: {high} of {} plots high", rows.len());

    Ok(rows)
}

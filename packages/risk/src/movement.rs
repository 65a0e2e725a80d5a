//! Inbound and outbound movement risk for a plot.

use std::str::FromStr;

use forest_alert_models::RecordId;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{RiskError, RiskLevel, mean};

/// Which side of the plot a movement record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Animals arriving at the destination plot.
    Entrada,
    /// Animals leaving the origin plot.
    Salida,
}

/// A movement carrying the risk label of the counterpart plot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledMovement {
    pub origin: RecordId,
    pub destination: RecordId,
    pub direction: Direction,
    /// Level label, e.g. `ALTO`. Unknown labels score 0.
    pub level: String,
}

impl LabelledMovement {
    /// # Errors
    ///
    /// Returns [`RiskError::UnknownDirection`] unless `direction` is
    /// `entrada` or `salida`.
    pub fn new(
        origin: impl Into<RecordId>,
        destination: impl Into<RecordId>,
        direction: &str,
        level: impl Into<String>,
    ) -> Result<Self, RiskError> {
        let direction = Direction::from_str(direction.trim())
            .map_err(|_| RiskError::UnknownDirection(direction.to_owned()))?;
        Ok(Self {
            origin: origin.into(),
            destination: destination.into(),
            direction,
            level: level.into(),
        })
    }
}

/// Averaged movement risk for one plot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRisk {
    pub plot_id: RecordId,
    /// Risk of `entrada` movements arriving at the plot.
    pub inbound: RiskLevel,
    /// Risk of `salida` movements leaving the plot.
    pub outbound: RiskLevel,
}

/// Averages the levels of `entrada` movements arriving at `plot_id` and of
/// `salida` movements leaving it. No movements on a side means low risk.
#[must_use]
pub fn movement_risk(plot_id: &RecordId, movements: &[LabelledMovement]) -> MovementRisk {
    let level_of = |m: &LabelledMovement| f64::from(RiskLevel::graded_value(&m.level).unwrap_or(0));

    let inbound = mean(
        movements
            .iter()
            .filter(|m| m.direction == Direction::Entrada && &m.destination == plot_id)
            .map(level_of),
    );
    let outbound = mean(
        movements
            .iter()
            .filter(|m| m.direction == Direction::Salida && &m.origin == plot_id)
            .map(level_of),
    );

    MovementRisk {
        plot_id: plot_id.clone(),
        inbound: RiskLevel::classify_graded(inbound),
        outbound: RiskLevel::classify_graded(outbound),
    }
}

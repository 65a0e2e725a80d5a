#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scalar risk levels and the rollups built on them.
//!
//! Scores are averages of level values (`1..=3`). [`RiskLevel::classify`]
//! maps a score onto the four-level scale, while the movement and total
//! rollups use the three graded labels only (see
//! [`RiskLevel::classify_graded`]).

pub mod administrative;
pub mod direct;
pub mod enterprise;
pub mod movement;
pub mod total;

use forest_alert_models::RecordId;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors raised while reading risk inputs.
#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    /// A movement direction other than `entrada` or `salida`.
    #[error("Unknown movement direction {0:?} (expected \"entrada\" or \"salida\")")]
    UnknownDirection(String),

    /// A metrics row whose plot geometry was not supplied.
    #[error("No geometry for plot {0}")]
    UnknownPlot(RecordId),
}

/// Categorical deforestation risk.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum RiskLevel {
    #[default]
    #[serde(rename = "SIN_RIESGO")]
    #[strum(serialize = "SIN_RIESGO")]
    NoRisk = 0,
    #[serde(rename = "BAJO")]
    #[strum(serialize = "BAJO")]
    Low = 1,
    #[serde(rename = "MEDIO")]
    #[strum(serialize = "MEDIO")]
    Medium = 2,
    #[serde(rename = "ALTO")]
    #[strum(serialize = "ALTO")]
    High = 3,
}

impl RiskLevel {
    /// Four-level classification: `>= 2.5` high, `>= 1.5` medium, any
    /// positive score low, otherwise no risk.
    #[must_use]
    pub fn classify(score: f64) -> Self {
        if score >= 2.5 {
            Self::High
        } else if score >= 1.5 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::NoRisk
        }
    }

    /// Three-level classification used for averaged labels: everything
    /// below medium is low.
    #[must_use]
    pub fn classify_graded(score: f64) -> Self {
        match Self::classify(score) {
            Self::NoRisk => Self::Low,
            level => level,
        }
    }

    /// Numeric value (`0..=3`).
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Value of a graded label (`BAJO`, `MEDIO`, `ALTO`, any case); `None`
    /// for anything else, including `SIN_RIESGO`.
    #[must_use]
    pub fn graded_value(label: &str) -> Option<u8> {
        match label.trim().parse::<Self>() {
            Ok(Self::NoRisk) | Err(_) => None,
            Ok(level) => Some(level.value()),
        }
    }
}

/// Mean of `values`, or `0.0` when empty.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

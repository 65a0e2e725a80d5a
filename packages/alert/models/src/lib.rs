#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Row types flowing between the three alert pipeline stages.
//!
//! The overlay stage produces [`DirectMetrics`], the movement stage adds
//! [`IndirectMetrics`] (merged into [`PlotAlerts`]), and the entity stage
//! rolls plots up into [`EntityAggregate`] rows. All rows are plain values:
//! nothing here outlives a single pipeline invocation.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a plot or an entity.
///
/// Upstream tables mix integer and text identifiers, so an id is either an
/// [`i64`] or an arbitrary string. Integers sort before text, which keeps the
/// output order deterministic for mixed columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordId {
    /// Integer identifier (e.g. `101`).
    Int(i64),
    /// Text identifier (e.g. `"P-0042"`).
    Text(String),
}

impl RecordId {
    /// Parses a raw cell into an id.
    ///
    /// The text becomes [`RecordId::Int`] only when it is the canonical
    /// decimal rendering of an `i64`, so `"101"` matches the integer `101`
    /// while `"007"` or `"+5"` stay text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(value) if value.to_string() == trimmed => Self::Int(value),
            _ => Self::Text(trimmed.to_owned()),
        }
    }

    /// Returns the integer value, if this is an integer id.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Text(value) => serializer.serialize_str(value),
        }
    }
}

struct RecordIdVisitor;

impl Visitor<'_> for RecordIdVisitor {
    type Value = RecordId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string identifier")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<RecordId, E> {
        Ok(RecordId::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<RecordId, E> {
        Ok(i64::try_from(value).map_or_else(|_| RecordId::Text(value.to_string()), RecordId::Int))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn visit_f64<E: de::Error>(self, value: f64) -> Result<RecordId, E> {
        // Integral floats come from spreadsheets that widened an id column.
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Ok(RecordId::Int(value as i64))
        } else {
            Ok(RecordId::Text(value.to_string()))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<RecordId, E> {
        Ok(RecordId::parse(value))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RecordIdVisitor)
    }
}

/// Land-use and deforestation metrics for one plot.
///
/// Areas are in hectares; proportions are relative to `plot_area_ha` and are
/// `0.0` for plots with no area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMetrics {
    /// Plot identifier.
    pub id: RecordId,
    /// Planar area of the plot polygon.
    #[serde(rename = "plot_area")]
    pub plot_area_ha: f64,
    /// Area of covered raster cells carrying the deforested class code.
    #[serde(rename = "deforested_area")]
    pub deforested_area_ha: f64,
    /// `deforested_area_ha / plot_area_ha`.
    pub deforested_proportion: f64,
    /// Exact overlap with the protected-area layer.
    #[serde(rename = "protected_areas_area")]
    pub protected_area_ha: f64,
    /// `protected_area_ha / plot_area_ha`.
    #[serde(rename = "protected_areas_proportion")]
    pub protected_proportion: f64,
    /// Overlap with the farming frontier, capped at the plot area.
    #[serde(rename = "farming_in_area")]
    pub farming_in_area_ha: f64,
    /// `farming_in_area_ha / plot_area_ha`.
    pub farming_in_proportion: f64,
    /// Plot area outside the farming frontier.
    #[serde(rename = "farming_out_area")]
    pub farming_out_area_ha: f64,
    /// `farming_out_area_ha / plot_area_ha`.
    pub farming_out_proportion: f64,
    /// `true` when any deforestation was measured inside the plot.
    pub alert_direct: bool,
}

/// Indirect alert flags derived from the movement network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndirectFlags {
    /// The plot sends movements to at least one directly alerted plot.
    pub alert_in: bool,
    /// The plot receives movements from at least one directly alerted plot.
    pub alert_out: bool,
}

/// Per-plot output of the movement stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectMetrics {
    /// Plot identifier.
    pub id: RecordId,
    /// See [`IndirectFlags::alert_in`].
    pub alert_in: bool,
    /// See [`IndirectFlags::alert_out`].
    pub alert_out: bool,
}

impl IndirectMetrics {
    /// Returns the two flags without the id.
    #[must_use]
    pub const fn flags(&self) -> IndirectFlags {
        IndirectFlags {
            alert_in: self.alert_in,
            alert_out: self.alert_out,
        }
    }
}

/// Direct metrics with the indirect flags merged on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotAlerts {
    /// Metrics from the overlay stage.
    #[serde(flatten)]
    pub direct: DirectMetrics,
    /// See [`IndirectFlags::alert_in`].
    pub alert_in: bool,
    /// See [`IndirectFlags::alert_out`].
    pub alert_out: bool,
}

impl PlotAlerts {
    /// Plot identifier.
    #[must_use]
    pub const fn id(&self) -> &RecordId {
        &self.direct.id
    }
}

/// A directed movement between two plots.
///
/// Edges may repeat and may be self-loops; the movement stage treats every
/// edge identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementEdge {
    /// Plot the movement leaves from.
    #[serde(rename = "origen_id")]
    pub origin: RecordId,
    /// Plot the movement arrives at.
    #[serde(rename = "destination_id")]
    pub destination: RecordId,
}

impl MovementEdge {
    /// Creates an edge from `origin` to `destination`.
    #[must_use]
    pub fn new(origin: impl Into<RecordId>, destination: impl Into<RecordId>) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
        }
    }
}

/// A row of the entity master table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Entity identifier.
    #[serde(rename = "entity_id")]
    pub id: RecordId,
    /// Human-readable entity name.
    #[serde(rename = "entity_name")]
    pub name: String,
}

impl Entity {
    /// Creates an entity row.
    #[must_use]
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One plot-to-entity relation. The mapping is many-to-many.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlotEntityLink {
    /// Plot identifier (may be unknown to the metrics table).
    pub plot_id: RecordId,
    /// Entity identifier.
    pub entity_id: RecordId,
}

impl PlotEntityLink {
    /// Creates a mapping row.
    #[must_use]
    pub fn new(plot_id: impl Into<RecordId>, entity_id: impl Into<RecordId>) -> Self {
        Self {
            plot_id: plot_id.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Summary of one entity's plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAggregate {
    /// Entity identifier.
    pub entity_id: RecordId,
    /// Entity name from the master table.
    pub entity_name: String,
    /// Number of (deduplicated) mapping rows for this entity.
    pub plots_total: u64,
    /// Mapped plots with a direct alert.
    pub plots_alert_direct: u64,
    /// Mapped plots flagged `alert_in`.
    pub plots_alert_in: u64,
    /// Mapped plots flagged `alert_out`.
    pub plots_alert_out: u64,
    /// Sum of the mapped plots' deforested area in hectares.
    pub deforested_area_sum: f64,
    /// Any of the three alert counts is non-zero.
    pub alert: bool,
}

impl EntityAggregate {
    /// An entity with no mapped plots.
    #[must_use]
    pub fn empty(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            plots_total: 0,
            plots_alert_direct: 0,
            plots_alert_in: 0,
            plots_alert_out: 0,
            deforested_area_sum: 0.0,
            alert: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_integers() {
        assert_eq!(RecordId::parse("101"), RecordId::Int(101));
        assert_eq!(RecordId::parse(" -7 "), RecordId::Int(-7));
    }

    #[test]
    fn keeps_non_canonical_numbers_as_text() {
        assert_eq!(RecordId::parse("007"), RecordId::Text("007".to_owned()));
        assert_eq!(RecordId::parse("+5"), RecordId::Text("+5".to_owned()));
        assert_eq!(RecordId::parse("P-1"), RecordId::Text("P-1".to_owned()));
    }

    #[test]
    fn integers_sort_before_text() {
        let mut ids = vec![
            RecordId::from("b"),
            RecordId::from(10),
            RecordId::from("a"),
            RecordId::from(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                RecordId::Int(2),
                RecordId::Int(10),
                RecordId::Text("a".to_owned()),
                RecordId::Text("b".to_owned()),
            ]
        );
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let ids: Vec<RecordId> = serde_json::from_str(r#"[1, "2", "X", 3.0]"#).unwrap();
        assert_eq!(
            ids,
            vec![
                RecordId::Int(1),
                RecordId::Int(2),
                RecordId::Text("X".to_owned()),
                RecordId::Int(3),
            ]
        );
    }

    #[test]
    fn serializes_ids_as_their_native_json_type() {
        let json = serde_json::to_string(&[RecordId::Int(4), RecordId::from("A")]).unwrap();
        assert_eq!(json, r#"[4,"A"]"#);
    }

    #[test]
    fn empty_aggregate_has_no_alert() {
        let aggregate = EntityAggregate::empty(&Entity::new("W", "NoPlots"));
        assert_eq!(aggregate.plots_total, 0);
        assert!(!aggregate.alert);
        assert!(aggregate.deforested_area_sum.abs() < f64::EPSILON);
    }
}

//! Declarative column specs and cell coercion.

use csv::StringRecord;

use crate::SchemaError;

/// A logical field and the headers accepted for it, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
}

impl ColumnSpec {
    /// Position of the first alias present in `headers`. Headers are compared
    /// after trimming.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when no alias matches.
    pub fn resolve(
        &self,
        table: &'static str,
        headers: &StringRecord,
    ) -> Result<usize, SchemaError> {
        self.aliases
            .iter()
            .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
            .ok_or_else(|| SchemaError {
                table,
                field: self.field,
                aliases: self.aliases.iter().map(|a| (*a).to_owned()).collect(),
            })
    }

    /// Like [`Self::resolve`] but `None` when the column is absent.
    #[must_use]
    pub fn find(&self, headers: &StringRecord) -> Option<usize> {
        self.aliases
            .iter()
            .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
    }
}

pub const METRICS_ID: ColumnSpec = ColumnSpec {
    field: "plot id",
    aliases: &["id"],
};

pub const ALERT_DIRECT: ColumnSpec = ColumnSpec {
    field: "alert_direct",
    aliases: &["alert_direct"],
};

pub const DEFORESTED_AREA: ColumnSpec = ColumnSpec {
    field: "deforested_area",
    aliases: &["deforested_area"],
};

pub const ALERT_IN: ColumnSpec = ColumnSpec {
    field: "alert_in",
    aliases: &["alert_in"],
};

pub const ALERT_OUT: ColumnSpec = ColumnSpec {
    field: "alert_out",
    aliases: &["alert_out"],
};

pub const MOVEMENT_ORIGIN: ColumnSpec = ColumnSpec {
    field: "movement origin",
    aliases: &["origen_id", "origin_id"],
};

pub const MOVEMENT_DESTINATION: ColumnSpec = ColumnSpec {
    field: "movement destination",
    aliases: &["destination_id", "destino_id"],
};

pub const ENTITY_ID: ColumnSpec = ColumnSpec {
    field: "entity id",
    aliases: &["entity_id", "id"],
};

pub const ENTITY_NAME: ColumnSpec = ColumnSpec {
    field: "entity name",
    aliases: &["entity_name", "name"],
};

pub const MAPPING_PLOT_ID: ColumnSpec = ColumnSpec {
    field: "plot id",
    aliases: &[
        "plot_id",
        "id",
        "plot",
        "plotID",
        "plot_id_alert",
        "plot_alert_id",
    ],
};

pub const MAPPING_ENTITY_ID: ColumnSpec = ColumnSpec {
    field: "entity id",
    aliases: &[
        "entity_id",
        "entity",
        "adm3_id",
        "adm2_id",
        "adm1_id",
        "id_entity",
    ],
};

// Optional metric columns, read when present.

pub const PLOT_AREA: ColumnSpec = ColumnSpec {
    field: "plot_area",
    aliases: &["plot_area"],
};

pub const DEFORESTED_PROPORTION: ColumnSpec = ColumnSpec {
    field: "deforested_proportion",
    aliases: &["deforested_proportion"],
};

pub const PROTECTED_AREA: ColumnSpec = ColumnSpec {
    field: "protected_areas_area",
    aliases: &["protected_areas_area"],
};

pub const PROTECTED_PROPORTION: ColumnSpec = ColumnSpec {
    field: "protected_areas_proportion",
    aliases: &["protected_areas_proportion"],
};

pub const FARMING_IN_AREA: ColumnSpec = ColumnSpec {
    field: "farming_in_area",
    aliases: &["farming_in_area"],
};

pub const FARMING_IN_PROPORTION: ColumnSpec = ColumnSpec {
    field: "farming_in_proportion",
    aliases: &["farming_in_proportion"],
};

pub const FARMING_OUT_AREA: ColumnSpec = ColumnSpec {
    field: "farming_out_area",
    aliases: &["farming_out_area"],
};

pub const FARMING_OUT_PROPORTION: ColumnSpec = ColumnSpec {
    field: "farming_out_proportion",
    aliases: &["farming_out_proportion"],
};

/// Parses a flag cell. Empty means `false`; `None` for unrecognised text.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    let value = raw.trim();
    if value.is_empty() {
        return Some(false);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parses an area cell; empty or non-numeric cells become `0.0`.
#[must_use]
pub fn coerce_area(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_listed_alias_wins() {
        let headers = StringRecord::from(vec!["plot", "id", "entity"]);
        assert_eq!(MAPPING_PLOT_ID.resolve("mapping", &headers), Ok(1));
        assert_eq!(MAPPING_ENTITY_ID.resolve("mapping", &headers), Ok(2));
    }

    #[test]
    fn headers_are_trimmed() {
        let headers = StringRecord::from(vec![" origin_id ", "destino_id"]);
        assert_eq!(MOVEMENT_ORIGIN.resolve("movements", &headers), Ok(0));
        assert_eq!(MOVEMENT_DESTINATION.find(&headers), Some(1));
    }

    #[test]
    fn missing_column_lists_aliases() {
        let headers = StringRecord::from(vec!["code", "label"]);
        let error = ENTITY_NAME.resolve("entities", &headers).unwrap_err();
        assert_eq!(error.table, "entities");
        assert_eq!(error.field, "entity name");
        assert_eq!(error.aliases, vec!["entity_name", "name"]);
    }

    #[test]
    fn coerces_flags() {
        for raw in ["true", "TRUE", "1", "yes", " Yes "] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["false", "0", "no", "NO", ""] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn coerces_areas() {
        assert!((coerce_area("1.25") - 1.25).abs() < f64::EPSILON);
        assert!(coerce_area("").abs() < f64::EPSILON);
        assert!(coerce_area("n/a").abs() < f64::EPSILON);
        assert!(coerce_area("NaN").abs() < f64::EPSILON);
    }
}

//! `GeoJSON` plot and polygon layer loading.

use std::fs;
use std::path::Path;

use forest_alert_models::RecordId;
use forest_alert_spatial::{Plot, UnionLayer, layer_polygons, plot_geometry};
use geojson::{Feature, GeoJson, feature::Id};

use crate::{SchemaError, TableError};

const PLOTS_TABLE: &str = "plots";

fn property_id(feature: &Feature, id_column: &str) -> Option<RecordId> {
    let value = feature.property(id_column)?;
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        other => serde_json::from_value(other.clone()).ok(),
    }
}

fn feature_id(feature: &Feature) -> Option<RecordId> {
    match feature.id.as_ref()? {
        Id::String(s) => Some(RecordId::parse(s)),
        Id::Number(n) => Some(
            n.as_i64()
                .map_or_else(|| RecordId::Text(n.to_string()), RecordId::Int),
        ),
    }
}

/// Parses a plot layer. The id is read from the `id_column` property, or
/// from the feature's own `id` when the property is absent. A feature
/// without geometry becomes an empty plot.
///
/// # Errors
///
/// * [`TableError::Schema`] if a feature has no usable id.
/// * [`TableError::PlotGeometry`] if a geometry is not polygonal.
pub fn parse_plots(geojson: GeoJson, id_column: &str) -> Result<Vec<Plot>, TableError> {
    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(SchemaError {
                table: PLOTS_TABLE,
                field: "plot id",
                aliases: vec![id_column.to_owned()],
            }
            .into());
        }
    };

    features
        .into_iter()
        .map(|feature| {
            let id = property_id(&feature, id_column)
                .or_else(|| feature_id(&feature))
                .ok_or_else(|| SchemaError {
                    table: PLOTS_TABLE,
                    field: "plot id",
                    aliases: vec![id_column.to_owned()],
                })?;
            let geometry = plot_geometry(feature.geometry)
                .map_err(|source| TableError::PlotGeometry {
                    id: id.clone(),
                    source,
                })?;
            Ok(Plot::new(id, geometry))
        })
        .collect()
}

/// Loads plots from a `GeoJSON` file. See [`parse_plots`].
///
/// # Errors
///
/// Returns [`TableError`] if the file cannot be read or parsed.
pub fn load_plots(path: &Path, id_column: &str) -> Result<Vec<Plot>, TableError> {
    let geojson: GeoJson = fs::read_to_string(path)?.parse()?;
    let plots = parse_plots(geojson, id_column)?;
    log::info!("Loaded {} plots from {}", plots.len(), path.display());
    Ok(plots)
}

/// Loads and dissolves a polygon layer. No path gives an empty layer.
///
/// # Errors
///
/// Returns [`TableError`] if the file cannot be read or parsed.
pub fn load_layer(path: Option<&Path>) -> Result<UnionLayer, TableError> {
    let Some(path) = path else {
        return Ok(UnionLayer::empty());
    };

    let geojson: GeoJson = fs::read_to_string(path)?.parse()?;
    let polygons = layer_polygons(geojson)?;
    let layer = UnionLayer::from_polygons(&polygons);
    log::info!(
        "Loaded layer {} ({} polygons, {} after union)",
        path.display(),
        polygons.len(),
        layer.part_count()
    );
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use approx::assert_relative_eq;

    use super::*;

    const PLOTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"plot_code": 101},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}
            },
            {
                "type": "Feature",
                "id": "P-2",
                "properties": {"other": 1},
                "geometry": null
            },
            {
                "type": "Feature",
                "properties": {"plot_code": "007"},
                "geometry": {"type": "MultiPolygon", "coordinates": [[[[0,0],[10,0],[10,10],[0,10],[0,0]]]]}
            }
        ]
    }"#;

    #[test]
    fn reads_ids_from_property_or_feature() {
        let plots = parse_plots(PLOTS.parse().unwrap(), "plot_code").unwrap();
        let ids: Vec<&RecordId> = plots.iter().map(|p| &p.id).collect();
        assert_eq!(
            ids,
            vec![
                &RecordId::Int(101),
                &RecordId::from("P-2"),
                &RecordId::Text("007".to_owned()),
            ]
        );
        assert_relative_eq!(plots[0].area_ha(), 1.0);
        assert!(plots[1].geometry.0.is_empty());
        assert_relative_eq!(plots[2].area_ha(), 0.01);
    }

    #[test]
    fn missing_id_is_schema_error() {
        let doc = r#"{"type": "Feature", "properties": {}, "geometry": null}"#;
        let err = parse_plots(doc.parse().unwrap(), "id").unwrap_err();
        assert!(matches!(
            err,
            TableError::Schema(ref e) if e.table == "plots" && e.aliases == ["id"]
        ));
    }

    #[test]
    fn point_plot_is_rejected() {
        let doc = r#"{
            "type": "Feature",
            "properties": {"id": 9},
            "geometry": {"type": "Point", "coordinates": [1, 2]}
        }"#;
        let err = parse_plots(doc.parse().unwrap(), "id").unwrap_err();
        assert!(matches!(err, TableError::PlotGeometry { ref id, .. } if *id == RecordId::Int(9)));
    }

    #[test]
    fn absent_layer_is_empty() {
        assert!(load_layer(None).unwrap().is_empty());
    }

    #[test]
    fn loads_layer_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type": "FeatureCollection", "features": [
                {{"type": "Feature", "properties": {{}},
                  "geometry": {{"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}}}},
                {{"type": "Feature", "properties": {{}},
                  "geometry": {{"type": "Polygon", "coordinates": [[[50,0],[150,0],[150,100],[50,100],[50,0]]]}}}}
            ]}}"#
        )
        .unwrap();

        let layer = load_layer(Some(file.path())).unwrap();
        assert_eq!(layer.part_count(), 1);
        assert_relative_eq!(layer.area(), 15_000.0, epsilon = 1e-6);
    }

    #[test]
    fn loads_plots_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLOTS.as_bytes()).unwrap();
        let plots = load_plots(file.path(), "plot_code").unwrap();
        assert_eq!(plots.len(), 3);
    }
}

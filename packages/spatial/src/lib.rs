#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Plot geometries and unioned vector layers.
//!
//! Each vector layer (protected areas, farming frontier) is dissolved once
//! into a single multi-polygon. The polygons of that union are indexed in an
//! R-tree so a plot is only intersected with the parts whose envelopes touch
//! its bounding box.

use forest_alert_models::RecordId;
use forest_alert_raster_models::SQUARE_METRES_PER_HECTARE;
use geo::{Area, BooleanOps, BoundingRect, Distance, Euclidean, MultiPolygon, Polygon, Rect};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};

/// Errors raised while turning `GeoJSON` into plot or layer geometry.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The document is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A geometry that should be polygonal is something else.
    #[error("Expected Polygon or MultiPolygon geometry, found {found}")]
    UnsupportedGeometry {
        /// Geometry type that was found.
        found: &'static str,
    },
}

/// A land parcel: an identifier and its boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Plot {
    /// Plot identifier, unique within one run.
    pub id: RecordId,
    /// Boundary in the raster's spatial reference. May be empty.
    pub geometry: MultiPolygon<f64>,
}

impl Plot {
    #[must_use]
    pub fn new(id: impl Into<RecordId>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
        }
    }

    /// Planar area in hectares; `0.0` for an empty geometry.
    #[must_use]
    pub fn area_ha(&self) -> f64 {
        self.geometry.unsigned_area() / SQUARE_METRES_PER_HECTARE
    }

    /// Bounding box, or `None` for an empty geometry.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// One polygon of a dissolved layer stored in the R-tree.
struct LayerPart {
    envelope: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl RTreeObject for LayerPart {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// A vector layer reduced to the union of all its polygons.
///
/// An empty layer has no geometry and overlaps nothing.
pub struct UnionLayer {
    parts: RTree<LayerPart>,
    area: f64,
}

impl Default for UnionLayer {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for UnionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionLayer")
            .field("parts", &self.parts.size())
            .field("area", &self.area)
            .finish()
    }
}

impl UnionLayer {
    /// Layer without geometry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            parts: RTree::new(),
            area: 0.0,
        }
    }

    /// Dissolves `polygons` into one multi-polygon and indexes its parts.
    #[must_use]
    pub fn from_polygons(polygons: &[Polygon<f64>]) -> Self {
        if polygons.is_empty() {
            return Self::empty();
        }

        let union = geo::unary_union(polygons);
        let area = union.unsigned_area();
        let entries: Vec<LayerPart> = union
            .into_iter()
            .filter_map(|polygon| {
                let rect = polygon.bounding_rect()?;
                Some(LayerPart {
                    envelope: rect_envelope(&rect),
                    polygon,
                })
            })
            .collect();

        log::debug!(
            "Dissolved {} polygons into {} parts",
            polygons.len(),
            entries.len()
        );

        Self {
            parts: RTree::bulk_load(entries),
            area,
        }
    }

    /// Whether the layer has no geometry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.size() == 0
    }

    /// Number of disjoint polygons in the union.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.size()
    }

    /// Area of the whole union in square units.
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    /// Exact intersection area with `geometry`, in square units.
    ///
    /// Union parts are disjoint, so summing per-part intersections equals
    /// intersecting with the whole union.
    #[must_use]
    pub fn intersection_area(&self, geometry: &MultiPolygon<f64>) -> f64 {
        let Some(bounds) = geometry.bounding_rect() else {
            return 0.0;
        };

        self.parts
            .locate_in_envelope_intersecting(&rect_envelope(&bounds))
            .map(|part| part.polygon.intersection(geometry).unsigned_area())
            .sum()
    }

    /// Shortest planar distance from `geometry` to the layer, `0.0` when they
    /// touch or overlap. `None` when either side has no geometry.
    #[must_use]
    pub fn distance(&self, geometry: &MultiPolygon<f64>) -> Option<f64> {
        if geometry.0.is_empty() {
            return None;
        }

        self.parts
            .iter()
            .map(|part| part_distance(&part.polygon, geometry))
            .min_by(f64::total_cmp)
    }

    /// Exact intersection area with `geometry`, in hectares.
    #[must_use]
    pub fn intersection_area_ha(&self, geometry: &MultiPolygon<f64>) -> f64 {
        self.intersection_area(geometry) / SQUARE_METRES_PER_HECTARE
    }
}

/// Converts plot geometry. `None` is an empty plot; anything but a
/// `Polygon` or `MultiPolygon` is rejected.
///
/// # Errors
///
/// Returns [`SpatialError`] for unconvertible or non-polygonal geometry.
pub fn plot_geometry(
    geometry: Option<geojson::Geometry>,
) -> Result<MultiPolygon<f64>, SpatialError> {
    let Some(geometry) = geometry else {
        return Ok(MultiPolygon(vec![]));
    };

    match geo::Geometry::<f64>::try_from(geometry)? {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        other => Err(SpatialError::UnsupportedGeometry {
            found: geometry_kind(&other),
        }),
    }
}

/// Collects every polygon of a layer document.
///
/// Accepts a `FeatureCollection`, a single `Feature` or a bare geometry.
/// Features without geometry are ignored; points and lines are skipped with a
/// warning.
///
/// # Errors
///
/// Returns [`SpatialError::GeoJson`] if a geometry cannot be converted.
pub fn layer_polygons(geojson: GeoJson) -> Result<Vec<Polygon<f64>>, SpatialError> {
    let geometries: Vec<geojson::Geometry> = match geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|feature| feature.geometry)
            .collect(),
        GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        GeoJson::Geometry(geometry) => vec![geometry],
    };

    let mut polygons = Vec::new();
    let mut skipped = 0usize;
    for geometry in geometries {
        collect_polygons(geo::Geometry::try_from(geometry)?, &mut polygons, &mut skipped);
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} non-polygonal layer geometries");
    }

    Ok(polygons)
}

fn collect_polygons(
    geometry: geo::Geometry<f64>,
    out: &mut Vec<Polygon<f64>>,
    skipped: &mut usize,
) {
    match geometry {
        geo::Geometry::Polygon(p) => out.push(p),
        geo::Geometry::MultiPolygon(mp) => out.extend(mp),
        geo::Geometry::GeometryCollection(gc) => {
            for member in gc {
                collect_polygons(member, out, skipped);
            }
        }
        other => {
            log::debug!("Skipping {} in polygon layer", geometry_kind(&other));
            *skipped += 1;
        }
    }
}

const fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Compute the bounding box envelope for a [`Rect`].
fn part_distance(part: &Polygon<f64>, geometry: &MultiPolygon<f64>) -> f64 {
    geometry
        .iter()
        .map(|polygon| Euclidean.distance(part, polygon))
        .fold(f64::INFINITY, f64::min)
}

fn rect_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::geometry::{BoundingBox, Coord, MultiPolygon, Polygon};
use super::index::GridIndex;
use super::projection::Crs;
use crate::constants::NYC_BOROUGH_DISTRICTS;
use crate::domain::{DistrictCode, GeoPoint};
use crate::error::GeometryError;

static NULL: Value = Value::Null;

static NYC_DISTRICTS: Lazy<BTreeSet<DistrictCode>> = Lazy::new(|| {
    NYC_BOROUGH_DISTRICTS
        .iter()
        .flat_map(|(borough, count)| (1..=*count).map(move |n| DistrictCode(borough * 100 + n)))
        .collect()
});

/// The finite enumeration of valid district codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistrictCatalog {
    valid: BTreeSet<DistrictCode>,
}

impl DistrictCatalog {
    /// NYC community districts 101-112, 201-212, 301-318, 401-414, 501-503
    pub fn nyc() -> Self {
        Self {
            valid: NYC_DISTRICTS.clone(),
        }
    }

    pub fn from_codes(codes: impl IntoIterator<Item = DistrictCode>) -> Self {
        Self {
            valid: codes.into_iter().collect(),
        }
    }

    pub fn is_valid(&self, code: DistrictCode) -> bool {
        self.valid.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = DistrictCode> + '_ {
        self.valid.iter().copied()
    }
}

impl Default for DistrictCatalog {
    fn default() -> Self {
        Self::nyc()
    }
}

/// A district code and its WGS84 geometry
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictPolygon {
    pub district_code: DistrictCode,
    pub geometry: MultiPolygon,
}

/// Immutable, indexed district polygon set in WGS84
#[derive(Debug, Clone)]
pub struct DistrictSet {
    polygons: Vec<DistrictPolygon>,
    bboxes: Vec<BoundingBox>,
    index: GridIndex,
    source_crs: Crs,
}

impl DistrictSet {
    /// Index polygons that are already in WGS84
    pub fn from_polygons(polygons: Vec<DistrictPolygon>, grid_cell_degrees: f64) -> Result<Self, GeometryError> {
        Self::build(polygons, grid_cell_degrees, Crs::Wgs84)
    }

    /// Load a GeoJSON FeatureCollection (or single Feature).
    ///
    /// The CRS comes from `crs_override`, else the document's `crs` member,
    /// else WGS84. Non-WGS84 polygons are reprojected once, here.
    pub fn from_geojson_str(
        text: &str,
        code_property: &str,
        crs_override: Option<&str>,
        grid_cell_degrees: f64,
    ) -> Result<Self, GeometryError> {
        let doc: Value = serde_json::from_str(text).map_err(|e| GeometryError::Parse(e.to_string()))?;

        let crs = match crs_override.or_else(|| declared_crs(&doc)) {
            Some(name) => Crs::parse(name)?,
            None => Crs::Wgs84,
        };

        let features: Vec<&Value> = match doc.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => doc
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| GeometryError::Parse("FeatureCollection without 'features' array".to_string()))?
                .iter()
                .collect(),
            Some("Feature") => vec![&doc],
            other => {
                return Err(GeometryError::Parse(format!(
                    "expected FeatureCollection or Feature, found {:?}",
                    other
                )))
            }
        };

        let mut polygons = Vec::with_capacity(features.len());
        for (idx, feature) in features.into_iter().enumerate() {
            let district_code = feature_code(feature, code_property).ok_or_else(|| {
                GeometryError::MissingDistrictCode {
                    feature: idx,
                    property: code_property.to_string(),
                }
            })?;
            let geometry = parse_geometry(idx, feature.get("geometry").unwrap_or(&NULL))?;
            let geometry = reproject(idx, geometry, crs)?;
            polygons.push(DistrictPolygon {
                district_code,
                geometry,
            });
        }

        Self::build(polygons, grid_cell_degrees, crs)
    }

    fn build(polygons: Vec<DistrictPolygon>, grid_cell_degrees: f64, source_crs: Crs) -> Result<Self, GeometryError> {
        if polygons.is_empty() {
            return Err(GeometryError::EmptyPolygonSet);
        }
        let bboxes = polygons
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                p.geometry.bbox().ok_or_else(|| GeometryError::InvalidRing {
                    feature: idx,
                    reason: "polygon has no positions".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let index = GridIndex::build(&bboxes, grid_cell_degrees);
        debug!(
            "Grid index: {} cells for {} polygons",
            index.cell_count(),
            polygons.len()
        );
        if index.oversized_count() > 0 {
            warn!(
                "{} polygons span too many grid cells and are tested for every point",
                index.oversized_count()
            );
        }

        Ok(Self {
            polygons,
            bboxes,
            index,
            source_crs,
        })
    }

    /// Code of the first polygon (in load order) containing the point
    pub fn locate(&self, point: GeoPoint) -> Option<DistrictCode> {
        let coord = Coord::new(point.longitude, point.latitude);
        self.index
            .candidates(coord)
            .into_iter()
            .find(|&idx| self.bboxes[idx].contains(coord) && self.polygons[idx].geometry.contains(coord))
            .map(|idx| self.polygons[idx].district_code)
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn polygons(&self) -> &[DistrictPolygon] {
        &self.polygons
    }

    /// Distinct codes present in the polygon set
    pub fn codes(&self) -> BTreeSet<DistrictCode> {
        self.polygons.iter().map(|p| p.district_code).collect()
    }

    /// CRS the polygons were delivered in, before reprojection
    pub fn source_crs(&self) -> Crs {
        self.source_crs
    }
}

fn declared_crs(doc: &Value) -> Option<&str> {
    doc.get("crs")?.get("properties")?.get("name")?.as_str()
}

fn feature_code(feature: &Value, property: &str) -> Option<DistrictCode> {
    match feature.get("properties")?.get(property)? {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u16::try_from(v).ok().map(DistrictCode)
            } else {
                n.as_f64().and_then(DistrictCode::from_whole_number)
            }
        }
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_geometry(feature: usize, geometry: &Value) -> Result<MultiPolygon, GeometryError> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("null");
    let coordinates = geometry.get("coordinates").unwrap_or(&NULL);
    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![parse_polygon(feature, coordinates)?])),
        "MultiPolygon" => {
            let parts = coordinates.as_array().ok_or_else(|| invalid(feature, "MultiPolygon coordinates are not an array"))?;
            let polygons = parts
                .iter()
                .map(|part| parse_polygon(feature, part))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(GeometryError::UnsupportedGeometry {
            feature,
            kind: other.to_string(),
        }),
    }
}

fn parse_polygon(feature: usize, coordinates: &Value) -> Result<Polygon, GeometryError> {
    let rings = coordinates
        .as_array()
        .ok_or_else(|| invalid(feature, "polygon coordinates are not an array"))?;
    let mut rings = rings.iter().map(|ring| parse_ring(feature, ring));
    let exterior = rings
        .next()
        .ok_or_else(|| invalid(feature, "polygon has no exterior ring"))??;
    let holes = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_ring(feature: usize, ring: &Value) -> Result<Vec<Coord>, GeometryError> {
    let positions = ring
        .as_array()
        .ok_or_else(|| invalid(feature, "ring is not an array"))?;
    if positions.len() < 4 {
        return Err(invalid(
            feature,
            &format!("ring has {} positions, at least 4 required", positions.len()),
        ));
    }
    positions
        .iter()
        .map(|position| {
            let pair = position.as_array().filter(|p| p.len() >= 2);
            let x = pair.and_then(|p| p[0].as_f64());
            let y = pair.and_then(|p| p[1].as_f64());
            match (x, y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Coord::new(x, y)),
                _ => Err(invalid(feature, "position is not a pair of numbers")),
            }
        })
        .collect()
}

fn reproject(feature: usize, geometry: MultiPolygon, crs: Crs) -> Result<MultiPolygon, GeometryError> {
    let polygons = geometry
        .polygons
        .iter()
        .map(|polygon| {
            polygon.map_coords(|c| {
                let wgs = crs.to_wgs84(c);
                if wgs.x.is_finite() && wgs.y.is_finite() && wgs.x.abs() <= 180.0 && wgs.y.abs() <= 90.0 {
                    Ok(wgs)
                } else if crs.is_wgs84() {
                    Err(invalid(feature, "coordinates outside WGS84 range; is the CRS declared?"))
                } else {
                    Err(GeometryError::Reprojection { feature })
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MultiPolygon::new(polygons))
}

fn invalid(feature: usize, reason: &str) -> GeometryError {
    GeometryError::InvalidRing {
        feature,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square_feature(code: Value, x0: f64, y0: f64, size: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": {"BoroCD": code},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]]]
            }
        })
    }

    fn collection(features: Vec<Value>) -> String {
        json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    #[test]
    fn test_nyc_catalog() {
        let catalog = DistrictCatalog::nyc();
        assert_eq!(catalog.len(), 59);
        assert!(catalog.is_valid(DistrictCode(101)));
        assert!(catalog.is_valid(DistrictCode(318)));
        assert!(catalog.is_valid(DistrictCode(503)));
        assert!(!catalog.is_valid(DistrictCode(164)));
        assert!(!catalog.is_valid(DistrictCode(113)));
        assert!(!catalog.is_valid(DistrictCode(595)));
    }

    #[test]
    fn test_locate_point_in_feature() {
        let text = collection(vec![
            square_feature(json!(101), -74.02, 40.70, 0.02),
            square_feature(json!("102"), -74.00, 40.70, 0.02),
        ]);
        let set = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.01).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.source_crs(), Crs::Wgs84);
        assert_eq!(set.locate(GeoPoint::new(40.71, -74.01)), Some(DistrictCode(101)));
        assert_eq!(set.locate(GeoPoint::new(40.71, -73.99)), Some(DistrictCode(102)));
        assert_eq!(set.locate(GeoPoint::new(41.5, -72.0)), None);
    }

    #[test]
    fn test_float_codes_are_accepted() {
        let text = collection(vec![square_feature(json!(164.0), 0.0, 0.0, 1.0)]);
        let set = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.5).unwrap();
        assert_eq!(set.codes().into_iter().collect::<Vec<_>>(), vec![DistrictCode(164)]);
    }

    #[test]
    fn test_string_codes_with_decimal_zeros_are_accepted() {
        let text = collection(vec![square_feature(json!("101.00"), 0.0, 0.0, 1.0)]);
        let set = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.5).unwrap();
        assert_eq!(set.codes().into_iter().collect::<Vec<_>>(), vec![DistrictCode(101)]);
    }

    #[test]
    fn test_stray_part_far_away_builds_quickly() {
        // The second part sits at the null island, stretching the bounding box across half the globe
        let stray = json!({
            "type": "Feature",
            "properties": {"BoroCD": 101},
            "geometry": {"type": "MultiPolygon", "coordinates": [
                [[[-74.02, 40.70], [-74.00, 40.70], [-74.00, 40.72], [-74.02, 40.72], [-74.02, 40.70]]],
                [[[0.0, 0.0], [0.001, 0.0], [0.001, 0.001], [0.0, 0.0]]]
            ]}
        });
        let text = collection(vec![stray, square_feature(json!(102), -74.00, 40.70, 0.02)]);

        let started = std::time::Instant::now();
        let set = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.01).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        assert_eq!(set.len(), 2);
        assert_eq!(set.locate(GeoPoint::new(40.71, -74.01)), Some(DistrictCode(101)));
        assert_eq!(set.locate(GeoPoint::new(40.71, -73.99)), Some(DistrictCode(102)));
        assert_eq!(set.locate(GeoPoint::new(0.0002, 0.0008)), Some(DistrictCode(101)));
        assert_eq!(set.locate(GeoPoint::new(20.0, -30.0)), None);
    }

    #[test]
    fn test_missing_code_is_error() {
        let text = collection(vec![square_feature(json!(null), 0.0, 0.0, 1.0)]);
        let err = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.5).unwrap_err();
        assert!(matches!(err, GeometryError::MissingDistrictCode { feature: 0, .. }));
    }

    #[test]
    fn test_unsupported_geometry_is_error() {
        let text = collection(vec![json!({
            "type": "Feature",
            "properties": {"BoroCD": 101},
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
        })]);
        let err = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.5).unwrap_err();
        assert!(matches!(err, GeometryError::UnsupportedGeometry { .. }));
    }

    #[test]
    fn test_short_ring_is_error() {
        let text = collection(vec![json!({
            "type": "Feature",
            "properties": {"BoroCD": 101},
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]}
        })]);
        let err = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.5).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidRing { .. }));
    }

    #[test]
    fn test_empty_set_and_bad_json() {
        let err = DistrictSet::from_geojson_str(&collection(vec![]), "BoroCD", None, 0.5).unwrap_err();
        assert_eq!(err, GeometryError::EmptyPolygonSet);

        let err = DistrictSet::from_geojson_str("{not json", "BoroCD", None, 0.5).unwrap_err();
        assert!(matches!(err, GeometryError::Parse(_)));
    }

    #[test]
    fn test_state_plane_document_is_reprojected() {
        // Roughly 40.69-40.80 N, 74.00-73.90 W in EPSG:2263 feet
        let doc = json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2263"}},
            "features": [{
                "type": "Feature",
                "properties": {"BoroCD": 101},
                "geometry": {"type": "Polygon", "coordinates": [[
                    [984250.0, 190000.0], [1012000.0, 190000.0],
                    [1012000.0, 231000.0], [984250.0, 231000.0], [984250.0, 190000.0]
                ]]}
            }]
        });
        let set = DistrictSet::from_geojson_str(&doc.to_string(), "BoroCD", None, 0.01).unwrap();
        assert_eq!(set.source_crs(), Crs::NyLongIslandFtUs);
        assert_eq!(set.locate(GeoPoint::new(40.75, -73.95)), Some(DistrictCode(101)));
        assert_eq!(set.locate(GeoPoint::new(40.75, -74.05)), None);
    }

    #[test]
    fn test_projected_coordinates_without_crs_are_rejected() {
        let text = collection(vec![square_feature(json!(101), 984250.0, 190000.0, 1000.0)]);
        let err = DistrictSet::from_geojson_str(&text, "BoroCD", None, 0.01).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidRing { .. }));
    }

    #[test]
    fn test_unsupported_crs_override() {
        let text = collection(vec![square_feature(json!(101), 0.0, 0.0, 1.0)]);
        let err = DistrictSet::from_geojson_str(&text, "BoroCD", Some("EPSG:3857"), 0.5).unwrap_err();
        assert!(matches!(err, GeometryError::UnsupportedCrs(_)));
    }
}

//! Areas of interest and their partitioning into request-sized sub-areas.
//!
//! The catalog refuses searches over large extents, so an area is cut into a
//! uniform grid whose cells stay under an approximate ground-area budget.
//! Distances use a flat 111 km per degree, scaled by `cos(latitude)` east-west.

use std::fmt;

use geo::{Area as PlanarArea, BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Kilometres per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.0;

/// Axis-aligned WGS84 box, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    fn validate(&self) -> Result<()> {
        let values = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidArea(format!("non-finite coordinate in {}", self)));
        }
        if self.max_lon < self.min_lon || self.max_lat < self.min_lat {
            return Err(Error::InvalidArea(format!("max must not be below min in {}", self)));
        }
        Ok(())
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Approximate (width, height) in km.
    pub fn dimensions_km(&self) -> (f64, f64) {
        let mean_lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        let width = (self.max_lon - self.min_lon) * KM_PER_DEGREE * mean_lat.cos();
        let height = (self.max_lat - self.min_lat) * KM_PER_DEGREE;
        (width, height)
    }

    pub fn area_km2(&self) -> f64 {
        let (w, h) = self.dimensions_km();
        w * h
    }

    fn to_polygon(self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
        .to_polygon()
    }

    fn from_rect(rect: Rect<f64>) -> Self {
        Self {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        }
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// An area of interest, or one partition cell of it.
#[derive(Debug, Clone, PartialEq)]
pub enum Area {
    Bbox(BBox),
    /// One or more polygon parts in lon/lat.
    Polygon(MultiPolygon<f64>),
}

impl Area {
    pub fn bbox(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        BBox::new(min_lon, min_lat, max_lon, max_lat).map(Self::Bbox)
    }

    /// Builds a simple polygon from a closed lon/lat ring.
    pub fn polygon(ring: Vec<(f64, f64)>) -> Result<Self> {
        let exterior = closed_ring(ring)?;
        Ok(Self::Polygon(MultiPolygon::new(vec![Polygon::new(
            exterior,
            vec![],
        )])))
    }

    /// Reads a GeoJSON `Polygon`, `MultiPolygon`, `Feature` or the first
    /// feature of a `FeatureCollection`.
    pub fn from_geojson(value: &Value) -> Result<Self> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "FeatureCollection" => {
                let first = value
                    .get("features")
                    .and_then(Value::as_array)
                    .and_then(|f| f.first())
                    .ok_or_else(|| Error::InvalidArea("empty FeatureCollection".into()))?;
                Self::from_geojson(first)
            }
            "Feature" => {
                let geometry = value
                    .get("geometry")
                    .filter(|g| !g.is_null())
                    .ok_or_else(|| Error::InvalidArea("feature without geometry".into()))?;
                Self::from_geojson(geometry)
            }
            "Polygon" => {
                let rings = value.get("coordinates").unwrap_or(&Value::Null);
                Ok(Self::Polygon(MultiPolygon::new(vec![polygon_from_json(rings)?])))
            }
            "MultiPolygon" => {
                let parts = value
                    .get("coordinates")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::InvalidArea("MultiPolygon without coordinates".into()))?;
                let polygons = parts
                    .iter()
                    .map(polygon_from_json)
                    .collect::<Result<Vec<_>>>()?;
                if polygons.is_empty() {
                    return Err(Error::InvalidArea("empty MultiPolygon".into()));
                }
                Ok(Self::Polygon(MultiPolygon::new(polygons)))
            }
            other => Err(Error::InvalidArea(format!(
                "unsupported GeoJSON type {:?}; expected a polygon",
                other
            ))),
        }
    }

    /// GeoJSON geometry of this area.
    pub fn to_geojson(&self) -> Value {
        match self {
            Self::Bbox(b) => json!({
                "type": "Polygon",
                "coordinates": [[
                    [b.min_lon, b.min_lat],
                    [b.max_lon, b.min_lat],
                    [b.max_lon, b.max_lat],
                    [b.min_lon, b.max_lat],
                    [b.min_lon, b.min_lat],
                ]],
            }),
            Self::Polygon(shape) if shape.0.len() == 1 => json!({
                "type": "Polygon",
                "coordinates": polygon_to_json(&shape.0[0]),
            }),
            Self::Polygon(shape) => json!({
                "type": "MultiPolygon",
                "coordinates": shape.0.iter().map(polygon_to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Bounding box of the area.
    pub fn bounds(&self) -> Result<BBox> {
        match self {
            Self::Bbox(b) => Ok(*b),
            Self::Polygon(shape) => shape
                .bounding_rect()
                .map(BBox::from_rect)
                .ok_or_else(|| Error::InvalidArea("polygon has no vertices".into())),
        }
    }

    /// Approximate ground area in km².
    pub fn approx_area_km2(&self) -> f64 {
        match self {
            Self::Bbox(b) => b.area_km2(),
            Self::Polygon(shape) => {
                let Ok(bounds) = self.bounds() else {
                    return 0.0;
                };
                let mean_lat = ((bounds.min_lat + bounds.max_lat) / 2.0).to_radians();
                shape.unsigned_area() * KM_PER_DEGREE * KM_PER_DEGREE * mean_lat.cos()
            }
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bbox(b) => write!(f, "bbox {}", b),
            Self::Polygon(shape) => match shape.bounding_rect() {
                Some(rect) => write!(
                    f,
                    "polygon within {} ({} part(s))",
                    BBox::from_rect(rect),
                    shape.0.len()
                ),
                None => write!(f, "empty polygon"),
            },
        }
    }
}

/// Splits `area` into sub-areas of at most `budget_km2` each.
///
/// Areas already within budget, or with zero width or height, come back
/// unchanged as a single element.
pub fn partition(area: &Area, budget_km2: f64) -> Result<Vec<Area>> {
    if !budget_km2.is_finite() || budget_km2 <= 0.0 {
        return Err(Error::InvalidBudget(budget_km2));
    }

    let bounds = area.bounds()?;
    bounds.validate()?;

    let (width_km, height_km) = bounds.dimensions_km();
    if width_km <= 0.0 || height_km <= 0.0 || width_km * height_km <= budget_km2 {
        return Ok(vec![area.clone()]);
    }

    let cells = grid(&bounds, width_km, height_km, budget_km2);

    match area {
        Area::Bbox(_) => Ok(cells.into_iter().map(Area::Bbox).collect()),
        Area::Polygon(shape) => Ok(cells
            .into_iter()
            .filter_map(|cell| {
                let clipped = shape.intersection(&MultiPolygon::new(vec![cell.to_polygon()]));
                let parts: Vec<Polygon<f64>> = clipped
                    .into_iter()
                    .filter(|p| p.unsigned_area() > 0.0)
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(Area::Polygon(MultiPolygon::new(parts)))
                }
            })
            .collect()),
    }
}

fn grid(bounds: &BBox, width_km: f64, height_km: f64, budget_km2: f64) -> Vec<BBox> {
    let side_km = budget_km2.sqrt();
    let splits_x = ((width_km / side_km).ceil() as usize).max(1);
    let splits_y = ((height_km / side_km).ceil() as usize).max(1);

    let delta_lon = (bounds.max_lon - bounds.min_lon) / splits_x as f64;
    let delta_lat = (bounds.max_lat - bounds.min_lat) / splits_y as f64;

    // Edge k of an axis is always computed the same way, so neighbours share it exactly.
    let edge = |min: f64, max: f64, delta: f64, k: usize, splits: usize| {
        if k == splits {
            max
        } else {
            (min + k as f64 * delta).min(max)
        }
    };

    let mut cells = Vec::with_capacity(splits_x * splits_y);
    for i in 0..splits_x {
        for j in 0..splits_y {
            cells.push(BBox {
                min_lon: edge(bounds.min_lon, bounds.max_lon, delta_lon, i, splits_x),
                min_lat: edge(bounds.min_lat, bounds.max_lat, delta_lat, j, splits_y),
                max_lon: edge(bounds.min_lon, bounds.max_lon, delta_lon, i + 1, splits_x),
                max_lat: edge(bounds.min_lat, bounds.max_lat, delta_lat, j + 1, splits_y),
            });
        }
    }
    cells
}

fn closed_ring(ring: Vec<(f64, f64)>) -> Result<LineString<f64>> {
    if ring.len() < 4 {
        return Err(Error::InvalidArea(format!(
            "polygon ring needs at least 4 vertices, got {}",
            ring.len()
        )));
    }
    if ring.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(Error::InvalidArea("non-finite polygon vertex".into()));
    }
    if ring.first() != ring.last() {
        return Err(Error::InvalidArea(
            "polygon ring is not closed (first vertex must equal last)".into(),
        ));
    }
    Ok(LineString::from(ring))
}

fn polygon_from_json(rings: &Value) -> Result<Polygon<f64>> {
    let rings = rings
        .as_array()
        .ok_or_else(|| Error::InvalidArea("polygon coordinates must be an array of rings".into()))?;
    let mut parsed = rings.iter().map(|ring| {
        let points = ring
            .as_array()
            .ok_or_else(|| Error::InvalidArea("ring must be an array of positions".into()))?
            .iter()
            .map(|pos| match (pos.get(0).and_then(Value::as_f64), pos.get(1).and_then(Value::as_f64)) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(Error::InvalidArea(format!("bad position {}", pos))),
            })
            .collect::<Result<Vec<_>>>()?;
        closed_ring(points)
    });
    let exterior = parsed
        .next()
        .ok_or_else(|| Error::InvalidArea("polygon without rings".into()))??;
    let interiors = parsed.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn polygon_to_json(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cells(parts: &[Area]) -> Vec<BBox> {
        parts
            .iter()
            .map(|a| match a {
                Area::Bbox(b) => *b,
                other => panic!("expected a box, got {}", other),
            })
            .collect()
    }

    #[test]
    fn small_box_is_returned_unchanged() {
        let area = Area::bbox(-7.9563, 37.9499, -7.8563, 38.0136).unwrap();
        assert!(area.approx_area_km2() < 200.0);
        let parts = partition(&area, 200.0).unwrap();
        assert_eq!(parts, vec![area]);
    }

    #[test]
    fn degenerate_box_is_returned_unchanged() {
        let line = Area::bbox(-9.0, 38.0, -8.0, 38.0).unwrap();
        assert_eq!(partition(&line, 1.0).unwrap(), vec![line]);
    }

    #[test]
    fn rejects_non_positive_budget() {
        let area = Area::bbox(-9.0, 38.0, -8.0, 39.0).unwrap();
        assert!(matches!(partition(&area, 0.0), Err(Error::InvalidBudget(_))));
        assert!(matches!(partition(&area, -5.0), Err(Error::InvalidBudget(_))));
        assert!(matches!(partition(&area, f64::NAN), Err(Error::InvalidBudget(_))));
    }

    #[test]
    fn rejects_inverted_box() {
        assert!(matches!(
            Area::bbox(-8.0, 38.0, -9.0, 39.0),
            Err(Error::InvalidArea(_))
        ));
    }

    #[test]
    fn one_degree_box_near_lisbon() {
        let bbox = BBox::new(-9.0, 38.0, -8.0, 39.0).unwrap();
        let (w, h) = bbox.dimensions_km();
        assert_relative_eq!(h, 111.0);
        assert_relative_eq!(w, 111.0 * 38.5f64.to_radians().cos());

        let side = 200f64.sqrt();
        let splits_x = (w / side).ceil() as usize;
        let splits_y = (h / side).ceil() as usize;
        assert_eq!((splits_x, splits_y), (7, 8));

        let parts = cells(&partition(&Area::Bbox(bbox), 200.0).unwrap());
        assert_eq!(parts.len(), splits_x * splits_y);

        for cell in &parts {
            assert!(cell.area_km2() <= 200.0, "cell {} too large", cell);
            assert!(cell.min_lon >= bbox.min_lon && cell.max_lon <= bbox.max_lon);
            assert!(cell.min_lat >= bbox.min_lat && cell.max_lat <= bbox.max_lat);
        }

        // the grid reconstructs the original extent without gaps or overlaps
        let total: f64 = parts
            .iter()
            .map(|c| (c.max_lon - c.min_lon) * (c.max_lat - c.min_lat))
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert!(parts.iter().any(|c| c.max_lon == bbox.max_lon));
        assert!(parts.iter().any(|c| c.max_lat == bbox.max_lat));
        assert_eq!(parts[0].min_lon, bbox.min_lon);
        assert_eq!(parts[0].min_lat, bbox.min_lat);
    }

    #[test]
    fn neighbouring_cells_share_edges() {
        let bbox = BBox::new(-8.3, 37.1, -7.1, 38.9).unwrap();
        let parts = cells(&partition(&Area::Bbox(bbox), 150.0).unwrap());
        for a in &parts {
            if a.max_lon < bbox.max_lon {
                assert!(
                    parts
                        .iter()
                        .any(|b| b.min_lon == a.max_lon && b.min_lat == a.min_lat),
                    "no eastern neighbour for {}",
                    a
                );
            }
            if a.max_lat < bbox.max_lat {
                assert!(
                    parts
                        .iter()
                        .any(|b| b.min_lat == a.max_lat && b.min_lon == a.min_lon),
                    "no northern neighbour for {}",
                    a
                );
            }
        }
    }

    #[test]
    fn cells_respect_budget_under_parent_scale() {
        let boxes = [
            BBox::new(-9.5, 36.9, -6.2, 42.2).unwrap(),
            BBox::new(0.0, 60.0, 10.0, 70.0).unwrap(),
            BBox::new(10.0, -5.0, 12.5, 5.0).unwrap(),
        ];
        for bbox in boxes {
            for budget in [50.0, 200.0, 10_000.0] {
                let scale = ((bbox.min_lat + bbox.max_lat) / 2.0).to_radians().cos();
                for cell in cells(&partition(&Area::Bbox(bbox), budget).unwrap()) {
                    let w = (cell.max_lon - cell.min_lon) * KM_PER_DEGREE * scale;
                    let h = (cell.max_lat - cell.min_lat) * KM_PER_DEGREE;
                    assert!(w * h <= budget * (1.0 + 1e-9), "{} exceeds {}", cell, budget);
                }
            }
        }
    }

    #[test]
    fn polygon_cells_are_clipped_to_the_shape() {
        // right triangle covering half of a one-degree box
        let triangle = Area::polygon(vec![
            (-9.0, 38.0),
            (-8.0, 38.0),
            (-9.0, 39.0),
            (-9.0, 38.0),
        ])
        .unwrap();
        let parts = partition(&triangle, 200.0).unwrap();

        // grid is 7x8 = 56 cells; cells beyond the hypotenuse are dropped
        assert!(parts.len() < 56);
        assert!(parts.len() > 28);

        let Area::Polygon(original) = &triangle else {
            unreachable!()
        };
        let mut covered = 0.0;
        for part in &parts {
            let Area::Polygon(shape) = part else {
                panic!("polygon input must yield polygon parts");
            };
            assert!(shape.unsigned_area() > 0.0);
            covered += shape.unsigned_area();
        }
        assert_relative_eq!(covered, original.unsigned_area(), max_relative = 1e-6);
    }

    #[test]
    fn small_polygon_keeps_exact_geometry() {
        let ring = vec![(-8.0, 38.0), (-7.99, 38.0), (-7.99, 38.01), (-8.0, 38.0)];
        let area = Area::polygon(ring).unwrap();
        assert_eq!(partition(&area, 200.0).unwrap(), vec![area]);
    }

    #[test]
    fn polygon_ring_must_be_closed() {
        let open = vec![(-8.0, 38.0), (-7.0, 38.0), (-7.0, 39.0), (-8.0, 39.0)];
        assert!(matches!(Area::polygon(open), Err(Error::InvalidArea(_))));
        assert!(matches!(
            Area::polygon(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]),
            Err(Error::InvalidArea(_))
        ));
    }

    #[test]
    fn geojson_feature_collection_round_trip() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-8.0, 38.0], [-7.0, 38.0], [-7.0, 39.0], [-8.0, 38.0]]]
                }
            }]
        });
        let area = Area::from_geojson(&doc).unwrap();
        let bounds = area.bounds().unwrap();
        assert_eq!(bounds.as_array(), [-8.0, 38.0, -7.0, 39.0]);

        let geometry = area.to_geojson();
        assert_eq!(geometry["type"], "Polygon");
        assert_eq!(geometry["coordinates"][0].as_array().unwrap().len(), 4);
    }

    #[test]
    fn geojson_rejects_points() {
        let point = json!({"type": "Point", "coordinates": [-8.0, 38.0]});
        assert!(matches!(Area::from_geojson(&point), Err(Error::InvalidArea(_))));
    }

    #[test]
    fn bbox_geojson_is_closed_ring() {
        let area = Area::bbox(-9.0, 38.0, -8.0, 39.0).unwrap();
        let ring = area.to_geojson()["coordinates"][0].clone();
        let ring = ring.as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }
}

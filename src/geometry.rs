//! Reduction of a country's geometry to one representative point.
//!
//! Areas and centroids are computed in the Equal Earth projection so that
//! high-latitude shapes are not inflated; containment is always checked
//! against the original lon/lat polygon.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use geo::{Area, Centroid, Contains, LineString, MultiPolygon, Point, Polygon};
use tracing::{debug, warn};

use crate::error::GeometryError;
use crate::model::{CountryShape, PointMethod, RepresentativePoint};

/// Semi-major axis of WGS84, the sphere radius used by EPSG:8857.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

const A1: f64 = 1.340264;
const A2: f64 = -0.081106;
const A3: f64 = 0.000893;
const A4: f64 = 0.003796;

/// Pole-of-inaccessibility search stops refining once cells are this fraction
/// of the polygon's smaller bounding-box side.
const POLE_PRECISION_FRACTION: f64 = 1e-4;

fn equal_earth_m() -> f64 {
    3f64.sqrt() / 2.0
}

/// Forward Equal Earth projection, degrees to metres.
pub fn project(lon: f64, lat: f64) -> (f64, f64) {
    let lambda = lon.to_radians();
    let phi = lat.to_radians();
    let theta = (equal_earth_m() * phi.sin()).asin();
    let t2 = theta * theta;
    let t6 = t2 * t2 * t2;
    let denom = 3.0 * (9.0 * A4 * t6 * t2 + 7.0 * A3 * t6 + 3.0 * A2 * t2 + A1);
    let x = 2.0 * 3f64.sqrt() * lambda * theta.cos() / denom;
    let y = theta * (A1 + A2 * t2 + t6 * (A3 + A4 * t2));
    (x * EARTH_RADIUS_M, y * EARTH_RADIUS_M)
}

/// Inverse Equal Earth projection, metres to degrees.
///
/// The latitude parameter is recovered with Newton iteration, which converges
/// in a handful of steps for any point on the map.
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let x = x / EARTH_RADIUS_M;
    let y = y / EARTH_RADIUS_M;
    let mut theta = y / A1;
    for _ in 0..20 {
        let t2 = theta * theta;
        let t6 = t2 * t2 * t2;
        let f = theta * (A1 + A2 * t2 + t6 * (A3 + A4 * t2)) - y;
        let df = A1 + 3.0 * A2 * t2 + t6 * (7.0 * A3 + 9.0 * A4 * t2);
        let step = f / df;
        theta -= step;
        if step.abs() < 1e-12 {
            break;
        }
    }
    let t2 = theta * theta;
    let t6 = t2 * t2 * t2;
    let df = A1 + 3.0 * A2 * t2 + t6 * (7.0 * A3 + 9.0 * A4 * t2);
    let lambda = 3.0 * x * df / (2.0 * 3f64.sqrt() * theta.cos());
    let phi = (theta.sin() / equal_earth_m()).asin();
    (lambda.to_degrees(), phi.to_degrees())
}

fn project_ring(ring: &LineString<f64>) -> LineString<f64> {
    ring.coords()
        .map(|c| project(c.x, c.y))
        .collect::<Vec<_>>()
        .into()
}

fn project_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(
        project_ring(polygon.exterior()),
        polygon.interiors().iter().map(project_ring).collect(),
    )
}

/// Area of a polygon in square metres, in the equal-area projection.
pub fn projected_area(polygon: &Polygon<f64>) -> f64 {
    project_polygon(polygon).unsigned_area()
}

/// Area of a whole (multi-part) geometry in km².
pub fn equal_area_km2(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.iter().map(projected_area).sum::<f64>() / 1_000_000.0
}

fn is_finite(polygon: &Polygon<f64>) -> bool {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .flat_map(|ring| ring.coords())
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

/// The largest part of the geometry by projected area.
///
/// Ties keep the earliest part, so the choice is stable for a given input.
pub fn mainland(geometry: &MultiPolygon<f64>) -> Result<&Polygon<f64>, GeometryError> {
    let mut best: Option<(&Polygon<f64>, f64)> = None;
    for polygon in geometry.iter() {
        if !is_finite(polygon) {
            return Err(GeometryError::Degenerate);
        }
        let area = projected_area(polygon);
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((polygon, area)),
        }
    }
    let (polygon, area) = best.ok_or(GeometryError::Empty)?;
    if area <= 0.0 || polygon.exterior().0.len() < 4 {
        return Err(GeometryError::ZeroArea);
    }
    Ok(polygon)
}

/// Compute a point guaranteed to lie inside the shape's mainland.
pub fn reduce_to_point(shape: &CountryShape) -> Result<RepresentativePoint, GeometryError> {
    let mainland = mainland(&shape.geometry)?;
    let point = interior_point(mainland)?;
    debug!(
        "{}: representative point ({:.4}, {:.4}) via {:?}",
        shape.admin, point.lon, point.lat, point.method
    );
    Ok(point)
}

/// Centroid of the polygon if it lies inside, otherwise its pole of
/// inaccessibility.
pub fn interior_point(polygon: &Polygon<f64>) -> Result<RepresentativePoint, GeometryError> {
    if let Some(centroid) = project_polygon(polygon).centroid() {
        let (lon, lat) = unproject(centroid.x(), centroid.y());
        let candidate = Point::new(lon, lat);
        if polygon.contains(&candidate) {
            return Ok(RepresentativePoint {
                lon,
                lat,
                method: PointMethod::Centroid,
            });
        }
    }

    let pole = pole_of_inaccessibility(polygon)?;
    if polygon.contains(&pole) {
        Ok(RepresentativePoint {
            lon: pole.x(),
            lat: pole.y(),
            method: PointMethod::Fallback,
        })
    } else {
        Err(GeometryError::NoInteriorPoint {
            lon: pole.x(),
            lat: pole.y(),
        })
    }
}

/// Reduce every shape, skipping the ones whose geometry is unusable.
///
/// Failures are returned alongside the successes so they can be reviewed by
/// hand; one bad country never stops the run.
pub fn reduce_all(
    shapes: &[CountryShape],
) -> (
    Vec<(&CountryShape, RepresentativePoint)>,
    Vec<(&CountryShape, GeometryError)>,
) {
    let mut points = Vec::with_capacity(shapes.len());
    let mut failures = Vec::new();
    for shape in shapes {
        match reduce_to_point(shape) {
            Ok(point) => points.push((shape, point)),
            Err(e) => {
                warn!("Skipping {}: {}", shape.admin, e);
                failures.push((shape, e));
            }
        }
    }
    (points, failures)
}

/// Square search cell for the pole-of-inaccessibility search.
struct Cell {
    x: f64,
    y: f64,
    half: f64,
    /// Signed distance from the centre to the boundary, positive inside.
    distance: f64,
    /// Upper bound on the distance achievable anywhere in the cell.
    potential: f64,
}

impl Cell {
    fn new(x: f64, y: f64, half: f64, polygon: &Polygon<f64>) -> Cell {
        let distance = signed_distance(x, y, polygon);
        Cell {
            x,
            y,
            half,
            distance,
            potential: distance + half * std::f64::consts::SQRT_2,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.potential
            .total_cmp(&other.potential)
            .then_with(|| other.x.total_cmp(&self.x))
            .then_with(|| other.y.total_cmp(&self.y))
    }
}

/// Grid-and-bisection search for the interior point farthest from the
/// boundary (planar, in lon/lat degrees).
pub fn pole_of_inaccessibility(polygon: &Polygon<f64>) -> Result<Point<f64>, GeometryError> {
    let (min_x, min_y, max_x, max_y) = bounds(polygon.exterior()).ok_or(GeometryError::Empty)?;
    let width = max_x - min_x;
    let height = max_y - min_y;
    let cell_size = width.min(height);
    if cell_size <= 0.0 {
        return Err(GeometryError::ZeroArea);
    }
    let precision = cell_size * POLE_PRECISION_FRACTION;
    let half = cell_size / 2.0;

    let mut queue = BinaryHeap::new();
    let mut x = min_x;
    while x < max_x {
        let mut y = min_y;
        while y < max_y {
            queue.push(Cell::new(x + half, y + half, half, polygon));
            y += cell_size;
        }
        x += cell_size;
    }

    // Seed with the bounding-box centre so thin shapes still have a candidate.
    let mut best = Cell::new(min_x + width / 2.0, min_y + height / 2.0, 0.0, polygon);

    while let Some(cell) = queue.pop() {
        if cell.distance > best.distance {
            best = Cell::new(cell.x, cell.y, 0.0, polygon);
        }
        if cell.potential - best.distance <= precision {
            continue;
        }
        let quarter = cell.half / 2.0;
        for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            queue.push(Cell::new(
                cell.x + dx * quarter,
                cell.y + dy * quarter,
                quarter,
                polygon,
            ));
        }
    }

    if best.distance > 0.0 {
        Ok(Point::new(best.x, best.y))
    } else {
        Err(GeometryError::NoInteriorPoint {
            lon: best.x,
            lat: best.y,
        })
    }
}

fn bounds(ring: &LineString<f64>) -> Option<(f64, f64, f64, f64)> {
    ring.coords().fold(None, |acc, c| match acc {
        None => Some((c.x, c.y, c.x, c.y)),
        Some((min_x, min_y, max_x, max_y)) => Some((
            min_x.min(c.x),
            min_y.min(c.y),
            max_x.max(c.x),
            max_y.max(c.y),
        )),
    })
}

fn signed_distance(x: f64, y: f64, polygon: &Polygon<f64>) -> f64 {
    let mut inside = false;
    let mut min_sq = f64::INFINITY;
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        for line in ring.lines() {
            let (a, b) = (line.start, line.end);
            if (a.y > y) != (b.y > y) && x < (b.x - a.x) * (y - a.y) / (b.y - a.y) + a.x {
                inside = !inside;
            }
            min_sq = min_sq.min(segment_distance_sq(x, y, a.x, a.y, b.x, b.y));
        }
    }
    let distance = min_sq.sqrt();
    if inside {
        distance
    } else {
        -distance
    }
}

fn segment_distance_sq(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (px - cx) * (px - cx) + (py - cy) * (py - cy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdminLevel;

    fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + side, y),
                (x + side, y + side),
                (x, y + side),
                (x, y),
            ]),
            vec![],
        )
    }

    fn shape(geometry: MultiPolygon<f64>) -> CountryShape {
        CountryShape {
            admin: "Testland".to_string(),
            name: "Testland".to_string(),
            iso2: "TL".to_string(),
            iso3: "TST".to_string(),
            continent: "Nowhere".to_string(),
            population: 1,
            admin_level: AdminLevel::Sovereign,
            alternate_names: vec![],
            geometry,
        }
    }

    /// A C-shaped polygon opening to the east; its centroid sits in the gap.
    fn crescent() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 2.0),
                (2.0, 2.0),
                (2.0, 8.0),
                (10.0, 8.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![],
        )
    }

    #[test]
    fn projection_round_trips() {
        for (lon, lat) in [(0.0, 0.0), (12.5, 41.9), (-70.6, -33.4), (179.0, 80.0)] {
            let (x, y) = project(lon, lat);
            let (lon2, lat2) = unproject(x, y);
            assert!((lon - lon2).abs() < 1e-7, "{lon} vs {lon2}");
            assert!((lat - lat2).abs() < 1e-7, "{lat} vs {lat2}");
        }
    }

    #[test]
    fn convex_shape_uses_centroid() {
        let point = reduce_to_point(&shape(MultiPolygon::new(vec![square(0.0, 0.0, 4.0)]))).unwrap();
        assert_eq!(point.method, PointMethod::Centroid);
        assert!((point.lon - 2.0).abs() < 1e-2);
        assert!(square(0.0, 0.0, 4.0).contains(&point.point()));
    }

    #[test]
    fn crescent_falls_back_to_interior_point() {
        let polygon = crescent();
        let centroid = project_polygon(&polygon).centroid().unwrap();
        let (lon, lat) = unproject(centroid.x(), centroid.y());
        assert!(!polygon.contains(&Point::new(lon, lat)));

        let point = reduce_to_point(&shape(MultiPolygon::new(vec![polygon.clone()]))).unwrap();
        assert_eq!(point.method, PointMethod::Fallback);
        assert!(polygon.contains(&point.point()));
    }

    #[test]
    fn largest_part_is_mainland() {
        // Side lengths give areas in the ratio 10:1:1 near the equator.
        let big = square(0.0, 0.0, 10f64.sqrt());
        let island_a = square(20.0, 0.0, 1.0);
        let island_b = square(-20.0, 0.0, 1.0);
        let geometry = MultiPolygon::new(vec![island_a, big.clone(), island_b]);
        assert_eq!(mainland(&geometry).unwrap(), &big);

        let point = reduce_to_point(&shape(geometry)).unwrap();
        assert!(big.contains(&point.point()));
    }

    #[test]
    fn mainland_uses_equal_area_not_degrees() {
        // Same size in degrees, but the polar square covers far less ground.
        let polar = square(0.0, 80.0, 5.0);
        let equatorial = square(0.0, 0.0, 4.5);
        let geometry = MultiPolygon::new(vec![polar, equatorial.clone()]);
        assert_eq!(mainland(&geometry).unwrap(), &equatorial);
    }

    #[test]
    fn empty_and_flat_geometries_fail() {
        let empty = shape(MultiPolygon::new(vec![]));
        assert_eq!(reduce_to_point(&empty), Err(GeometryError::Empty));

        let flat = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        assert_eq!(
            reduce_to_point(&shape(MultiPolygon::new(vec![flat]))),
            Err(GeometryError::ZeroArea)
        );
    }

    #[test]
    fn reduction_is_deterministic() {
        let geometry = MultiPolygon::new(vec![crescent()]);
        let a = reduce_to_point(&shape(geometry.clone())).unwrap();
        let b = reduce_to_point(&shape(geometry)).unwrap();
        assert_eq!(a.lon.to_bits(), b.lon.to_bits());
        assert_eq!(a.lat.to_bits(), b.lat.to_bits());
    }

    #[test]
    fn reduce_all_reports_failures() {
        let shapes = vec![
            shape(MultiPolygon::new(vec![square(0.0, 0.0, 1.0)])),
            shape(MultiPolygon::new(vec![])),
        ];
        let (points, failures) = reduce_all(&shapes);
        assert_eq!(points.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, GeometryError::Empty);
    }

    #[test]
    fn area_of_one_degree_square_at_equator() {
        let km2 = equal_area_km2(&MultiPolygon::new(vec![square(0.0, 0.0, 1.0)]));
        // Roughly 111 km x 111 km.
        assert!((km2 - 12_364.0).abs() < 200.0, "{km2}");
    }
}

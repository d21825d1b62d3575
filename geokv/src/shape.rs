//! Spherical shape primitives.
//!
//! A [`Shape`] is one of the three geometry primitives the store can
//! persist and measure distances against: a point collection, a
//! polyline, or a polygon made of implicitly-closed loops. Vertices
//! are unit vectors on the sphere; conversion to and from degrees
//! happens at the edges of the system.
//!
//! Distance math works directly on the unit vectors (great-circle
//! segment distance); containment tests project loops back to
//! longitude/latitude and use the `geo` crate's point-in-ring
//! predicate with the even-odd rule, which is insensitive to loop
//! orientation.

use geo::Contains;
use s2::latlng::LatLng;
use s2::point::Point;

/// One vertex loop of a polygon. Implicitly closed: the edge from the
/// last vertex back to the first is part of the boundary.
pub type Loop = Vec<Point>;

/// A spatial primitive stored in a feature blob.
#[derive(Debug, Clone)]
pub enum Shape {
    /// A collection of isolated points.
    Points(Vec<Point>),
    /// An open chain of great-circle segments.
    Polyline(Vec<Point>),
    /// One or more implicitly-closed loops. Outer and inner loops of
    /// a (multi)polygon all live in the same list; containment is
    /// resolved by the even-odd rule.
    Polygon(Vec<Loop>),
}

impl Shape {
    /// Whether this shape has a two-dimensional interior.
    pub fn is_polygon(&self) -> bool {
        matches!(self, Shape::Polygon(_))
    }

    /// Total number of edges, counting degenerate point edges and the
    /// closing edge of each loop.
    pub fn num_edges(&self) -> usize {
        match self {
            Shape::Points(pts) => pts.len(),
            Shape::Polyline(pts) => pts.len().saturating_sub(1),
            Shape::Polygon(loops) => loops.iter().map(Vec::len).sum(),
        }
    }

    /// Minimum angular distance (radians) from `x` to any edge of the
    /// shape. Points are degenerate edges; polygon loops contribute
    /// their closing edge. An interior position still reports the
    /// distance to the boundary; the containment short-circuit is the
    /// caller's concern.
    pub fn min_distance(&self, x: &Point) -> f64 {
        match self {
            Shape::Points(pts) => pts
                .iter()
                .map(|p| angle_between(x, p))
                .fold(f64::INFINITY, f64::min),
            Shape::Polyline(pts) => pts
                .windows(2)
                .map(|w| distance_from_segment(x, &w[0], &w[1]))
                .fold(f64::INFINITY, f64::min),
            Shape::Polygon(loops) => loops
                .iter()
                .map(|ring| loop_min_distance(x, ring))
                .fold(f64::INFINITY, f64::min),
        }
    }
}

fn loop_min_distance(x: &Point, ring: &[Point]) -> f64 {
    let n = ring.len();
    if n == 1 {
        return angle_between(x, &ring[0]);
    }
    (0..n)
        .map(|i| distance_from_segment(x, &ring[i], &ring[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

/// Unit-sphere point for (lat, lng) degrees.
pub fn point_from_degrees(lat: f64, lng: f64) -> Point {
    Point::from(LatLng::from_degrees(lat, lng))
}

/// Inverse of [`point_from_degrees`]: (lat, lng) degrees of a unit
/// vector.
pub fn degrees_from_point(p: &Point) -> (f64, f64) {
    let v = &p.0;
    let lat = v.z.atan2((v.x * v.x + v.y * v.y).sqrt());
    let lng = v.y.atan2(v.x);
    (lat.to_degrees(), lng.to_degrees())
}

/// Angle in radians between two unit vectors, stable for both small
/// and near-antipodal separations.
pub fn angle_between(a: &Point, b: &Point) -> f64 {
    let cross = a.0.cross(&b.0).norm();
    let dot = a.0.dot(&b.0);
    cross.atan2(dot)
}

/// Minimum great-circle distance (radians) from `x` to the geodesic
/// segment `a`–`b`.
///
/// When the closest point of the full great circle falls inside the
/// arc, the distance is the angle between `x` and the circle's plane;
/// otherwise it is the nearer endpoint. A degenerate segment (equal
/// or antipodal endpoints) falls back to endpoint distance.
pub fn distance_from_segment(x: &Point, a: &Point, b: &Point) -> f64 {
    let n = a.0.cross(&b.0);
    let n_norm = n.norm();
    if n_norm < 1e-15 {
        return angle_between(x, a).min(angle_between(x, b));
    }
    let in_wedge = a.0.cross(&x.0).dot(&n) >= 0.0 && x.0.cross(&b.0).dot(&n) >= 0.0;
    if in_wedge {
        let sin_d = (x.0.dot(&n) / n_norm).abs().min(1.0);
        sin_d.asin()
    } else {
        angle_between(x, a).min(angle_between(x, b))
    }
}

/// Even-odd containment test for a position against a set of loops.
///
/// A position is inside when it falls within an odd number of rings,
/// which handles outer rings, holes, and the flattened loops of a
/// multi-polygon uniformly, regardless of winding direction.
pub fn polygon_contains(loops: &[Loop], lat: f64, lng: f64) -> bool {
    let pt = geo_types::Point::new(lng, lat);
    let mut inside = false;
    for ring in loops {
        if ring.len() < 3 {
            continue;
        }
        let coords: Vec<(f64, f64)> = ring
            .iter()
            .map(|p| {
                let (la, lo) = degrees_from_point(p);
                (lo, la)
            })
            .collect();
        let poly = geo_types::Polygon::new(geo_types::LineString::from(coords), vec![]);
        if poly.contains(&pt) {
            inside = !inside;
        }
    }
    inside
}

//! Geometry conversion between the GeoJSON model and the store's
//! internal shapes and regions.
//!
//! `convert` maps each supported variant to the shapes persisted in
//! the feature blob and the regions handed to the term indexer:
//!
//! | input | shapes | regions |
//! |---|---|---|
//! | Point | 1 point collection | 1 point |
//! | LineString | 1 polyline | 1 line |
//! | Polygon | 1 polygon | 1 area |
//! | MultiPoint (n) | 1 point collection | n points |
//! | MultiLineString (n) | n polylines | n lines |
//! | MultiPolygon | 1 flattened polygon | 1 area |
//!
//! The inverse `shapes_to_geom` is lossy: a flattened multi-polygon
//! comes back as a single polygon, which is acceptable for display.

use geo::BoundingRect;
use geo_types::{Geometry, LineString, MultiPolygon, Polygon};
use s2::cellid::CellID;

use crate::cells::{self, CoveringOptions};
use crate::error::{Result, StoreError};
use crate::shape::{self, Loop, Shape};

/// A coverable region of a feature, handed to the term indexer.
///
/// Points cover as their finest-level cell; lines and areas cover
/// through their latitude/longitude extent; only areas have an
/// interior.
#[derive(Debug, Clone)]
pub enum Region {
    /// A single position.
    Point { lat: f64, lng: f64 },
    /// An open chain of positions.
    Line(LineString<f64>),
    /// A polygonal area with its ring grouping intact.
    Area(MultiPolygon<f64>),
}

impl Region {
    /// Exterior covering: cells intersecting the region (superset).
    pub fn covering(&self, opts: &CoveringOptions) -> Vec<CellID> {
        match self {
            Region::Point { lat, lng } => {
                vec![cells::cell_for_point(*lat, *lng, opts.max_level)]
            }
            Region::Line(line) => rect_covering(line.bounding_rect(), opts),
            Region::Area(area) => rect_covering(area.bounding_rect(), opts),
        }
    }

    /// Interior covering: cells fully contained in the region. Empty
    /// for zero- and one-dimensional regions.
    pub fn interior_covering(&self, opts: &CoveringOptions) -> Vec<CellID> {
        match self {
            Region::Area(area) => cells::interior_covering(area, opts),
            _ => Vec::new(),
        }
    }
}

fn rect_covering(rect: Option<geo_types::Rect<f64>>, opts: &CoveringOptions) -> Vec<CellID> {
    match rect {
        Some(r) => cells::cover_rect(r.min().y, r.min().x, r.max().y, r.max().x, opts),
        None => Vec::new(),
    }
}

/// Convert a geometry into blob shapes and index regions.
pub fn convert(geom: &Geometry<f64>) -> Result<(Vec<Shape>, Vec<Region>)> {
    if is_empty(geom) {
        return Err(StoreError::EmptyGeometry);
    }
    match geom {
        Geometry::Point(p) => {
            let pt = shape::point_from_degrees(p.y(), p.x());
            Ok((
                vec![Shape::Points(vec![pt])],
                vec![Region::Point {
                    lat: p.y(),
                    lng: p.x(),
                }],
            ))
        }
        Geometry::LineString(line) => Ok((
            vec![Shape::Polyline(line_points(line))],
            vec![Region::Line(line.clone())],
        )),
        Geometry::Polygon(poly) => Ok((
            vec![Shape::Polygon(polygon_loops(poly))],
            vec![Region::Area(MultiPolygon(vec![poly.clone()]))],
        )),
        Geometry::MultiPoint(points) => {
            let mut pts = Vec::with_capacity(points.0.len());
            let mut regions = Vec::with_capacity(points.0.len());
            for p in &points.0 {
                pts.push(shape::point_from_degrees(p.y(), p.x()));
                regions.push(Region::Point {
                    lat: p.y(),
                    lng: p.x(),
                });
            }
            Ok((vec![Shape::Points(pts)], regions))
        }
        Geometry::MultiLineString(lines) => {
            let mut shapes = Vec::with_capacity(lines.0.len());
            let mut regions = Vec::with_capacity(lines.0.len());
            for line in &lines.0 {
                shapes.push(Shape::Polyline(line_points(line)));
                regions.push(Region::Line(line.clone()));
            }
            Ok((shapes, regions))
        }
        Geometry::MultiPolygon(polys) => {
            // A multi-polygon flattens into one polygon shape carrying
            // every loop; the region keeps the grouping for the
            // interior cover.
            let mut loops = Vec::new();
            for poly in &polys.0 {
                loops.extend(polygon_loops(poly));
            }
            Ok((vec![Shape::Polygon(loops)], vec![Region::Area(polys.clone())]))
        }
        other => Err(StoreError::UnsupportedGeometry(type_name(other).to_string())),
    }
}

/// Reconstruct a display geometry from blob shapes.
///
/// Loop grouping of a flattened multi-polygon is not recovered; all
/// loops come back as one polygon.
pub fn shapes_to_geom(shapes: &[Shape]) -> Option<Geometry<f64>> {
    match shapes {
        [] => None,
        [single] => Some(shape_to_geom(single)),
        many => {
            // Multiple shapes only arise from a MultiLineString.
            let lines: Vec<LineString<f64>> = many
                .iter()
                .filter_map(|s| match s {
                    Shape::Polyline(pts) => Some(points_to_line(pts)),
                    _ => None,
                })
                .collect();
            if lines.is_empty() {
                Some(shape_to_geom(&many[0]))
            } else {
                Some(Geometry::MultiLineString(geo_types::MultiLineString(lines)))
            }
        }
    }
}

fn shape_to_geom(shape: &Shape) -> Geometry<f64> {
    match shape {
        Shape::Points(pts) => {
            if pts.len() == 1 {
                let (lat, lng) = shape::degrees_from_point(&pts[0]);
                Geometry::Point(geo_types::Point::new(lng, lat))
            } else {
                let points = pts
                    .iter()
                    .map(|p| {
                        let (lat, lng) = shape::degrees_from_point(p);
                        geo_types::Point::new(lng, lat)
                    })
                    .collect();
                Geometry::MultiPoint(geo_types::MultiPoint(points))
            }
        }
        Shape::Polyline(pts) => Geometry::LineString(points_to_line(pts)),
        Shape::Polygon(loops) => {
            let mut rings = loops.iter().map(|l| loop_to_ring(l));
            let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
            Geometry::Polygon(Polygon::new(exterior, rings.collect()))
        }
    }
}

fn line_points(line: &LineString<f64>) -> Vec<s2::point::Point> {
    line.coords()
        .map(|c| shape::point_from_degrees(c.y, c.x))
        .collect()
}

fn points_to_line(pts: &[s2::point::Point]) -> LineString<f64> {
    LineString::from(
        pts.iter()
            .map(|p| {
                let (lat, lng) = shape::degrees_from_point(p);
                (lng, lat)
            })
            .collect::<Vec<_>>(),
    )
}

/// Closed ring back from an implicitly-closed loop: the first vertex
/// is appended again so the GeoJSON ring is explicitly closed.
fn loop_to_ring(ring: &Loop) -> LineString<f64> {
    let mut coords: Vec<(f64, f64)> = ring
        .iter()
        .map(|p| {
            let (lat, lng) = shape::degrees_from_point(p);
            (lng, lat)
        })
        .collect();
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    LineString::from(coords)
}

fn polygon_loops(poly: &Polygon<f64>) -> Vec<Loop> {
    let mut loops = Vec::with_capacity(1 + poly.interiors().len());
    loops.push(ring_to_loop(poly.exterior()));
    for ring in poly.interiors() {
        loops.push(ring_to_loop(ring));
    }
    loops
}

/// Loop from a ring, dropping the trailing duplicate vertex if the
/// ring is explicitly closed.
fn ring_to_loop(ring: &LineString<f64>) -> Loop {
    let coords = &ring.0;
    let n = match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => coords.len() - 1,
        _ => coords.len(),
    };
    coords[..n]
        .iter()
        .map(|c| shape::point_from_degrees(c.y, c.x))
        .collect()
}

fn is_empty(geom: &Geometry<f64>) -> bool {
    match geom {
        Geometry::Point(_) => false,
        Geometry::LineString(line) => line.0.is_empty(),
        Geometry::Polygon(poly) => poly.exterior().0.is_empty(),
        Geometry::MultiPoint(points) => points.0.is_empty(),
        Geometry::MultiLineString(lines) => {
            lines.0.is_empty() || lines.0.iter().all(|l| l.0.is_empty())
        }
        Geometry::MultiPolygon(polys) => {
            polys.0.is_empty() || polys.0.iter().all(|p| p.exterior().0.is_empty())
        }
        _ => false,
    }
}

fn type_name(geom: &Geometry<f64>) -> &'static str {
    match geom {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

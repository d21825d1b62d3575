//! Cell-grid adapter over the S2 hierarchical decomposition.
//!
//! Wraps the `s2` crate's cell machinery behind the handful of
//! operations the store needs: cap construction from a radius in
//! meters, exterior coverings of latitude/longitude extents, the
//! budgeted interior covering used for polygon features, and the
//! cell-to-point distance bound driving the query-time cull.
//!
//! Cells at the same level have roughly equal area and tile the
//! sphere without gaps; level 4 cells span large regions, level 16
//! cells are a couple hundred meters across. The store covers every
//! region with cells between those two levels.

use geo::{BoundingRect, Contains, Intersects};
use s2::cap::Cap;
use s2::cell::Cell;
use s2::cellid::CellID;
use s2::latlng::LatLng;
use s2::point::Point;
use s2::rect::Rect;
use s2::region::RegionCoverer;

use crate::shape;

/// Mean Earth radius used for all meter/angle conversions.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Upper bound on cells examined by the interior descent before it
/// gives up on a pathological region.
const INTERIOR_SEARCH_LIMIT: usize = 512;

/// Covering parameters shared by the indexing and query sides.
///
/// Interior and exterior covers use the same settings so the two term
/// sets are comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveringOptions {
    /// Coarsest cell level used in any cover.
    pub min_level: u8,
    /// Finest cell level used in any cover.
    pub max_level: u8,
    /// Target cell count per cover.
    pub max_cells: usize,
}

impl Default for CoveringOptions {
    fn default() -> Self {
        Self {
            min_level: 4,
            max_level: 16,
            max_cells: 8,
        }
    }
}

impl CoveringOptions {
    fn coverer(&self) -> RegionCoverer {
        RegionCoverer {
            min_level: self.min_level,
            max_level: self.max_level,
            level_mod: 1,
            max_cells: self.max_cells,
        }
    }
}

/// Spherical cap of `radius_meters` around a position.
pub fn cap_from_meters(lat: f64, lng: f64, radius_meters: f64) -> Cap {
    let center = Point::from(LatLng::from_degrees(lat, lng));
    let angle = s2::s1::angle::Angle::from(s2::s1::Rad(radius_meters / EARTH_RADIUS_METERS));
    Cap::from_center_angle(&center, &angle)
}

/// Covering of a cap within the configured levels.
pub fn cover_cap(cap: &Cap, opts: &CoveringOptions) -> Vec<CellID> {
    opts.coverer().covering(cap).0
}

/// Covering of a latitude/longitude rectangle.
///
/// The rectangle cover is a superset of the exact region cover, which
/// is the direction the exterior-cover invariant needs.
pub fn cover_rect(
    min_lat: f64,
    min_lng: f64,
    max_lat: f64,
    max_lng: f64,
    opts: &CoveringOptions,
) -> Vec<CellID> {
    let rect = Rect::from_degrees(min_lat, min_lng, max_lat, max_lng);
    opts.coverer().covering(&rect).0
}

/// Cell containing a position at the given level.
pub fn cell_for_point(lat: f64, lng: f64, level: u8) -> CellID {
    CellID::from(LatLng::from_degrees(lat, lng)).parent(level as u64)
}

/// Leaf cell of a position.
pub fn leaf_cell(lat: f64, lng: f64) -> CellID {
    CellID::from(LatLng::from_degrees(lat, lng))
}

/// Level of a cell id.
pub fn level_of(id: CellID) -> u8 {
    id.level() as u8
}

/// Whether `cell` contains the given leaf cell.
pub fn cell_contains_leaf(cell: CellID, leaf: CellID) -> bool {
    cell.range_min().0 <= leaf.0 && leaf.0 <= cell.range_max().0
}

/// The four children of a cell, from the id arithmetic: the level
/// marker is the lowest set bit; re-planting it two bits lower at the
/// four odd multiples yields the children in position order.
pub(crate) fn children(id: CellID) -> [CellID; 4] {
    let lsb = id.0 & id.0.wrapping_neg();
    let child_lsb = lsb >> 2;
    let base = id.0 - lsb;
    [
        CellID(base + child_lsb),
        CellID(base + 3 * child_lsb),
        CellID(base + 5 * child_lsb),
        CellID(base + 7 * child_lsb),
    ]
}

/// The cell's boundary as a closed longitude/latitude ring.
fn cell_quad(id: CellID) -> geo_types::Polygon<f64> {
    let cell = Cell::from(&id);
    let mut coords: Vec<(f64, f64)> = Vec::with_capacity(5);
    for k in 0..4 {
        let v = cell.vertex(k);
        let (lat, lng) = shape::degrees_from_point(&v);
        coords.push((lng, lat));
    }
    coords.push(coords[0]);
    geo_types::Polygon::new(geo_types::LineString::from(coords), vec![])
}

/// Minimum angular distance (radians) from `x` to the cell: zero when
/// the cell contains the point's leaf, otherwise the nearest of its
/// four boundary edges.
pub fn cell_distance(id: CellID, x: &Point, leaf: CellID) -> f64 {
    if cell_contains_leaf(id, leaf) {
        return 0.0;
    }
    let cell = Cell::from(&id);
    let mut min = f64::INFINITY;
    for k in 0..4usize {
        let a = cell.vertex(k);
        let b = cell.vertex((k + 1) % 4);
        min = min.min(shape::distance_from_segment(x, &a, &b));
    }
    min
}

/// Budgeted interior covering of a polygonal area.
///
/// Starts from the exterior covering of the area's bounding
/// rectangle and descends coarsest-first: a cell whose boundary quad
/// lies fully inside the area is accepted; a partially overlapping
/// cell above `max_level` is split into its four children. The
/// descent stops once `max_cells` cells are accepted, so the result
/// tiles the bulk of the interior from its center outward and every
/// accepted cell is fully contained.
pub fn interior_covering(
    area: &geo_types::MultiPolygon<f64>,
    opts: &CoveringOptions,
) -> Vec<CellID> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let Some(rect) = area.bounding_rect() else {
        return Vec::new();
    };
    let seeds = cover_rect(
        rect.min().y,
        rect.min().x,
        rect.max().y,
        rect.max().x,
        opts,
    );

    // Min-heap keyed by level: coarsest cells surface first, so the
    // large central cells are accepted before the budget runs out.
    let mut queue: BinaryHeap<Reverse<(u8, u64)>> = seeds
        .into_iter()
        .map(|c| Reverse((level_of(c), c.0)))
        .collect();

    let mut accepted = Vec::new();
    let mut examined = 0usize;

    while let Some(Reverse((level, raw))) = queue.pop() {
        if accepted.len() >= opts.max_cells || examined >= INTERIOR_SEARCH_LIMIT {
            break;
        }
        examined += 1;

        let id = CellID(raw);
        let quad = cell_quad(id);
        if area.contains(&quad) {
            accepted.push(id);
        } else if level < opts.max_level && area.intersects(&quad) {
            for child in children(id) {
                queue.push(Reverse((level + 1, child.0)));
            }
        }
    }

    accepted.sort_by_key(|c| c.0);
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, MultiPolygon, Polygon};

    #[test]
    fn test_cover_cap_bounded() {
        let opts = CoveringOptions::default();
        let cap = cap_from_meters(43.6532, -79.3832, 10_000.0);
        let cells = cover_cap(&cap, &opts);
        assert!(!cells.is_empty());
        assert!(cells.len() <= opts.max_cells);
        for c in &cells {
            let level = level_of(*c);
            assert!(level >= opts.min_level && level <= opts.max_level);
        }
    }

    #[test]
    fn test_cell_for_point_deterministic() {
        let a = cell_for_point(45.5017, -73.5673, 16);
        let b = cell_for_point(45.5017, -73.5673, 16);
        assert_eq!(a.0, b.0);
        assert_eq!(level_of(a), 16);
    }

    #[test]
    fn test_children_refine_parent() {
        let parent = cell_for_point(10.0, 20.0, 8);
        for child in children(parent) {
            assert_eq!(level_of(child), 9);
            assert_eq!(child.parent(8).0, parent.0);
        }
    }

    #[test]
    fn test_cell_contains_leaf() {
        let leaf = leaf_cell(43.65, -79.38);
        let parent = leaf.parent(10);
        assert!(cell_contains_leaf(parent, leaf));
        let elsewhere = leaf_cell(45.5017, -73.5673);
        assert!(!cell_contains_leaf(parent, elsewhere));
    }

    #[test]
    fn test_cell_distance_containing_is_zero() {
        let leaf = leaf_cell(43.65, -79.38);
        let cell = leaf.parent(12);
        let x = shape::point_from_degrees(43.65, -79.38);
        assert_eq!(cell_distance(cell, &x, leaf), 0.0);
    }

    #[test]
    fn test_cell_distance_far_cell() {
        let x = shape::point_from_degrees(43.65, -79.38);
        let leaf = leaf_cell(43.65, -79.38);
        let far = cell_for_point(45.5017, -73.5673, 12);
        let d = cell_distance(far, &x, leaf);
        // Toronto to Montreal is on the order of 500 km.
        assert!(d * EARTH_RADIUS_METERS > 100_000.0);
    }

    fn degree_box(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![Polygon::new(
            LineString::from(vec![
                (min_lng, min_lat),
                (max_lng, min_lat),
                (max_lng, max_lat),
                (min_lng, max_lat),
                (min_lng, min_lat),
            ]),
            vec![],
        )])
    }

    #[test]
    fn test_interior_covering_contained() {
        let opts = CoveringOptions::default();
        let area = degree_box(-80.0, 43.0, -78.0, 45.0);
        let cells = interior_covering(&area, &opts);
        assert!(!cells.is_empty());
        for c in &cells {
            assert!(area.contains(&cell_quad(*c)), "cell {} not contained", c.0);
        }
    }

    #[test]
    fn test_interior_covering_empty_for_tiny_area() {
        let opts = CoveringOptions::default();
        // Far smaller than a max_level cell.
        let area = degree_box(-79.3801, 43.6499, -79.3800, 43.6500);
        let cells = interior_covering(&area, &opts);
        assert!(cells.is_empty());
    }
}

//! Two-phase proximity query: candidate gather via term prefix
//! scans, then per-candidate distance refinement with lazy shape
//! loading.
//!
//! The interior pass runs first so polygons known to contain the
//! query point are settled without an edge-distance computation; the
//! exterior pass only admits ids the interior pass has not already
//! claimed. Refinement culls most candidates by cell distance against
//! the blob's persisted shape index before any shape is rehydrated.

use rustc_hash::FxHashSet;
use s2::cellid::CellID;
use tracing::warn;

use crate::cells::{self, EARTH_RADIUS_METERS};
use crate::codec::DecodedEntry;
use crate::error::Result;
use crate::geometry;
use crate::shape::{self, Shape};
use crate::shape_index::ShapeFactory;
use crate::store::{term_scan_prefix, GeoStore, StoredItem, EXTERIOR_PREFIX, INTERIOR_PREFIX};
use crate::terms;

pub(crate) fn find_closest(
    store: &GeoStore,
    lat: f64,
    lng: f64,
    radius_meters: f64,
    with_geometry: bool,
) -> Result<Vec<StoredItem>> {
    let opts = store.options();
    let center = shape::point_from_degrees(lat, lng);
    let leaf = cells::leaf_cell(lat, lng);
    let radius_angle = radius_meters / EARTH_RADIUS_METERS;

    let cap = cells::cap_from_meters(lat, lng, radius_meters);
    let query_terms = terms::query_terms(&cells::cover_cap(&cap, opts), opts);

    // Candidate gather. Interior hits first: those ids skip the
    // exterior pass entirely.
    let mut interior: FxHashSet<Vec<u8>> = FxHashSet::default();
    let mut exterior: FxHashSet<Vec<u8>> = FxHashSet::default();

    for term in &query_terms {
        let prefix = term_scan_prefix(INTERIOR_PREFIX, term);
        for kv in store.index_tree().scan_prefix(&prefix) {
            let (key, _) = kv?;
            interior.insert(key[prefix.len()..].to_vec());
        }
    }
    for term in &query_terms {
        let prefix = term_scan_prefix(EXTERIOR_PREFIX, term);
        for kv in store.index_tree().scan_prefix(&prefix) {
            let (key, _) = kv?;
            let id = key[prefix.len()..].to_vec();
            if !interior.contains(&id) {
                exterior.insert(id);
            }
        }
    }

    let mut results = Vec::new();
    for id in &interior {
        if let Some(item) = refine(
            store,
            id,
            lat,
            lng,
            &center,
            leaf,
            radius_angle,
            true,
            with_geometry,
        )? {
            results.push(item);
        }
    }
    for id in &exterior {
        if let Some(item) = refine(
            store,
            id,
            lat,
            lng,
            &center,
            leaf,
            radius_angle,
            false,
            with_geometry,
        )? {
            results.push(item);
        }
    }

    results.sort_by(|a, b| {
        a.distance_meters
            .partial_cmp(&b.distance_meters)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}

/// Refine one candidate. `Ok(None)` covers every per-candidate skip:
/// missing blob (orphaned term row), corrupt blob, cell-bound
/// rejection, and out-of-radius.
#[allow(clippy::too_many_arguments)]
fn refine(
    store: &GeoStore,
    id: &[u8],
    lat: f64,
    lng: f64,
    center: &s2::point::Point,
    leaf: CellID,
    radius_angle: f64,
    from_interior: bool,
    with_geometry: bool,
) -> Result<Option<StoredItem>> {
    let Some(blob) = store.objects_tree().get(id)? else {
        return Ok(None);
    };

    let entry = match DecodedEntry::decode(blob.to_vec()) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(id = %String::from_utf8_lossy(id), error = %err, "skipping corrupt blob");
            return Ok(None);
        }
    };

    // Cell-bound cull: reject when every indexed cell lies beyond the
    // radius, without touching a shape body.
    let within_bound = entry.index().cells().iter().any(|cell| {
        !cell.shapes.is_empty()
            && cells::cell_distance(CellID(cell.cell), center, leaf) <= radius_angle
    });
    if !within_bound {
        return Ok(None);
    }

    let shapes: Vec<Shape> = match (0..entry.shape_count()).map(|i| entry.shape(i)).collect() {
        Ok(shapes) => shapes,
        Err(err) => {
            warn!(id = %String::from_utf8_lossy(id), error = %err, "skipping corrupt blob");
            return Ok(None);
        }
    };

    // Interior candidates whose polygon contains the query point are
    // exact matches at distance zero; everything else pays the edge
    // iteration.
    let contained = from_interior
        && matches!(
            shapes.first(),
            Some(Shape::Polygon(loops)) if shape::polygon_contains(loops, lat, lng)
        );
    let angle = if contained {
        0.0
    } else {
        shapes
            .iter()
            .map(|s| s.min_distance(center))
            .fold(f64::INFINITY, f64::min)
    };

    if angle > radius_angle {
        return Ok(None);
    }

    let properties = match serde_json::from_slice(entry.props()) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(id = %String::from_utf8_lossy(id), "skipping blob with corrupt properties");
            return Ok(None);
        }
    };

    let geometry = if with_geometry {
        geometry::shapes_to_geom(&shapes)
    } else {
        None
    };

    Ok(Some(StoredItem {
        id: String::from_utf8_lossy(id).into_owned(),
        properties,
        geometry,
        distance_meters: angle * EARTH_RADIUS_METERS,
    }))
}

//! End-to-end proximity scenarios over a temporary store.

use geokv::GeoStore;
use serde_json::json;

fn open_temp() -> (tempfile::TempDir, GeoStore) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let store = GeoStore::open(dir.path().join("geo.db")).expect("open");
    (dir, store)
}

fn point_feature(lng: f64, lat: f64, props: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [lng, lat]},
        "properties": props,
    }))
    .expect("feature json")
}

fn polygon_feature(ring: &[(f64, f64)]) -> Vec<u8> {
    let coords: Vec<[f64; 2]> = ring.iter().map(|&(lng, lat)| [lng, lat]).collect();
    serde_json::to_vec(&json!({
        "type": "Feature",
        "geometry": {"type": "Polygon", "coordinates": [coords]},
        "properties": {},
    }))
    .expect("feature json")
}

const DOWNTOWN_BOX: &[(f64, f64)] = &[
    (-79.40, 43.64),
    (-79.37, 43.64),
    (-79.37, 43.66),
    (-79.40, 43.66),
    (-79.40, 43.64),
];

const TORONTO_DOWNTOWN: &[(f64, f64)] = &[
    (-79.42, 43.63),
    (-79.35, 43.63),
    (-79.35, 43.68),
    (-79.42, 43.68),
    (-79.42, 43.63),
];

#[test]
fn point_within_radius() {
    let (_dir, store) = open_temp();
    store
        .put(
            "cn_tower",
            &point_feature(-79.3871, 43.6426, json!({"type": "landmark"})),
        )
        .unwrap();

    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "cn_tower");
    assert!(
        results[0].distance_meters > 1_100.0 && results[0].distance_meters < 1_500.0,
        "unexpected distance {}",
        results[0].distance_meters
    );
    assert_eq!(results[0].properties["type"], "landmark");
    assert!(results[0].geometry.is_none());
}

#[test]
fn distant_city_excluded() {
    let (_dir, store) = open_temp();
    store
        .put(
            "cn_tower",
            &point_feature(-79.3871, 43.6426, json!({"type": "landmark"})),
        )
        .unwrap();
    store
        .put(
            "montreal",
            &point_feature(-73.5673, 45.5017, json!({"type": "city"})),
        )
        .unwrap();

    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "cn_tower");
}

#[test]
fn containing_polygon_sorts_first_at_zero() {
    let (_dir, store) = open_temp();
    store
        .put(
            "cn_tower",
            &point_feature(-79.3871, 43.6426, json!({"type": "landmark"})),
        )
        .unwrap();
    store
        .put(
            "montreal",
            &point_feature(-73.5673, 45.5017, json!({"type": "city"})),
        )
        .unwrap();
    store
        .put("downtown_box", &polygon_feature(DOWNTOWN_BOX))
        .unwrap();

    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "downtown_box");
    assert_eq!(results[0].distance_meters, 0.0);
    assert_eq!(results[1].id, "cn_tower");
}

#[test]
fn interior_match_with_geometry() {
    let (_dir, store) = open_temp();
    store
        .put("toronto_downtown", &polygon_feature(TORONTO_DOWNTOWN))
        .unwrap();

    let results = store.find_closest(43.65, -79.38, 1_000.0, true).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "toronto_downtown");
    assert!(
        results[0].distance_meters <= 10.0,
        "interior match should be ~0, got {}",
        results[0].distance_meters
    );
    match &results[0].geometry {
        Some(geo_types::Geometry::Polygon(p)) => {
            assert_eq!(p.exterior().0.len(), 5);
        }
        other => panic!("expected polygon geometry, got {:?}", other),
    }
}

#[test]
fn exterior_match_reports_edge_distance() {
    let (_dir, store) = open_temp();
    store
        .put("toronto_downtown", &polygon_feature(TORONTO_DOWNTOWN))
        .unwrap();

    // Roughly 800 m east of the polygon's eastern edge.
    let results = store.find_closest(43.65, -79.34, 1_000.0, false).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "toronto_downtown");
    let d = results[0].distance_meters;
    assert!(d > 500.0 && d < 2_000.0, "unexpected distance {}", d);
}

#[test]
fn results_sorted_ascending() {
    let (_dir, store) = open_temp();
    store
        .put("near", &point_feature(-79.3850, 43.6530, json!({})))
        .unwrap();
    store
        .put("mid", &point_feature(-79.3900, 43.6480, json!({})))
        .unwrap();
    store
        .put("far", &point_feature(-79.4100, 43.6400, json!({})))
        .unwrap();

    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "near");
    for pair in results.windows(2) {
        assert!(pair[0].distance_meters <= pair[1].distance_meters);
    }
}

#[test]
fn epsilon_self_query_finds_point() {
    let (_dir, store) = open_temp();
    store
        .put("spot", &point_feature(-79.3871, 43.6426, json!({})))
        .unwrap();

    let results = store.find_closest(43.6426, -79.3871, 5.0, false).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "spot");
    assert!(results[0].distance_meters < 5.0);
}

#[test]
fn repeated_put_returns_id_once() {
    let (_dir, store) = open_temp();
    let feature = point_feature(-79.3871, 43.6426, json!({"rev": 1}));
    store.put("cn_tower", &feature).unwrap();
    let updated = point_feature(-79.3871, 43.6426, json!({"rev": 2}));
    store.put("cn_tower", &updated).unwrap();

    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "cn_tower");
    assert_eq!(results[0].properties["rev"], 2);
}

#[test]
fn multilinestring_nearest_segment() {
    let (_dir, store) = open_temp();
    let raw = serde_json::to_vec(&json!({
        "type": "Feature",
        "geometry": {"type": "MultiLineString", "coordinates": [
            [[-79.40, 43.64], [-79.37, 43.64]],
            [[-79.40, 43.70], [-79.37, 43.70]],
        ]},
        "properties": {"name": "paths"},
    }))
    .unwrap();
    store.put("paths", &raw).unwrap();

    // About 1.1 km north of the southern path.
    let results = store.find_closest(43.65, -79.385, 2_000.0, false).unwrap();
    assert_eq!(results.len(), 1);
    let d = results[0].distance_meters;
    assert!(d > 800.0 && d < 1_500.0, "unexpected distance {}", d);
}

#[test]
fn empty_database_returns_nothing() {
    let (_dir, store) = open_temp();
    let results = store
        .find_closest(43.6532, -79.3832, 10_000.0, false)
        .unwrap();
    assert!(results.is_empty());
}

//! Store façade: the key-value handle, the two logical buckets, and
//! the write path.
//!
//! The `objects` tree maps feature id → blob (see [`crate::codec`]);
//! the `index` tree holds one key per (term, feature) pair:
//!
//! ```text
//! "int:" term 0x00 id     interior cover
//! "ext:" term 0x00 id     exterior cover
//! ```
//!
//! with a constant one-byte presence marker as the value. The NUL
//! separator guarantees that a prefix scan of `kind + term + 0x00`
//! yields exactly the ids indexed under that term.

use std::path::Path;

use rustc_hash::FxHashSet;
use sled::transaction::TransactionError;
use sled::Transactional;
use tracing::info;

use crate::cells::CoveringOptions;
use crate::codec;
use crate::error::{Result, StoreError};
use crate::geometry;
use crate::query;

pub(crate) const BUCKET_OBJECTS: &str = "objects";
pub(crate) const BUCKET_INDEX: &str = "index";

pub(crate) const INTERIOR_PREFIX: &str = "int:";
pub(crate) const EXTERIOR_PREFIX: &str = "ext:";

const PRESENCE_MARKER: &[u8] = &[1];

/// A prepared feature, ready for a batch write.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Feature id; the `objects` key.
    pub id: String,
    /// Encoded blob (props + shapes + shape index).
    pub blob: Vec<u8>,
    /// Terms of cells fully inside the feature (guaranteed match).
    pub interior_terms: Vec<String>,
    /// Terms of cells intersecting the feature (candidate match).
    pub exterior_terms: Vec<String>,
}

/// One query result.
#[derive(Debug, Clone)]
pub struct StoredItem {
    /// Feature id.
    pub id: String,
    /// Decoded property map.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Reconstructed geometry, when requested.
    pub geometry: Option<geo_types::Geometry<f64>>,
    /// Minimum distance from the query point, in meters.
    pub distance_meters: f64,
}

/// Embedded geospatial store over a sled database.
///
/// The handle is cheap to clone and safe to share across threads;
/// [`prepare`] is pure CPU work and may run concurrently from many
/// workers against one handle.
///
/// [`prepare`]: GeoStore::prepare
#[derive(Clone)]
pub struct GeoStore {
    db: sled::Db,
    objects: sled::Tree,
    index: sled::Tree,
    opts: CoveringOptions,
}

impl GeoStore {
    /// Open (or create) the database at `path` and its two buckets.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let objects = db.open_tree(BUCKET_OBJECTS)?;
        let index = db.open_tree(BUCKET_INDEX)?;
        info!(path = %path.as_ref().display(), "store opened");
        Ok(Self {
            db,
            objects,
            index,
            opts: CoveringOptions::default(),
        })
    }

    /// Covering configuration shared by indexing and queries.
    pub fn options(&self) -> &CoveringOptions {
        &self.opts
    }

    pub(crate) fn objects_tree(&self) -> &sled::Tree {
        &self.objects
    }

    pub(crate) fn index_tree(&self) -> &sled::Tree {
        &self.index
    }

    /// Prepare a feature for writing: convert its geometry, encode
    /// the blob, and generate interior and exterior terms. Pure CPU,
    /// no I/O.
    pub fn prepare(&self, id: &str, feature: &geojson::Feature) -> Result<IndexEntry> {
        if id.is_empty() {
            return Err(StoreError::InvalidGeoJson("empty feature id".into()));
        }
        let geojson_geom = feature
            .geometry
            .as_ref()
            .ok_or(StoreError::EmptyGeometry)?;
        let geom = geo_types::Geometry::<f64>::try_from(geojson_geom.clone())
            .map_err(|e| StoreError::UnsupportedGeometry(e.to_string()))?;

        let (shapes, regions) = geometry::convert(&geom)?;

        let empty = serde_json::Map::new();
        let props = feature.properties.as_ref().unwrap_or(&empty);
        let props_json = serde_json::to_vec(props)
            .map_err(|e| StoreError::InvalidGeoJson(e.to_string()))?;

        let blob = codec::encode_entry(&props_json, &shapes, &self.opts);

        let mut interior: FxHashSet<String> = FxHashSet::default();
        let mut exterior: FxHashSet<String> = FxHashSet::default();
        for region in &regions {
            let cover = region.covering(&self.opts);
            exterior.extend(crate::terms::index_terms(&cover, &self.opts));
            let interior_cover = region.interior_covering(&self.opts);
            interior.extend(crate::terms::index_terms(&interior_cover, &self.opts));
        }

        Ok(IndexEntry {
            id: id.to_string(),
            blob,
            interior_terms: interior.into_iter().collect(),
            exterior_terms: exterior.into_iter().collect(),
        })
    }

    /// Write a batch of prepared entries in one transaction: every
    /// blob and term row lands, or none do.
    ///
    /// Re-putting an id overwrites its blob but leaves term rows from
    /// the prior version behind; the reader tolerates such orphans,
    /// and queries still return each id at most once.
    pub fn write_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        (&self.objects, &self.index)
            .transaction(|(objects, index)| {
                for entry in entries {
                    objects.insert(entry.id.as_bytes(), entry.blob.as_slice())?;
                    for term in &entry.interior_terms {
                        index.insert(term_key(INTERIOR_PREFIX, term, &entry.id), PRESENCE_MARKER)?;
                    }
                    for term in &entry.exterior_terms {
                        index.insert(term_key(EXTERIOR_PREFIX, term, &entry.id), PRESENCE_MARKER)?;
                    }
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => StoreError::Tx("transaction aborted".into()),
                TransactionError::Storage(e) => StoreError::Db(e),
            })
    }

    /// Parse, prepare, and write a single feature.
    pub fn put(&self, id: &str, feature_json: &[u8]) -> Result<()> {
        let feature: geojson::Feature = serde_json::from_slice(feature_json)
            .map_err(|e| StoreError::InvalidGeoJson(e.to_string()))?;
        let entry = self.prepare(id, &feature)?;
        self.write_batch(std::slice::from_ref(&entry))
    }

    /// All features within `radius_meters` of the position, sorted
    /// ascending by distance. With `with_geometry`, each result also
    /// carries its reconstructed geometry.
    pub fn find_closest(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: f64,
        with_geometry: bool,
    ) -> Result<Vec<StoredItem>> {
        query::find_closest(self, lat, lng, radius_meters, with_geometry)
    }

    /// Block until all writes have reached disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Rewrite the database at `src` into a freshly packed copy at `dst`.
pub fn compact(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let src_db = sled::open(src.as_ref())?;
    let dst_db = sled::open(dst.as_ref())?;
    dst_db.import(src_db.export());
    dst_db.flush()?;
    info!(
        src = %src.as_ref().display(),
        dst = %dst.as_ref().display(),
        "compaction complete"
    );
    Ok(())
}

/// Full index key: `kind + term + 0x00 + id`.
pub(crate) fn term_key(kind: &str, term: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(kind.len() + term.len() + 1 + id.len());
    key.extend_from_slice(kind.as_bytes());
    key.extend_from_slice(term.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Scan prefix for every id indexed under a term: `kind + term + 0x00`.
pub(crate) fn term_scan_prefix(kind: &str, term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(kind.len() + term.len() + 1);
    key.extend_from_slice(kind.as_bytes());
    key.extend_from_slice(term.as_bytes());
    key.push(0);
    key
}

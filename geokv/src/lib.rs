//! Embedded geospatial key-value store.
//!
//! Indexes heterogeneous geographic features (points, polylines,
//! polygons, and their multi- variants) for fast proximity queries:
//! find every feature within R meters of a position. Features are
//! written once in bulk and read many times.
//!
//! # Architecture
//!
//! ```text
//! ingest                               query
//! ──────                               ─────
//! GeoJSON bytes                        (lat, lng, radius)
//!      │                                    │
//!      ▼                                    ▼
//! decoder ─► workers ─► batch writer   cap cover → query terms
//!   (raw)    (prepare)  (one txn per        │
//!      │         │       batch)             ▼
//!      │         ▼                     prefix scans on `index`
//!      │   convert geometry            (interior pass, then
//!      │   encode blob                  exterior)
//!      │   generate terms                   │
//!      ▼         │                          ▼
//!      └────►  sled  ◄──────  fetch blob, cell-bound cull,
//!        objects / index      exact edge distance, sort
//! ```
//!
//! Two sled trees back the store: `objects` (id → self-describing
//! blob of properties, shapes, and a persisted shape index) and
//! `index` (cell-term keys under `int:`/`ext:` prefixes). The
//! interior/exterior split lets a polygon that contains the query
//! point match at distance zero without any edge iteration.
//!
//! # Modules
//!
//! - [`store`]: store façade (open / prepare / write_batch / put /
//!   find_closest / compact)
//! - [`ingest`]: parallel decode → prepare → batched-write pipeline
//! - [`cells`]: cell-grid adapter over the S2 decomposition
//! - [`terms`]: index- and query-term generation
//! - [`geometry`]: GeoJSON ↔ internal shape/region conversion
//! - [`shape`]: spherical primitives and distance math
//! - [`shape_index`]: per-feature cell index persisted in the blob
//! - [`codec`]: blob encoding and lazy decoding
//! - [`error`]: error types

pub mod cells;
pub mod codec;
pub mod error;
pub mod geometry;
pub mod ingest;
mod query;
pub mod shape;
pub mod shape_index;
pub mod store;
pub mod terms;

pub use cells::{CoveringOptions, EARTH_RADIUS_METERS};
pub use error::{Result, StoreError};
pub use ingest::{IngestOptions, IngestReport};
pub use store::{compact, GeoStore, IndexEntry, StoredItem};

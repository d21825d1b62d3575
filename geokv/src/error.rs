//! Error types for the store.

use thiserror::Error;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error reading an input file or the database path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key-value engine error (open, read, tree access).
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    /// A batch transaction failed; none of its entries were written.
    #[error("transaction failed: {0}")]
    Tx(String),

    /// Malformed GeoJSON input (per-feature recoverable).
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// Feature carries no coordinates.
    #[error("geometry is empty")]
    EmptyGeometry,

    /// Geometry variant outside the supported set.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    /// Stored blob is truncated or garbled (per-candidate recoverable).
    #[error("corrupt blob: {0}")]
    CorruptBlob(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Per-feature cell index over shapes, persisted inside the blob.
//!
//! The index groups shapes by the cells they touch so a query can
//! reject a candidate by cell distance alone, before any shape is
//! rehydrated. It is built once at encode time, serialized as the
//! blob's trailing stream, and reloaded lazily.
//!
//! # Format
//!
//! ```text
//! uvarint cellCount
//! repeat cellCount times (ascending by cell id):
//!   u64 LE  cellId
//!   uvarint clippedCount
//!   uvarint shapeId × clippedCount
//! ```

use std::collections::BTreeMap;

use s2::cellid::CellID;

use crate::cells::{self, CoveringOptions};
use crate::codec::{read_uvarint, write_uvarint};
use crate::error::{Result, StoreError};
use crate::shape::{self, Shape};

/// Produces shapes by integer id; the loader's only view of the blob.
pub trait ShapeFactory {
    /// Number of shapes behind the factory.
    fn len(&self) -> usize;

    /// Whether the factory holds no shapes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the shape with the given id.
    fn shape(&self, id: usize) -> Result<Shape>;
}

/// One cell of the index with the ids of the shapes clipped to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCell {
    /// Raw cell id.
    pub cell: u64,
    /// Ids of shapes intersecting this cell.
    pub shapes: Vec<u32>,
}

/// Mutable index under construction. Must be finalized by [`encode`]
/// before it can be persisted.
///
/// [`encode`]: ShapeIndex::encode
#[derive(Debug, Default)]
pub struct ShapeIndex {
    cells: BTreeMap<u64, Vec<u32>>,
}

impl ShapeIndex {
    /// Build the index over a feature's shapes: each shape contributes
    /// the covering of its extent.
    pub fn build(shapes: &[Shape], opts: &CoveringOptions) -> Self {
        let mut cells: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
        for (i, shape) in shapes.iter().enumerate() {
            for cell in shape_covering(shape, opts) {
                let clipped = cells.entry(cell.0).or_default();
                if clipped.last() != Some(&(i as u32)) {
                    clipped.push(i as u32);
                }
            }
        }
        Self { cells }
    }

    /// Number of cells in the index.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the index has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Append the serialized index to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_uvarint(buf, self.cells.len() as u64);
        for (cell, shapes) in &self.cells {
            buf.extend_from_slice(&cell.to_le_bytes());
            write_uvarint(buf, shapes.len() as u64);
            for id in shapes {
                write_uvarint(buf, *id as u64);
            }
        }
    }
}

/// Reloaded index: the cell table is decoded eagerly (it is small),
/// shapes stay behind the factory until a candidate survives the
/// cell-distance cull.
#[derive(Debug)]
pub struct EncodedShapeIndex {
    cells: Vec<IndexCell>,
}

impl EncodedShapeIndex {
    /// Reinitialize over the serialized stream. The stream must be
    /// consumed exactly; trailing bytes mean the blob is garbled.
    pub fn init(data: &[u8], factory: &dyn ShapeFactory) -> Result<Self> {
        let mut pos = 0usize;
        let count = read_uvarint(data, &mut pos)?;
        if count > data.len() as u64 {
            return Err(StoreError::CorruptBlob("cell count exceeds stream".into()));
        }
        let mut cells = Vec::with_capacity(count as usize);
        let mut prev: Option<u64> = None;
        for _ in 0..count {
            if pos + 8 > data.len() {
                return Err(StoreError::CorruptBlob("truncated index cell".into()));
            }
            let cell = u64::from_le_bytes(
                data[pos..pos + 8]
                    .try_into()
                    .map_err(|_| StoreError::CorruptBlob("truncated index cell".into()))?,
            );
            pos += 8;
            if let Some(p) = prev {
                if cell <= p {
                    return Err(StoreError::CorruptBlob("index cells out of order".into()));
                }
            }
            prev = Some(cell);

            let clipped = read_uvarint(data, &mut pos)?;
            if clipped > data.len() as u64 {
                return Err(StoreError::CorruptBlob("clipped count exceeds stream".into()));
            }
            let mut shapes = Vec::with_capacity(clipped as usize);
            for _ in 0..clipped {
                let id = read_uvarint(data, &mut pos)?;
                if id as usize >= factory.len() {
                    return Err(StoreError::CorruptBlob(format!(
                        "index references shape {} of {}",
                        id,
                        factory.len()
                    )));
                }
                shapes.push(id as u32);
            }
            cells.push(IndexCell { cell, shapes });
        }
        if pos != data.len() {
            return Err(StoreError::CorruptBlob("trailing bytes after index".into()));
        }
        Ok(Self { cells })
    }

    /// Cells in ascending id order.
    pub fn cells(&self) -> &[IndexCell] {
        &self.cells
    }
}

/// Covering cells of a single shape.
fn shape_covering(shape: &Shape, opts: &CoveringOptions) -> Vec<CellID> {
    match shape {
        Shape::Points(pts) => {
            let mut cells: Vec<CellID> = pts
                .iter()
                .map(|p| {
                    let (lat, lng) = shape::degrees_from_point(p);
                    cells::cell_for_point(lat, lng, opts.max_level)
                })
                .collect();
            cells.sort_by_key(|c| c.0);
            cells.dedup_by_key(|c| c.0);
            cells
        }
        Shape::Polyline(pts) => extent_covering(pts, opts),
        Shape::Polygon(loops) => {
            let all: Vec<s2::point::Point> = loops.iter().flatten().cloned().collect();
            extent_covering(&all, opts)
        }
    }
}

fn extent_covering(pts: &[s2::point::Point], opts: &CoveringOptions) -> Vec<CellID> {
    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut min_lng = f64::INFINITY;
    let mut max_lng = f64::NEG_INFINITY;
    for p in pts {
        let (lat, lng) = shape::degrees_from_point(p);
        min_lat = min_lat.min(lat);
        max_lat = max_lat.max(lat);
        min_lng = min_lng.min(lng);
        max_lng = max_lng.max(lng);
    }
    if min_lat > max_lat {
        return Vec::new();
    }
    cells::cover_rect(min_lat, min_lng, max_lat, max_lng, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::point_from_degrees;

    struct VecFactory(Vec<Shape>);

    impl ShapeFactory for VecFactory {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn shape(&self, id: usize) -> Result<Shape> {
            Ok(self.0[id].clone())
        }
    }

    fn sample_shapes() -> Vec<Shape> {
        vec![
            Shape::Points(vec![
                point_from_degrees(43.6426, -79.3871),
                point_from_degrees(43.6465, -79.4636),
            ]),
            Shape::Polyline(vec![
                point_from_degrees(43.64, -79.40),
                point_from_degrees(43.66, -79.37),
            ]),
        ]
    }

    #[test]
    fn test_build_and_reload() {
        let opts = CoveringOptions::default();
        let shapes = sample_shapes();
        let index = ShapeIndex::build(&shapes, &opts);
        assert!(!index.is_empty());

        let mut buf = Vec::new();
        index.encode(&mut buf);

        let factory = VecFactory(shapes);
        let loaded = EncodedShapeIndex::init(&buf, &factory).unwrap();
        assert_eq!(loaded.cells().len(), index.len());

        // Ascending, each clipped list non-empty and in range.
        let mut prev = 0u64;
        for cell in loaded.cells() {
            assert!(cell.cell > prev);
            prev = cell.cell;
            assert!(!cell.shapes.is_empty());
            assert!(cell.shapes.iter().all(|&s| (s as usize) < factory.len()));
        }
    }

    #[test]
    fn test_point_cells_present() {
        let opts = CoveringOptions::default();
        let shapes = vec![Shape::Points(vec![point_from_degrees(43.6426, -79.3871)])];
        let index = ShapeIndex::build(&shapes, &opts);
        let expected = cells::cell_for_point(43.6426, -79.3871, opts.max_level);

        let mut buf = Vec::new();
        index.encode(&mut buf);
        let factory = VecFactory(shapes);
        let loaded = EncodedShapeIndex::init(&buf, &factory).unwrap();
        assert!(loaded.cells().iter().any(|c| c.cell == expected.0));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let opts = CoveringOptions::default();
        let shapes = sample_shapes();
        let index = ShapeIndex::build(&shapes, &opts);
        let mut buf = Vec::new();
        index.encode(&mut buf);
        buf.push(0xff);

        let factory = VecFactory(shapes);
        assert!(matches!(
            EncodedShapeIndex::init(&buf, &factory),
            Err(StoreError::CorruptBlob(_))
        ));
    }

    #[test]
    fn test_out_of_range_shape_id_rejected() {
        let opts = CoveringOptions::default();
        let shapes = sample_shapes();
        let index = ShapeIndex::build(&shapes, &opts);
        let mut buf = Vec::new();
        index.encode(&mut buf);

        // A factory claiming fewer shapes than the index references.
        let factory = VecFactory(vec![]);
        assert!(matches!(
            EncodedShapeIndex::init(&buf, &factory),
            Err(StoreError::CorruptBlob(_))
        ));
    }
}

//! On-disk blob codec for a stored feature.
//!
//! A blob is self-sufficient: properties, every shape, and the
//! persisted shape index can all be reconstructed from the bytes
//! alone.
//!
//! # Layout
//!
//! ```text
//! uvarint  propLen
//! bytes    propsJSON
//! uvarint  shapeCount
//! repeat shapeCount times:
//!   u8       shapeType   (1=points, 2=polyline, 3=polygon)
//!   uvarint  shapeLen
//!   bytes    shapeBody
//! bytes    serializedShapeIndex   (consumes the remainder)
//! ```
//!
//! Shape bodies hold unit-sphere vertices as three little-endian
//! `f64` each: a point collection and a polyline are `uvarint n`
//! followed by n points; a polygon is `uvarint numLoops` with each
//! loop `uvarint n` + n points.
//!
//! Decoding does not rehydrate shapes: it records a
//! (type, offset, length) triple per shape and loads the trailing
//! index over that table, so a candidate can be rejected by cell
//! distance without touching any shape body.

use std::ops::Range;

use s2::point::Point;
use s2::r3::vector::Vector;

use crate::cells::CoveringOptions;
use crate::error::{Result, StoreError};
use crate::shape::Shape;
use crate::shape_index::{EncodedShapeIndex, ShapeFactory, ShapeIndex};

const SHAPE_TYPE_POINTS: u8 = 1;
const SHAPE_TYPE_POLYLINE: u8 = 2;
const SHAPE_TYPE_POLYGON: u8 = 3;

const POINT_SIZE: usize = 24;

/// Append a base-128 uvarint (the Go `binary.PutUvarint` encoding).
pub(crate) fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Read a uvarint, advancing `pos`. Truncation and 64-bit overflow
/// are corrupt-blob conditions.
pub(crate) fn read_uvarint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut x: u64 = 0;
    let mut shift = 0u32;
    loop {
        let Some(&b) = data.get(*pos) else {
            return Err(StoreError::CorruptBlob("truncated varint".into()));
        };
        *pos += 1;
        if shift == 63 && b > 1 {
            return Err(StoreError::CorruptBlob("varint overflow".into()));
        }
        x |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(x);
        }
        shift += 7;
        if shift > 63 {
            return Err(StoreError::CorruptBlob("varint overflow".into()));
        }
    }
}

fn write_point(buf: &mut Vec<u8>, p: &Point) {
    buf.extend_from_slice(&p.0.x.to_le_bytes());
    buf.extend_from_slice(&p.0.y.to_le_bytes());
    buf.extend_from_slice(&p.0.z.to_le_bytes());
}

fn read_point(data: &[u8], pos: &mut usize) -> Result<Point> {
    if *pos + POINT_SIZE > data.len() {
        return Err(StoreError::CorruptBlob("truncated point".into()));
    }
    let mut coords = [0.0f64; 3];
    for c in &mut coords {
        let bytes: [u8; 8] = data[*pos..*pos + 8]
            .try_into()
            .map_err(|_| StoreError::CorruptBlob("truncated point".into()))?;
        *c = f64::from_le_bytes(bytes);
        *pos += 8;
    }
    Ok(Point(Vector {
        x: coords[0],
        y: coords[1],
        z: coords[2],
    }))
}

fn read_points(data: &[u8], pos: &mut usize, n: u64) -> Result<Vec<Point>> {
    if (n as usize).saturating_mul(POINT_SIZE) > data.len() - *pos {
        return Err(StoreError::CorruptBlob("point count exceeds body".into()));
    }
    let mut pts = Vec::with_capacity(n as usize);
    for _ in 0..n {
        pts.push(read_point(data, pos)?);
    }
    Ok(pts)
}

fn encode_shape_body(shape: &Shape) -> (u8, Vec<u8>) {
    match shape {
        Shape::Points(pts) => {
            let mut body = Vec::with_capacity(2 + pts.len() * POINT_SIZE);
            write_uvarint(&mut body, pts.len() as u64);
            for p in pts {
                write_point(&mut body, p);
            }
            (SHAPE_TYPE_POINTS, body)
        }
        Shape::Polyline(pts) => {
            let mut body = Vec::with_capacity(2 + pts.len() * POINT_SIZE);
            write_uvarint(&mut body, pts.len() as u64);
            for p in pts {
                write_point(&mut body, p);
            }
            (SHAPE_TYPE_POLYLINE, body)
        }
        Shape::Polygon(loops) => {
            let mut body = Vec::new();
            write_uvarint(&mut body, loops.len() as u64);
            for ring in loops {
                write_uvarint(&mut body, ring.len() as u64);
                for p in ring {
                    write_point(&mut body, p);
                }
            }
            (SHAPE_TYPE_POLYGON, body)
        }
    }
}

fn decode_shape_body(typ: u8, body: &[u8]) -> Result<Shape> {
    let mut pos = 0usize;
    let shape = match typ {
        SHAPE_TYPE_POINTS => {
            let n = read_uvarint(body, &mut pos)?;
            Shape::Points(read_points(body, &mut pos, n)?)
        }
        SHAPE_TYPE_POLYLINE => {
            let n = read_uvarint(body, &mut pos)?;
            Shape::Polyline(read_points(body, &mut pos, n)?)
        }
        SHAPE_TYPE_POLYGON => {
            let num_loops = read_uvarint(body, &mut pos)?;
            if num_loops > body.len() as u64 {
                return Err(StoreError::CorruptBlob("loop count exceeds body".into()));
            }
            let mut loops = Vec::with_capacity(num_loops as usize);
            for _ in 0..num_loops {
                let n = read_uvarint(body, &mut pos)?;
                loops.push(read_points(body, &mut pos, n)?);
            }
            Shape::Polygon(loops)
        }
        other => {
            return Err(StoreError::CorruptBlob(format!(
                "unknown shape type {}",
                other
            )))
        }
    };
    if pos != body.len() {
        return Err(StoreError::CorruptBlob("trailing bytes in shape".into()));
    }
    Ok(shape)
}

/// Encode a feature's properties and shapes into a blob, building and
/// appending the serialized shape index over the full shape list.
pub fn encode_entry(props: &[u8], shapes: &[Shape], opts: &CoveringOptions) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + props.len());
    write_uvarint(&mut buf, props.len() as u64);
    buf.extend_from_slice(props);
    write_uvarint(&mut buf, shapes.len() as u64);
    for shape in shapes {
        let (typ, body) = encode_shape_body(shape);
        buf.push(typ);
        write_uvarint(&mut buf, body.len() as u64);
        buf.extend_from_slice(&body);
    }
    let index = ShapeIndex::build(shapes, opts);
    index.encode(&mut buf);
    buf
}

#[derive(Debug, Clone, Copy)]
struct ShapeInfo {
    typ: u8,
    offset: usize,
    len: usize,
}

/// A decoded blob: owns the bytes, exposes the properties slice, the
/// reloaded shape index, and lazy shape materialization.
#[derive(Debug)]
pub struct DecodedEntry {
    blob: Vec<u8>,
    props: Range<usize>,
    shapes: Vec<ShapeInfo>,
    index: EncodedShapeIndex,
}

/// Factory view over the shape table, used while the entry itself is
/// still under construction.
struct LazyFactory<'a> {
    blob: &'a [u8],
    shapes: &'a [ShapeInfo],
}

impl ShapeFactory for LazyFactory<'_> {
    fn len(&self) -> usize {
        self.shapes.len()
    }

    fn shape(&self, id: usize) -> Result<Shape> {
        let info = self
            .shapes
            .get(id)
            .ok_or_else(|| StoreError::CorruptBlob(format!("no shape {}", id)))?;
        decode_shape_body(info.typ, &self.blob[info.offset..info.offset + info.len])
    }
}

impl DecodedEntry {
    /// Decode the headers of a blob. Shape bodies are only located,
    /// not parsed; the trailing index is reloaded over the table.
    pub fn decode(blob: Vec<u8>) -> Result<Self> {
        let mut pos = 0usize;

        let prop_len = read_uvarint(&blob, &mut pos)? as usize;
        if pos + prop_len > blob.len() {
            return Err(StoreError::CorruptBlob("truncated properties".into()));
        }
        let props = pos..pos + prop_len;
        pos += prop_len;

        let shape_count = read_uvarint(&blob, &mut pos)?;
        if shape_count > blob.len() as u64 {
            return Err(StoreError::CorruptBlob("shape count exceeds blob".into()));
        }
        let mut shapes = Vec::with_capacity(shape_count as usize);
        for _ in 0..shape_count {
            let Some(&typ) = blob.get(pos) else {
                return Err(StoreError::CorruptBlob("truncated shape header".into()));
            };
            pos += 1;
            let len = read_uvarint(&blob, &mut pos)? as usize;
            if pos + len > blob.len() {
                return Err(StoreError::CorruptBlob("truncated shape body".into()));
            }
            shapes.push(ShapeInfo {
                typ,
                offset: pos,
                len,
            });
            pos += len;
        }

        let factory = LazyFactory {
            blob: &blob,
            shapes: &shapes,
        };
        let index = EncodedShapeIndex::init(&blob[pos..], &factory)?;

        Ok(Self {
            blob,
            props,
            shapes,
            index,
        })
    }

    /// Serialized properties JSON.
    pub fn props(&self) -> &[u8] {
        &self.blob[self.props.clone()]
    }

    /// Number of shapes in the blob.
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// The reloaded shape index.
    pub fn index(&self) -> &EncodedShapeIndex {
        &self.index
    }
}

impl ShapeFactory for DecodedEntry {
    fn len(&self) -> usize {
        self.shapes.len()
    }

    fn shape(&self, id: usize) -> Result<Shape> {
        LazyFactory {
            blob: &self.blob,
            shapes: &self.shapes,
        }
        .shape(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{angle_between, point_from_degrees};

    #[test]
    fn test_uvarint_roundtrip() {
        let values = [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX];
        for v in values {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, v);
            let mut pos = 0;
            assert_eq!(read_uvarint(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_uvarint_overflow() {
        let mut buf = vec![0x80u8; 9];
        buf.push(0x02);
        let mut pos = 0;
        assert!(matches!(
            read_uvarint(&buf, &mut pos),
            Err(StoreError::CorruptBlob(_))
        ));
    }

    #[test]
    fn test_uvarint_truncated() {
        let buf = [0x80u8, 0x80];
        let mut pos = 0;
        assert!(matches!(
            read_uvarint(&buf, &mut pos),
            Err(StoreError::CorruptBlob(_))
        ));
    }

    fn sample_shapes() -> Vec<Shape> {
        vec![
            Shape::Points(vec![point_from_degrees(43.6426, -79.3871)]),
            Shape::Polyline(vec![
                point_from_degrees(43.64, -79.40),
                point_from_degrees(43.66, -79.37),
            ]),
            Shape::Polygon(vec![vec![
                point_from_degrees(43.64, -79.40),
                point_from_degrees(43.64, -79.37),
                point_from_degrees(43.66, -79.37),
                point_from_degrees(43.66, -79.40),
            ]]),
        ]
    }

    fn assert_congruent(a: &Shape, b: &Shape) {
        let (pa, pb): (Vec<_>, Vec<_>) = match (a, b) {
            (Shape::Points(x), Shape::Points(y)) => (x.clone(), y.clone()),
            (Shape::Polyline(x), Shape::Polyline(y)) => (x.clone(), y.clone()),
            (Shape::Polygon(x), Shape::Polygon(y)) => {
                assert_eq!(x.len(), y.len());
                (
                    x.iter().flatten().cloned().collect(),
                    y.iter().flatten().cloned().collect(),
                )
            }
            other => panic!("variant mismatch: {:?}", other),
        };
        assert_eq!(pa.len(), pb.len());
        for (x, y) in pa.iter().zip(&pb) {
            assert!(angle_between(x, y) < 1e-9);
        }
    }

    #[test]
    fn test_entry_roundtrip() {
        let opts = CoveringOptions::default();
        let props = br#"{"name":"cn_tower","type":"landmark"}"#;
        let shapes = sample_shapes();

        let blob = encode_entry(props, &shapes, &opts);
        let entry = DecodedEntry::decode(blob).unwrap();

        assert_eq!(entry.props(), props);
        assert_eq!(entry.shape_count(), shapes.len());
        assert!(!entry.index().cells().is_empty());

        for (i, original) in shapes.iter().enumerate() {
            let loaded = entry.shape(i).unwrap();
            assert_congruent(original, &loaded);
        }
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let opts = CoveringOptions::default();
        let blob = encode_entry(b"{}", &sample_shapes(), &opts);
        for cut in [1, blob.len() / 2, blob.len() - 1] {
            assert!(
                matches!(
                    DecodedEntry::decode(blob[..cut].to_vec()),
                    Err(StoreError::CorruptBlob(_))
                ),
                "cut at {} must fail",
                cut
            );
        }
    }

    #[test]
    fn test_unknown_shape_type_rejected() {
        // propLen 0, one shape of unknown type 9 with empty body,
        // empty index. The type byte is only checked when the shape
        // is materialized.
        let mut blob = Vec::new();
        write_uvarint(&mut blob, 0);
        write_uvarint(&mut blob, 1);
        blob.push(9);
        write_uvarint(&mut blob, 0);
        write_uvarint(&mut blob, 0); // empty index
        let entry = DecodedEntry::decode(blob).unwrap();
        assert!(matches!(
            entry.shape(0),
            Err(StoreError::CorruptBlob(_))
        ));
    }

    #[test]
    fn test_empty_props_roundtrip() {
        let opts = CoveringOptions::default();
        let blob = encode_entry(b"", &sample_shapes(), &opts);
        let entry = DecodedEntry::decode(blob).unwrap();
        assert!(entry.props().is_empty());
    }
}

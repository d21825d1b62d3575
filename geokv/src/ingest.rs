//! Parallel ingest pipeline: streaming decode → worker pool →
//! batched writer.
//!
//! Three stages joined by two bounded channels:
//!
//! ```text
//! decoder ──(raw feature bytes, cap 2·W)──► workers ×W
//! workers ──(prepared entries,  cap B)───► batch writer
//! ```
//!
//! The bounds give backpressure at both seams: the decoder cannot run
//! arbitrarily ahead of the CPU-bound workers, and the workers cannot
//! run arbitrarily ahead of the I/O-bound writer. Shutdown flows with
//! channel closure: the decoder drops its sender at end of input, the
//! workers drain and drop theirs, and the writer performs a final
//! flush once the result channel closes.
//!
//! Malformed features are logged and counted, never fatal; an I/O or
//! top-level parse failure in the source aborts the run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{GeoStore, IndexEntry};

/// Default writer buffer size.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Worker thread count. Defaults to the host CPU count.
    pub workers: usize,
    /// Entries per write transaction; the primary throughput knob.
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Host CPU count, the default worker pool size.
pub fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    /// Features committed to the store.
    pub written: u64,
    /// Malformed features dropped along the way.
    pub skipped: u64,
    /// Write transactions issued.
    pub batches: u64,
}

/// The `features` array of a FeatureCollection, each element kept as
/// its raw bytes so parsing happens in the workers.
#[derive(Deserialize)]
struct RawFeatureCollection<'a> {
    #[serde(borrow)]
    features: Vec<&'a RawValue>,
}

/// Derive a feature's id: the explicit `id` field when present, else
/// a stringifiable `properties.name`, else a fresh random UUID.
pub fn derive_id(feature: &geojson::Feature) -> String {
    if let Some(id) = &feature.id {
        return match id {
            geojson::feature::Id::String(s) => s.clone(),
            geojson::feature::Id::Number(n) => n.to_string(),
        };
    }
    if let Some(props) = &feature.properties {
        match props.get("name") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    Uuid::new_v4().to_string()
}

/// Parse one raw feature and prepare it. The single parse here feeds
/// both id derivation and geometry conversion.
fn prepare_raw(store: &GeoStore, raw: &[u8]) -> Result<IndexEntry> {
    let feature: geojson::Feature = serde_json::from_slice(raw)
        .map_err(|e| StoreError::InvalidGeoJson(e.to_string()))?;
    let id = derive_id(&feature);
    store.prepare(&id, &feature)
}

/// Run the parallel pipeline over a GeoJSON FeatureCollection file.
pub fn run(store: Arc<GeoStore>, input: &Path, opts: IngestOptions) -> Result<IngestReport> {
    let workers = opts.workers.max(1);
    let batch_size = opts.batch_size.max(1);

    let (job_tx, job_rx) = std::sync::mpsc::sync_channel::<Vec<u8>>(2 * workers);
    let (result_tx, result_rx) = std::sync::mpsc::sync_channel::<IndexEntry>(batch_size);
    let skipped = Arc::new(AtomicU64::new(0));

    info!(workers, batch_size, input = %input.display(), "starting ingest");

    let decoder = spawn_decoder(input.to_path_buf(), job_tx)?;

    // Workers pull jobs through a shared receiver; the lock is held
    // across one recv at a time.
    let job_rx = Arc::new(Mutex::new(job_rx));
    let mut worker_handles = Vec::with_capacity(workers);
    for i in 0..workers {
        worker_handles.push(spawn_worker(
            i,
            Arc::clone(&store),
            Arc::clone(&job_rx),
            result_tx.clone(),
            Arc::clone(&skipped),
        )?);
    }
    // The spawning thread's clones would otherwise keep both channels
    // open forever.
    drop(result_tx);
    drop(job_rx);

    let writer = spawn_writer(Arc::clone(&store), result_rx, batch_size)?;

    let decoded = decoder
        .join()
        .map_err(|_| StoreError::InvalidGeoJson("decoder thread panicked".into()))?;
    for handle in worker_handles {
        handle
            .join()
            .map_err(|_| StoreError::InvalidGeoJson("worker thread panicked".into()))?;
    }
    let written = writer
        .join()
        .map_err(|_| StoreError::Tx("writer thread panicked".into()))?;

    // Source-stream failures abort the run, but only after the
    // pipeline has drained whatever was decoded before the error.
    let decoded = decoded?;
    let (written, batches) = written?;

    let report = IngestReport {
        written,
        skipped: skipped.load(Ordering::Relaxed),
        batches,
    };
    info!(
        decoded,
        written = report.written,
        skipped = report.skipped,
        batches = report.batches,
        "ingest complete"
    );
    Ok(report)
}

fn spawn_decoder(
    input: PathBuf,
    job_tx: SyncSender<Vec<u8>>,
) -> Result<thread::JoinHandle<Result<u64>>> {
    thread::Builder::new()
        .name("geojson-decode".into())
        .spawn(move || {
            let text = std::fs::read_to_string(&input)?;
            let collection: RawFeatureCollection = serde_json::from_str(&text)
                .map_err(|e| StoreError::InvalidGeoJson(format!("not a FeatureCollection: {}", e)))?;
            let mut sent = 0u64;
            for raw in collection.features {
                // A send failure means every worker is gone; the
                // writer's error will surface the cause.
                if job_tx.send(raw.get().as_bytes().to_vec()).is_err() {
                    break;
                }
                sent += 1;
            }
            Ok(sent)
        })
        .map_err(StoreError::Io)
}

fn spawn_worker(
    index: usize,
    store: Arc<GeoStore>,
    job_rx: Arc<Mutex<Receiver<Vec<u8>>>>,
    result_tx: SyncSender<IndexEntry>,
    skipped: Arc<AtomicU64>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("prepare-{}", index))
        .spawn(move || loop {
            let job = match job_rx.lock() {
                Ok(rx) => rx.recv(),
                Err(_) => break,
            };
            let Ok(raw) = job else { break };
            match prepare_raw(&store, &raw) {
                Ok(entry) => {
                    if result_tx.send(entry).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "skipping malformed feature");
                }
            }
        })
        .map_err(StoreError::Io)
}

fn spawn_writer(
    store: Arc<GeoStore>,
    result_rx: Receiver<IndexEntry>,
    batch_size: usize,
) -> Result<thread::JoinHandle<Result<(u64, u64)>>> {
    thread::Builder::new()
        .name("batch-writer".into())
        .spawn(move || {
            let mut buffer: Vec<IndexEntry> = Vec::with_capacity(batch_size);
            let mut written = 0u64;
            let mut batches = 0u64;
            for entry in result_rx {
                buffer.push(entry);
                if buffer.len() >= batch_size {
                    store.write_batch(&buffer)?;
                    written += buffer.len() as u64;
                    batches += 1;
                    info!(written, "batch committed");
                    buffer.clear();
                }
            }
            if !buffer.is_empty() {
                store.write_batch(&buffer)?;
                written += buffer.len() as u64;
                batches += 1;
            }
            Ok((written, batches))
        })
        .map_err(StoreError::Io)
}

/// Single-threaded ingest: parse the whole collection, then prepare
/// and write features one at a time. Malformed features are skipped,
/// like the pipeline.
pub fn run_simple(store: &GeoStore, input: &Path) -> Result<IngestReport> {
    let text = std::fs::read_to_string(input)?;
    let collection: geojson::FeatureCollection = serde_json::from_str(&text)
        .map_err(|e| StoreError::InvalidGeoJson(format!("not a FeatureCollection: {}", e)))?;

    let mut report = IngestReport::default();
    for feature in &collection.features {
        let id = derive_id(feature);
        let entry = match store.prepare(&id, feature) {
            Ok(entry) => entry,
            Err(err) => {
                report.skipped += 1;
                warn!(id = %id, error = %err, "skipping malformed feature");
                continue;
            }
        };
        store.write_batch(std::slice::from_ref(&entry))?;
        report.written += 1;
        report.batches += 1;
    }
    info!(
        written = report.written,
        skipped = report.skipped,
        "simple ingest complete"
    );
    Ok(report)
}

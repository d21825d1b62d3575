use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use geokv::{GeoStore, IngestOptions};

#[derive(Parser)]
#[command(name = "geokv", about = "Embedded geospatial key-value store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a GeoJSON FeatureCollection through the parallel ingest
    /// pipeline.
    Ingest {
        /// Input GeoJSON file.
        #[arg(long)]
        input: PathBuf,

        /// Database path.
        #[arg(long)]
        db: PathBuf,

        /// Worker thread count.
        #[arg(long, default_value_t = geokv::ingest::default_workers())]
        workers: usize,

        /// Features per write transaction.
        #[arg(long, default_value_t = geokv::ingest::DEFAULT_BATCH_SIZE)]
        batch: usize,
    },

    /// Ingest a FeatureCollection one feature at a time.
    IngestSimple {
        /// Input GeoJSON file.
        #[arg(long)]
        input: PathBuf,

        /// Database path.
        #[arg(long)]
        db: PathBuf,
    },

    /// Find all features within a radius of a position.
    Query {
        /// Database path.
        #[arg(long)]
        db: PathBuf,

        /// Latitude in degrees.
        #[arg(long)]
        lat: f64,

        /// Longitude in degrees.
        #[arg(long)]
        lng: f64,

        /// Search radius in meters.
        #[arg(long, default_value_t = 5000.0)]
        radius: f64,

        /// Include geometry in results.
        #[arg(long)]
        geom: bool,
    },

    /// Rewrite a database into a freshly packed copy.
    Compact {
        /// Source database path.
        #[arg(long)]
        src: PathBuf,

        /// Destination database path.
        #[arg(long)]
        dst: PathBuf,
    },
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geokv=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact());
    let _ = tracing::dispatcher::set_global_default(tracing::Dispatch::new(subscriber));
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Ingest {
            input,
            db,
            workers,
            batch,
        } => run_ingest(&input, &db, workers, batch),
        Command::IngestSimple { input, db } => run_ingest_simple(&input, &db),
        Command::Query {
            db,
            lat,
            lng,
            radius,
            geom,
        } => run_query(&db, lat, lng, radius, geom),
        Command::Compact { src, dst } => {
            geokv::compact(&src, &dst).context("compaction failed")?;
            Ok(())
        }
    }
}

fn run_ingest(input: &PathBuf, db: &PathBuf, workers: usize, batch: usize) -> anyhow::Result<()> {
    let store = Arc::new(GeoStore::open(db).with_context(|| format!("open {}", db.display()))?);
    let start = Instant::now();
    let report = geokv::ingest::run(
        Arc::clone(&store),
        input,
        IngestOptions {
            workers,
            batch_size: batch,
        },
    )
    .with_context(|| format!("ingest {}", input.display()))?;
    store.flush()?;
    println!(
        "Done. {} indexed, {} skipped in {:.1?}.",
        report.written,
        report.skipped,
        start.elapsed()
    );
    Ok(())
}

fn run_ingest_simple(input: &PathBuf, db: &PathBuf) -> anyhow::Result<()> {
    let store = GeoStore::open(db).with_context(|| format!("open {}", db.display()))?;
    let report = geokv::ingest::run_simple(&store, input)
        .with_context(|| format!("ingest {}", input.display()))?;
    store.flush()?;
    println!("Done. {} indexed, {} skipped.", report.written, report.skipped);
    Ok(())
}

fn run_query(db: &PathBuf, lat: f64, lng: f64, radius: f64, with_geom: bool) -> anyhow::Result<()> {
    let store = GeoStore::open(db).with_context(|| format!("open {}", db.display()))?;

    println!("Searching within {:.0}m of ({}, {})...", radius, lat, lng);
    let start = Instant::now();
    let results = store
        .find_closest(lat, lng, radius, with_geom)
        .context("query failed")?;
    let elapsed = start.elapsed();
    info!(results = results.len(), ?elapsed, "query finished");

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results in {:.1?}:", results.len(), elapsed);
    let mut header = format!("{:<36} | {:<10} | Properties", "ID", "Distance");
    if with_geom {
        header.push_str(" | Geometry");
    }
    println!("{}", header);
    println!("{}", "-".repeat(header.len() + 20));

    for item in &results {
        let props = serde_json::to_string(&item.properties)?;
        let mut line = format!(
            "{:<36} | {:<8.1}m | {}",
            item.id, item.distance_meters, props
        );
        if let Some(geom) = &item.geometry {
            let value = geojson::Geometry::new(geojson::Value::from(geom));
            line.push_str(&format!(" | {}", serde_json::to_string(&value)?));
        }
        println!("{}", line);
    }
    Ok(())
}

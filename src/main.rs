use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, TransactionTrait};

use roadsnap::config::RunConfig;
use roadsnap::debug::{DrawingSink, HttpDrawingSink, NoopDrawingSink, matches_to_geojson};
use roadsnap::ingest::NetworkImporter;
use roadsnap::intersection_processor::{SegmentArena, segment_ways};
use roadsnap::io::read_track_file;
use roadsnap::mapmatcher::MapMatcher;
use roadsnap::network_cleaner::clean;
use roadsnap::osm_model::RoadNetwork;
use roadsnap::osm_preprocessing::OsmProcessor;
use roadsnap::store::{MemoryStore, PostgisStore, SpatialStore};

/// Imports OpenStreetMap roads into PostGIS and snaps GPS tracks onto them
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct App {
    /// JSON run configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    op: Operation,
}

#[derive(Subcommand)]
enum Operation {
    /// Read a PBF extract, clean and segment its roads, and persist them
    Import {
        #[arg(long)]
        pbf: PathBuf,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Match a track of `lng lat` lines against previously imported segments
    Match {
        #[arg(long)]
        track: PathBuf,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Send fixes and matched segments to the map viewer
        #[arg(long)]
        draw: bool,
        /// Write the matched path as GeoJSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import and match in one go against an in-memory store
    Run {
        #[arg(long)]
        pbf: PathBuf,
        #[arg(long)]
        track: PathBuf,
        #[arg(long)]
        draw: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();

    env_logger::builder()
        .filter_level(if app.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let config = RunConfig::load(app.config.as_deref())?;

    match app.op {
        Operation::Import { pbf, database_url } => {
            let (network, arena) = prepare_network(&pbf, &config)?;

            let db = Database::connect(database_url.as_str()).await?;
            Migrator::up(&db, None).await?;

            let txn = db.begin().await?;
            let store = PostgisStore::new(&txn);
            let report = NetworkImporter::new(&store)
                .with_batch_size(config.import.batch_size)
                .with_progress(config.import.show_progress)
                .import(&network, &arena)
                .await?;
            txn.commit().await?;
            report.log();
        }
        Operation::Match {
            track,
            database_url,
            draw,
            output,
        } => {
            let db = Database::connect(database_url.as_str()).await?;
            let store = PostgisStore::new(&db);
            match_track(&store, &track, &config, draw, output.as_deref()).await?;
        }
        Operation::Run {
            pbf,
            track,
            draw,
            output,
        } => {
            let (network, arena) = prepare_network(&pbf, &config)?;
            let store = MemoryStore::new();
            NetworkImporter::new(&store)
                .with_batch_size(config.import.batch_size)
                .with_progress(config.import.show_progress)
                .import(&network, &arena)
                .await?
                .log();
            match_track(&store, &track, &config, draw, output.as_deref()).await?;
        }
    }

    Ok(())
}

/// Reads, cleans and segments the road network of a PBF extract.
fn prepare_network(pbf: &Path, config: &RunConfig) -> Result<(RoadNetwork, SegmentArena)> {
    let network = OsmProcessor::new()
        .with_highway_filter(config.import.highway_filter.clone())
        .with_progress(config.import.show_progress)
        .read_pbf(pbf)?;
    let (network, _) = clean(network);
    let (arena, _) = segment_ways(&network.ways)?;
    Ok((network, arena))
}

async fn match_track<S: SpatialStore + ?Sized>(
    store: &S,
    track: &Path,
    config: &RunConfig,
    draw: bool,
    output: Option<&Path>,
) -> Result<()> {
    let points = read_track_file(track)?;
    info!("Loaded {} fixes from {}", points.len(), track.display());

    if store.segment_count().await? == 0 {
        warn!("Store holds no segments, every fix will lack a candidate");
    }

    let sink: Box<dyn DrawingSink> = if draw {
        Box::new(HttpDrawingSink::new(&config.draw.endpoint)?)
    } else {
        Box::new(NoopDrawingSink)
    };

    let matcher = MapMatcher::new(store, sink.as_ref(), config.matching.clone());
    let outcome = matcher.match_track(&points).await?;
    outcome.log();

    let geojson = matches_to_geojson(store, &outcome.matches).await?;
    let text = serde_json::to_string_pretty(&geojson)?;
    match output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(text.as_bytes())?;
            info!("Matched path written to {}", path.display());
        }
        None => println!("{text}"),
    }

    Ok(())
}

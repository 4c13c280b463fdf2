use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use permit_pipeline::app::ports::{FeedSourcePort, PolygonSourcePort};
use permit_pipeline::app::run_pipeline_use_case::RunPipelineUseCase;
use permit_pipeline::config::Config;
use permit_pipeline::constants::DEFAULT_CONFIG_PATH;
use permit_pipeline::domain::SourceId;
use permit_pipeline::infra::{FileInputAdapter, FileSnapshotAdapter};
use permit_pipeline::logging;
use permit_pipeline::observability;
use permit_pipeline::pipeline::pipeline_config::CollisionPolicy;
use permit_pipeline::pipeline::processing::normalize::NormalizationRegistry;
use permit_pipeline::pipeline::processing::spatial::DistrictCatalog;
use permit_pipeline::pipeline::PipelineOrchestrator;

#[derive(Parser)]
#[command(name = "permit_pipeline")]
#[command(about = "Reconcile NYC building-permit feeds into monthly per-district series")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (defaults to $PERMITS_CONFIG, then permits.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run normalize, dedup, spatial attribution and aggregation, then commit snapshots
    Run {
        /// Collision policy: drop, tag or prefer_historical
        #[arg(long)]
        collision_policy: Option<CollisionPolicy>,
        /// Minimum total permits for a district to enter the modeling table
        #[arg(long)]
        min_total: Option<u64>,
        /// Snapshot root directory
        #[arg(long)]
        output_dir: Option<String>,
        /// Normalize sources and attribute batches on worker threads
        #[arg(long)]
        parallel: bool,
    },
    /// Normalize both feeds and print the per-source report
    Normalize,
    /// Load the district polygons and print what they cover
    Districts,
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = explicit.or_else(|| std::env::var("PERMITS_CONFIG").ok().map(PathBuf::from));
    match path {
        Some(path) => Ok(Config::load(&path)?),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok(Config::load(DEFAULT_CONFIG_PATH)?),
        None => {
            info!("No configuration file found, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run(config: Config, metrics: &metrics_exporter_prometheus::PrometheusHandle) -> Result<()> {
    let output_dir = PathBuf::from(&config.output.dir);

    let orchestrator = PipelineOrchestrator::new(config.pipeline.clone())?;
    let use_case = RunPipelineUseCase::new(
        orchestrator,
        Box::new(FileInputAdapter::from_config(&config.inputs)),
        Box::new(FileInputAdapter::from_config(&config.inputs)),
        Box::new(FileSnapshotAdapter::new(&output_dir)),
    );

    let result = use_case.execute().await;

    // Written even when the run fails so error counters are visible
    let metrics_path = output_dir.join("metrics.prom");
    if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
        warn!("Failed to create {}: {}", output_dir.display(), e);
    } else if let Err(e) = tokio::fs::write(&metrics_path, metrics.render()).await {
        warn!("Failed to write {}: {}", metrics_path.display(), e);
    }

    let outcome = result?;
    let coverage = &outcome.run.coverage;

    println!("\n📊 Run {}", outcome.run.run_id);
    for report in &coverage.normalize {
        println!(
            "   {}: {} rows, {} normalized, {} rejected, {} without coordinates",
            report.source_id, report.rows_in, report.normalized, report.rejected, report.missing_geolocation
        );
    }
    println!(
        "   Collisions: {} ({} inside overlap window), {} dropped, {} tagged",
        coverage.dedup.collisions, coverage.dedup.collisions_in_window, coverage.dedup.dropped, coverage.dedup.tagged
    );
    println!(
        "   Attribution: {} valid, {} invalid, {} unknown, {} dropped by policy",
        coverage.spatial.valid, coverage.spatial.invalid, coverage.spatial.unknown, coverage.spatial.dropped_by_policy
    );
    for (code, count) in coverage.spatial.top_invalid_codes(5) {
        println!("     invalid code {}: {}", code, count);
    }
    println!(
        "   Modeling table: {} points across {} districts ({} excluded below {} permits)",
        outcome.run.series.modeling.len(),
        coverage.aggregate.included.len(),
        coverage.aggregate.excluded.len(),
        coverage.aggregate.min_total_permits
    );
    println!("   Snapshots: {}", outcome.manifest.path.display());
    Ok(())
}

async fn normalize(config: Config) -> Result<()> {
    let input = FileInputAdapter::from_config(&config.inputs);
    let mut feeds = Vec::new();
    for source_id in SourceId::all() {
        feeds.push(input.load_feed(source_id).await?);
    }

    let registry = NormalizationRegistry::new();
    let normalized = registry.normalize_all(
        &feeds,
        config.pipeline.normalize.schema_error_policy,
        config.pipeline.parallel_execution,
    )?;

    for feed in &normalized {
        let report = &feed.report;
        println!(
            "{} ({}): {} rows, {} normalized, {} rejected, {} without coordinates",
            report.source_id,
            report.source_id.dataset_id(),
            report.rows_in,
            report.normalized,
            report.rejected,
            report.missing_geolocation
        );
        for (kind, count) in &report.rejected_by_kind {
            println!("   {}: {}", kind, count);
        }
    }
    Ok(())
}

async fn districts(config: Config) -> Result<()> {
    let input = FileInputAdapter::from_config(&config.inputs);
    let districts = input.load_districts(&config.pipeline.spatial).await?;
    let catalog = match &config.pipeline.spatial.valid_codes {
        Some(codes) => DistrictCatalog::from_codes(codes.iter().copied()),
        None => DistrictCatalog::nyc(),
    };

    let codes = districts.codes();
    let outside: Vec<String> = codes
        .iter()
        .filter(|c| !catalog.is_valid(**c))
        .map(|c| c.to_string())
        .collect();
    let missing: Vec<String> = catalog
        .codes()
        .filter(|c| !codes.contains(c))
        .map(|c| c.to_string())
        .collect();

    println!(
        "{} polygons, {} distinct codes, source CRS {}",
        districts.len(),
        codes.len(),
        districts.source_crs()
    );
    println!("Codes outside the valid enumeration: {}", outside.join(", "));
    println!("Valid codes without a polygon: {}", missing.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = load_config(cli.config).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            collision_policy,
            min_total,
            output_dir,
            parallel,
        } => {
            if let Some(policy) = collision_policy {
                config.pipeline.dedup.policy = policy;
            }
            if let Some(min_total) = min_total {
                config.pipeline.aggregate.min_total_permits = min_total;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if parallel {
                config.pipeline.parallel_execution = true;
            }

            let handle = observability::init()?;
            println!("🚀 Running permit pipeline...");
            run(config, &handle).await?;
        }
        Commands::Normalize => normalize(config).await?,
        Commands::Districts => districts(config).await?,
    }
    Ok(())
}

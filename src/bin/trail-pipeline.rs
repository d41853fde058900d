//! trail-pipeline CLI - batch processing of stored trail tracks
//!
//! Usage:
//!   trail-pipeline import <db> <sources.json> [--config <file>]
//!   trail-pipeline process <db> [--config <file>] [--api-key <key>] [--trail <id>]...
//!                          [--dry-run] [--strategy roundtrip|linear] [--report <file>]
//!   trail-pipeline analyze <db> [--config <file>] [--trail <id>]...

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use trail_pipeline::{
    BatchOptions, BatchReport, Pipeline, PipelineConfig, PlaceSearchConfig, RepairStrategy,
    RoadProximityResolver, TrailSource, TrailStore,
};

#[derive(Parser)]
#[command(name = "trail-pipeline")]
#[command(about = "Clean, repair and classify recorded hiking-trail tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or replace trail records from parsed sources
    Import {
        /// SQLite database
        db: PathBuf,

        /// JSON array of parsed trail sources
        sources: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run the full pipeline and write back changed records
    Process {
        /// SQLite database
        db: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Place search API key (enables the remote road-proximity fallback)
        #[arg(long, env = "PLACE_SEARCH_API_KEY")]
        api_key: Option<String>,

        /// Only process these trail ids
        #[arg(short, long = "trail")]
        trails: Vec<String>,

        /// Compute everything, write nothing
        #[arg(long)]
        dry_run: bool,

        /// Gap repair strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Write the JSON report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Gap analysis of stored paths, nothing is written
    Analyze {
        /// SQLite database
        db: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only analyze these trail ids
        #[arg(short, long = "trail")]
        trails: Vec<String>,

        /// Write the JSON report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Roundtrip,
    Linear,
}

impl From<StrategyArg> for RepairStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Roundtrip => RepairStrategy::RoundTrip,
            StrategyArg::Linear => RepairStrategy::Linear,
        }
    }
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            db,
            sources,
            config,
        } => run_import(&db, &sources, config.as_deref()),
        Commands::Process {
            db,
            config,
            api_key,
            trails,
            dry_run,
            strategy,
            report,
        } => {
            let options = BatchOptions {
                dry_run,
                only_ids: trails,
            };
            run_process(
                &db,
                config.as_deref(),
                api_key,
                strategy,
                &options,
                report.as_deref(),
            )
        }
        Commands::Analyze {
            db,
            config,
            trails,
            report,
        } => {
            let options = BatchOptions {
                dry_run: true,
                only_ids: trails,
            };
            run_analyze(&db, config.as_deref(), &options, report.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> trail_pipeline::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_import(db: &Path, sources: &Path, config: Option<&Path>) -> trail_pipeline::Result<()> {
    let config = load_config(config)?;
    let text = fs::read_to_string(sources)?;
    let sources: Vec<TrailSource> = serde_json::from_str(&text)?;

    let mut store = TrailStore::new(db)?;
    let imported = store.import_sources(&sources, &config)?;
    println!(
        "Imported {} of {} trails into {}",
        imported,
        sources.len(),
        db.display()
    );
    print_store_stats(&store)
}

fn run_process(
    db: &Path,
    config: Option<&Path>,
    api_key: Option<String>,
    strategy: Option<StrategyArg>,
    options: &BatchOptions,
    report_path: Option<&Path>,
) -> trail_pipeline::Result<()> {
    let mut config = load_config(config)?;
    if let Some(strategy) = strategy {
        config.repair_strategy = strategy.into();
    }
    if let Some(key) = api_key {
        config
            .place_search
            .get_or_insert_with(PlaceSearchConfig::default)
            .api_key = key;
    }

    let pipeline = Pipeline::from_config(config)?;
    let mut store = TrailStore::new(db)?;
    let report = pipeline.run(&mut store, options)?;
    emit_report(&report, report_path)?;
    print_store_stats(&store)
}

fn print_store_stats(store: &TrailStore) -> trail_pipeline::Result<()> {
    let stats = store.stats()?;
    println!(
        "Store: {} trails ({} classified), {} waypoints",
        stats.trail_count, stats.classified_count, stats.waypoint_count
    );
    Ok(())
}

fn run_analyze(
    db: &Path,
    config: Option<&Path>,
    options: &BatchOptions,
    report_path: Option<&Path>,
) -> trail_pipeline::Result<()> {
    let config = load_config(config)?;
    // Gap analysis never resolves endpoints
    let resolver =
        RoadProximityResolver::new(config.road_radius_m, config.road_access_categories.clone());
    let pipeline = Pipeline::new(config, resolver)?;
    let store = TrailStore::new(db)?;
    let report = pipeline.analyze(&store, options)?;
    emit_report(&report, report_path)
}

fn emit_report(report: &BatchReport, path: Option<&Path>) -> trail_pipeline::Result<()> {
    print!("{}", report);
    if let Some(path) = path {
        fs::write(path, report.to_json()?)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

//! canopy-monitor CLI
//!
//! Lists units, builds catalogs, measures growth and shows image pairs from
//! the configured object store.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};

use canopy_monitor::config::{Backend, Config};
use canopy_monitor::growth::{self, ChartStyle};
use canopy_monitor::presentation::{self, SessionContext};
use canopy_monitor::segment::{self, SegmentationResult};
use canopy_monitor::{build_catalog, list_units, UnitId};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "canopy-monitor")]
#[command(about = "Track canopy growth from timestamped grow-unit photographs")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/canopy-monitor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a local directory mirror of the bucket instead of the configured store
    #[arg(long, global = true)]
    local_root: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the units present in the store
    Units,

    /// Show the catalog of a unit, newest first
    Catalog {
        /// Unit identifier (folder name under images/)
        unit: String,
    },

    /// Measure green area over time for a unit
    Growth(GrowthArgs),

    /// Show the original/processed pair taken at a date and time
    View(ViewArgs),

    /// Segment a local image file
    Segment(SegmentArgs),
}

#[derive(Debug, Clone, Args)]
struct GrowthArgs {
    /// Unit identifier
    unit: String,

    /// Write the trend chart (SVG)
    #[arg(long)]
    chart: Option<PathBuf>,

    /// Write the series as CSV
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ViewArgs {
    /// Unit identifier
    unit: String,

    /// Day to show (YYYY-MM-DD), newest day when omitted or unavailable
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,

    /// Capture time (HH:MM:SS), latest of the day when omitted or unavailable
    #[arg(long, value_parser = parse_time)]
    time: Option<NaiveTime>,

    /// Segment the original and write mask + contour image to this directory
    #[arg(long)]
    segment_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SegmentArgs {
    /// Image file (png/jpg/jpeg)
    image: PathBuf,

    /// Write the vegetation mask
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Write the input with contours drawn on it
    #[arg(long)]
    contours: Option<PathBuf>,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("{} (expected YYYY-MM-DD)", e))
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S").map_err(|e| format!("{} (expected HH:MM:SS)", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.local_root {
        config.store.backend = Backend::Local;
        config.store.local.root = root;
    }

    match cli.command {
        Commands::Units => run_units(&config).await,
        Commands::Catalog { unit } => run_catalog(&config, &UnitId::new(unit)).await,
        Commands::Growth(args) => run_growth(&config, &args).await,
        Commands::View(args) => run_view(&config, &args).await,
        Commands::Segment(args) => run_segment(&config, &args),
    }
}

async fn run_units(config: &Config) -> CliResult<()> {
    let store = config.open_store()?;
    for unit in list_units(&store).await? {
        println!("{}", unit);
    }
    Ok(())
}

async fn run_catalog(config: &Config, unit: &UnitId) -> CliResult<()> {
    let store = config.open_store()?;
    let catalog = build_catalog(&store, unit, &config.classification).await?;

    for record in catalog.records() {
        println!(
            "{}  {:<9}  {}",
            record.captured_at.format("%Y-%m-%d %H:%M:%S"),
            record.kind,
            record.key
        );
    }

    let stats = catalog.stats();
    println!(
        "{} record(s); {} listed, {} not images, {} unclassified, {} without timestamp, {} duplicates",
        catalog.len(),
        stats.listed,
        stats.unsupported_extension,
        stats.unclassified,
        stats.unparseable,
        stats.duplicates
    );
    Ok(())
}

async fn run_growth(config: &Config, args: &GrowthArgs) -> CliResult<()> {
    let store = Arc::new(config.open_store()?);
    let unit = UnitId::new(args.unit.clone());
    let catalog = build_catalog(store.as_ref(), &unit, &config.classification).await?;

    let series = growth::aggregate_growth(
        Arc::clone(&store),
        &catalog,
        &config.aggregation,
        &config.segmentation,
    )
    .await;

    for m in &series.measurements {
        println!(
            "{}  {}",
            m.captured_at.format("%Y-%m-%d %H:%M:%S"),
            m.green_pixel_count
        );
    }
    for skipped in &series.skipped {
        println!("skipped {}: {}", skipped.key, skipped.reason);
    }

    if let Some(path) = &args.csv {
        series.write_csv(path)?;
        tracing::info!("💾 Series saved to {}", path.display());
    }
    if let Some(path) = &args.chart {
        growth::render_growth_chart(&series.measurements, path, &ChartStyle::default())?;
    }
    Ok(())
}

async fn run_view(config: &Config, args: &ViewArgs) -> CliResult<()> {
    let store = config.open_store()?;
    let unit = UnitId::new(args.unit.clone());
    let catalog = build_catalog(&store, &unit, &config.classification).await?;

    let mut session = SessionContext::new();
    session.select_unit(unit.clone());
    if let Some(date) = args.date {
        session.select_date(date);
    }
    if let Some(time) = args.time {
        session.select_time(time);
    }
    session.reconcile(&catalog);

    let (Some(date), Some(time)) = (session.date, session.time) else {
        println!("No images for unit {}", unit);
        return Ok(());
    };
    if args.date.is_some_and(|d| d != date) || args.time.is_some_and(|t| t != time) {
        tracing::warn!("⚠️  Requested date/time not available, showing {} {}", date, time);
    }

    println!("Unit {}: {} {}", unit, date, time);
    println!(
        "Times that day: {}",
        presentation::available_times(&catalog, date)
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let Some(pair) = presentation::find_pair(&catalog, date, time) else {
        println!("No image at that time");
        return Ok(());
    };

    let resolved = presentation::resolve_pair(&store, &pair, config.aggregation.url_expiry())?;
    match &resolved.original {
        Some((record, url)) => println!("original:  {}\n           {}", record.key, url),
        None => println!("original:  none"),
    }
    match &resolved.processed {
        Some((record, url)) => println!("processed: {}\n           {}", record.key, url),
        None => println!("processed: none"),
    }

    if let Some(dir) = &args.segment_out {
        let result = presentation::segment_original(
            &store,
            &pair,
            &config.segmentation,
            config.aggregation.url_expiry(),
            config.aggregation.fetch_timeout(),
        )
        .await?;
        match result {
            Some(result) => {
                let stem = format!("{}_{}", date, time.format("%H-%M-%S"));
                save_result(&result, dir, &stem)?;
                println!("green pixels: {}", result.green_pixel_count);
            }
            None => println!("No original image to segment"),
        }
    }
    Ok(())
}

fn run_segment(config: &Config, args: &SegmentArgs) -> CliResult<()> {
    let image = image::open(&args.image)?;
    let result = segment::segment(&image, &config.segmentation);

    println!(
        "{}: {} green pixels in {} contour(s)",
        args.image.display(),
        result.green_pixel_count,
        result.contour_count
    );

    if let Some(path) = &args.mask {
        result.mask.save(path)?;
        tracing::info!("💾 Mask saved to {}", path.display());
    }
    if let Some(path) = &args.contours {
        result.contour_image.save(path)?;
        tracing::info!("💾 Contour image saved to {}", path.display());
    }
    Ok(())
}

/// Write `<stem>_mask.png` and `<stem>_contours.png` into `dir`
fn save_result(result: &SegmentationResult, dir: &Path, stem: &str) -> CliResult<()> {
    std::fs::create_dir_all(dir)?;
    let mask_path = dir.join(format!("{}_mask.png", stem));
    let contour_path = dir.join(format!("{}_contours.png", stem));
    result.mask.save(&mask_path)?;
    result.contour_image.save(&contour_path)?;
    tracing::info!(
        "💾 Saved {} and {}",
        mask_path.display(),
        contour_path.display()
    );
    Ok(())
}

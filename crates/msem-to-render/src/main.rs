//! msem-to-render - import multi-SEM wafer scans into render
//!
//! Reads the wafer's acquisition log, lays out every slab's MFOVs on a shared
//! grid and saves one render stack per slab with one layer per scan.
//!
//! Usage:
//!   msem-to-render --render-host HOST --render-owner OWNER \
//!       --path-xlog wafer_60.json --wafer-id 60 [--import-magc-slab 399 ...]

use anyhow::{bail, Context, Result};
use clap::Parser;
use msem_core::{
    import_slab_stacks_for_wafer, ImportError, ImportOptions, ImportReport, JsonAcquisitionLog,
    SkipReason, DEFAULT_SLABS_PER_PROJECT,
};
use render_client::{RenderEndpoint, RenderWebServiceClient};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{default_config_path, load_config, Config};

#[derive(Parser, Debug)]
#[command(name = "msem-to-render")]
#[command(about = "Parse wafer metadata and save to render", version)]
struct Args {
    /// Render web services host (e.g. em-services-1.int.janelia.org:8080)
    #[arg(long)]
    render_host: String,

    /// Owner for all created render stacks
    #[arg(long)]
    render_owner: String,

    /// Path of the wafer xlog
    #[arg(long)]
    path_xlog: PathBuf,

    /// Wafer identifier, e.g. 60 or B13
    #[arg(long)]
    wafer_id: String,

    /// Only import these magc slabs (default: all slabs)
    #[arg(long, value_name = "MAGC_ID", num_args = 1..)]
    import_magc_slab: Vec<u32>,

    /// Only import these scans; exclusions are ignored when given
    #[arg(long, value_name = "SCAN", num_args = 1..)]
    include_scan: Vec<u32>,

    /// Do not import these scans
    #[arg(long, value_name = "SCAN", num_args = 1..)]
    exclude_scan: Vec<u32>,

    /// Number of slabs to group together into one render project
    #[arg(long, default_value_t = DEFAULT_SLABS_PER_PROJECT)]
    number_of_slabs_per_render_project: u32,

    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Import the slabs of each project concurrently
    #[arg(long)]
    parallel_slabs: bool,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

fn build_import_options(args: &Args, config: &Config) -> Result<ImportOptions> {
    let scan_fit = config
        .scan_fit_for_wafer(&args.wafer_id)
        .ok_or_else(|| ImportError::MissingScanFit(args.wafer_id.clone()))?;

    let margin = config.tile_margin();
    if margin < 0 {
        bail!("tile margin must not be negative, got {margin}");
    }

    let mut options = ImportOptions::new(args.wafer_id.clone(), scan_fit);
    options.import_magc_slabs = args.import_magc_slab.iter().copied().collect();
    options.include_scans = args.include_scan.iter().copied().collect();
    options.exclude_scans = args.exclude_scan.iter().copied().collect();
    options.number_of_slabs_per_render_project = args.number_of_slabs_per_render_project;
    options.layout = config.layout_parameters();
    options.margin = margin;
    options.resolution = config.stack_resolution();
    options.derive_data = config.derive_data();
    options.parallel_slabs = args.parallel_slabs;
    Ok(options)
}

/// Log filter from `RUST_LOG` directives, falling back to info (debug when verbose).
fn env_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

fn print_summary(report: &ImportReport) {
    for stack in &report.stacks {
        let status = if stack.completed { "complete" } else { "untouched" };
        println!(
            "{} (magc {}): {} tiles, {}",
            stack.stack,
            stack.magc_id,
            stack.tile_count(),
            status
        );
        for scan in &stack.imported {
            println!("  scan {:3} -> z {:3}  {} tiles", scan.scan, scan.z, scan.tile_count);
        }
        for skipped in &stack.skipped {
            match &skipped.reason {
                SkipReason::MissingImage(path) => {
                    println!("  scan {:3} skipped: missing {}", skipped.scan, path.display())
                }
                SkipReason::NoTiles => println!("  scan {:3} skipped: no tiles", skipped.scan),
            }
        }
        if !stack.missing_includes.is_empty() {
            println!("  requested scans not found: {:?}", stack.missing_includes);
        }
    }
    println!(
        "imported {} tiles into {} stacks",
        report.tile_count(),
        report.stacks.len()
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(rust_log.as_deref(), args.verbose))
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(&config_path)?;
    let options = build_import_options(&args, &config)?;

    let log = JsonAcquisitionLog::open(&args.path_xlog)
        .with_context(|| format!("Failed to load xlog {}", args.path_xlog.display()))?
        .with_path_rewrites(config.path_rewrites());

    let endpoint = RenderEndpoint::new(args.render_host.clone(), args.render_owner.clone())
        .with_port(Some(config.render_port()));
    let client = RenderWebServiceClient::new(endpoint, config.request_timeout());
    info!("saving to render at {}", client.endpoint().base_url());

    let report = import_slab_stacks_for_wafer(&log, &client, &options)
        .with_context(|| format!("Failed to import wafer {}", args.wafer_id))?;
    print_summary(&report);

    Ok(())
}

//! Retrieve light curves for a target list from every configured archive
//! and write the merged store to disk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rusty_lightcurves::RunConfig;
use rusty_lightcurves::data::loader;

#[derive(Parser, Debug)]
#[command(name = "lc-fetch", version, about = "Fetch and merge light curves from several archives")]
struct Args {
    /// TOML run configuration.
    #[arg(short, long, default_value = "lightcurves.toml")]
    config: PathBuf,

    /// Target list (.csv or .json); overrides `targets` in the config.
    #[arg(short, long)]
    targets: Option<PathBuf>,

    /// Output store (.parquet, .csv or .json); overrides `output`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only run these adapters (comma separated names).
    #[arg(short, long, value_delimiter = ',')]
    adapters: Vec<String>,

    /// Merge into the existing output store instead of replacing it.
    #[arg(long)]
    append: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RunConfig::from_file(&args.config)?;
    if !args.adapters.is_empty() {
        config.select(&args.adapters)?;
    }
    let Some(targets_path) = args.targets.or_else(|| config.targets.clone()) else {
        bail!("no target list given (use --targets or set `targets` in the config)");
    };
    let output = args.output.unwrap_or_else(|| config.output.clone());

    let targets = loader::load_targets(&targets_path)
        .with_context(|| format!("loading targets from {}", targets_path.display()))?;
    log::info!("{} targets from {}", targets.len(), targets_path.display());

    let scheduler = config.build_scheduler()?;
    let report = scheduler.run(Arc::new(targets))?;
    report.log_summary();
    let all_failed = report.all_failed();

    let mut store = report.store;
    if args.append && output.exists() {
        let mut previous = loader::load_file(&output)
            .with_context(|| format!("loading existing store {}", output.display()))?;
        previous.merge_store(store);
        store = previous;
    }
    loader::save_file(&store, &output)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!("wrote {} points to {}", store.len(), output.display());

    if all_failed {
        bail!("every job failed");
    }
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mdstore::{Dimension, Event, EventWorkspace, InMemoryDiskBackend, WorkspaceConfig, MAX_DIMENSIONS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and generate mdstore snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fill a workspace with uniform random events and save it.
    Generate {
        #[arg(long, default_value_t = 2)]
        nd: usize,
        #[arg(long, default_value_t = 100_000)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Upper bound of every axis; axes span `[0, size)`.
        #[arg(long, default_value_t = 1.0)]
        size: f64,
        /// TOML file with workspace settings.
        #[arg(long)]
        config: Option<PathBuf>,
        output: PathBuf,
    },
    /// Print tree statistics of a snapshot without loading its events.
    Info { path: PathBuf },
    /// Load every event of a snapshot and check the tree invariants.
    Verify { path: PathBuf },
}

const AXIS_NAMES: [&str; MAX_DIMENSIONS] = ["x", "y", "z", "t", "u", "v", "w", "p", "q"];

fn generate(
    nd: usize,
    count: usize,
    seed: u64,
    size: f64,
    config: Option<PathBuf>,
    output: PathBuf,
) -> Result<()> {
    if nd == 0 || nd > MAX_DIMENSIONS {
        bail!("nd must be between 1 and {MAX_DIMENSIONS}, got {nd}");
    }
    let config = WorkspaceConfig::load_or_default(config.as_deref())
        .context("Failed to load workspace configuration")?;
    let dimensions: Vec<Dimension> =
        AXIS_NAMES.iter().take(nd).map(|name| Dimension::new(*name, 0.0, size, 100)).collect();
    let backend = Arc::new(InMemoryDiskBackend::new());
    let ws = EventWorkspace::with_config(dimensions, config, backend)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut coords = vec![0.0; nd];
    let stored = ws.add_transformed(0..count, |_| {
        for c in &mut coords {
            *c = rng.gen_range(0.0..size);
        }
        Event::new(&coords, rng.gen_range(0.5..1.5), 1.0)
    })?;
    let splits = ws.split_all_if_needed()?;
    ws.save(&output).with_context(|| format!("Failed to save '{}'", output.display()))?;

    println!("stored {stored} events, {splits} splits, {} boxes -> {}", ws.n_boxes(), output.display());
    Ok(())
}

fn info(path: PathBuf) -> Result<()> {
    let ws = EventWorkspace::load(&path, true)
        .with_context(|| format!("Failed to open '{}'", path.display()))?;
    println!("{}: {}-dimensional, {}", path.display(), ws.nd(), describe_config(ws.config()));
    println!("{}", serde_json::to_string_pretty(&ws.stats()?)?);
    Ok(())
}

fn verify(path: PathBuf) -> Result<()> {
    let ws = EventWorkspace::load(&path, false)
        .with_context(|| format!("Failed to load '{}'", path.display()))?;
    let report = ws.check_invariants()?;
    println!(
        "checked {} boxes ({} leaves): {} events, signal {}, squared error {}",
        report.boxes_checked,
        report.leaves_checked,
        ws.n_points()?,
        ws.total_signal()?,
        ws.total_error_squared()?
    );
    if !report.is_ok() {
        for violation in &report.violations {
            eprintln!("violation: {violation}");
        }
        bail!("{} invariant violations in '{}'", report.violations.len(), path.display());
    }
    println!("ok");
    Ok(())
}

fn describe_config(config: &WorkspaceConfig) -> String {
    format!(
        "threshold {}, factor {}, max depth {}",
        config.split_threshold, config.split_factor, config.max_depth
    )
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match Cli::parse().command {
        Commands::Generate { nd, count, seed, size, config, output } => {
            generate(nd, count, seed, size, config, output)
        }
        Commands::Info { path } => info(path),
        Commands::Verify { path } => verify(path),
    }
}

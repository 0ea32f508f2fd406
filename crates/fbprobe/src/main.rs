// Host tooling crate: unwrap/expect/panic acceptable outside the libraries.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod heap;
mod pattern;
mod probe;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gralloc_fb::DisplayConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fbprobe")]
#[command(about = "Probe an fbdev panel through the gralloc framebuffer manager", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON display configuration; every field is optional
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate with the panel and print the result as JSON
    Info,
    /// Post scrolling colour bars
    Pattern {
        /// Flip, blit, or pick whichever the panel supports
        #[arg(long, value_enum, default_value = "auto")]
        via: probe::Via,
        /// Frames to post
        #[arg(long, default_value_t = 60)]
        frames: u32,
        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
    /// Print the effective configuration (defaults merged with --config)
    Config,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<DisplayConfig> {
    match path {
        Some(path) => DisplayConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(DisplayConfig::default()),
    }
}

#[cfg(target_os = "linux")]
fn info(config: DisplayConfig) -> Result<probe::Report> {
    probe::info(&gralloc_fb::DisplayModule::linux(config))
}

#[cfg(target_os = "linux")]
fn pattern(
    config: DisplayConfig,
    via: probe::Via,
    frames: u32,
    interval: Duration,
) -> Result<Vec<gralloc_fb::PostStrategy>> {
    probe::pattern(&gralloc_fb::DisplayModule::linux(config), via, frames, interval)
}

#[cfg(not(target_os = "linux"))]
fn info(_config: DisplayConfig) -> Result<probe::Report> {
    anyhow::bail!("fbdev devices are only available on Linux")
}

#[cfg(not(target_os = "linux"))]
fn pattern(
    _config: DisplayConfig,
    _via: probe::Via,
    _frames: u32,
    _interval: Duration,
) -> Result<Vec<gralloc_fb::PostStrategy>> {
    anyhow::bail!("fbdev devices are only available on Linux")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            let report = info(config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Pattern {
            via,
            frames,
            interval_ms,
        } => {
            let strategies = pattern(config, via, frames, Duration::from_millis(interval_ms))?;
            let flips = strategies
                .iter()
                .filter(|s| matches!(s, gralloc_fb::PostStrategy::Flip { .. }))
                .count();
            println!(
                "posted {} frames ({flips} flipped, {} blitted)",
                strategies.len(),
                strategies.len().saturating_sub(flips)
            );
        }
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

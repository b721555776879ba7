//! spike-replay: run a device byte stream through the signal engine
//!
//! Source is either a raw capture of the device's serial output or the
//! built-in device simulator.

mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use replay::ReplaySummary;
use spike_processing::{EngineConfig, SignalEngine};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw device capture to replay
    #[arg(long, conflicts_with_all = ["simulate", "realtime"])]
    input: Option<PathBuf>,

    /// Seconds of simulated device stream (default 10)
    #[arg(long)]
    simulate: Option<f32>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bytes handed to the engine per call
    #[arg(long, default_value_t = 4096)]
    chunk_size: usize,

    /// Pace the simulated device at wall-clock rate
    #[arg(long)]
    realtime: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => EngineConfig::heart(),
    };

    if let Some(path) = &args.dump_config {
        config.save(path)?;
        info!(path = %path.display(), "configuration written");
        return Ok(());
    }

    let mut engine = SignalEngine::new(config).context("creating signal engine")?;
    let mut summary = ReplaySummary::default();

    match &args.input {
        Some(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "replaying capture");
            replay::replay_bytes(&mut engine, &bytes, args.chunk_size, &mut summary)?;
        }
        None => {
            let seconds = args.simulate.unwrap_or(10.0);
            if args.realtime {
                replay::replay_realtime(&mut engine, seconds, &mut summary).await?;
            } else {
                replay::replay_simulated(&mut engine, seconds, args.chunk_size, &mut summary)?;
            }
        }
    }

    summary.log(&engine);
    Ok(())
}

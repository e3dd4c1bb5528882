//! orbcast - online-learning satellite state forecasting
//!
//! # Usage
//!
//! ```bash
//! # Replay TLE and OMNI files, training as windows complete
//! orbcast run --tle data/iss.tle --omni data/omni2_2024.dat
//!
//! # Stream JSON-lines feed records and serve predictions over HTTP
//! feed-producer | orbcast run --stdin --serve
//!
//! # Freeze normalization statistics from a sample of raw records
//! orbcast calibrate --tle data/*.tle --omni data/omni2_2024.dat -o stats.json
//! ```
//!
//! # Environment Variables
//!
//! - `ORBCAST_CONFIG`: Path to the TOML config file
//! - `ORBCAST_SERVER_ADDR`: HTTP bind address override
//! - `ORBCAST_CORS_ORIGINS`: Comma-separated allowed CORS origins
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use orbcast::api::{self, ApiState};
use orbcast::config::ForecastConfig;
use orbcast::ingest::{parse_omni_text, parse_tle_text, StatsAccumulator};
use orbcast::pipeline::{
    load_schema, JsonLinesSource, PipelineCoordinator, ProcessingLoop, ReplaySource,
};
use orbcast::storage;
use orbcast::types::{FeatureSchema, FeedRecord};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "orbcast")]
#[command(about = "Online-learning satellite state forecasting from TLE and OMNI feeds")]
#[command(version)]
struct Cli {
    /// Config file (default: $ORBCAST_CONFIG, then ./orbcast.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest feed records, train online and optionally serve predictions
    Run(RunArgs),

    /// Compute frozen feature statistics from raw TLE / OMNI files
    Calibrate {
        #[arg(long, num_args = 1..)]
        tle: Vec<PathBuf>,
        #[arg(long, num_args = 1..)]
        omni: Vec<PathBuf>,
        /// Where to write the statistics JSON
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate the config and print it with defaults filled in
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON-lines file of feed records
    #[arg(long, conflicts_with_all = ["stdin", "tle", "omni"])]
    input: Option<PathBuf>,

    /// Read JSON-lines feed records from stdin
    #[arg(long)]
    stdin: bool,

    /// TLE text files (2- or 3-line sets)
    #[arg(long, num_args = 1.., conflicts_with = "stdin")]
    tle: Vec<PathBuf>,

    /// OMNI2 hourly data files
    #[arg(long, num_args = 1.., conflicts_with = "stdin")]
    omni: Vec<PathBuf>,

    /// Delay between replayed records in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Serve the HTTP API; keeps running after the input ends
    #[arg(long)]
    serve: bool,

    /// Override the server address
    #[arg(short, long, env = "ORBCAST_SERVER_ADDR")]
    addr: Option<String>,
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<ForecastConfig> {
    let config = match path {
        Some(path) => ForecastConfig::load_from_file(path)?,
        None => ForecastConfig::load()?,
    };
    Ok(config)
}

/// Parse TLE and OMNI files into one record list. Bad entries are logged
/// and skipped.
fn read_feed_files(tle: &[PathBuf], omni: &[PathBuf]) -> Result<Vec<FeedRecord>> {
    let mut records = Vec::new();
    for path in tle {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let report = parse_tle_text(&text);
        for (line, e) in &report.errors {
            warn!(file = %path.display(), line, error = %e, "Skipping element set");
        }
        info!(file = %path.display(), records = report.records.len(), "Loaded TLE file");
        records.extend(report.records);
    }
    for path in omni {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let report = parse_omni_text(&text);
        info!(
            file = %path.display(),
            records = report.records.len(),
            skipped = report.skipped,
            duplicates = report.duplicates,
            "Loaded OMNI file"
        );
        records.extend(report.records);
    }
    Ok(records)
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: ForecastConfig, args: RunArgs) -> Result<()> {
    let schema = load_schema(&config.model)?;
    let store = storage::open(&config.storage)?;
    let coordinator = PipelineCoordinator::new(&config, schema, Some(store));

    let shutdown = coordinator.shutdown_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Ctrl+C handler unavailable"),
        }
    });

    let stop_worker = shutdown.child_token();
    let worker = coordinator.spawn_trainer(stop_worker.clone());

    let server = if args.serve {
        let addr = args.addr.clone().unwrap_or_else(|| config.server.addr.clone());
        let state = ApiState::new(coordinator.handle());
        let token = shutdown.clone();
        Some(tokio::spawn(async move { api::serve(&addr, state, token).await }))
    } else {
        None
    };

    let ingest = ProcessingLoop::new(coordinator, shutdown.clone());
    let (coordinator, stats) = if let Some(path) = &args.input {
        let mut source = JsonLinesSource::open(path).await?;
        ingest.run(&mut source).await
    } else if args.stdin {
        ingest.run(&mut JsonLinesSource::stdin()).await
    } else if !args.tle.is_empty() || !args.omni.is_empty() {
        let records = read_feed_files(&args.tle, &args.omni)?;
        ingest.run(&mut ReplaySource::new(records, args.delay_ms)).await
    } else {
        anyhow::bail!("no input: pass --input, --stdin, --tle or --omni");
    };

    // Let the worker finish its current step, then train what is left here.
    stop_worker.cancel();
    let trained = worker.await.unwrap_or(0);
    let remaining = if shutdown.is_cancelled() {
        0
    } else {
        tokio::task::block_in_place(|| coordinator.drain_training()).len()
    };
    let status = coordinator.status();
    info!(
        records = stats.records,
        trained = trained + remaining as u64,
        published = status.events.model_published,
        diverged = status.events.training_diverged,
        "Training caught up"
    );
    for model in &status.models {
        info!(model_key = %model.model_key, version = model.version, steps = model.training_step_count, "Model");
    }

    if let Some(server) = server {
        info!("Input finished, serving until shutdown");
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }
    }
    shutdown.cancel();
    Ok(())
}

fn calibrate(tle: &[PathBuf], omni: &[PathBuf], output: &Path) -> Result<()> {
    let records = read_feed_files(tle, omni)?;
    let prior = FeatureSchema::default();
    let mut acc = StatsAccumulator::for_schema(&prior);
    let mut rejected = 0usize;
    for record in &records {
        if acc.observe_record(&prior, record).is_err() {
            rejected += 1;
        }
    }
    let schema = acc.freeze(&prior)?;
    std::fs::write(output, serde_json::to_vec_pretty(&schema.stats())?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    for (i, name) in schema.names().enumerate() {
        let s = schema.features[i].stats;
        info!(feature = name, samples = acc.count(i), mean = s.mean, std = s.std, "Frozen statistics");
    }
    info!(
        records = records.len(),
        rejected,
        fingerprint = %schema.fingerprint,
        output = %output.display(),
        "Calibration written"
    );
    Ok(())
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    load_schema(&config.model)?;
    println!("{}", config.to_toml()?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            info!(
                window_size = config.pipeline.window_size,
                horizon = config.pipeline.forecast_horizon,
                scope = ?config.model.scope,
                backend = ?config.storage.backend,
                "orbcast starting"
            );
            run(config, args).await?;
            info!("orbcast shutdown complete");
            Ok(())
        }
        Command::Calibrate { tle, omni, output } => calibrate(&tle, &omni, &output),
        Command::CheckConfig => check_config(cli.config.as_deref()),
    }
}

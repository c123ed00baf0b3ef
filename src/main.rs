//! Reveal SDK CLI
//!
//! Inspect bucketing, configuration, and replay scripted sessions against
//! the SDK.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use reveal_sdk::{
    bucket::{bucket_index, hash_key},
    config::{fetch_or_fallback, HttpConfigSource},
    storage::MemoryStore,
    testing::{FailingConfigSource, RecordingTransport, ScriptedDecisionService},
    Backends, Extensions, FrictionSignal, FrictionType, Reveal, SdkOptions, VERSION,
};

#[derive(Parser)]
#[command(name = "reveal")]
#[command(version = VERSION)]
#[command(about = "Friction detection and nudge decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Options file (defaults to the platform config dir)
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which bucket a key lands in
    Bucket {
        key: String,

        /// Rate in 0..1
        #[arg(long, conflicts_with = "percent")]
        rate: Option<f64>,

        /// Percentage in 0..100
        #[arg(long)]
        percent: Option<f64>,
    },

    /// Drive the SDK from a JSON-lines script
    Replay {
        script: PathBuf,

        #[arg(long, env = "REVEAL_CLIENT_KEY")]
        client_key: String,

        /// Use in-memory backends instead of the network
        #[arg(long)]
        offline: bool,
    },

    /// Show resolved options
    Config,

    /// Fetch the remote config (or show the fallback)
    FetchConfig {
        #[arg(long, env = "REVEAL_CLIENT_KEY")]
        client_key: String,
    },
}

/// One line of a replay script.
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum ReplayStep {
    Track {
        kind: String,
        name: String,
        #[serde(default)]
        payload: Extensions,
    },
    Route {
        route: String,
    },
    Friction {
        #[serde(rename = "type")]
        friction_type: FrictionType,
        #[serde(default)]
        page_url: String,
        #[serde(default)]
        selector: Option<String>,
    },
    Sleep {
        ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = load_options(cli.options.as_deref())?;

    match cli.command {
        Commands::Bucket { key, rate, percent } => cmd_bucket(&key, rate, percent),
        Commands::Replay {
            script,
            client_key,
            offline,
        } => cmd_replay(&script, &client_key, options, offline).await,
        Commands::Config => cmd_config(&options, cli.options.as_deref()),
        Commands::FetchConfig { client_key } => cmd_fetch_config(&client_key, &options).await,
    }
}

fn load_options(path: Option<&Path>) -> Result<SdkOptions> {
    let options = match path {
        Some(path) => SdkOptions::load_from(path),
        None => SdkOptions::load(),
    };
    options.context("Failed to load SDK options")
}

fn cmd_bucket(key: &str, rate: Option<f64>, percent: Option<f64>) -> Result<()> {
    let included = match (rate, percent) {
        (Some(rate), _) => reveal_sdk::bucket(key, rate),
        (None, Some(percent)) => reveal_sdk::bucket_percent(key, percent),
        (None, None) => bail!("one of --rate or --percent is required"),
    };

    println!("Key:     {key}");
    println!("Hash:    {}", hash_key(key));
    println!("Bucket:  {}", bucket_index(key));
    println!("Included: {included}");
    Ok(())
}

async fn cmd_replay(script: &Path, client_key: &str, options: SdkOptions, offline: bool) -> Result<()> {
    let content = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read script {}", script.display()))?;
    let steps = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<ReplayStep>(line)
                .with_context(|| format!("Invalid step on line {}", index + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    let recording = Arc::new(RecordingTransport::new());
    let backends = if offline {
        Backends {
            config_source: Some(Arc::new(FailingConfigSource::new("offline replay"))),
            transport: Some(recording.clone()),
            decision_service: Some(Arc::new(ScriptedDecisionService::new())),
            store: Some(Arc::new(MemoryStore::new())),
            clock: None,
        }
    } else {
        Backends::default()
    };

    let reveal = Reveal::with_backends(backends);
    let _subscription = reveal.on_nudge_decision(|decision| {
        println!(
            "decision: {}",
            serde_json::to_string(decision).unwrap_or_else(|_| decision.nudge_id.clone())
        );
    });

    let report = reveal.init(client_key, options).await;
    println!(
        "init: {}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{:?}", report.status))
    );
    if !report.is_running() {
        bail!("SDK did not start ({:?})", report.status);
    }

    for step in steps {
        match step {
            ReplayStep::Track {
                kind,
                name,
                payload,
            } => {
                if reveal.track(&kind, &name, payload).is_none() {
                    eprintln!("Warning: {kind}/{name} was not captured");
                }
            }
            ReplayStep::Route { route } => reveal.notify_route_change(&route),
            ReplayStep::Friction {
                friction_type,
                page_url,
                selector,
            } => {
                let mut signal = FrictionSignal::new(friction_type, page_url, chrono::Utc::now());
                signal.selector = selector;
                reveal.report_friction(signal);
            }
            ReplayStep::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
    }
    // Let queued friction signals finish before reading stats.
    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Some(stats) = reveal.stats() {
        println!();
        println!("Statistics");
        println!("==========");
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).unwrap_or_else(|_| "Error".to_string())
        );
    }
    reveal.shutdown().await;

    if offline {
        println!();
        println!("Events sent: {}", recording.events().len());
    }
    Ok(())
}

fn cmd_config(options: &SdkOptions, path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(SdkOptions::config_path);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Options file: {:?}", path);
    println!("Storage dir:  {:?}", options.storage_dir());
    println!();
    println!("{}", serde_json::to_string_pretty(options)?);
    println!();
    println!("Endpoints:");
    println!("{}", serde_json::to_string_pretty(&options.endpoints())?);
    Ok(())
}

async fn cmd_fetch_config(client_key: &str, options: &SdkOptions) -> Result<()> {
    let endpoints = options.endpoints();
    endpoints.validate().context("Refusing to contact backend")?;

    let source = HttpConfigSource::new(endpoints.config.as_str(), client_key, options.http_timeout)?;
    let (config, origin) = fetch_or_fallback(&source, options.environment, &endpoints).await;

    println!("Origin: {:?}", origin);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

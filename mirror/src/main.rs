//! livestate mirror
//!
//! Keeps one streaming engine connected to a live visualization feed and
//! serves the committed state over HTTP, so dashboards and scripts can poll
//! it without speaking the streaming protocol.
//!
//! Usage:
//!   livestate-mirror --url ws://localhost:8080/graph --kind graph
//!
//! Nothing is persisted; the mirror starts empty on every launch.

use std::{fs, path::PathBuf, sync::Arc};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use livestate_mirror::build_router;
use livestate_sync::{EngineConfig, Snapshot, StreamingEngine};
use livestate_types::{Graph, Sankey, Schema, Surface};
use serde_json::Value;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    Graph,
    Sankey,
    Surface,
}

#[derive(Parser, Debug)]
#[command(name = "livestate-mirror")]
#[command(about = "Mirror a live visualization stream over HTTP")]
struct Args {
    /// WebSocket URL of the update stream
    #[arg(short, long)]
    url: String,

    /// Visualization the stream feeds
    #[arg(short, long, value_enum, default_value = "graph")]
    kind: Kind,

    /// HTTP API port
    #[arg(long, default_value = "4002")]
    http_port: u16,

    /// Engine config file (JSON); unset fields keep the kind's defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("livestate mirror starting...");
    match args.kind {
        Kind::Graph => run::<Graph>(&args).await,
        Kind::Sankey => run::<Sankey>(&args).await,
        Kind::Surface => run::<Surface>(&args).await,
    }
}

async fn run<S: Schema>(args: &Args) -> Result<()> {
    let config = load_config::<S>(args)?;
    let engine = Arc::new(StreamingEngine::<S>::new(config).context("Invalid engine config")?);
    let _subscription = engine.subscribe(|snapshot: Arc<Snapshot<S>>| {
        debug!(
            "v{}: {} entities, {} relations",
            snapshot.version,
            snapshot.len(),
            snapshot.relation_count()
        );
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.http_port))
        .await
        .context("Failed to bind HTTP port")?;
    let app = build_router(Arc::clone(&engine));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP server failed: {}", e);
        }
    });

    println!("\n========================================");
    println!("  livestate Mirror Running");
    println!("========================================");
    println!("  Engine:    {}", engine.id());
    println!("  Kind:      {}", S::NAME);
    println!("  Stream:    {}", args.url);
    println!("  HTTP Port: {}", args.http_port);
    println!("========================================\n");

    // A failed first attempt is not fatal; the engine keeps reconnecting.
    if let Err(e) = engine.connect().await {
        warn!("Initial connect failed: {}", e);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    engine.disconnect();
    Ok(())
}

/// Starts from the kind's defaults and overlays whatever the file sets.
fn load_config<S: Schema>(args: &Args) -> Result<EngineConfig> {
    let defaults = EngineConfig::for_schema::<S>(args.url.clone());
    let Some(path) = &args.config else {
        return Ok(defaults);
    };
    info!("Loading engine config from {:?}", path);
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let overrides: Value = serde_json::from_str(&raw).context("Config file is not valid JSON")?;

    let mut merged = serde_json::to_value(&defaults)?;
    if let (Value::Object(base), Value::Object(overrides)) = (&mut merged, overrides) {
        base.extend(overrides);
    }
    let mut config: EngineConfig =
        serde_json::from_value(merged).context("Invalid engine config")?;
    config.url = args.url.clone();
    config.validate().context("Invalid engine config")?;
    Ok(config)
}

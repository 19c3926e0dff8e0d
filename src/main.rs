//! Tabula Service Entry Point
//!
//! Handles CLI args, bootstrapping, and running either the HTTP
//! service or a one-shot question against a local file.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabula::api::{build_router, AppState};
use tabula::config::{get_config_path, load_config, resolve_path, save_config};
use tabula::ingest::ingest_file;
use tabula::session::SessionContext;
use tabula::types::AgentMode;

const VERSION: &str = "0.1.0";

/// Tabula -- Conversational Analytics over Tabular Data
#[derive(Parser, Debug)]
#[command(
    name = "tabula",
    version = VERSION,
    about = "Conversational analytics over tabular data"
)]
struct Cli {
    /// Start the HTTP service
    #[arg(long)]
    serve: bool,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,

    /// Ask a single question against --file and exit
    #[arg(long)]
    ask: Option<String>,

    /// Data file for --ask (csv or worksheet xml)
    #[arg(long)]
    file: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,
}

// ---- Serve ------------------------------------------------------------------

async fn serve(bind: Option<String>) -> Result<()> {
    let mut config = load_config();
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    for dir in [&config.asset_dir, &config.upload_dir] {
        let path = resolve_path(dir);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create directory {path}"))?;
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config));
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "tabula v{VERSION} listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to register Ctrl+C handler");
        info!("received shutdown signal");
    }
}

// ---- One-shot ask -----------------------------------------------------------

/// Load a file, ask one question in code mode, print the answer.
async fn ask_once(question: &str, file: &str) -> Result<()> {
    let config = load_config();
    let table = ingest_file(std::path::Path::new(file))
        .with_context(|| format!("failed to load {file}"))?;
    println!(
        "Loaded '{}': {} rows, {} columns.",
        table.name,
        table.row_count(),
        table.headers.len()
    );

    let state = AppState::new(config);
    let mut session = SessionContext::new(AgentMode::Code);
    session.table = Some(table);

    let result = state.agent.invoke(&mut session, question).await;
    println!("{}", result.text);
    if let Some(chart) = result.chart {
        let dir = resolve_path(&state.config.asset_dir);
        println!("Chart written to {dir}/{chart}");
    }
    Ok(())
}

// ---- Entry Point ------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.init {
        let path = get_config_path();
        if path.exists() {
            eprintln!("Config already exists at {}", path.display());
            std::process::exit(1);
        }
        if let Err(e) = save_config(&load_config()) {
            eprintln!("Init failed: {e:#}");
            std::process::exit(1);
        }
        println!("Wrote {}", path.display());
        return;
    }

    if cli.show_config {
        let config = load_config();
        match serde_json::to_string_pretty(&config) {
            Ok(rendered) => {
                println!("Config file: {}", get_config_path().display());
                println!("{rendered}");
            }
            Err(e) => {
                eprintln!("Failed to render config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Some(question) = cli.ask {
        let Some(file) = cli.file else {
            eprintln!("--ask requires --file <path>");
            std::process::exit(1);
        };
        if let Err(e) = ask_once(&question, &file).await {
            eprintln!("Fatal: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    if cli.serve {
        if let Err(e) = serve(cli.bind).await {
            eprintln!("Fatal: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    // Default: show usage hints.
    println!("Run \"tabula --serve\" to start the HTTP service.");
    println!("Run \"tabula --ask <question> --file <path>\" for a one-shot answer.");
}

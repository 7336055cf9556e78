//! Arbor MCP Server - tree-sitter code analysis over stdio
#![recursion_limit = "256"]

mod server;
mod tools;

use arbor_core::{Analyzer, ArborError, Config};
use clap::Parser;
use server::McpServer;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor-mcp")]
#[command(about = "MCP server for tree-sitter code analysis", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(long, env = "ARBOR_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Parse on every request instead of caching trees
    #[arg(long)]
    disable_cache: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (config, source, load_error) = load_config(&args);

    init_tracing(args.debug, &config.log_level);
    match (&source, load_error) {
        (Some(path), Some(e)) => tracing::error!(
            path = %path.display(),
            error = %e,
            "failed to load configuration, using defaults"
        ),
        (Some(path), None) => tracing::info!(path = %path.display(), "loaded configuration"),
        (None, _) => tracing::info!("using default configuration"),
    }

    let analyzer = Arc::new(Analyzer::new(config));
    let server = Arc::new(McpServer::new(analyzer));

    if let Err(e) = serve(server).await {
        tracing::error!(error = %e, "stdio transport failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Effective configuration: environment over flags over file over defaults.
/// A missing or malformed file falls back to defaults; the error is
/// returned for logging once tracing is up.
fn load_config(args: &Args) -> (Config, Option<PathBuf>, Option<ArborError>) {
    let source = Config::discover(args.config.as_deref());
    let (mut config, load_error) = match source.as_deref().map(Config::load) {
        Some(Ok(config)) => (config, None),
        Some(Err(e)) => (Config::default(), Some(e)),
        None => (Config::default(), None),
    };
    if args.disable_cache {
        config.cache.enabled = false;
    }
    config.apply_env();
    (config, source, load_error)
}

fn init_tracing(debug: bool, log_level: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| {
            EnvFilter::try_new(log_level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
        })
    };

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Read requests line by line and answer each on the blocking pool.
/// A single writer task owns stdout so responses never interleave.
async fn serve(server: Arc<McpServer>) -> std::io::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let server = Arc::clone(&server);
        let tx = tx.clone();
        in_flight.spawn_blocking(move || {
            if let Some(response) = server.handle_request(&line) {
                // Receiver only closes once stdout is gone
                let _ = tx.send(response);
            }
        });

        // Reap finished requests so the set stays small
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                tracing::error!(error = %e, "request handler panicked");
            }
        }
    }

    tracing::debug!("stdin closed, draining in-flight requests");
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "request handler panicked");
        }
    }
    drop(tx);

    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

//! Dubcast Daemon
//!
//! HTTP server that turns live broadcasts into streams of translated audio.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/dubcast/dubcast.toml, then DUBCAST_* variables
//! dubcast-daemon
//!
//! # Explicit config and bind address
//! dubcast-daemon --config ./dubcast.toml --host 127.0.0.1 --port 8080
//!
//! # Custom translator and more workers
//! dubcast-daemon --translator /opt/dub/translate.sh --max-workers 4
//!
//! # With verbose logging
//! RUST_LOG=debug dubcast-daemon
//! ```
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: stop accepting requests, stop every session, drain the
//!   translation pool, remove the PID file

mod server;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use dubcast_core::{load_config_from_path, ConfigOverrides, PipelineContext, StreamRegistry};

use crate::server::{router, AppState};

/// Live-source chunked audio translation service
#[derive(Debug, Parser)]
#[command(name = "dubcast-daemon", version, about)]
struct Args {
    /// Configuration file (default: ~/.config/dubcast/dubcast.toml)
    #[arg(long, env = "DUBCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(long)]
    port: Option<u16>,

    /// Translation worker pool size
    #[arg(long)]
    max_workers: Option<usize>,

    /// Translator executable
    #[arg(long)]
    translator: Option<String>,

    /// Write the process id to this file while running
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(host) = &self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(n) = self.max_workers {
            overrides = overrides.with_max_workers(n);
        }
        if let Some(program) = &self.translator {
            overrides = overrides.with_translator_program(program.clone());
        }
        overrides
    }
}

fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let pid = std::process::id();
    let mut file = fs::File::create(path)?;
    writeln!(file, "{pid}")?;
    info!(pid, path = %path.display(), "PID file created");
    Ok(())
}

fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = %path.display(), "Failed to remove PID file");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dubcast_daemon=info".parse()?)
                .add_directive("dubcast_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(dubcast_core::default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        host = %config.host,
        port = config.port,
        max_workers = config.max_workers,
        translator = %config.translator.program,
        "Starting dubcast daemon"
    );

    if let Some(path) = &args.pid_file {
        write_pid_file(path)
            .with_context(|| format!("Failed to write PID file at {}", path.display()))?;
    }

    let ctx = PipelineContext::from_config(&config).context("Failed to initialise extractor")?;
    let registry = Arc::new(StreamRegistry::new(ctx));
    let app = router(AppState::new(Arc::clone(&registry), config.delivery.clone()));

    // Open delivery streams only end once their sessions stop, so sessions
    // are stopped as soon as the signal arrives rather than after serve returns.
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let stopper = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move {
            if stop_rx.await.is_ok() {
                registry.shutdown().await;
            }
        }
    });
    let graceful = async move {
        shutdown_signal().await;
        let _ = stop_tx.send(());
    };

    let addr = format!("{}:{}", config.host, config.port);
    let served = async {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(addr = %addr, "Listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
            .context("Server error")
    }
    .await;

    if let Err(e) = stopper.await {
        warn!(error = %e, "Shutdown task failed");
    }
    registry.shutdown().await;
    if let Some(path) = &args.pid_file {
        remove_pid_file(path);
    }
    info!("Daemon stopped");

    served
}

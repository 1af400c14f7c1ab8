//! # gp-daemon
//!
//! HTTP control surface for the Gated Publish pipeline.
//!
//! ## Usage
//!
//! ```bash
//! # Settings from a TOML file (env overrides still apply)
//! gp-daemon --config gated-publish.toml
//!
//! # Settings from the environment alone
//! GP_REMOTE_URL=https://github.com/org/repo.git \
//! GP_WORKSPACE_PATH=/var/lib/gated-publish/clone \
//!   gp-daemon --bind 0.0.0.0:8787
//! ```
//!
//! Submit a change with `POST /workflows`, inspect it with
//! `GET /status/{id}`, and resolve it with `POST /decision/{id}`.

mod api;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gp_gateway::{GatedPublish, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "gp-daemon",
    about = "Gated Publish daemon: staged, human-approved pushes to a git remote"
)]
struct Cli {
    /// Pipeline configuration (TOML). Without it, settings come from
    /// GP_REMOTE_URL, GP_REMOTE_CREDENTIAL and GP_WORKSPACE_PATH.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.bind).
    #[arg(long)]
    bind: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::from_env().context("reading configuration from environment")?,
    };
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());

    let gp = GatedPublish::from_config(&config)?;
    let app = api::router(gp);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    tracing::info!("gated publish daemon listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("daemon stopped");
    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in [
        "gp_daemon=info",
        "gp_gateway=info",
        "gp_submit=info",
        "gp_workspace=info",
        "gp_workflow=info",
    ] {
        filter = filter.add_directive(directive.parse()?);
    }

    // Logs go to stderr; stdout stays free for tooling.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

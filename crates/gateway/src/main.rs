//! ladder-gateway: HTTP front of the plan ladder ledger.
//!
//! Authentication happens upstream; this process trusts the
//! `x-account-id` / `x-account-role` headers it is handed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ladder_ledger::{config::load_from_file, Ledger, LedgerConfig};

mod api;
mod handlers;

/// Shared state handed to every handler.
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

#[derive(Parser, Debug)]
#[command(name = "ladder-gateway", version, about = "Plan ladder ledger HTTP gateway")]
struct Cli {
    /// TOML config file. Built-in defaults are used when absent.
    #[arg(long, env = "LADDER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address.
    #[arg(long, env = "LADDER_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<LedgerConfig> {
    match path {
        Some(p) => load_from_file(p).with_context(|| format!("loading config from {}", p.display())),
        None => {
            let mut cfg = LedgerConfig::default();
            cfg.apply_env_overrides()?;
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let ledger = Ledger::open(config.clone())
        .with_context(|| format!("opening ledger store at {}", config.data_dir))?;
    info!(
        data_dir = %config.data_dir,
        surveys_per_plan = config.surveys_per_plan,
        "ledger opened"
    );

    let state = Arc::new(AppState { ledger: Arc::new(ledger) });
    let app = handlers::routes().with_state(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!(addr = %cli.bind, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

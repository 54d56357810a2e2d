//! Reconciler Binary
//!
//! On a timer, fetches all non-terminal Orders and asks each venue for
//! authoritative status, persisting fills and state. Never cancels.

use clap::Parser;
use eventarb::models::Config;
use eventarb::reconciler::reconcile_once;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(about = "Reconciles persisted non-terminal orders against venue truth")]
struct Args {
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::from_env()?;
    let persistence = eventarb::persistence::Persistence::open(&config.database_path)?;
    let adapters = eventarb::venues::all_from_env();

    info!("reconciler starting");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.reconciliation_polling_interval_s));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match reconcile_once(&persistence, &adapters).await {
                    Ok(n) => info!(reconciled = n, "reconciliation pass complete"),
                    Err(reason) => error!(%reason, "reconciliation pass failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting after current pass");
                return Ok(());
            }
        }
    }
}

fn init_tracing(log_level: &str) {
    let directive = format!("reconciler={log_level},eventarb={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

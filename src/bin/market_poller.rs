//! Market Poller Binary
//!
//! Periodically asks each venue adapter for its current set of live markets
//! and publishes each as a normalized record to `market_events`.
//!
//! Environment:
//!   POLLING_INTERVAL_S - seconds between poll cycles (default: 60)
//!   MARKETS_PER_VENUE - markets requested per venue per cycle (default: 50)

use clap::Parser;
use eventarb::log::{Log, LogConfig};
use eventarb::models::Config;
use std::collections::HashMap;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const STREAM: &str = "market_events";

#[derive(Parser, Debug)]
#[command(name = "market-poller")]
#[command(about = "Polls venue adapters for live markets and publishes market_events")]
struct Args {
    #[arg(long, env = "MARKETS_PER_VENUE", default_value = "50")]
    markets_per_venue: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::from_env()?;
    let persistence = eventarb::persistence::Persistence::open(&config.database_path)?;
    let log = Log::connect(LogConfig::from_url(&config.redis_url)).await?;
    let adapters = eventarb::venues::all_from_env();

    info!(venues = adapters.len(), "market poller starting");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.polling_interval_s));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(reason) = poll_once(&adapters, &persistence, &log, args.markets_per_venue).await {
                    error!(%reason, "poll cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting after current cycle");
                return Ok(());
            }
        }
    }
}

async fn poll_once(
    adapters: &HashMap<eventarb::models::Venue, Box<dyn eventarb::venues::VenueAdapter>>,
    persistence: &eventarb::persistence::Persistence,
    log: &Log,
    markets_per_venue: usize,
) -> anyhow::Result<()> {
    for adapter in adapters.values() {
        let venue = adapter.venue();
        let ids = match adapter.find_new_markets(markets_per_venue).await {
            Ok(ids) => ids,
            Err(reason) => {
                warn!(?venue, %reason, "find_new_markets failed");
                continue;
            }
        };
        if ids.is_empty() {
            continue;
        }

        let markets = match adapter.get_markets(&ids).await {
            Ok(markets) => markets,
            Err(reason) => {
                warn!(?venue, %reason, "get_markets failed");
                continue;
            }
        };

        for market in &markets {
            persistence.upsert_market(market).await?;

            let mut fields = HashMap::new();
            fields.insert("market_id".to_string(), market.market_id.clone());
            fields.insert("venue".to_string(), market.venue.as_str().to_string());
            fields.insert("name".to_string(), market.name.clone());
            fields.insert("rules".to_string(), market.rules.clone());
            fields.insert("close_timestamp".to_string(), market.close_timestamp.to_string());
            log.append(STREAM, &fields).await;
        }

        info!(?venue, count = markets.len(), "published market_events");
    }
    Ok(())
}

fn init_tracing(log_level: &str) {
    let directive = format!("market_poller={log_level},eventarb={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

//! Trade Executor Binary
//!
//! Consumes `opportunities`, splits each into chunks, places symmetric buy
//! orders on both venues, waits for both legs to fill before proceeding,
//! and aborts-and-cancels on any failure.

use clap::Parser;
use eventarb::executor::execute_opportunity;
use eventarb::log::{consumer_name, Log, LogConfig, Record};
use eventarb::models::{Config, Opportunity, Venue};
use eventarb::venues::VenueAdapter;
use std::collections::HashMap;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const INPUT_STREAM: &str = "opportunities";
const GROUP: &str = "trade-executor";
const BATCH_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "trade-executor")]
#[command(about = "Executes sized arbitrage opportunities via chunked symmetric orders")]
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
    let log = Log::connect(LogConfig::from_url(&config.redis_url)).await?;
    log.create_group(INPUT_STREAM, GROUP).await?;
    let adapters = eventarb::venues::all_from_env();
    let consumer = consumer_name("trade-executor");
    let poll_timeout = std::time::Duration::from_secs(config.polling_timeout_s);

    info!("trade executor starting");

    loop {
        tokio::select! {
            result = log.read_group(INPUT_STREAM, GROUP, &consumer, BATCH_SIZE) => {
                let records = match result {
                    Ok(records) => records,
                    Err(reason) => {
                        error!(%reason, "read_group failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                for record in records {
                    process_record(&record, &adapters, &persistence, &log, poll_timeout).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting");
                return Ok(());
            }
        }
    }
}

async fn process_record(
    record: &Record,
    adapters: &HashMap<Venue, Box<dyn VenueAdapter>>,
    persistence: &eventarb::persistence::Persistence,
    log: &Log,
    poll_timeout: std::time::Duration,
) {
    let parsed = match parse_record(&record.fields) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!(log_id = %record.log_id, %reason, "undecodable opportunities record, acking (poison message)");
            if let Err(e) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%e, "ack failed");
            }
            return;
        }
    };
    let (market_id_1, venue_1, market_id_2, venue_2, opportunity) = parsed;

    let result = run(adapters, persistence, market_id_1, venue_1, market_id_2, venue_2, &opportunity, poll_timeout).await;
    match result {
        Ok(()) => {
            if let Err(reason) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%reason, "ack failed");
            }
        }
        Err(reason) => {
            error!(log_id = %record.log_id, %reason, "execution failed, leaving unacked");
        }
    }
}

async fn run(
    adapters: &HashMap<Venue, Box<dyn VenueAdapter>>,
    persistence: &eventarb::persistence::Persistence,
    market_id_1: String,
    venue_1: Venue,
    market_id_2: String,
    venue_2: Venue,
    opportunity: &Opportunity,
    poll_timeout: std::time::Duration,
) -> anyhow::Result<()> {
    let adapter1 = adapters.get(&venue_1).ok_or_else(|| anyhow::anyhow!("no adapter for {venue_1:?}"))?;
    let adapter2 = adapters.get(&venue_2).ok_or_else(|| anyhow::anyhow!("no adapter for {venue_2:?}"))?;

    let market1 = persistence
        .get_market(venue_1, &market_id_1)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown market {market_id_1}"))?;
    let market2 = persistence
        .get_market(venue_2, &market_id_2)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown market {market_id_2}"))?;

    execute_opportunity(
        &market1,
        &market2,
        adapter1.as_ref(),
        adapter2.as_ref(),
        persistence,
        opportunity,
        poll_timeout,
    )
    .await?;
    Ok(())
}

fn parse_record(
    fields: &HashMap<String, String>,
) -> anyhow::Result<(String, Venue, String, Venue, Opportunity)> {
    let get = |key: &str| -> anyhow::Result<String> {
        fields.get(key).cloned().ok_or_else(|| anyhow::anyhow!("missing field {key}"))
    };
    let opportunity: Opportunity = serde_json::from_str(&get("opportunity")?)?;
    Ok((
        get("market_id_1")?,
        Venue::parse(&get("venue_1")?)?,
        get("market_id_2")?,
        Venue::parse(&get("venue_2")?)?,
        opportunity,
    ))
}

fn init_tracing(log_level: &str) {
    let directive = format!("trade_executor={log_level},eventarb={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

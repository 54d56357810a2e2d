//! Arbitrage Finder Binary
//!
//! Consumes `market_pairs`, fetches live depth for both sides from both
//! venues, runs the depth-curve sizer, and publishes any opportunity to
//! `opportunities`.

use clap::Parser;
use eventarb::arbitrage::sizer::calculate;
use eventarb::log::{consumer_name, Log, LogConfig, Record};
use eventarb::models::{Config, MarketPair, Venue};
use eventarb::venues::VenueAdapter;
use std::collections::HashMap;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const INPUT_STREAM: &str = "market_pairs";
const OUTPUT_STREAM: &str = "opportunities";
const GROUP: &str = "arbitrage-finder";
const BATCH_SIZE: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "arbitrage-finder")]
#[command(about = "Sizes cross-venue arbitrage opportunities from matched market pairs")]
struct Args {
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::from_env()?;
    let log = Log::connect(LogConfig::from_url(&config.redis_url)).await?;
    log.create_group(INPUT_STREAM, GROUP).await?;
    let adapters = eventarb::venues::all_from_env();
    let consumer = consumer_name("arbitrage-finder");

    info!("arbitrage finder starting");

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
                    process_record(&record, &adapters, &config, &log).await;
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
    config: &Config,
    log: &Log,
) {
    let pair = match parse_pair(&record.fields) {
        Ok(pair) => pair,
        Err(reason) => {
            warn!(log_id = %record.log_id, %reason, "undecodable market_pairs record, acking (poison message)");
            if let Err(e) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%e, "ack failed");
            }
            return;
        }
    };

    match find_opportunity(&pair, adapters, config).await {
        Ok(Some(opportunity)) => {
            let mut fields = HashMap::new();
            fields.insert("market_id_1".to_string(), pair.market_id_1.clone());
            fields.insert("venue_1".to_string(), pair.venue_1.as_str().to_string());
            fields.insert("market_id_2".to_string(), pair.market_id_2.clone());
            fields.insert("venue_2".to_string(), pair.venue_2.as_str().to_string());
            fields.insert("opportunity".to_string(), serde_json::to_string(&opportunity).unwrap_or_default());
            log.append(OUTPUT_STREAM, &fields).await;
            info!(pair = %pair.key(), shares = opportunity.shares, "opportunity published");
            if let Err(reason) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%reason, "ack failed");
            }
        }
        Ok(None) => {
            if let Err(reason) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%reason, "ack failed");
            }
        }
        Err(reason) => {
            error!(log_id = %record.log_id, %reason, "failed to evaluate pair, leaving unacked");
        }
    }
}

async fn find_opportunity(
    pair: &MarketPair,
    adapters: &HashMap<Venue, Box<dyn VenueAdapter>>,
    config: &Config,
) -> anyhow::Result<Option<eventarb::models::Opportunity>> {
    let adapter1 = adapters.get(&pair.venue_1).ok_or_else(|| anyhow::anyhow!("no adapter for {:?}", pair.venue_1))?;
    let adapter2 = adapters.get(&pair.venue_2).ok_or_else(|| anyhow::anyhow!("no adapter for {:?}", pair.venue_2))?;

    let books1 = adapter1.get_order_books(std::slice::from_ref(&pair.market_id_1)).await?;
    let books2 = adapter2.get_order_books(std::slice::from_ref(&pair.market_id_2)).await?;

    let (Some(book1), Some(book2)) = (books1.into_iter().next(), books2.into_iter().next()) else {
        return Ok(None);
    };

    Ok(calculate(
        &book1.yes.ask,
        &book1.no.ask,
        &book2.yes.ask,
        &book2.no.ask,
        config.profit_threshold,
        config.expected_slippage,
        config.max_trade_cost,
        &pair.key(),
    ))
}

fn parse_pair(fields: &HashMap<String, String>) -> anyhow::Result<MarketPair> {
    let get = |key: &str| -> anyhow::Result<String> {
        fields.get(key).cloned().ok_or_else(|| anyhow::anyhow!("missing field {key}"))
    };
    Ok(MarketPair {
        market_id_1: get("market_id_1")?,
        venue_1: Venue::parse(&get("venue_1")?)?,
        market_id_2: get("market_id_2")?,
        venue_2: Venue::parse(&get("venue_2")?)?,
    })
}

fn init_tracing(log_level: &str) {
    let directive = format!("arbitrage_finder={log_level},eventarb={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

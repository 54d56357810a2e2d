//! Similarity Matcher Binary
//!
//! Consumes `market_events`, indexes each market, recalls cross-venue
//! candidates, confirms identity via the LLM judge, and publishes confirmed
//! pairs to `market_pairs`.

use clap::Parser;
use eventarb::log::{consumer_name, Log, LogConfig, Record};
use eventarb::models::{Config, Market, Venue};
use eventarb::similarity::index::SimilarityIndex;
use eventarb::similarity::judge::IdentityJudge;
use eventarb::similarity::process_market;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const INPUT_STREAM: &str = "market_events";
const OUTPUT_STREAM: &str = "market_pairs";
const GROUP: &str = "similarity-matcher";
const BATCH_SIZE: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "similarity-matcher")]
#[command(about = "Matches semantically identical markets across venues")]
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
    let judge = IdentityJudge::from_env(reqwest::Client::new())?;
    let consumer = consumer_name("similarity-matcher");

    let mut index = SimilarityIndex::new();
    for market in persistence.list_all_markets().await? {
        index.upsert(market.venue.as_str(), &market.market_id, eventarb::similarity::index::VectorKind::Name, &market.name);
        index.upsert(market.venue.as_str(), &market.market_id, eventarb::similarity::index::VectorKind::Rules, &market.rules);
    }
    info!("similarity matcher starting");

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
                let mut dedup = HashSet::new();
                for record in records {
                    process_record(&record, &persistence, &mut index, &judge, &mut dedup, &log).await;
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
    persistence: &eventarb::persistence::Persistence,
    index: &mut SimilarityIndex,
    judge: &IdentityJudge,
    dedup: &mut HashSet<String>,
    log: &Log,
) {
    let market = match parse_market(&record.fields) {
        Ok(market) => market,
        Err(reason) => {
            warn!(log_id = %record.log_id, %reason, "undecodable market_events record, acking (poison message)");
            if let Err(e) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%e, "ack failed");
            }
            return;
        }
    };

    match process_market(&market, persistence, index, judge, dedup).await {
        Ok(pairs) => {
            for pair in &pairs {
                let mut fields = HashMap::new();
                fields.insert("market_id_1".to_string(), pair.market_id_1.clone());
                fields.insert("venue_1".to_string(), pair.venue_1.as_str().to_string());
                fields.insert("market_id_2".to_string(), pair.market_id_2.clone());
                fields.insert("venue_2".to_string(), pair.venue_2.as_str().to_string());
                log.append(OUTPUT_STREAM, &fields).await;
            }
            if let Err(reason) = log.ack(INPUT_STREAM, GROUP, &record.log_id).await {
                error!(%reason, "ack failed");
            }
        }
        Err(reason) => {
            error!(log_id = %record.log_id, %reason, "failed to process market event, leaving unacked");
        }
    }
}

fn parse_market(fields: &HashMap<String, String>) -> anyhow::Result<Market> {
    let get = |key: &str| -> anyhow::Result<String> {
        fields.get(key).cloned().ok_or_else(|| anyhow::anyhow!("missing field {key}"))
    };
    Ok(Market {
        venue: Venue::parse(&get("venue")?)?,
        market_id: get("market_id")?,
        name: get("name")?,
        rules: get("rules")?,
        close_timestamp: get("close_timestamp")?.parse()?,
    })
}

fn init_tracing(log_level: &str) {
    let directive = format!("similarity_matcher={log_level},eventarb={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

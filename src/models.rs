use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One tenth of a cent; a unit payout is exactly 1000 of these.
pub type Cents10 = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Polymarket,
    Kalshi,
    Test,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
            Venue::Test => "test",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "polymarket" => Ok(Venue::Polymarket),
            "kalshi" => Ok(Venue::Kalshi),
            "test" => Ok(Venue::Test),
            other => anyhow::bail!("unknown venue: {other}"),
        }
    }
}

/// A live market on one venue. Never mutated in place; re-ingest replaces the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: Venue,
    pub market_id: String,
    pub name: String,
    pub rules: String,
    pub close_timestamp: i64,
}

/// An unordered pair of Markets on distinct venues, judged semantically identical.
/// Canonicalized so `market_id_1 < market_id_2` lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPair {
    pub market_id_1: String,
    pub venue_1: Venue,
    pub market_id_2: String,
    pub venue_2: Venue,
}

impl MarketPair {
    /// Orders the two markets lexicographically by `market_id` so a pair has one key
    /// regardless of discovery order.
    pub fn canonicalize(a: &Market, b: &Market) -> Self {
        if a.market_id <= b.market_id {
            Self {
                market_id_1: a.market_id.clone(),
                venue_1: a.venue,
                market_id_2: b.market_id.clone(),
                venue_2: b.venue,
            }
        } else {
            Self {
                market_id_1: b.market_id.clone(),
                venue_1: b.venue,
                market_id_2: a.market_id.clone(),
                venue_2: a.venue,
            }
        }
    }

    pub fn key(&self) -> String {
        format!("{}|{}", self.market_id_1, self.market_id_2)
    }
}

/// One ascending-by-price level: `(price, quantity)`, both in the venue-normalized units.
pub type Level = (Cents10, i64);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelBook {
    pub bid: Vec<Level>,
    pub ask: Vec<Level>,
}

/// A full snapshot for one market: four ascending sorted level sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: Venue,
    pub market_id: String,
    pub timestamp_ms: i64,
    pub yes: LevelBook,
    pub no: LevelBook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    Yes1No2,
    Yes2No1,
}

/// A sized cross-venue arbitrage candidate, as emitted by the finder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub opportunity_type: OpportunityType,
    pub shares: i64,
    pub total_cost: Cents10,
    pub cost_per_share: f64,
    pub max_price_1: Cents10,
    pub max_price_2: Cents10,
    pub pair_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

/// PENDING -> OPEN -> {PARTIALLY_FILLED -> EXECUTED | CANCELED}; PENDING -> FAILED.
/// EXECUTED, CANCELED, FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Executed,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Executed | OrderStatus::Canceled | OrderStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<i64>,
    pub client_order_id: String,
    pub venue: Venue,
    pub market_id: String,
    pub side: Side,
    pub action: Action,
    pub order_type: OrderType,
    pub size: i64,
    pub price: Option<Cents10>,
    pub max_price: Option<Cents10>,
    pub time_in_force: TimeInForce,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub fill_size: i64,
}

impl Order {
    fn base(
        venue: Venue,
        market_id: impl Into<String>,
        side: Side,
        action: Action,
        order_type: OrderType,
        size: i64,
    ) -> Self {
        Self {
            id: None,
            client_order_id: Uuid::new_v4().to_string(),
            venue,
            market_id: market_id.into(),
            side,
            action,
            order_type,
            size,
            price: None,
            max_price: None,
            time_in_force: TimeInForce::Gtc,
            venue_order_id: None,
            status: OrderStatus::Pending,
            fill_size: 0,
        }
    }

    pub fn limit_buy(venue: Venue, market_id: impl Into<String>, side: Side, size: i64, price: Cents10) -> Self {
        let mut o = Self::base(venue, market_id, side, Action::Buy, OrderType::Limit, size);
        o.price = Some(price);
        o
    }

    pub fn market_buy(venue: Venue, market_id: impl Into<String>, side: Side, size: i64, max_price: Cents10) -> Self {
        let mut o = Self::base(venue, market_id, side, Action::Buy, OrderType::Market, size);
        o.max_price = Some(max_price);
        o
    }
}

/// Append-only fill receipt attached to an Order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: i64,
    pub venue_trade_id: String,
    pub quantity: i64,
    pub price: Cents10,
    pub executed_at: DateTime<Utc>,
}

/// Shared runtime configuration, read once at stage startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub redis_url: String,
    pub profit_threshold: f64,
    pub expected_slippage: f64,
    pub max_trade_cost: Option<Cents10>,
    pub polling_interval_s: u64,
    pub similarity_polling_interval_s: u64,
    pub arbitrage_polling_interval_s: u64,
    pub trade_polling_interval_s: u64,
    pub reconciliation_polling_interval_s: u64,
    pub polling_timeout_s: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./eventarb.db".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        Ok(Self {
            database_path,
            redis_url,
            profit_threshold: env_parse("PROFIT_THRESHOLD", 0.05),
            expected_slippage: env_parse("EXPECTED_SLIPPAGE", 0.01),
            max_trade_cost: std::env::var("MAX_TRADE_COST").ok().and_then(|v| v.parse().ok()),
            polling_interval_s: env_parse("POLLING_INTERVAL_S", 60),
            similarity_polling_interval_s: env_parse("SIMILARITY_POLLING_INTERVAL_S", 10),
            arbitrage_polling_interval_s: env_parse("ARBITRAGE_POLLING_INTERVAL_S", 10),
            trade_polling_interval_s: env_parse("TRADE_POLLING_INTERVAL_S", 10),
            reconciliation_polling_interval_s: env_parse("RECONCILIATION_POLLING_INTERVAL_S", 60),
            polling_timeout_s: env_parse("POLLING_TIMEOUT_S", 30),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_symmetric() {
        let a = Market {
            venue: Venue::Polymarket,
            market_id: "zzz".into(),
            name: "a".into(),
            rules: "r".into(),
            close_timestamp: 0,
        };
        let b = Market {
            venue: Venue::Kalshi,
            market_id: "aaa".into(),
            name: "b".into(),
            rules: "r".into(),
            close_timestamp: 0,
        };
        let p1 = MarketPair::canonicalize(&a, &b);
        let p2 = MarketPair::canonicalize(&b, &a);
        assert_eq!(p1.key(), p2.key());
        assert_eq!(p1.market_id_1, "aaa");
        assert_eq!(p1.market_id_2, "zzz");
    }

    #[test]
    fn order_status_terminal() {
        assert!(OrderStatus::Executed.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
    }
}

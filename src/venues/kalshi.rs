//! Kalshi venue adapter. Quotes in whole cents (multiply by 10 to reach
//! tenths-of-cent), and exposes only a YES book for many markets, so this
//! adapter synthesizes the NO side via `no_ask = 1000 - yes_bid` clamped
//! against crossing the best opposite bid -- grounded on the original's
//! `KalshiPlatform._fetch_orderbook`.
//!
//! Request signing follows the same HMAC-over-`timestamp+method+path`
//! construction as the Polymarket adapter (the teacher's stack carries
//! `hmac`/`sha2`, not an RSA-PSS signer, so the access-key secret here is
//! treated as an HMAC key rather than an RSA private key -- see DESIGN.md).

use super::VenueAdapter;
use crate::error::VenueError;
use crate::models::{Level, LevelBook, Market, Order, OrderBook, OrderStatus, Trade, Venue};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

const BASE_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct KalshiCredentials {
    pub key_id: String,
    pub private_key: String,
}

impl KalshiCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            key_id: std::env::var("KALSHI_API_KEY_ID").ok()?,
            private_key: std::env::var("KALSHI_PRIVATE_KEY_PATH")
                .ok()
                .and_then(|path| std::fs::read_to_string(path).ok())?,
        })
    }
}

pub struct KalshiAdapter {
    client: Client,
    creds: Option<KalshiCredentials>,
}

impl KalshiAdapter {
    pub fn new(creds: Option<KalshiCredentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client, creds }
    }

    pub fn from_env() -> Self {
        Self::new(KalshiCredentials::from_env())
    }

    fn auth_headers(&self, method: &str, path: &str) -> Result<Vec<(String, String)>, VenueError> {
        let creds = self
            .creds
            .as_ref()
            .ok_or_else(|| VenueError::Rejected("no Kalshi credentials configured".into()))?;
        let ts = Utc::now().timestamp_millis();
        let message = format!("{ts}{method}{path}");
        let mut mac = HmacSha256::new_from_slice(creds.private_key.as_bytes())
            .map_err(|e| VenueError::InvalidResponse(format!("HMAC key error: {e}")))?;
        mac.update(message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok(vec![
            ("KALSHI-ACCESS-KEY".to_string(), creds.key_id.clone()),
            ("KALSHI-ACCESS-TIMESTAMP".to_string(), ts.to_string()),
            ("KALSHI-ACCESS-SIGNATURE".to_string(), signature),
        ])
    }
}

#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    title: String,
    #[serde(default)]
    rules_primary: String,
    close_time: String,
    yes_bid: i64,
    no_bid: i64,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: OrderbookInner,
}

#[derive(Debug, Deserialize, Default)]
struct OrderbookInner {
    yes: Option<Vec<(i64, i64)>>,
    no: Option<Vec<(i64, i64)>>,
}

#[derive(Debug, Serialize)]
struct PlaceOrderPayload {
    ticker: String,
    action: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    count: i64,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    buy_max_cost: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order: Option<PlacedOrder>,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    order: OrderStatusInner,
}

#[derive(Debug, Deserialize)]
struct OrderStatusInner {
    status: String,
    #[serde(default)]
    filled_count: i64,
}

impl KalshiAdapter {
    async fn fetch_markets(&self, ids: &[String]) -> Result<Vec<KalshiMarket>, VenueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tickers = ids.join(",");
        let path = format!("/markets?tickers={tickers}");
        let url = format!("{BASE_URL}{path}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::InvalidResponse(resp.status().to_string()));
        }
        let parsed: MarketsResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        Ok(parsed.markets)
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    async fn find_new_markets(&self, n: usize) -> Result<Vec<String>, VenueError> {
        let path = format!("/markets?limit={n}&status=open");
        let url = format!("{BASE_URL}{path}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::InvalidResponse(resp.status().to_string()));
        }
        let parsed: MarketsResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        Ok(parsed.markets.into_iter().map(|m| m.ticker).collect())
    }

    async fn get_markets(&self, ids: &[String]) -> Result<Vec<Market>, VenueError> {
        let markets = self.fetch_markets(ids).await?;
        Ok(markets
            .into_iter()
            .map(|m| {
                let close_timestamp = chrono::DateTime::parse_from_rfc3339(&m.close_time)
                    .map(|d| d.timestamp())
                    .unwrap_or(0);
                Market {
                    venue: Venue::Kalshi,
                    market_id: m.ticker,
                    name: m.title,
                    rules: m.rules_primary,
                    close_timestamp,
                }
            })
            .collect())
    }

    async fn get_order_books(&self, ids: &[String]) -> Result<Vec<OrderBook>, VenueError> {
        let markets = self.fetch_markets(ids).await?;
        let mut out = Vec::new();
        for market in markets {
            let path = format!("/markets/{}/orderbook", market.ticker);
            let url = format!("{BASE_URL}{path}");
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| VenueError::Transient(e.to_string()))?;
            if !resp.status().is_success() {
                continue;
            }
            let parsed: OrderbookResponse = resp
                .json()
                .await
                .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;

            let mut yes_bids: Vec<Level> = (parsed.orderbook.yes.unwrap_or_default())
                .into_iter()
                .filter(|(p, _)| *p <= market.yes_bid)
                .map(|(p, q)| (p * 10, q * 100))
                .collect();
            let mut no_bids: Vec<Level> = (parsed.orderbook.no.unwrap_or_default())
                .into_iter()
                .filter(|(p, _)| *p <= market.no_bid)
                .map(|(p, q)| (p * 10, q * 100))
                .collect();

            // Synthesize the opposite asks: no_ask = 1000 - yes_bid, yes_ask = 1000 - no_bid,
            // clamped so the synthesized ask never undercuts (crosses) the real opposite bid.
            let best_no_bid = no_bids.iter().map(|(p, _)| *p).max().unwrap_or(0);
            let best_yes_bid = yes_bids.iter().map(|(p, _)| *p).max().unwrap_or(0);
            let mut no_asks: Vec<Level> = yes_bids
                .iter()
                .map(|(p, q)| ((1000 - p).max(best_no_bid), *q))
                .collect();
            let mut yes_asks: Vec<Level> = no_bids
                .iter()
                .map(|(p, q)| ((1000 - p).max(best_yes_bid), *q))
                .collect();

            yes_bids.sort_by_key(|(p, _)| *p);
            yes_asks.sort_by_key(|(p, _)| *p);
            no_bids.sort_by_key(|(p, _)| *p);
            no_asks.sort_by_key(|(p, _)| *p);

            out.push(OrderBook {
                venue: Venue::Kalshi,
                market_id: market.ticker,
                timestamp_ms: Utc::now().timestamp_millis(),
                yes: LevelBook { bid: yes_bids, ask: yes_asks },
                no: LevelBook { bid: no_bids, ask: no_asks },
            });
        }
        Ok(out)
    }

    async fn get_balance(&self) -> Result<f64, VenueError> {
        let path = "/portfolio/balance";
        let headers = self.auth_headers("GET", path)?;
        let url = format!("{BASE_URL}{path}");
        let mut request = self.client.get(&url);
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::InvalidResponse(resp.status().to_string()));
        }
        #[derive(Deserialize)]
        struct BalanceResp {
            balance: i64,
        }
        let parsed: BalanceResp = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        Ok(parsed.balance as f64 / 100.0)
    }

    async fn place_order(&self, order: &mut Order) -> Result<(), VenueError> {
        let side_str = match order.side {
            crate::models::Side::Yes => "yes",
            crate::models::Side::No => "no",
        };
        let payload = PlaceOrderPayload {
            ticker: order.market_id.clone(),
            action: "buy".to_string(),
            order_type: "market".to_string(),
            side: side_str.to_string(),
            count: order.size,
            client_order_id: order.client_order_id.clone(),
            buy_max_cost: order.max_price.map(|p| (p / 10) * order.size),
        };
        let path = "/portfolio/orders";
        let headers = self.auth_headers("POST", path)?;
        let url = format!("{BASE_URL}{path}");
        let mut request = self.client.post(&url);
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            order.status = OrderStatus::Failed;
            return Ok(());
        }
        let parsed: PlaceOrderResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        match parsed.order {
            Some(o) => {
                order.venue_order_id = Some(o.order_id);
                order.status = OrderStatus::Open;
            }
            None => order.status = OrderStatus::Failed,
        }
        Ok(())
    }

    async fn cancel_order(&self, order: &mut Order) -> Result<(), VenueError> {
        let Some(venue_order_id) = order.venue_order_id.clone() else {
            return Ok(());
        };
        let path = format!("/portfolio/orders/{venue_order_id}");
        let headers = self.auth_headers("DELETE", &path)?;
        let url = format!("{BASE_URL}{path}");
        let mut request = self.client.delete(&url);
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if resp.status().is_success() {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn get_order_status(&self, order: &mut Order) -> Result<Vec<Trade>, VenueError> {
        let Some(venue_order_id) = order.venue_order_id.clone() else {
            return Ok(Vec::new());
        };
        let path = format!("/portfolio/orders/{venue_order_id}");
        let headers = self.auth_headers("GET", &path)?;
        let url = format!("{BASE_URL}{path}");
        let mut request = self.client.get(&url);
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let parsed: OrderStatusResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;

        let mut trades = Vec::new();
        if parsed.order.filled_count > order.fill_size {
            trades.push(Trade {
                order_id: order.id.unwrap_or(0),
                venue_trade_id: format!("{venue_order_id}-{}", parsed.order.filled_count),
                quantity: parsed.order.filled_count - order.fill_size,
                price: order.price.or(order.max_price).unwrap_or(0),
                executed_at: Utc::now(),
            });
        }
        order.fill_size = parsed.order.filled_count;
        order.status = match parsed.order.status.as_str() {
            "executed" | "filled" => OrderStatus::Executed,
            "canceled" => OrderStatus::Canceled,
            _ if order.fill_size >= order.size => OrderStatus::Executed,
            _ if order.fill_size > 0 => OrderStatus::PartiallyFilled,
            _ => order.status,
        };
        Ok(trades)
    }

    fn venue(&self) -> Venue {
        Venue::Kalshi
    }
}

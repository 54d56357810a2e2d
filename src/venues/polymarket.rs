//! Polymarket venue adapter: CLOB for order books/placement, Gamma for
//! market metadata. Grounded on `scrapers::polymarket_api::PolymarketScraper`
//! (rate limiter, exponential-backoff retry) and
//! `vault::execution::PolymarketClobAdapter` (HMAC L2 auth, balance/order
//! placement).
//!
//! Polymarket quotes prices as decimal-dollar strings (`"0.4500"`); this
//! adapter is the sole site responsible for converting to tenths of a cent.
//! `Market::market_id` everywhere else in this crate is the Gamma condition
//! id, but the CLOB only understands per-outcome token ids, so this adapter
//! resolves the YES/NO `clobTokenIds` for a condition id (via Gamma) before
//! every CLOB book lookup or order placement, the same two-step resolution
//! the original's `PolyMarketPlatform` performs.

use super::VenueAdapter;
use crate::error::VenueError;
use crate::models::{Level, LevelBook, Market, Order, OrderBook, OrderStatus, Side, Trade, Venue};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const CLOB_API_BASE: &str = "https://clob.polymarket.com";
const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// Polymarket's practical floor on CLOB order size.
pub const MIN_ORDER_SIZE: i64 = 5;

type HmacSha256 = Hmac<Sha256>;
use sha2::Sha256;

struct RateLimiter {
    requests_per_10s: u32,
    current_requests: u32,
    window_start: std::time::Instant,
}

impl RateLimiter {
    fn new(requests_per_10s: u32) -> Self {
        Self {
            requests_per_10s,
            current_requests: 0,
            window_start: std::time::Instant::now(),
        }
    }

    async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(10) {
            self.current_requests = 0;
            self.window_start = std::time::Instant::now();
        }
        if self.current_requests >= self.requests_per_10s {
            let wait = Duration::from_secs(10).saturating_sub(elapsed);
            if wait > Duration::ZERO {
                sleep(wait).await;
                self.current_requests = 0;
                self.window_start = std::time::Instant::now();
            }
        }
        self.current_requests += 1;
    }
}

#[derive(Debug, Clone)]
pub struct PolymarketCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl PolymarketCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api_key: std::env::var("POLYMARKET_CLOB_API_KEY").ok()?,
            secret: std::env::var("POLYMARKET_CLOB_SECRET").ok()?,
            passphrase: std::env::var("POLYMARKET_CLOB_PASSPHRASE").ok()?,
        })
    }
}

pub struct PolymarketAdapter {
    client: Client,
    creds: Option<PolymarketCredentials>,
    limiter: tokio::sync::Mutex<RateLimiter>,
}

impl PolymarketAdapter {
    pub fn new(creds: Option<PolymarketCredentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("eventarb/0.1 (arbitrage engine)")
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            creds,
            limiter: tokio::sync::Mutex::new(RateLimiter::new(500)),
        }
    }

    pub fn from_env() -> Self {
        Self::new(PolymarketCredentials::from_env())
    }

    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, VenueError> {
        self.limiter.lock().await.acquire().await;
        let mut backoff = INITIAL_BACKOFF_MS;
        for attempt in 0..MAX_RETRIES {
            let request = self.client.get(url).query(params);
            match timeout(Duration::from_secs(10), request.send()).await {
                Ok(Ok(resp)) => {
                    if resp.status().is_success() {
                        return Ok(resp);
                    } else if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt, "polymarket rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        return Err(VenueError::InvalidResponse(format!("{status}: {text}")));
                    }
                }
                Ok(Err(e)) => warn!(attempt, "polymarket request failed: {e}"),
                Err(_) => warn!(attempt, "polymarket request timed out"),
            }
            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        Err(VenueError::Transient(format!("max retries exceeded for {url}")))
    }

    fn sign(&self, creds: &PolymarketCredentials, method: &str, path: &str, body: &str, ts: i64) -> Result<String, VenueError> {
        let message = format!("{ts}{method}{path}{body}");
        let secret_bytes = URL_SAFE
            .decode(&creds.secret)
            .or_else(|_| URL_SAFE_NO_PAD.decode(&creds.secret))
            .or_else(|_| BASE64.decode(&creds.secret))
            .map_err(|e| VenueError::InvalidResponse(format!("bad CLOB secret: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| VenueError::InvalidResponse(format!("HMAC key error: {e}")))?;
        mac.update(message.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>, VenueError> {
        let creds = self
            .creds
            .as_ref()
            .ok_or_else(|| VenueError::Rejected("no CLOB credentials configured".into()))?;
        let ts = Utc::now().timestamp();
        let sig = self.sign(creds, method, path, body, ts)?;
        Ok(vec![
            ("POLY_API_KEY".to_string(), creds.api_key.clone()),
            ("POLY_SIGNATURE".to_string(), sig),
            ("POLY_TIMESTAMP".to_string(), ts.to_string()),
            ("POLY_PASSPHRASE".to_string(), creds.passphrase.clone()),
        ])
    }

    /// Dollar string ("0.4500") -> integer tenths of a cent.
    fn to_tenths_cent(price: &str) -> Cents10Result {
        price
            .parse::<f64>()
            .map(|p| (p * 1000.0).round() as i64)
            .map_err(|e| VenueError::InvalidResponse(format!("bad price {price}: {e}")))
    }

    fn levels_from(levels: &[ClobLevel]) -> Result<Vec<Level>, VenueError> {
        let mut out: Vec<Level> = levels
            .iter()
            .map(|l| -> Result<Level, VenueError> {
                let price = Self::to_tenths_cent(&l.price)?;
                let qty = (l.size.parse::<f64>().unwrap_or(0.0) * 100.0).round() as i64;
                Ok((price, qty))
            })
            .collect::<Result<_, _>>()?;
        out.sort_by_key(|(price, _)| *price);
        Ok(out)
    }

    /// Resolves a Gamma condition id to its (yes_token_id, no_token_id) CLOB pair.
    async fn resolve_token_ids(&self, condition_id: &str) -> Result<(String, String), VenueError> {
        let url = format!("{GAMMA_API_BASE}/markets");
        let resp = self
            .get_with_retry(&url, &[("condition_ids", condition_id.to_string())])
            .await?;
        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        let market = markets
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::InvalidResponse(format!("unknown market {condition_id}")))?;
        let ids: Vec<String> = market
            .clob_token_ids
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| VenueError::InvalidResponse(format!("missing clobTokenIds for {condition_id}")))?;
        let yes = ids
            .first()
            .cloned()
            .ok_or_else(|| VenueError::InvalidResponse(format!("clobTokenIds empty for {condition_id}")))?;
        let no = ids
            .get(1)
            .cloned()
            .ok_or_else(|| VenueError::InvalidResponse(format!("clobTokenIds missing NO id for {condition_id}")))?;
        Ok((yes, no))
    }

    async fn fetch_clob_book(&self, token_id: &str) -> Result<ClobBook, VenueError> {
        let url = format!("{CLOB_API_BASE}/book");
        let resp = self.get_with_retry(&url, &[("token_id", token_id.to_string())]).await?;
        resp.json().await.map_err(|e| VenueError::InvalidResponse(e.to_string()))
    }
}

type Cents10Result = Result<i64, VenueError>;

#[derive(Debug, Deserialize)]
struct ClobLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ClobBook {
    bids: Vec<ClobLevel>,
    asks: Vec<ClobLevel>,
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(rename = "conditionId")]
    condition_id: String,
    question: String,
    description: Option<String>,
    #[serde(rename = "endDateIso")]
    end_date_iso: Option<String>,
    /// JSON-encoded `["<yes_token_id>", "<no_token_id>"]`, per the Gamma API.
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClobOrderPayload {
    #[serde(rename = "tokenID")]
    token_id: String,
    price: String,
    size: String,
    side: String,
}

#[derive(Debug, Deserialize)]
struct ClobOrderResponse {
    #[serde(rename = "orderID", alias = "orderId")]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", alias = "error", default)]
    error_msg: Option<String>,
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    async fn find_new_markets(&self, n: usize) -> Result<Vec<String>, VenueError> {
        let url = format!("{GAMMA_API_BASE}/markets");
        let resp = self
            .get_with_retry(&url, &[("limit", n.to_string()), ("active", "true".into())])
            .await?;
        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        Ok(markets.into_iter().take(n).map(|m| m.condition_id).collect())
    }

    async fn get_markets(&self, ids: &[String]) -> Result<Vec<Market>, VenueError> {
        let mut out = Vec::new();
        for id in ids {
            let url = format!("{GAMMA_API_BASE}/markets");
            let resp = self
                .get_with_retry(&url, &[("condition_ids", id.clone())])
                .await?;
            let markets: Vec<GammaMarket> = resp
                .json()
                .await
                .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
            if let Some(m) = markets.into_iter().next() {
                let close_timestamp = m
                    .end_date_iso
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.timestamp())
                    .unwrap_or(0);
                out.push(Market {
                    venue: Venue::Polymarket,
                    market_id: m.condition_id,
                    name: m.question,
                    rules: m.description.unwrap_or_default(),
                    close_timestamp,
                });
            }
        }
        Ok(out)
    }

    async fn get_order_books(&self, ids: &[String]) -> Result<Vec<OrderBook>, VenueError> {
        let mut out = Vec::new();
        for id in ids {
            let (yes_token, no_token) = self.resolve_token_ids(id).await?;
            let yes_book = self.fetch_clob_book(&yes_token).await?;
            let no_book = self.fetch_clob_book(&no_token).await?;

            let yes_ask = Self::levels_from(&yes_book.asks)?;
            let yes_bid = Self::levels_from(&yes_book.bids)?;
            let no_ask = Self::levels_from(&no_book.asks)?;
            let no_bid = Self::levels_from(&no_book.bids)?;

            out.push(OrderBook {
                venue: Venue::Polymarket,
                market_id: id.clone(),
                timestamp_ms: Utc::now().timestamp_millis(),
                yes: LevelBook { bid: yes_bid, ask: yes_ask },
                no: LevelBook { bid: no_bid, ask: no_ask },
            });
        }
        Ok(out)
    }

    async fn get_balance(&self) -> Result<f64, VenueError> {
        let path = "/balance-allowance?signature_type=2";
        let headers = self.auth_headers("GET", path, "")?;
        let url = format!("{CLOB_API_BASE}{path}");
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
        let text = resp.text().await.unwrap_or_default();
        let map: std::collections::HashMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        let balance = map
            .get("balance")
            .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
            .unwrap_or(0.0);
        Ok(balance / 1_000_000.0)
    }

    async fn place_order(&self, order: &mut Order) -> Result<(), VenueError> {
        if order.size < MIN_ORDER_SIZE {
            order.status = OrderStatus::Failed;
            return Ok(());
        }
        let price = order
            .max_price
            .or(order.price)
            .ok_or_else(|| VenueError::Rejected("order has no price".into()))?;
        let (yes_token, no_token) = self.resolve_token_ids(&order.market_id).await?;
        let token_id = match order.side {
            Side::Yes => yes_token,
            Side::No => no_token,
        };
        let payload = ClobOrderPayload {
            token_id,
            price: format!("{:.4}", price as f64 / 1000.0),
            size: format!("{}", order.size),
            side: "BUY".to_string(),
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        let path = "/order";
        let headers = self.auth_headers("POST", path, &body)?;
        let url = format!("{CLOB_API_BASE}{path}");
        let mut request = self.client.post(&url).header("Content-Type", "application/json");
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .body(body)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            order.status = OrderStatus::Failed;
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        let parsed: ClobOrderResponse = serde_json::from_str(&text).unwrap_or(ClobOrderResponse {
            order_id: None,
            error_msg: None,
        });
        if let Some(err) = parsed.error_msg.filter(|e| !e.is_empty()) {
            debug!(error = %err, "polymarket rejected order");
            order.status = OrderStatus::Failed;
            return Ok(());
        }
        order.venue_order_id = Some(parsed.order_id.unwrap_or_else(|| order.client_order_id.clone()));
        order.status = OrderStatus::Open;
        Ok(())
    }

    async fn cancel_order(&self, order: &mut Order) -> Result<(), VenueError> {
        let Some(venue_order_id) = order.venue_order_id.clone() else {
            return Ok(());
        };
        let path = "/order";
        let body = serde_json::json!({ "orderID": venue_order_id }).to_string();
        let headers = self.auth_headers("DELETE", path, &body)?;
        let url = format!("{CLOB_API_BASE}{path}");
        let mut request = self.client.delete(&url).header("Content-Type", "application/json");
        for (k, v) in headers {
            request = request.header(&k, &v);
        }
        let resp = request
            .body(body)
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
        let path = format!("/data/order/{venue_order_id}");
        let headers = self.auth_headers("GET", &path, "")?;
        let url = format!("{CLOB_API_BASE}{path}");
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
        #[derive(Deserialize)]
        struct StatusResp {
            status: Option<String>,
            #[serde(rename = "sizeMatched", default)]
            size_matched: Option<String>,
        }
        let text = resp.text().await.unwrap_or_default();
        let parsed: StatusResp = serde_json::from_str(&text).unwrap_or(StatusResp {
            status: None,
            size_matched: None,
        });
        let new_fill: i64 = parsed
            .size_matched
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| f.round() as i64)
            .unwrap_or(order.fill_size);

        let mut trades = Vec::new();
        if new_fill > order.fill_size {
            trades.push(Trade {
                order_id: order.id.unwrap_or(0),
                venue_trade_id: format!("{venue_order_id}-{new_fill}"),
                quantity: new_fill - order.fill_size,
                price: order.price.or(order.max_price).unwrap_or(0),
                executed_at: Utc::now(),
            });
        }
        order.fill_size = new_fill;
        order.status = match parsed.status.as_deref() {
            Some("FILLED") => OrderStatus::Executed,
            Some("CANCELED") => OrderStatus::Canceled,
            _ if order.fill_size >= order.size => OrderStatus::Executed,
            _ if order.fill_size > 0 => OrderStatus::PartiallyFilled,
            _ => order.status,
        };
        Ok(trades)
    }

    fn venue(&self) -> Venue {
        Venue::Polymarket
    }
}

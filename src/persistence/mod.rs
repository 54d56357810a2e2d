//! Durable persistence for markets, pairs, order books (audit only), orders,
//! and trades. Backed by rusqlite behind an `Arc<tokio::sync::Mutex<Connection>>`,
//! grounded on `vault::vault_db::VaultDb` (WAL mode, `prepare_cached`,
//! `ON CONFLICT DO UPDATE` / `INSERT OR REPLACE` for idempotency). Uniqueness
//! violations on `market_id`, the canonical pair key, and `client_order_id`
//! are caught and ignored -- insertion is meant to be idempotent under
//! at-least-once log delivery.

use crate::models::{
    Market, MarketPair, Order, OrderBook, OrderStatus, Side, Trade, Venue,
};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

impl Persistence {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open persistence db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS markets (
                venue TEXT NOT NULL,
                market_id TEXT NOT NULL,
                name TEXT NOT NULL,
                rules TEXT NOT NULL,
                close_timestamp INTEGER NOT NULL,
                PRIMARY KEY (venue, market_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS market_pairs (
                market_id_1 TEXT NOT NULL,
                venue_1 TEXT NOT NULL,
                market_id_2 TEXT NOT NULL,
                venue_2 TEXT NOT NULL,
                PRIMARY KEY (market_id_1, market_id_2)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS order_books (
                venue TEXT NOT NULL,
                market_id TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_order_books_market_ts
             ON order_books(venue, market_id, timestamp_ms DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_order_id TEXT NOT NULL UNIQUE,
                venue TEXT NOT NULL,
                market_id TEXT NOT NULL,
                side TEXT NOT NULL,
                action TEXT NOT NULL,
                order_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                price INTEGER,
                max_price INTEGER,
                time_in_force TEXT NOT NULL,
                venue_order_id TEXT,
                status TEXT NOT NULL,
                fill_size INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                order_id INTEGER NOT NULL,
                venue_trade_id TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price INTEGER NOT NULL,
                executed_at TEXT NOT NULL,
                PRIMARY KEY (order_id, venue_trade_id)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---------------------------------------------------------------- markets

    /// Upsert by `(venue, market_id)`; re-ingest replaces the row in place.
    pub async fn upsert_market(&self, market: &Market) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO markets (venue, market_id, name, rules, close_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(venue, market_id) DO UPDATE SET
                name = excluded.name,
                rules = excluded.rules,
                close_timestamp = excluded.close_timestamp",
            params![
                market.venue.as_str(),
                market.market_id,
                market.name,
                market.rules,
                market.close_timestamp,
            ],
        )?;
        Ok(())
    }

    /// Batch existence check: returns the subset of `(venue, market_id)`
    /// pairs already present.
    pub async fn markets_exist(&self, ids: &[(Venue, String)]) -> Result<Vec<(Venue, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached("SELECT 1 FROM markets WHERE venue = ?1 AND market_id = ?2")?;
        let mut out = Vec::new();
        for (venue, market_id) in ids {
            let exists: Option<i64> = stmt
                .query_row(params![venue.as_str(), market_id], |r| r.get(0))
                .optional()?;
            if exists.is_some() {
                out.push((*venue, market_id.clone()));
            }
        }
        Ok(out)
    }

    pub async fn get_market(&self, venue: Venue, market_id: &str) -> Result<Option<Market>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT venue, market_id, name, rules, close_timestamp
             FROM markets WHERE venue = ?1 AND market_id = ?2",
        )?;
        stmt.query_row(params![venue.as_str(), market_id], |row| {
            let venue_str: String = row.get(0)?;
            Ok(Market {
                venue: Venue::parse(&venue_str).unwrap_or(Venue::Test),
                market_id: row.get(1)?,
                name: row.get(2)?,
                rules: row.get(3)?,
                close_timestamp: row.get(4)?,
            })
        })
        .optional()
        .context("fetch market")
    }

    /// All persisted markets; used to re-seed an in-process similarity
    /// index on stage startup.
    pub async fn list_all_markets(&self) -> Result<Vec<Market>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT venue, market_id, name, rules, close_timestamp FROM markets",
        )?;
        let rows = stmt.query_map([], |row| {
            let venue_str: String = row.get(0)?;
            Ok(Market {
                venue: Venue::parse(&venue_str).unwrap_or(Venue::Test),
                market_id: row.get(1)?,
                name: row.get(2)?,
                rules: row.get(3)?,
                close_timestamp: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ----------------------------------------------------------- market pairs

    /// Insert-or-ignore on the canonical `(market_id_1, market_id_2)` key.
    /// Returns `true` if a new row was inserted.
    pub async fn insert_pair_if_new(&self, pair: &MarketPair) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO market_pairs (market_id_1, venue_1, market_id_2, venue_2)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pair.market_id_1,
                pair.venue_1.as_str(),
                pair.market_id_2,
                pair.venue_2.as_str(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub async fn list_pairs(&self) -> Result<Vec<MarketPair>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT market_id_1, venue_1, market_id_2, venue_2 FROM market_pairs",
        )?;
        let rows = stmt.query_map([], |row| {
            let venue_1: String = row.get(1)?;
            let venue_2: String = row.get(3)?;
            Ok(MarketPair {
                market_id_1: row.get(0)?,
                venue_1: Venue::parse(&venue_1).unwrap_or(Venue::Test),
                market_id_2: row.get(2)?,
                venue_2: Venue::parse(&venue_2).unwrap_or(Venue::Test),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ----------------------------------------------------------- order books

    /// Audit-only insert; never read back by the pipeline.
    pub async fn insert_order_books(&self, books: &[OrderBook]) -> Result<()> {
        let conn = self.conn.lock().await;
        for book in books {
            let payload = serde_json::to_string(book)?;
            conn.execute(
                "INSERT INTO order_books (venue, market_id, timestamp_ms, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![book.venue.as_str(), book.market_id, book.timestamp_ms, payload],
            )?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------- orders

    pub async fn insert_order(&self, order: &Order) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO orders
               (client_order_id, venue, market_id, side, action, order_type,
                size, price, max_price, time_in_force, venue_order_id, status, fill_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(client_order_id) DO NOTHING",
            params![
                order.client_order_id,
                order.venue.as_str(),
                order.market_id,
                side_str(order.side),
                action_str(order.action),
                order_type_str(order.order_type),
                order.size,
                order.price,
                order.max_price,
                tif_str(order.time_in_force),
                order.venue_order_id,
                status_str(order.status),
                order.fill_size,
            ],
        )?;
        conn.query_row(
            "SELECT id FROM orders WHERE client_order_id = ?1",
            params![order.client_order_id],
            |row| row.get(0),
        )
        .context("fetch inserted order id")
    }

    pub async fn update_order(&self, order: &Order) -> Result<()> {
        let Some(id) = order.id else {
            anyhow::bail!("cannot update an order with no persisted id");
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE orders SET status = ?1, fill_size = ?2, venue_order_id = ?3 WHERE id = ?4",
            params![
                status_str(order.status),
                order.fill_size,
                order.venue_order_id,
                id,
            ],
        )?;
        Ok(())
    }

    /// Orders whose status is PENDING, OPEN, or PARTIALLY_FILLED.
    pub async fn non_terminal_orders(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, client_order_id, venue, market_id, side, action, order_type,
                    size, price, max_price, time_in_force, venue_order_id, status, fill_size
             FROM orders WHERE status IN ('pending', 'open', 'partially_filled')",
        )?;
        let rows = stmt.query_map([], row_to_order)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All persisted orders for a venue/market, terminal or not, newest first.
    pub async fn orders_for_market(&self, venue: Venue, market_id: &str) -> Result<Vec<Order>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, client_order_id, venue, market_id, side, action, order_type,
                    size, price, max_price, time_in_force, venue_order_id, status, fill_size
             FROM orders WHERE venue = ?1 AND market_id = ?2 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![venue.as_str(), market_id], row_to_order)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------- trades

    pub async fn insert_trades(&self, trades: &[Trade]) -> Result<()> {
        let conn = self.conn.lock().await;
        for trade in trades {
            conn.execute(
                "INSERT OR IGNORE INTO trades (order_id, venue_trade_id, quantity, price, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    trade.order_id,
                    trade.venue_trade_id,
                    trade.quantity,
                    trade.price,
                    trade.executed_at.to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Yes => "yes",
        Side::No => "no",
    }
}
fn action_str(a: crate::models::Action) -> &'static str {
    match a {
        crate::models::Action::Buy => "buy",
        crate::models::Action::Sell => "sell",
    }
}
fn order_type_str(t: crate::models::OrderType) -> &'static str {
    match t {
        crate::models::OrderType::Limit => "limit",
        crate::models::OrderType::Market => "market",
    }
}
fn tif_str(t: crate::models::TimeInForce) -> &'static str {
    match t {
        crate::models::TimeInForce::Gtc => "gtc",
        crate::models::TimeInForce::Ioc => "ioc",
        crate::models::TimeInForce::Fok => "fok",
    }
}
fn status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::Pending => "pending",
        OrderStatus::Open => "open",
        OrderStatus::PartiallyFilled => "partially_filled",
        OrderStatus::Executed => "executed",
        OrderStatus::Canceled => "canceled",
        OrderStatus::Failed => "failed",
    }
}

fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let venue_str: String = row.get(2)?;
    let side_str: String = row.get(4)?;
    let action_str: String = row.get(5)?;
    let order_type_str: String = row.get(6)?;
    let tif_str: String = row.get(10)?;
    let status_str: String = row.get(12)?;

    Ok(Order {
        id: row.get(0)?,
        client_order_id: row.get(1)?,
        venue: Venue::parse(&venue_str).unwrap_or(Venue::Test),
        market_id: row.get(3)?,
        side: if side_str == "yes" { Side::Yes } else { Side::No },
        action: if action_str == "buy" {
            crate::models::Action::Buy
        } else {
            crate::models::Action::Sell
        },
        order_type: if order_type_str == "limit" {
            crate::models::OrderType::Limit
        } else {
            crate::models::OrderType::Market
        },
        size: row.get(7)?,
        price: row.get(8)?,
        max_price: row.get(9)?,
        time_in_force: match tif_str.as_str() {
            "ioc" => crate::models::TimeInForce::Ioc,
            "fok" => crate::models::TimeInForce::Fok,
            _ => crate::models::TimeInForce::Gtc,
        },
        venue_order_id: row.get(11)?,
        status: match status_str.as_str() {
            "open" => OrderStatus::Open,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "executed" => OrderStatus::Executed,
            "canceled" => OrderStatus::Canceled,
            "failed" => OrderStatus::Failed,
            _ => OrderStatus::Pending,
        },
        fill_size: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    async fn test_db() -> Persistence {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        Persistence::open(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn market_upsert_is_idempotent() {
        let db = test_db().await;
        let market = Market {
            venue: Venue::Polymarket,
            market_id: "m1".into(),
            name: "will it rain".into(),
            rules: "r".into(),
            close_timestamp: 100,
        };
        db.upsert_market(&market).await.unwrap();
        db.upsert_market(&market).await.unwrap();
        let fetched = db.get_market(Venue::Polymarket, "m1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "will it rain");
    }

    #[tokio::test]
    async fn pair_insertion_is_idempotent() {
        let db = test_db().await;
        let pair = MarketPair {
            market_id_1: "a".into(),
            venue_1: Venue::Polymarket,
            market_id_2: "b".into(),
            venue_2: Venue::Kalshi,
        };
        assert!(db.insert_pair_if_new(&pair).await.unwrap());
        assert!(!db.insert_pair_if_new(&pair).await.unwrap());
        assert_eq!(db.list_pairs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn order_lifecycle_round_trips() {
        let db = test_db().await;
        let mut order = Order::market_buy(Venue::Polymarket, "m1", Side::Yes, 10, 400);
        let id = db.insert_order(&order).await.unwrap();
        order.id = Some(id);
        order.status = OrderStatus::Open;
        db.update_order(&order).await.unwrap();

        let pending = db.non_terminal_orders().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, OrderStatus::Open);
    }
}

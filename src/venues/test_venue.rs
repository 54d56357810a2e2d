//! In-memory venue adapter for integration tests and the executor's
//! chunk-barrier tests (scenarios S5/S6). Orders fill instantly and fully
//! unless the call index is in `fail_on_placement`, in which case placement
//! is rejected (mirrors a venue returning FAILED for one chunk mid-run).

use super::VenueAdapter;
use crate::error::VenueError;
use crate::models::{Market, Order, OrderBook, OrderStatus, Trade, Venue};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct TestVenueAdapter {
    books: Mutex<HashMap<String, OrderBook>>,
    markets: Mutex<HashMap<String, Market>>,
    placements: Mutex<usize>,
    fail_on_placement: HashSet<usize>,
}

impl TestVenueAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the `n`th call to `place_order` (0-indexed) to fail instead
    /// of filling.
    pub fn failing_on(mut self, call_index: usize) -> Self {
        self.fail_on_placement.insert(call_index);
        self
    }

    pub fn with_market(self, market: Market) -> Self {
        self.markets.lock().insert(market.market_id.clone(), market);
        self
    }

    pub fn with_order_book(self, book: OrderBook) -> Self {
        self.books.lock().insert(book.market_id.clone(), book);
        self
    }
}

#[async_trait]
impl VenueAdapter for TestVenueAdapter {
    async fn find_new_markets(&self, n: usize) -> Result<Vec<String>, VenueError> {
        Ok(self.markets.lock().keys().take(n).cloned().collect())
    }

    async fn get_markets(&self, ids: &[String]) -> Result<Vec<Market>, VenueError> {
        let markets = self.markets.lock();
        Ok(ids.iter().filter_map(|id| markets.get(id).cloned()).collect())
    }

    async fn get_order_books(&self, ids: &[String]) -> Result<Vec<OrderBook>, VenueError> {
        let books = self.books.lock();
        Ok(ids.iter().filter_map(|id| books.get(id).cloned()).collect())
    }

    async fn get_balance(&self) -> Result<f64, VenueError> {
        Ok(1_000_000.0)
    }

    async fn place_order(&self, order: &mut Order) -> Result<(), VenueError> {
        let index = {
            let mut placements = self.placements.lock();
            let i = *placements;
            *placements += 1;
            i
        };
        if self.fail_on_placement.contains(&index) {
            order.status = OrderStatus::Failed;
            return Ok(());
        }
        order.venue_order_id = Some(format!("test-{index}"));
        order.status = OrderStatus::Open;
        Ok(())
    }

    async fn cancel_order(&self, order: &mut Order) -> Result<(), VenueError> {
        if !order.status.is_terminal() {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn get_order_status(&self, order: &mut Order) -> Result<Vec<Trade>, VenueError> {
        if order.status == OrderStatus::Open || order.status == OrderStatus::PartiallyFilled {
            let filled_now = order.size - order.fill_size;
            order.fill_size = order.size;
            order.status = OrderStatus::Executed;
            if filled_now > 0 {
                return Ok(vec![Trade {
                    order_id: order.id.unwrap_or(0),
                    venue_trade_id: format!("{}-fill", order.venue_order_id.clone().unwrap_or_default()),
                    quantity: filled_now,
                    price: order.price.or(order.max_price).unwrap_or(0),
                    executed_at: Utc::now(),
                }]);
            }
        }
        Ok(Vec::new())
    }

    fn venue(&self) -> Venue {
        Venue::Test
    }
}

//! Venue Adapter: one interface (this trait), one concrete implementation
//! per venue, injected by configuration. No dynamic per-venue subclassing,
//! no module-global HTTP session -- each adapter owns its own client.

pub mod kalshi;
pub mod polymarket;
pub mod test_venue;

use crate::error::VenueError;
use crate::models::{Market, Order, OrderBook, Trade};
use async_trait::async_trait;

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Up to `n` ids of currently-tradable markets, newest-first.
    async fn find_new_markets(&self, n: usize) -> Result<Vec<String>, VenueError>;

    /// Full Market records for the given ids. Skips unknown ids.
    async fn get_markets(&self, ids: &[String]) -> Result<Vec<Market>, VenueError>;

    /// OrderBook per id, prices in tenths of cent, ascending by price.
    async fn get_order_books(&self, ids: &[String]) -> Result<Vec<OrderBook>, VenueError>;

    /// Available cash, unit dollars.
    async fn get_balance(&self) -> Result<f64, VenueError>;

    /// Mutates `order.venue_order_id` and `order.status` in place.
    async fn place_order(&self, order: &mut Order) -> Result<(), VenueError>;

    /// Requests cancellation; sets status to Canceled on acceptance.
    async fn cancel_order(&self, order: &mut Order) -> Result<(), VenueError>;

    /// Refreshes `order.status`/`order.fill_size`; returns any new Trades
    /// observed since the last call.
    async fn get_order_status(&self, order: &mut Order) -> Result<Vec<Trade>, VenueError>;

    fn venue(&self) -> crate::models::Venue;
}

pub use kalshi::KalshiAdapter;
pub use polymarket::PolymarketAdapter;
pub use test_venue::TestVenueAdapter;

use std::collections::HashMap;

/// The two real venues, credentials loaded from the environment (absent
/// credentials only fail the authenticated calls, not construction).
pub fn all_from_env() -> HashMap<crate::models::Venue, Box<dyn VenueAdapter>> {
    let mut adapters: HashMap<crate::models::Venue, Box<dyn VenueAdapter>> = HashMap::new();
    let polymarket = PolymarketAdapter::from_env();
    let kalshi = KalshiAdapter::from_env();
    adapters.insert(polymarket.venue(), Box::new(polymarket));
    adapters.insert(kalshi.venue(), Box::new(kalshi));
    adapters
}

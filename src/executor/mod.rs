//! Chunked symmetric execution: an opportunity's shares are bought in equal
//! chunks on both legs, with a wait-for-both barrier between chunks. Any
//! leg failure aborts the whole opportunity and cancels the other leg.
//! Grounded on `ExecuteArbitrage.py`'s `place_arbitrage_orders`/`_wait_for_execution`.

use crate::error::VenueError;
use crate::models::{Market, Opportunity, OpportunityType, Order, OrderStatus, Side, Trade};
use crate::persistence::Persistence;
use crate::venues::VenueAdapter;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_PRICE_CLAMP_LOW: i64 = 1;
const MAX_PRICE_CLAMP_HIGH: i64 = 999;

fn clamp_price(p: i64) -> i64 {
    p.clamp(MAX_PRICE_CLAMP_LOW, MAX_PRICE_CLAMP_HIGH)
}

/// Runs one opportunity to completion or abort. Returns `Ok(true)` if every
/// chunk filled, `Ok(false)` if it aborted cleanly (no orphaned exposure on
/// either leg beyond `chunk_size`).
pub async fn execute_opportunity(
    market1: &Market,
    market2: &Market,
    venue1: &dyn VenueAdapter,
    venue2: &dyn VenueAdapter,
    persistence: &Persistence,
    opportunity: &Opportunity,
    poll_timeout: Duration,
) -> anyhow::Result<bool> {
    let total_shares = opportunity.shares;
    let mut shares_executed = 0i64;
    let chunk_size = std::cmp::max(1, total_shares / 10);

    let (side1, side2) = match opportunity.opportunity_type {
        OpportunityType::Yes1No2 => (Side::Yes, Side::No),
        OpportunityType::Yes2No1 => (Side::No, Side::Yes),
    };
    let max_price_1 = clamp_price(opportunity.max_price_1);
    let max_price_2 = clamp_price(opportunity.max_price_2);

    info!(
        pair = %opportunity.pair_key,
        total_shares,
        chunk_size,
        "starting chunked execution"
    );

    while shares_executed < total_shares {
        let this_chunk = std::cmp::min(chunk_size, total_shares - shares_executed);

        let mut order1 = Order::market_buy(market1.venue, market1.market_id.clone(), side1, this_chunk, max_price_1);
        let mut order2 = Order::market_buy(market2.venue, market2.market_id.clone(), side2, this_chunk, max_price_2);

        if let Err(reason) = place_and_record(venue1, &mut order1, persistence).await {
            warn!(%reason, "transient error placing leg 1, leaving opportunity for retry");
            return Err(reason);
        }
        if let Err(reason) = place_and_record(venue2, &mut order2, persistence).await {
            warn!(%reason, "transient error placing leg 2, aborting leg 1 and leaving opportunity for retry");
            abort_leg(venue1, &mut order1, persistence).await;
            return Err(reason);
        }

        debug_assert!((order1.size - order2.size).abs() <= chunk_size);

        if order1.status == OrderStatus::Failed || order2.status == OrderStatus::Failed {
            error!("one or both chunk orders failed on placement, aborting opportunity");
            abort_leg(venue1, &mut order1, persistence).await;
            abort_leg(venue2, &mut order2, persistence).await;
            return Ok(false);
        }

        if !wait_for_both(venue1, &mut order1, venue2, &mut order2, persistence, poll_timeout).await? {
            error!("chunk did not confirm execution within timeout, halting opportunity");
            return Ok(false);
        }

        shares_executed += this_chunk;
        info!(shares_executed, total_shares, "chunk filled");
    }

    info!(pair = %opportunity.pair_key, total_shares, "opportunity fully executed");
    Ok(true)
}

async fn place_and_record(
    venue: &dyn VenueAdapter,
    order: &mut Order,
    persistence: &Persistence,
) -> anyhow::Result<()> {
    match venue.place_order(order).await {
        Ok(()) => {}
        Err(VenueError::Rejected(reason)) | Err(VenueError::InvalidResponse(reason)) => {
            warn!(reason, "place_order rejected, marking order failed");
            order.status = OrderStatus::Failed;
        }
        // Transient errors are retryable: no order was actually placed, so
        // there's nothing to persist here. Propagate so the caller leaves
        // the opportunity record unacked instead of permanently failing it.
        Err(VenueError::Transient(reason)) => {
            return Err(anyhow::anyhow!("transient venue error placing order: {reason}"));
        }
    }
    let id = persistence.insert_order(order).await?;
    order.id = Some(id);
    persistence.update_order(order).await?;
    Ok(())
}

async fn abort_leg(venue: &dyn VenueAdapter, order: &mut Order, persistence: &Persistence) {
    if !order.status.is_terminal() && order.venue_order_id.is_some() {
        let _ = venue.cancel_order(order).await;
        let _ = persistence.update_order(order).await;
    }
}

/// Polls both legs until both reach EXECUTED, either fails, or the timeout
/// elapses. On failure or timeout, cancels whichever leg is still OPEN.
async fn wait_for_both(
    venue1: &dyn VenueAdapter,
    order1: &mut Order,
    venue2: &dyn VenueAdapter,
    order2: &mut Order,
    persistence: &Persistence,
    timeout: Duration,
) -> anyhow::Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut o1_filled = order1.status == OrderStatus::Executed;
    let mut o2_filled = order2.status == OrderStatus::Executed;

    while tokio::time::Instant::now() < deadline {
        if !o1_filled {
            if let Ok(trades) = poll_order(venue1, order1, persistence).await {
                record_trades(persistence, &trades).await?;
                if order1.status == OrderStatus::Executed {
                    o1_filled = true;
                    info!(order_id = ?order1.id, "leg 1 confirmed executed");
                }
            }
        }
        if !o2_filled {
            if let Ok(trades) = poll_order(venue2, order2, persistence).await {
                record_trades(persistence, &trades).await?;
                if order2.status == OrderStatus::Executed {
                    o2_filled = true;
                    info!(order_id = ?order2.id, "leg 2 confirmed executed");
                }
            }
        }

        if o1_filled && o2_filled {
            return Ok(true);
        }

        let o1_dead = matches!(order1.status, OrderStatus::Canceled | OrderStatus::Failed);
        let o2_dead = matches!(order2.status, OrderStatus::Canceled | OrderStatus::Failed);
        if o1_dead || o2_dead {
            error!("order failed during execution poll, canceling the live leg");
            if matches!(order1.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
                abort_leg(venue1, order1, persistence).await;
            }
            if matches!(order2.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
                abort_leg(venue2, order2, persistence).await;
            }
            return Ok(false);
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    warn!("polling timed out, canceling any still-open legs");
    if matches!(order1.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
        abort_leg(venue1, order1, persistence).await;
    }
    if matches!(order2.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
        abort_leg(venue2, order2, persistence).await;
    }
    Ok(false)
}

async fn poll_order(
    venue: &dyn VenueAdapter,
    order: &mut Order,
    persistence: &Persistence,
) -> anyhow::Result<Vec<Trade>> {
    let trades = venue.get_order_status(order).await?;
    persistence.update_order(order).await?;
    Ok(trades)
}

async fn record_trades(persistence: &Persistence, trades: &[Trade]) -> anyhow::Result<()> {
    if !trades.is_empty() {
        persistence.insert_trades(trades).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;

    fn market(venue: Venue, id: &str) -> Market {
        Market {
            venue,
            market_id: id.into(),
            name: id.into(),
            rules: "r".into(),
            close_timestamp: 0,
        }
    }

    fn opportunity(shares: i64) -> Opportunity {
        Opportunity {
            opportunity_type: OpportunityType::Yes1No2,
            shares,
            total_cost: shares * 900,
            cost_per_share: 0.9,
            max_price_1: 450,
            max_price_2: 450,
            pair_key: "a|b".into(),
        }
    }

    async fn db() -> Persistence {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        Persistence::open(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn s5_happy_path_runs_ten_chunks() {
        let v1 = crate::venues::TestVenueAdapter::new();
        let v2 = crate::venues::TestVenueAdapter::new();
        let persistence = db().await;
        let m1 = market(Venue::Polymarket, "m1");
        let m2 = market(Venue::Kalshi, "m2");
        let opp = opportunity(100);

        let ok = execute_opportunity(&m1, &m2, &v1, &v2, &persistence, &opp, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ok);
        assert!(persistence.non_terminal_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn s6_leg_failure_aborts_and_cancels_other_leg() {
        let v1 = crate::venues::TestVenueAdapter::new();
        // Leg 2's third chunk placement (index 2) fails.
        let v2 = crate::venues::TestVenueAdapter::new().failing_on(2);
        let persistence = db().await;
        let m1 = market(Venue::Polymarket, "m1");
        let m2 = market(Venue::Kalshi, "m2");
        let opp = opportunity(100);

        let ok = execute_opportunity(&m1, &m2, &v1, &v2, &persistence, &opp, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!ok);

        let pending = persistence.non_terminal_orders().await.unwrap();
        assert!(pending.is_empty(), "no order should be left non-terminal after abort");

        let leg1_orders = persistence.orders_for_market(m1.venue, &m1.market_id).await.unwrap();
        let leg2_orders = persistence.orders_for_market(m2.venue, &m2.market_id).await.unwrap();

        let leg1_executed: i64 = leg1_orders.iter().map(|o| o.fill_size).sum();
        let leg2_executed: i64 = leg2_orders.iter().map(|o| o.fill_size).sum();
        assert!(
            (leg1_executed - leg2_executed).abs() <= 10,
            "legs drifted beyond one chunk: leg1={leg1_executed} leg2={leg2_executed}"
        );

        // Leg 2 fails on its third chunk placement, so it never reaches an
        // OPEN venue order; leg 1's in-flight chunk for that round must be
        // the one actually canceled.
        let leg1_last = leg1_orders.first().expect("leg 1 placed at least one order");
        assert_eq!(
            leg1_last.status,
            OrderStatus::Canceled,
            "leg 1's in-flight order should have been canceled when leg 2 failed"
        );
    }
}

//! Reconciliation: on a timer, re-observe every non-terminal Order against
//! venue truth. Never cancels -- only persists whatever the venue reports,
//! so durable state converges after an executor crash.

use crate::persistence::Persistence;
use crate::venues::VenueAdapter;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// One reconciliation pass over all non-terminal orders. `adapters` is keyed
/// by venue so the reconciler can route each order to the right adapter
/// without knowing venue-specific details itself.
pub async fn reconcile_once(
    persistence: &Persistence,
    adapters: &HashMap<crate::models::Venue, Box<dyn VenueAdapter>>,
) -> anyhow::Result<usize> {
    let pending = persistence.non_terminal_orders().await?;
    let mut reconciled = 0;

    for mut order in pending {
        let Some(adapter) = adapters.get(&order.venue) else {
            warn!(venue = ?order.venue, "no adapter configured for venue, skipping order");
            continue;
        };

        match adapter.get_order_status(&mut order).await {
            Ok(trades) => {
                if !trades.is_empty() {
                    persistence.insert_trades(&trades).await?;
                }
                persistence.update_order(&order).await?;
                reconciled += 1;
                info!(
                    order_id = ?order.id,
                    status = ?order.status,
                    fill_size = order.fill_size,
                    "reconciled order"
                );
            }
            Err(reason) => {
                error!(order_id = ?order.id, %reason, "get_order_status failed during reconciliation");
            }
        }
    }

    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, OrderStatus, Side, Venue};
    use crate::venues::TestVenueAdapter;

    async fn db() -> Persistence {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        Persistence::open(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn s7_reconciles_open_order_to_executed() {
        let persistence = db().await;
        let mut order = Order::market_buy(Venue::Test, "m1", Side::Yes, 10, 500);
        order.status = OrderStatus::Open;
        order.venue_order_id = Some("test-0".into());
        let id = persistence.insert_order(&order).await.unwrap();
        order.id = Some(id);
        persistence.update_order(&order).await.unwrap();

        let mut adapters: HashMap<Venue, Box<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Test, Box::new(TestVenueAdapter::new()));

        let n = reconcile_once(&persistence, &adapters).await.unwrap();
        assert_eq!(n, 1);

        let pending = persistence.non_terminal_orders().await.unwrap();
        assert!(pending.is_empty());
    }
}

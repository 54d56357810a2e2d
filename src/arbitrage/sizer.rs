//! The depth-curve arbitrage sizer.
//!
//! Turns two opposing order-book level sequences into the maximum profitable
//! trade quantity under a profit margin, expected slippage, and an optional
//! cost cap. See `calculate` for the entry point.

use crate::models::{Cents10, Level, OpportunityType, Opportunity};

/// One point of the cumulative depth curve built from an ascending level
/// sequence: total quantity through this level, total cost through this
/// level, and this level's own (marginal) price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurvePoint {
    pub cum_qty: i64,
    pub cum_cost: Cents10,
    pub marginal_price: Cents10,
}

/// Builds the cumulative `(cum_qty, cum_cost, marginal_price)` curve from an
/// ascending-by-price level sequence. Assumes the caller's levels are sorted
/// ascending and non-decreasing in marginal price -- the adapter's job, not
/// the sizer's.
pub fn build_curve(levels: &[Level]) -> Vec<CurvePoint> {
    let mut cum_qty = 0i64;
    let mut cum_cost: Cents10 = 0;
    let mut out = Vec::with_capacity(levels.len());
    for &(price, qty) in levels {
        cum_qty += qty;
        cum_cost += price * qty;
        out.push(CurvePoint {
            cum_qty,
            cum_cost,
            marginal_price: price,
        });
    }
    out
}

/// Cost of the first `x` shares from a curve: `cum_cost_i - marginal_price_i *
/// (cum_qty_i - x)` where `i` is the first index with `cum_qty_i >= x`. `None`
/// if `x` exceeds the curve's depth.
pub fn cost_of(x: i64, curve: &[CurvePoint]) -> Option<Cents10> {
    if x <= 0 {
        return Some(0);
    }
    for p in curve {
        if p.cum_qty >= x {
            let deficit = p.cum_qty - x;
            return Some(p.cum_cost - p.marginal_price * deficit);
        }
    }
    None
}

/// The marginal price a curve would charge at depth `x` -- the price of the
/// first level whose cumulative quantity reaches `x`.
fn marginal_price_at(x: i64, curve: &[CurvePoint]) -> Option<Cents10> {
    curve.iter().find(|p| p.cum_qty >= x).map(|p| p.marginal_price)
}

fn depth(curve: &[CurvePoint]) -> i64 {
    curve.last().map(|p| p.cum_qty).unwrap_or(0)
}

/// `ceil(cost * (1 + slippage) * (1 + profit))`, computed in integer tenths
/// of a cent. `cost`, `slippage`, `profit` compose as in spec: required
/// revenue for a trade of combined cost `cost` to clear the profit bar.
fn required_revenue(cost: Cents10, expected_slippage: f64, profit_threshold: f64) -> Cents10 {
    let factor = (1.0 + expected_slippage) * (1.0 + profit_threshold);
    (cost as f64 * factor).ceil() as Cents10
}

struct SizeResult {
    shares: i64,
    total_cost: Cents10,
}

/// Binary-searches `[1, H]` for the largest `X` such that `1000*X >=
/// required_revenue(cost1(X) + cost2(X))`, and (if `max_cost` is set) caps it
/// by a second binary search for the largest `X` with combined cost within
/// budget. The monotone-price assumption makes both predicates monotone in
/// `X`, so binary search is valid; ties are broken toward fewer shares.
fn size_candidate(
    curve1: &[CurvePoint],
    curve2: &[CurvePoint],
    profit_threshold: f64,
    expected_slippage: f64,
    max_cost: Option<Cents10>,
) -> SizeResult {
    let h = depth(curve1).min(depth(curve2));
    if h == 0 {
        return SizeResult { shares: 0, total_cost: 0 };
    }

    let combined_cost = |x: i64| -> Option<Cents10> {
        let c1 = cost_of(x, curve1)?;
        let c2 = cost_of(x, curve2)?;
        // Inadmissible once marginal prices at this depth already meet or
        // exceed the unit payout: no profit is possible at or beyond it.
        let m1 = marginal_price_at(x, curve1).unwrap_or(i64::MAX);
        let m2 = marginal_price_at(x, curve2).unwrap_or(i64::MAX);
        if m1 + m2 >= 1000 {
            return None;
        }
        Some(c1 + c2)
    };

    let mut lo = 1i64;
    let mut hi = h;
    let mut best_profit_shares = 0i64;
    while lo <= hi {
        let mid = (lo + hi) / 2;
        let admissible_cost = combined_cost(mid);
        let ok = match admissible_cost {
            Some(cost) => {
                let revenue = 1000 * mid;
                revenue >= required_revenue(cost, expected_slippage, profit_threshold)
            }
            None => false,
        };
        if ok {
            best_profit_shares = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    let best_cost_shares = match max_cost {
        None => i64::MAX,
        Some(cap) => {
            let mut lo = 1i64;
            let mut hi = h;
            let mut best = 0i64;
            while lo <= hi {
                let mid = (lo + hi) / 2;
                let within = combined_cost(mid).map(|c| c <= cap).unwrap_or(false);
                if within {
                    best = mid;
                    lo = mid + 1;
                } else {
                    hi = mid - 1;
                }
            }
            best
        }
    };

    let shares = best_profit_shares.min(best_cost_shares);
    let total_cost = if shares > 0 {
        combined_cost(shares).unwrap_or(0)
    } else {
        0
    };
    SizeResult { shares, total_cost }
}

/// Runs both candidate trades (YES1+NO2, YES2+NO1) and returns the one with
/// the lower cost-per-share, or `None` if neither yields a sized trade.
pub fn calculate(
    yes1: &[Level],
    no1: &[Level],
    yes2: &[Level],
    no2: &[Level],
    profit_threshold: f64,
    expected_slippage: f64,
    max_cost: Option<Cents10>,
    pair_key: &str,
) -> Option<Opportunity> {
    let curve_y1 = build_curve(yes1);
    let curve_n1 = build_curve(no1);
    let curve_y2 = build_curve(yes2);
    let curve_n2 = build_curve(no2);

    let candidate = |curve1: &[CurvePoint], curve2: &[CurvePoint], ty: OpportunityType| {
        let result = size_candidate(curve1, curve2, profit_threshold, expected_slippage, max_cost);
        if result.shares <= 0 {
            return None;
        }
        let max_price_1 = marginal_price_at(result.shares, curve1)?;
        let max_price_2 = marginal_price_at(result.shares, curve2)?;
        Some(Opportunity {
            opportunity_type: ty,
            shares: result.shares,
            total_cost: result.total_cost,
            cost_per_share: result.total_cost as f64 / result.shares as f64,
            max_price_1,
            max_price_2,
            pair_key: pair_key.to_string(),
        })
    };

    let opp1 = candidate(&curve_y1, &curve_n2, OpportunityType::Yes1No2);
    let opp2 = candidate(&curve_y2, &curve_n1, OpportunityType::Yes2No1);

    match (opp1, opp2) {
        (Some(a), Some(b)) => {
            if a.cost_per_share <= b.cost_per_share {
                Some(a)
            } else {
                Some(b)
            }
        }
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    // S1 -- clean arbitrage.
    #[test]
    fn s1_clean_arbitrage() {
        let yes1 = vec![(400, 100)];
        let no1 = vec![(600, 100)];
        let yes2 = vec![(600, 100)];
        let no2 = vec![(400, 100)];
        let opp = calculate(&yes1, &no1, &yes2, &no2, 0.05, 0.01, None, "pair").unwrap();
        assert_eq!(opp.opportunity_type, OpportunityType::Yes1No2);
        assert_eq!(opp.shares, 100);
        assert_eq!(opp.total_cost, 80_000);
        assert_eq!(opp.cost_per_share, 800.0);
        assert_eq!(opp.max_price_1, 400);
        assert_eq!(opp.max_price_2, 400);
    }

    // S2 -- no arbitrage at parity.
    #[test]
    fn s2_no_arbitrage() {
        let book = vec![(500, 100)];
        let opp = calculate(&book, &book, &book, &book, 0.05, 0.01, None, "pair");
        assert!(opp.is_none());
    }

    // S3 -- depth-bounded: the profitable prefix is shorter than total depth.
    #[test]
    fn s3_depth_bounded() {
        let yes1 = vec![(400, 10), (700, 90)];
        let no1 = vec![(600, 100)];
        let yes2 = vec![(600, 100)];
        let no2 = vec![(400, 10), (700, 90)];
        let opp = calculate(&yes1, &no1, &yes2, &no2, 0.05, 0.01, None, "pair").unwrap();
        assert!(opp.shares < 100);
        assert!(opp.shares > 0);
    }

    // S4 -- cost-bounded.
    #[test]
    fn s4_cost_bounded() {
        let yes1 = vec![(400, 100)];
        let no1 = vec![(600, 100)];
        let yes2 = vec![(600, 100)];
        let no2 = vec![(400, 100)];
        let opp = calculate(&yes1, &no1, &yes2, &no2, 0.05, 0.01, Some(8_000), "pair").unwrap();
        assert_eq!(opp.shares, 10);
        assert_eq!(opp.total_cost, 8_000);
    }

    // Property 7 -- depth-curve round trip.
    #[test]
    fn curve_round_trip() {
        let levels = vec![(100, 5), (105, 10), (110, 3)];
        let curve = build_curve(&levels);
        for p in &curve {
            assert_eq!(cost_of(p.cum_qty, &curve), Some(p.cum_cost));
        }
    }

    // Property 4 -- sizing maximality, randomized monotone curves.
    #[test]
    fn sizing_is_maximal() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n_levels = rng.gen_range(1..6);
            let mut price1 = rng.gen_range(1..400);
            let mut levels1 = Vec::new();
            for _ in 0..n_levels {
                let qty = rng.gen_range(1..50);
                levels1.push((price1, qty));
                price1 += rng.gen_range(0..20);
            }
            let mut price2 = rng.gen_range(1..400);
            let mut levels2 = Vec::new();
            for _ in 0..n_levels {
                let qty = rng.gen_range(1..50);
                levels2.push((price2, qty));
                price2 += rng.gen_range(0..20);
            }

            let curve1 = build_curve(&levels1);
            let curve2 = build_curve(&levels2);
            let result = size_candidate(&curve1, &curve2, 0.05, 0.01, None);

            let h = depth(&curve1).min(depth(&curve2));
            // Linear re-scan: no X beyond what the binary search picked should
            // also satisfy the profit predicate.
            for x in (result.shares + 1)..=h {
                let c1 = cost_of(x, &curve1);
                let c2 = cost_of(x, &curve2);
                if let (Some(c1), Some(c2)) = (c1, c2) {
                    let m1 = marginal_price_at(x, &curve1).unwrap();
                    let m2 = marginal_price_at(x, &curve2).unwrap();
                    if m1 + m2 >= 1000 {
                        continue;
                    }
                    let cost = c1 + c2;
                    let revenue = 1000 * x;
                    assert!(
                        revenue < required_revenue(cost, 0.01, 0.05),
                        "found larger profitable X={x} beyond sizer's X*={}",
                        result.shares
                    );
                }
            }
        }
    }

    // Arbitrage soundness (property 3), checked against S1's numbers.
    #[test]
    fn soundness_holds_for_s1() {
        let yes1 = vec![(400, 100)];
        let no1 = vec![(600, 100)];
        let yes2 = vec![(600, 100)];
        let no2 = vec![(400, 100)];
        let opp = calculate(&yes1, &no1, &yes2, &no2, 0.05, 0.01, None, "pair").unwrap();
        let revenue = 1000 * opp.shares;
        let required = required_revenue(opp.total_cost, 0.01, 0.05);
        assert!(revenue >= required);
    }
}

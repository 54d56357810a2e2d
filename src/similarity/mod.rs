//! Similarity Matcher stage logic: ensure persistence, index, recall top-K,
//! confirm via judge, canonicalize and persist new pairs.

pub mod index;
pub mod judge;

use crate::models::{Market, MarketPair};
use crate::persistence::Persistence;
use index::{SimilarityIndex, VectorKind};
use judge::IdentityJudge;
use std::collections::HashSet;

const TOP_K: usize = 3;

/// Processes one incoming market: upserts it into persistence and the
/// index, recalls cross-venue candidates, confirms each via the judge, and
/// persists+returns any newly-confirmed pairs (already deduplicated against
/// `dedup` so a batch never emits the same pair twice).
pub async fn process_market(
    market: &Market,
    persistence: &Persistence,
    index: &mut SimilarityIndex,
    judge: &IdentityJudge,
    dedup: &mut HashSet<String>,
) -> anyhow::Result<Vec<MarketPair>> {
    persistence.upsert_market(market).await?;

    index.upsert(market.venue.as_str(), &market.market_id, VectorKind::Name, &market.name);
    index.upsert(market.venue.as_str(), &market.market_id, VectorKind::Rules, &market.rules);

    let candidates = index.query_top_k(&market.name, VectorKind::Name, market.venue.as_str(), TOP_K);

    let mut new_pairs = Vec::new();
    for candidate in candidates {
        let Some(other) = persistence
            .get_market(parse_venue(&candidate.venue), &candidate.market_id)
            .await?
        else {
            continue;
        };

        let identical = judge
            .are_identical(&market.name, &market.rules, &other.name, &other.rules)
            .await;
        if !identical {
            continue;
        }

        let pair = MarketPair::canonicalize(market, &other);
        if !dedup.insert(pair.key()) {
            continue;
        }
        if persistence.insert_pair_if_new(&pair).await? {
            new_pairs.push(pair);
        }
    }

    Ok(new_pairs)
}

fn parse_venue(s: &str) -> crate::models::Venue {
    crate::models::Venue::parse(s).unwrap_or(crate::models::Venue::Test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;

    fn market(venue: Venue, id: &str, name: &str) -> Market {
        Market {
            venue,
            market_id: id.into(),
            name: name.into(),
            rules: "resolves YES if the event occurs by the deadline".into(),
            close_timestamp: 0,
        }
    }

    #[tokio::test]
    async fn recall_excludes_same_venue_even_with_identical_text() {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let persistence = Persistence::open(path.to_str().unwrap()).unwrap();
        let mut index = SimilarityIndex::new();
        let mut dedup: HashSet<String> = HashSet::new();

        let a = market(Venue::Kalshi, "k1", "Will the Fed cut rates in March");
        persistence.upsert_market(&a).await.unwrap();
        index.upsert(a.venue.as_str(), &a.market_id, VectorKind::Name, &a.name);

        let candidates = index.query_top_k(&a.name, VectorKind::Name, "kalshi", TOP_K);
        assert!(candidates.is_empty());
        let _ = (&persistence, &mut dedup);
    }
}

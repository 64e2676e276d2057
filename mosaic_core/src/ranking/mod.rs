//! Pluggable ordering of merged search results.
//!
//! Every strategy ends with [`sort_ranked`], so two entities never compare
//! equal and pagination over a ranked list is stable across calls.

mod indexed;
mod local;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::FederationError;
use crate::federated::SearchQuery;

pub use indexed::{HttpIndexBackend, IndexBackend, IndexSettings, IndexedRanker, IndexHit};
pub use local::{LocalRanker, LocalRankingConfig};

#[async_trait]
pub trait RankingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Assigns `score` to every entity and returns them in ranked order.
    async fn score(
        &self,
        entities: Vec<Entity>,
        query: &SearchQuery,
    ) -> Result<Vec<Entity>, FederationError>;
}

/// Receives discovery output and instance removal from the manager.
#[async_trait]
pub trait DiscoverySink: Send + Sync {
    async fn on_discovered(&self, instance: &str, entities: &[Entity]);

    async fn on_removed(&self, instance: &str);
}

/// score desc, timestamp desc (missing last), id asc.
pub fn ranked_order(a: &Entity, b: &Entity) -> Ordering {
    let score_a = a.score.unwrap_or(f64::NEG_INFINITY);
    let score_b = b.score.unwrap_or(f64::NEG_INFINITY);
    score_b
        .total_cmp(&score_a)
        .then_with(|| match (&a.timestamp, &b.timestamp) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_ranked(entities: &mut [Entity]) {
    entities.sort_by(ranked_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use chrono::{TimeZone, Utc};

    fn entity(resource: &str, score: Option<f64>, day: Option<u32>) -> Entity {
        let id = EntityId::new("mock", "default", resource);
        let mut e = Entity::new(id, "file", "mock:default", resource);
        e.score = score;
        if let Some(day) = day {
            e = e.with_timestamp(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
        }
        e
    }

    #[test]
    fn test_total_order() {
        let mut entities = vec![
            entity("d", Some(1.0), None),
            entity("c", Some(1.0), Some(1)),
            entity("b", Some(1.0), Some(2)),
            entity("a", Some(1.0), None),
            entity("z", Some(2.0), None),
            entity("y", None, Some(3)),
        ];
        sort_ranked(&mut entities);
        let order: Vec<_> = entities.iter().map(|e| e.id.resource_id()).collect();
        assert_eq!(order, vec!["z", "b", "c", "a", "d", "y"]);
    }
}

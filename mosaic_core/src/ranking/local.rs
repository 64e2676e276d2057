//! In-process scorer: text relevance, per-provider weight and recency decay.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{sort_ranked, RankingStrategy};
use crate::entity::{AttributeValue, Entity};
use crate::error::FederationError;
use crate::federated::SearchQuery;

fn default_text_weight() -> f64 {
    1.0
}

fn default_recency_weight() -> f64 {
    0.2
}

fn default_half_life_days() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRankingConfig {
    /// Keyed by instance key or provider type; the instance key wins.
    #[serde(default)]
    pub provider_weights: BTreeMap<String, f64>,

    #[serde(default = "default_text_weight")]
    pub text_weight: f64,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    #[serde(default = "default_half_life_days")]
    pub recency_half_life_days: f64,
}

impl Default for LocalRankingConfig {
    fn default() -> Self {
        Self {
            provider_weights: BTreeMap::new(),
            text_weight: default_text_weight(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_half_life_days(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalRanker {
    config: LocalRankingConfig,
}

impl LocalRanker {
    pub fn new(config: LocalRankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalRankingConfig {
        &self.config
    }

    fn provider_weight(&self, entity: &Entity) -> f64 {
        self.config
            .provider_weights
            .get(entity.id.instance_key())
            .or_else(|| self.config.provider_weights.get(entity.id.provider_type()))
            .copied()
            .unwrap_or(1.0)
    }

    /// 0.0..=1.0, averaged over query terms. An empty query scores 1.0.
    pub fn text_score(&self, entity: &Entity, terms: &[String]) -> f64 {
        if terms.is_empty() {
            return 1.0;
        }
        let title = entity.title.to_lowercase();
        let description = entity.description.to_lowercase();
        let tokens: Vec<String> = entity.search_tokens.iter().map(|t| t.to_lowercase()).collect();
        let strings: Vec<String> = entity
            .attributes
            .values()
            .flat_map(text_values)
            .map(|s| s.to_lowercase())
            .collect();

        let mut total = 0.0;
        for term in terms {
            total += if title == *term {
                1.0
            } else if title.starts_with(term.as_str()) {
                0.9
            } else if title.contains(term.as_str()) {
                0.7
            } else if tokens.iter().any(|t| t.contains(term.as_str())) {
                0.5
            } else if description.contains(term.as_str()) {
                0.4
            } else if strings.iter().any(|s| s.contains(term.as_str())) {
                0.3
            } else {
                0.0
            };
        }
        total / terms.len() as f64
    }

    /// Exponential decay: 1.0 now, 0.5 after one half-life.
    pub fn recency_score(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(timestamp) = timestamp else {
            return 0.0;
        };
        if self.config.recency_half_life_days <= 0.0 {
            return 0.0;
        }
        let age_days = (now - timestamp).num_seconds().max(0) as f64 / 86_400.0;
        0.5_f64.powf(age_days / self.config.recency_half_life_days)
    }

    pub fn score_entity(&self, entity: &Entity, terms: &[String], now: DateTime<Utc>) -> f64 {
        let text = self.config.text_weight * self.text_score(entity, terms);
        let recency = self.config.recency_weight * self.recency_score(entity.timestamp, now);
        (text + recency) * self.provider_weight(entity)
    }
}

fn text_values(value: &AttributeValue) -> Vec<&str> {
    match value {
        AttributeValue::Text(s) => vec![s.as_str()],
        AttributeValue::List(items) => items.iter().flat_map(text_values).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl RankingStrategy for LocalRanker {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn score(
        &self,
        mut entities: Vec<Entity>,
        query: &SearchQuery,
    ) -> Result<Vec<Entity>, FederationError> {
        let terms = query.terms();
        let now = Utc::now();
        for entity in &mut entities {
            entity.score = Some(self.score_entity(entity, &terms, now));
        }
        sort_ranked(&mut entities);
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use chrono::Duration;

    fn entity(provider: &str, resource: &str, title: &str) -> Entity {
        Entity::new(
            EntityId::new(provider, "default", resource),
            "file",
            format!("{provider}:default"),
            title,
        )
    }

    #[test]
    fn test_text_score_tiers() {
        let ranker = LocalRanker::default();
        let terms = vec!["beach".to_string()];
        assert_eq!(ranker.text_score(&entity("mock", "1", "Beach"), &terms), 1.0);
        assert_eq!(ranker.text_score(&entity("mock", "2", "beach day"), &terms), 0.9);
        assert_eq!(ranker.text_score(&entity("mock", "3", "sunny beach"), &terms), 0.7);

        let tagged = entity("mock", "4", "IMG_0001").with_attribute(
            "tags",
            AttributeValue::List(vec!["Beach".into(), "family".into()]),
        );
        assert_eq!(ranker.text_score(&tagged, &terms), 0.3);
        assert_eq!(ranker.text_score(&entity("mock", "5", "mountain"), &terms), 0.0);
    }

    #[test]
    fn test_recency_halves_per_half_life() {
        let ranker = LocalRanker::default();
        let now = Utc::now();
        let score = ranker.recency_score(Some(now - Duration::days(30)), now);
        assert!((score - 0.5).abs() < 1e-9);
        assert_eq!(ranker.recency_score(None, now), 0.0);
    }

    #[tokio::test]
    async fn test_provider_weight_reorders() {
        let mut config = LocalRankingConfig::default();
        config.provider_weights.insert("localfs".into(), 2.0);
        let ranker = LocalRanker::new(config);

        let entities = vec![entity("mock", "a", "beach"), entity("localfs", "b", "beach")];
        let ranked = ranker.score(entities, &SearchQuery::new("beach")).await.unwrap();
        assert_eq!(ranked[0].id.provider_type(), "localfs");
        assert!(ranked.iter().all(|e| e.score.is_some()));
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let ranker = LocalRanker::default();
        let entities = vec![entity("mock", "b", "x"), entity("mock", "a", "x")];
        let ranked = ranker.score(entities, &SearchQuery::new("")).await.unwrap();
        assert_eq!(ranked[0].id.resource_id(), "a");
    }
}

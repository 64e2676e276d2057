//! Federated search execution.
//!
//! Fans one query out through the manager, merges the partial result sets,
//! ranks them and returns one page.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout_at;
use tracing::{info, warn};

use super::{FanOut, SearchQuery, SearchResult, DEFAULT_LIMIT, DEFAULT_TIMEOUT_MS, MAX_LIMIT};
use crate::entity::{Entity, EntityId};
use crate::error::FederationError;
use crate::filters::{self, FilterCatalog};
use crate::manager::{ProviderManager, ProviderStatus};
use crate::ranking::RankingStrategy;
use crate::types::{type_matches, TypeRegistry};

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_max_limit() -> usize {
    MAX_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatorConfig {
    /// Overall deadline for a search or discovery fan-out.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for FederatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

pub struct Federator {
    manager: Arc<ProviderManager>,
    types: Arc<TypeRegistry>,
    ranking: Arc<dyn RankingStrategy>,
    config: FederatorConfig,
}

impl Federator {
    pub fn new(
        manager: Arc<ProviderManager>,
        types: Arc<TypeRegistry>,
        ranking: Arc<dyn RankingStrategy>,
    ) -> Self {
        Self {
            manager,
            types,
            ranking,
            config: FederatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FederatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn ranking(&self) -> &dyn RankingStrategy {
        self.ranking.as_ref()
    }

    pub fn config(&self) -> &FederatorConfig {
        &self.config
    }

    fn deadline(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + Duration::from_millis(self.config.timeout_ms)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult, FederationError> {
        let started = Instant::now();
        filters::check_schema(query, &self.types)?;

        let deadline = self.deadline();
        let FanOut {
            mut entities,
            completed,
            failures,
            skipped,
        } = self.manager.search_all(query, deadline).await?;

        // Providers are trusted with filters, not with type scoping.
        if let Some(entity_type) = query.entity_type.as_deref() {
            entities.retain(|e| type_matches(&e.entity_type, entity_type));
        }
        if let Some(rel_type) = query.relationship_type.as_deref() {
            entities.retain(|e| e.relationships.iter().any(|r| r.rel_type == rel_type));
        }

        let ranked = timeout_at(deadline, self.ranking.score(entities, query))
            .await
            .map_err(|_| {
                FederationError::Timeout(format!(
                    "{} ranking exceeded {}ms",
                    self.ranking.name(),
                    self.config.timeout_ms
                ))
            })??;

        let total_count = ranked.len();
        let type_counts = filters::type_counts(&ranked);
        let facets = filters::compute_facets(&ranked, &self.types);

        let limit = query.effective_limit(self.config.default_limit, self.config.max_limit);
        let page: Vec<Entity> = ranked.into_iter().skip(query.offset).take(limit).collect();
        let has_more = query.offset.saturating_add(limit) < total_count;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            query = %query.query,
            total = total_count,
            returned = page.len(),
            failed = failures.len(),
            elapsed_ms = duration_ms,
            "federated search finished"
        );

        Ok(SearchResult {
            entities: page,
            total_count,
            type_counts,
            has_more,
            facets,
            completed,
            partial: !failures.is_empty(),
            failures,
            skipped,
            duration_ms: Some(duration_ms),
        })
    }

    pub async fn hydrate(&self, id: &str) -> Result<Entity, FederationError> {
        let id = EntityId::parse(id)?;
        self.manager.hydrate(&id).await
    }

    pub async fn get_related(
        &self,
        id: &str,
        rel_type: &str,
    ) -> Result<Vec<Entity>, FederationError> {
        let id = EntityId::parse(id)?;
        self.manager.get_related(&id, rel_type).await
    }

    /// Filter capabilities and known values, with facets over every entity
    /// the federation currently returns for `entity_type`.
    pub async fn filters(&self, entity_type: Option<&str>) -> FilterCatalog {
        let mut catalog = self.manager.filter_catalog().await;
        let mut query = SearchQuery::new("").with_limit(1);
        if let Some(entity_type) = entity_type {
            query = query.with_type(entity_type);
        }
        match self.search(&query).await {
            Ok(result) => catalog.add_facets(&result.facets),
            Err(err) => warn!(error = %err, "facets unavailable for filter listing"),
        }
        catalog
    }

    pub async fn providers(&self) -> Vec<ProviderStatus> {
        self.manager.statuses().await
    }

    pub async fn discover_all(&self) -> Result<FanOut, FederationError> {
        self.manager.discover_all(self.deadline()).await
    }

    pub async fn discover(&self, instance: &str) -> Result<Vec<Entity>, FederationError> {
        self.manager.discover(instance).await
    }

    pub async fn shutdown(&self) -> Result<(), FederationError> {
        self.manager.shutdown_all().await
    }
}

//! Deterministic synthetic provider for tests and demos.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::capabilities::{Field, FieldType, ProviderConfigSchema};
use crate::entity::{self, AttributeValue, Entity, EntityId};
use crate::error::ProviderError;
use crate::federated::SearchQuery;
use crate::filters::{self, FilterCapability, FilterOption};
use crate::provider::{FilterValuesProvider, Provider, ProviderConfig};
use crate::types::type_matches;

const PROVIDER_TYPE: &str = "mock";

const DEFAULT_ENTITY_COUNT: usize = 10;

const DEFAULT_TYPES: &[&str] = &["file.media.image", "file.media.video", "file.document", "person"];

const CATEGORIES: &[&str] = &["even", "odd"];

#[derive(Debug, Clone)]
pub struct MockProvider {
    instance_id: String,
    entity_count: usize,
    types: Vec<String>,
    fail_discover: bool,
    fail_search: bool,
    fail_shutdown: bool,
    latency: Duration,
    supports_eq: bool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            entity_count: DEFAULT_ENTITY_COUNT,
            types: DEFAULT_TYPES.iter().map(|t| t.to_string()).collect(),
            fail_discover: false,
            fail_search: false,
            fail_shutdown: false,
            latency: Duration::ZERO,
            supports_eq: true,
        }
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

impl MockProvider {
    pub fn resource_id(index: usize) -> String {
        format!("entity-{index:04}")
    }

    fn entity(&self, index: usize) -> Entity {
        let entity_type = &self.types[index % self.types.len()];
        let category = CATEGORIES[index % 2];
        let mut entity = Entity::new(
            EntityId::new(PROVIDER_TYPE, &self.instance_id, &Self::resource_id(index)),
            entity_type.clone(),
            entity::instance_key(PROVIDER_TYPE, &self.instance_id),
            format!("Mock {} {}", entity_type.rsplit('.').next().unwrap_or(entity_type), index),
        )
        .with_description(format!("Synthetic {category} entity number {index}"))
        .with_attribute("index", index as i64)
        .with_attribute("size", ((index + 1) * 1000) as i64)
        .with_attribute("category", category)
        .with_attribute(
            "tags",
            AttributeValue::List(vec!["mock".into(), category.into()]),
        )
        .with_search_tokens([category.to_string()])
        .with_timestamp(base_time() + chrono::Duration::days(index as i64));

        if index + 1 < self.entity_count {
            entity = entity.with_relationship(
                "next",
                EntityId::new(PROVIDER_TYPE, &self.instance_id, &Self::resource_id(index + 1)),
            );
        }
        entity
    }

    fn all(&self) -> Vec<Entity> {
        // Resource ids are zero-padded, so index order is id order.
        (0..self.entity_count).map(|i| self.entity(i)).collect()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        PROVIDER_TYPE
    }

    fn description(&self) -> &'static str {
        "Deterministic synthetic entities for tests and demos"
    }

    fn config_schema(&self) -> ProviderConfigSchema {
        ProviderConfigSchema::new(vec![
            Field::new("entity_count", "Entity count", FieldType::Number),
            Field::new("types", "Entity types", FieldType::Text)
                .with_description("Comma-separated types assigned round-robin"),
            Field::new("latency_ms", "Latency (ms)", FieldType::Number),
            Field::new("supports_eq", "Supports equality filters", FieldType::Boolean),
            Field::new("fail_discover", "Fail discovery", FieldType::Boolean),
            Field::new("fail_search", "Fail search", FieldType::Boolean),
            Field::new("fail_shutdown", "Fail shutdown", FieldType::Boolean),
        ])
    }

    async fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ProviderError> {
        self.instance_id = config.instance_id.clone();
        if let Some(count) = config.get_u64("entity_count") {
            self.entity_count = count as usize;
        }
        let types = config.get_str_list("types");
        if !types.is_empty() {
            self.types = types;
        }
        self.fail_discover = config.get_bool("fail_discover").unwrap_or(false);
        self.fail_search = config.get_bool("fail_search").unwrap_or(false);
        self.fail_shutdown = config.get_bool("fail_shutdown").unwrap_or(false);
        self.latency = Duration::from_millis(config.get_u64("latency_ms").unwrap_or(0));
        self.supports_eq = config.get_bool("supports_eq").unwrap_or(true);
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<Entity>, ProviderError> {
        self.pause().await;
        if self.fail_discover {
            return Err(ProviderError::Temporary("mock discovery failure".to_string()));
        }
        Ok(self.all())
    }

    async fn hydrate(&self, id: &EntityId) -> Result<Entity, ProviderError> {
        if id.instance_key() == entity::instance_key(PROVIDER_TYPE, &self.instance_id) {
            if let Some(index) = id
                .resource_id()
                .strip_prefix("entity-")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|i| *i < self.entity_count)
            {
                return Ok(self.entity(index));
            }
        }
        Err(ProviderError::NotFound(id.to_string()))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, ProviderError> {
        self.pause().await;
        if self.fail_search {
            return Err(ProviderError::Temporary("mock search failure".to_string()));
        }
        let terms = query.terms();
        let mut results = Vec::new();
        for entity in self.all() {
            if let Some(scope) = query.entity_type.as_deref() {
                if !type_matches(&entity.entity_type, scope) {
                    continue;
                }
            }
            let text = format!("{} {}", entity.title, entity.description).to_lowercase();
            if !terms.iter().all(|t| text.contains(t.as_str())) {
                continue;
            }
            let keep = filters::matches(&entity, &query.filters)
                .map_err(|e| ProviderError::Config(e.to_string()))?;
            if !keep {
                continue;
            }
            results.push(entity);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn filter_capabilities(
        &self,
    ) -> Result<BTreeMap<String, FilterCapability>, ProviderError> {
        let mut caps = BTreeMap::new();
        caps.insert(
            "category".to_string(),
            FilterCapability {
                supports_eq: self.supports_eq,
                supports_ne: self.supports_eq,
                supports_substring: true,
                ..FilterCapability::default()
            }
            .with_options(CATEGORIES.iter().copied()),
        );
        caps.insert(
            "index".to_string(),
            FilterCapability {
                min: Some(0.0),
                max: Some(self.entity_count.saturating_sub(1) as f64),
                ..FilterCapability::equality().with_range()
            },
        );
        caps.insert("size".to_string(), FilterCapability::range(Some(0.0), None));
        caps.insert(
            "tags".to_string(),
            FilterCapability {
                supports_eq: self.supports_eq,
                supports_glob: true,
                ..FilterCapability::default()
            },
        );
        Ok(caps)
    }

    fn as_filter_values(&self) -> Option<&dyn FilterValuesProvider> {
        Some(self)
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.fail_shutdown {
            return Err(ProviderError::Unknown("mock shutdown failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FilterValuesProvider for MockProvider {
    async fn filter_values(&self, attribute: &str) -> Result<Vec<FilterOption>, ProviderError> {
        if attribute != "category" {
            return Ok(Vec::new());
        }
        let even = self.entity_count.div_ceil(2);
        Ok(vec![
            FilterOption::new("even").with_label("Even").with_count(even),
            FilterOption::new("odd").with_label("Odd").with_count(self.entity_count - even),
        ])
    }
}

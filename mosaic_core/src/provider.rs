//! The capability contract every data source implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::ProviderConfigSchema;
use crate::entity::{Entity, EntityId};
use crate::error::ProviderError;
use crate::federated::SearchQuery;
use crate::filters::{FilterCapability, FilterOption};

/// Instance id used when a configuration does not name one.
pub const DEFAULT_INSTANCE_ID: &str = "default";

fn default_instance_id() -> String {
    DEFAULT_INSTANCE_ID.to_string()
}

/// Initialization input for one provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            settings: Map::new(),
        }
    }
}

impl ProviderConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.settings.get(key).and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(|v| {
            v.as_bool()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.settings.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A source of entities.
///
/// Only `name`, `initialize`, `discover`, `hydrate` and `search` are
/// mandatory; the remaining methods default to "capability absent":
/// incremental discovery is unsupported, no filter capabilities are declared,
/// and shutdown does nothing.
///
/// Cancellation follows the async model: the manager wraps every call in a
/// deadline and drops the future when it expires.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type name, the first segment of every id it produces.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn config_schema(&self) -> ProviderConfigSchema {
        ProviderConfigSchema::default()
    }

    async fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ProviderError>;

    async fn discover(&self) -> Result<Vec<Entity>, ProviderError>;

    async fn hydrate(&self, id: &EntityId) -> Result<Entity, ProviderError>;

    /// Entities linked from `id` by relationships of `rel_type` (all types
    /// when empty). The default hydrates the source entity and then each
    /// target owned by the same instance.
    async fn get_related(
        &self,
        id: &EntityId,
        rel_type: &str,
    ) -> Result<Vec<Entity>, ProviderError> {
        let source = self.hydrate(id).await?;
        let mut related = Vec::new();
        for target in source.related_ids(rel_type) {
            if target.instance_key() != id.instance_key() {
                continue;
            }
            match self.hydrate(target).await {
                Ok(entity) => related.push(entity),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(related)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, ProviderError>;

    fn supports_incremental(&self) -> bool {
        false
    }

    async fn discover_since(&self, _since: DateTime<Utc>) -> Result<Vec<Entity>, ProviderError> {
        Err(ProviderError::not_supported("incremental discovery"))
    }

    async fn filter_capabilities(
        &self,
    ) -> Result<BTreeMap<String, FilterCapability>, ProviderError> {
        Ok(BTreeMap::new())
    }

    /// Optional secondary capability: pre-known values for filters.
    fn as_filter_values(&self) -> Option<&dyn FilterValuesProvider> {
        None
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Declares enumerated values for a filter (known people, albums, extensions)
/// without running a search.
#[async_trait]
pub trait FilterValuesProvider: Send + Sync {
    async fn filter_values(&self, attribute: &str) -> Result<Vec<FilterOption>, ProviderError>;
}

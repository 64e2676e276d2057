//! Federation configuration file and bootstrap.
//!
//! The file lives at `$MOSAIC_CONFIG` or `~/.config/mosaic/federation.yaml`:
//!
//! ```yaml
//! federator:
//!   timeout_ms: 10000
//! ranking:
//!   strategy: local
//!   provider_weights: { localfs: 1.5 }
//! providers:
//!   - type: localfs
//!     instance: photos
//!     settings: { root: ~/Pictures }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::FederationError;
use crate::federated::{Federator, FederatorConfig};
use crate::manager::ProviderManager;
use crate::provider::ProviderConfig;
use crate::ranking::{
    HttpIndexBackend, IndexSettings, IndexedRanker, LocalRanker, LocalRankingConfig,
    RankingStrategy,
};
use crate::registry::ProviderRegistry;
use crate::types::TypeRegistry;

pub const CONFIG_ENV: &str = "MOSAIC_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingKind {
    #[default]
    Local,
    Index,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub strategy: RankingKind,

    #[serde(flatten)]
    pub local: LocalRankingConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSettings>,
}

/// One provider instance to start at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(rename = "type")]
    pub provider_type: String,

    pub instance: String,

    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl InstanceConfig {
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            instance_id: self.instance.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub federator: FederatorConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub providers: Vec<InstanceConfig>,
}

impl FederationConfig {
    /// `$MOSAIC_CONFIG`, else the per-user config directory.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("mosaic").join("federation.yaml")
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path())
    }

    /// A missing file yields the default configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                },
                other => other,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no federation config, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let federator = &self.federator;
        if federator.timeout_ms == 0 {
            return Err(ConfigError::Invalid("federator.timeout_ms must be positive".to_string()));
        }
        if federator.default_limit == 0 || federator.default_limit > federator.max_limit {
            return Err(ConfigError::Invalid(format!(
                "federator.default_limit must be within 1..={}",
                federator.max_limit
            )));
        }
        if self.ranking.strategy == RankingKind::Index && self.ranking.index.is_none() {
            return Err(ConfigError::Invalid(
                "ranking.strategy is index but ranking.index is missing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wires registries, manager, ranking and federator from a configuration.
///
/// Instances that fail to start are logged and left out; the federation
/// still comes up with the rest.
pub async fn build_federation(config: &FederationConfig) -> Result<Federator, FederationError> {
    config.validate()?;

    let types = Arc::new(TypeRegistry::with_builtin_types());
    let registry = Arc::new(ProviderRegistry::with_builtin_providers());
    let manager = Arc::new(ProviderManager::new(registry));

    let local = LocalRanker::new(config.ranking.local.clone());
    let ranking: Arc<dyn RankingStrategy> = match (&config.ranking.strategy, &config.ranking.index)
    {
        (RankingKind::Index, Some(settings)) => {
            let backend = HttpIndexBackend::new(settings.clone())
                .map_err(|e| ConfigError::Invalid(format!("ranking.index: {e}")))?;
            let ranker = Arc::new(
                IndexedRanker::new(Arc::new(backend), settings.wait_for_indexing)
                    .with_fallback(local),
            );
            manager.add_sink(ranker.clone());
            ranker
        }
        _ => Arc::new(local),
    };

    for instance in &config.providers {
        match manager
            .initialize(&instance.provider_type, instance.provider_config())
            .await
        {
            Ok(key) => info!(instance = %key, "provider instance started"),
            Err(err) => warn!(
                provider = %instance.provider_type,
                instance = %instance.instance,
                error = %err,
                "provider instance failed to start, skipping"
            ),
        }
    }

    Ok(Federator::new(manager, types, ranking).with_config(config.federator.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_missing_files_yield_defaults() {
        let config = FederationConfig::parse("").unwrap();
        assert_eq!(config.federator.timeout_ms, crate::federated::DEFAULT_TIMEOUT_MS);
        assert!(config.providers.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let config = FederationConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.ranking.strategy, RankingKind::Local);
    }

    #[test]
    fn test_parses_all_sections() {
        let yaml = r#"
federator:
  timeout_ms: 2000
  default_limit: 20
ranking:
  strategy: index
  recency_weight: 0.5
  provider_weights:
    localfs: 1.5
  index:
    url: http://127.0.0.1:7700
providers:
  - type: mock
    instance: demo
    settings:
      entity_count: 3
"#;
        let config = FederationConfig::parse(yaml).unwrap();
        assert_eq!(config.federator.timeout_ms, 2000);
        assert_eq!(config.federator.max_limit, crate::federated::MAX_LIMIT);
        assert_eq!(config.ranking.strategy, RankingKind::Index);
        assert_eq!(config.ranking.local.recency_weight, 0.5);
        assert_eq!(config.ranking.local.provider_weights["localfs"], 1.5);
        assert_eq!(config.ranking.index.as_ref().unwrap().index_uid, "mosaic_entities");
        assert_eq!(config.providers[0].provider_config().get_u64("entity_count"), Some(3));
    }

    #[test]
    fn test_rejects_inconsistent_sections() {
        let err = FederationConfig::parse("ranking:\n  strategy: index\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = FederationConfig::parse("federator: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_build_skips_failing_instances() {
        let config = FederationConfig {
            providers: vec![
                InstanceConfig {
                    provider_type: "mock".to_string(),
                    instance: "ok".to_string(),
                    settings: Map::new(),
                },
                InstanceConfig {
                    provider_type: "plex".to_string(),
                    instance: "missing".to_string(),
                    settings: Map::new(),
                },
            ],
            ..FederationConfig::default()
        };
        let federator = build_federation(&config).await.unwrap();
        assert_eq!(federator.manager().keys().await, vec!["mock:ok".to_string()]);
        assert_eq!(federator.ranking().name(), "local");
    }
}

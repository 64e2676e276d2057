//! Live provider instances: lifecycle, status tracking and fan-out.
//!
//! Locking is two-level. The instance table sits behind one async
//! reader/writer lock that is only held to clone `Arc`s out or to add and
//! remove entries. Each instance serializes its own discoveries with a
//! private mutex, and keeps its status behind a short-held lock, so a slow
//! provider never hides the status of the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::entity::{self, Entity, EntityId};
use crate::error::{ErrorKind, FederationError, ProviderError};
use crate::federated::{FanOut, SearchQuery, SourceFailure};
use crate::filters::{self, FilterCapability, FilterCatalog, FilterError, FilterOption, Negotiation};
use crate::provider::{Provider, ProviderConfig};
use crate::ranking::DiscoverySink;
use crate::registry::{ProviderRegistry, RegistryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Instance key, `providerType:instanceID`
    pub name: String,
    pub provider_type: String,
    pub instance_id: String,
    pub connected: bool,
    pub last_discovery: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub entity_count: usize,
    pub supports_incremental: bool,
}

/// One initialized provider and its bookkeeping.
pub struct ProviderInstance {
    key: String,
    provider_type: String,
    config: ProviderConfig,
    provider: Box<dyn Provider>,
    discovery_lock: Mutex<()>,
    status: std::sync::RwLock<ProviderStatus>,
}

impl ProviderInstance {
    fn new(
        key: String,
        provider_type: &str,
        config: ProviderConfig,
        provider: Box<dyn Provider>,
    ) -> Self {
        let status = ProviderStatus {
            name: key.clone(),
            provider_type: provider_type.to_string(),
            instance_id: config.instance_id.clone(),
            connected: true,
            last_discovery: None,
            last_error: None,
            entity_count: 0,
            supports_incremental: provider.supports_incremental(),
        };
        Self {
            key,
            provider_type: provider_type.to_string(),
            config,
            provider,
            discovery_lock: Mutex::new(()),
            status: std::sync::RwLock::new(status),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn status(&self) -> ProviderStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().unwrap_or_else(|e| e.into_inner()).connected
    }

    fn update_status(&self, f: impl FnOnce(&mut ProviderStatus)) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    fn record_discovery(&self, entity_count: Option<usize>) {
        self.update_status(|s| {
            s.connected = true;
            s.last_error = None;
            s.last_discovery = Some(Utc::now());
            if let Some(count) = entity_count {
                s.entity_count = count;
            }
        });
    }

    fn record_failure(&self, message: String, disconnect: bool) {
        self.update_status(|s| {
            s.last_error = Some(message);
            if disconnect {
                s.connected = false;
            }
        });
    }

    /// Full discovery when `since` is `None`, incremental otherwise. A
    /// missing incremental capability leaves the status untouched.
    async fn run_discovery(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>, ProviderError> {
        let _guard = self.discovery_lock.lock().await;
        let started = StdInstant::now();
        let result = match since {
            Some(since) => self.provider.discover_since(since).await,
            None => self.provider.discover().await,
        };
        match &result {
            Ok(entities) => {
                self.record_discovery(since.is_none().then_some(entities.len()));
                info!(
                    instance = %self.key,
                    entities = entities.len(),
                    incremental = since.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "discovery finished"
                );
            }
            Err(err) if err.kind() == ErrorKind::NotSupported => {}
            Err(err) => self.record_failure(err.to_string(), true),
        }
        result
    }
}

/// Owns every live provider instance.
pub struct ProviderManager {
    registry: Arc<ProviderRegistry>,
    instances: RwLock<BTreeMap<String, Arc<ProviderInstance>>>,
    sinks: std::sync::RwLock<Vec<Arc<dyn DiscoverySink>>>,
}

impl ProviderManager {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            instances: RwLock::new(BTreeMap::new()),
            sinks: std::sync::RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Registers a receiver for discovery output and instance removal.
    pub fn add_sink(&self, sink: Arc<dyn DiscoverySink>) {
        self.sinks.write().unwrap_or_else(|e| e.into_inner()).push(sink);
    }

    fn sinks(&self) -> Vec<Arc<dyn DiscoverySink>> {
        self.sinks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn notify_discovered(&self, instance: &str, entities: &[Entity]) {
        for sink in self.sinks() {
            sink.on_discovered(instance, entities).await;
        }
    }

    async fn notify_removed(&self, instance: &str) {
        for sink in self.sinks() {
            sink.on_removed(instance).await;
        }
    }

    /// Creates, configures and starts one instance. Returns its key.
    pub async fn initialize(
        &self,
        provider_type: &str,
        config: ProviderConfig,
    ) -> Result<String, FederationError> {
        if !self.registry.contains(provider_type) {
            return Err(FederationError::UnknownProviderType(provider_type.to_string()));
        }
        let key = entity::instance_key(provider_type, &config.instance_id);
        if self.instances.read().await.contains_key(&key) {
            return Err(FederationError::AlreadyInitialized(key));
        }

        self.registry
            .validate_config(provider_type, &config.settings)
            .map_err(|err| match err {
                RegistryError::MissingRequired { provider, missing } => {
                    FederationError::SchemaValidation { provider, missing }
                }
                other => FederationError::Registry(other),
            })?;

        let mut provider = self.registry.create(provider_type)?;
        provider
            .initialize(&config)
            .await
            .map_err(|err| FederationError::provider(key.clone(), err))?;

        let mut instances = self.instances.write().await;
        if instances.contains_key(&key) {
            drop(instances);
            if let Err(err) = provider.shutdown().await {
                warn!(instance = %key, error = %err, "duplicate instance failed to shut down");
            }
            return Err(FederationError::AlreadyInitialized(key));
        }
        let instance = ProviderInstance::new(key.clone(), provider_type, config, provider);
        instances.insert(key.clone(), Arc::new(instance));
        info!(instance = %key, "provider initialized");
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<ProviderInstance>> {
        self.instances.read().await.get(key).cloned()
    }

    async fn require(&self, key: &str) -> Result<Arc<ProviderInstance>, FederationError> {
        self.get(key)
            .await
            .ok_or_else(|| FederationError::NotInitialized(key.to_string()))
    }

    pub async fn keys(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    pub async fn instances_of_type(&self, provider_type: &str) -> Vec<String> {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.provider_type == provider_type)
            .map(|i| i.key.clone())
            .collect()
    }

    async fn connected(&self) -> Vec<Arc<ProviderInstance>> {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.is_connected())
            .cloned()
            .collect()
    }

    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        self.instances
            .read()
            .await
            .values()
            .map(|i| i.status())
            .collect()
    }

    pub async fn status(&self, key: &str) -> Option<ProviderStatus> {
        self.get(key).await.map(|i| i.status())
    }

    pub async fn discover(&self, key: &str) -> Result<Vec<Entity>, FederationError> {
        let instance = self.require(key).await?;
        let entities = instance
            .run_discovery(None)
            .await
            .map_err(|err| FederationError::provider(key, err))?;
        self.notify_discovered(key, &entities).await;
        Ok(entities)
    }

    pub async fn discover_since(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Entity>, FederationError> {
        let instance = self.require(key).await?;
        let entities = instance
            .run_discovery(Some(since))
            .await
            .map_err(|err| FederationError::provider(key, err))?;
        self.notify_discovered(key, &entities).await;
        Ok(entities)
    }

    /// Full discovery on every connected instance.
    pub async fn discover_all(&self, deadline: Instant) -> Result<FanOut, FederationError> {
        let targets = self.connected().await;
        self.discover_many(targets, deadline).await
    }

    /// Full discovery on the connected instances of one provider type.
    pub async fn discover_type(
        &self,
        provider_type: &str,
        deadline: Instant,
    ) -> Result<FanOut, FederationError> {
        let targets = self
            .connected()
            .await
            .into_iter()
            .filter(|i| i.provider_type == provider_type)
            .collect();
        self.discover_many(targets, deadline).await
    }

    async fn discover_many(
        &self,
        targets: Vec<Arc<ProviderInstance>>,
        deadline: Instant,
    ) -> Result<FanOut, FederationError> {
        let budget = budget_ms(deadline);
        let tasks = targets.into_iter().map(|instance| async move {
            debug!(instance = %instance.key, "discovery task started");
            let outcome = timeout_at(deadline, instance.run_discovery(None)).await;
            if outcome.is_err() {
                instance.record_failure("discovery timed out".to_string(), true);
            }
            (instance, outcome)
        });

        let mut fanout = FanOut::default();
        for (instance, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(entities)) => {
                    self.notify_discovered(&instance.key, &entities).await;
                    fanout.completed.push(instance.key.clone());
                    fanout.entities.extend(entities);
                }
                Ok(Err(err)) => {
                    warn!(
                        instance = %instance.key,
                        error = %err,
                        "discovery failed, excluding instance"
                    );
                    fanout.failures.push(SourceFailure::from_error(&instance.key, &err));
                }
                Err(_) => {
                    warn!(instance = %instance.key, "discovery timed out, excluding instance");
                    fanout.failures.push(SourceFailure::timeout(&instance.key, budget));
                }
            }
        }

        if fanout.all_failed() {
            return Err(FederationError::AllProvidersFailed {
                attempted: fanout.attempted(),
            });
        }
        Ok(fanout)
    }

    /// Runs `query` on every connected instance able to evaluate its filters.
    ///
    /// Filters are negotiated first: an instance that does not declare a
    /// filtered attribute sits the query out, while an instance declaring it
    /// with an unsupported operator fails the whole query.
    pub async fn search_all(
        &self,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<FanOut, FederationError> {
        let budget = budget_ms(deadline);
        let mut fanout = FanOut::default();
        let mut targets = self.connected().await;

        if !query.filters.is_empty() {
            let capability_checks = targets.iter().map(|instance| async move {
                (
                    Arc::clone(instance),
                    timeout_at(deadline, instance.provider.filter_capabilities()).await,
                )
            });

            let mut eligible = Vec::new();
            let mut undeclared = None;
            for (instance, outcome) in join_all(capability_checks).await {
                match outcome {
                    Ok(Ok(capabilities)) => {
                        match filters::negotiate(&instance.key, query, &capabilities)? {
                            Negotiation::Eligible => eligible.push(instance),
                            Negotiation::Skip { attribute } => {
                                debug!(
                                    instance = %instance.key,
                                    attribute = %attribute,
                                    "instance cannot filter, skipped"
                                );
                                undeclared.get_or_insert(attribute);
                                fanout.skipped.push(instance.key.clone());
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        warn!(
                            instance = %instance.key,
                            error = %err,
                            "filter capabilities unavailable"
                        );
                        instance.record_failure(err.to_string(), false);
                        fanout.failures.push(SourceFailure::from_error(&instance.key, &err));
                    }
                    Err(_) => {
                        warn!(instance = %instance.key, "filter capabilities timed out");
                        fanout.failures.push(SourceFailure::timeout(&instance.key, budget));
                    }
                }
            }

            if eligible.is_empty() && fanout.failures.is_empty() {
                if let Some(attribute) = undeclared {
                    return Err(FilterError::UnknownAttribute(attribute).into());
                }
            }
            targets = eligible;
        }

        let tasks = targets.into_iter().map(|instance| async move {
            let started = StdInstant::now();
            let outcome = timeout_at(deadline, instance.provider.search(query)).await;
            debug!(
                instance = %instance.key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "search task finished"
            );
            (instance, outcome)
        });

        for (instance, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(entities)) => {
                    fanout.completed.push(instance.key.clone());
                    fanout.entities.extend(entities);
                }
                Ok(Err(err)) => {
                    warn!(
                        instance = %instance.key,
                        error = %err,
                        "search failed, excluding instance"
                    );
                    instance.record_failure(err.to_string(), false);
                    fanout.failures.push(SourceFailure::from_error(&instance.key, &err));
                }
                Err(_) => {
                    warn!(instance = %instance.key, "search timed out, excluding instance");
                    instance.record_failure("search timed out".to_string(), false);
                    fanout.failures.push(SourceFailure::timeout(&instance.key, budget));
                }
            }
        }

        if fanout.all_failed() {
            return Err(FederationError::AllProvidersFailed {
                attempted: fanout.attempted(),
            });
        }
        Ok(fanout)
    }

    /// Instances that may own `id`: the routed instance when it is live,
    /// otherwise the connected instances of the same provider type.
    async fn route(&self, id: &EntityId) -> Result<Vec<Arc<ProviderInstance>>, FederationError> {
        if let Some(instance) = self.get(id.instance_key()).await {
            return Ok(vec![instance]);
        }
        let candidates: Vec<_> = self
            .connected()
            .await
            .into_iter()
            .filter(|i| i.provider_type == id.provider_type())
            .collect();
        if candidates.is_empty() {
            return Err(FederationError::NotInitialized(id.instance_key().to_string()));
        }
        debug!(
            id = %id,
            candidates = candidates.len(),
            "no instance for id, scanning provider type"
        );
        Ok(candidates)
    }

    pub async fn hydrate(&self, id: &EntityId) -> Result<Entity, FederationError> {
        let candidates = self.route(id).await?;
        let mut last = None;
        for instance in candidates {
            match instance.provider.hydrate(id).await {
                Ok(entity) => return Ok(entity),
                Err(err) if err.is_not_found() => last = Some((instance.key.clone(), err)),
                Err(err) => return Err(FederationError::provider(instance.key.clone(), err)),
            }
        }
        Err(not_found(id, last))
    }

    pub async fn get_related(
        &self,
        id: &EntityId,
        rel_type: &str,
    ) -> Result<Vec<Entity>, FederationError> {
        let candidates = self.route(id).await?;
        let mut last = None;
        for instance in candidates {
            match instance.provider.get_related(id, rel_type).await {
                Ok(entities) => return Ok(entities),
                Err(err) if err.is_not_found() => last = Some((instance.key.clone(), err)),
                Err(err) => return Err(FederationError::provider(instance.key.clone(), err)),
            }
        }
        Err(not_found(id, last))
    }

    pub async fn filter_capabilities(
        &self,
        key: &str,
    ) -> Result<BTreeMap<String, FilterCapability>, FederationError> {
        let instance = self.require(key).await?;
        instance
            .provider
            .filter_capabilities()
            .await
            .map_err(|err| FederationError::provider(key, err))
    }

    /// Capabilities of every connected instance; failing instances are left out.
    pub async fn filter_capabilities_all(
        &self,
    ) -> BTreeMap<String, BTreeMap<String, FilterCapability>> {
        let targets = self.connected().await;
        let capability_checks = targets.iter().map(|instance| async move {
            (
                instance.key.clone(),
                instance.provider.filter_capabilities().await,
            )
        });

        let mut all = BTreeMap::new();
        for (key, outcome) in join_all(capability_checks).await {
            match outcome {
                Ok(capabilities) => {
                    all.insert(key, capabilities);
                }
                Err(err) => warn!(instance = %key, error = %err, "filter capabilities unavailable"),
            }
        }
        all
    }

    /// Known values for `attribute` from every instance that publishes them.
    pub async fn filter_values(&self, attribute: &str) -> BTreeMap<String, Vec<FilterOption>> {
        let mut values = BTreeMap::new();
        for instance in self.connected().await {
            let Some(source) = instance.provider.as_filter_values() else {
                continue;
            };
            match source.filter_values(attribute).await {
                Ok(options) if !options.is_empty() => {
                    values.insert(instance.key.clone(), options);
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotSupported => {}
                Err(err) => warn!(
                    instance = %instance.key,
                    attribute = %attribute,
                    error = %err,
                    "filter values unavailable"
                ),
            }
        }
        values
    }

    /// Capabilities merged across instances, with known values attached.
    pub async fn filter_catalog(&self) -> FilterCatalog {
        let mut catalog = FilterCatalog::new();
        let all = self.filter_capabilities_all().await;
        for (key, capabilities) in &all {
            catalog.add_capabilities(key, capabilities);
        }
        let attributes: Vec<String> = catalog.filters.keys().cloned().collect();
        for attribute in attributes {
            for (_, options) in self.filter_values(&attribute).await {
                catalog.add_values(&attribute, options);
            }
        }
        catalog
    }

    /// Removes one instance and shuts it down.
    pub async fn shutdown(&self, key: &str) -> Result<(), FederationError> {
        let instance = self
            .instances
            .write()
            .await
            .remove(key)
            .ok_or_else(|| FederationError::NotInitialized(key.to_string()))?;
        self.notify_removed(key).await;
        instance.provider.shutdown().await.map_err(|err| {
            error!(instance = %key, error = %err, "provider shutdown failed");
            FederationError::provider(key, err)
        })?;
        info!(instance = %key, "provider shut down");
        Ok(())
    }

    /// Drains the table and shuts every instance down in key order, carrying
    /// on past failures.
    pub async fn shutdown_all(&self) -> Result<(), FederationError> {
        let drained = std::mem::take(&mut *self.instances.write().await);
        let mut errors = Vec::new();
        for (key, instance) in drained {
            self.notify_removed(&key).await;
            match instance.provider.shutdown().await {
                Ok(()) => info!(instance = %key, "provider shut down"),
                Err(err) => {
                    error!(instance = %key, error = %err, "provider shutdown failed");
                    errors.push((key, err));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FederationError::Shutdown(errors))
        }
    }
}

/// Time left before `deadline`, taken when a fan-out starts.
fn budget_ms(deadline: Instant) -> u64 {
    deadline
        .checked_duration_since(Instant::now())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn not_found(id: &EntityId, last: Option<(String, ProviderError)>) -> FederationError {
    match last {
        Some((key, err)) => FederationError::provider(key, err),
        None => FederationError::provider(
            id.instance_key().to_string(),
            ProviderError::NotFound(id.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> ProviderManager {
        ProviderManager::new(Arc::new(ProviderRegistry::with_builtin_providers()))
    }

    fn mock(instance: &str) -> ProviderConfig {
        ProviderConfig::new(instance).with_setting("entity_count", 4)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_initialize_errors_are_distinct() {
        let manager = manager();
        let key = manager.initialize("mock", mock("a")).await.unwrap();
        assert_eq!(key, "mock:a");
        assert!(manager.status("mock:a").await.unwrap().connected);

        let err = manager.initialize("mock", mock("a")).await.unwrap_err();
        assert!(matches!(err, FederationError::AlreadyInitialized(_)));

        let err = manager.initialize("plex", mock("a")).await.unwrap_err();
        assert!(matches!(err, FederationError::UnknownProviderType(_)));
    }

    #[cfg(feature = "localfs")]
    #[tokio::test]
    async fn test_initialize_validates_schema_then_provider() {
        let manager = manager();
        let err = manager
            .initialize("localfs", ProviderConfig::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::SchemaValidation { .. }));

        let err = manager
            .initialize(
                "localfs",
                ProviderConfig::new("x").with_setting("root", "/definitely/not/here"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "config");
    }

    #[tokio::test]
    async fn test_discover_updates_status() {
        let manager = manager();
        manager.initialize("mock", mock("a")).await.unwrap();
        manager
            .initialize("mock", mock("broken").with_setting("fail_discover", true))
            .await
            .unwrap();

        let entities = manager.discover("mock:a").await.unwrap();
        assert_eq!(entities.len(), 4);
        let status = manager.status("mock:a").await.unwrap();
        assert_eq!(status.entity_count, 4);
        assert!(status.last_discovery.is_some());

        let err = manager.discover("mock:broken").await.unwrap_err();
        assert!(err.to_string().contains("mock:broken"));
        let status = manager.status("mock:broken").await.unwrap();
        assert!(!status.connected);
        assert!(status.last_error.is_some());
        assert_eq!(manager.len().await, 2);

        assert!(matches!(
            manager.discover("mock:missing").await,
            Err(FederationError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_since_without_capability_keeps_status() {
        let manager = manager();
        manager.initialize("mock", mock("a")).await.unwrap();
        let err = manager.discover_since("mock:a", Utc::now()).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ErrorKind::NotSupported));
        assert!(manager.status("mock:a").await.unwrap().connected);
    }

    #[tokio::test]
    async fn test_search_all_on_empty_manager() {
        let fanout = manager().search_all(&SearchQuery::new(""), soon()).await.unwrap();
        assert!(fanout.entities.is_empty());
        assert_eq!(fanout.attempted(), 0);
    }

    #[tokio::test]
    async fn test_search_all_fails_only_when_every_instance_fails() {
        let manager = manager();
        manager
            .initialize("mock", mock("a").with_setting("fail_search", true))
            .await
            .unwrap();
        let err = manager.search_all(&SearchQuery::new(""), soon()).await.unwrap_err();
        assert!(matches!(err, FederationError::AllProvidersFailed { attempted: 1 }));

        manager.initialize("mock", mock("b")).await.unwrap();
        let fanout = manager.search_all(&SearchQuery::new(""), soon()).await.unwrap();
        assert_eq!(fanout.completed, vec!["mock:b"]);
        assert_eq!(fanout.failures[0].instance, "mock:a");
        assert_eq!(fanout.entities.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_all_treats_timeouts_as_failures() {
        let manager = manager();
        manager
            .initialize("mock", mock("slow").with_setting("latency_ms", 2_000))
            .await
            .unwrap();
        manager.initialize("mock", mock("fast")).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        let fanout = manager.search_all(&SearchQuery::new(""), deadline).await.unwrap();
        assert_eq!(fanout.completed, vec!["mock:fast"]);
        assert!(fanout.failures[0].is_timeout);
        assert_eq!(fanout.failures[0].error, "timeout after 100ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_all_reports_the_timeout_budget() {
        let manager = manager();
        manager
            .initialize("mock", mock("slow").with_setting("latency_ms", 2_000))
            .await
            .unwrap();
        manager.initialize("mock", mock("fast")).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(250);
        let fanout = manager.discover_all(deadline).await.unwrap();
        assert_eq!(fanout.failures[0].instance, "mock:slow");
        assert_eq!(fanout.failures[0].error, "timeout after 250ms");
        assert!(!manager.status("mock:slow").await.unwrap().connected);
    }

    async fn timed_discover(
        manager: Arc<ProviderManager>,
        key: &str,
        started: Instant,
    ) -> Duration {
        manager.discover(key).await.unwrap();
        started.elapsed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_discoveries_serialize_per_instance_only() {
        let manager = Arc::new(manager());
        for name in ["a", "b"] {
            manager
                .initialize("mock", mock(name).with_setting("latency_ms", 500))
                .await
                .unwrap();
        }

        let latency = Duration::from_millis(500);
        let started = Instant::now();
        let observer = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let a = manager.status("mock:a").await.unwrap();
            let b = manager.status("mock:b").await.unwrap();
            (a, b, started.elapsed())
        };
        let (first, second, other, (status_a, status_b, observed_at)) = tokio::join!(
            timed_discover(manager.clone(), "mock:a", started),
            timed_discover(manager.clone(), "mock:a", started),
            timed_discover(manager.clone(), "mock:b", started),
            observer,
        );

        assert!(first.min(second) >= latency);
        assert!(first.max(second) >= latency * 2);
        assert!(other >= latency && other < latency * 2);

        // Status stays readable while both instances are mid-discovery.
        assert!(observed_at < latency);
        assert!(status_a.connected && status_a.last_discovery.is_none());
        assert!(status_b.connected && status_b.last_discovery.is_none());
        assert_eq!(manager.status("mock:a").await.unwrap().entity_count, 4);
    }

    #[tokio::test]
    async fn test_hydrate_routes_by_instance_key() {
        let manager = manager();
        manager.initialize("mock", mock("a")).await.unwrap();
        manager.initialize("mock", mock("b")).await.unwrap();

        let id = EntityId::new("mock", "b", "entity-0002");
        let entity = manager.hydrate(&id).await.unwrap();
        assert_eq!(entity.id, id);

        let err = manager
            .hydrate(&EntityId::new("mock", "b", "entity-9999"))
            .await
            .unwrap_err();
        assert_eq!(err.provider_kind(), Some(ErrorKind::NotFound));

        let err = manager
            .hydrate(&EntityId::new("localfs", "x", "a.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_shutdown_all_drains_table() {
        let manager = manager();
        manager.initialize("mock", mock("a")).await.unwrap();
        manager
            .initialize("mock", mock("b").with_setting("fail_shutdown", true))
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();
        match err {
            FederationError::Shutdown(errors) => assert_eq!(errors[0].0, "mock:b"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(manager.is_empty().await);
    }
}

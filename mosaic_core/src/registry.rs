//! Catalog of provider types: name → description, config schema, factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::capabilities::ProviderConfigSchema;
use crate::provider::Provider;

pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("provider type name must not be empty")]
    EmptyName,

    #[error("provider type {0} registered without a factory")]
    MissingFactory(String),

    #[error("provider type already registered: {0}")]
    Duplicate(String),

    #[error("unknown provider type: {0}")]
    Unknown(String),

    #[error("provider {provider} is missing required config fields {missing:?}")]
    MissingRequired {
        provider: String,
        missing: Vec<String>,
    },
}

#[derive(Clone)]
pub struct ProviderRegistration {
    pub name: String,
    pub description: String,
    pub schema: ProviderConfigSchema,
    pub factory: Option<ProviderFactory>,
}

impl ProviderRegistration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: ProviderConfigSchema::default(),
            factory: None,
        }
    }

    pub fn with_schema(mut self, schema: ProviderConfigSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Registration taking name, description and schema from a default instance.
    pub fn of<P>() -> Self
    where
        P: Provider + Default + 'static,
    {
        let sample = P::default();
        Self::new(sample.name(), sample.description())
            .with_schema(sample.config_schema())
            .with_factory(|| Box::new(P::default()) as Box<dyn Provider>)
    }
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

/// What `list` reports for each registered type.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderTypeInfo {
    pub name: String,
    pub description: String,
    pub schema: ProviderConfigSchema,
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderRegistration>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled `mock` and `localfs` providers.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        let registrations = vec![
            ProviderRegistration::of::<crate::connectors::mock::MockProvider>(),
            #[cfg(feature = "localfs")]
            ProviderRegistration::of::<crate::connectors::localfs::LocalFsProvider>(),
        ];
        for registration in registrations {
            if let Err(err) = registry.register(registration) {
                tracing::error!(error = %err, "built-in provider rejected");
            }
        }
        registry
    }

    pub fn register(&mut self, registration: ProviderRegistration) -> Result<(), RegistryError> {
        if registration.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if registration.factory.is_none() {
            return Err(RegistryError::MissingFactory(registration.name));
        }
        if self.providers.contains_key(&registration.name) {
            return Err(RegistryError::Duplicate(registration.name));
        }
        tracing::debug!(provider = %registration.name, "registered provider type");
        self.providers
            .insert(registration.name.clone(), registration);
        Ok(())
    }

    /// A fresh, uninitialized provider.
    pub fn create(&self, name: &str) -> Result<Box<dyn Provider>, RegistryError> {
        let registration = self
            .providers
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        let factory = registration
            .factory
            .as_ref()
            .ok_or_else(|| RegistryError::MissingFactory(name.to_string()))?;
        Ok(factory())
    }

    /// Checks only that required schema fields are present.
    pub fn validate_config(
        &self,
        name: &str,
        settings: &Map<String, Value>,
    ) -> Result<(), RegistryError> {
        let registration = self
            .providers
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        let missing = registration.schema.missing_required(settings);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingRequired {
                provider: name.to_string(),
                missing,
            })
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&ProviderConfigSchema> {
        self.providers.get(name).map(|r| &r.schema)
    }

    pub fn list(&self) -> Vec<ProviderTypeInfo> {
        self.providers
            .values()
            .map(|r| ProviderTypeInfo {
                name: r.name.clone(),
                description: r.description.clone(),
                schema: r.schema.clone(),
            })
            .collect()
    }
}

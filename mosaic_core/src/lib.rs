// src/lib.rs
pub mod capabilities; // Provider config schema
pub mod config;
pub mod connectors;
pub mod entity;
pub mod error;
pub mod federated;
pub mod filters;
pub mod manager;
pub mod mcp_server;
pub mod provider;
pub mod ranking;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export types from rmcp that users of the tool surface might need
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, InitializeResult, ListToolsResult, Tool,
};

pub use crate::capabilities::ProviderConfigSchema;
pub use crate::config::{build_federation, ConfigError, FederationConfig};
pub use crate::entity::{AttributeValue, Entity, EntityId, EntityIdError, Relationship};
pub use crate::error::{ErrorKind, FederationError, ProviderError};
pub use crate::federated::{Federator, FederatorConfig, SearchQuery, SearchResult};
pub use crate::filters::{FilterCapability, FilterClause, FilterError, FilterOption};
pub use crate::manager::{ProviderManager, ProviderStatus};
pub use crate::provider::{FilterValuesProvider, Provider, ProviderConfig};
pub use crate::ranking::{LocalRanker, RankingStrategy};
pub use crate::registry::{ProviderRegistration, ProviderRegistry, RegistryError};
pub use crate::types::{AttributeType, TypeDefinition, TypeRegistry, TypeRegistryError};

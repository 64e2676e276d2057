// src/error.rs
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ConfigError;
use crate::entity::EntityIdError;
use crate::filters::FilterError;
use crate::registry::RegistryError;
use crate::types::TypeRegistryError;

/// Classification shared by every provider failure.
///
/// The manager only looks at the kind when deciding status transitions, so a
/// provider never needs its own error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Auth,
    NotFound,
    NotSupported,
    RateLimit,
    Temporary,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Temporary => "temporary",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Temporary failure: {0}")]
    Temporary(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Config(_) => ErrorKind::Config,
            ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::NotSupported(_) => ErrorKind::NotSupported,
            ProviderError::RateLimit(_) => ErrorKind::RateLimit,
            ProviderError::Temporary(_) => ErrorKind::Temporary,
            ProviderError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::Temporary)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn code_str(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn not_supported(capability: &str) -> Self {
        ProviderError::NotSupported(capability.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::NotFound => ProviderError::NotFound(err.to_string()),
            Io::PermissionDenied => ProviderError::Auth(err.to_string()),
            Io::TimedOut | Io::Interrupted | Io::WouldBlock | Io::ConnectionReset => {
                ProviderError::Temporary(err.to_string())
            }
            _ => ProviderError::Unknown(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 | 403 => ProviderError::Auth(err.to_string()),
                404 => ProviderError::NotFound(err.to_string()),
                429 => ProviderError::RateLimit(err.to_string()),
                500..=599 => ProviderError::Temporary(err.to_string()),
                _ => ProviderError::Unknown(err.to_string()),
            };
        }
        if err.is_timeout() || err.is_connect() {
            ProviderError::Temporary(err.to_string())
        } else {
            ProviderError::Unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Unknown(format!("malformed payload: {}", err))
    }
}

/// Errors raised by the orchestration layer (manager, federator, bootstrap).
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("Provider instance already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Provider instance not initialized: {0}")]
    NotInitialized(String),

    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    #[error("Schema validation failed for {provider}: missing required fields {missing:?}")]
    SchemaValidation {
        provider: String,
        missing: Vec<String>,
    },

    #[error("Entity ID malformed: {0}")]
    InvalidEntityId(#[from] EntityIdError),

    #[error("Provider {instance} failed: {source}")]
    Provider {
        instance: String,
        #[source]
        source: ProviderError,
    },

    #[error("All {attempted} providers failed")]
    AllProvidersFailed { attempted: usize },

    #[error("Shutdown reported {} error(s)", .0.len())]
    Shutdown(Vec<(String, ProviderError)>),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Type registry error: {0}")]
    TypeRegistry(#[from] TypeRegistryError),

    #[error("Provider registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ranking error: {0}")]
    Ranking(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl FederationError {
    pub fn provider(instance: impl Into<String>, source: ProviderError) -> Self {
        FederationError::Provider {
            instance: instance.into(),
            source,
        }
    }

    /// The provider-origin kind, when this error wraps a provider failure.
    pub fn provider_kind(&self) -> Option<ErrorKind> {
        match self {
            FederationError::Provider { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            FederationError::AlreadyInitialized(_) => "already_initialized",
            FederationError::NotInitialized(_) => "not_initialized",
            FederationError::UnknownProviderType(_) => "unknown_provider",
            FederationError::SchemaValidation { .. } => "schema_validation_failed",
            FederationError::InvalidEntityId(_) => "invalid_entity_id",
            FederationError::Provider { source, .. } => source.code_str(),
            FederationError::AllProvidersFailed { .. } => "all_providers_failed",
            FederationError::Shutdown(_) => "shutdown_failed",
            FederationError::Filter(_) => "unsupported_filter",
            FederationError::TypeRegistry(_) => "type_registry",
            FederationError::Registry(_) => "provider_registry",
            FederationError::Ranking(_) => "ranking_failed",
            FederationError::Config(_) => "config",
            FederationError::Timeout(_) => "timeout",
        }
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let code = match self {
            FederationError::InvalidEntityId(_)
            | FederationError::Filter(_)
            | FederationError::SchemaValidation { .. } => -32602,
            FederationError::Provider { source, .. } if source.is_not_found() => -32602,
            _ => -32603,
        };

        json!({
            "code": code,
            "message": self.to_string(),
            "data": { "kind": self.code_str() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_provider_error_has_one_kind() {
        let cases = [
            (ProviderError::Config("x".into()), "config"),
            (ProviderError::Auth("x".into()), "auth"),
            (ProviderError::NotFound("x".into()), "not_found"),
            (ProviderError::NotSupported("x".into()), "not_supported"),
            (ProviderError::RateLimit("x".into()), "rate_limit"),
            (ProviderError::Temporary("x".into()), "temporary"),
            (ProviderError::Unknown("x".into()), "unknown"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code_str(), code);
        }
    }

    #[test]
    fn test_io_error_classification() {
        let err: ProviderError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_not_found());

        let err: ProviderError =
            std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_jsonrpc_error_shape() {
        let err = FederationError::provider("mock:default", ProviderError::NotFound("id".into()));
        let value = err.to_jsonrpc_error();
        assert_eq!(value["code"], -32602);
        assert_eq!(value["data"]["kind"], "not_found");

        let err = FederationError::AllProvidersFailed { attempted: 3 };
        assert_eq!(err.to_jsonrpc_error()["code"], -32603);
    }
}

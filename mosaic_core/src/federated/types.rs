//! Query and result types shared by the manager and the federator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{ErrorKind, ProviderError};
use crate::filters::{Facets, FilterClause};

/// Overall deadline for one federated search.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Page size used when a query asks for `limit == 0`.
pub const DEFAULT_LIMIT: usize = 50;

/// Upper bound on a single page.
pub const MAX_LIMIT: usize = 1_000;

/// A federated search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text; empty matches everything.
    #[serde(default)]
    pub query: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, FilterClause>,

    /// Restricts results to this type and its subtypes.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Keeps only entities that carry at least one relationship of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,

    #[serde(default)]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, clause: FilterClause) -> Self {
        self.filters.insert(attribute.into(), clause);
        self
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_relationship_type(mut self, rel_type: impl Into<String>) -> Self {
        self.relationship_type = Some(rel_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Page size after applying the default and the cap.
    pub fn effective_limit(&self, default_limit: usize, max_limit: usize) -> usize {
        let limit = if self.limit == 0 { default_limit } else { self.limit };
        limit.min(max_limit)
    }

    /// Lower-cased whitespace-separated terms of the free-text query.
    pub fn terms(&self) -> Vec<String> {
        self.query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}

/// An instance that failed or timed out during a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    /// Instance key that failed
    pub instance: String,

    /// Provider error kind; absent for timeouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,

    pub error: String,

    #[serde(default)]
    pub is_timeout: bool,
}

impl SourceFailure {
    pub fn from_error(instance: impl Into<String>, err: &ProviderError) -> Self {
        Self {
            instance: instance.into(),
            kind: Some(err.kind()),
            error: err.to_string(),
            is_timeout: false,
        }
    }

    pub fn timeout(instance: impl Into<String>, after_ms: u64) -> Self {
        Self {
            instance: instance.into(),
            kind: None,
            error: format!("timeout after {}ms", after_ms),
            is_timeout: true,
        }
    }
}

/// Raw outcome of one fan-out, before ranking and pagination.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    pub entities: Vec<Entity>,

    /// Instances that answered
    pub completed: Vec<String>,

    pub failures: Vec<SourceFailure>,

    /// Instances that could not evaluate one of the query's filters
    pub skipped: Vec<String>,
}

impl FanOut {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failures.len()
    }

    /// True when at least one instance was attempted and none answered.
    pub fn all_failed(&self) -> bool {
        self.completed.is_empty() && !self.failures.is_empty()
    }
}

/// A ranked, paginated answer to a [`SearchQuery`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub entities: Vec<Entity>,

    /// Size of the merged set before pagination
    pub total_count: usize,

    /// Entity type → count over the merged set
    pub type_counts: BTreeMap<String, usize>,

    pub has_more: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: Facets,

    pub completed: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SourceFailure>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,

    /// Whether some instances failed or timed out
    #[serde(default)]
    pub partial: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

//! Filter negotiation, in-process evaluation and facet aggregation.
//!
//! A query's filter clauses are checked against the capability map each
//! provider instance declares. The provider's declaration is authoritative:
//! the type schema only says an attribute *could* be filtered. A clause a
//! provider declares but cannot evaluate fails the query; clauses are never
//! dropped.

use std::collections::BTreeMap;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::entity::{AttributeValue, Entity};
use crate::federated::SearchQuery;
use crate::types::{AttributeType, TypeRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    Eq,
    Ne,
    Range,
    Glob,
    Substring,
}

impl PredicateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateKind::Eq => "eq",
            PredicateKind::Ne => "ne",
            PredicateKind::Range => "range",
            PredicateKind::Glob => "glob",
            PredicateKind::Substring => "contains",
        }
    }
}

impl std::fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterPredicate {
    Eq {
        value: AttributeValue,
    },
    Ne {
        value: AttributeValue,
    },
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<AttributeValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<AttributeValue>,
    },
    Glob {
        pattern: String,
    },
    Contains {
        value: String,
    },
}

impl FilterPredicate {
    pub fn kind(&self) -> PredicateKind {
        match self {
            FilterPredicate::Eq { .. } => PredicateKind::Eq,
            FilterPredicate::Ne { .. } => PredicateKind::Ne,
            FilterPredicate::Range { .. } => PredicateKind::Range,
            FilterPredicate::Glob { .. } => PredicateKind::Glob,
            FilterPredicate::Contains { .. } => PredicateKind::Substring,
        }
    }
}

/// A filter as callers write it: a bare value means equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterClause {
    Predicate(FilterPredicate),
    Value(AttributeValue),
}

impl FilterClause {
    pub fn eq(value: impl Into<AttributeValue>) -> Self {
        FilterClause::Value(value.into())
    }

    pub fn ne(value: impl Into<AttributeValue>) -> Self {
        FilterClause::Predicate(FilterPredicate::Ne {
            value: value.into(),
        })
    }

    pub fn range(min: Option<AttributeValue>, max: Option<AttributeValue>) -> Self {
        FilterClause::Predicate(FilterPredicate::Range { min, max })
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        FilterClause::Predicate(FilterPredicate::Glob {
            pattern: pattern.into(),
        })
    }

    pub fn contains(value: impl Into<String>) -> Self {
        FilterClause::Predicate(FilterPredicate::Contains {
            value: value.into(),
        })
    }

    pub fn predicate(&self) -> FilterPredicate {
        match self {
            FilterClause::Predicate(p) => p.clone(),
            FilterClause::Value(v) => FilterPredicate::Eq { value: v.clone() },
        }
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            FilterClause::Predicate(p) => p.kind(),
            FilterClause::Value(_) => PredicateKind::Eq,
        }
    }
}

/// What one provider instance can do with one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCapability {
    #[serde(default)]
    pub supports_eq: bool,
    #[serde(default)]
    pub supports_ne: bool,
    #[serde(default)]
    pub supports_range: bool,
    #[serde(default)]
    pub supports_glob: bool,
    #[serde(default)]
    pub supports_substring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Closed vocabulary, when the attribute has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FilterCapability {
    /// Equality and inequality.
    pub fn equality() -> Self {
        Self {
            supports_eq: true,
            supports_ne: true,
            ..Self::default()
        }
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            supports_range: true,
            min,
            max,
            ..Self::default()
        }
    }

    pub fn text() -> Self {
        Self {
            supports_eq: true,
            supports_ne: true,
            supports_glob: true,
            supports_substring: true,
            ..Self::default()
        }
    }

    pub fn with_range(mut self) -> Self {
        self.supports_range = true;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn supports(&self, kind: PredicateKind) -> bool {
        match kind {
            PredicateKind::Eq => self.supports_eq,
            PredicateKind::Ne => self.supports_ne,
            PredicateKind::Range => self.supports_range,
            PredicateKind::Glob => self.supports_glob,
            PredicateKind::Substring => self.supports_substring,
        }
    }

    /// Union of two declarations, used when listing filters across instances.
    pub fn merge(&mut self, other: &FilterCapability) {
        self.supports_eq |= other.supports_eq;
        self.supports_ne |= other.supports_ne;
        self.supports_range |= other.supports_range;
        self.supports_glob |= other.supports_glob;
        self.supports_substring |= other.supports_substring;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        self.options = match (self.options.take(), &other.options) {
            (Some(mut mine), Some(theirs)) => {
                for option in theirs {
                    if !mine.contains(option) {
                        mine.push(option.clone());
                    }
                }
                mine.sort();
                Some(mine)
            }
            _ => None,
        };
    }
}

/// One pre-known value of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl FilterOption {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: None,
            count: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("no provider can filter on attribute {0}")]
    UnknownAttribute(String),

    #[error(
        "{op} is not supported on attribute {attribute}{}",
        provider.as_ref().map(|p| format!(" by {p}")).unwrap_or_default()
    )]
    Unsupported {
        attribute: String,
        op: PredicateKind,
        provider: Option<String>,
    },

    #[error("value {value} for {attribute} is outside [{min:?}, {max:?}]")]
    OutOfRange {
        attribute: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("{value:?} is not a valid option for {attribute}")]
    NotAnOption { attribute: String, value: String },

    #[error("attribute {attribute} expects {expected}, got {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("range on {0} needs a numeric or time bound")]
    NonNumericBound(String),

    #[error("invalid glob pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl FilterError {
    fn with_provider(self, instance: &str) -> Self {
        match self {
            FilterError::Unsupported { attribute, op, .. } => FilterError::Unsupported {
                attribute,
                op,
                provider: Some(instance.to_string()),
            },
            other => other,
        }
    }
}

/// Checks one clause against one declared capability.
pub fn validate_clause(
    attribute: &str,
    clause: &FilterClause,
    capability: &FilterCapability,
) -> Result<(), FilterError> {
    let predicate = clause.predicate();
    let kind = predicate.kind();
    if !capability.supports(kind) {
        return Err(FilterError::Unsupported {
            attribute: attribute.to_string(),
            op: kind,
            provider: None,
        });
    }

    match &predicate {
        FilterPredicate::Eq { value } | FilterPredicate::Ne { value } => {
            if let Some(options) = &capability.options {
                let key = value.facet_key();
                if !options.iter().any(|o| o == &key) {
                    return Err(FilterError::NotAnOption {
                        attribute: attribute.to_string(),
                        value: key,
                    });
                }
            }
        }
        FilterPredicate::Range { min, max } => {
            for bound in [min, max].into_iter().flatten() {
                let value = bound
                    .as_f64()
                    .ok_or_else(|| FilterError::NonNumericBound(attribute.to_string()))?;
                let below = capability.min.is_some_and(|lo| value < lo);
                let above = capability.max.is_some_and(|hi| value > hi);
                if below || above {
                    return Err(FilterError::OutOfRange {
                        attribute: attribute.to_string(),
                        value,
                        min: capability.min,
                        max: capability.max,
                    });
                }
            }
        }
        FilterPredicate::Glob { pattern } => {
            compile_glob(pattern)?;
        }
        FilterPredicate::Contains { .. } => {}
    }
    Ok(())
}

/// Checks filter values against the attribute types of the query's entity
/// type. Attributes the schema does not know are left to the providers.
pub fn check_schema(query: &SearchQuery, types: &TypeRegistry) -> Result<(), FilterError> {
    let Some(entity_type) = query.entity_type.as_deref() else {
        return Ok(());
    };
    let schema = types.resolve_or_root(entity_type);
    for (attribute, clause) in &query.filters {
        let Some(def) = schema.get(attribute) else {
            continue;
        };
        let predicate = clause.predicate();
        let is_range = matches!(predicate, FilterPredicate::Range { .. });
        let values: Vec<AttributeValue> = match predicate {
            FilterPredicate::Eq { value } | FilterPredicate::Ne { value } => vec![value],
            FilterPredicate::Range { min, max } => {
                if !def.attr_type.is_numeric() {
                    return Err(FilterError::TypeMismatch {
                        attribute: attribute.clone(),
                        expected: "numeric or time attribute".to_string(),
                        found: format!("{:?}", def.attr_type).to_lowercase(),
                    });
                }
                min.into_iter().chain(max).collect()
            }
            FilterPredicate::Glob { .. } | FilterPredicate::Contains { .. } => Vec::new(),
        };
        for value in values {
            if let AttributeValue::List(_) = value {
                continue;
            }
            let found = value.type_name();
            // Range bounds compare numerically: epoch numbers bound time
            // attributes and fractional bounds apply to integer ones.
            let numeric_bound = is_range
                && matches!(value, AttributeValue::Int(_) | AttributeValue::Float(_))
                && matches!(
                    def.attr_type,
                    AttributeType::Time | AttributeType::Int | AttributeType::Int64
                );
            if !def.attr_type.accepts(found) && !numeric_bound {
                return Err(FilterError::TypeMismatch {
                    attribute: attribute.clone(),
                    expected: format!("{:?}", def.attr_type).to_lowercase(),
                    found: found.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Outcome of negotiating a query with one provider instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    /// The instance can evaluate every clause.
    Eligible,
    /// The instance does not declare `attribute`, so it cannot take part.
    Skip { attribute: String },
}

/// Negotiates a query with one instance's capability map.
///
/// An attribute the instance never declared excludes that instance from the
/// query. A declared attribute with an unsupported operator or bad value is a
/// hard error for the whole query.
pub fn negotiate(
    instance: &str,
    query: &SearchQuery,
    capabilities: &BTreeMap<String, FilterCapability>,
) -> Result<Negotiation, FilterError> {
    let mut skip = None;
    for (attribute, clause) in &query.filters {
        match capabilities.get(attribute) {
            Some(capability) => {
                validate_clause(attribute, clause, capability)
                    .map_err(|e| e.with_provider(instance))?;
            }
            None => {
                if skip.is_none() {
                    skip = Some(attribute.clone());
                }
            }
        }
    }
    Ok(match skip {
        Some(attribute) => Negotiation::Skip { attribute },
        None => Negotiation::Eligible,
    })
}

fn compile_glob(pattern: &str) -> Result<globset::GlobMatcher, FilterError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn values_equal(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    match (actual, expected) {
        (AttributeValue::List(items), _) => items.iter().any(|item| values_equal(item, expected)),
        (AttributeValue::Text(a), AttributeValue::Text(b)) => a == b,
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.facet_key() == b.facet_key(),
        },
    }
}

/// Evaluates all clauses against one entity. Missing attributes only satisfy
/// `ne`.
pub fn matches(
    entity: &Entity,
    filters: &BTreeMap<String, FilterClause>,
) -> Result<bool, FilterError> {
    for (attribute, clause) in filters {
        let actual = entity.attribute(attribute);
        let ok = match (clause.predicate(), actual) {
            (FilterPredicate::Ne { value }, Some(actual)) => !values_equal(actual, &value),
            (FilterPredicate::Ne { .. }, None) => true,
            (_, None) => false,
            (FilterPredicate::Eq { value }, Some(actual)) => values_equal(actual, &value),
            (FilterPredicate::Range { min, max }, Some(actual)) => match actual.as_f64() {
                Some(v) => {
                    let lo = min.as_ref().and_then(AttributeValue::as_f64);
                    let hi = max.as_ref().and_then(AttributeValue::as_f64);
                    lo.map_or(true, |lo| v >= lo) && hi.map_or(true, |hi| v <= hi)
                }
                None => false,
            },
            (FilterPredicate::Glob { pattern }, Some(actual)) => {
                let matcher = compile_glob(&pattern)?;
                match actual {
                    AttributeValue::List(items) => {
                        items.iter().any(|i| matcher.is_match(i.facet_key()))
                    }
                    other => matcher.is_match(other.facet_key()),
                }
            }
            (FilterPredicate::Contains { value }, Some(actual)) => actual
                .facet_key()
                .to_lowercase()
                .contains(&value.to_lowercase()),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn facet_values(value: &AttributeValue) -> Vec<String> {
    match value {
        AttributeValue::List(items) => items.iter().flat_map(facet_values).collect(),
        AttributeValue::Gps(_) => Vec::new(),
        AttributeValue::Time(t) => vec![t.format("%Y-%m").to_string()],
        other => vec![other.facet_key()],
    }
}

/// attribute → value → count
pub type Facets = BTreeMap<String, BTreeMap<String, usize>>;

/// Counts distinct values of filterable attributes over `entities`. Times are
/// bucketed by month; coordinates are not faceted.
pub fn compute_facets(entities: &[Entity], types: &TypeRegistry) -> Facets {
    let mut schemas: BTreeMap<&str, BTreeMap<String, crate::types::AttributeDef>> = BTreeMap::new();
    let mut facets = Facets::new();
    for entity in entities {
        let schema = schemas
            .entry(entity.entity_type.as_str())
            .or_insert_with(|| types.resolve_or_root(&entity.entity_type));
        for (name, value) in &entity.attributes {
            if !schema.get(name).is_some_and(|def| def.filterable) {
                continue;
            }
            let buckets = facets.entry(name.clone()).or_default();
            for key in facet_values(value) {
                *buckets.entry(key).or_insert(0) += 1;
            }
        }
    }
    facets.retain(|_, buckets| !buckets.is_empty());
    facets
}

pub fn type_counts(entities: &[Entity]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entity in entities {
        *counts.entry(entity.entity_type.clone()).or_insert(0) += 1;
    }
    counts
}

/// One attribute in the federation-wide filter listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub attribute: String,
    pub capability: FilterCapability,
    pub providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FilterOption>,
}

/// Filters available across instances, keyed by attribute, plus value
/// counts over the entities currently in scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterCatalog {
    pub filters: BTreeMap<String, FilterDescriptor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: Facets,
}

impl FilterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_capabilities(
        &mut self,
        instance: &str,
        capabilities: &BTreeMap<String, FilterCapability>,
    ) {
        for (attribute, capability) in capabilities {
            match self.filters.get_mut(attribute) {
                Some(descriptor) => {
                    descriptor.capability.merge(capability);
                    descriptor.providers.push(instance.to_string());
                }
                None => {
                    self.filters.insert(
                        attribute.clone(),
                        FilterDescriptor {
                            attribute: attribute.clone(),
                            capability: capability.clone(),
                            providers: vec![instance.to_string()],
                            values: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    /// Adds known values; duplicates across instances have their counts summed.
    pub fn add_values(&mut self, attribute: &str, values: Vec<FilterOption>) {
        let Some(descriptor) = self.filters.get_mut(attribute) else {
            return;
        };
        for option in values {
            match descriptor.values.iter_mut().find(|o| o.value == option.value) {
                Some(existing) => {
                    existing.count = match (existing.count, option.count) {
                        (Some(a), Some(b)) => Some(a + b),
                        (a, b) => a.or(b),
                    };
                    if existing.label.is_none() {
                        existing.label = option.label;
                    }
                }
                None => descriptor.values.push(option),
            }
        }
        descriptor.values.sort_by(|a, b| a.value.cmp(&b.value));
    }

    /// Merges facet counts from a result set, summing shared buckets.
    pub fn add_facets(&mut self, facets: &Facets) {
        for (attribute, buckets) in facets {
            let merged = self.facets.entry(attribute.clone()).or_default();
            for (value, count) in buckets {
                *merged.entry(value.clone()).or_insert(0) += count;
            }
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&FilterDescriptor> {
        self.filters.get(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use serde_json::json;

    fn caps() -> BTreeMap<String, FilterCapability> {
        let mut caps = BTreeMap::new();
        caps.insert(
            "camera".to_string(),
            FilterCapability {
                supports_eq: false,
                supports_substring: true,
                ..FilterCapability::default()
            },
        );
        caps.insert("size".to_string(), FilterCapability::range(Some(0.0), Some(1_000_000.0)));
        caps.insert(
            "extension".to_string(),
            FilterCapability::equality().with_options(["jpg", "mp4"]),
        );
        caps
    }

    /// Every filtered attribute must be declared by `capabilities`.
    fn validate_query(
        query: &SearchQuery,
        capabilities: &BTreeMap<String, FilterCapability>,
    ) -> Result<(), FilterError> {
        for (attribute, clause) in &query.filters {
            let capability = capabilities
                .get(attribute)
                .ok_or_else(|| FilterError::UnknownAttribute(attribute.clone()))?;
            validate_clause(attribute, clause, capability)?;
        }
        Ok(())
    }

    fn query_with(attribute: &str, clause: FilterClause) -> SearchQuery {
        SearchQuery::new("").with_filter(attribute, clause)
    }

    #[test]
    fn test_equality_rejected_when_not_supported() {
        let query = query_with("camera", FilterClause::eq("Pixel 8"));
        let err = validate_query(&query, &caps()).unwrap_err();
        assert!(matches!(
            err,
            FilterError::Unsupported {
                op: PredicateKind::Eq,
                ..
            }
        ));
    }

    #[test]
    fn test_substring_accepted_when_supported() {
        let query = query_with("camera", FilterClause::contains("pixel"));
        assert!(validate_query(&query, &caps()).is_ok());
    }

    #[test]
    fn test_range_bounds_and_options() {
        let too_big = FilterClause::range(None, Some(AttributeValue::Int(5_000_000)));
        let query = query_with("size", too_big);
        assert!(matches!(validate_query(&query, &caps()), Err(FilterError::OutOfRange { .. })));

        let query = query_with("extension", FilterClause::eq("png"));
        assert!(matches!(validate_query(&query, &caps()), Err(FilterError::NotAnOption { .. })));

        let query = query_with("extension", FilterClause::eq("jpg"));
        assert!(validate_query(&query, &caps()).is_ok());
    }

    #[test]
    fn test_negotiate_skips_undeclared_attributes_but_fails_unsupported_ops() {
        let long = FilterClause::range(Some(AttributeValue::Int(60)), None);
        let query = query_with("duration", long);
        assert_eq!(
            negotiate("mock:a", &query, &caps()).unwrap(),
            Negotiation::Skip {
                attribute: "duration".into()
            }
        );

        let query = query_with("camera", FilterClause::eq("Pixel"));
        let err = negotiate("mock:a", &query, &caps()).unwrap_err();
        assert!(err.to_string().contains("mock:a"));
    }

    #[test]
    fn test_clause_json_forms() {
        let clause: FilterClause = serde_json::from_value(json!("jpg")).unwrap();
        assert_eq!(clause.kind(), PredicateKind::Eq);

        let clause: FilterClause =
            serde_json::from_value(json!({"op": "range", "min": 10})).unwrap();
        assert_eq!(
            clause.predicate(),
            FilterPredicate::Range {
                min: Some(AttributeValue::Int(10)),
                max: None
            }
        );

        let clause: FilterClause =
            serde_json::from_value(json!({"op": "glob", "pattern": "*.jpg"})).unwrap();
        assert_eq!(clause.kind(), PredicateKind::Glob);
    }

    #[test]
    fn test_check_schema_type_mismatch() {
        let types = TypeRegistry::with_builtin_types();
        let query = SearchQuery::new("")
            .with_type("file.media.video")
            .with_filter("duration", FilterClause::eq("long"));
        assert!(matches!(check_schema(&query, &types), Err(FilterError::TypeMismatch { .. })));

        let query = SearchQuery::new("")
            .with_type("file.media.video")
            .with_filter("duration", FilterClause::range(Some(AttributeValue::Int(30)), None));
        assert!(check_schema(&query, &types).is_ok());
    }

    #[test]
    fn test_fractional_range_bounds_on_integer_attributes() {
        let types = TypeRegistry::with_builtin_types();
        let bounds = FilterClause::range(
            Some(AttributeValue::Float(1.5)),
            Some(AttributeValue::Float(2.5)),
        );
        let query = SearchQuery::new("")
            .with_type("file")
            .with_filter("size", bounds.clone());
        assert!(check_schema(&query, &types).is_ok());

        let mut filters = BTreeMap::new();
        filters.insert("size".to_string(), bounds);
        assert!(matches(&photo("a", "jpg", 2), &filters).unwrap());
        assert!(!matches(&photo("b", "jpg", 3), &filters).unwrap());

        // Equality keeps the declared type.
        let query = SearchQuery::new("")
            .with_type("file")
            .with_filter("size", FilterClause::eq(1.5));
        assert!(matches!(check_schema(&query, &types), Err(FilterError::TypeMismatch { .. })));
    }

    fn photo(resource: &str, ext: &str, size: i64) -> Entity {
        Entity::new(
            EntityId::new("mock", "default", resource),
            "file.media.image",
            "mock:default",
            resource,
        )
            .with_attribute("extension", ext)
            .with_attribute("size", size)
            .with_attribute("path", format!("2024/{resource}.{ext}"))
    }

    #[test]
    fn test_matches_evaluates_predicates() {
        let entity = photo("beach", "jpg", 2048);
        let mut filters = BTreeMap::new();
        filters.insert("extension".to_string(), FilterClause::eq("jpg"));
        filters.insert(
            "size".to_string(),
            FilterClause::range(Some(AttributeValue::Int(1024)), Some(AttributeValue::Int(4096))),
        );
        filters.insert("path".to_string(), FilterClause::glob("2024/*"));
        assert!(matches(&entity, &filters).unwrap());

        filters.insert("camera".to_string(), FilterClause::eq("Pixel"));
        assert!(!matches(&entity, &filters).unwrap());

        let mut filters = BTreeMap::new();
        filters.insert("camera".to_string(), FilterClause::ne("Pixel"));
        assert!(matches(&entity, &filters).unwrap());
    }

    #[test]
    fn test_facets_count_filterable_attributes_only() {
        let types = TypeRegistry::with_builtin_types();
        let entities = vec![
            photo("a", "jpg", 1).with_attribute("width", 100i64),
            photo("b", "jpg", 2),
            photo("c", "png", 3),
        ];
        let facets = compute_facets(&entities, &types);
        assert_eq!(facets["extension"]["jpg"], 2);
        assert_eq!(facets["extension"]["png"], 1);
        assert!(!facets.contains_key("width"));
        assert_eq!(type_counts(&entities)["file.media.image"], 3);
    }

    #[test]
    fn test_catalog_merges_instances() {
        let mut catalog = FilterCatalog::new();
        catalog.add_capabilities("mock:a", &caps());
        let mut other = BTreeMap::new();
        other.insert(
            "extension".to_string(),
            FilterCapability::equality().with_options(["png"]),
        );
        catalog.add_capabilities("mock:b", &other);
        catalog.add_values("extension", vec![FilterOption::new("jpg").with_count(2)]);
        catalog.add_values("extension", vec![FilterOption::new("jpg").with_count(1)]);

        let ext = catalog.get("extension").unwrap();
        assert_eq!(ext.providers, vec!["mock:a", "mock:b"]);
        let options = ext.capability.options.clone().unwrap_or_default();
        assert_eq!(options, vec!["jpg", "mp4", "png"]);
        assert_eq!(ext.values[0].count, Some(3));
    }
}

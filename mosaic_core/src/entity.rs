//! Entity and identifier model shared by every component.
//!
//! Identifiers are validated once, when they cross the boundary
//! ([`EntityId::parse`]) or are built from parts ([`EntityId::new`]); the
//! accessors afterwards only slice the stored string.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Separator between the three identifier segments.
pub const ID_SEPARATOR: char = ':';

const ESCAPE: char = '%';
const ESCAPED_ESCAPE: &str = "%25";
const ESCAPED_SEPARATOR: &str = "%3A";
/// Escaping never yields a bare `%`, so it stands for an empty component.
const EMPTY_SEGMENT: &str = "%";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityIdError {
    #[error("expected providerType:instanceID:resourceID, got {0:?}")]
    Format(String),

    #[error("empty {segment} segment in {raw:?}")]
    EmptySegment { segment: &'static str, raw: String },
}

/// `providerType:instanceID:resourceID`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    raw: String,
    first: usize,
    second: usize,
}

impl EntityId {
    /// Builds an identifier from components. Never fails: `%` and `:` inside
    /// a component are escaped and an empty component becomes `%`.
    pub fn new(provider_type: &str, instance_id: &str, resource_id: &str) -> Self {
        let p = escape_segment(provider_type);
        let i = escape_segment(instance_id);
        let r = escape_segment(resource_id);
        let first = p.len();
        let second = first + 1 + i.len();
        EntityId {
            raw: format!("{p}{ID_SEPARATOR}{i}{ID_SEPARATOR}{r}"),
            first,
            second,
        }
    }

    pub fn parse(s: &str) -> Result<Self, EntityIdError> {
        let mut positions = s.match_indices(ID_SEPARATOR).map(|(idx, _)| idx);
        let (first, second) = match (positions.next(), positions.next(), positions.next()) {
            (Some(first), Some(second), None) => (first, second),
            _ => return Err(EntityIdError::Format(s.to_string())),
        };

        let segments = [
            ("provider type", &s[..first]),
            ("instance", &s[first + 1..second]),
            ("resource", &s[second + 1..]),
        ];
        for (segment, value) in segments {
            if value.is_empty() {
                return Err(EntityIdError::EmptySegment {
                    segment,
                    raw: s.to_string(),
                });
            }
        }

        Ok(EntityId {
            raw: s.to_string(),
            first,
            second,
        })
    }

    pub fn provider_type(&self) -> &str {
        &self.raw[..self.first]
    }

    pub fn instance_id(&self) -> &str {
        &self.raw[self.first + 1..self.second]
    }

    pub fn resource_id(&self) -> &str {
        &self.raw[self.second + 1..]
    }

    pub fn parts(&self) -> (&str, &str, &str) {
        (self.provider_type(), self.instance_id(), self.resource_id())
    }

    /// `providerType:instanceID`, the key the manager stores instances under.
    pub fn instance_key(&self) -> &str {
        &self.raw[..self.second]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn escape_segment(segment: &str) -> String {
    if segment.is_empty() {
        return EMPTY_SEGMENT.to_string();
    }
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            ESCAPE => escaped.push_str(ESCAPED_ESCAPE),
            ID_SEPARATOR => escaped.push_str(ESCAPED_SEPARATOR),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverses the escaping applied by [`EntityId::new`]. Unknown `%`
/// sequences pass through unchanged.
pub fn decode_segment(segment: &str) -> String {
    if segment == EMPTY_SEGMENT {
        return String::new();
    }
    let mut decoded = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find(ESCAPE) {
        decoded.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with(ESCAPED_ESCAPE) {
            decoded.push(ESCAPE);
            rest = &tail[ESCAPED_ESCAPE.len()..];
        } else if tail.starts_with(ESCAPED_SEPARATOR) {
            decoded.push(ID_SEPARATOR);
            rest = &tail[ESCAPED_SEPARATOR.len()..];
        } else {
            decoded.push(ESCAPE);
            rest = &tail[1..];
        }
    }
    decoded.push_str(rest);
    decoded
}

/// The `providerType:instanceID` key for ids built by [`EntityId::new`].
pub fn instance_key(provider_type: &str, instance_id: &str) -> String {
    format!(
        "{}{ID_SEPARATOR}{}",
        escape_segment(provider_type),
        escape_segment(instance_id)
    )
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityId::parse(s)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EntityId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Dynamically typed attribute value.
///
/// Serialized untagged so payloads read as plain JSON. Variant order matters
/// for deserialization: RFC 3339 strings become `Time` before `Text` is tried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Text(String),
    Gps(GpsCoordinate),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by range predicates. Times compare as unix seconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(n) => Some(*n as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Time(t) => Some(t.timestamp() as f64),
            AttributeValue::Bool(_)
            | AttributeValue::Text(_)
            | AttributeValue::Gps(_)
            | AttributeValue::List(_) => None,
        }
    }

    /// Canonical string used for facet buckets and option matching.
    pub fn facet_key(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Int(n) => n.to_string(),
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::Time(t) => t.to_rfc3339(),
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Gps(g) => format!("{:.4},{:.4}", g.lat, g.lon),
            AttributeValue::List(items) => items
                .iter()
                .map(AttributeValue::facet_key)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Short type name matching [`crate::types::AttributeType`] spellings.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Time(_) => "time",
            AttributeValue::Text(_) => "string",
            AttributeValue::Gps(_) => "gps",
            AttributeValue::List(_) => "list",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Time(value)
    }
}

impl From<GpsCoordinate> for AttributeValue {
    fn from(value: GpsCoordinate) -> Self {
        AttributeValue::Gps(value)
    }
}

/// A typed, directed link from one entity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub target: EntityId,
}

/// A normalized item from one provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Dotted type path, e.g. `file.media.video`.
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Label of the provider instance that produced the entity.
    pub provider: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_tokens: Vec<String>,

    /// Last-modified or creation instant, used for recency and incremental sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    /// Assigned by the ranking strategy only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Entity {
    pub fn new(
        id: EntityId,
        entity_type: impl Into<String>,
        provider: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            provider: provider.into(),
            title: title.into(),
            description: String::new(),
            attributes: BTreeMap::new(),
            relationships: Vec::new(),
            search_tokens: Vec::new(),
            timestamp: None,
            thumbnail: None,
            score: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_relationship(mut self, rel_type: impl Into<String>, target: EntityId) -> Self {
        self.relationships.push(Relationship {
            rel_type: rel_type.into(),
            target,
        });
        self
    }

    pub fn with_search_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Targets of relationships of the given type, in declaration order.
    pub fn related_ids<'a>(&'a self, rel_type: &'a str) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.relationships
            .iter()
            .filter(move |r| rel_type.is_empty() || r.rel_type == rel_type)
            .map(|r| &r.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_then_parse_preserves_parts() {
        let cases = [
            ("localfs", "photos", "2024/beach.jpg"),
            ("immich", "home", "5f1c"),
            ("jellyfin", "default", "abc-123"),
        ];
        for (a, b, c) in cases {
            let id = EntityId::new(a, b, c);
            let parsed = EntityId::parse(&id.to_string()).unwrap();
            assert_eq!(parsed.parts(), (a, b, c));
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_parse_rejects_wrong_separator_count() {
        for raw in ["", "plain", "a:b", "a:b:c:d", "a:b:c:d:e", "::::"] {
            assert!(EntityId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for raw in [":b:c", "a::c", "a:b:", "::"] {
            assert!(matches!(
                EntityId::parse(raw),
                Err(EntityIdError::EmptySegment { .. })
            ));
        }
    }

    #[test]
    fn test_new_escapes_separator_in_components() {
        let id = EntityId::new("localfs", "", "C:/photos/a.jpg");
        assert_eq!(id.instance_id(), "%");
        assert_eq!(id.resource_id(), "C%3A/photos/a.jpg");
        assert_eq!(decode_segment(id.resource_id()), "C:/photos/a.jpg");
        assert!(EntityId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_escaped_components_stay_distinct_and_decode() {
        let components = ["x:y", "x%3Ay", "x%y", "%", "%25", "", "_", "a%3A:b", "100%"];
        let ids: Vec<EntityId> = components
            .iter()
            .map(|c| EntityId::new("localfs", "home", c))
            .collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        for (component, id) in components.iter().zip(&ids) {
            assert_eq!(decode_segment(id.resource_id()), *component);
            assert!(EntityId::parse(id.as_str()).is_ok());
        }

        assert_ne!(EntityId::new("mock", "", "r"), EntityId::new("mock", "_", "r"));
        assert_eq!(decode_segment(EntityId::new("mock", "", "r").instance_id()), "");
    }

    #[test]
    fn test_decode_passes_unknown_escapes_through() {
        assert_eq!(decode_segment("50%off"), "50%off");
        assert_eq!(decode_segment("a%2"), "a%2");
        assert_eq!(decode_segment("plain/path.txt"), "plain/path.txt");
    }

    #[test]
    fn test_instance_key() {
        let id = EntityId::parse("localfs:photos:a.jpg").unwrap();
        assert_eq!(id.instance_key(), "localfs:photos");
        let id = EntityId::new("localfs", "a:b", "x");
        assert_eq!(instance_key("localfs", "a:b"), id.instance_key());
    }

    #[test]
    fn test_entity_id_serde_validates() {
        let id: EntityId = serde_json::from_value(json!("mock:default:1")).unwrap();
        assert_eq!(id.resource_id(), "1");
        assert!(serde_json::from_value::<EntityId>(json!("mock:1")).is_err());
    }

    #[test]
    fn test_attribute_value_untagged_decoding() {
        let v: AttributeValue = serde_json::from_value(json!("2024-05-01T10:00:00Z")).unwrap();
        assert!(matches!(v, AttributeValue::Time(_)));

        let v: AttributeValue = serde_json::from_value(json!("holiday")).unwrap();
        assert_eq!(v.as_str(), Some("holiday"));

        let v: AttributeValue = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(v, AttributeValue::Int(42));

        let v: AttributeValue = serde_json::from_value(json!({"lat": 1.5, "lon": 2.5})).unwrap();
        assert!(matches!(v, AttributeValue::Gps(_)));
    }

    #[test]
    fn test_related_ids_filters_by_type() {
        let album = EntityId::new("immich", "home", "album-1");
        let person = EntityId::new("immich", "home", "person-1");
        let id = EntityId::new("immich", "home", "asset-1");
        let entity = Entity::new(id, "file.media.image", "immich:home", "IMG_1")
            .with_relationship("in_album", album.clone())
            .with_relationship("depicts", person);

        let related: Vec<_> = entity.related_ids("in_album").collect();
        assert_eq!(related, vec![&album]);
        assert_eq!(entity.related_ids("").count(), 2);
    }
}

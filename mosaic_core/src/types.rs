//! Hierarchical type taxonomy with inherited attribute schemas.

use std::collections::BTreeMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Name of the base type every built-in type descends from.
pub const ROOT_TYPE: &str = "entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Int,
    Int64,
    Float,
    Bool,
    Time,
    Gps,
    List,
}

impl AttributeType {
    /// Whether a value of `value_type` (see [`crate::entity::AttributeValue::type_name`])
    /// can be stored in an attribute of this type.
    pub fn accepts(&self, value_type: &str) -> bool {
        match self {
            AttributeType::String => value_type == "string",
            AttributeType::Int | AttributeType::Int64 => value_type == "int",
            AttributeType::Float => matches!(value_type, "float" | "int"),
            AttributeType::Bool => value_type == "bool",
            AttributeType::Time => value_type == "time",
            AttributeType::Gps => value_type == "gps",
            AttributeType::List => true,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            AttributeType::Int | AttributeType::Int64 | AttributeType::Float | AttributeType::Time
        )
    }
}

/// Schema-level operator hints. Provider capabilities take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub cacheable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            filterable: false,
            label: None,
            unit: None,
            filter: None,
        }
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDef>,
    #[serde(default)]
    pub description: String,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
            attributes: BTreeMap::new(),
            description: String::new(),
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn with_attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.insert(attr.name.clone(), attr);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeRegistryError {
    #[error("type name must not be empty")]
    EmptyName,

    #[error("type already registered: {0}")]
    Duplicate(String),

    #[error("unknown parent {parent} for type {name}")]
    UnknownParent { name: String, parent: String },

    #[error("type {name} cannot be a second root; {root} is already the root")]
    SecondRoot { name: String, root: String },

    #[error("registering {0} would create a cycle")]
    Cycle(String),

    #[error("unknown type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Default)]
struct TypeTable {
    types: BTreeMap<String, TypeDefinition>,
    root: Option<String>,
}

impl TypeTable {
    /// Chain from `name` up to the root, `name` first.
    fn lineage(&self, name: &str) -> Option<Vec<&TypeDefinition>> {
        let mut chain = Vec::new();
        let mut current = self.types.get(name)?;
        loop {
            chain.push(current);
            match current.parent.as_deref() {
                Some(parent) => current = self.types.get(parent)?,
                None => return Some(chain),
            }
            if chain.len() > self.types.len() {
                return None;
            }
        }
    }
}

/// Tree of type definitions. Registration normally happens once at startup;
/// lookups take the read side of the lock.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    table: RwLock<TypeTable>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in media taxonomy.
    pub fn with_builtin_types() -> Self {
        let registry = Self::new();
        for def in BUILTIN_TYPES.iter() {
            // Built-ins are ordered parents first and never collide.
            if let Err(err) = registry.register(def.clone()) {
                tracing::error!(type_name = %def.name, error = %err, "built-in type rejected");
            }
        }
        registry
    }

    pub fn register(&self, def: TypeDefinition) -> Result<(), TypeRegistryError> {
        if def.name.trim().is_empty() {
            return Err(TypeRegistryError::EmptyName);
        }
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        if table.types.contains_key(&def.name) {
            return Err(TypeRegistryError::Duplicate(def.name));
        }

        match def.parent.as_deref() {
            None => {
                if let Some(root) = &table.root {
                    return Err(TypeRegistryError::SecondRoot {
                        name: def.name,
                        root: root.clone(),
                    });
                }
                table.root = Some(def.name.clone());
            }
            Some(parent) if parent == def.name => {
                return Err(TypeRegistryError::Cycle(def.name));
            }
            Some(parent) => {
                // Definitions are immutable once stored, so an existing parent
                // always reaches the root; anything else is a broken chain.
                if table.lineage(parent).is_none() {
                    return if table.types.contains_key(parent) {
                        Err(TypeRegistryError::Cycle(def.name))
                    } else {
                        Err(TypeRegistryError::UnknownParent {
                            name: def.name.clone(),
                            parent: parent.to_string(),
                        })
                    };
                }
            }
        }

        tracing::debug!(type_name = %def.name, parent = ?def.parent, "registered type");
        table.types.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<TypeDefinition> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.types.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.types.contains_key(name)
    }

    pub fn root(&self) -> Option<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.root.clone()
    }

    /// Effective attribute set: ancestors first, each descendant overriding
    /// same-named attributes.
    pub fn resolve(&self, name: &str) -> Result<BTreeMap<String, AttributeDef>, TypeRegistryError> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let lineage = table
            .lineage(name)
            .ok_or_else(|| TypeRegistryError::UnknownType(name.to_string()))?;

        let mut effective = BTreeMap::new();
        for def in lineage.into_iter().rev() {
            for (attr_name, attr) in &def.attributes {
                effective.insert(attr_name.clone(), attr.clone());
            }
        }
        Ok(effective)
    }

    /// Like [`resolve`](Self::resolve), but an unregistered type is treated as
    /// an open leaf directly under the root.
    pub fn resolve_or_root(&self, name: &str) -> BTreeMap<String, AttributeDef> {
        if let Ok(attrs) = self.resolve(name) {
            return attrs;
        }
        self.root()
            .and_then(|root| self.resolve(&root).ok())
            .unwrap_or_default()
    }

    /// Ancestors of `name`, nearest first, excluding `name` itself.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .lineage(name)
            .map(|chain| chain.iter().skip(1).map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn children(&self, name: &str) -> Vec<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .types
            .values()
            .filter(|d| d.parent.as_deref() == Some(name))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Whether `name` is `ancestor` or descends from it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        if name == ancestor {
            return true;
        }
        self.ancestors(name).iter().any(|a| a == ancestor)
    }

    pub fn list(&self) -> Vec<String> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.types.keys().cloned().collect()
    }
}

/// Dotted-path subtype match: `file.media` matches `file.media.video`, but
/// not `file.mediafoo`. An empty filter matches everything.
pub fn type_matches(entity_type: &str, filter: &str) -> bool {
    if filter.is_empty() || entity_type == filter {
        return true;
    }
    entity_type
        .strip_prefix(filter)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// A filterable attribute with a display label.
fn facet(name: &str, attr_type: AttributeType, label: &str) -> AttributeDef {
    AttributeDef::new(name, attr_type).filterable().with_label(label)
}

static BUILTIN_TYPES: Lazy<Vec<TypeDefinition>> = Lazy::new(|| {
    use AttributeType as T;
    vec![
        TypeDefinition::root(ROOT_TYPE)
            .with_description("Base type for every federated item")
            .with_attribute(facet("created", T::Time, "Created"))
            .with_attribute(facet("modified", T::Time, "Modified"))
            .with_attribute(facet("tags", T::List, "Tags")),
        TypeDefinition::new("file", Some(ROOT_TYPE))
            .with_description("A file in a file store")
            .with_attribute(facet("path", T::String, "Path"))
            .with_attribute(facet("size", T::Int64, "Size").with_unit("bytes"))
            .with_attribute(facet("extension", T::String, "Extension"))
            .with_attribute(facet("mime_type", T::String, "MIME type")),
        TypeDefinition::new("file.document", Some("file"))
            .with_description("Text-bearing document")
            .with_attribute(facet("page_count", T::Int, "Pages")),
        TypeDefinition::new("file.media", Some("file"))
            .with_description("Image, video or audio file")
            .with_attribute(AttributeDef::new("width", T::Int).with_unit("px"))
            .with_attribute(AttributeDef::new("height", T::Int).with_unit("px")),
        TypeDefinition::new("file.media.image", Some("file.media"))
            .with_attribute(facet("camera", T::String, "Camera"))
            .with_attribute(facet("taken_at", T::Time, "Taken"))
            .with_attribute(AttributeDef::new("location", T::Gps).with_label("Location")),
        TypeDefinition::new("file.media.video", Some("file.media"))
            .with_attribute(facet("duration", T::Float, "Duration").with_unit("s"))
            .with_attribute(facet("codec", T::String, "Codec")),
        TypeDefinition::new("file.media.audio", Some("file.media"))
            .with_attribute(facet("duration", T::Float, "Duration").with_unit("s"))
            .with_attribute(facet("artist", T::String, "Artist")),
        TypeDefinition::new("collection", Some(ROOT_TYPE))
            .with_description("A grouping of other entities")
            .with_attribute(facet("item_count", T::Int, "Items")),
        TypeDefinition::new("collection.album", Some("collection"))
            .with_attribute(facet("owner", T::String, "Owner")),
        TypeDefinition::new("person", Some(ROOT_TYPE))
            .with_attribute(facet("name", T::String, "Name")),
        TypeDefinition::new("media", Some(ROOT_TYPE))
            .with_description("Item in a media-server library")
            .with_attribute(facet("year", T::Int, "Year"))
            .with_attribute(facet("genre", T::String, "Genre"))
            .with_attribute(facet("rating", T::Float, "Rating")),
        TypeDefinition::new("media.movie", Some("media"))
            .with_attribute(AttributeDef::new("runtime", T::Int).filterable().with_unit("min")),
        TypeDefinition::new("media.series", Some("media"))
            .with_attribute(AttributeDef::new("season_count", T::Int).filterable()),
        TypeDefinition::new("media.episode", Some("media"))
            .with_attribute(AttributeDef::new("season", T::Int).filterable())
            .with_attribute(AttributeDef::new("episode", T::Int).filterable()),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    fn file_tree() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeDefinition::root("file")
                    .with_attribute(AttributeDef::new("path", AttributeType::String).filterable())
                    .with_attribute(AttributeDef::new("size", AttributeType::Int64).filterable()),
            )
            .unwrap();
        registry
            .register(
                TypeDefinition::new("file.media", Some("file"))
                    .with_attribute(AttributeDef::new("width", AttributeType::Int)),
            )
            .unwrap();
        registry
            .register(
                TypeDefinition::new("file.media.video", Some("file.media"))
                    .with_attribute(
                        AttributeDef::new("duration", AttributeType::Float).filterable(),
                    )
                    .with_attribute(
                        AttributeDef::new("size", AttributeType::Float).with_label("Size (GB)"),
                    ),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_resolve_includes_inherited_attributes() {
        let registry = file_tree();
        let attrs = registry.resolve("file.media.video").unwrap();
        assert!(attrs.contains_key("path"));
        assert!(attrs.contains_key("size"));
        assert!(attrs.contains_key("width"));
        assert!(attrs.contains_key("duration"));
    }

    #[test]
    fn test_descendant_overrides_ancestor_attribute() {
        let registry = file_tree();
        let attrs = registry.resolve("file.media.video").unwrap();
        let size = &attrs["size"];
        assert_eq!(size.attr_type, AttributeType::Float);
        assert_eq!(size.label.as_deref(), Some("Size (GB)"));
        assert_eq!(attrs.values().filter(|a| a.name == "size").count(), 1);

        // The ancestor keeps its own definition.
        assert_eq!(registry.resolve("file").unwrap()["size"].attr_type, AttributeType::Int64);
    }

    #[test]
    fn test_register_rejects_duplicates_and_unknown_parents() {
        let registry = file_tree();
        assert_eq!(
            registry.register(TypeDefinition::new("file.media", Some("file"))),
            Err(TypeRegistryError::Duplicate("file.media".into()))
        );
        assert!(matches!(
            registry.register(TypeDefinition::new("photo.raw", Some("photo"))),
            Err(TypeRegistryError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_register_rejects_self_parent_and_second_root() {
        let registry = file_tree();
        assert_eq!(
            registry.register(TypeDefinition::new("loop", Some("loop"))),
            Err(TypeRegistryError::Cycle("loop".into()))
        );
        assert!(matches!(
            registry.register(TypeDefinition::root("other")),
            Err(TypeRegistryError::SecondRoot { .. })
        ));
    }

    #[test]
    fn test_ancestors_and_is_a() {
        let registry = file_tree();
        assert_eq!(registry.ancestors("file.media.video"), vec!["file.media", "file"]);
        assert!(registry.is_a("file.media.video", "file"));
        assert!(!registry.is_a("file", "file.media"));
        assert_eq!(registry.children("file"), vec!["file.media"]);
    }

    #[test]
    fn test_unknown_type_resolves_to_root() {
        let registry = file_tree();
        assert!(registry.resolve("bookmark").is_err());
        let attrs = registry.resolve_or_root("bookmark");
        assert!(attrs.contains_key("path"));
        assert!(!attrs.contains_key("duration"));
    }

    #[test]
    fn test_builtin_taxonomy_is_a_single_tree() {
        let registry = TypeRegistry::with_builtin_types();
        assert_eq!(registry.root().as_deref(), Some(ROOT_TYPE));
        for name in registry.list() {
            assert!(name == ROOT_TYPE || registry.is_a(&name, ROOT_TYPE), "{name} detached");
        }
        let video = registry.resolve("file.media.video").unwrap();
        assert!(video.contains_key("path"));
        assert!(video.contains_key("duration"));
        assert!(video.contains_key("modified"));
    }

    #[test]
    fn test_type_matches_uses_dotted_boundaries() {
        assert!(type_matches("file.media.video", "file.media"));
        assert!(type_matches("file.media", "file.media"));
        assert!(type_matches("anything", ""));
        assert!(!type_matches("file.mediafoo", "file.media"));
        assert!(!type_matches("file", "file.media"));
    }
}

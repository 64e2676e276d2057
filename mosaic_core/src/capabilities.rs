use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Configuration schema a provider type publishes through the registry.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProviderConfigSchema {
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    Secret, // API keys, passwords, tokens
    Number,
    Boolean,
    Path,
    Select { options: Vec<String> },
}

impl Field {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl ProviderConfigSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Names of required fields absent (or null) in `settings`. Value types
    /// and ranges are the provider's own business.
    pub fn missing_required(&self, settings: &Map<String, Value>) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| settings.get(&f.name).map_or(true, Value::is_null))
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn to_json_schema(&self) -> Map<String, Value> {
        let mut props = Map::new();
        let mut required: Vec<String> = Vec::new();
        for f in &self.fields {
            let mut obj = Map::new();
            let ty = match &f.field_type {
                FieldType::Text | FieldType::Path => "string",
                FieldType::Secret => {
                    obj.insert("format".to_string(), json!("password"));
                    "string"
                }
                FieldType::Number => "number",
                FieldType::Boolean => "boolean",
                FieldType::Select { options } => {
                    obj.insert("enum".to_string(), json!(options));
                    "string"
                }
            };
            obj.insert("type".to_string(), json!(ty));
            obj.insert("title".to_string(), json!(f.label));
            if let Some(desc) = &f.description {
                obj.insert("description".to_string(), json!(desc));
            }
            props.insert(f.name.clone(), Value::Object(obj));
            if f.required {
                required.push(f.name.clone());
            }
        }
        let mut root = Map::new();
        root.insert("type".to_string(), json!("object"));
        root.insert("properties".to_string(), Value::Object(props));
        if !required.is_empty() {
            root.insert("required".to_string(), json!(required));
        }
        root
    }
}

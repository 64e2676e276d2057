use std::sync::Arc;

use rmcp::model::*;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::FederationError;
use crate::federated::{Federator, SearchQuery};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl ServerError {
    pub fn to_jsonrpc_error(&self) -> Value {
        match self {
            ServerError::Federation(err) => err.to_jsonrpc_error(),
            ServerError::MethodNotFound(_) => json!({"code": -32601, "message": self.to_string()}),
            ServerError::ToolNotFound(_) | ServerError::InvalidParams(_) => {
                json!({"code": -32602, "message": self.to_string()})
            }
            ServerError::SerdeJson(_) => json!({"code": -32603, "message": self.to_string()}),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RelatedArgs {
    id: String,
    #[serde(default)]
    relationship: String,
}

#[derive(Debug, Default, Deserialize)]
struct FilterArgs {
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoverArgs {
    #[serde(default)]
    instance: Option<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Option<Map<String, Value>>,
) -> Result<T, ServerError> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| ServerError::InvalidParams(e.to_string()))
}

/// Wraps a payload as a tool result; non-object payloads go under `data`.
fn structured_result<T: serde::Serialize>(data: &T) -> Result<CallToolResult, ServerError> {
    let map = match serde_json::to_value(data)? {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("data".to_string(), other);
            m
        }
    };
    let text = serde_json::to_string(&map)?;
    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(Value::Object(map)),
        is_error: Some(false),
        meta: None,
    })
}

fn schema(value: Value) -> Arc<Map<String, Value>> {
    Arc::new(match value {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

fn tool(name: &'static str, description: &'static str, input_schema: Value) -> Tool {
    Tool {
        name: name.into(),
        title: None,
        description: Some(description.into()),
        input_schema: schema(input_schema),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// Tool-call surface over one [`Federator`].
pub struct McpServer {
    federator: Arc<Federator>,
}

impl McpServer {
    pub fn new(federator: Arc<Federator>) -> Self {
        Self { federator }
    }

    pub fn federator(&self) -> &Federator {
        &self.federator
    }

    pub async fn handle_initialize(
        &self,
        _request: InitializeRequestParam,
    ) -> Result<InitializeResult, ServerError> {
        info!(instances = self.federator.manager().len().await, "MCP Server initializing");

        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..ServerCapabilities::default()
            },
            server_info: Implementation {
                name: "mosaic".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Federated search over configured content providers. \
                 Entity ids look like provider:instance:resource."
                    .to_string(),
            ),
        })
    }

    pub fn list_tools() -> Vec<Tool> {
        vec![
            tool(
                "search",
                "Search every connected provider instance and return one ranked page.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Free text; empty matches everything"
                        },
                        "type": {
                            "type": "string",
                            "description": "Entity type, subtypes included (e.g. file.media)"
                        },
                        "relationship_type": {"type": "string"},
                        "filters": {
                            "type": "object",
                            "description":
                                "attribute -> value, or {op: eq|ne|range|glob|contains, ...}",
                            "additionalProperties": true
                        },
                        "limit": {"type": "integer", "minimum": 0},
                        "offset": {"type": "integer", "minimum": 0}
                    }
                }),
            ),
            tool(
                "get_entity",
                "Fetch the full record of one entity by id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "required": ["id"]
                }),
            ),
            tool(
                "get_related",
                "List the entities linked from one entity.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "relationship": {
                            "type": "string",
                            "description": "Relationship type; empty for all"
                        }
                    },
                    "required": ["id"]
                }),
            ),
            tool(
                "list_filters",
                "List filterable attributes with supported predicates, known values \
                 and facet counts.",
                json!({
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "description": "Restrict facet counts to this entity type"
                        }
                    }
                }),
            ),
            tool(
                "list_types",
                "List the registered entity types.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "list_providers",
                "List provider instances and their status.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "discover",
                "Run discovery on one instance, or on every connected instance.",
                json!({
                    "type": "object",
                    "properties": {
                        "instance": {
                            "type": "string",
                            "description": "Instance key, e.g. localfs:photos"
                        }
                    }
                }),
            ),
        ]
    }

    pub async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ServerError> {
        debug!(tool = %request.name, "tool call");
        match &*request.name {
            "search" => {
                let query: SearchQuery = parse_args(request.arguments)?;
                structured_result(&self.federator.search(&query).await?)
            }
            "get_entity" => {
                let args: EntityArgs = parse_args(request.arguments)?;
                structured_result(&self.federator.hydrate(&args.id).await?)
            }
            "get_related" => {
                let args: RelatedArgs = parse_args(request.arguments)?;
                let entities = self.federator.get_related(&args.id, &args.relationship).await?;
                structured_result(&json!({"entities": entities}))
            }
            "list_filters" => {
                let args: FilterArgs = parse_args(request.arguments)?;
                structured_result(&self.federator.filters(args.entity_type.as_deref()).await)
            }
            "list_types" => {
                let types: Vec<_> = self
                    .federator
                    .types()
                    .list()
                    .iter()
                    .filter_map(|name| self.federator.types().get(name))
                    .collect();
                structured_result(&json!({"types": types}))
            }
            "list_providers" => {
                let providers = self.federator.providers().await;
                structured_result(&json!({ "providers": providers }))
            }
            "discover" => {
                let args: DiscoverArgs = parse_args(request.arguments)?;
                match args.instance {
                    Some(instance) => {
                        let entities = self.federator.discover(&instance).await?;
                        structured_result(&json!({
                            "completed": [instance],
                            "entity_count": entities.len(),
                        }))
                    }
                    None => {
                        let fan_out = self.federator.discover_all().await?;
                        structured_result(&json!({
                            "completed": fan_out.completed,
                            "failures": fan_out.failures,
                            "entity_count": fan_out.entities.len(),
                        }))
                    }
                }
            }
            other => Err(ServerError::ToolNotFound(other.to_string())),
        }
    }
}

/// JSON-RPC message handler for the MCP server
pub struct JsonRpcHandler {
    server: McpServer,
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &McpServer {
        &self.server
    }

    /// Process one JSON-RPC message. Notifications (no `id`) get no response.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        debug!("Handling JSON-RPC request: {:?}", request);

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(json!({}));

        if id.is_none() {
            debug!(method, "notification received");
            return None;
        }

        let result = match method {
            "initialize" => match serde_json::from_value::<InitializeRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_initialize(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(ServerError::SerdeJson)),
                Err(e) => Err(ServerError::InvalidParams(e.to_string())),
            },
            "ping" => Ok(json!({})),
            "tools/list" => serde_json::to_value(ListToolsResult {
                tools: McpServer::list_tools(),
                next_cursor: None,
            })
            .map_err(ServerError::SerdeJson),
            "tools/call" => match serde_json::from_value::<CallToolRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_call_tool(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(ServerError::SerdeJson)),
                Err(e) => Err(ServerError::InvalidParams(e.to_string())),
            },
            other => Err(ServerError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "error": error.to_jsonrpc_error(),
                "id": id,
            }),
        })
    }
}

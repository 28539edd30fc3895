//! Tool abstraction, registry, and permission gate.
//!
//! Every capability the toolbox exposes to an agent is a [`Tool`]. The
//! [`ToolRegistry`] is the single dispatch path for the REST API, the MCP
//! bridge, and `toolbox tool call`:
//!
//! ```text
//!  POST /tools/{name} ─┐
//!  MCP tools/call ─────┼──▶ ToolRegistry::call
//!  toolbox tool call ──┘        │
//!                               ├─ 1. find tool            (404 not_found)
//!                               ├─ 2. validate params      (400 bad_request)
//!                               ├─ 3. permission gate      (403 permission_denied)
//!                               └─ 4. Tool::execute
//! ```
//!
//! Tools that change state outside the store (writing files, running
//! programs, killing processes, deleting documents) return `true` from
//! [`Tool::requires_permission`] and only run when the caller passes
//! `"allow": true`, unless the tool is listed in `[permissions].auto_allow`.
//!
//! # Custom tools
//!
//! ```rust
//! use agent_toolbox::tools::{Tool, ToolContext, ToolRegistry};
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Echo the input back" }
//!     fn parameters_schema(&self) -> Value {
//!         json!({ "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] })
//!     }
//!     async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
//!         Ok(json!({ "echo": params["text"] }))
//!     }
//! }
//!
//! let mut tools = ToolRegistry::with_builtins();
//! tools.register(Box::new(Echo));
//! assert!(tools.find("echo").is_some());
//! ```

pub mod files;
pub mod rag;
pub mod system;
pub mod web;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{bad_request, not_found, ToolError};
use crate::models::Dataset;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, used as the route segment in
    /// `POST /tools/{name}` and as the MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether the call must carry `"allow": true`.
    fn requires_permission(&self) -> bool {
        false
    }

    /// Run the tool. `params` has already been validated against
    /// [`parameters_schema`](Tool::parameters_schema) with defaults filled in.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared state handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True when `tool` skips the `allow` gate.
    pub fn is_auto_allowed(&self, tool: &str) -> bool {
        self.config
            .permissions
            .auto_allow
            .iter()
            .any(|t| t == tool)
    }
}

/// Discovery entry returned by `GET /tools/list` and `toolbox tool list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub requires_permission: bool,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding every built-in RAG, file, system and web tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(Box::new(rag::IngestTool));
        registry.register(Box::new(rag::IngestPathTool));
        registry.register(Box::new(rag::SearchTool));
        registry.register(Box::new(rag::GetTool));
        registry.register(Box::new(rag::ListTool));
        registry.register(Box::new(rag::DatasetsTool));
        registry.register(Box::new(rag::AskTool));
        registry.register(Box::new(rag::DeleteTool));
        registry.register(Box::new(rag::ClearTool));

        registry.register(Box::new(files::ReadTool));
        registry.register(Box::new(files::WriteTool));
        registry.register(Box::new(files::SearchTool));
        registry.register(Box::new(files::ListTool));

        registry.register(Box::new(system::ExistsTool));
        registry.register(Box::new(system::ProcessesTool));
        registry.register(Box::new(system::OpenTool));
        registry.register(Box::new(system::RunTool));
        registry.register(Box::new(system::KillTool));

        registry.register(Box::new(web::SearchTool));

        registry
    }

    /// Register a tool. When two tools share a name, the first one
    /// registered wins in [`find`](Self::find).
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                requires_permission: t.requires_permission(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Look up, validate, gate and execute a tool call.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .find(name)
            .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

        let params = validate_params(&tool.parameters_schema(), &params)?;

        if tool.requires_permission() && !ctx.is_auto_allowed(name) {
            let allowed = params.get("allow").and_then(Value::as_bool).unwrap_or(false);
            if !allowed {
                info!(tool = name, "permission denied");
                return Err(ToolError::PermissionDenied(name.to_string()).into());
            }
        }

        debug!(tool = name, "executing tool");
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check required keys, JSON types and enums; fill in schema defaults.
///
/// `null` params are treated as `{}`; any other non-object is rejected.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(bad_request(format!(
                "parameters must be a JSON object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if params_obj.get(*req_field).map_or(true, Value::is_null) {
            return Err(bad_request(format!(
                "missing required parameter: {}",
                req_field
            )));
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(Value::Null) | None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(bad_request(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> =
                            enum_values.iter().map(|v| v.to_string()).collect();
                        return Err(bad_request(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            allowed.join(", "),
                            value
                        )));
                    }
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============ Param helpers ============

/// A required, non-blank string parameter.
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(bad_request(format!("{} must not be empty", key))),
    }
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

pub(crate) fn optional_dataset(params: &Value, key: &str) -> Result<Option<Dataset>> {
    optional_str(params, key)
        .map(|s| s.parse::<Dataset>().map_err(|e| bad_request(e.to_string())))
        .transpose()
}

/// JSON Schema fragment for the `allow` flag on gated tools.
pub(crate) fn allow_property() -> Value {
    serde_json::json!({
        "type": "boolean",
        "description": "Must be true to perform this side-effecting action"
    })
}

pub(crate) fn dataset_property(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "enum": Dataset::ALL.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
        "description": description
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "default": 5 },
                "mode": { "type": "string", "enum": ["a", "b"] }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn test_validate_fills_defaults() {
        let out = validate_params(&schema(), &json!({ "query": "x" })).unwrap();
        assert_eq!(out["limit"], 5);
    }

    #[test]
    fn test_validate_missing_required() {
        let err = validate_params(&schema(), &json!({})).unwrap_err();
        assert!(err.to_string().contains("query"));
        assert_eq!(ToolError::classify(&err).1, "bad_request");
    }

    #[test]
    fn test_validate_type_and_enum() {
        let err = validate_params(&schema(), &json!({ "query": 3 })).unwrap_err();
        assert!(err.to_string().contains("type 'string'"));
        let err = validate_params(&schema(), &json!({ "query": "q", "mode": "c" })).unwrap_err();
        assert!(err.to_string().contains("one of"));
    }

    #[test]
    fn test_validate_null_and_non_object() {
        let no_required = json!({ "type": "object", "properties": {} });
        assert_eq!(validate_params(&no_required, &Value::Null).unwrap(), json!({}));
        assert!(validate_params(&no_required, &json!([1])).is_err());
    }

    #[test]
    fn test_builtins_registered_once() {
        let registry = ToolRegistry::with_builtins();
        let mut names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 19);
    }

    #[test]
    fn test_gated_tools_expose_allow() {
        let registry = ToolRegistry::with_builtins();
        for info in registry.infos() {
            let has_allow = info.parameters["properties"].get("allow").is_some();
            assert_eq!(
                has_allow, info.requires_permission,
                "allow property mismatch on {}",
                info.name
            );
        }
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = ToolRegistry::with_builtins();
        let ctx = ToolContext::new(Arc::new(Config::with_db_path("/tmp/unused.sqlite")));
        let err = registry.call("nope", json!({}), &ctx).await.unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "not_found");
    }

    #[tokio::test]
    async fn test_gate_blocks_without_allow() {
        let registry = ToolRegistry::with_builtins();
        let ctx = ToolContext::new(Arc::new(Config::with_db_path("/tmp/unused.sqlite")));
        let err = registry
            .call(
                "system_run",
                json!({ "command": "echo", "args": ["hi"] }),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(ToolError::classify(&err).1, "permission_denied");
        assert!(err.to_string().contains("system_run"));
    }
}

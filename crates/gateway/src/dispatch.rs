//! Tool dispatch.
//!
//! Per-call lifecycle: Listed (external name registered at enumeration time) -> Invoked
//! (external name mapped back to the internal key) -> Resolved (operation record found) ->
//! Executed (HTTP collaborator invoked) -> Completed | Failed. Any break in that chain is a
//! terminal per-call failure returned as a normal envelope, never a process-level fault.

use crate::config::GatewayConfig;
use openapiv3::OpenAPI;
use parking_lot::RwLock;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use toolgate_http_exec::executor::{ExecError, HttpExecutor, OperationExecutor};
use toolgate_http_exec::semantics::annotations_for_method;
use toolgate_openapi::catalog::{EXTERNAL_NAME_MAX, ToolCatalog};
use toolgate_openapi::error::Result;
use toolgate_openapi::resolver::SpecDocument;

/// Dispatch gateway exposing a compiled catalog to the protocol layer.
pub struct ToolGateway {
    catalog: ToolCatalog,
    executor: Arc<dyn OperationExecutor>,
    /// External name -> internal catalog key. Rebuilt on every enumeration: external names
    /// are a deterministic function of internal keys, not persisted identity.
    external_names: RwLock<HashMap<String, String>>,
}

impl ToolGateway {
    #[must_use]
    pub fn new(catalog: ToolCatalog, executor: Arc<dyn OperationExecutor>) -> Self {
        Self {
            catalog,
            executor,
            external_names: RwLock::new(HashMap::new()),
        }
    }

    /// Build a catalog from a parsed spec and wire it to the default HTTP executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be serialized for pointer resolution.
    pub fn from_spec(spec: &OpenAPI, config: &GatewayConfig) -> Result<Self> {
        let catalog = ToolCatalog::build(spec, &config.group, config.dialect)?;
        let doc = SpecDocument::from_spec(spec)?;
        let executor = HttpExecutor::new(config.http.clone(), doc);
        Ok(Self::new(catalog, Arc::new(executor)))
    }

    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// List the protocol `Tool`s for the catalog.
    ///
    /// Rebuilds the external-name map from scratch: the protocol layer may call this any
    /// number of times, and names must map back to the same internal keys on every pass.
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut names = HashMap::new();
        let tools = self
            .catalog
            .tools()
            .iter()
            .map(|t| {
                let external = external_name(&t.name);
                let key = format!("{}-{}", self.catalog.group(), t.name);

                let input = t
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_else(JsonObject::new);
                let mut tool = Tool::new(external.clone(), t.description.clone(), Arc::new(input));
                tool.output_schema = t.result_schema.as_ref().map(wrap_result_schema);
                if let Some(record) = self.catalog.operation(&key)
                    && let Ok(method) = record.method.to_uppercase().parse()
                {
                    tool.annotations = Some(annotations_for_method(&method));
                }

                names.insert(external, key);
                tool
            })
            .collect();

        *self.external_names.write() = names;
        tools
    }

    /// Execute a tool call, normalizing every failure into an error envelope.
    ///
    /// The caller always gets a well-formed `CallToolResult`; dispatch misses and upstream
    /// failures are per-call results, not faults.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let Some(key) = self.external_names.read().get(name).cloned() else {
            return error_envelope(format!("Unknown tool: {name}"), None, None);
        };
        let Some(record) = self.catalog.operation(&key) else {
            return error_envelope(format!("No operation registered for tool: {name}"), None, None);
        };

        match self.executor.execute(record, &arguments).await {
            Ok(outcome) => success_envelope(&outcome.data),
            Err(ExecError::Status {
                status,
                message,
                body,
            }) => error_envelope(message, body, Some(status)),
            Err(e) => error_envelope(e.to_string(), None, None),
        }
    }
}

/// Deterministic truncation applied to internal names before they are handed out.
fn external_name(internal: &str) -> String {
    internal.chars().take(EXTERNAL_NAME_MAX).collect()
}

/// MCP requires the root output schema to be an object; wrap the result schema under `body`.
fn wrap_result_schema(result_schema: &Value) -> Arc<JsonObject> {
    let wrapped = json!({
        "type": "object",
        "required": ["body"],
        "properties": {
            "body": result_schema,
        }
    });
    let obj = wrapped.as_object().cloned().unwrap_or_else(JsonObject::new);
    Arc::new(obj)
}

fn success_envelope(data: &Value) -> CallToolResult {
    let text = match data {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    };
    CallToolResult::success(vec![Content::text(text)])
}

fn error_envelope(message: String, body: Option<Value>, http_status: Option<u16>) -> CallToolResult {
    let mut payload = json!({
        "status": "error",
        "message": message,
    });
    if let Some(body) = body {
        payload["response"] = body;
    }
    if let Some(status) = http_status {
        payload["httpStatus"] = json!(status);
    }

    let text = serde_json::to_string(&payload).unwrap_or_else(|_| payload.to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use toolgate_openapi::dialect::SchemaDialect;
    use toolgate_openapi::operation::OperationRecord;

    /// Scripted executor: replays one outcome for every call.
    enum StubExecutor {
        Ok(Value),
        Status(u16, &'static str, Value),
        Fail(&'static str),
    }

    #[async_trait]
    impl OperationExecutor for StubExecutor {
        async fn execute(
            &self,
            _record: &OperationRecord,
            _arguments: &Value,
        ) -> std::result::Result<toolgate_http_exec::executor::ExecutionOutcome, ExecError> {
            match self {
                StubExecutor::Ok(data) => Ok(toolgate_http_exec::executor::ExecutionOutcome {
                    data: data.clone(),
                }),
                StubExecutor::Status(status, message, body) => Err(ExecError::Status {
                    status: *status,
                    message: (*message).to_string(),
                    body: Some(body.clone()),
                }),
                StubExecutor::Fail(message) => Err(ExecError::Runtime((*message).to_string())),
            }
        }
    }

    fn gateway_with(executor: StubExecutor) -> ToolGateway {
        let spec: OpenAPI = serde_yaml::from_str(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /users:
    get:
      operationId: listUsers
      summary: List users
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { type: string }
"#,
        )
        .unwrap();
        let catalog = ToolCatalog::build(&spec, "api", SchemaDialect::JsonSchema).unwrap();
        ToolGateway::new(catalog, Arc::new(executor))
    }

    fn envelope_json(result: &CallToolResult) -> Value {
        serde_json::to_value(result).unwrap()
    }

    #[test]
    fn listing_exposes_schemas_and_annotations() {
        let gateway = gateway_with(StubExecutor::Ok(json!(null)));
        let tools = gateway.list_tools();
        assert_eq!(tools.len(), 1);

        let tool = &tools[0];
        assert_eq!(tool.name.as_ref(), "listUsers");
        assert_eq!(tool.input_schema.get("type").and_then(Value::as_str), Some("object"));
        let out = tool.output_schema.as_ref().expect("output schema");
        assert_eq!(out.get("type").and_then(Value::as_str), Some("object"));
        let annotations = tool.annotations.as_ref().expect("annotations");
        assert_eq!(annotations.read_only_hint, Some(true));
    }

    #[tokio::test]
    async fn successful_calls_carry_the_serialized_payload() {
        let gateway = gateway_with(StubExecutor::Ok(json!(["alice", "bob"])));
        gateway.list_tools();

        let result = gateway.call_tool("listUsers", json!({})).await;
        let envelope = envelope_json(&result);
        assert_ne!(envelope["isError"], json!(true));
        assert_eq!(envelope["content"][0]["type"], "text");
        assert_eq!(envelope["content"][0]["text"], "[\"alice\",\"bob\"]");
    }

    #[tokio::test]
    async fn unknown_names_fail_as_envelopes_not_faults() {
        let gateway = gateway_with(StubExecutor::Ok(json!(null)));
        gateway.list_tools();

        let result = gateway.call_tool("definitelyNotATool", json!({})).await;
        let envelope = envelope_json(&result);
        assert_eq!(envelope["isError"], json!(true));
        let text = envelope["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn calls_before_any_enumeration_miss_the_name_map() {
        let gateway = gateway_with(StubExecutor::Ok(json!(null)));

        // Lifecycle starts at Listed; without it the name cannot resolve.
        let result = gateway.call_tool("listUsers", json!({})).await;
        assert_eq!(envelope_json(&result)["isError"], json!(true));
    }

    #[tokio::test]
    async fn upstream_errors_become_structured_envelopes() {
        let gateway = gateway_with(StubExecutor::Status(
            503,
            "Service Unavailable",
            json!({ "detail": "maintenance" }),
        ));
        gateway.list_tools();

        let result = gateway.call_tool("listUsers", json!({})).await;
        let envelope = envelope_json(&result);
        assert_eq!(envelope["isError"], json!(true));

        let payload: Value =
            serde_json::from_str(envelope["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "Service Unavailable");
        assert_eq!(payload["httpStatus"], 503);
        assert_eq!(payload["response"]["detail"], "maintenance");
    }

    #[tokio::test]
    async fn other_failures_get_a_best_effort_message() {
        let gateway = gateway_with(StubExecutor::Fail("wires crossed"));
        gateway.list_tools();

        let result = gateway.call_tool("listUsers", json!({})).await;
        let envelope = envelope_json(&result);
        assert_eq!(envelope["isError"], json!(true));
        let payload: Value =
            serde_json::from_str(envelope["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["status"], "error");
        assert!(payload["message"].as_str().unwrap().contains("wires crossed"));
        assert!(payload.get("httpStatus").is_none());
    }

    #[tokio::test]
    async fn re_enumeration_rebuilds_the_name_map() {
        let gateway = gateway_with(StubExecutor::Ok(json!("ok")));
        gateway.list_tools();
        gateway.list_tools();

        let result = gateway.call_tool("listUsers", json!({})).await;
        assert_ne!(envelope_json(&result)["isError"], json!(true));
    }
}

//! `OpenAPI` operation -> compiled tool.
//!
//! One operation (method + path + parameters + request body + responses) compiles into a
//! single tool definition: a flattened input schema in which path/query/header parameters and
//! request-body fields share one namespace, a human-readable description including
//! error-response summaries, and an optional result schema.

use crate::catalog::BuildContext;
use crate::convert::{ResolutionPath, SchemaConverter};
use crate::dialect::{DEFINITIONS_KEY, SchemaDialect};
use crate::resolver::SpecDocument;
use openapiv3::{
    Operation, Parameter, ParameterData, ParameterSchemaOrContent, ReferenceOr, RequestBody,
    Response, Schema, StatusCode,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// A tool compiled from one `OpenAPI` operation.
///
/// Immutable after compilation except for the catalog's uniqueness pass, which may rewrite
/// `name`.
#[derive(Debug, Clone)]
pub struct CompiledTool {
    /// Tool name (initially the operation's `operationId`).
    pub name: String,
    /// Description, including `"<code>: <description>"` lines for 4xx/5xx responses.
    pub description: String,
    /// Flattened input schema (always an object schema).
    pub input_schema: Value,
    /// Schema of the documented success response, when one exists.
    pub result_schema: Option<Value>,
}

/// The operation behind a compiled tool, kept by the catalog for dispatch.
///
/// `operation.parameters` holds the merged, resolved parameter list (path-item-level
/// parameters folded in), so request preparation needs no further merging.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// Lowercase HTTP verb.
    pub method: String,
    /// Path template (e.g. `/pets/{petId}`).
    pub path: String,
    /// The originating operation.
    pub operation: Operation,
}

/// Merge path-item-level parameters with operation-level ones.
///
/// By-reference parameters are resolved first; unresolvable references are skipped with a
/// warning. An operation-level declaration replaces a path-item declaration with the same
/// name and location.
#[must_use]
pub fn merged_parameters(
    doc: &SpecDocument,
    path_item_params: &[ReferenceOr<Parameter>],
    operation: &Operation,
) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

    for param_ref in path_item_params.iter().chain(&operation.parameters) {
        let Some(param) = resolve_parameter(doc, param_ref) else {
            continue;
        };
        let key = parameter_key(&param);
        match index.get(&key) {
            Some(&i) => merged[i] = param,
            None => {
                index.insert(key, merged.len());
                merged.push(param);
            }
        }
    }

    merged
}

fn resolve_parameter(doc: &SpecDocument, param: &ReferenceOr<Parameter>) -> Option<Parameter> {
    match param {
        ReferenceOr::Item(p) => Some(p.clone()),
        ReferenceOr::Reference { reference } => {
            let resolved = doc.resolve_as::<Parameter>(reference);
            if resolved.is_none() {
                tracing::warn!("Skipping unresolvable parameter reference '{reference}'");
            }
            resolved
        }
    }
}

fn parameter_key(param: &Parameter) -> (&'static str, String) {
    match param {
        Parameter::Path { parameter_data, .. } => ("path", parameter_data.name.clone()),
        Parameter::Query { parameter_data, .. } => ("query", parameter_data.name.clone()),
        Parameter::Header { parameter_data, .. } => ("header", parameter_data.name.clone()),
        Parameter::Cookie { parameter_data, .. } => ("cookie", parameter_data.name.clone()),
    }
}

/// Compiles operations against one spec document.
pub struct OperationCompiler<'a> {
    doc: &'a SpecDocument,
    dialect: SchemaDialect,
}

impl<'a> OperationCompiler<'a> {
    #[must_use]
    pub fn new(doc: &'a SpecDocument, dialect: SchemaDialect) -> Self {
        Self { doc, dialect }
    }

    /// Compile one operation into a tool definition.
    ///
    /// Returns `None` (with a warning) when the operation has no `operationId`: without a
    /// stable identifier there is nothing safe to expose.
    pub fn compile(
        &self,
        method: &str,
        path: &str,
        parameters: &[Parameter],
        operation: &Operation,
        ctx: &mut BuildContext,
    ) -> Option<CompiledTool> {
        let Some(operation_id) = operation.operation_id.clone() else {
            tracing::warn!(
                "Skipping {} {}: operation has no operationId",
                method.to_uppercase(),
                path
            );
            return None;
        };

        let converter = SchemaConverter::new(self.doc, self.dialect);

        let mut properties = Map::new();
        let mut required: Vec<String> = Vec::new();

        for param in parameters {
            self.add_parameter(&converter, param, &mut properties, &mut required, ctx);
        }

        if let Some(body_ref) = &operation.request_body {
            self.flatten_request_body(
                &converter,
                body_ref,
                &mut properties,
                &mut required,
                ctx,
                method,
                path,
            );
        }

        let mut input_schema = Map::new();
        input_schema.insert(
            "type".to_string(),
            json!(self.dialect.type_token("object")),
        );
        input_schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            input_schema.insert("required".to_string(), json!(required));
        }
        if let Some(defs) = ctx.embedded_definitions(&converter) {
            input_schema.insert(DEFINITIONS_KEY.to_string(), defs);
        }

        Some(CompiledTool {
            name: operation_id,
            description: self.describe(operation),
            input_schema: Value::Object(input_schema),
            result_schema: self.result_schema(&converter, operation, ctx),
        })
    }

    fn add_parameter(
        &self,
        converter: &SchemaConverter<'_>,
        param: &Parameter,
        properties: &mut Map<String, Value>,
        required: &mut Vec<String>,
        ctx: &mut BuildContext,
    ) {
        let (data, always_required) = match param {
            Parameter::Path { parameter_data, .. } => (parameter_data, true),
            Parameter::Query { parameter_data, .. }
            | Parameter::Header { parameter_data, .. } => (parameter_data, false),
            Parameter::Cookie { parameter_data, .. } => {
                tracing::warn!(
                    "Skipping cookie parameter '{}': not supported",
                    parameter_data.name
                );
                return;
            }
        };

        let mut schema = self.parameter_schema(converter, data, ctx);
        if let Some(obj) = schema.as_object_mut()
            && !obj.contains_key("description")
            && let Some(desc) = &data.description
        {
            obj.insert("description".to_string(), json!(desc));
        }

        properties.insert(data.name.clone(), schema);
        if always_required || data.required {
            required.push(data.name.clone());
        }
    }

    fn parameter_schema(
        &self,
        converter: &SchemaConverter<'_>,
        data: &ParameterData,
        ctx: &mut BuildContext,
    ) -> Value {
        match &data.format {
            ParameterSchemaOrContent::Schema(schema_ref) => {
                let node = serde_json::to_value(schema_ref).unwrap_or_else(|_| json!({}));
                converter.convert(&node, &ResolutionPath::new(), false, &mut ctx.cache)
            }
            ParameterSchemaOrContent::Content(_) => {
                json!({ "type": self.dialect.type_token("string") })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn flatten_request_body(
        &self,
        converter: &SchemaConverter<'_>,
        body_ref: &ReferenceOr<RequestBody>,
        properties: &mut Map<String, Value>,
        required: &mut Vec<String>,
        ctx: &mut BuildContext,
        method: &str,
        path: &str,
    ) {
        let Some(body) = self.resolve_request_body(body_ref) else {
            return;
        };
        let Some((media_type, content)) = body.content.first() else {
            return;
        };
        let Some(schema_ref) = &content.schema else {
            return;
        };
        let Some((node, start_path)) = self.body_schema_node(schema_ref) else {
            return;
        };

        let converted = converter.convert(&node, &start_path, false, &mut ctx.cache);
        let is_multipart = media_type.starts_with("multipart/");
        let object_token = self.dialect.type_token("object");

        if converted.get("type").and_then(Value::as_str) == Some(object_token.as_str()) {
            // Object bodies splice into the flat namespace shared with the parameters.
            if let Some(Value::Object(props)) = converted.get("properties") {
                for (name, prop) in props {
                    if properties.insert(name.clone(), prop.clone()).is_some() {
                        tracing::warn!(
                            "Request body field '{}' overwrites a parameter of the same name in {} {}",
                            name,
                            method.to_uppercase(),
                            path
                        );
                    }
                }
            }
            if let Some(Value::Array(body_required)) = converted.get("required") {
                for entry in body_required {
                    if let Some(name) = entry.as_str()
                        && !required.iter().any(|r| r == name)
                    {
                        required.push(name.to_string());
                    }
                }
            }
        } else if !is_multipart && !properties.contains_key("body") {
            // Scalar/array payloads are exposed as a single synthetic `body` argument.
            // Multipart payloads are assumed to decompose into named fields and are dropped
            // when they do not.
            properties.insert("body".to_string(), converted);
            if body.required {
                required.push("body".to_string());
            }
        }
    }

    fn resolve_request_body(&self, body: &ReferenceOr<RequestBody>) -> Option<RequestBody> {
        match body {
            ReferenceOr::Item(b) => Some(b.clone()),
            ReferenceOr::Reference { reference } => {
                let resolved = self.doc.resolve_as::<RequestBody>(reference);
                if resolved.is_none() {
                    tracing::warn!("Skipping unresolvable requestBody reference '{reference}'");
                }
                resolved
            }
        }
    }

    fn body_schema_node(
        &self,
        schema_ref: &ReferenceOr<Schema>,
    ) -> Option<(Value, ResolutionPath)> {
        match schema_ref {
            ReferenceOr::Item(schema) => {
                let node = serde_json::to_value(schema).ok()?;
                Some((node, ResolutionPath::new()))
            }
            ReferenceOr::Reference { reference } => {
                let Some(node) = self.doc.resolve(reference) else {
                    tracing::warn!("Skipping unresolvable body schema reference '{reference}'");
                    return None;
                };
                let mut path = ResolutionPath::new();
                path.insert(reference.clone());
                Some((node.clone(), path))
            }
        }
    }

    fn describe(&self, operation: &Operation) -> String {
        let mut description = operation
            .summary
            .clone()
            .or_else(|| operation.description.clone())
            .unwrap_or_default();

        for (code, response_ref) in &operation.responses.responses {
            let code = code.to_string();
            if !(code.starts_with('4') || code.starts_with('5')) {
                continue;
            }
            let Some(response) = self.resolve_response(response_ref) else {
                continue;
            };
            description.push_str(&format!("\n{code}: {}", response.description));
        }

        description
    }

    const SUCCESS_CODES: [u16; 4] = [200, 201, 202, 204];

    fn result_schema(
        &self,
        converter: &SchemaConverter<'_>,
        operation: &Operation,
        ctx: &mut BuildContext,
    ) -> Option<Value> {
        let response_ref = Self::SUCCESS_CODES
            .iter()
            .find_map(|code| operation.responses.responses.get(&StatusCode::Code(*code)))?;
        let response = self.resolve_response(response_ref)?;

        // A structured JSON representation wins over everything else.
        let json_content = response.content.iter().find_map(|(media_type, content)| {
            media_type
                .to_ascii_lowercase()
                .contains("json")
                .then_some(content)
        });
        if let Some(content) = json_content
            && let Some(schema_ref) = &content.schema
        {
            return Some(self.convert_result_body(converter, schema_ref, ctx));
        }

        if response.content.keys().any(|media_type| {
            let media_type = media_type.to_ascii_lowercase();
            media_type.starts_with("image/") || media_type == "application/octet-stream"
        }) {
            return Some(json!({
                "type": self.dialect.type_token("string"),
                "description": "Binary response content",
            }));
        }

        if let Some((_, content)) = response.content.first()
            && let Some(schema_ref) = &content.schema
        {
            return Some(self.convert_result_body(converter, schema_ref, ctx));
        }

        Some(json!({
            "type": self.dialect.type_token("string"),
            "description": "Plain text response",
        }))
    }

    fn convert_result_body(
        &self,
        converter: &SchemaConverter<'_>,
        schema_ref: &ReferenceOr<Schema>,
        ctx: &mut BuildContext,
    ) -> Value {
        let node = serde_json::to_value(schema_ref).unwrap_or_else(|_| json!({}));
        let mut converted = converter.convert(&node, &ResolutionPath::new(), false, &mut ctx.cache);
        if let Some(defs) = ctx.embedded_definitions(converter)
            && let Some(obj) = converted.as_object_mut()
        {
            obj.insert(DEFINITIONS_KEY.to_string(), defs);
        }
        converted
    }

    fn resolve_response(&self, response: &ReferenceOr<Response>) -> Option<Response> {
        match response {
            ReferenceOr::Item(r) => Some(r.clone()),
            ReferenceOr::Reference { reference } => {
                let resolved = self.doc.resolve_as::<Response>(reference);
                if resolved.is_none() {
                    tracing::warn!("Skipping unresolvable response reference '{reference}'");
                }
                resolved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapiv3::OpenAPI;

    fn compile_first(yaml: &str, method: &str, path: &str) -> Option<CompiledTool> {
        let spec: OpenAPI = serde_yaml::from_str(yaml).unwrap();
        let doc = SpecDocument::from_spec(&spec).unwrap();
        let compiler = OperationCompiler::new(&doc, SchemaDialect::JsonSchema);
        let mut ctx = BuildContext::new();

        let ReferenceOr::Item(item) = &spec.paths.paths[path] else {
            panic!("expected inline path item");
        };
        let operation = match method {
            "get" => item.get.as_ref(),
            "post" => item.post.as_ref(),
            _ => None,
        }
        .expect("operation");
        let params = merged_parameters(&doc, &item.parameters, operation);
        compiler.compile(method, path, &params, operation, &mut ctx)
    }

    #[test]
    fn object_body_splices_into_flat_namespace() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /widgets:
    post:
      operationId: createWidget
      parameters:
        - name: c
          in: query
          required: true
          schema: { type: string }
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [a]
              properties:
                a: { type: string }
                b: { type: integer }
      responses:
        "200":
          description: ok
"#,
            "post",
            "/widgets",
        )
        .unwrap();

        let props = tool.input_schema["properties"].as_object().unwrap();
        let mut names: Vec<&str> = props.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b", "c"]);

        let required = tool.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("a")));
        assert!(required.contains(&json!("c")));
        assert!(!required.contains(&json!("b")));
    }

    #[test]
    fn scalar_body_nests_under_a_single_body_property() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /notes:
    post:
      operationId: createNote
      requestBody:
        required: true
        content:
          application/json:
            schema: { type: string }
      responses:
        "200":
          description: ok
"#,
            "post",
            "/notes",
        )
        .unwrap();

        let props = tool.input_schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props["body"]["type"], "string");
        assert_eq!(tool.input_schema["required"], json!(["body"]));
    }

    #[test]
    fn multipart_scalar_body_is_dropped() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /uploads:
    post:
      operationId: upload
      requestBody:
        content:
          multipart/form-data:
            schema: { type: string }
      responses:
        "200":
          description: ok
"#,
            "post",
            "/uploads",
        )
        .unwrap();

        let props = tool.input_schema["properties"].as_object().unwrap();
        assert!(props.is_empty());
    }

    #[test]
    fn error_responses_are_summarized_in_the_description() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /pets/{petId}:
    get:
      operationId: getPet
      summary: Fetch a pet
      parameters:
        - name: petId
          in: path
          required: true
          schema: { type: integer }
      responses:
        "200":
          description: ok
        "404":
          description: not found
        "500":
          description: server exploded
"#,
            "get",
            "/pets/{petId}",
        )
        .unwrap();

        assert!(tool.description.starts_with("Fetch a pet"));
        assert!(tool.description.contains("404: not found"));
        assert!(tool.description.contains("500: server exploded"));
    }

    #[test]
    fn operations_without_an_id_are_skipped() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /anonymous:
    get:
      responses:
        "200":
          description: ok
"#,
            "get",
            "/anonymous",
        );
        assert!(tool.is_none());
    }

    #[test]
    fn path_parameters_are_always_required_and_carry_descriptions() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /pets/{petId}:
    parameters:
      - name: verbose
        in: query
        schema: { type: boolean }
    get:
      operationId: getPet
      parameters:
        - name: petId
          in: path
          description: Pet identifier
          schema: { type: integer }
      responses:
        "200":
          description: ok
"#,
            "get",
            "/pets/{petId}",
        )
        .unwrap();

        let props = tool.input_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("verbose"));
        assert_eq!(props["petId"]["description"], "Pet identifier");
        assert_eq!(tool.input_schema["required"], json!(["petId"]));
    }

    #[test]
    fn result_schema_prefers_json_success_response() {
        let tool = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
components:
  schemas:
    Pet:
      type: object
      properties:
        name: { type: string }
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { $ref: '#/components/schemas/Pet' }
"#,
            "get",
            "/pets",
        )
        .unwrap();

        let result = tool.result_schema.unwrap();
        assert_eq!(result["type"], "array");
        assert_eq!(result["items"]["$ref"], "#/$defs/Pet");
        assert!(result["$defs"]["Pet"].is_object());
        // The input schema is self-contained too.
        assert!(tool.input_schema["$defs"]["Pet"].is_object());
    }

    #[test]
    fn binary_and_missing_success_responses() {
        let binary = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /image:
    get:
      operationId: getImage
      responses:
        "200":
          description: ok
          content:
            image/png: {}
"#,
            "get",
            "/image",
        )
        .unwrap();
        let result = binary.result_schema.unwrap();
        assert_eq!(result["description"], "Binary response content");

        let none = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /fire:
    get:
      operationId: fireAndForget
      responses:
        "404":
          description: not found
"#,
            "get",
            "/fire",
        )
        .unwrap();
        assert!(none.result_schema.is_none());

        let empty = compile_first(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /ping:
    get:
      operationId: ping
      responses:
        "204":
          description: no content
"#,
            "get",
            "/ping",
        )
        .unwrap();
        let result = empty.result_schema.unwrap();
        assert_eq!(result["description"], "Plain text response");
    }
}

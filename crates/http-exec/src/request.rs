//! Request preparation.
//!
//! The compiled input schema is flat: path/query/header parameters and request-body fields
//! share one argument namespace. Preparation re-derives each argument's placement from the
//! operation record before the request goes out. Arguments consumed by no declared parameter
//! fall through to the request body.

use crate::executor::ExecError;
use openapiv3::{Parameter, ParameterData, ReferenceOr, RequestBody};
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::HashSet;
use toolgate_openapi::operation::OperationRecord;
use toolgate_openapi::resolver::SpecDocument;

/// An outbound request assembled from an operation record and tool arguments.
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    /// Path with every `{param}` template substituted.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// How leftover arguments map onto the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    /// Object bodies: leftover arguments are the body's fields.
    Fields,
    /// Non-object bodies: the single `body` argument is the payload.
    Payload,
}

#[derive(Debug, Clone, Copy)]
enum Placement {
    Path,
    Query,
    Header,
}

/// Assemble the outbound request for one tool invocation.
///
/// # Errors
///
/// Returns an error if the HTTP method is unsupported or a required parameter is missing from
/// the arguments.
pub fn prepare(
    doc: &SpecDocument,
    record: &OperationRecord,
    arguments: &Value,
) -> Result<PreparedRequest, ExecError> {
    let method = parse_method(&record.method)?;
    let args = arguments.as_object().cloned().unwrap_or_default();

    let mut path = record.path.clone();
    let mut query: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut consumed: HashSet<String> = HashSet::new();

    for param_ref in &record.operation.parameters {
        let Some(param) = resolve_parameter(doc, param_ref) else {
            continue;
        };
        let (data, placement): (&ParameterData, Placement) = match &param {
            Parameter::Path { parameter_data, .. } => (parameter_data, Placement::Path),
            Parameter::Query { parameter_data, .. } => (parameter_data, Placement::Query),
            Parameter::Header { parameter_data, .. } => (parameter_data, Placement::Header),
            Parameter::Cookie { parameter_data, .. } => {
                tracing::warn!(
                    "Ignoring cookie parameter '{}': not supported",
                    parameter_data.name
                );
                continue;
            }
        };
        let required = matches!(placement, Placement::Path) || data.required;

        let value = args.get(&data.name).filter(|v| !v.is_null());
        let Some(value) = value else {
            if required {
                return Err(ExecError::Runtime(format!(
                    "Missing required parameter: {}",
                    data.name
                )));
            }
            continue;
        };
        consumed.insert(data.name.clone());

        match placement {
            Placement::Path => {
                path = path.replace(&format!("{{{}}}", data.name), &value_to_string(value));
            }
            Placement::Query => query.extend(query_pairs(&data.name, value)),
            Placement::Header => headers.push((data.name.clone(), value_to_string(value))),
        }
    }

    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    let body = assemble_body(doc, record, &args, &consumed);

    Ok(PreparedRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn resolve_parameter(doc: &SpecDocument, param: &ReferenceOr<Parameter>) -> Option<Parameter> {
    match param {
        ReferenceOr::Item(p) => Some(p.clone()),
        ReferenceOr::Reference { reference } => {
            let resolved = doc.resolve_as::<Parameter>(reference);
            if resolved.is_none() {
                tracing::warn!("Ignoring unresolvable parameter reference '{reference}'");
            }
            resolved
        }
    }
}

fn assemble_body(
    doc: &SpecDocument,
    record: &OperationRecord,
    args: &Map<String, Value>,
    consumed: &HashSet<String>,
) -> Option<Value> {
    let body_ref = record.operation.request_body.as_ref()?;
    let body = match body_ref {
        ReferenceOr::Item(b) => b.clone(),
        ReferenceOr::Reference { reference } => doc.resolve_as::<RequestBody>(reference)?,
    };

    match body_mode(doc, &body)? {
        BodyMode::Payload => args.get("body").filter(|v| !v.is_null()).cloned(),
        BodyMode::Fields => {
            let fields: Map<String, Value> = args
                .iter()
                .filter(|(name, value)| !consumed.contains(*name) && !value.is_null())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            (!fields.is_empty()).then(|| Value::Object(fields))
        }
    }
}

/// Mirror image of the compiler's flattening rule: object bodies were spliced into the flat
/// namespace, anything else was exposed as a single `body` argument.
fn body_mode(doc: &SpecDocument, body: &RequestBody) -> Option<BodyMode> {
    let (_, content) = body.content.first()?;
    let schema_ref = content.schema.as_ref()?;
    let node = match schema_ref {
        ReferenceOr::Item(schema) => serde_json::to_value(schema).ok()?,
        ReferenceOr::Reference { reference } => doc.resolve(reference)?.clone(),
    };

    let is_object = node.get("type").and_then(Value::as_str) == Some("object")
        || node.get("properties").is_some();
    Some(if is_object {
        BodyMode::Fields
    } else {
        BodyMode::Payload
    })
}

fn query_pairs(name: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| (name.to_string(), value_to_string(item)))
            .collect(),
        Value::Object(map) => vec![(
            name.to_string(),
            serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()),
        )],
        other => vec![(name.to_string(), value_to_string(other))],
    }
}

/// Convert a JSON value to a string for URL/header parameters.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn parse_method(method: &str) -> Result<Method, ExecError> {
    match method {
        "get" => Ok(Method::GET),
        "post" => Ok(Method::POST),
        "put" => Ok(Method::PUT),
        "delete" => Ok(Method::DELETE),
        "patch" => Ok(Method::PATCH),
        other => Err(ExecError::Runtime(format!(
            "Unsupported HTTP method: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapiv3::OpenAPI;
    use serde_json::json;

    fn fixture(yaml: &str, method: &str, path: &str) -> (SpecDocument, OperationRecord) {
        let spec: OpenAPI = serde_yaml::from_str(yaml).unwrap();
        let doc = SpecDocument::from_spec(&spec).unwrap();
        let ReferenceOr::Item(item) = &spec.paths.paths[path] else {
            panic!("expected inline path item");
        };
        let operation = match method {
            "get" => item.get.clone(),
            "post" => item.post.clone(),
            _ => None,
        }
        .expect("operation");
        (
            doc,
            OperationRecord {
                method: method.to_string(),
                path: path.to_string(),
                operation,
            },
        )
    }

    const PETS: &str = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /pets/{petId}:
    get:
      operationId: getPet
      parameters:
        - name: petId
          in: path
          required: true
          schema: { type: integer }
        - name: tags
          in: query
          schema:
            type: array
            items: { type: string }
        - name: X-Trace
          in: header
          schema: { type: string }
      responses:
        "200":
          description: ok
"#;

    #[test]
    fn classifies_path_query_and_header_arguments() {
        let (doc, record) = fixture(PETS, "get", "/pets/{petId}");
        let prepared = prepare(
            &doc,
            &record,
            &json!({ "petId": 7, "tags": ["a", "b"], "X-Trace": "on" }),
        )
        .unwrap();

        assert_eq!(prepared.method, Method::GET);
        assert_eq!(prepared.path, "/pets/7");
        assert_eq!(
            prepared.query,
            vec![
                ("tags".to_string(), "a".to_string()),
                ("tags".to_string(), "b".to_string())
            ]
        );
        assert_eq!(
            prepared.headers,
            vec![("X-Trace".to_string(), "on".to_string())]
        );
        assert!(prepared.body.is_none());
    }

    #[test]
    fn missing_required_parameter_is_an_error() {
        let (doc, record) = fixture(PETS, "get", "/pets/{petId}");
        let err = prepare(&doc, &record, &json!({})).unwrap_err();
        assert!(err.to_string().contains("petId"));
    }

    #[test]
    fn object_bodies_collect_leftover_arguments() {
        let (doc, record) = fixture(
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
        - name: dryRun
          in: query
          schema: { type: boolean }
      requestBody:
        content:
          application/json:
            schema:
              type: object
              properties:
                a: { type: string }
                b: { type: integer }
      responses:
        "200":
          description: ok
"#,
            "post",
            "/widgets",
        );

        let prepared = prepare(&doc, &record, &json!({ "dryRun": true, "a": "x", "b": 2 })).unwrap();
        assert_eq!(prepared.query, vec![("dryRun".to_string(), "true".to_string())]);
        assert_eq!(prepared.body, Some(json!({ "a": "x", "b": 2 })));
    }

    #[test]
    fn scalar_bodies_use_the_body_argument_as_payload() {
        let (doc, record) = fixture(
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
        );

        let prepared = prepare(&doc, &record, &json!({ "body": "hello" })).unwrap();
        assert_eq!(prepared.body, Some(json!("hello")));
    }

    #[test]
    fn null_arguments_are_treated_as_absent() {
        let (doc, record) = fixture(PETS, "get", "/pets/{petId}");
        let prepared = prepare(&doc, &record, &json!({ "petId": 1, "tags": null })).unwrap();
        assert!(prepared.query.is_empty());
    }
}

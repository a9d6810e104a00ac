//! Operation execution.

use crate::config::{AuthConfig, HttpExecConfig, extra_headers_from_env};
use crate::request::prepare;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use toolgate_openapi::operation::OperationRecord;
use toolgate_openapi::resolver::SpecDocument;
use url::Url;

/// Errors raised by operation executors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Invalid arguments or unsupported operation shapes.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Transport-level failures (connect, TLS, timeout).
    #[error("Request error: {0}")]
    Request(String),

    /// The upstream API answered with a non-success status.
    #[error("API returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Response body captured from the upstream, when readable.
        body: Option<Value>,
    },
}

/// Successful outcome of one operation execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Response payload: parsed JSON when possible, text otherwise, and a base64 wrapper
    /// object for non-UTF-8 bodies.
    pub data: Value,
}

/// The outbound HTTP capability consumed by the dispatch gateway.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Execute one operation with the flattened tool arguments.
    async fn execute(
        &self,
        record: &OperationRecord,
        arguments: &Value,
    ) -> Result<ExecutionOutcome, ExecError>;
}

/// Default reqwest-backed executor.
pub struct HttpExecutor {
    client: Client,
    config: HttpExecConfig,
    doc: SpecDocument,
}

impl HttpExecutor {
    #[must_use]
    pub fn new(config: HttpExecConfig, doc: SpecDocument) -> Self {
        Self {
            client: Client::new(),
            config,
            doc,
        }
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, ExecError> {
        let joined = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut url =
            Url::parse(&joined).map_err(|e| ExecError::Runtime(format!("Invalid URL: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            if let Some(AuthConfig::Query { name, value }) = &self.config.auth {
                pairs.append_pair(name, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        for (key, value) in extra_headers_from_env() {
            request = request.header(&key, &value);
        }
        request
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
            Some(AuthConfig::Header { name, value }) => request.header(name, value),
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            // Query auth is applied during URL building.
            Some(AuthConfig::Query { .. } | AuthConfig::None) | None => request,
        }
    }

    fn apply_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.timeout {
            Some(0) => request,
            Some(secs) => request.timeout(Duration::from_secs(secs)),
            None => request,
        }
    }
}

#[async_trait]
impl OperationExecutor for HttpExecutor {
    async fn execute(
        &self,
        record: &OperationRecord,
        arguments: &Value,
    ) -> Result<ExecutionOutcome, ExecError> {
        let parts = prepare(&self.doc, record, arguments)?;
        let url = self.build_url(&parts.path, &parts.query)?;

        let mut request = self.client.request(parts.method.clone(), url);
        request = self.apply_headers(request);
        for (key, value) in &parts.headers {
            request = request.header(key, value);
        }
        request = self.apply_auth(request);
        if let Some(body) = &parts.body {
            request = request.json(body);
        }
        request = self.apply_timeout(request);

        let response = request
            .send()
            .await
            .map_err(|e| ExecError::Request(sanitize_reqwest_error(&e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExecError::Request(sanitize_reqwest_error(&e)))?;

        let payload = decode_body(&bytes, content_type.as_deref());
        if status.is_success() {
            Ok(ExecutionOutcome { data: payload })
        } else {
            Err(ExecError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body: Some(payload),
            })
        }
    }
}

fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        serde_json::from_str(text).unwrap_or_else(|_| json!(text))
    } else {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": b64,
        })
    }
}

/// Strip request URLs out of reqwest error strings; they can carry credentials in query
/// parameters or userinfo.
fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(url) = e.url() {
        msg = msg.replace(url.as_str(), &redact_url(url));
    }
    msg
}

fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    redacted.set_query(None);
    let _ = redacted.set_username("");
    let _ = redacted.set_password(None);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_body_parses_json_and_falls_back_to_text() {
        assert_eq!(decode_body(b"{\"ok\":true}", None), json!({ "ok": true }));
        assert_eq!(decode_body(b"plain", None), json!("plain"));
        assert_eq!(decode_body(b"", None), Value::Null);
    }

    #[test]
    fn decode_body_wraps_non_utf8_as_base64() {
        let out = decode_body(&[0xff, 0xfe, 0x00], Some("application/octet-stream"));
        assert_eq!(out["encoding"], "base64");
        assert_eq!(out["mimeType"], "application/octet-stream");
    }

    #[test]
    fn build_url_joins_base_and_appends_query_auth() {
        let spec: openapiv3::OpenAPI = serde_yaml::from_str(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths: {}
"#,
        )
        .unwrap();
        let doc = SpecDocument::from_spec(&spec).unwrap();

        let mut config = HttpExecConfig::new("https://api.example.com/v1/");
        config.auth = Some(AuthConfig::Query {
            name: "api_key".to_string(),
            value: "k".to_string(),
        });
        let executor = HttpExecutor::new(config, doc);

        let url = executor
            .build_url("/pets", &[("limit".to_string(), "5".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/pets?limit=5&api_key=k");
    }

    #[test]
    fn build_url_leaves_plain_urls_without_query() {
        let spec: openapiv3::OpenAPI = serde_yaml::from_str(
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths: {}
"#,
        )
        .unwrap();
        let doc = SpecDocument::from_spec(&spec).unwrap();
        let executor = HttpExecutor::new(HttpExecConfig::new("https://api.example.com"), doc);

        let url = executor.build_url("/pets", &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/pets");
    }
}

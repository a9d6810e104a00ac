//! HTTP executor configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable holding extra outbound headers as a JSON object.
pub const EXTRA_HEADERS_ENV: &str = "TOOLGATE_EXTRA_HEADERS";

/// Authentication applied to outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Bearer token in the `Authorization` header.
    Bearer { token: String },
    /// Arbitrary header name/value.
    Header { name: String, value: String },
    /// HTTP basic auth.
    Basic { username: String, password: String },
    /// API key passed as a query parameter.
    Query { name: String, value: String },
    /// No authentication.
    None,
}

/// Configuration for the default HTTP executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExecConfig {
    /// Base URL the operation paths are joined onto.
    pub base_url: String,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Default headers applied to every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-request timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl HttpExecConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }
}

/// Extra outbound headers sourced from the environment.
///
/// The variable must hold a JSON object of string values. Malformed content is ignored with a
/// warning; a bad environment never takes the process down.
#[must_use]
pub fn extra_headers_from_env() -> HashMap<String, String> {
    match std::env::var(EXTRA_HEADERS_ENV) {
        Ok(raw) => parse_extra_headers(&raw),
        Err(_) => HashMap::new(),
    }
}

fn parse_extra_headers(raw: &str) -> HashMap<String, String> {
    match serde_json::from_str::<HashMap<String, String>>(raw) {
        Ok(headers) => headers,
        Err(e) => {
            tracing::warn!("Ignoring {EXTRA_HEADERS_ENV}: not a JSON object of strings: {e}");
            HashMap::new()
        }
    }
}

//! Gateway configuration.

use serde::{Deserialize, Serialize};
use toolgate_http_exec::config::HttpExecConfig;
use toolgate_openapi::dialect::SchemaDialect;

/// Configuration for one gateway instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Logical group name; prefixes every internal catalog key.
    #[serde(default = "default_group")]
    pub group: String,

    /// Output schema dialect. Fixed per catalog build, not per call.
    #[serde(default)]
    pub dialect: SchemaDialect,

    /// HTTP executor configuration.
    pub http: HttpExecConfig,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(http: HttpExecConfig) -> Self {
        Self {
            group: default_group(),
            dialect: SchemaDialect::default(),
            http,
        }
    }
}

fn default_group() -> String {
    "api".to_string()
}

//! Output schema dialects.
//!
//! One conversion pass can target structurally different output shapes. The default dialect is
//! plain JSON Schema; the `Gemini` dialect spells type tokens in uppercase and expects binary
//! payloads as base64/URI strings instead of local file paths.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Key under which embedded component definitions are attached to a produced schema.
pub const DEFINITIONS_KEY: &str = "$defs";

/// Target dialect for converted schemas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaDialect {
    /// Standard JSON Schema (lowercase type tokens).
    #[default]
    JsonSchema,
    /// Gemini function-declaration flavor (uppercase type tokens).
    Gemini,
}

impl SchemaDialect {
    /// Map an abstract primitive type name to this dialect's spelling.
    #[must_use]
    pub fn type_token(self, ty: &str) -> String {
        match self {
            SchemaDialect::JsonSchema => ty.to_string(),
            SchemaDialect::Gemini => ty.to_ascii_uppercase(),
        }
    }

    /// Schema emitted for `format: binary` fields.
    ///
    /// Binary payloads cannot travel through a JSON tool argument as-is, so the field is
    /// redeclared as a string whose description explains the expected encoding.
    #[must_use]
    pub fn binary_schema(self, description: Option<&str>) -> Value {
        let hint = match self {
            SchemaDialect::JsonSchema => {
                "absolute path to a local file; its contents are sent as the binary payload"
            }
            SchemaDialect::Gemini => "base64-encoded content, or a URI the service can fetch",
        };
        let description = match description {
            Some(d) => format!("{d} ({hint})"),
            None => hint.to_string(),
        };
        json!({ "type": self.type_token("string"), "description": description })
    }
}

/// Rewrite a component-schema name into the local-definitions namespace.
#[must_use]
pub fn local_definitions_ref(name: &str) -> String {
    format!("#/{DEFINITIONS_KEY}/{name}")
}

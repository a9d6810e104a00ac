//! HTTP method semantics.
//!
//! Maps RFC 9110-style method semantics onto MCP `ToolAnnotations` so protocol clients can
//! tell read-only tools from destructive ones.

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// Generate MCP tool annotations from HTTP method semantics.
///
/// `open_world_hint` is always `true`: these tools interact with an external system. Unknown
/// or extension methods only set that hint and leave the rest unset.
#[must_use]
pub fn annotations_for_method(method: &Method) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match method.as_str() {
        "GET" | "HEAD" | "OPTIONS" => (Some(true), Some(false), Some(true)),
        "POST" => (Some(false), Some(false), Some(false)),
        "PUT" | "DELETE" => (Some(false), Some(true), Some(true)),
        // PATCH may or may not be idempotent; do not guess.
        "PATCH" => (Some(false), Some(true), None),
        _ => (None, None, None),
    };

    ToolAnnotations {
        title: None,
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}

//! Intra-document `$ref` resolver.
//!
//! Only pointers rooted at the loaded document (`#/...`) are supported; external file/URL
//! references resolve to not-found. Resolution never fails hard: a missing segment, an
//! out-of-document pointer, or a target that does not deserialize into the expected shape all
//! yield `None`, leaving the caller to degrade locally.

use crate::error::{CompileError, Result};
use openapiv3::OpenAPI;
use serde::de::DeserializeOwned;
use serde_json::Value;

const COMPONENT_SCHEMA_PREFIX: &str = "#/components/schemas/";

/// A specification document indexed for pointer resolution.
#[derive(Debug)]
pub struct SpecDocument {
    root: Value,
}

impl SpecDocument {
    /// Serialize a parsed spec for pointer resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be converted into JSON.
    pub fn from_spec(spec: &OpenAPI) -> Result<Self> {
        let root = serde_json::to_value(spec).map_err(|e| CompileError::OpenApi(e.to_string()))?;
        Ok(Self { root })
    }

    /// Resolve an intra-document pointer to the raw value it names.
    #[must_use]
    pub fn resolve(&self, pointer: &str) -> Option<&Value> {
        let frag = pointer.strip_prefix('#')?;
        if frag.is_empty() {
            return Some(&self.root);
        }
        if !frag.starts_with('/') {
            return None;
        }
        self.root.pointer(frag)
    }

    /// Resolve a pointer and deserialize the target into the expected shape.
    ///
    /// A target that exists but does not fit the shape (e.g. a parameter object missing its
    /// required fields) is treated as not-found rather than surfacing a partially-shaped
    /// object upstream.
    #[must_use]
    pub fn resolve_as<T: DeserializeOwned>(&self, pointer: &str) -> Option<T> {
        let value = self.resolve(pointer)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// The component name when `pointer` names a `#/components/schemas/...` location.
#[must_use]
pub fn component_schema_name(pointer: &str) -> Option<&str> {
    let name = pointer.strip_prefix(COMPONENT_SCHEMA_PREFIX)?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

//! `OpenAPI` schema -> target-dialect JSON Schema conversion.
//!
//! The converter walks raw schema nodes (the `serde_json::Value` form of `OpenAPI` schema
//! objects) and produces dialect-mapped JSON Schema. Reference cycles are broken by tracking
//! the set of pointers currently being expanded: descending into a reference clones the active
//! path, so sibling branches never observe each other's state.

use crate::dialect::{SchemaDialect, local_definitions_ref};
use crate::resolver::{SpecDocument, component_schema_name};
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};

/// Pointers currently being expanded by one top-level conversion call.
pub type ResolutionPath = BTreeSet<String>;

/// Cross-call memoization of converted reference targets.
///
/// Entries are recorded only for default-dialect, non-inlining conversions entered with an
/// empty active path, so a cached node never embeds a cycle stub that depended on the caller's
/// position in the schema graph. The cache lives in the per-build context and is rebuilt for
/// every catalog build.
#[derive(Debug, Default)]
pub struct ConversionCache {
    entries: HashMap<String, Value>,
}

impl ConversionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const COMPOSITE_KEYWORDS: [&str; 3] = ["oneOf", "anyOf", "allOf"];

/// Shape of a raw schema node. Every node is exactly one of these.
enum NodeShape<'a> {
    Reference {
        pointer: &'a str,
        description: Option<&'a str>,
    },
    Composite {
        keyword: &'a str,
        members: &'a Vec<Value>,
    },
    Object(&'a Map<String, Value>),
    Array(&'a Map<String, Value>),
    Primitive {
        fields: &'a Map<String, Value>,
        ty: &'a str,
    },
    Untyped(&'a Map<String, Value>),
}

fn classify(fields: &Map<String, Value>) -> NodeShape<'_> {
    if let Some(Value::String(pointer)) = fields.get("$ref") {
        return NodeShape::Reference {
            pointer,
            description: fields.get("description").and_then(Value::as_str),
        };
    }
    for keyword in COMPOSITE_KEYWORDS {
        if let Some(Value::Array(members)) = fields.get(keyword) {
            return NodeShape::Composite { keyword, members };
        }
    }
    match fields.get("type").and_then(Value::as_str) {
        Some("object") => NodeShape::Object(fields),
        Some("array") => NodeShape::Array(fields),
        Some(ty) => NodeShape::Primitive { fields, ty },
        None if fields.contains_key("properties")
            || fields.contains_key("additionalProperties") =>
        {
            NodeShape::Object(fields)
        }
        None if fields.contains_key("items") => NodeShape::Array(fields),
        None => NodeShape::Untyped(fields),
    }
}

/// Recursive schema converter over one spec document.
pub struct SchemaConverter<'a> {
    doc: &'a SpecDocument,
    dialect: SchemaDialect,
}

impl<'a> SchemaConverter<'a> {
    #[must_use]
    pub fn new(doc: &'a SpecDocument, dialect: SchemaDialect) -> Self {
        Self { doc, dialect }
    }

    /// Convert one schema node.
    ///
    /// `inline_references = false` leaves component-schema references as rewritten
    /// local-definitions pointers; `true` substitutes every reference target in place.
    /// Conversion never fails: unresolvable pointers degrade to the literal reference node and
    /// cycles degrade to a shallow stub.
    pub fn convert(
        &self,
        node: &Value,
        path: &ResolutionPath,
        inline_references: bool,
        cache: &mut ConversionCache,
    ) -> Value {
        let Some(fields) = node.as_object() else {
            // Boolean and other non-object schemas carry no convertible structure.
            return json!({});
        };

        match classify(fields) {
            NodeShape::Reference {
                pointer,
                description,
            } => self.convert_reference(pointer, description, path, inline_references, cache),
            NodeShape::Composite { keyword, members } => {
                let mut out = Map::new();
                copy_description(fields, &mut out);
                let mut converted = Vec::with_capacity(members.len());
                for member in members {
                    // Each member gets its own copy of the current path: cycles across
                    // members are still caught, but one member cannot leak state into
                    // another's conversion.
                    let branch = path.clone();
                    converted.push(self.convert(member, &branch, inline_references, cache));
                }
                out.insert(keyword.to_string(), Value::Array(converted));
                Value::Object(out)
            }
            NodeShape::Object(fields) => self.convert_object(fields, path, inline_references, cache),
            NodeShape::Array(fields) => self.convert_array(fields, path, inline_references, cache),
            NodeShape::Primitive { fields, ty } => self.convert_primitive(fields, ty),
            NodeShape::Untyped(fields) => {
                let mut out = Map::new();
                copy_description(fields, &mut out);
                Value::Object(out)
            }
        }
    }

    fn convert_reference(
        &self,
        pointer: &str,
        sibling_description: Option<&str>,
        path: &ResolutionPath,
        inline_references: bool,
        cache: &mut ConversionCache,
    ) -> Value {
        let rewritten = component_schema_name(pointer).map(local_definitions_ref);

        if path.contains(pointer) {
            // Cycle guard: degrade to a shallow stub instead of recursing.
            return json!({
                "$ref": rewritten.unwrap_or_else(|| pointer.to_string()),
                "description": format!("Cyclic reference to {pointer}"),
            });
        }

        if !inline_references && let Some(local) = rewritten {
            let mut out = Map::new();
            out.insert("$ref".to_string(), json!(local));
            if let Some(desc) = sibling_description
                && self.target_lacks_description(pointer)
            {
                out.insert("description".to_string(), json!(desc));
            }
            return Value::Object(out);
        }

        let cacheable = !inline_references && self.dialect == SchemaDialect::default();
        if cacheable && let Some(hit) = cache.entries.get(pointer) {
            return hit.clone();
        }

        let Some(target) = self.doc.resolve(pointer) else {
            tracing::warn!("Unresolved $ref '{pointer}', leaving the pointer in place");
            return json!({ "$ref": pointer });
        };

        let mut branch = path.clone();
        branch.insert(pointer.to_string());
        let converted = self.convert(target, &branch, inline_references, cache);

        if cacheable && path.is_empty() {
            cache
                .entries
                .insert(pointer.to_string(), converted.clone());
        }
        converted
    }

    fn target_lacks_description(&self, pointer: &str) -> bool {
        self.doc
            .resolve(pointer)
            .is_none_or(|target| target.get("description").is_none())
    }

    fn convert_object(
        &self,
        fields: &Map<String, Value>,
        path: &ResolutionPath,
        inline_references: bool,
        cache: &mut ConversionCache,
    ) -> Value {
        let mut out = Map::new();
        copy_description(fields, &mut out);
        out.insert(
            "type".to_string(),
            json!(self.dialect.type_token("object")),
        );

        if let Some(Value::Object(props)) = fields.get("properties") {
            let mut converted = Map::new();
            for (name, prop) in props {
                // Sibling properties each descend against their own view of the path.
                let branch = path.clone();
                converted.insert(
                    name.clone(),
                    self.convert(prop, &branch, inline_references, cache),
                );
            }
            out.insert("properties".to_string(), Value::Object(converted));
        }

        if let Some(Value::Array(required)) = fields.get("required")
            && !required.is_empty()
        {
            out.insert("required".to_string(), json!(required));
        }

        match fields.get("additionalProperties") {
            // Absent or `true`: permissive.
            None | Some(Value::Bool(true)) => {}
            Some(extra @ Value::Object(_)) => {
                out.insert(
                    "additionalProperties".to_string(),
                    self.convert(extra, path, inline_references, cache),
                );
            }
            Some(_) => {
                out.insert("additionalProperties".to_string(), json!(false));
            }
        }

        Value::Object(out)
    }

    fn convert_array(
        &self,
        fields: &Map<String, Value>,
        path: &ResolutionPath,
        inline_references: bool,
        cache: &mut ConversionCache,
    ) -> Value {
        let mut out = Map::new();
        copy_description(fields, &mut out);
        out.insert("type".to_string(), json!(self.dialect.type_token("array")));
        if let Some(items) = fields.get("items") {
            out.insert(
                "items".to_string(),
                self.convert(items, path, inline_references, cache),
            );
        }
        Value::Object(out)
    }

    fn convert_primitive(&self, fields: &Map<String, Value>, ty: &str) -> Value {
        if ty == "string" && fields.get("format").and_then(Value::as_str) == Some("binary") {
            return self
                .dialect
                .binary_schema(fields.get("description").and_then(Value::as_str));
        }

        let mut out = Map::new();
        copy_description(fields, &mut out);
        out.insert("type".to_string(), json!(self.dialect.type_token(ty)));
        for key in ["format", "enum", "default"] {
            if let Some(v) = fields.get(key) {
                out.insert(key.to_string(), v.clone());
            }
        }
        Value::Object(out)
    }

    /// Fully inlined, dialect-converted copy of every named component schema.
    ///
    /// Returns `None` when the document declares no component schemas.
    #[must_use]
    pub fn embedded_definitions(&self, cache: &mut ConversionCache) -> Option<Value> {
        let schemas = self.doc.resolve("#/components/schemas")?.as_object()?;
        if schemas.is_empty() {
            return None;
        }
        let mut defs = Map::new();
        for (name, schema) in schemas {
            let pointer = format!("#/components/schemas/{name}");
            let mut path = ResolutionPath::new();
            path.insert(pointer);
            defs.insert(name.clone(), self.convert(schema, &path, true, cache));
        }
        Some(Value::Object(defs))
    }
}

fn copy_description(fields: &Map<String, Value>, out: &mut Map<String, Value>) {
    if let Some(desc) = fields.get("description") {
        out.insert("description".to_string(), desc.clone());
    }
}

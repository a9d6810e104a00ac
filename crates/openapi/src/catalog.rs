//! Tool catalog construction and external naming.
//!
//! One build pass walks every path/method combination in a spec, compiles each operation into
//! a tool, and assigns every tool a globally unique, length-bounded external name. All mutable
//! build state (conversion cache, name registry, memoized embedded definitions) lives in an
//! explicit per-build context, so independent builds never interfere.

use crate::convert::{ConversionCache, SchemaConverter};
use crate::dialect::SchemaDialect;
use crate::error::Result;
use crate::operation::{CompiledTool, OperationCompiler, OperationRecord, merged_parameters};
use crate::resolver::SpecDocument;
use openapiv3::{OpenAPI, Operation, PathItem, ReferenceOr};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Upper bound on externally exposed tool names.
pub const EXTERNAL_NAME_MAX: usize = 64;

const SUFFIX_WIDTH: usize = 4;

/// Per-build registry guaranteeing external-name uniqueness.
#[derive(Debug, Default)]
pub struct NameRegistry {
    counter: u32,
    assigned: HashSet<String>,
}

impl NameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a unique, length-bounded external name for a natural identifier.
    ///
    /// Identifiers within the bound are used unchanged; over-length or colliding identifiers
    /// are truncated to leave room for a zero-padded counter suffix. The counter is monotonic
    /// for the lifetime of one build, so two identifiers that truncate to the same prefix
    /// still come out distinct.
    pub fn assign(&mut self, natural: &str) -> String {
        let base = sanitize_name(natural);
        if base.chars().count() <= EXTERNAL_NAME_MAX && self.assigned.insert(base.clone()) {
            return base;
        }

        let prefix: String = base.chars().take(EXTERNAL_NAME_MAX - SUFFIX_WIDTH).collect();
        loop {
            self.counter += 1;
            let candidate = format!("{prefix}{:0width$}", self.counter, width = SUFFIX_WIDTH);
            if self.assigned.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn sanitize_name(name: &str) -> String {
    // Tool names travel through protocols that only accept [A-Za-z0-9_-].
    let allowed = Regex::new(r"[^a-zA-Z0-9_-]+").unwrap();
    let cleaned = allowed.replace_all(name, "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Mutable state scoped to one catalog build.
pub struct BuildContext {
    /// Converted-pointer memoization.
    pub cache: ConversionCache,
    /// External-name assignment.
    pub names: NameRegistry,
    defs: Option<Option<Value>>,
}

impl BuildContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: ConversionCache::new(),
            names: NameRegistry::new(),
            defs: None,
        }
    }

    /// Embedded component definitions, computed once per build.
    pub fn embedded_definitions(&mut self, converter: &SchemaConverter<'_>) -> Option<Value> {
        if self.defs.is_none() {
            self.defs = Some(converter.embedded_definitions(&mut self.cache));
        }
        self.defs.clone().flatten()
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete set of compiled tools plus their operation lookup, produced by one build pass
/// over a specification document.
#[derive(Debug)]
pub struct ToolCatalog {
    group: String,
    dialect: SchemaDialect,
    tools: Vec<CompiledTool>,
    operations: HashMap<String, OperationRecord>,
}

impl ToolCatalog {
    /// Build a catalog from a parsed spec.
    ///
    /// The dialect is fixed per build; rebuilding starts from a fresh context (cache and name
    /// counter included).
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be serialized for pointer resolution.
    pub fn build(spec: &OpenAPI, group: &str, dialect: SchemaDialect) -> Result<Self> {
        let doc = SpecDocument::from_spec(spec)?;
        let compiler = OperationCompiler::new(&doc, dialect);
        let mut ctx = BuildContext::new();
        let mut tools: Vec<CompiledTool> = Vec::new();
        let mut operations: HashMap<String, OperationRecord> = HashMap::new();

        for (path, item_ref) in &spec.paths.paths {
            let ReferenceOr::Item(item) = item_ref else {
                tracing::warn!("Skipping path '{path}': pointer-only path items are not supported");
                continue;
            };

            for (method, operation) in supported_operations(item) {
                let parameters = merged_parameters(&doc, &item.parameters, operation);
                let Some(mut tool) =
                    compiler.compile(method, path, &parameters, operation, &mut ctx)
                else {
                    continue;
                };

                tool.name = ctx.names.assign(&tool.name);

                let mut record_operation = operation.clone();
                record_operation.parameters =
                    parameters.into_iter().map(ReferenceOr::Item).collect();

                operations.insert(
                    format!("{group}-{}", tool.name),
                    OperationRecord {
                        method: method.to_string(),
                        path: path.clone(),
                        operation: record_operation,
                    },
                );
                tools.push(tool);
            }
        }

        tracing::info!("Compiled {} tools into catalog group '{group}'", tools.len());

        Ok(Self {
            group: group.to_string(),
            dialect,
            tools,
            operations,
        })
    }

    /// Logical group name; prefixes every internal catalog key.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Dialect this catalog was built with.
    #[must_use]
    pub fn dialect(&self) -> SchemaDialect {
        self.dialect
    }

    /// Compiled tools, in spec declaration order.
    #[must_use]
    pub fn tools(&self) -> &[CompiledTool] {
        &self.tools
    }

    /// Look up the operation behind an internal catalog key (`"<group>-<name>"`).
    #[must_use]
    pub fn operation(&self, key: &str) -> Option<&OperationRecord> {
        self.operations.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The supported HTTP verbs, in enumeration order. Other verbs are ignored.
fn supported_operations(item: &PathItem) -> impl Iterator<Item = (&'static str, &Operation)> + '_ {
    [
        ("get", &item.get),
        ("post", &item.post),
        ("put", &item.put),
        ("delete", &item.delete),
        ("patch", &item.patch),
    ]
    .into_iter()
    .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
}

//! Host module graph.
//!
//! The host process exposes its live state as a flat list of modules, each
//! with a set of named export slots. Nothing about this graph is indexed by
//! type, and export objects may reference each other (including themselves),
//! so consumers only ever look at top-level exports through [`HostObject`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// One raw record as held by a host store. Schema is owned by the host.
pub type RawRecord = Value;

/// Errors from loading a graph snapshot.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected snapshot shape: {0}")]
    Shape(String),
}

/// An object exported by a host module.
pub trait HostObject: Send + Sync {
    /// Whether the object's prototype exposes `method`.
    fn responds_to(&self, method: &str) -> bool;

    /// The collection held by the object. Only called once the object has
    /// been selected by a lookup strategy.
    fn records(&self) -> Vec<RawRecord>;
}

/// A module and its named export slots.
#[derive(Clone, Default)]
pub struct HostModule {
    pub id: String,
    exports: BTreeMap<String, Arc<dyn HostObject>>,
}

impl HostModule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exports: BTreeMap::new(),
        }
    }

    pub fn with_export(mut self, slot: impl Into<String>, object: Arc<dyn HostObject>) -> Self {
        self.exports.insert(slot.into(), object);
        self
    }

    pub fn export(&self, slot: &str) -> Option<&Arc<dyn HostObject>> {
        self.exports.get(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostModule")
            .field("id", &self.id)
            .field("slots", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The host's module registry, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: Vec<HostModule>,
}

impl ModuleGraph {
    pub fn new(modules: Vec<HostModule>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[HostModule] {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// JSON snapshots
// ---------------------------------------------------------------------------

/// Export object materialized from a JSON snapshot.
#[derive(Debug, Clone, Default)]
pub struct JsonHostObject {
    methods: Vec<String>,
    records: Vec<RawRecord>,
}

impl JsonHostObject {
    pub fn new(methods: Vec<String>, records: Vec<RawRecord>) -> Self {
        Self { methods, records }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let methods = object
            .get("methods")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        // Stores hold their collection as a map keyed by id or as a plain list.
        let records = match object.get("quests") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => map.values().cloned().collect(),
            _ => Vec::new(),
        };
        Some(Self { methods, records })
    }
}

impl HostObject for JsonHostObject {
    fn responds_to(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    fn records(&self) -> Vec<RawRecord> {
        self.records.clone()
    }
}

/// Parse a snapshot document:
///
/// ```text
/// {"modules": [{"id": "4021", "exports": {"Z": {"methods": ["getQuest"], "quests": [...]}}}]}
/// ```
///
/// Exports that are not JSON objects are skipped, as are modules without an
/// `exports` object.
pub fn parse_snapshot(document: &Value) -> Result<ModuleGraph, ScanError> {
    let modules = document
        .get("modules")
        .and_then(Value::as_array)
        .ok_or_else(|| ScanError::Shape("missing `modules` array".to_string()))?;

    let mut graph = Vec::with_capacity(modules.len());
    for (index, module) in modules.iter().enumerate() {
        let id = match module.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => index.to_string(),
        };
        let Some(exports) = module.get("exports").and_then(Value::as_object) else {
            continue;
        };
        let mut host_module = HostModule::new(id);
        for (slot, value) in exports {
            if let Some(object) = JsonHostObject::from_value(value) {
                host_module = host_module.with_export(slot.clone(), Arc::new(object));
            }
        }
        graph.push(host_module);
    }
    Ok(ModuleGraph::new(graph))
}

/// Read and parse a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<ModuleGraph, ScanError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_str(&contents)?;
    parse_snapshot(&document)
}

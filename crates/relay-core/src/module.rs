//! The `Module` capability set and its accompanying descriptor.

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::Stream;

use crate::context::Context;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("{0}")]
    Execute(String),
    #[error("{0}")]
    Load(String),
    #[error("streaming is not supported by this module")]
    StreamingUnsupported,
}

pub type BoxStream = Pin<Box<dyn Stream<Item = Result<Value, ModuleError>> + Send>>;

/// Capability set consumed by the executor. Every registered module
/// implements this; `stream`, `on_load`, and `on_unload` are optional and
/// default to no-ops / unsupported.
#[async_trait]
pub trait Module: Send + Sync {
    fn input_schema(&self) -> &Value;
    fn output_schema(&self) -> &Value;
    fn description(&self) -> &str;

    async fn execute(&self, inputs: Value, context: &Context) -> Result<Value, ModuleError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn stream(&self, _inputs: Value, _context: &Context) -> Result<BoxStream, ModuleError> {
        Err(ModuleError::StreamingUnsupported)
    }

    async fn on_load(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_unload(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Annotations describing a module's operational characteristics, read by
/// the approval gate (`requires_approval`) and useful to callers deciding
/// whether a result can be cached or retried.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default)]
    pub idempotent: bool,
    /// Accepts both `requires_approval` (snake) and `requiresApproval`
    /// (camel) on read; always emits `requiresApproval` on write, normalizing
    /// on ingest rather than guessing the caller's intent.
    #[serde(default, alias = "requires_approval", rename = "requiresApproval")]
    pub requires_approval: bool,
    #[serde(default, alias = "open_world", rename = "openWorld")]
    pub open_world: bool,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleExample {
    pub title: String,
    pub inputs: Value,
    pub output: Value,
    #[serde(default)]
    pub description: Option<String>,
}

/// Static metadata about a registered module, assembled from code defaults
/// and (optionally) YAML overrides during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub module_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub documentation: String,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub examples: Vec<ModuleExample>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl ModuleDescriptor {
    pub fn new(module_id: impl Into<String>, module: &dyn Module) -> Self {
        Self {
            module_id: module_id.into(),
            name: String::new(),
            description: module.description().to_string(),
            documentation: String::new(),
            input_schema: module.input_schema().clone(),
            output_schema: module.output_schema().clone(),
            version: default_version(),
            tags: Vec::new(),
            annotations: Annotations::default(),
            examples: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Shallow-merges YAML-declared overrides on top of code defaults; YAML
    /// keys win.
    pub fn merge_overrides(&mut self, overrides: &ModuleMetadataOverride) {
        if let Some(v) = &overrides.description {
            self.description = v.clone();
        }
        if let Some(v) = &overrides.name {
            self.name = v.clone();
        }
        if let Some(v) = &overrides.version {
            self.version = v.clone();
        }
        if let Some(v) = &overrides.tags {
            self.tags = v.clone();
        }
        if let Some(v) = &overrides.annotations {
            self.annotations = v.clone();
        }
        if let Some(v) = &overrides.examples {
            self.examples = v.clone();
        }
        if let Some(v) = &overrides.documentation {
            self.documentation = v.clone();
        }
        if let Some(v) = &overrides.metadata {
            for (k, val) in v {
                self.metadata.insert(k.clone(), val.clone());
            }
        }
    }
}

/// The module metadata YAML shape a binding file carries. Every field is
/// optional: a missing field falls back to the code-declared value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMetadataOverride {
    pub description: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub tags: Option<Vec<String>>,
    pub annotations: Option<Annotations>,
    pub examples: Option<Vec<ModuleExample>>,
    pub documentation: Option<String>,
    pub entry_point: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<crate::registry::DependencyInfo>,
    pub metadata: Option<serde_json::Map<String, Value>>,
}

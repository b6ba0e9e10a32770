//! Binding loader — the YAML-declared, zero-code module adapter format, and
//! the substrate the registry's discovery pipeline scans (see
//! `registry::discovery`). A `CallableRegistry` resolves a binding's
//! `target` to an in-process callable, standing in for dynamic entry-point
//! resolution in a language without reflection-based `import`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::module::{Annotations, Module, ModuleError, ModuleExample};
use crate::registry::DependencyInfo;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("invalid binding target '{0}': must not contain '..' segments or 'file:' URLs")]
    InvalidTarget(String),
    #[error("binding target module not found: {0}")]
    ModuleNotFound(String),
    #[error("no callable registered for target '{0}'")]
    CallableNotFound(String),
    #[error("target '{0}' did not resolve to a callable")]
    NotCallable(String),
    #[error("schema missing for binding '{0}'")]
    SchemaMissing(String),
    #[error("binding file invalid: {0}")]
    FileInvalid(String),
}

impl BindingError {
    pub fn code(&self) -> &'static str {
        match self {
            BindingError::InvalidTarget(_) => "BINDING_INVALID_TARGET",
            BindingError::ModuleNotFound(_) => "BINDING_MODULE_NOT_FOUND",
            BindingError::CallableNotFound(_) => "BINDING_CALLABLE_NOT_FOUND",
            BindingError::NotCallable(_) => "BINDING_NOT_CALLABLE",
            BindingError::SchemaMissing(_) => "BINDING_SCHEMA_MISSING",
            BindingError::FileInvalid(_) => "BINDING_FILE_INVALID",
        }
    }
}

/// Checks the `target` path-safety rule: no parent-directory traversal, no `file:` URLs.
pub fn validate_target(target: &str) -> Result<(), BindingError> {
    if target.contains("..") || target.starts_with("file:") {
        return Err(BindingError::InvalidTarget(target.to_string()));
    }
    Ok(())
}

pub type CallableFuture = Pin<Box<dyn Future<Output = Result<Value, ModuleError>> + Send>>;
pub type CallableFn = Arc<dyn Fn(Value, Context) -> CallableFuture + Send + Sync>;

/// Resolves a binding's `target` string to an in-process callable. Host
/// code populates this at startup the way a dynamic loader resolves a
/// shared-object entry point, minus the FFI boundary.
#[derive(Default, Clone)]
pub struct CallableRegistry {
    callables: HashMap<String, CallableFn>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: impl Into<String>, callable: CallableFn) {
        self.callables.insert(target.into(), callable);
    }

    pub fn resolve(&self, target: &str) -> Option<CallableFn> {
        self.callables.get(target).cloned()
    }
}

/// A single entry in a Binding YAML file's `bindings:` list. Extended with
/// the same optional metadata fields the Module metadata YAML carries
/// a Module metadata YAML file carries, so a binding can double as the discovery pipeline's
/// metadata source without a second YAML dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingEntry {
    pub module_id: String,
    pub target: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub schema_ref: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub annotations: Option<Annotations>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub examples: Option<Vec<ModuleExample>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub dependencies: Vec<DependencyInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingFile {
    pub bindings: Vec<BindingEntry>,
}

#[cfg(feature = "yaml-config")]
pub fn parse_binding_file(text: &str) -> Result<BindingFile, BindingError> {
    serde_yaml::from_str(text).map_err(|e| BindingError::FileInvalid(e.to_string()))
}

fn permissive_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A `Module` wrapping a resolved binding's callable.
pub struct BindingModule {
    input_schema: Value,
    output_schema: Value,
    description: String,
    callable: CallableFn,
}

impl BindingModule {
    pub fn new(entry: &BindingEntry, callable: CallableFn) -> Result<Self, BindingError> {
        if entry.schema_ref.is_some() && (entry.input_schema.is_some() || entry.output_schema.is_some()) {
            log::warn!(
                "binding '{}' declares both schema_ref and inline schema; inline schema wins",
                entry.module_id
            );
        }
        let input_schema = entry.input_schema.clone().unwrap_or_else(permissive_schema);
        let output_schema = entry.output_schema.clone().unwrap_or_else(permissive_schema);
        Ok(Self {
            input_schema,
            output_schema,
            description: entry
                .description
                .clone()
                .unwrap_or_else(|| format!("binding for {}", entry.module_id)),
            callable,
        })
    }
}

#[async_trait]
impl Module for BindingModule {
    fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, inputs: Value, context: &Context) -> Result<Value, ModuleError> {
        (self.callable)(inputs, context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal_and_file_urls() {
        assert!(validate_target("pkg::handler").is_ok());
        assert!(validate_target("../escape:handler").is_err());
        assert!(validate_target("file:///etc/passwd").is_err());
    }
}

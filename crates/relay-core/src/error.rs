//! Root error taxonomy for the orchestration core.
//!
//! One root error enum with
//! `#[from]` conversions pulling in each subsystem's own error type, so a
//! caller can match on `RelayError::Acl(_)` without every subsystem needing
//! to know about the others.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::acl::AclError;
use crate::approval::ApprovalError;
use crate::binding::BindingError;
use crate::middleware::MiddlewareError;
use crate::registry::RegistryError;
use crate::schema::SchemaError;
use crate::task_manager::TaskError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("module load error: {0}")]
    ModuleLoadError(String),

    #[error("module execution error: {0}")]
    ModuleExecuteError(String),

    #[error("module '{module_id}' timed out after {timeout_ms}ms")]
    ModuleTimeout { module_id: String, timeout_ms: u64 },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("call depth {depth} exceeds max_call_depth {max}")]
    CallDepthExceeded { depth: usize, max: usize },

    #[error("circular call detected: {}", .call_chain.join(" -> "))]
    CircularCall { call_chain: Vec<String> },

    #[error("module '{module_id}' called more than {max} times in one trace")]
    CallFrequencyExceeded { module_id: String, max: usize },

    #[error("acl error: {0}")]
    Acl(#[from] AclError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("task manager error: {0}")]
    Task(#[from] TaskError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("execution cancelled for module '{0}'")]
    ExecutionCancelled(String),

    /// Internal-only wrapper used while a middleware chain error is still
    /// being offered to `onError` handlers. Never surfaced to a caller: it
    /// must be stripped after middleware recovery is attempted, and the
    /// *original* error re-thrown if nothing recovers.
    #[error("middleware chain error: {source}")]
    MiddlewareChain {
        #[source]
        source: Box<RelayError>,
        executed: Vec<String>,
    },
}

impl RelayError {
    /// Stable machine-readable code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            RelayError::ModuleLoadError(_) => "MODULE_LOAD_ERROR",
            RelayError::ModuleExecuteError(_) => "MODULE_EXECUTE_ERROR",
            RelayError::ModuleTimeout { .. } => "MODULE_TIMEOUT",
            RelayError::Schema(e) => e.code(),
            RelayError::CallDepthExceeded { .. } => "CALL_DEPTH_EXCEEDED",
            RelayError::CircularCall { .. } => "CIRCULAR_CALL",
            RelayError::CallFrequencyExceeded { .. } => "CALL_FREQUENCY_EXCEEDED",
            RelayError::Acl(e) => e.code(),
            RelayError::Approval(e) => e.code(),
            RelayError::CircularDependency(_) => "CIRCULAR_DEPENDENCY",
            RelayError::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            RelayError::ConfigInvalid(_) => "CONFIG_INVALID",
            RelayError::Binding(e) => e.code(),
            RelayError::Registry(e) => e.code(),
            RelayError::Task(e) => e.code(),
            RelayError::InvalidInput(_) => "GENERAL_INVALID_INPUT",
            RelayError::Internal(_) => "GENERAL_INTERNAL_ERROR",
            RelayError::ExecutionCancelled(_) => "GENERAL_EXECUTION_CANCELLED",
            RelayError::MiddlewareChain { .. } => "MIDDLEWARE_CHAIN_ERROR",
        }
    }

    /// Whether a caller might reasonably retry this call unmodified.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RelayError::ModuleTimeout { .. }
                | RelayError::Approval(ApprovalError::Timeout { .. })
                | RelayError::Internal(_)
        )
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            RelayError::CircularCall { call_chain } => {
                Some(serde_json::json!({ "callChain": call_chain }))
            }
            RelayError::CircularDependency(cycle) => Some(serde_json::json!({ "cycle": cycle })),
            RelayError::ModuleTimeout { timeout_ms, .. } => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            RelayError::Approval(ApprovalError::Pending { approval_id }) => {
                Some(serde_json::json!({ "approvalId": approval_id }))
            }
            RelayError::Schema(SchemaError::Validation { errors }) => {
                Some(serde_json::json!({ "errors": errors }))
            }
            _ => None,
        }
    }

    /// Unwraps a `MiddlewareChain` wrapper down to the error actually worth
    /// surfacing. Non-wrapper variants return themselves.
    pub fn into_surfaced(self) -> RelayError {
        match self {
            RelayError::MiddlewareChain { source, .. } => source.into_surfaced(),
            other => other,
        }
    }

    /// Serializes into the wire shape sent back to a caller, omitting
    /// absent fields.
    pub fn to_wire(&self, trace_id: Option<&str>) -> ErrorWire {
        ErrorWire {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
            cause: std::error::Error::source(self).map(|s| s.to_string()),
            trace_id: trace_id.map(|t| t.to_string()),
            timestamp: now_millis(),
            retryable: Some(self.retryable()),
            ai_guidance: None,
            user_fixable: None,
            suggestion: None,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorWire {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_guidance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_fixable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

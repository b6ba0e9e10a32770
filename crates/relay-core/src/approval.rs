//! Pluggable approval gate: phase-A request / phase-B resume-by-token.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::module::Annotations;

/// Reserved input key consumed by the executor and never forwarded to the
/// module; its presence routes the decision through `check_approval`.
pub const APPROVAL_TOKEN_KEY: &str = "_approval_token";

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval denied: {reason}")]
    Denied { reason: Option<String> },
    #[error("approval timed out")]
    Timeout,
    #[error("approval is pending (approval_id={approval_id})")]
    Pending { approval_id: String },
}

impl ApprovalError {
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::Denied { .. } => "APPROVAL_DENIED",
            ApprovalError::Timeout => "APPROVAL_TIMEOUT",
            ApprovalError::Pending { .. } => "APPROVAL_PENDING",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub module_id: String,
    pub inputs: Value,
    pub annotations: Annotations,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Approved,
    Rejected,
    Timeout,
    Pending,
}

#[derive(Debug, Clone)]
pub struct ApprovalResult {
    pub status: ApprovalStatus,
    pub approved_by: Option<String>,
    pub reason: Option<String>,
    pub approval_id: Option<String>,
    pub metadata: Option<Value>,
}

impl ApprovalResult {
    pub fn approved() -> Self {
        Self {
            status: ApprovalStatus::Approved,
            approved_by: None,
            reason: None,
            approval_id: None,
            metadata: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Rejected,
            approved_by: None,
            reason: Some(reason.into()),
            approval_id: None,
            metadata: None,
        }
    }

    pub fn pending(approval_id: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            approved_by: None,
            reason: None,
            approval_id: Some(approval_id.into()),
            metadata: None,
        }
    }

    /// Maps the decision into the executor's flow. `approved` proceeds
    /// (`Ok(())`); any other state is an error carrying enough detail for
    /// the caller to act on it. An unknown/unrecognized status would be
    /// treated as denied-with-a-warning by the caller — `ApprovalStatus` is
    /// a closed enum here, so that branch can't occur in practice.
    pub fn into_outcome(self) -> Result<(), ApprovalError> {
        match self.status {
            ApprovalStatus::Approved => Ok(()),
            ApprovalStatus::Rejected => Err(ApprovalError::Denied { reason: self.reason }),
            ApprovalStatus::Timeout => Err(ApprovalError::Timeout),
            ApprovalStatus::Pending => Err(ApprovalError::Pending {
                approval_id: self.approval_id.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest, ctx: &Context) -> ApprovalResult;
    async fn check_approval(&self, approval_id: &str, ctx: &Context) -> ApprovalResult;
}

/// The safe default: denies every request.
#[derive(Debug, Default)]
pub struct AlwaysDeny;

#[async_trait]
impl ApprovalHandler for AlwaysDeny {
    async fn request_approval(&self, _request: ApprovalRequest, _ctx: &Context) -> ApprovalResult {
        ApprovalResult::rejected("AlwaysDeny handler")
    }

    async fn check_approval(&self, _approval_id: &str, _ctx: &Context) -> ApprovalResult {
        ApprovalResult::rejected("AlwaysDeny handler")
    }
}

/// Test handler: approves everything immediately.
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, _request: ApprovalRequest, _ctx: &Context) -> ApprovalResult {
        ApprovalResult::approved()
    }

    async fn check_approval(&self, _approval_id: &str, _ctx: &Context) -> ApprovalResult {
        ApprovalResult::approved()
    }
}

type PhaseAFuture =
    Pin<Box<dyn Future<Output = ApprovalResult> + Send>>;

/// Delegates phase A to a user function; phase B returns `rejected` with
/// "not supported" unless the caller also provides a resume function.
pub struct Callback {
    request: Arc<dyn Fn(ApprovalRequest) -> PhaseAFuture + Send + Sync>,
    resume: Option<Arc<dyn Fn(String) -> PhaseAFuture + Send + Sync>>,
}

impl Callback {
    pub fn new<F>(request: F) -> Self
    where
        F: Fn(ApprovalRequest) -> PhaseAFuture + Send + Sync + 'static,
    {
        Self { request: Arc::new(request), resume: None }
    }

    pub fn with_resume<F>(mut self, resume: F) -> Self
    where
        F: Fn(String) -> PhaseAFuture + Send + Sync + 'static,
    {
        self.resume = Some(Arc::new(resume));
        self
    }
}

#[async_trait]
impl ApprovalHandler for Callback {
    async fn request_approval(&self, request: ApprovalRequest, _ctx: &Context) -> ApprovalResult {
        (self.request)(request).await
    }

    async fn check_approval(&self, approval_id: &str, _ctx: &Context) -> ApprovalResult {
        match &self.resume {
            Some(resume) => resume(approval_id.to_string()).await,
            None => ApprovalResult::rejected("not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_deny_rejects_both_phases() {
        let ctx = Context::root(None, None);
        let handler = AlwaysDeny;
        let req = ApprovalRequest {
            module_id: "admin.delete_user".to_string(),
            inputs: serde_json::json!({}),
            annotations: Annotations::default(),
            description: String::new(),
            tags: vec![],
            trace_id: ctx.trace_id().to_string(),
        };
        let result = handler.request_approval(req, &ctx).await;
        assert!(matches!(result.into_outcome(), Err(ApprovalError::Denied { .. })));
    }

    #[tokio::test]
    async fn phase_b_pending_then_approved() {
        let ctx = Context::root(None, None);
        let handler = Callback::new(|_req| Box::pin(async { ApprovalResult::pending("tok-1") }))
            .with_resume(|id| {
                Box::pin(async move {
                    if id == "tok-1" {
                        ApprovalResult::approved()
                    } else {
                        ApprovalResult::rejected("unknown token")
                    }
                })
            });

        let req = ApprovalRequest {
            module_id: "m".to_string(),
            inputs: serde_json::json!({}),
            annotations: Annotations::default(),
            description: String::new(),
            tags: vec![],
            trace_id: ctx.trace_id().to_string(),
        };
        let first = handler.request_approval(req, &ctx).await;
        assert_eq!(first.approval_id.as_deref(), Some("tok-1"));

        let second = handler.check_approval("tok-1", &ctx).await;
        assert!(second.into_outcome().is_ok());
    }
}

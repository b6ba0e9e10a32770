//! The central `call(moduleId, inputs, context)` entry point and its
//! ten-step pipeline: context derivation, safety checks, registry lookup,
//! ACL check, approval gate, schema validation + redaction,
//! before-middleware, timeout-enforced execution, output validation, and
//! after-middleware.

pub mod config;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

pub use config::ExecutorConfig;

use crate::acl::{AclProvider, SharedAcl};
use crate::approval::{ApprovalHandler, ApprovalRequest, APPROVAL_TOKEN_KEY};
use crate::context::Context;
use crate::error::RelayError;
use crate::extension::{CallEvent, ExporterHandle, ExtensionManager};
use crate::middleware::MiddlewareManager;
use crate::module::{BoxStream, Module, ModuleDescriptor};
use crate::redact::redact_sensitive;
use crate::registry::Registry;
use crate::schema::{SchemaAdapter, SchemaError};

pub struct Executor {
    registry: Arc<Registry>,
    acl: SharedAcl,
    middleware: Arc<MiddlewareManager>,
    approval: Arc<dyn ApprovalHandler>,
    schema: Arc<dyn SchemaAdapter>,
    config: ExecutorConfig,
    extensions: Option<Arc<ExtensionManager>>,
}

impl Executor {
    pub fn new(
        registry: Arc<Registry>,
        acl: SharedAcl,
        middleware: Arc<MiddlewareManager>,
        approval: Arc<dyn ApprovalHandler>,
        schema: Arc<dyn SchemaAdapter>,
        config: ExecutorConfig,
    ) -> Self {
        Self { registry, acl, middleware, approval, schema, config, extensions: None }
    }

    /// Registers the extension manager an exporter can be resolved from.
    /// Calls made before this is set simply skip exporting.
    pub fn with_extensions(mut self, extensions: Arc<ExtensionManager>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    async fn export_event(&self, module_id: &str, ctx: &Context, success: bool, error_code: Option<String>, started: Instant) {
        let Some(extensions) = &self.extensions else { return };
        let Ok(exporter) = extensions.get::<ExporterHandle>() else { return };
        exporter
            .0
            .export(CallEvent {
                module_id: module_id.to_string(),
                trace_id: ctx.trace_id().to_string(),
                success,
                error_code,
                duration_ms: started.elapsed().as_millis() as u64,
            })
            .await;
    }

    /// Step 1-2: derives the child context for this call and runs the
    /// depth/cycle/frequency safety checks against the resulting chain.
    fn derive_and_check(&self, module_id: &str, parent: Option<&Context>) -> Result<Context, RelayError> {
        let base = match parent {
            Some(ctx) => ctx.clone(),
            None => Context::root(None, None),
        };
        let parent_chain = base.call_chain().to_vec();
        let child = base.child(module_id);

        if child.call_chain().len() > self.config.max_call_depth {
            return Err(RelayError::CallDepthExceeded {
                depth: child.call_chain().len(),
                max: self.config.max_call_depth,
            });
        }

        // A module calling itself immediately (A -> A) is allowed repetition,
        // governed only by max_module_repeat below. Only a non-adjacent
        // reappearance of module_id in the parent chain (A -> B -> A) is a
        // genuine cycle: that's the case where the last prior occurrence of
        // module_id isn't the chain's tail.
        if let Some(idx) = parent_chain.iter().rposition(|id| id.as_str() == module_id) {
            if idx != parent_chain.len() - 1 {
                return Err(RelayError::CircularCall { call_chain: child.call_chain().to_vec() });
            }
        }

        let occurrences = child.call_chain().iter().filter(|id| id.as_str() == module_id).count();
        if self.config.max_module_repeat != 0 && occurrences > self.config.max_module_repeat {
            return Err(RelayError::CallFrequencyExceeded {
                module_id: module_id.to_string(),
                max: self.config.max_module_repeat,
            });
        }

        Ok(child)
    }

    async fn lookup(&self, module_id: &str) -> Result<(Arc<dyn Module>, ModuleDescriptor), RelayError> {
        let module = self.registry.get(module_id).await.ok_or_else(|| RelayError::ModuleNotFound(module_id.to_string()))?;
        let descriptor = self
            .registry
            .get_definition(module_id)
            .await
            .unwrap_or_else(|| ModuleDescriptor::new(module_id, module.as_ref()));
        Ok((module, descriptor))
    }

    fn check_acl(&self, module_id: &str, ctx: &Context) -> Result<(), RelayError> {
        if self.acl.check(ctx.caller_id(), module_id, Some(ctx)) {
            Ok(())
        } else {
            Err(RelayError::Acl(crate::acl::AclError::Denied {
                caller: ctx.caller_id().unwrap_or(crate::acl::EXTERNAL_SENTINEL).to_string(),
                target: module_id.to_string(),
            }))
        }
    }

    /// Step 5. Strips the reserved approval-token key out of `inputs` (it
    /// must never reach the module) and returns the cleaned inputs alongside
    /// the approval outcome.
    async fn gate_approval(
        &self,
        module_id: &str,
        mut inputs: Value,
        descriptor: &ModuleDescriptor,
        ctx: &Context,
    ) -> Result<Value, RelayError> {
        let token = inputs.as_object_mut().and_then(|obj| obj.remove(APPROVAL_TOKEN_KEY));

        if !descriptor.annotations.requires_approval {
            return Ok(inputs);
        }

        let outcome = if let Some(Value::String(token)) = token {
            self.approval.check_approval(&token, ctx).await
        } else {
            let request = ApprovalRequest {
                module_id: module_id.to_string(),
                inputs: inputs.clone(),
                annotations: descriptor.annotations.clone(),
                description: descriptor.description.clone(),
                tags: descriptor.tags.clone(),
                trace_id: ctx.trace_id().to_string(),
            };
            self.approval.request_approval(request, ctx).await
        };

        outcome.into_outcome().map_err(RelayError::Approval)?;
        Ok(inputs)
    }

    /// Step 6.
    fn validate_and_redact(&self, inputs: &Value, descriptor: &ModuleDescriptor) -> Result<Value, RelayError> {
        let errors = self.schema.validate(&descriptor.input_schema, inputs);
        if !errors.is_empty() {
            return Err(RelayError::Schema(SchemaError::Validation { errors }));
        }
        Ok(redact_sensitive(inputs, &descriptor.input_schema))
    }

    async fn fail_or_recover(
        &self,
        module_id: &str,
        inputs: &Value,
        ctx: &Context,
        executed: &[usize],
        err: RelayError,
    ) -> Result<Value, RelayError> {
        if let Some(recovered) = self.middleware.execute_on_error(module_id, inputs, &err, ctx, executed).await {
            return Ok(recovered);
        }
        Err(err.into_surfaced())
    }

    /// The full pipeline. `parent` is `None` for a top-level call and
    /// `Some(ctx)` when a module is calling another module.
    pub async fn call(&self, module_id: &str, inputs: Value, parent: Option<&Context>) -> Result<Value, RelayError> {
        let started = Instant::now();
        let result = self.call_inner(module_id, inputs, parent).await;
        let ctx_for_export = self.derive_and_check(module_id, parent).ok();
        if let Some(ctx) = &ctx_for_export {
            let (success, error_code) = match &result {
                Ok(_) => (true, None),
                Err(err) => (false, Some(err.code().to_string())),
            };
            self.export_event(module_id, ctx, success, error_code, started).await;
        }
        result
    }

    async fn call_inner(&self, module_id: &str, inputs: Value, parent: Option<&Context>) -> Result<Value, RelayError> {
        let ctx = self.derive_and_check(module_id, parent)?;
        let (module, descriptor) = self.lookup(module_id).await?;
        self.check_acl(module_id, &ctx)?;
        let cleaned_inputs = self.gate_approval(module_id, inputs, &descriptor, &ctx).await?;
        // Redacted inputs are recorded on the context for logging/telemetry;
        // the module itself still receives the real values.
        let mut ctx = ctx;
        let redacted = self.validate_and_redact(&cleaned_inputs, &descriptor)?;
        ctx.set_redacted_inputs(redacted);

        let (before_inputs, executed) = match self.middleware.execute_before(module_id, cleaned_inputs.clone(), &ctx).await {
            Ok(pair) => pair,
            Err(RelayError::MiddlewareChain { source, executed }) => {
                return self.fail_or_recover(module_id, &cleaned_inputs, &ctx, &executed, *source).await;
            }
            Err(other) => return Err(other),
        };

        if ctx.cancel_token().is_cancelled() {
            return Err(RelayError::ExecutionCancelled(module_id.to_string()));
        }

        let exec_result = if self.config.default_timeout_ms == 0 {
            log::warn!("module '{module_id}' called with default_timeout_ms=0, timer disabled");
            module.execute(before_inputs.clone(), &ctx).await.map_err(|e| RelayError::ModuleExecuteError(e.to_string()))
        } else {
            let timeout = Duration::from_millis(self.config.default_timeout_ms);
            tokio::select! {
                res = module.execute(before_inputs.clone(), &ctx) => {
                    res.map_err(|e| RelayError::ModuleExecuteError(e.to_string()))
                }
                _ = tokio::time::sleep(timeout) => {
                    Err(RelayError::ModuleTimeout { module_id: module_id.to_string(), timeout_ms: self.config.default_timeout_ms })
                }
            }
        };

        let output = match exec_result {
            Ok(output) => output,
            Err(err) => return self.fail_or_recover(module_id, &before_inputs, &ctx, &executed, err).await,
        };

        let output_errors = self.schema.validate(&descriptor.output_schema, &output);
        if !output_errors.is_empty() {
            let err = RelayError::Schema(SchemaError::Validation { errors: output_errors });
            return self.fail_or_recover(module_id, &before_inputs, &ctx, &executed, err).await;
        }

        match self.middleware.execute_after(module_id, &before_inputs, output, &ctx, &executed).await {
            Ok(final_output) => Ok(final_output),
            Err(err) => self.fail_or_recover(module_id, &before_inputs, &ctx, &executed, err).await,
        }
    }

    /// Validate-only path: runs registry lookup and input schema validation
    /// without executing the module, ACL, or approval gate — a pre-flight
    /// check a caller can run before committing to a real call.
    pub async fn validate(&self, module_id: &str, inputs: &Value) -> Result<(), RelayError> {
        let (_module, descriptor) = self.lookup(module_id).await?;
        let errors = self.schema.validate(&descriptor.input_schema, inputs);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Schema(SchemaError::Validation { errors }))
        }
    }

    /// Streaming variant: runs the same context/safety/registry/ACL/
    /// approval/schema/before-middleware steps, then drains the module's
    /// stream. Each item is checked against the output schema and logged
    /// (not failed) on mismatch, since a single bad chunk shouldn't abort an
    /// otherwise-healthy stream; `after` middleware does not run per chunk.
    pub async fn stream(&self, module_id: &str, inputs: Value, parent: Option<&Context>) -> Result<BoxStream, RelayError> {
        let ctx = self.derive_and_check(module_id, parent)?;
        let (module, descriptor) = self.lookup(module_id).await?;
        self.check_acl(module_id, &ctx)?;
        if !module.supports_streaming() {
            return Err(RelayError::ModuleExecuteError(format!("module '{module_id}' does not support streaming")));
        }
        let cleaned_inputs = self.gate_approval(module_id, inputs, &descriptor, &ctx).await?;
        let mut ctx = ctx;
        let redacted = self.validate_and_redact(&cleaned_inputs, &descriptor)?;
        ctx.set_redacted_inputs(redacted);

        let (before_inputs, _executed) = match self.middleware.execute_before(module_id, cleaned_inputs, &ctx).await {
            Ok(pair) => pair,
            Err(RelayError::MiddlewareChain { source, .. }) => return Err(source.into_surfaced()),
            Err(other) => return Err(other),
        };

        module
            .stream(before_inputs, &ctx)
            .await
            .map_err(|e| RelayError::ModuleExecuteError(e.to_string()))
    }
}

//! Onion-model middleware manager: ordered before/after/onError execution
//! with partial-failure recovery.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::error::RelayError;

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("middleware '{middleware}' failed: {source}")]
    Failed {
        middleware: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A middleware defines any subset of `before`/`after`/`on_error`; default
/// implementations no-op the hooks it doesn't need.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &Value,
        _ctx: &Context,
    ) -> Result<Option<Value>, MiddlewareError> {
        Ok(None)
    }

    async fn after(
        &self,
        _module_id: &str,
        _inputs: &Value,
        _output: &Value,
        _ctx: &Context,
    ) -> Result<Option<Value>, MiddlewareError> {
        Ok(None)
    }

    /// Returns the first non-null recovery value; errors raised here are
    /// swallowed by the caller (the manager tries the next handler).
    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &Value,
        _error: &RelayError,
        _ctx: &Context,
    ) -> Option<Value> {
        None
    }
}

/// Wraps a plain `before` callback into a full middleware that no-ops the
/// other hooks.
pub struct BeforeMiddleware<F> {
    name: String,
    callback: F,
}

impl<F> BeforeMiddleware<F>
where
    F: Fn(&str, &Value, &Context) -> Option<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self { name: name.into(), callback }
    }
}

#[async_trait]
impl<F> Middleware for BeforeMiddleware<F>
where
    F: Fn(&str, &Value, &Context) -> Option<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn before(
        &self,
        module_id: &str,
        inputs: &Value,
        ctx: &Context,
    ) -> Result<Option<Value>, MiddlewareError> {
        Ok((self.callback)(module_id, inputs, ctx))
    }
}

/// Wraps a plain `after` callback into a full middleware that no-ops the
/// other hooks.
pub struct AfterMiddleware<F> {
    name: String,
    callback: F,
}

impl<F> AfterMiddleware<F>
where
    F: Fn(&str, &Value, &Value, &Context) -> Option<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self { name: name.into(), callback }
    }
}

#[async_trait]
impl<F> Middleware for AfterMiddleware<F>
where
    F: Fn(&str, &Value, &Value, &Context) -> Option<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn after(
        &self,
        module_id: &str,
        inputs: &Value,
        output: &Value,
        ctx: &Context,
    ) -> Result<Option<Value>, MiddlewareError> {
        Ok((self.callback)(module_id, inputs, output, ctx))
    }
}

/// An ordered list of middlewares, executed in registration order for
/// `before` and reverse order for `after`/`on_error`.
pub struct MiddlewareManager {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareManager {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    /// Runs `before` forward, recording each middleware *before* invoking it
    /// so a failure halfway through still yields the partial executed list.
    pub async fn execute_before(
        &self,
        module_id: &str,
        inputs: Value,
        ctx: &Context,
    ) -> Result<(Value, Vec<usize>), RelayError> {
        let mut current = inputs;
        let mut executed = Vec::with_capacity(self.middlewares.len());
        for (idx, mw) in self.middlewares.iter().enumerate() {
            executed.push(idx);
            match mw.before(module_id, &current, ctx).await {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(e) => {
                    return Err(RelayError::MiddlewareChain {
                        source: Box::new(RelayError::Internal(format!(
                            "before middleware '{}' failed: {}",
                            mw.name(),
                            e
                        ))),
                        executed: executed.iter().map(|i| self.middlewares[*i].name().to_string()).collect(),
                    });
                }
            }
        }
        Ok((current, executed))
    }

    /// Runs `after` in reverse registration order over the subset that
    /// actually executed during `before`.
    pub async fn execute_after(
        &self,
        module_id: &str,
        inputs: &Value,
        output: Value,
        ctx: &Context,
        executed: &[usize],
    ) -> Result<Value, RelayError> {
        let mut current = output;
        for &idx in executed.iter().rev() {
            let mw = &self.middlewares[idx];
            match mw.after(module_id, inputs, &current, ctx).await {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(e) => {
                    return Err(RelayError::Internal(format!(
                        "after middleware '{}' failed: {}",
                        mw.name(),
                        e
                    )))
                }
            }
        }
        Ok(current)
    }

    /// Iterates `executed` in reverse, returning the first non-null
    /// recovery value. Exceptions from individual handlers are swallowed so
    /// the next handler still gets a chance.
    pub async fn execute_on_error(
        &self,
        module_id: &str,
        inputs: &Value,
        error: &RelayError,
        ctx: &Context,
        executed: &[usize],
    ) -> Option<Value> {
        for &idx in executed.iter().rev() {
            let mw = &self.middlewares[idx];
            if let Some(recovered) = mw.on_error(module_id, inputs, error, ctx).await {
                return Some(recovered);
            }
        }
        None
    }
}

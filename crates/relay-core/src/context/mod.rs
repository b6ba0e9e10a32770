//! Identity, Context, and cancellation — the per-trace/per-call state that
//! flows through every pipeline step.

pub mod trace;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use trace::TraceParent;

/// Immutable caller identity, built by `Identity::new` and never mutated
/// after construction (a "deep-frozen" factory).
#[derive(Debug, Clone)]
pub struct Identity {
    id: String,
    kind: String,
    roles: HashSet<String>,
    attrs: HashMap<String, Value>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "user".to_string(),
            roles: HashSet::new(),
            attrs: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn system() -> Self {
        Self::new("@system").with_kind("system")
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    pub fn attrs(&self) -> &HashMap<String, Value> {
        &self.attrs
    }
}

/// Cooperative cancellation flag shared by every context in a trace.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared per-trace data map. Keys prefixed with `_` are framework-internal
/// (tracing span stacks, sampling decisions, etc.) and are stripped by
/// [`Context::to_json`].
pub type SharedData = Arc<Mutex<HashMap<String, Value>>>;

/// Per-invocation record carrying trace identity, call chain, identity, and
/// shared data.
#[derive(Clone)]
pub struct Context {
    trace_id: String,
    caller_id: Option<String>,
    call_chain: Vec<String>,
    identity: Option<Arc<Identity>>,
    redacted_inputs: Option<Value>,
    data: SharedData,
    cancel_token: CancelToken,
}

impl Context {
    /// Creates a root context for a new top-level call. If `trace_parent` is
    /// supplied, its 32-hex trace id is converted to UUID-dashed form so
    /// logs agree with the external system; otherwise a fresh trace id is
    /// generated.
    pub fn root(identity: Option<Identity>, trace_parent: Option<&TraceParent>) -> Self {
        let trace_id = match trace_parent {
            Some(tp) => trace::hex32_to_uuid(&tp.trace_id),
            None => Uuid::new_v4().to_string(),
        };
        Self {
            trace_id,
            caller_id: None,
            call_chain: Vec::new(),
            identity: identity.map(Arc::new),
            redacted_inputs: None,
            data: Arc::new(Mutex::new(HashMap::new())),
            cancel_token: CancelToken::new(),
        }
    }

    /// Produces a child context for a nested call to `module_id`: appends
    /// `module_id` to the call chain, sets `caller_id` to the previous tail,
    /// and shares `data`/`cancel_token` by reference (not by copy) with the
    /// parent — this is the mechanism that propagates cancellation down a
    /// nested call chain without extra plumbing.
    pub fn child(&self, module_id: &str) -> Self {
        let caller_id = self.call_chain.last().cloned();
        let mut call_chain = self.call_chain.clone();
        call_chain.push(module_id.to_string());
        Self {
            trace_id: self.trace_id.clone(),
            caller_id,
            call_chain,
            identity: self.identity.clone(),
            redacted_inputs: None,
            data: Arc::clone(&self.data),
            cancel_token: self.cancel_token.clone(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    pub fn call_chain(&self) -> &[String] {
        &self.call_chain
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(Arc::new(identity));
    }

    pub fn redacted_inputs(&self) -> Option<&Value> {
        self.redacted_inputs.as_ref()
    }

    pub fn set_redacted_inputs(&mut self, value: Value) {
        self.redacted_inputs = Some(value);
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel_token
    }

    /// Serializes a plain snapshot of this context, stripping
    /// underscore-prefixed keys out of `data` before logging or export.
    pub async fn to_json(&self) -> Value {
        let data = self.data.lock().await;
        let public_data: serde_json::Map<String, Value> = data
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::json!({
            "traceId": self.trace_id,
            "callerId": self.caller_id,
            "callChain": self.call_chain,
            "data": Value::Object(public_data),
        })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("trace_id", &self.trace_id)
            .field("caller_id", &self.caller_id)
            .field("call_chain", &self.call_chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_shares_data_and_extends_chain() {
        let root = Context::root(Some(Identity::new("u1")), None);
        let a = root.child("a");
        let b = a.child("b");

        assert_eq!(b.trace_id(), root.trace_id());
        assert_eq!(b.call_chain(), &["a".to_string(), "b".to_string()]);
        assert_eq!(b.caller_id(), Some("a"));
        assert!(Arc::ptr_eq(a.data(), b.data()));
    }

    #[test]
    fn root_without_trace_parent_generates_uuid() {
        let ctx = Context::root(None, None);
        assert!(Uuid::parse_str(ctx.trace_id()).is_ok());
    }
}

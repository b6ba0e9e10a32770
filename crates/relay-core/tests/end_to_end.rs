//! Integration coverage across discovery, the registry, and the executor
//! together — the six end-to-end scenarios the design notes enumerate.

use std::io::Write as _;
use std::sync::Arc;

use relay_core::acl::{Acl, AclRule, Effect};
use relay_core::approval::{ApprovalHandler, ApprovalRequest, ApprovalResult, AutoApprove, Callback};
use relay_core::binding::{CallableFuture, CallableRegistry};
use relay_core::executor::{Executor, ExecutorConfig};
use relay_core::middleware::MiddlewareManager;
use relay_core::registry::discovery::{discover, ScanRoot};
use relay_core::registry::Registry;
use relay_core::schema::BasicSchemaAdapter;
use relay_core::Context;

fn echo_callable() -> relay_core::binding::CallableFn {
    Arc::new(|inputs, _ctx: Context| -> CallableFuture { Box::pin(async move { Ok(inputs) }) })
}

fn allow_all() -> Arc<Acl> {
    Arc::new(Acl::new(
        vec![AclRule {
            callers: vec!["*".to_string()],
            targets: vec!["*".to_string()],
            effect: Effect::Allow,
            description: String::new(),
            conditions: None,
        }],
        Effect::Deny,
    ))
}

fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
    let path = dir.join(name);
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

#[tokio::test]
async fn happy_path_discovers_and_calls() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "greet.module.yaml", "bindings:\n  - module_id: greet\n    target: test::echo\n");

    let mut callables = CallableRegistry::new();
    callables.register("test::echo", echo_callable());

    let registry = Arc::new(Registry::new());
    discover(&registry, &callables, &[ScanRoot::new(dir.path())], None, None).await.unwrap();

    let executor = Executor::new(
        registry,
        allow_all(),
        Arc::new(MiddlewareManager::new(vec![])),
        Arc::new(AutoApprove),
        Arc::new(BasicSchemaAdapter),
        ExecutorConfig::default(),
    );

    let out = executor.call("greet", serde_json::json!({"name": "world"}), None).await.unwrap();
    assert_eq!(out, serde_json::json!({"name": "world"}));
}

#[tokio::test]
async fn dependency_ordering_discovers_a_c_b() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.module.yaml", "bindings:\n  - module_id: mod.a\n    target: test::echo\n");
    write_file(
        dir.path(),
        "b.module.yaml",
        "bindings:\n  - module_id: mod.b\n    target: test::echo\n    dependencies:\n      - module_id: mod.c\n",
    );
    write_file(
        dir.path(),
        "c.module.yaml",
        "bindings:\n  - module_id: mod.c\n    target: test::echo\n    dependencies:\n      - module_id: mod.a\n",
    );

    let mut callables = CallableRegistry::new();
    callables.register("test::echo", echo_callable());

    let registry = Registry::new();
    let report = discover(&registry, &callables, &[ScanRoot::new(dir.path())], None, None).await.unwrap();
    assert_eq!(report.registered, vec!["mod.a", "mod.c", "mod.b"]);
}

#[tokio::test]
async fn phase_b_approval_resumes_without_forwarding_token() {
    struct SawToken;
    #[async_trait::async_trait]
    impl relay_core::Module for SawToken {
        fn input_schema(&self) -> &serde_json::Value {
            static S: std::sync::OnceLock<serde_json::Value> = std::sync::OnceLock::new();
            S.get_or_init(|| serde_json::json!({"type":"object"}))
        }
        fn output_schema(&self) -> &serde_json::Value {
            self.input_schema()
        }
        fn description(&self) -> &str {
            "checks for the approval token"
        }
        async fn execute(
            &self,
            inputs: serde_json::Value,
            _ctx: &Context,
        ) -> Result<serde_json::Value, relay_core::ModuleError> {
            Ok(serde_json::json!({ "saw_token": inputs.get("_approval_token").is_some() }))
        }
    }

    let registry = Arc::new(Registry::new());
    let mut descriptor = relay_core::ModuleDescriptor::new("danger", &SawToken);
    descriptor.annotations.requires_approval = true;
    registry.register("danger", Arc::new(SawToken), Some(descriptor)).await.unwrap();

    let handler = Callback::new(|_req: ApprovalRequest| Box::pin(async { ApprovalResult::pending("tok-1") }))
        .with_resume(|id| {
            Box::pin(async move {
                if id == "tok-1" {
                    ApprovalResult::approved()
                } else {
                    ApprovalResult::rejected("unknown token")
                }
            })
        });

    let executor = Executor::new(
        registry,
        allow_all(),
        Arc::new(MiddlewareManager::new(vec![])),
        Arc::new(handler) as Arc<dyn ApprovalHandler>,
        Arc::new(BasicSchemaAdapter),
        ExecutorConfig::default(),
    );

    // Phase A: no token yet, request pending.
    let pending_err = executor.call("danger", serde_json::json!({}), None).await.unwrap_err();
    assert!(matches!(pending_err, relay_core::RelayError::Approval(_)));

    // Phase B: resume with the token; the module must not see it.
    let out = executor
        .call("danger", serde_json::json!({"_approval_token": "tok-1"}), None)
        .await
        .unwrap();
    assert_eq!(out, serde_json::json!({"saw_token": false}));
}

//! Thin CLI wrapper around `relay_core`: discover Binding YAML files under a
//! directory and issue calls against the resulting in-process registry.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use relay_core::acl::{Acl, Effect};
use relay_core::approval::AutoApprove;
use relay_core::binding::{CallableFuture, CallableRegistry};
use relay_core::executor::{Executor, ExecutorConfig};
use relay_core::middleware::MiddlewareManager;
use relay_core::registry::discovery::{discover, ScanRoot};
use relay_core::registry::Registry;
use relay_core::schema::BasicSchemaAdapter;
use relay_core::{CallEvent, Context, Exporter, ExporterHandle, ExtensionManager, RelayError};

/// Logs each completed call at info level; registered as the CLI's exporter.
struct LoggingExporter;

#[async_trait]
impl Exporter for LoggingExporter {
    async fn export(&self, event: CallEvent) {
        log::info!(
            "call module='{}' trace='{}' success={} duration_ms={}{}",
            event.module_id,
            event.trace_id,
            event.success,
            event.duration_ms,
            event.error_code.map(|c| format!(" code={c}")).unwrap_or_default(),
        );
    }
}

#[derive(Parser)]
#[command(name = "relay", about = "Module-call orchestration core CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover bindings under a directory and print the registration report.
    Discover {
        #[arg(long)]
        bindings: PathBuf,
        #[arg(long)]
        id_map: Option<PathBuf>,
    },
    /// Discover bindings under a directory and list the resulting module ids.
    List {
        #[arg(long)]
        bindings: PathBuf,
    },
    /// Discover bindings under a directory, then issue one call.
    Call {
        #[arg(long)]
        bindings: PathBuf,
        module_id: String,
        #[arg(long, default_value = "{}")]
        inputs: String,
    },
}

/// Demo callables resolvable out of the box; a real deployment registers its
/// own handlers into a `CallableRegistry` before discovery runs.
fn builtin_callables() -> CallableRegistry {
    let mut callables = CallableRegistry::new();
    let echo: relay_core::binding::CallableFn = Arc::new(|inputs, _ctx: Context| -> CallableFuture {
        Box::pin(async move { Ok(inputs) })
    });
    callables.register("builtin::echo", echo);
    callables
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error [{}]: {}", err.code(), err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RelayError> {
    match cli.command {
        Command::Discover { bindings, id_map } => {
            let registry = Registry::new();
            let callables = builtin_callables();
            let roots = vec![ScanRoot::new(bindings)];
            let report = discover(&registry, &callables, &roots, id_map.as_deref(), None).await?;
            println!("registered: {:?}", report.registered);
            if !report.skipped.is_empty() {
                println!("skipped: {:?}", report.skipped);
            }
        }
        Command::List { bindings } => {
            let registry = Registry::new();
            let callables = builtin_callables();
            let roots = vec![ScanRoot::new(bindings)];
            discover(&registry, &callables, &roots, None, None).await?;
            for id in registry.list(None).await {
                println!("{id}");
            }
        }
        Command::Call { bindings, module_id, inputs } => {
            let registry = Arc::new(Registry::new());
            let callables = builtin_callables();
            let roots = vec![ScanRoot::new(bindings)];
            discover(&registry, &callables, &roots, None, None).await?;

            let inputs: serde_json::Value =
                serde_json::from_str(&inputs).map_err(|e| RelayError::InvalidInput(e.to_string()))?;

            let mut extensions = ExtensionManager::new();
            extensions.register(Arc::new(ExporterHandle(Arc::new(LoggingExporter))));

            let executor = Executor::new(
                registry,
                Arc::new(Acl::new(vec![], Effect::Allow)),
                Arc::new(MiddlewareManager::new(vec![])),
                Arc::new(AutoApprove),
                Arc::new(BasicSchemaAdapter),
                ExecutorConfig::default(),
            )
            .with_extensions(Arc::new(extensions));
            let output = executor.call(&module_id, inputs, None).await?;
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
        }
    }
    Ok(())
}

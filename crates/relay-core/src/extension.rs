//! Extension manager: a typed registry of pluggable implementations for the
//! core's six extension points — discoverer, middleware, acl, exporter,
//! validator, approval — modeled on a `TypeId`-keyed component registry
//! generalized to arbitrary extension-point traits.
//!
//! Middleware (`crate::middleware::Middleware`), acl
//! (`crate::acl::AclProvider`), validator (`crate::schema::SchemaAdapter`),
//! and approval (`crate::approval::ApprovalHandler`) are consumed directly
//! through `Executor`'s constructor fields; discoverer and exporter have no
//! dedicated constructor slot, so they live here and are resolved through
//! this registry by `registry::discovery::discover` and `Executor::call`
//! respectively.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::discovery::{scan_root, ScanRoot, ScannedFile};
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("no extension registered for this point")]
    NotFound,
    #[error("extension registered under this point has a different concrete type")]
    TypeMismatch,
}

/// Holds at most one implementation per concrete type, keyed by `TypeId`, so
/// a host can register e.g. one `Arc<dyn SchemaAdapter>` implementation and
/// have every component that asks for it receive the same shared instance.
#[derive(Default)]
pub struct ExtensionManager {
    points: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under its own concrete type. Replaces any prior
    /// registration for that type.
    pub fn register<T>(&mut self, value: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.points.insert(TypeId::of::<T>(), value);
    }

    /// Fetches the extension registered for concrete type `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, ExtensionError>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.points.get(&TypeId::of::<T>()).ok_or(ExtensionError::NotFound)?;
        entry.clone().downcast::<T>().map_err(|_| ExtensionError::TypeMismatch)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.points.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// The discovery extension point: swaps out the default filesystem walk for
/// an alternate source of binding files (a package index, a remote
/// manifest service).
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn scan(&self, roots: &[ScanRoot]) -> Result<Vec<ScannedFile>, RegistryError>;
}

/// Wraps a `Discoverer` so it can be registered into an `ExtensionManager`
/// (trait objects can't be `downcast`, so the manager stores this concrete,
/// `Sized` newtype instead).
#[derive(Clone)]
pub struct DiscovererHandle(pub Arc<dyn Discoverer>);

/// The default `Discoverer`: walks each `ScanRoot`'s directory tree on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsDiscoverer;

#[async_trait]
impl Discoverer for FsDiscoverer {
    async fn scan(&self, roots: &[ScanRoot]) -> Result<Vec<ScannedFile>, RegistryError> {
        let mut out = Vec::new();
        for root in roots {
            out.extend(scan_root(root).await?);
        }
        Ok(out)
    }
}

/// One completed (or failed) call, reported to the exporter extension point.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub module_id: String,
    pub trace_id: String,
    pub success: bool,
    pub error_code: Option<String>,
    pub duration_ms: u64,
}

/// The telemetry-export extension point: a host observes completed calls
/// without the executor needing to know what sink it goes to (a log line,
/// a metrics counter, a span exporter).
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, event: CallEvent);
}

/// Wraps an `Exporter` for registration into an `ExtensionManager`, for the
/// same reason `DiscovererHandle` wraps a `Discoverer`.
#[derive(Clone)]
pub struct ExporterHandle(pub Arc<dyn Exporter>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BasicSchemaAdapter, SchemaAdapter};

    #[test]
    fn register_and_fetch_round_trip() {
        let mut manager = ExtensionManager::new();
        manager.register(Arc::new(BasicSchemaAdapter));
        let adapter = manager.get::<BasicSchemaAdapter>().unwrap();
        let errors = adapter.validate(&serde_json::json!({}), &serde_json::json!({}));
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_point_errors() {
        let manager = ExtensionManager::new();
        assert!(matches!(manager.get::<BasicSchemaAdapter>(), Err(ExtensionError::NotFound)));
    }

    struct CountingExporter(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Exporter for CountingExporter {
        async fn export(&self, _event: CallEvent) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn exporter_handle_round_trips_through_the_manager() {
        let mut manager = ExtensionManager::new();
        let exporter = Arc::new(CountingExporter(std::sync::atomic::AtomicUsize::new(0)));
        manager.register(Arc::new(ExporterHandle(exporter.clone())));

        let handle = manager.get::<ExporterHandle>().unwrap();
        handle
            .0
            .export(CallEvent {
                module_id: "echo".to_string(),
                trace_id: "t1".to_string(),
                success: true,
                error_code: None,
                duration_ms: 1,
            })
            .await;
        assert_eq!(exporter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fs_discoverer_finds_binding_files_under_a_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.module.yaml"), "bindings: []\n").unwrap();

        let discoverer = FsDiscoverer;
        let found = discoverer.scan(&[ScanRoot::new(dir.path())]).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}

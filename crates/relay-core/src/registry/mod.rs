//! Module storage, discovery pipeline, dependency-ordered loading, and
//! lifecycle events.

pub mod dependency;
pub mod discovery;
pub mod error;

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::RwLock;

pub use dependency::DependencyInfo;
pub use error::RegistryError;

use crate::module::{Module, ModuleDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryEvent {
    Register,
    Unregister,
}

impl RegistryEvent {
    fn parse(name: &str) -> Result<Self, RegistryError> {
        match name {
            "register" => Ok(RegistryEvent::Register),
            "unregister" => Ok(RegistryEvent::Unregister),
            other => Err(RegistryError::UnknownEvent(other.to_string())),
        }
    }
}

type Listener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    register: Vec<Listener>,
    unregister: Vec<Listener>,
}

/// Filter for `Registry::list`: matches modules by ID prefix and/or tag.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub prefix: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct Registry {
    modules: RwLock<BTreeMap<String, Arc<dyn Module>>>,
    descriptors: RwLock<HashMap<String, ModuleDescriptor>>,
    listeners: RwLock<Listeners>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            descriptors: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Listeners::default()),
        }
    }

    /// Registers a module under `module_id`. Rejects an empty id and
    /// duplicates. If the module exposes `on_load`, it's invoked before the
    /// module becomes visible; on failure the registration is rolled back
    /// (the module is left unregistered) and the error propagates.
    pub async fn register(
        &self,
        module_id: &str,
        module: Arc<dyn Module>,
        descriptor: Option<ModuleDescriptor>,
    ) -> Result<(), RegistryError> {
        if module_id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        {
            let modules = self.modules.read().await;
            if modules.contains_key(module_id) {
                return Err(RegistryError::DuplicateId(module_id.to_string()));
            }
        }

        if let Err(e) = module.on_load().await {
            return Err(RegistryError::LoadFailed(module_id.to_string(), e.to_string()));
        }

        let descriptor = descriptor.unwrap_or_else(|| ModuleDescriptor::new(module_id, module.as_ref()));
        self.modules.write().await.insert(module_id.to_string(), module);
        self.descriptors.write().await.insert(module_id.to_string(), descriptor);

        self.notify(RegistryEvent::Register, module_id).await;
        log::info!("module '{}' registered", module_id);
        Ok(())
    }

    /// Unregisters a module, returning whether it was present. `on_unload`
    /// errors are swallowed and logged rather than propagated.
    pub async fn unregister(&self, module_id: &str) -> bool {
        let module = self.modules.write().await.remove(module_id);
        self.descriptors.write().await.remove(module_id);
        let Some(module) = module else {
            return false;
        };
        if let Err(e) = module.on_unload().await {
            log::warn!("module '{}' on_unload failed: {}", module_id, e);
        }
        self.notify(RegistryEvent::Unregister, module_id).await;
        true
    }

    pub async fn get(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().await.get(module_id).cloned()
    }

    pub async fn has(&self, module_id: &str) -> bool {
        self.modules.read().await.contains_key(module_id)
    }

    pub async fn get_definition(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.descriptors.read().await.get(module_id).cloned()
    }

    /// Sorted module IDs, optionally filtered by prefix and/or tag.
    pub async fn list(&self, filter: Option<ListFilter>) -> Vec<String> {
        let descriptors = self.descriptors.read().await;
        let modules = self.modules.read().await;
        let mut ids: Vec<String> = modules.keys().cloned().collect();
        if let Some(filter) = filter {
            ids.retain(|id| {
                let prefix_ok = filter.prefix.as_ref().map(|p| id.starts_with(p.as_str())).unwrap_or(true);
                let tags_ok = filter
                    .tags
                    .as_ref()
                    .map(|wanted| {
                        descriptors
                            .get(id)
                            .map(|d| wanted.iter().all(|t| d.tags.contains(t)))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true);
                prefix_ok && tags_ok
            });
        }
        ids.sort();
        ids
    }

    pub async fn module_ids(&self) -> Vec<String> {
        self.modules.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.modules.read().await.len()
    }

    pub async fn iter(&self) -> Vec<(String, Arc<dyn Module>)> {
        self.modules
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Registers a listener for `"register"` or `"unregister"`. Unknown
    /// event names error; a listener that panics is caught and swallowed so
    /// one misbehaving listener can't break registration for the rest.
    pub async fn on(&self, event: &str, callback: Listener) -> Result<(), RegistryError> {
        let event = RegistryEvent::parse(event)?;
        let mut listeners = self.listeners.write().await;
        match event {
            RegistryEvent::Register => listeners.register.push(callback),
            RegistryEvent::Unregister => listeners.unregister.push(callback),
        }
        Ok(())
    }

    async fn notify(&self, event: RegistryEvent, module_id: &str) {
        let listeners = self.listeners.read().await;
        let list = match event {
            RegistryEvent::Register => &listeners.register,
            RegistryEvent::Unregister => &listeners.unregister,
        };
        for listener in list {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| listener(module_id)));
        }
    }

    /// Clears any derived/cached schema data while preserving registered
    /// modules. The base registry keeps no derived cache of its own today
    /// (schema validation is stateless), so this is a no-op reserved for
    /// callers layering a caching schema adapter on top.
    pub async fn clear_cache(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greet;

    #[async_trait]
    impl Module for Greet {
        fn input_schema(&self) -> &Value {
            static S: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            S.get_or_init(|| serde_json::json!({"type":"object"}))
        }
        fn output_schema(&self) -> &Value {
            self.input_schema()
        }
        fn description(&self) -> &str {
            "greets"
        }
        async fn execute(&self, inputs: Value, _ctx: &crate::context::Context) -> Result<Value, ModuleError> {
            Ok(inputs)
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_and_empty_id() {
        let registry = Registry::new();
        assert!(matches!(
            registry.register("", Arc::new(Greet), None).await,
            Err(RegistryError::EmptyId)
        ));
        registry.register("greet", Arc::new(Greet), None).await.unwrap();
        assert!(matches!(
            registry.register("greet", Arc::new(Greet), None).await,
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn register_unregister_round_trip_preserves_count() {
        let registry = Registry::new();
        let register_count = Arc::new(AtomicUsize::new(0));
        let unregister_count = Arc::new(AtomicUsize::new(0));
        {
            let c = register_count.clone();
            registry
                .on("register", Box::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }))
                .await
                .unwrap();
        }
        {
            let c = unregister_count.clone();
            registry
                .on("unregister", Box::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }))
                .await
                .unwrap();
        }

        registry.register("greet", Arc::new(Greet), None).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert!(registry.unregister("greet").await);
        assert_eq!(registry.count().await, 0);
        assert_eq!(register_count.load(Ordering::SeqCst), 1);
        assert_eq!(unregister_count.load(Ordering::SeqCst), 1);
    }
}

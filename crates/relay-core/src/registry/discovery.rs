//! Eight-step discovery pipeline: scan for Binding YAML files, apply ID-map
//! overrides, load metadata, resolve each binding's entry point, validate,
//! parse dependencies, topologically sort, and register in order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::binding::{parse_binding_file, BindingEntry, BindingModule, CallableRegistry};
use crate::extension::{DiscovererHandle, ExtensionManager, FsDiscoverer};
use crate::module::ModuleDescriptor;
use crate::registry::{Registry, RegistryError};

const NOISE_DIRS: &[&str] = &["target", "node_modules", "dist", ".git"];
const BINDING_SUFFIX: &str = ".module.yaml";

/// One filesystem tree to scan for binding files. Multiple roots may be
/// tagged with distinct namespaces to prefix discovered module ids (useful
/// when composing first-party and vendored binding trees in one process).
#[derive(Debug, Clone)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub namespace: Option<String>,
    pub max_depth: usize,
}

impl ScanRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), namespace: None, max_depth: 8 }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdMapFile {
    #[serde(default)]
    mappings: Vec<IdMapEntry>,
}

#[derive(Debug, Deserialize)]
struct IdMapEntry {
    file: String,
    id: String,
}

/// One binding file found by a scan, still tagged with the namespace of the
/// root it was found under.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub namespace: Option<String>,
}

fn is_noise_dir(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || NOISE_DIRS.contains(&name)
}

fn is_binding_file(name: &str) -> bool {
    name.ends_with(BINDING_SUFFIX) && !name.starts_with('.') && !name.starts_with('_')
}

/// The default filesystem walk a `Discoverer` can be swapped out for. Kept
/// `pub(crate)` so `extension::FsDiscoverer` can delegate to it per root.
pub(crate) async fn scan_root(root: &ScanRoot) -> Result<Vec<ScannedFile>, RegistryError> {
    let mut out = Vec::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.path.clone(), 0)];
    while let Some((dir, depth)) = stack.pop() {
        if depth > root.max_depth {
            continue;
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(RegistryError::Io(e.to_string())),
        };
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| RegistryError::Io(e.to_string()))?;
            let Some(entry) = entry else { break };
            let file_type = entry.file_type().await.map_err(|e| RegistryError::Io(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                if is_noise_dir(&name) {
                    continue;
                }
                stack.push((entry.path(), depth + 1));
            } else if is_binding_file(&name) {
                out.push(ScannedFile { path: entry.path(), namespace: root.namespace.clone() });
            }
        }
    }
    Ok(out)
}

async fn load_id_map(path: Option<&Path>) -> Result<HashMap<String, String>, RegistryError> {
    let mut map = HashMap::new();
    let Some(path) = path else { return Ok(map) };
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
        Err(e) => return Err(RegistryError::Io(e.to_string())),
    };
    let parsed: IdMapFile =
        serde_yaml::from_str(&text).map_err(|e| RegistryError::Io(format!("id-map: {e}")))?;
    for entry in parsed.mappings {
        map.insert(entry.file, entry.id);
    }
    Ok(map)
}

fn id_map_override(id_map: &HashMap<String, String>, path: &Path) -> Option<String> {
    let path_str = path.to_string_lossy();
    id_map.iter().find(|(file, _)| path_str.ends_with(file.as_str())).map(|(_, id)| id.clone())
}

struct PendingModule {
    module_id: String,
    entry: BindingEntry,
}

/// Summary of one `discover` run.
#[derive(Debug, Default, Clone)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

/// Runs the full scan → id-map → metadata → resolve → validate → dependency
/// → topological-sort → register pipeline over `roots`, registering modules
/// into `registry` in dependency order. `extensions` is consulted for a
/// registered `Discoverer`; with none registered (or `None` passed), the
/// default filesystem walk (`FsDiscoverer`) is used.
pub async fn discover(
    registry: &Registry,
    callables: &CallableRegistry,
    roots: &[ScanRoot],
    id_map_path: Option<&Path>,
    extensions: Option<&ExtensionManager>,
) -> Result<DiscoveryReport, RegistryError> {
    // Step 1: scan.
    let mut seen_namespaces = HashSet::new();
    for root in roots {
        if let Some(ns) = &root.namespace {
            if !seen_namespaces.insert(ns.clone()) {
                return Err(RegistryError::DuplicateNamespace(ns.clone()));
            }
        }
    }
    let discoverer = extensions
        .and_then(|ext| ext.get::<DiscovererHandle>().ok())
        .map(|handle| handle.0.clone())
        .unwrap_or_else(|| Arc::new(FsDiscoverer));
    let scanned = discoverer.scan(roots).await?;

    // Step 2: id-map overrides.
    let id_map = load_id_map(id_map_path).await?;

    // Step 3: load metadata (each binding file's entries double as metadata).
    let mut report = DiscoveryReport::default();
    let mut pending: Vec<PendingModule> = Vec::new();
    for file in &scanned {
        let text = tokio::fs::read_to_string(&file.path)
            .await
            .map_err(|e| RegistryError::Io(e.to_string()))?;
        let parsed = match parse_binding_file(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("skipping unreadable binding file {}: {}", file.path.display(), e);
                report.skipped.push((file.path.display().to_string(), e.to_string()));
                continue;
            }
        };
        for mut entry in parsed.bindings {
            if let Some(ns) = &file.namespace {
                entry.module_id = format!("{ns}.{}", entry.module_id);
            }
            let module_id = id_map_override(&id_map, &file.path).unwrap_or_else(|| entry.module_id.clone());
            if module_id.is_empty() {
                log::warn!("skipping binding with empty module id in {}", file.path.display());
                continue;
            }
            pending.push(PendingModule { module_id, entry });
        }
    }

    // Step 4 + 5: resolve entry point, validate the resulting module.
    let known_ids: HashSet<String> = pending.iter().map(|p| p.module_id.clone()).collect();
    let mut modules: HashMap<String, (Arc<BindingModule>, ModuleDescriptor)> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for pending_module in &pending {
        in_degree.entry(pending_module.module_id.clone()).or_insert(0);
    }

    for pending_module in pending {
        let PendingModule { module_id, entry } = pending_module;
        let callable = match callables.resolve(&entry.target) {
            Some(c) => c,
            None => {
                log::warn!("skipping '{module_id}': no callable for target '{}'", entry.target);
                report.skipped.push((module_id, format!("unresolved target '{}'", entry.target)));
                continue;
            }
        };
        let bound = match BindingModule::new(&entry, callable) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("skipping '{module_id}': {e}");
                report.skipped.push((module_id, e.to_string()));
                continue;
            }
        };
        let bound = Arc::new(bound);

        // Step 6: parse dependencies, building the precedence graph.
        for dep in &entry.dependencies {
            if known_ids.contains(&dep.module_id) {
                dependents.entry(dep.module_id.clone()).or_default().push(module_id.clone());
                *in_degree.entry(module_id.clone()).or_insert(0) += 1;
            } else if registry.has(&dep.module_id).await {
                // already registered in a prior discovery pass; edge satisfied
            } else if !dep.optional {
                return Err(RegistryError::MissingDependency(module_id.clone(), dep.module_id.clone()));
            }
        }

        let mut descriptor = ModuleDescriptor::new(&module_id, bound.as_ref());
        let mut overrides = crate::module::ModuleMetadataOverride::default();
        overrides.name = entry.name.clone();
        overrides.description = entry.description.clone();
        overrides.version = entry.version.clone();
        overrides.tags = entry.tags.clone();
        overrides.annotations = entry.annotations.clone();
        overrides.examples = entry.examples.clone();
        overrides.documentation = entry.documentation.clone();
        overrides.metadata = entry.metadata.clone();
        descriptor.merge_overrides(&overrides);

        modules.insert(module_id, (bound, descriptor));
    }

    // Step 7: Kahn's algorithm, deterministic lexicographic tie-break.
    let mut ready: BTreeSet<String> =
        in_degree.iter().filter(|(id, deg)| **deg == 0 && modules.contains_key(*id)).map(|(id, _)| id.clone()).collect();
    let mut order = Vec::new();
    let mut remaining_degree = in_degree.clone();
    while let Some(id) = ready.iter().next().cloned() {
        ready.remove(&id);
        order.push(id.clone());
        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                if let Some(deg) = remaining_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 && modules.contains_key(dependent) {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
    }
    if order.len() != modules.len() {
        let mut cycle: Vec<String> = modules.keys().filter(|id| !order.contains(id)).cloned().collect();
        cycle.sort();
        return Err(RegistryError::CircularDependency(cycle));
    }

    // Step 8: register in dependency order.
    for module_id in order {
        let Some((module, descriptor)) = modules.remove(&module_id) else { continue };
        registry.register(&module_id, module, Some(descriptor)).await?;
        report.registered.push(module_id);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::io::Write as _;

    fn echo_callable() -> crate::binding::CallableFn {
        Arc::new(|inputs, _ctx: Context| Box::pin(async move { Ok(inputs) }))
    }

    #[tokio::test]
    async fn discovers_and_registers_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| {
            let path = dir.path().join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
        };

        write(
            "a.module.yaml",
            "bindings:\n  - module_id: mod.a\n    target: test::echo\n",
        );
        write(
            "b.module.yaml",
            "bindings:\n  - module_id: mod.b\n    target: test::echo\n    dependencies:\n      - module_id: mod.c\n",
        );
        write(
            "c.module.yaml",
            "bindings:\n  - module_id: mod.c\n    target: test::echo\n    dependencies:\n      - module_id: mod.a\n",
        );

        let mut callables = CallableRegistry::new();
        callables.register("test::echo", echo_callable());

        let registry = Registry::new();
        let roots = vec![ScanRoot::new(dir.path())];
        let report = discover(&registry, &callables, &roots, None, None).await.unwrap();

        assert_eq!(report.registered, vec!["mod.a", "mod.c", "mod.b"]);
        assert_eq!(registry.count().await, 3);
    }

    #[tokio::test]
    async fn circular_dependency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| {
            let path = dir.path().join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
        };
        write(
            "a.module.yaml",
            "bindings:\n  - module_id: mod.a\n    target: test::echo\n    dependencies:\n      - module_id: mod.b\n",
        );
        write(
            "b.module.yaml",
            "bindings:\n  - module_id: mod.b\n    target: test::echo\n    dependencies:\n      - module_id: mod.a\n",
        );

        let mut callables = CallableRegistry::new();
        callables.register("test::echo", echo_callable());

        let registry = Registry::new();
        let roots = vec![ScanRoot::new(dir.path())];
        let err = discover(&registry, &callables, &roots, None, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::CircularDependency(_)));
    }
}

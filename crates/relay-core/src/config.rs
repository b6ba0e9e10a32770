//! Config accessor — a dot-path lookup over a nested JSON value, supporting
//! `executor.default_timeout`-style keys an orchestration config needs.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

#[cfg(feature = "yaml-config")]
use thiserror::Error;

#[cfg(feature = "yaml-config")]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// In-memory configuration snapshot, keyed by dot-path (`"executor.default_timeout"`).
#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Value,
}

impl Config {
    pub fn new() -> Self {
        Self { root: Value::Object(serde_json::Map::new()) }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    #[cfg(feature = "yaml-config")]
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text)?;
        Ok(Self { root })
    }

    /// Resolves a dot-path (`"a.b.c"`) by walking nested objects.
    fn resolve<'a>(&'a self, path: &str) -> Option<&'a Value> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.resolve(path)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = &mut self.root;
        for (i, segment) in segments.iter().enumerate() {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            let map = current.as_object_mut().expect("just ensured object");
            if i == segments.len() - 1 {
                map.insert(segment.to_string(), value);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Shallow-merges `other`'s top-level keys over `self`'s, `other` wins —
    /// the same last-writer-wins precedence a config merge typically uses.
    pub fn merge(&mut self, other: &Config) {
        if let (Value::Object(self_map), Value::Object(other_map)) =
            (&mut self.root, &other.root)
        {
            for (k, v) in other_map {
                self_map.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

impl From<HashMap<String, Value>> for Config {
    fn from(map: HashMap<String, Value>) -> Self {
        Self {
            root: Value::Object(map.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_path_lookup() {
        let mut cfg = Config::new();
        cfg.set("executor.default_timeout", serde_json::json!(30000));
        cfg.set("executor.max_call_depth", serde_json::json!(32));

        assert_eq!(cfg.get::<u64>("executor.default_timeout"), Some(30000));
        assert_eq!(cfg.get::<u32>("executor.max_call_depth"), Some(32));
        assert_eq!(cfg.get::<u32>("executor.missing"), None);
    }
}

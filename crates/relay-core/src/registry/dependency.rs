use serde::Deserialize;

/// A module's dependency on another module, as parsed from discovery
/// metadata. `version` is a free-form constraint string (left to the host's
/// schema/semver conventions); `optional` dependencies that are missing are
/// silently dropped as an edge rather than failing discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyInfo {
    pub module_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

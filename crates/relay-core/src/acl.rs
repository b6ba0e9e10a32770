//! Access control list: ordered pattern rules with conditions and
//! first-match-wins semantics.

use std::sync::{Arc, RwLock};

use serde::Deserialize;
use thiserror::Error;

use crate::context::Context;

pub const EXTERNAL_SENTINEL: &str = "@external";
const SYSTEM_SENTINEL: &str = "@system";

#[derive(Debug, Error)]
pub enum AclError {
    #[error("access denied: caller '{caller}' may not call '{target}'")]
    Denied { caller: String, target: String },
    #[error("acl rule error: {0}")]
    RuleError(String),
}

impl AclError {
    pub fn code(&self) -> &'static str {
        match self {
            AclError::Denied { .. } => "ACL_DENIED",
            AclError::RuleError(_) => "ACL_RULE_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclConditions {
    pub identity_types: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub max_call_depth: Option<usize>,
}

impl AclConditions {
    /// AND across every present key. A null context fails any condition.
    fn evaluate(&self, context: Option<&Context>) -> bool {
        if let Some(types) = &self.identity_types {
            let Some(ctx) = context else { return false };
            let Some(identity) = ctx.identity() else {
                return false;
            };
            if !types.iter().any(|t| t == identity.kind()) {
                return false;
            }
        }
        if let Some(roles) = &self.roles {
            let Some(ctx) = context else { return false };
            let Some(identity) = ctx.identity() else {
                return false;
            };
            if !roles.iter().any(|r| identity.roles().contains(r)) {
                return false;
            }
        }
        if let Some(max_depth) = self.max_call_depth {
            let Some(ctx) = context else { return false };
            if ctx.call_chain().len() > max_depth {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AclRule {
    pub callers: Vec<String>,
    pub targets: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: Option<AclConditions>,
}

impl AclRule {
    fn matches(&self, caller_id: &str, target_id: &str, context: Option<&Context>) -> bool {
        let caller_matches = self.callers.iter().any(|p| match_pattern(p, caller_id, context));
        let target_matches = self.targets.iter().any(|p| match_pattern(p, target_id, context));
        if !(caller_matches && target_matches) {
            return false;
        }
        self.conditions
            .as_ref()
            .map(|c| c.evaluate(context))
            .unwrap_or(true)
    }
}

/// Algorithm A08: `*`-segment glob matching with two sentinels.
///
/// `@external` matches only the literal `@external` string. `@system`
/// matches only when `context.identity.type == "system"`. Otherwise, split
/// the pattern by `*`: each non-empty segment must be found in order via
/// left-to-right search; if the pattern doesn't start with `*` the first
/// segment must be a prefix, and if it doesn't end with `*` the last
/// segment must be a suffix. A bare `*` matches any string (including the
/// empty string); a pattern without `*` is an exact match.
pub fn match_pattern(pattern: &str, value: &str, context: Option<&Context>) -> bool {
    if pattern == EXTERNAL_SENTINEL {
        return value == EXTERNAL_SENTINEL;
    }
    if pattern == SYSTEM_SENTINEL {
        return context
            .and_then(|c| c.identity())
            .map(|i| i.kind() == "system")
            .unwrap_or(false);
    }
    if !pattern.contains('*') {
        return pattern == value;
    }
    if pattern == "*" {
        return true;
    }

    let starts_with_star = pattern.starts_with('*');
    let ends_with_star = pattern.ends_with('*');
    let segments: Vec<&str> = pattern.split('*').filter(|s| !s.is_empty()).collect();

    if !starts_with_star {
        let first = segments.first().copied().unwrap_or("");
        if !value.starts_with(first) {
            return false;
        }
    }
    if !ends_with_star {
        let last = segments.last().copied().unwrap_or("");
        if !value.ends_with(last) {
            return false;
        }
    }

    let mut cursor = 0usize;
    for segment in &segments {
        match value[cursor..].find(segment) {
            Some(pos) => cursor += pos + segment.len(),
            None => return false,
        }
    }
    true
}

#[derive(Debug, Clone, Deserialize)]
struct AclFile {
    #[serde(default = "default_effect_deny")]
    default_effect: Effect,
    #[serde(default)]
    rules: Vec<AclRule>,
}

fn default_effect_deny() -> Effect {
    Effect::Deny
}

pub struct Acl {
    rules: RwLock<Vec<AclRule>>,
    default_effect: RwLock<Effect>,
    source_path: Option<std::path::PathBuf>,
}

impl Acl {
    pub fn new(rules: Vec<AclRule>, default_effect: Effect) -> Self {
        Self {
            rules: RwLock::new(rules),
            default_effect: RwLock::new(default_effect),
            source_path: None,
        }
    }

    #[cfg(feature = "yaml-config")]
    pub fn load_yaml(path: impl AsRef<std::path::Path>) -> Result<Self, AclError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AclError::RuleError(format!("reading {}: {}", path.display(), e)))?;
        let parsed = Self::parse(&text)?;
        Ok(Self {
            rules: RwLock::new(parsed.rules),
            default_effect: RwLock::new(parsed.default_effect),
            source_path: Some(path.to_path_buf()),
        })
    }

    #[cfg(feature = "yaml-config")]
    fn parse(text: &str) -> Result<AclFile, AclError> {
        serde_yaml::from_str(text).map_err(|e| AclError::RuleError(e.to_string()))
    }

    /// `check(callerId | null, targetId, context?) -> bool`. A null
    /// `callerId` is normalized to `@external`.
    pub fn check(&self, caller_id: Option<&str>, target_id: &str, context: Option<&Context>) -> bool {
        let caller_id = caller_id.unwrap_or(EXTERNAL_SENTINEL);
        // Snapshot the rules (copy-on-read) so concurrent `add_rule`/`reload`
        // calls can't interleave with an in-flight evaluation.
        let rules = self.rules.read().expect("acl rules lock poisoned").clone();
        for rule in &rules {
            if rule.matches(caller_id, target_id, context) {
                return rule.effect == Effect::Allow;
            }
        }
        *self.default_effect.read().expect("acl default-effect lock poisoned") == Effect::Allow
    }

    /// Prepends a rule so it evaluates first.
    pub fn add_rule(&self, rule: AclRule) {
        self.rules.write().expect("acl rules lock poisoned").insert(0, rule);
    }

    /// Removes the first rule whose caller and target lists match
    /// element-for-element in order.
    pub fn remove_rule(&self, callers: &[String], targets: &[String]) -> bool {
        let mut rules = self.rules.write().expect("acl rules lock poisoned");
        if let Some(pos) = rules
            .iter()
            .position(|r| r.callers == callers && r.targets == targets)
        {
            rules.remove(pos);
            true
        } else {
            false
        }
    }

    #[cfg(feature = "yaml-config")]
    pub fn reload(&self) -> Result<(), AclError> {
        let path = self
            .source_path
            .as_ref()
            .ok_or_else(|| AclError::RuleError("acl was not loaded from a YAML file".to_string()))?;
        let text = std::fs::read_to_string(path)
            .map_err(|e| AclError::RuleError(format!("reading {}: {}", path.display(), e)))?;
        let parsed = Self::parse(&text)?;
        *self.rules.write().expect("acl rules lock poisoned") = parsed.rules;
        *self.default_effect.write().expect("acl default-effect lock poisoned") = parsed.default_effect;
        Ok(())
    }

    pub fn rules_snapshot(&self) -> Vec<AclRule> {
        self.rules.read().expect("acl rules lock poisoned").clone()
    }

    pub fn default_effect(&self) -> Effect {
        *self.default_effect.read().expect("acl default-effect lock poisoned")
    }
}

/// The ACL extension point: a host can plug in a non-file-backed rule
/// source (a database-fed policy service, say) by implementing this trait
/// and registering it with the extension manager instead of a plain `Acl`.
pub trait AclProvider: Send + Sync {
    fn check(&self, caller_id: Option<&str>, target_id: &str, context: Option<&Context>) -> bool;
}

impl AclProvider for Acl {
    fn check(&self, caller_id: Option<&str>, target_id: &str, context: Option<&Context>) -> bool {
        Acl::check(self, caller_id, target_id, context)
    }
}

pub type SharedAcl = Arc<dyn AclProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_star_matches_anything() {
        assert!(match_pattern("*", "", None));
        assert!(match_pattern("*", "anything.at.all", None));
    }

    #[test]
    fn exact_match_without_star() {
        assert!(match_pattern("admin.delete", "admin.delete", None));
        assert!(!match_pattern("admin.delete", "admin.delete_user", None));
    }

    #[test]
    fn prefix_and_suffix_semantics() {
        assert!(match_pattern("admin.*", "admin.delete_user", None));
        assert!(!match_pattern("admin.*", "sys.admin.delete_user", None));
        assert!(match_pattern("*.delete", "admin.delete", None));
    }

    #[test]
    fn first_match_wins_deny_before_allow() {
        let acl = Acl::new(
            vec![
                AclRule {
                    callers: vec!["*".to_string()],
                    targets: vec!["admin.*".to_string()],
                    effect: Effect::Deny,
                    description: "deny admin".to_string(),
                    conditions: None,
                },
                AclRule {
                    callers: vec!["*".to_string()],
                    targets: vec!["*".to_string()],
                    effect: Effect::Allow,
                    description: "allow all".to_string(),
                    conditions: None,
                },
            ],
            Effect::Deny,
        );
        assert!(!acl.check(None, "admin.delete_user", None));
        assert!(acl.check(None, "greet", None));
    }

    #[test]
    fn add_rule_prepends_and_takes_effect_immediately() {
        let acl = Acl::new(vec![], Effect::Deny);
        assert!(!acl.check(None, "greet", None));
        acl.add_rule(AclRule {
            callers: vec!["*".to_string()],
            targets: vec!["*".to_string()],
            effect: Effect::Allow,
            description: String::new(),
            conditions: None,
        });
        assert!(acl.check(None, "greet", None));
    }

    #[cfg(feature = "yaml-config")]
    #[test]
    fn reload_replaces_rules_and_default_effect_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acl.yaml");
        std::fs::write(
            &path,
            "default_effect: deny\nrules:\n  - callers: [\"*\"]\n    targets: [\"admin.*\"]\n    effect: deny\n",
        )
        .unwrap();

        let acl = Acl::load_yaml(&path).unwrap();
        assert_eq!(acl.default_effect(), Effect::Deny);
        assert!(!acl.check(None, "greet", None));

        std::fs::write(
            &path,
            "default_effect: allow\nrules:\n  - callers: [\"*\"]\n    targets: [\"admin.*\"]\n    effect: deny\n",
        )
        .unwrap();
        acl.reload().unwrap();

        assert_eq!(acl.default_effect(), Effect::Allow);
        assert!(acl.check(None, "greet", None));
        assert!(!acl.check(None, "admin.delete", None));
    }
}

//! Immutable security configuration shared by every sandbox in a process.

use std::{collections::BTreeSet, path::Path};

use serde::Deserialize;

use crate::diagnostics::{Result, SandboxError};

/// Ambient capabilities removed from the standard namespace.
pub const STANDARD_DENIED_CAPABILITIES: &[&str] = &[
    "globals",
    "vars",
    "eval",
    "exec",
    "open",
    "read_file",
    "write_file",
    "system",
    "getenv",
    "exit",
];

/// Host modules untrusted code may import.
pub const STANDARD_ALLOWED_MODULES: &[&str] = &["math", "string", "re", "json", "datetime"];

/// Identifiers starting with this character are private.
pub const PRIVACY_MARKER: char = '_';

pub fn is_private(name: &str) -> bool {
    name.starts_with(PRIVACY_MARKER)
}

/// Denylist of ambient capabilities and allowlist of importable modules.
///
/// A policy has no mutating methods; share it with `Arc<Policy>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(default = "standard_denied")]
    denied_capabilities: BTreeSet<String>,
    #[serde(default = "standard_allowed")]
    allowed_modules: BTreeSet<String>,
}

fn standard_denied() -> BTreeSet<String> {
    STANDARD_DENIED_CAPABILITIES
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn standard_allowed() -> BTreeSet<String> {
    STANDARD_ALLOWED_MODULES
        .iter()
        .map(|name| name.to_string())
        .collect()
}

impl Default for Policy {
    fn default() -> Self {
        Self::standard()
    }
}

impl Policy {
    pub fn standard() -> Self {
        Self {
            denied_capabilities: standard_denied(),
            allowed_modules: standard_allowed(),
        }
    }

    pub fn new<D, A>(denied_capabilities: D, allowed_modules: A) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            denied_capabilities: denied_capabilities.into_iter().map(Into::into).collect(),
            allowed_modules: allowed_modules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| SandboxError::Policy(err.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn is_denied(&self, capability: &str) -> bool {
        self.denied_capabilities.contains(capability)
    }

    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.allowed_modules.contains(module)
    }

    pub fn denied_capabilities(&self) -> impl Iterator<Item = &str> {
        self.denied_capabilities.iter().map(String::as_str)
    }

    pub fn allowed_modules(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_denies_dynamic_execution() {
        let policy = Policy::standard();
        assert!(policy.is_denied("eval"));
        assert!(policy.is_denied("system"));
        assert!(!policy.is_denied("len"));
    }

    #[test]
    fn standard_policy_allows_math_but_not_os() {
        let policy = Policy::standard();
        assert!(policy.is_module_allowed("math"));
        assert!(!policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("fs"));
    }

    #[test]
    fn toml_overrides_only_named_sets() {
        let policy = Policy::from_toml_str(r#"allowed_modules = ["math", "os"]"#).unwrap();
        assert!(policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("json"));
        assert!(policy.is_denied("exec"));
    }

    #[test]
    fn empty_toml_is_standard() {
        assert_eq!(Policy::from_toml_str("").unwrap(), Policy::standard());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Policy::from_toml_str("allow_everything = true").unwrap_err();
        assert!(matches!(err, SandboxError::Policy(_)));
    }

    #[test]
    fn privacy_marker_matches_one_or_two_underscores() {
        assert!(is_private("_x"));
        assert!(is_private("__init"));
        assert!(!is_private("init_"));
    }
}

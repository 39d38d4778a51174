use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    environment::{Environment, EnvironmentRef},
    policy::{Policy, is_private},
    stdlib,
    value::Value,
};

/// Extra name/object pairs supplied by the embedding application.
pub type Bindings = IndexMap<String, Value>;

/// The global scope untrusted code runs in, and the result of `run`.
pub struct Namespace {
    env: EnvironmentRef,
    trusted: BTreeSet<String>,
}

impl Namespace {
    /// An empty namespace with no ambient capabilities at all.
    pub fn empty() -> Self {
        Self {
            env: Environment::new(),
            trusted: BTreeSet::new(),
        }
    }

    /// Builds a fresh restricted namespace: the ambient capabilities minus the
    /// policy's denylist, overlaid with `additional`.
    ///
    /// Entries in `additional` are neither filtered nor checked. Whatever the
    /// caller injects is the caller's responsibility.
    pub fn restricted(policy: &Policy, additional: Option<Bindings>) -> Self {
        let mut namespace = Self::empty();
        let mut withheld = 0usize;
        for (name, value) in stdlib::ambient_capabilities() {
            if is_private(name) || policy.is_denied(name) {
                withheld += 1;
                continue;
            }
            namespace.env.borrow_mut().define(name, value);
        }
        let supplied = additional.as_ref().map(IndexMap::len).unwrap_or(0);
        for (name, value) in additional.into_iter().flatten() {
            namespace.insert(name, value);
        }
        debug!(
            visible = namespace.len(),
            withheld, supplied, "built restricted namespace"
        );
        namespace
    }

    /// Binds a caller-supplied entry, overriding any builtin of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.trusted.insert(name.clone());
        self.env.borrow_mut().define(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.env.borrow().local(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.env.borrow().local(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.env.borrow().bindings().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.env
            .borrow()
            .bindings()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.env.borrow().bindings().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn env(&self) -> &EnvironmentRef {
        &self.env
    }

    /// Names that came from the embedding application rather than the sandbox.
    pub(crate) fn trusted_names(&self) -> impl Iterator<Item = &str> {
        self.trusted.iter().map(String::as_str)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.env.borrow().bindings().iter())
            .finish()
    }
}

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Exception, ExceptionKind, SandboxError, SourceSpan},
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One function-level scope. Blocks share the scope of their function.
#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Binds `name` in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Option<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Some(value.clone());
        }
        let parent = env.borrow().parent.clone();
        parent.and_then(|parent| Environment::lookup(&parent, name))
    }

    pub fn get(env: &EnvironmentRef, name: &str, span: SourceSpan) -> Result<Value, SandboxError> {
        Environment::lookup(env, name).ok_or_else(|| {
            SandboxError::from(
                Exception::new(
                    ExceptionKind::NameError,
                    format!("name `{name}` is not defined"),
                )
                .with_span(span),
            )
        })
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &IndexMap<String, Value> {
        &self.bindings
    }
}

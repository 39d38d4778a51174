use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    diagnostics::{Exception, ExceptionKind, Result, SandboxError},
    environment::EnvironmentRef,
    runtime::Interpreter,
};

/// A runtime value. Cloning shares the underlying object.
#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn none() -> Self {
        Self::new(ValueKind::None)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(RefCell::new(values)))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Map(RefCell::new(entries)))
    }

    pub fn module(name: impl Into<String>, exports: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Module(ModuleValue {
            name: name.into(),
            exports,
        }))
    }

    pub fn native(
        name: &'static str,
        arity: usize,
        callback: fn(&mut Interpreter, &[Value]) -> Result<Value>,
    ) -> Self {
        Self::new(ValueKind::NativeFunction(NativeFunction {
            name,
            arity,
            callback,
        }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    /// True when both values are the same object.
    pub fn same_object(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_none(&self) -> bool {
        matches!(&*self.0, ValueKind::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Float(n) => Some(*n),
            ValueKind::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.0 {
            ValueKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::None => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::String(s) => !s.is_empty(),
            ValueKind::Array(values) => !values.borrow().is_empty(),
            ValueKind::Map(map) => !map.borrow().is_empty(),
            ValueKind::Module(_)
            | ValueKind::Function(_)
            | ValueKind::NativeFunction(_)
            | ValueKind::Class(_)
            | ValueKind::Instance(_)
            | ValueKind::BoundMethod { .. } => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::None => "None",
            ValueKind::Bool(_) => "Bool",
            ValueKind::Int(_) => "Int",
            ValueKind::Float(_) => "Float",
            ValueKind::String(_) => "String",
            ValueKind::Array(_) => "Array",
            ValueKind::Map(_) => "Map",
            ValueKind::Module(_) => "Module",
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => "Function",
            ValueKind::BoundMethod { .. } => "Method",
            ValueKind::Class(_) => "Class",
            ValueKind::Instance(_) => "Instance",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Function(_)
                | ValueKind::NativeFunction(_)
                | ValueKind::Class(_)
                | ValueKind::BoundMethod { .. }
        )
    }

    /// Source-like rendering: strings are quoted.
    pub fn repr(&self) -> String {
        match &*self.0 {
            ValueKind::String(s) => format!("{s:?}"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::None => write!(f, "none"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{}", format_float(*n)),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::Array(values) => {
                write!(f, "[")?;
                for (idx, value) in values.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value.repr())?;
                }
                write!(f, "]")
            }
            ValueKind::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {}", value.repr())?;
                }
                write!(f, "}}")
            }
            ValueKind::Module(module) => write!(f, "<module {}>", module.name),
            ValueKind::Function(fun) => write!(
                f,
                "<fn {}>",
                fun.name.as_deref().unwrap_or("anonymous")
            ),
            ValueKind::NativeFunction(fun) => write!(f, "<native fn {}>", fun.name),
            ValueKind::BoundMethod { method, .. } => write!(f, "<bound {method}>"),
            ValueKind::Class(class) => write!(f, "<class {}>", class.name),
            ValueKind::Instance(instance) => write!(f, "<{} instance>", instance.class_name()),
        }
    }
}

pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

pub enum ValueKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(RefCell<Vec<Value>>),
    Map(RefCell<IndexMap<String, Value>>),
    Module(ModuleValue),
    Function(UserFunction),
    NativeFunction(NativeFunction),
    Class(ClassValue),
    Instance(Instance),
    BoundMethod { receiver: Value, method: Value },
}

/// Exports of an imported module. Read-only to scripts.
pub struct ModuleValue {
    pub name: String,
    pub exports: IndexMap<String, Value>,
}

pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub defaults: Vec<Option<Value>>,
    pub body: Vec<Stmt>,
    pub env: EnvironmentRef,
}

pub struct ClassValue {
    pub name: String,
    pub methods: IndexMap<String, Value>,
}

pub struct Instance {
    pub class: Value,
    pub fields: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    pub fn class_name(&self) -> &str {
        match &*self.class.0 {
            ValueKind::Class(class) => &class.name,
            _ => "object",
        }
    }

    /// Looks up a method on the instance's class.
    pub fn method(&self, name: &str) -> Option<Value> {
        match &*self.class.0 {
            ValueKind::Class(class) => class.methods.get(name).cloned(),
            _ => None,
        }
    }
}

/// Arity that accepts any number of arguments.
pub const VARIADIC: usize = usize::MAX;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub callback: fn(&mut Interpreter, &[Value]) -> Result<Value>,
}

impl NativeFunction {
    pub fn call(&self, interpreter: &mut Interpreter, args: &[Value]) -> Result<Value> {
        if self.arity != VARIADIC && args.len() != self.arity {
            return Err(SandboxError::from(Exception::new(
                ExceptionKind::TypeError,
                format!(
                    "function `{}` expected {} arguments but received {}",
                    self.name,
                    self.arity,
                    args.len()
                ),
            )));
        }
        (self.callback)(interpreter, args)
    }
}

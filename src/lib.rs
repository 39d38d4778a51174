//! Experimental confinement of untrusted scripts: a small brace-syntax
//! language whose programs are validated for privacy-marked names, run in a
//! namespace stripped of dangerous capabilities, and only allowed to import
//! modules on an allowlist.
//!
//! This is a best-effort barrier, not a security boundary. Implicit protocol
//! dispatch (`__eq`, `__str`, ...) is invisible to the validator.

pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod imports;
pub mod lexer;
pub mod namespace;
pub mod parser;
pub mod policy;
pub mod repl;
pub mod runtime;
pub mod sandbox;
pub mod stdlib;
pub mod validator;
pub mod value;

pub use diagnostics::{
    Diagnostic, DiagnosticKind, Exception, ExceptionKind, Position, SandboxError, SourceSpan,
    Violation, ViolationKind,
};
pub use namespace::{Bindings, Namespace};
pub use policy::Policy;
pub use repl::Repl;
pub use sandbox::Sandbox;
pub use value::{Value, ValueKind};

use std::{rc::Rc, sync::Arc};

use tracing::{debug, warn};

use crate::{
    ast::{Expr, Program},
    diagnostics::{Result, SandboxError, Violation},
    imports::ImportMediator,
    namespace::{Bindings, Namespace},
    parser::{parse_expression, parse_program},
    policy::Policy,
    runtime::Interpreter,
    validator::Validator,
    value::Value,
};

/// Entry point for running untrusted source.
///
/// Every call goes parse, validate, build namespace, execute. Nothing runs
/// unless the whole source validates. A `Sandbox` holds no per-run state, so
/// one can be cloned into as many threads as needed.
#[derive(Clone)]
pub struct Sandbox {
    policy: Arc<Policy>,
    imports: ImportMediator,
}

impl Sandbox {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            imports: ImportMediator::new(Arc::clone(&policy)),
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// A fresh restricted namespace under this sandbox's policy.
    pub fn namespace(&self, additional: Option<Bindings>) -> Namespace {
        Namespace::restricted(&self.policy, additional)
    }

    /// Executes `source` as statements in a fresh namespace and returns that
    /// namespace. Side effects made before a runtime failure are kept by
    /// whatever they touched, but the namespace is only handed back on success.
    pub fn run(&self, source: &str, additional: Option<Bindings>) -> Result<Namespace> {
        let program = self.parse_program(source)?;
        let trusted = trusted_keys(additional.as_ref());
        self.check(source, trusted.iter().map(String::as_str), |validator| {
            validator.validate_program(&program)
        })?;
        let namespace = self.namespace(additional);
        self.execute(&namespace, source, &program)?;
        debug!(bindings = namespace.len(), "run completed");
        Ok(namespace)
    }

    /// Evaluates `source` as a single expression in a fresh namespace.
    pub fn evaluate(&self, source: &str, additional: Option<Bindings>) -> Result<Value> {
        let expr = self.parse_expression(source)?;
        let trusted = trusted_keys(additional.as_ref());
        self.check(source, trusted.iter().map(String::as_str), |validator| {
            validator.validate_expression(&expr)
        })?;
        let namespace = self.namespace(additional);
        let value = self.interpreter(&namespace, source).evaluate_expression(&expr);
        report(&value);
        let value = value?;
        debug!(kind = value.type_name(), "evaluation completed");
        Ok(value)
    }

    /// Executes `source` against an existing namespace, keeping its bindings.
    pub fn run_in(&self, namespace: &Namespace, source: &str) -> Result<()> {
        let program = self.parse_program(source)?;
        self.check(source, namespace.trusted_names(), |validator| {
            validator.validate_program(&program)
        })?;
        self.execute(namespace, source, &program)
    }

    /// Evaluates one expression against an existing namespace.
    pub fn evaluate_in(&self, namespace: &Namespace, source: &str) -> Result<Value> {
        let expr = self.parse_expression(source)?;
        self.check(source, namespace.trusted_names(), |validator| {
            validator.validate_expression(&expr)
        })?;
        let value = self.interpreter(namespace, source).evaluate_expression(&expr);
        report(&value);
        value
    }

    fn parse_program(&self, source: &str) -> Result<Program> {
        let program = parse_program(source)?;
        debug!(statements = program.items.len(), "parsed program");
        Ok(program)
    }

    fn parse_expression(&self, source: &str) -> Result<Expr> {
        let expr = parse_expression(source)?;
        debug!("parsed expression");
        Ok(expr)
    }

    fn check<'a, I, F>(&'a self, source: &'a str, trusted: I, visit: F) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
        F: FnOnce(&Validator<'a>) -> std::result::Result<(), Violation>,
    {
        let validator = Validator::new(&self.policy, source).trust(trusted);
        match visit(&validator) {
            Ok(()) => {
                debug!("validation passed");
                Ok(())
            }
            Err(violation) => {
                warn!(kind = ?violation.kind, name = %violation.name, "source rejected");
                Err(SandboxError::from(violation))
            }
        }
    }

    fn interpreter(&self, namespace: &Namespace, source: &str) -> Interpreter {
        Interpreter::new(Rc::clone(namespace.env()), self.imports.clone(), source)
    }

    fn execute(&self, namespace: &Namespace, source: &str, program: &Program) -> Result<()> {
        let outcome = self.interpreter(namespace, source).execute_program(program);
        report(&outcome);
        outcome
    }
}

fn trusted_keys(additional: Option<&Bindings>) -> Vec<String> {
    additional
        .map(|bindings| bindings.keys().cloned().collect())
        .unwrap_or_default()
}

fn report<T>(outcome: &Result<T>) {
    match outcome {
        Err(SandboxError::Security(violation)) => {
            warn!(kind = ?violation.kind, name = %violation.name, "execution halted");
        }
        Err(err) => debug!(error = %err, "execution failed"),
        Ok(_) => {}
    }
}

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    diagnostics::{Exception, ExceptionKind, Result, SandboxError, Violation, ViolationKind},
    policy::Policy,
    stdlib,
    value::Value,
};

/// Gatekeeper for every `import` executed inside the sandbox.
///
/// Allowlisted modules are handed over whole; their internals are not
/// sandboxed any further, so only modules that expose nothing dangerous
/// belong on the list.
#[derive(Clone)]
pub struct ImportMediator {
    policy: Arc<Policy>,
}

impl ImportMediator {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    /// Resolves `module`, refusing it before the host loader is touched when
    /// it is not on the allowlist.
    pub fn import(&self, module: &str) -> Result<Value> {
        if !self.policy.is_module_allowed(module) {
            warn!(module, "import refused by policy");
            return Err(SandboxError::from(Violation::new(
                ViolationKind::DisallowedImport,
                module,
            )));
        }
        match stdlib::load_module(module) {
            Some(value) => {
                debug!(module, "import granted");
                Ok(value)
            }
            None => Err(SandboxError::from(Exception::new(
                ExceptionKind::ImportError,
                format!("no module named `{module}`"),
            ))),
        }
    }
}

use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    diagnostics::{Result, SandboxError},
    namespace::Namespace,
    sandbox::Sandbox,
    value::Value,
};

/// Interactive console. Bindings accumulate across lines; every line is
/// validated on its own before it runs.
pub struct Repl {
    sandbox: Sandbox,
    namespace: Namespace,
}

impl Repl {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            namespace: sandbox.namespace(None),
            sandbox,
        }
    }

    /// Tries `source` as an expression first, then as statements.
    pub fn eval_line(&mut self, source: &str) -> Result<Option<Value>> {
        match self.sandbox.evaluate_in(&self.namespace, source) {
            Ok(value) => Ok(Some(value)),
            Err(SandboxError::Syntax(_)) => self
                .sandbox
                .run_in(&self.namespace, source)
                .map(|()| None),
            Err(err) => Err(err),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(|err| {
            SandboxError::from(std::io::Error::other(err))
        })?;
        let mut pending = String::new();
        loop {
            let prompt = if pending.is_empty() { ">> " } else { ".. " };
            match editor.readline(prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if pending.is_empty() && (trimmed == ":quit" || trimmed == ":exit") {
                        break;
                    }
                    if pending.is_empty() && trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    pending.push_str(&line);
                    pending.push('\n');
                    if open_braces(&pending) > 0 {
                        continue;
                    }
                    let source = std::mem::take(&mut pending);
                    match self.eval_line(source.trim()) {
                        Ok(Some(value)) if !value.is_none() => println!("{}", value.repr()),
                        Ok(_) => {}
                        Err(err) => eprintln!("{err}"),
                    }
                }
                Err(ReadlineError::Interrupted) if !pending.is_empty() => pending.clear(),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    return Err(SandboxError::from(std::io::Error::other(err)));
                }
            }
        }
        Ok(())
    }
}

// Rough block detection for multi-line input; quotes are not tracked.
fn open_braces(source: &str) -> i64 {
    source.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

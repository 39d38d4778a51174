use std::fmt;

use thiserror::Error;

/// Represents a byte span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }
}

/// 1-based line and column of a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Resolves a byte offset against the source it was taken from.
    pub fn locate(source: &str, offset: usize) -> Self {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Classification of a syntax diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
}

/// Syntax error surfaced by the lexer or parser.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub position: Option<Position>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            position: None,
            notes: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn locate(mut self, source: &str) -> Self {
        if let Some(span) = self.span {
            self.position = Some(Position::locate(source, span.start));
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error: {}", self.kind, self.message)?;
        match (self.position, self.span) {
            (Some(position), _) => write!(f, " at {position}")?,
            (None, Some(span)) => write!(f, " ({}..{})", span.start, span.end)?,
            (None, None) => {}
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    PrivateNameAccess,
    DisallowedImport,
    DisallowedBuiltin,
}

/// A refusal by the security boundary. Never catchable by sandboxed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub name: String,
    pub position: Option<Position>,
}

impl Violation {
    pub fn new(kind: ViolationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::PrivateNameAccess => {
                write!(f, "access to private name `{}` is not allowed", self.name)?
            }
            ViolationKind::DisallowedImport => {
                write!(f, "import of module `{}` is not allowed", self.name)?
            }
            ViolationKind::DisallowedBuiltin => {
                write!(f, "use of builtin `{}` is not allowed", self.name)?
            }
        }
        if let Some(position) = self.position {
            write!(f, " at {position}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Violation {}

/// Runtime exception classes raised by executing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    ImportError,
    /// A host operation (filesystem, process) failed.
    OsError,
    /// Raised explicitly with `raise`.
    Raised,
}

/// A failure of the sandboxed program itself, propagated as-is.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExceptionKind::Raised => write!(f, "Exception: {}", self.message)?,
            kind => write!(f, "{kind:?}: {}", self.message)?,
        }
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

/// Unified error type for the sandbox pipeline.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("SyntaxError: {0}")]
    Syntax(#[from] Diagnostic),
    #[error("SecurityViolation: {0}")]
    Security(#[from] Violation),
    #[error("{0}")]
    Runtime(#[from] Exception),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid policy: {0}")]
    Policy(String),
}

impl SandboxError {
    /// Attaches a location to errors raised without one.
    pub fn located(self, source: &str, span: SourceSpan) -> Self {
        match self {
            SandboxError::Runtime(exception) => SandboxError::Runtime(exception.with_span(span)),
            SandboxError::Security(violation) if violation.position.is_none() => {
                SandboxError::Security(violation.at(Position::locate(source, span.start)))
            }
            other => other,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            SandboxError::Security(violation) => Some(violation),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&Exception> {
        match self {
            SandboxError::Runtime(exception) => Some(exception),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_first_character() {
        assert_eq!(
            Position::locate("abc", 0),
            Position { line: 1, column: 1 }
        );
    }

    #[test]
    fn locates_after_newlines() {
        let source = "x = 1\ny = _z\n";
        let offset = source.find("_z").unwrap();
        assert_eq!(
            Position::locate(source, offset),
            Position { line: 2, column: 5 }
        );
    }

    #[test]
    fn clamps_offsets_past_the_end() {
        assert_eq!(Position::locate("ab", 99), Position { line: 1, column: 3 });
    }
}

//! Static pass over a parsed program that refuses privacy-marked names and
//! denylisted capabilities before anything runs.
//!
//! The check is lexical. Protocol methods such as `__eq` are reached through
//! operators without their names ever appearing at the call site, so a class
//! that defines them passes. That gap is accepted rather than patched; closing
//! it needs a capability-based object model, not a smarter name filter.

use std::collections::HashSet;

use crate::{
    ast::{Argument, Expr, ExprKind, FunctionDecl, Literal, Param, Program, Stmt, StmtKind},
    diagnostics::{Position, SourceSpan, Violation, ViolationKind},
    policy::{Policy, is_private},
};

pub struct Validator<'a> {
    policy: &'a Policy,
    source: &'a str,
    trusted: HashSet<&'a str>,
}

impl<'a> Validator<'a> {
    pub fn new(policy: &'a Policy, source: &'a str) -> Self {
        Self {
            policy,
            source,
            trusted: HashSet::new(),
        }
    }

    /// Names supplied by the embedding application. Denylisted names in this
    /// set may be referenced.
    pub fn trust<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.trusted.extend(names);
        self
    }

    pub fn validate_program(&self, program: &Program) -> Result<(), Violation> {
        self.visit_block(&program.items)
    }

    pub fn validate_expression(&self, expr: &Expr) -> Result<(), Violation> {
        self.visit_expr(expr)
    }

    fn visit_block(&self, statements: &[Stmt]) -> Result<(), Violation> {
        statements.iter().try_for_each(|stmt| self.visit_stmt(stmt))
    }

    fn visit_stmt(&self, stmt: &Stmt) -> Result<(), Violation> {
        match &stmt.kind {
            StmtKind::Expr(expr) | StmtKind::Raise(expr) => self.visit_expr(expr),
            StmtKind::Assign { target, value } => {
                self.visit_expr(target)?;
                self.visit_expr(value)
            }
            StmtKind::Function(decl) => self.visit_function(decl),
            StmtKind::Class { methods, .. } => {
                methods.iter().try_for_each(|decl| self.visit_function(decl))
            }
            StmtKind::Import { alias, .. } => match alias {
                Some(alias) => self.check_private(alias, stmt.span),
                None => Ok(()),
            },
            StmtKind::FromImport { names, .. } => names.iter().try_for_each(|import| {
                self.check_private(&import.name, import.span)?;
                match &import.alias {
                    Some(alias) => self.check_private(alias, import.span),
                    None => Ok(()),
                }
            }),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit_expr(condition)?;
                self.visit_block(then_branch)?;
                match else_branch {
                    Some(branch) => self.visit_block(branch),
                    None => Ok(()),
                }
            }
            StmtKind::While { condition, body } => {
                self.visit_expr(condition)?;
                self.visit_block(body)
            }
            StmtKind::Loop { body } => self.visit_block(body),
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                self.check_private(binding, stmt.span)?;
                self.visit_expr(iterable)?;
                self.visit_block(body)
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => {
                self.visit_block(body)?;
                if let Some(binding) = binding {
                    self.check_private(binding, stmt.span)?;
                }
                self.visit_block(handler)
            }
            StmtKind::Return(expr) | StmtKind::Break(expr) => match expr {
                Some(expr) => self.visit_expr(expr),
                None => Ok(()),
            },
            StmtKind::Continue => Ok(()),
        }
    }

    // Definition names (function, method, parameter) are not references.
    fn visit_function(&self, decl: &FunctionDecl) -> Result<(), Violation> {
        self.visit_params(&decl.params)?;
        self.visit_block(&decl.body)
    }

    fn visit_params(&self, params: &[Param]) -> Result<(), Violation> {
        params
            .iter()
            .filter_map(|param| param.default.as_ref())
            .try_for_each(|default| self.visit_expr(default))
    }

    fn visit_expr(&self, expr: &Expr) -> Result<(), Violation> {
        match &expr.kind {
            ExprKind::Literal(_) => Ok(()),
            ExprKind::Variable(name) => self.check_reference(name, expr.span),
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            ExprKind::Unary { expr, .. } | ExprKind::Group(expr) => self.visit_expr(expr),
            ExprKind::Call { callee, args } => {
                self.visit_expr(callee)?;
                args.iter().try_for_each(|arg| self.visit_argument(arg))
            }
            ExprKind::ArrayLiteral(elements) => {
                elements.iter().try_for_each(|element| self.visit_expr(element))
            }
            ExprKind::MapLiteral(entries) => entries.iter().try_for_each(|(key, value)| {
                self.visit_expr(key)?;
                self.visit_expr(value)
            }),
            ExprKind::Index { target, index } => {
                let mut key = index.as_ref();
                while let ExprKind::Group(inner) = &key.kind {
                    key = inner.as_ref();
                }
                if let ExprKind::Literal(Literal::String(name)) = &key.kind {
                    self.check_private(name, key.span)?;
                }
                self.visit_expr(target)?;
                self.visit_expr(index)
            }
            ExprKind::Field { target, field } => {
                self.visit_expr(target)?;
                let field_span =
                    SourceSpan::new(expr.span.end.saturating_sub(field.len()), expr.span.end);
                self.check_private(field, field_span)
            }
            ExprKind::Lambda { params, body } => {
                self.visit_params(params)?;
                self.visit_block(body)
            }
        }
    }

    fn visit_argument(&self, argument: &Argument) -> Result<(), Violation> {
        if let Some(name) = &argument.name {
            self.check_private(name, argument.span)?;
        }
        self.visit_expr(&argument.value)
    }

    fn check_reference(&self, name: &str, span: SourceSpan) -> Result<(), Violation> {
        self.check_private(name, span)?;
        if self.policy.is_denied(name) && !self.trusted.contains(name) {
            return Err(self.violation(ViolationKind::DisallowedBuiltin, name, span));
        }
        Ok(())
    }

    fn check_private(&self, name: &str, span: SourceSpan) -> Result<(), Violation> {
        if is_private(name) {
            return Err(self.violation(ViolationKind::PrivateNameAccess, name, span));
        }
        Ok(())
    }

    fn violation(&self, kind: ViolationKind, name: &str, span: SourceSpan) -> Violation {
        Violation::new(kind, name).at(Position::locate(self.source, span.start))
    }
}

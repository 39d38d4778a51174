use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::{Argument, BinaryOp, Expr, ExprKind, FunctionDecl, Literal, Param, Program, Stmt, StmtKind, UnaryOp},
    diagnostics::{
        Diagnostic, DiagnosticKind, Exception, ExceptionKind, Result, SandboxError, SourceSpan,
    },
    environment::{Environment, EnvironmentRef},
    imports::ImportMediator,
    value::{ClassValue, Instance, UserFunction, Value, ValueKind},
};

/// Tree-walking evaluator bound to one global namespace.
pub struct Interpreter {
    globals: EnvironmentRef,
    env: EnvironmentRef,
    imports: ImportMediator,
    source: Rc<str>,
}

enum FlowControl {
    Next,
    Return(Value),
    Break(Option<Value>),
    Continue,
}

impl Interpreter {
    pub fn new(globals: EnvironmentRef, imports: ImportMediator, source: &str) -> Self {
        Self {
            env: Rc::clone(&globals),
            globals,
            imports,
            source: Rc::from(source),
        }
    }

    pub fn globals(&self) -> &EnvironmentRef {
        &self.globals
    }

    /// Runs every statement of `program` in the global scope.
    pub fn execute_program(&mut self, program: &Program) -> Result<()> {
        for stmt in &program.items {
            match self.execute_statement(stmt)? {
                FlowControl::Next => {}
                FlowControl::Return(_) => break,
                FlowControl::Break(_) => return Err(self.misplaced("`break` outside loop", stmt)),
                FlowControl::Continue => {
                    return Err(self.misplaced("`continue` outside loop", stmt));
                }
            }
        }
        Ok(())
    }

    pub fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value> {
        self.evaluate(expr)
    }

    /// Parses and runs `source` in the global scope with no validation. Only
    /// reachable through the raw `exec` and `eval` capabilities.
    pub(crate) fn execute_unchecked(&mut self, source: &str, expression: bool) -> Result<Value> {
        let outer_source = std::mem::replace(&mut self.source, Rc::from(source));
        let outer_env = std::mem::replace(&mut self.env, Rc::clone(&self.globals));
        let result = if expression {
            crate::parser::parse_expression(source)
                .map_err(SandboxError::from)
                .and_then(|expr| self.evaluate(&expr))
        } else {
            crate::parser::parse_program(source)
                .map_err(SandboxError::from)
                .and_then(|program| self.execute_program(&program))
                .map(|()| Value::none())
        };
        self.env = outer_env;
        self.source = outer_source;
        result
    }

    fn misplaced(&self, message: &str, stmt: &Stmt) -> SandboxError {
        SandboxError::from(
            Diagnostic::new(DiagnosticKind::Parser, message)
                .with_span(stmt.span)
                .locate(&self.source),
        )
    }

    fn located(&self, err: SandboxError, span: SourceSpan) -> SandboxError {
        err.located(&self.source, span)
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.evaluate(expr)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.assign(target, value)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Function(decl) => {
                let function = self.make_function(Some(decl.name.clone()), &decl.params, &decl.body)?;
                self.env.borrow_mut().define(decl.name.clone(), function);
                Ok(FlowControl::Next)
            }
            StmtKind::Class { name, methods } => {
                let class = self.make_class(name, methods)?;
                self.env.borrow_mut().define(name.clone(), class);
                Ok(FlowControl::Next)
            }
            StmtKind::Import { module, alias } => {
                let value = self
                    .imports
                    .import(module)
                    .map_err(|err| self.located(err, stmt.span))?;
                let binding = alias
                    .clone()
                    .unwrap_or_else(|| module.rsplit('.').next().unwrap_or(module).to_string());
                self.env.borrow_mut().define(binding, value);
                Ok(FlowControl::Next)
            }
            StmtKind::FromImport { module, names } => {
                let value = self
                    .imports
                    .import(module)
                    .map_err(|err| self.located(err, stmt.span))?;
                let ValueKind::Module(loaded) = value.kind() else {
                    return Ok(FlowControl::Next);
                };
                for import in names {
                    let member = loaded.exports.get(&import.name).cloned().ok_or_else(|| {
                        SandboxError::from(
                            Exception::new(
                                ExceptionKind::ImportError,
                                format!("cannot import `{}` from `{module}`", import.name),
                            )
                            .with_span(import.span),
                        )
                    })?;
                    self.env.borrow_mut().define(import.binding(), member);
                }
                Ok(FlowControl::Next)
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break(_) => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Loop { body } => {
                loop {
                    match self.execute_block(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break(_) => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable)?;
                let items = self
                    .iterate(&iterable_value)
                    .map_err(|err| self.located(err, iterable.span))?;
                for item in items {
                    self.env.borrow_mut().define(binding.clone(), item);
                    match self.execute_block(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break(_) => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => match self.execute_block(body) {
                Err(SandboxError::Runtime(exception)) => {
                    if let Some(binding) = binding {
                        let mut details = IndexMap::new();
                        details.insert("kind".to_string(), Value::string(exception_name(exception.kind)));
                        details.insert("message".to_string(), Value::string(exception.message));
                        self.env.borrow_mut().define(binding.clone(), Value::map(details));
                    }
                    self.execute_block(handler)
                }
                other => other,
            },
            StmtKind::Raise(expr) => {
                let value = self.evaluate(expr)?;
                let message = self.stringify(&value)?;
                Err(SandboxError::from(
                    Exception::new(ExceptionKind::Raised, message).with_span(stmt.span),
                ))
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::none(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break(expr) => {
                let value = match expr {
                    Some(expr) => Some(self.evaluate(expr)?),
                    None => None,
                };
                Ok(FlowControl::Break(value))
            }
            StmtKind::Continue => Ok(FlowControl::Continue),
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        for stmt in statements {
            match self.execute_statement(stmt)? {
                FlowControl::Next => {}
                other => return Ok(other),
            }
        }
        Ok(FlowControl::Next)
    }

    fn make_function(
        &mut self,
        name: Option<String>,
        params: &[Param],
        body: &[Stmt],
    ) -> Result<Value> {
        let mut defaults = Vec::with_capacity(params.len());
        for param in params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.evaluate(expr)?),
                None => None,
            });
        }
        Ok(Value::new(ValueKind::Function(UserFunction {
            name,
            params: params.iter().map(|p| p.name.clone()).collect(),
            defaults,
            body: body.to_vec(),
            env: Rc::clone(&self.env),
        })))
    }

    fn make_class(&mut self, name: &str, methods: &[FunctionDecl]) -> Result<Value> {
        let mut table = IndexMap::new();
        for decl in methods {
            let method = self.make_function(
                Some(format!("{name}.{}", decl.name)),
                &decl.params,
                &decl.body,
            )?;
            table.insert(decl.name.clone(), method);
        }
        Ok(Value::new(ValueKind::Class(ClassValue {
            name: name.to_string(),
            methods: table,
        })))
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.env.borrow_mut().define(name.clone(), value);
                Ok(())
            }
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let owner_value = self.evaluate(owner)?;
                self.set_attribute(&owner_value, field, value)
                    .map_err(|err| self.located(err, target.span))
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let owner_value = self.evaluate(owner)?;
                let index_value = self.evaluate(index)?;
                self.set_index(&owner_value, &index_value, value)
                    .map_err(|err| self.located(err, target.span))
            }
            _ => Err(SandboxError::from(
                Exception::new(ExceptionKind::TypeError, "invalid assignment target")
                    .with_span(target.span),
            )),
        }
    }

    pub(crate) fn set_attribute(&mut self, owner: &Value, field: &str, value: Value) -> Result<()> {
        match owner.kind() {
            ValueKind::Instance(instance) => {
                instance.fields.borrow_mut().insert(field.to_string(), value);
                Ok(())
            }
            ValueKind::Map(map) => {
                map.borrow_mut().insert(field.to_string(), value);
                Ok(())
            }
            ValueKind::Module(module) => Err(SandboxError::from(Exception::new(
                ExceptionKind::AttributeError,
                format!("module `{}` is read-only", module.name),
            ))),
            _ => Err(SandboxError::from(Exception::new(
                ExceptionKind::AttributeError,
                format!("cannot set attribute `{field}` on {}", owner.type_name()),
            ))),
        }
    }

    fn set_index(&mut self, owner: &Value, index: &Value, value: Value) -> Result<()> {
        match owner.kind() {
            ValueKind::Array(elements) => {
                let mut elements = elements.borrow_mut();
                let idx = resolve_index(index, elements.len())?;
                elements[idx] = value;
                Ok(())
            }
            ValueKind::Map(map) => {
                let key = map_key(index)?;
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            _ => Err(SandboxError::from(Exception::new(
                ExceptionKind::TypeError,
                format!("{} does not support item assignment", owner.type_name()),
            ))),
        }
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Variable(name) => Environment::get(&self.env, name, expr.span),
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if left_value.is_truthy() {
                    self.evaluate(right)
                } else {
                    Ok(left_value)
                }
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if left_value.is_truthy() {
                    Ok(left_value)
                } else {
                    self.evaluate(right)
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left_value = self.evaluate(left)?;
                let right_value = self.evaluate(right)?;
                self.binary(*op, &left_value, &right_value)
                    .map_err(|err| self.located(err, expr.span))
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
                    UnaryOp::Negate => match value.kind() {
                        ValueKind::Int(n) => n.checked_neg().map(Value::int).ok_or_else(|| {
                            overflow().with_span(expr.span).into()
                        }),
                        ValueKind::Float(n) => Ok(Value::float(-n)),
                        _ => Err(SandboxError::from(
                            Exception::new(
                                ExceptionKind::TypeError,
                                format!("bad operand type for unary `-`: {}", value.type_name()),
                            )
                            .with_span(expr.span),
                        )),
                    },
                }
            }
            ExprKind::Call { callee, args } => {
                let callee_value = self.evaluate(callee)?;
                let (positional, keywords) = self.evaluate_arguments(args)?;
                self.call_value(&callee_value, positional, keywords)
                    .map_err(|err| self.located(err, expr.span))
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::MapLiteral(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key_value = self.evaluate(key_expr)?;
                    let key = map_key(&key_value).map_err(|err| self.located(err, key_expr.span))?;
                    let value = self.evaluate(value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(target)?;
                let index_value = self.evaluate(index)?;
                self.index(&target_value, &index_value)
                    .map_err(|err| self.located(err, expr.span))
            }
            ExprKind::Field { target, field } => {
                let target_value = self.evaluate(target)?;
                self.get_attribute(&target_value, field)
                    .map_err(|err| self.located(err, expr.span))
            }
            ExprKind::Lambda { params, body } => self.make_function(None, params, body),
        }
    }

    fn evaluate_arguments(&mut self, args: &[Argument]) -> Result<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            let value = self.evaluate(&arg.value)?;
            match &arg.name {
                Some(name) => keywords.push((name.clone(), value)),
                None => positional.push(value),
            }
        }
        Ok((positional, keywords))
    }

    /// Calls any callable value. Used by natives that need to call back into
    /// script code.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        mut positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(native) => {
                if let Some((name, _)) = keywords.first() {
                    return Err(type_error(format!(
                        "`{}` does not accept keyword argument `{name}`",
                        native.name
                    )));
                }
                native.call(self, &positional)
            }
            ValueKind::Function(function) => self.call_function(function, positional, keywords),
            ValueKind::BoundMethod { receiver, method } => {
                positional.insert(0, receiver.clone());
                self.call_value(method, positional, keywords)
            }
            ValueKind::Class(class) => {
                let instance = Value::new(ValueKind::Instance(Instance {
                    class: callee.clone(),
                    fields: RefCell::new(IndexMap::new()),
                }));
                match class.methods.get("__init") {
                    Some(init) => {
                        positional.insert(0, instance.clone());
                        self.call_value(init, positional, keywords)?;
                    }
                    None if !positional.is_empty() || !keywords.is_empty() => {
                        return Err(type_error(format!(
                            "`{}` takes no arguments",
                            class.name
                        )));
                    }
                    None => {}
                }
                Ok(instance)
            }
            _ => Err(type_error(format!(
                "{} value is not callable",
                callee.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &UserFunction,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Value> {
        let name = function.name.as_deref().unwrap_or("anonymous");
        if positional.len() > function.params.len() {
            return Err(type_error(format!(
                "`{name}` takes {} arguments but {} were given",
                function.params.len(),
                positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; function.params.len()];
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }
        for (keyword, value) in keywords {
            let Some(idx) = function.params.iter().position(|p| *p == keyword) else {
                return Err(type_error(format!(
                    "`{name}` got an unexpected keyword argument `{keyword}`"
                )));
            };
            if slots[idx].is_some() {
                return Err(type_error(format!(
                    "`{name}` got multiple values for argument `{keyword}`"
                )));
            }
            slots[idx] = Some(value);
        }

        let frame = Environment::with_parent(Rc::clone(&function.env));
        for ((param, slot), default) in function.params.iter().zip(slots).zip(&function.defaults) {
            let value = slot.or_else(|| default.clone()).ok_or_else(|| {
                type_error(format!("`{name}` missing required argument `{param}`"))
            })?;
            frame.borrow_mut().define(param.clone(), value);
        }

        let prev = std::mem::replace(&mut self.env, frame);
        let flow = self.execute_block(&function.body);
        self.env = prev;
        match flow? {
            FlowControl::Next => Ok(Value::none()),
            FlowControl::Return(value) => Ok(value),
            FlowControl::Break(_) | FlowControl::Continue => Err(type_error(
                "loop control flow cannot escape a function",
            )),
        }
    }

    pub(crate) fn get_attribute(&mut self, target: &Value, field: &str) -> Result<Value> {
        match target.kind() {
            ValueKind::Instance(instance) => {
                if let Some(value) = instance.fields.borrow().get(field) {
                    return Ok(value.clone());
                }
                instance
                    .method(field)
                    .map(|method| {
                        Value::new(ValueKind::BoundMethod {
                            receiver: target.clone(),
                            method,
                        })
                    })
                    .ok_or_else(|| missing_attribute(instance.class_name(), field))
            }
            ValueKind::Class(class) => class
                .methods
                .get(field)
                .cloned()
                .ok_or_else(|| missing_attribute(&class.name, field)),
            ValueKind::Module(module) => module
                .exports
                .get(field)
                .cloned()
                .ok_or_else(|| missing_attribute(&module.name, field)),
            ValueKind::Map(map) => map.borrow().get(field).cloned().ok_or_else(|| {
                SandboxError::from(Exception::new(
                    ExceptionKind::KeyError,
                    format!("missing key `{field}`"),
                ))
            }),
            _ => Err(missing_attribute(target.type_name(), field)),
        }
    }

    pub(crate) fn has_attribute(&self, target: &Value, field: &str) -> bool {
        match target.kind() {
            ValueKind::Instance(instance) => {
                instance.fields.borrow().contains_key(field) || instance.method(field).is_some()
            }
            ValueKind::Class(class) => class.methods.contains_key(field),
            ValueKind::Module(module) => module.exports.contains_key(field),
            ValueKind::Map(map) => map.borrow().contains_key(field),
            _ => false,
        }
    }

    fn index(&mut self, target: &Value, index: &Value) -> Result<Value> {
        match target.kind() {
            ValueKind::Array(values) => {
                let values = values.borrow();
                let idx = resolve_index(index, values.len())?;
                Ok(values[idx].clone())
            }
            ValueKind::String(text) => {
                let chars: Vec<char> = text.chars().collect();
                let idx = resolve_index(index, chars.len())?;
                Ok(Value::string(chars[idx].to_string()))
            }
            ValueKind::Map(map) => {
                let key = map_key(index)?;
                map.borrow().get(&key).cloned().ok_or_else(|| {
                    SandboxError::from(Exception::new(
                        ExceptionKind::KeyError,
                        format!("missing key `{key}`"),
                    ))
                })
            }
            _ => Err(type_error(format!(
                "{} is not subscriptable",
                target.type_name()
            ))),
        }
    }

    pub(crate) fn iterate(&mut self, value: &Value) -> Result<Vec<Value>> {
        match value.kind() {
            ValueKind::Array(values) => Ok(values.borrow().clone()),
            ValueKind::String(text) => {
                Ok(text.chars().map(|c| Value::string(c.to_string())).collect())
            }
            ValueKind::Map(map) => Ok(map.borrow().keys().cloned().map(Value::string).collect()),
            _ => Err(type_error(format!("{} is not iterable", value.type_name()))),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        use BinaryOp::*;
        match op {
            Equal => Ok(Value::bool(self.values_equal(left, right)?)),
            NotEqual => Ok(Value::bool(!self.values_equal(left, right)?)),
            Less => Ok(Value::bool(self.less_than(left, right)?)),
            Greater => Ok(Value::bool(self.less_than(right, left)?)),
            LessEqual => Ok(Value::bool(!self.less_than(right, left)?)),
            GreaterEqual => Ok(Value::bool(!self.less_than(left, right)?)),
            Add => self.add(left, right),
            Sub => arithmetic(op, left, right),
            Mul => match (left.kind(), right.kind()) {
                (ValueKind::String(text), ValueKind::Int(n))
                | (ValueKind::Int(n), ValueKind::String(text)) => {
                    let count = usize::try_from((*n).max(0)).map_err(|_| overflow())?;
                    text.len().checked_mul(count).ok_or_else(overflow)?;
                    Ok(Value::string(text.repeat(count)))
                }
                _ => arithmetic(op, left, right),
            },
            Div | Mod => arithmetic(op, left, right),
            And | Or => Ok(Value::bool(match op {
                And => left.is_truthy() && right.is_truthy(),
                _ => left.is_truthy() || right.is_truthy(),
            })),
        }
    }

    fn add(&mut self, left: &Value, right: &Value) -> Result<Value> {
        match (left.kind(), right.kind()) {
            (ValueKind::String(a), ValueKind::String(b)) => Ok(Value::string(format!("{a}{b}"))),
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                let mut joined = a.borrow().clone();
                joined.extend(b.borrow().iter().cloned());
                Ok(Value::array(joined))
            }
            (ValueKind::Instance(instance), _) => match instance.method("__add") {
                Some(method) => {
                    self.call_value(&method, vec![left.clone(), right.clone()], Vec::new())
                }
                None => Err(unsupported("+", left, right)),
            },
            _ => arithmetic(BinaryOp::Add, left, right),
        }
    }

    /// Equality, dispatching to a user-defined `__eq` when either side has one.
    pub(crate) fn values_equal(&mut self, left: &Value, right: &Value) -> Result<bool> {
        for (receiver, other) in [(left, right), (right, left)] {
            if let ValueKind::Instance(instance) = receiver.kind() {
                if let Some(method) = instance.method("__eq") {
                    let result =
                        self.call_value(&method, vec![receiver.clone(), other.clone()], Vec::new())?;
                    return Ok(result.is_truthy());
                }
            }
        }
        Ok(match (left.kind(), right.kind()) {
            (ValueKind::None, ValueKind::None) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::Int(_) | ValueKind::Float(_)) => {
                left.as_float() == right.as_float()
            }
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (l, r) in a.iter().zip(b.iter()) {
                    if !self.values_equal(l, r)? {
                        return Ok(false);
                    }
                }
                true
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, value) in &a {
                    match b.get(key) {
                        Some(other) if self.values_equal(value, other)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (ValueKind::NativeFunction(a), ValueKind::NativeFunction(b)) => {
                a.name == b.name && std::ptr::fn_addr_eq(a.callback, b.callback)
            }
            _ => left.same_object(right),
        })
    }

    /// Ordering, dispatching to a user-defined `__lt` on the left operand.
    pub(crate) fn less_than(&mut self, left: &Value, right: &Value) -> Result<bool> {
        match (left.kind(), right.kind()) {
            (ValueKind::Int(a), ValueKind::Int(b)) => Ok(a < b),
            (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::Int(_) | ValueKind::Float(_)) => {
                Ok(left.as_float() < right.as_float())
            }
            (ValueKind::String(a), ValueKind::String(b)) => Ok(a < b),
            (ValueKind::Instance(instance), _) => match instance.method("__lt") {
                Some(method) => Ok(self
                    .call_value(&method, vec![left.clone(), right.clone()], Vec::new())?
                    .is_truthy()),
                None => Err(unsupported("<", left, right)),
            },
            _ => Err(unsupported("<", left, right)),
        }
    }

    /// String conversion, dispatching to a user-defined `__str`.
    pub(crate) fn stringify(&mut self, value: &Value) -> Result<String> {
        if let ValueKind::Instance(instance) = value.kind() {
            if let Some(method) = instance.method("__str") {
                let result = self.call_value(&method, vec![value.clone()], Vec::new())?;
                return match result.as_str() {
                    Some(text) => Ok(text.to_string()),
                    None => Err(type_error(format!(
                        "`__str` returned {} instead of String",
                        result.type_name()
                    ))),
                };
            }
        }
        Ok(value.to_string())
    }

    /// Length, dispatching to a user-defined `__len`.
    pub(crate) fn length(&mut self, value: &Value) -> Result<i64> {
        match value.kind() {
            ValueKind::String(s) => Ok(s.chars().count() as i64),
            ValueKind::Array(values) => Ok(values.borrow().len() as i64),
            ValueKind::Map(map) => Ok(map.borrow().len() as i64),
            ValueKind::Instance(instance) => match instance.method("__len") {
                Some(method) => {
                    let result = self.call_value(&method, vec![value.clone()], Vec::new())?;
                    result
                        .as_int()
                        .ok_or_else(|| type_error("`__len` must return Int"))
                }
                None => Err(type_error(format!(
                    "object of type {} has no len()",
                    instance.class_name()
                ))),
            },
            _ => Err(type_error(format!(
                "object of type {} has no len()",
                value.type_name()
            ))),
        }
    }
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.clone()),
        Literal::None => Value::none(),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(zero_division());
                }
                return Ok(Value::float(a as f64 / b as f64));
            }
            _ => {
                if b == 0 {
                    return Err(zero_division());
                }
                a.checked_rem_euclid(b).map(|r| if b < 0 && r != 0 { r + b } else { r })
            }
        };
        return result.map(Value::int).ok_or_else(|| overflow().into());
    }
    let (Some(a), Some(b)) = (numeric(left), numeric(right)) else {
        return Err(unsupported(symbol, left, right));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a / b
        }
        _ => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a - b * (a / b).floor()
        }
    };
    Ok(Value::float(result))
}

fn numeric(value: &Value) -> Option<f64> {
    match value.kind() {
        ValueKind::Int(n) => Some(*n as f64),
        ValueKind::Float(n) => Some(*n),
        _ => None,
    }
}

fn resolve_index(index: &Value, len: usize) -> Result<usize> {
    let Some(raw) = index.as_int() else {
        return Err(type_error(format!(
            "indices must be Int, not {}",
            index.type_name()
        )));
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(SandboxError::from(Exception::new(
            ExceptionKind::IndexError,
            format!("index {raw} out of range"),
        )));
    }
    Ok(resolved as usize)
}

pub(crate) fn map_key(value: &Value) -> Result<String> {
    match value.kind() {
        ValueKind::String(s) => Ok(s.clone()),
        ValueKind::Int(n) => Ok(n.to_string()),
        _ => Err(type_error(format!(
            "map keys must be String or Int, not {}",
            value.type_name()
        ))),
    }
}

pub(crate) fn exception_name(kind: ExceptionKind) -> &'static str {
    match kind {
        ExceptionKind::NameError => "NameError",
        ExceptionKind::TypeError => "TypeError",
        ExceptionKind::ValueError => "ValueError",
        ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        ExceptionKind::IndexError => "IndexError",
        ExceptionKind::KeyError => "KeyError",
        ExceptionKind::AttributeError => "AttributeError",
        ExceptionKind::ImportError => "ImportError",
        ExceptionKind::OsError => "OsError",
        ExceptionKind::Raised => "Exception",
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> SandboxError {
    SandboxError::from(Exception::new(ExceptionKind::TypeError, message))
}

fn zero_division() -> SandboxError {
    SandboxError::from(Exception::new(
        ExceptionKind::ZeroDivisionError,
        "division by zero",
    ))
}

fn overflow() -> Exception {
    Exception::new(ExceptionKind::ValueError, "integer overflow")
}

fn unsupported(symbol: &str, left: &Value, right: &Value) -> SandboxError {
    type_error(format!(
        "unsupported operand types for `{symbol}`: {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

fn missing_attribute(owner: &str, field: &str) -> SandboxError {
    SandboxError::from(Exception::new(
        ExceptionKind::AttributeError,
        format!("`{owner}` has no attribute `{field}`"),
    ))
}

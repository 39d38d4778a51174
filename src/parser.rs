use crate::{
    ast::{
        Argument, BinaryOp, Expr, ExprKind, FunctionDecl, ImportName, Literal, Param, Program,
        Stmt, StmtKind, UnaryOp,
    },
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

/// Parses `source` as a sequence of statements.
pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|err| err.locate(source))?;
    Parser::new(tokens)
        .parse_program()
        .map_err(|err| err.locate(source))
}

/// Parses `source` as exactly one expression.
pub fn parse_expression(source: &str) -> Result<Expr, Diagnostic> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|err| err.locate(source))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression().map_err(|err| err.locate(source))?;
    parser.expect_end().map_err(|err| err.locate(source))?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        Ok(Program { items })
    }

    fn expect_end(&mut self) -> Result<(), Diagnostic> {
        match self.peek() {
            Some(token) if token.kind != TokenKind::Eof => {
                Err(self.error(token, "unexpected input after expression"))
            }
            _ => Ok(()),
        }
    }

    fn parse_module_path(&mut self) -> Result<(String, SourceSpan), Diagnostic> {
        let name_token = self.consume_path_segment("expected module name")?;
        let start = name_token.span.start;
        let mut end = name_token.span.end;
        let mut segments = vec![name_token.lexeme.clone()];
        while self.matches(TokenKind::Dot) {
            let segment = self.consume_path_segment("expected module segment after `.`")?;
            end = segment.span.end;
            segments.push(segment.lexeme.clone());
        }
        Ok((segments.join("."), SourceSpan { start, end }))
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` to close block")?;
        Ok((items, lbrace.span.to(rbrace.span)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Fn) => {
                    let decl = self.parse_function()?;
                    return Ok(Stmt {
                        span: decl.span,
                        kind: StmtKind::Function(decl),
                    });
                }
                TokenKind::Keyword(Keyword::Class) => return self.parse_class(),
                TokenKind::Keyword(Keyword::Import) => return self.parse_import(),
                TokenKind::Keyword(Keyword::From) => return self.parse_from_import(),
                TokenKind::Keyword(Keyword::If) => return self.parse_if(),
                TokenKind::Keyword(Keyword::While) => return self.parse_while(),
                TokenKind::Keyword(Keyword::Loop) => return self.parse_loop(),
                TokenKind::Keyword(Keyword::For) => return self.parse_for(),
                TokenKind::Keyword(Keyword::Try) => return self.parse_try(),
                TokenKind::Keyword(Keyword::Raise) => return self.parse_raise(),
                TokenKind::Keyword(Keyword::Return) => return self.parse_return(),
                TokenKind::Keyword(Keyword::Break) => return self.parse_break(),
                TokenKind::Keyword(Keyword::Continue) => return self.parse_continue(),
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, Diagnostic> {
        let start_token = self.consume_keyword(Keyword::Fn)?;
        let name_token = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.matches(TokenKind::Comma) || self.check(TokenKind::RParen) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let (body, span) = self.parse_block()?;
        Ok(FunctionDecl {
            name: name_token.lexeme.clone(),
            params,
            body,
            span: start_token.span.to(span),
        })
    }

    fn parse_param(&mut self) -> Result<Param, Diagnostic> {
        let name = self.consume_identifier("expected parameter name")?;
        let default = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Param {
            name: name.lexeme.clone(),
            default,
            span: name.span,
        })
    }

    fn parse_class(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Class)?.span;
        let name = self.consume_identifier("expected class name")?;
        self.consume(TokenKind::LBrace, "expected `{` after class name")?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if !self.check(TokenKind::Keyword(Keyword::Fn)) {
                let token = self.peek().cloned();
                return Err(match token {
                    Some(token) => self.error(&token, "class bodies may only contain methods"),
                    None => self.error_eof("class bodies may only contain methods"),
                });
            }
            methods.push(self.parse_function()?);
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after class body")?;
        Ok(Stmt {
            span: start.to(rbrace.span),
            kind: StmtKind::Class {
                name: name.lexeme.clone(),
                methods,
            },
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let import_token = self.consume_keyword(Keyword::Import)?;
        let (module, mut span) = self.parse_module_path()?;
        let alias = if self.matches_keyword(Keyword::As) {
            let alias_token = self.consume_identifier("expected alias after `as`")?;
            span = alias_token.span;
            Some(alias_token.lexeme.clone())
        } else {
            None
        };
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: import_token.span.to(span),
            kind: StmtKind::Import { module, alias },
        })
    }

    fn parse_from_import(&mut self) -> Result<Stmt, Diagnostic> {
        let from_token = self.consume_keyword(Keyword::From)?;
        let (module, _) = self.parse_module_path()?;
        self.consume_keyword(Keyword::Import)?;
        let mut names = Vec::new();
        loop {
            let name = self.consume_identifier("expected name to import")?;
            let mut span = name.span;
            let alias = if self.matches_keyword(Keyword::As) {
                let alias_token = self.consume_identifier("expected alias after `as`")?;
                span = span.to(alias_token.span);
                Some(alias_token.lexeme.clone())
            } else {
                None
            };
            names.push(ImportName {
                name: name.lexeme.clone(),
                alias,
                span,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume_optional_semicolon();
        let end = self.previous().span;
        Ok(Stmt {
            span: from_token.span.to(end),
            kind: StmtKind::FromImport { module, names },
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span;
        let condition = self.parse_expression()?;
        let (then_branch, mut span) = self.parse_block()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let else_if = self.parse_if()?;
                span = else_if.span;
                Some(vec![else_if])
            } else {
                let (branch, else_span) = self.parse_block()?;
                span = else_span;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Loop)?.span;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::Loop { body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span;
        let binding = self.consume_identifier("expected loop binding")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::For {
                binding: binding.lexeme.clone(),
                iterable,
                body,
            },
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Try)?.span;
        let (body, _) = self.parse_block()?;
        self.consume_keyword(Keyword::Catch)?;
        let binding = if self.check(TokenKind::Identifier) {
            Some(self.advance().lexeme)
        } else {
            None
        };
        let (handler, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::Try {
                body,
                binding,
                handler,
            },
        })
    }

    fn parse_raise(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Raise)?.span;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: start.to(value.span),
            kind: StmtKind::Raise(value),
        })
    }

    fn at_statement_end(&self) -> bool {
        self.check(TokenKind::Semicolon) || self.check(TokenKind::RBrace) || self.is_at_end()
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let expr = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        let end = expr.as_ref().map(|e| e.span).unwrap_or(token.span);
        Ok(Stmt {
            span: token.span.to(end),
            kind: StmtKind::Return(expr),
        })
    }

    fn parse_break(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Break)?;
        let expr = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        let end = expr.as_ref().map(|e| e.span).unwrap_or(token.span);
        Ok(Stmt {
            span: token.span.to(end),
            kind: StmtKind::Break(expr),
        })
    }

    fn parse_continue(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Continue)?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: token.span,
            kind: StmtKind::Continue,
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().span;
            let value = self.parse_expression()?;
            self.consume_optional_semicolon();
            return match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => {
                    Ok(Stmt {
                        span: expr.span.to(value.span),
                        kind: StmtKind::Assign {
                            target: expr,
                            value,
                        },
                    })
                }
                _ => Err(
                    Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                        .with_span(equals),
                ),
            };
        }
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::DoublePipe) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches(TokenKind::DoubleAmpersand) {
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        while let Some(op) = if self.matches(TokenKind::EqualEqual) {
            Some(BinaryOp::Equal)
        } else if self.matches(TokenKind::BangEqual) {
            Some(BinaryOp::NotEqual)
        } else {
            None
        } {
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        while let Some(op) = if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        while let Some(op) = if self.matches(TokenKind::Plus) {
            Some(BinaryOp::Add)
        } else if self.matches(TokenKind::Minus) {
            Some(BinaryOp::Sub)
        } else {
            None
        } {
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = if self.matches(TokenKind::Star) {
            Some(BinaryOp::Mul)
        } else if self.matches(TokenKind::Slash) {
            Some(BinaryOp::Div)
        } else if self.matches(TokenKind::Percent) {
            Some(BinaryOp::Mod)
        } else {
            None
        } {
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.parse_call();
        };
        let operator = self.previous().span;
        let right = self.parse_unary()?;
        Ok(Expr {
            span: operator.to(right.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let args = self.parse_arguments()?;
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: expr.span.to(paren.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: expr.span.to(bracket.span),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_identifier("expected field after `.`")?;
                expr = Expr {
                    span: expr.span.to(ident.span),
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: ident.lexeme.clone(),
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, Diagnostic> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            let is_keyword = self.check(TokenKind::Identifier)
                && self
                    .peek_next()
                    .is_some_and(|token| token.kind == TokenKind::Assign);
            let argument = if is_keyword {
                let name = self.advance();
                self.advance();
                let value = self.parse_expression()?;
                Argument {
                    span: name.span.to(value.span),
                    name: Some(name.lexeme),
                    value,
                }
            } else {
                let value = self.parse_expression()?;
                Argument {
                    span: value.span,
                    name: None,
                    value,
                }
            };
            if argument.name.is_none() && args.iter().any(|a: &Argument| a.name.is_some()) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parser,
                    "positional argument follows keyword argument",
                )
                .with_span(argument.span));
            }
            args.push(argument);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => Ok(self.literal(Literal::Bool(true))),
            TokenKind::Keyword(Keyword::False) => Ok(self.literal(Literal::Bool(false))),
            TokenKind::Keyword(Keyword::None) => Ok(self.literal(Literal::None)),
            TokenKind::Number => {
                let digits = token.lexeme.replace('_', "");
                let literal = if digits.contains(['.', 'e', 'E']) {
                    Literal::Float(digits.parse().map_err(|_| {
                        self.error(&token, "invalid float literal")
                    })?)
                } else {
                    Literal::Int(digits.parse().map_err(|_| {
                        self.error(&token, "integer literal out of range")
                    })?)
                };
                Ok(self.literal(literal))
            }
            TokenKind::String => Ok(self.literal(Literal::String(token.lexeme.clone()))),
            TokenKind::Identifier => {
                let tok = self.advance();
                Ok(Expr {
                    span: tok.span,
                    kind: ExprKind::Variable(tok.lexeme),
                })
            }
            TokenKind::LParen => {
                let lparen = self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(Expr {
                    span: lparen.span.to(rparen.span),
                    kind: ExprKind::Group(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                let lbracket = self.advance();
                let mut elements = Vec::new();
                while !self.check(TokenKind::RBracket) {
                    elements.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after array literal")?;
                Ok(Expr {
                    span: lbracket.span.to(rbracket.span),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_inline_map(),
            TokenKind::Pipe | TokenKind::DoublePipe => self.parse_lambda(),
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn literal(&mut self, literal: Literal) -> Expr {
        let tok = self.advance();
        Expr {
            span: tok.span,
            kind: ExprKind::Literal(literal),
        }
    }

    fn parse_inline_map(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.parse_expression()?;
            self.consume(TokenKind::Colon, "expected `:` in map literal")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after map literal")?;
        Ok(Expr {
            span: lbrace.span.to(rbrace.span),
            kind: ExprKind::MapLiteral(entries),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, Diagnostic> {
        let opening = self.advance();
        let mut params = Vec::new();
        if opening.kind == TokenKind::Pipe {
            while !self.check(TokenKind::Pipe) {
                let param = self.consume_identifier("expected parameter in lambda")?;
                params.push(Param {
                    name: param.lexeme.clone(),
                    default: None,
                    span: param.span,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::Pipe, "expected closing `|` in lambda")?;
        }
        let body_expr = self.parse_expression()?;
        let span = opening.span.to(body_expr.span);
        let body = vec![Stmt {
            span: body_expr.span,
            kind: StmtKind::Return(Some(body_expr)),
        }];
        Ok(Expr {
            span,
            kind: ExprKind::Lambda { params, body },
        })
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Keyword(keyword.clone()) {
                Ok(self.advance())
            } else {
                Err(self.error(
                    token,
                    &format!("expected keyword `{}`", format!("{keyword:?}").to_lowercase()),
                ))
            }
        } else {
            Err(self.error_eof("unexpected end of input"))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn consume_path_segment(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Identifier | TokenKind::Keyword(_) => Ok(self.advance()),
                _ => Err(self.error(token, message)),
            }
        } else {
            Err(self.error_eof(message))
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let message = if token.kind == TokenKind::Eof {
            format!("{message}, found end of input")
        } else {
            format!("{message}, found `{}`", token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parser, message).with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

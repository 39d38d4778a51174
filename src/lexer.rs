use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    Fn,
    Class,
    If,
    Else,
    While,
    Loop,
    For,
    In,
    Break,
    Continue,
    Return,
    Import,
    From,
    As,
    Raise,
    Try,
    Catch,
    True,
    False,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pipe,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// Character after the peeked one, without consuming anything.
    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            while let Some((_, ch)) = self.peek() {
                if ch.is_whitespace() {
                    self.bump();
                } else {
                    break;
                }
            }

            match (self.peek(), self.peek_second()) {
                (Some((_, '/')), Some('/')) => {
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some((start, '/')), Some('*')) => {
                    self.bump();
                    self.bump();
                    let mut depth = 1;
                    while depth > 0 {
                        match self.bump() {
                            Some((_, '/')) if self.match_next('*') => depth += 1,
                            Some((_, '*')) if self.match_next('/') => depth -= 1,
                            Some(_) => {}
                            None => {
                                return Err(Diagnostic::new(
                                    DiagnosticKind::Lexer,
                                    "unterminated block comment",
                                )
                                .with_span(SourceSpan::new(start, self.current)));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
        }
    }

    fn number_literal(&mut self, start: usize) -> Token {
        let mut end = self.current;
        let mut seen_dot = false;
        while let Some((idx, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                    end = idx + 1;
                }
                // `1.foo` is attribute access on a number, not a float.
                '.' if !seen_dot && self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                    seen_dot = true;
                    self.bump();
                    end = idx + 1;
                }
                'e' | 'E' => {
                    self.bump();
                    end = idx + 1;
                    if let Some((sign_idx, '+' | '-')) = self.peek() {
                        self.bump();
                        end = sign_idx + 1;
                    }
                }
                _ => break,
            }
        }
        let lexeme = self.source[start..end].to_string();
        Token {
            kind: TokenKind::Number,
            lexeme,
            span: SourceSpan { start, end },
        }
    }

    fn string_literal(&mut self, start: usize, quote: char) -> Result<Token, Diagnostic> {
        let mut end = self.current;
        let mut value = String::new();
        while let Some((idx, ch)) = self.bump() {
            end = idx + ch.len_utf8();
            match ch {
                c if c == quote => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: SourceSpan { start, end },
                    });
                }
                '\\' => {
                    if let Some((esc_idx, esc)) = self.bump() {
                        end = esc_idx + esc.len_utf8();
                        match esc {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            '0' => value.push('\0'),
                            other => value.push(other),
                        }
                    } else {
                        break;
                    }
                }
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(SourceSpan { start, end }),
        )
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan {
                            start: self.current,
                            end: self.current,
                        },
                    });
                    break;
                }
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' | '\'' => self.string_literal(start, ch)?,
                '(' => self.simple_token(start, TokenKind::LParen),
                ')' => self.simple_token(start, TokenKind::RParen),
                '{' => self.simple_token(start, TokenKind::LBrace),
                '}' => self.simple_token(start, TokenKind::RBrace),
                '[' => self.simple_token(start, TokenKind::LBracket),
                ']' => self.simple_token(start, TokenKind::RBracket),
                ',' => self.simple_token(start, TokenKind::Comma),
                '.' => self.simple_token(start, TokenKind::Dot),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                ':' => self.simple_token(start, TokenKind::Colon),
                '+' => self.simple_token(start, TokenKind::Plus),
                '-' => self.simple_token(start, TokenKind::Minus),
                '*' => self.simple_token(start, TokenKind::Star),
                '/' => self.simple_token(start, TokenKind::Slash),
                '%' => self.simple_token(start, TokenKind::Percent),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqualEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::BangEqual)
                    } else {
                        self.simple_token(start, TokenKind::Bang)
                    }
                }
                '&' if self.match_next('&') => {
                    self.simple_token(start, TokenKind::DoubleAmpersand)
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token(start, TokenKind::DoublePipe)
                    } else {
                        self.simple_token(start, TokenKind::Pipe)
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::LessEqual)
                    } else {
                        self.simple_token(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::GreaterEqual)
                    } else {
                        self.simple_token(start, TokenKind::Greater)
                    }
                }
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lexer,
                        format!("unexpected character `{other}`"),
                    )
                    .with_span(SourceSpan::new(start, self.current)));
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "fn" => Kw::Fn,
        "class" => Kw::Class,
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "loop" => Kw::Loop,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "return" => Kw::Return,
        "import" => Kw::Import,
        "from" => Kw::From,
        "as" => Kw::As,
        "raise" => Kw::Raise,
        "try" => Kw::Try,
        "catch" => Kw::Catch,
        "true" => Kw::True,
        "false" => Kw::False,
        "none" => Kw::None,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

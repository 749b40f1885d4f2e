//! Recursive-descent parser producing the Sorrel AST.

use std::sync::Arc;

use crate::diagnostics::{ParseDiagnostic, Position};
use crate::parser::ast::{
    Block, ElseBranch, Expr, ForBinding, ForBody, InfixOp, PrefixOp, Program, Stmt,
};
use crate::parser::lexer::{Token, TokenKind};

/// Binding powers, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Coalesce, // ??
    Or,       // ||
    And,      // &&
    Equality, // == != is
    Compare,  // < <= > >=
    Additive, // + - ++
    Product,  // * / %
    Prefix,   // -x !x
    Postfix,  // calls, members, indexing
}

fn infix_prec(kind: &TokenKind) -> Option<(Prec, InfixOp)> {
    let (prec, op) = match kind {
        TokenKind::QuestionQuestion => (Prec::Coalesce, InfixOp::Coalesce),
        TokenKind::OrOr => (Prec::Or, InfixOp::Or),
        TokenKind::AndAnd => (Prec::And, InfixOp::And),
        TokenKind::EqEq => (Prec::Equality, InfixOp::Eq),
        TokenKind::BangEq => (Prec::Equality, InfixOp::Ne),
        TokenKind::Is => (Prec::Equality, InfixOp::Is),
        TokenKind::Lt => (Prec::Compare, InfixOp::Lt),
        TokenKind::LtEq => (Prec::Compare, InfixOp::Le),
        TokenKind::Gt => (Prec::Compare, InfixOp::Gt),
        TokenKind::GtEq => (Prec::Compare, InfixOp::Ge),
        TokenKind::Plus => (Prec::Additive, InfixOp::Add),
        TokenKind::Minus => (Prec::Additive, InfixOp::Sub),
        TokenKind::PlusPlus => (Prec::Additive, InfixOp::Concat),
        TokenKind::Star => (Prec::Product, InfixOp::Mul),
        TokenKind::Slash => (Prec::Product, InfixOp::Div),
        TokenKind::Percent => (Prec::Product, InfixOp::Mod),
        _ => return None,
    };
    Some((prec, op))
}

const STATEMENT_KEYWORDS: &[&str] = &[
    "let", "export", "fn", "return", "if", "else", "for", "in", "try", "import", "stop", "skip",
];

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn closest_keyword(word: &str) -> Option<&'static str> {
    STATEMENT_KEYWORDS
        .iter()
        .map(|kw| (levenshtein(word, kw), *kw))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, kw)| kw)
}

/// Token-stream parser. Use [`crate::parser::parse_program`] unless you need
/// to drive parsing manually.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseDiagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn current_pos(&self) -> Position {
        self.tokens
            .get(self.pos)
            .map(|t| t.pos)
            .or_else(|| self.tokens.last().map(|t| t.pos))
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Position, ParseDiagnostic> {
        let pos = self.current_pos();
        if self.eat(&kind) {
            Ok(pos)
        } else {
            let found = self
                .peek()
                .map(|k| format!("{:?}", k))
                .unwrap_or_else(|| "end of input".to_string());
            Err(ParseDiagnostic::new(
                "SYN-0002",
                format!("expected {}, found {}", what, found),
                pos,
            ))
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, Vec<ParseDiagnostic>> {
        let mut program = Program::default();
        while self.peek().is_some() {
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            match self.parse_statement() {
                Ok(stmt) => program.statements.push(stmt),
                Err(diag) => {
                    self.errors.push(diag);
                    self.synchronize();
                }
            }
        }
        if self.errors.is_empty() {
            Ok(program)
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Skip to the next plausible statement boundary after an error
    fn synchronize(&mut self) {
        while let Some(kind) = self.peek() {
            match kind {
                TokenKind::Semicolon => {
                    self.pos += 1;
                    return;
                }
                TokenKind::Let
                | TokenKind::Export
                | TokenKind::Return
                | TokenKind::If
                | TokenKind::For
                | TokenKind::Import => return,
                _ => self.pos += 1,
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseDiagnostic> {
        match self.peek() {
            Some(TokenKind::Let) => self.parse_let(false),
            Some(TokenKind::Export) => {
                self.pos += 1;
                // `export let x = ...` and `export x = ...` both bind and mark
                if self.peek() == Some(&TokenKind::Let) {
                    self.parse_let(true)
                } else {
                    self.parse_let_body(true)
                }
            }
            Some(TokenKind::Return) => {
                let pos = self.current_pos();
                self.pos += 1;
                let value = match self.peek() {
                    None | Some(TokenKind::Semicolon) | Some(TokenKind::RBrace) => None,
                    _ => Some(self.parse_expr(Prec::Lowest)?),
                };
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Return { value, pos })
            }
            Some(TokenKind::Ident(_)) => self.parse_assign_or_expr(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_let(&mut self, export: bool) -> Result<Stmt, ParseDiagnostic> {
        self.expect(TokenKind::Let, "'let'")?;
        self.parse_let_body(export)
    }

    fn parse_let_body(&mut self, export: bool) -> Result<Stmt, ParseDiagnostic> {
        let pos = self.current_pos();
        let name = match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => name,
            other => {
                return Err(ParseDiagnostic::new(
                    "SYN-0003",
                    format!(
                        "expected identifier after 'let', found {}",
                        other
                            .map(|t| format!("{:?}", t.kind))
                            .unwrap_or_else(|| "end of input".to_string())
                    ),
                    pos,
                ));
            }
        };
        self.expect(TokenKind::Eq, "'='")?;
        let value = self.parse_expr(Prec::Lowest)?;
        self.eat(&TokenKind::Semicolon);
        Ok(Stmt::Let {
            name,
            value,
            export,
            pos,
        })
    }

    /// Statements starting with an identifier: assignment, expression, or a
    /// likely keyword typo (`exprot x = 1`).
    fn parse_assign_or_expr(&mut self) -> Result<Stmt, ParseDiagnostic> {
        if let (Some(TokenKind::Ident(first)), Some(TokenKind::Ident(_))) =
            (self.peek(), self.peek_at(1))
        {
            // ident followed by ident is never valid; most likely a mistyped
            // statement keyword
            let pos = self.current_pos();
            let mut diag = ParseDiagnostic::new(
                "SYN-0004",
                format!("unexpected identifier '{}'", first),
                pos,
            );
            if let Some(kw) = closest_keyword(first) {
                diag = diag.with_hint(format!("Did you mean '{}'?", kw));
            }
            return Err(diag);
        }
        self.parse_expr_statement()
    }

    fn parse_expr_statement(&mut self) -> Result<Stmt, ParseDiagnostic> {
        let pos = self.current_pos();
        let expr = self.parse_expr(Prec::Lowest)?;
        if self.peek() == Some(&TokenKind::Eq) {
            if !matches!(
                expr,
                Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. }
            ) {
                return Err(ParseDiagnostic::new(
                    "SYN-0005",
                    "invalid assignment target",
                    pos,
                ));
            }
            self.pos += 1;
            let value = self.parse_expr(Prec::Lowest)?;
            self.eat(&TokenKind::Semicolon);
            return Ok(Stmt::Assign {
                target: expr,
                value,
                pos,
            });
        }
        self.eat(&TokenKind::Semicolon);
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Block, ParseDiagnostic> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut block = Block::default();
        loop {
            match self.peek() {
                Some(TokenKind::RBrace) => {
                    self.pos += 1;
                    return Ok(block);
                }
                Some(TokenKind::Semicolon) => {
                    self.pos += 1;
                }
                Some(_) => block.statements.push(self.parse_statement()?),
                None => {
                    return Err(ParseDiagnostic::new(
                        "SYN-0006",
                        "unterminated block, expected '}'",
                        self.current_pos(),
                    ));
                }
            }
        }
    }

    fn parse_expr(&mut self, min_prec: Prec) -> Result<Expr, ParseDiagnostic> {
        let mut left = self.parse_prefix()?;
        loop {
            let Some(kind) = self.peek() else { break };
            let Some((prec, mut op)) = infix_prec(kind) else {
                break;
            };
            if prec <= min_prec {
                break;
            }
            let pos = self.current_pos();
            self.pos += 1;
            if op == InfixOp::Is && self.eat(&TokenKind::Not) {
                op = InfixOp::IsNot;
            }
            let right = self.parse_expr(prec)?;
            left = Expr::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseDiagnostic> {
        let pos = self.current_pos();
        match self.peek() {
            Some(TokenKind::Minus) => {
                self.pos += 1;
                let operand = self.parse_expr(Prec::Prefix)?;
                Ok(Expr::Prefix {
                    op: PrefixOp::Neg,
                    operand: Box::new(operand),
                    pos,
                })
            }
            Some(TokenKind::Bang) => {
                self.pos += 1;
                let operand = self.parse_expr(Prec::Prefix)?;
                Ok(Expr::Prefix {
                    op: PrefixOp::Not,
                    operand: Box::new(operand),
                    pos,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseDiagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let pos = self.current_pos();
                    let name = match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(name),
                            ..
                        }) => name,
                        other => {
                            return Err(ParseDiagnostic::new(
                                "SYN-0007",
                                format!(
                                    "expected member name after '.', found {}",
                                    other
                                        .map(|t| format!("{:?}", t.kind))
                                        .unwrap_or_else(|| "end of input".to_string())
                                ),
                                pos,
                            ));
                        }
                    };
                    if self.peek() == Some(&TokenKind::LParen) {
                        let args = self.parse_call_args()?;
                        expr = Expr::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                            pos,
                        };
                    } else {
                        expr = Expr::Member {
                            receiver: Box::new(expr),
                            name,
                            pos,
                        };
                    }
                }
                Some(TokenKind::LBracket) => {
                    let pos = self.current_pos();
                    self.pos += 1;
                    let index = self.parse_expr(Prec::Lowest)?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index {
                        receiver: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                Some(TokenKind::LParen) => {
                    let pos = expr.pos();
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        pos,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseDiagnostic> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            if self.peek() == Some(&TokenKind::Ellipsis) {
                let pos = self.current_pos();
                self.pos += 1;
                let inner = self.parse_expr(Prec::Lowest)?;
                args.push(Expr::Spread {
                    inner: Box::new(inner),
                    pos,
                });
            } else {
                args.push(self.parse_expr(Prec::Lowest)?);
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseDiagnostic> {
        let pos = self.current_pos();
        let Some(token) = self.advance() else {
            return Err(ParseDiagnostic::new(
                "SYN-0008",
                "unexpected end of input",
                pos,
            ));
        };
        match token.kind {
            TokenKind::IntLit(value) => Ok(Expr::IntLit { value, pos }),
            TokenKind::FloatLit(value) => Ok(Expr::FloatLit { value, pos }),
            TokenKind::StrLit(value) => Ok(Expr::StrLit { value, pos }),
            TokenKind::True => Ok(Expr::BoolLit { value: true, pos }),
            TokenKind::False => Ok(Expr::BoolLit { value: false, pos }),
            TokenKind::Null => Ok(Expr::NullLit { pos }),
            TokenKind::MoneyLit(spec) => Ok(Expr::MoneyLit {
                amount: spec.amount,
                currency: spec.currency,
                scale: spec.scale,
                pos,
            }),
            TokenKind::DurationLit(spec) => Ok(Expr::DurationLit {
                months: spec.months,
                days: spec.days,
                secs: spec.secs,
                pos,
            }),
            TokenKind::DatetimeLit(raw) => Ok(Expr::DatetimeLit { raw, pos }),
            TokenKind::PathLit(raw) => Ok(Expr::PathLit { raw, pos }),
            TokenKind::UrlLit(raw) => Ok(Expr::UrlLit { raw, pos }),
            TokenKind::RegexLit((pattern, flags)) => Ok(Expr::RegexLit {
                pattern,
                flags,
                pos,
            }),
            TokenKind::Ident(name) => Ok(Expr::Ident { name, pos }),
            TokenKind::LParen => {
                let expr = self.parse_expr(Prec::Lowest)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array(pos),
            TokenKind::LBrace => self.parse_dict(pos),
            TokenKind::Fn => self.parse_fn_literal(pos),
            TokenKind::If => self.parse_if(pos),
            TokenKind::For => self.parse_for(pos),
            TokenKind::Try => self.parse_try(pos),
            TokenKind::Import => {
                let path = self.parse_expr(Prec::Postfix)?;
                Ok(Expr::Import {
                    path: Box::new(path),
                    pos,
                })
            }
            TokenKind::Stop => Ok(Expr::Stop { pos }),
            TokenKind::Skip => Ok(Expr::Skip { pos }),
            other => {
                let mut diag = ParseDiagnostic::new(
                    "SYN-0009",
                    format!("unexpected token {:?}", other),
                    pos,
                );
                if let TokenKind::Ident(ref name) = other {
                    if let Some(kw) = closest_keyword(name) {
                        diag = diag.with_hint(format!("Did you mean '{}'?", kw));
                    }
                }
                Err(diag)
            }
        }
    }

    fn parse_array(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        let mut elements = Vec::new();
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::ArrayLit { elements, pos });
        }
        loop {
            if self.peek() == Some(&TokenKind::Ellipsis) {
                let spread_pos = self.current_pos();
                self.pos += 1;
                let inner = self.parse_expr(Prec::Lowest)?;
                elements.push(Expr::Spread {
                    inner: Box::new(inner),
                    pos: spread_pos,
                });
            } else {
                elements.push(self.parse_expr(Prec::Lowest)?);
            }
            if self.eat(&TokenKind::Comma) {
                // trailing comma
                if self.peek() == Some(&TokenKind::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::ArrayLit { elements, pos });
                }
                continue;
            }
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expr::ArrayLit { elements, pos });
        }
    }

    fn parse_dict(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        let mut pairs = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::DictLit { pairs, pos });
        }
        loop {
            let key_pos = self.current_pos();
            let key = match self.advance() {
                Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) => name,
                Some(Token {
                    kind: TokenKind::StrLit(s),
                    ..
                }) => s,
                other => {
                    return Err(ParseDiagnostic::new(
                        "SYN-0011",
                        format!(
                            "expected dictionary key, found {}",
                            other
                                .map(|t| format!("{:?}", t.kind))
                                .unwrap_or_else(|| "end of input".to_string())
                        ),
                        key_pos,
                    ));
                }
            };
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_expr(Prec::Lowest)?;
            pairs.push((key, value));
            if self.eat(&TokenKind::Comma) {
                if self.peek() == Some(&TokenKind::RBrace) {
                    self.pos += 1;
                    return Ok(Expr::DictLit { pairs, pos });
                }
                continue;
            }
            self.expect(TokenKind::RBrace, "'}'")?;
            return Ok(Expr::DictLit { pairs, pos });
        }
    }

    fn parse_fn_literal(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let p_pos = self.current_pos();
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::Ident(name),
                        ..
                    }) => params.push(name),
                    other => {
                        return Err(ParseDiagnostic::new(
                            "SYN-0012",
                            format!(
                                "expected parameter name, found {}",
                                other
                                    .map(|t| format!("{:?}", t.kind))
                                    .unwrap_or_else(|| "end of input".to_string())
                            ),
                            p_pos,
                        ));
                    }
                }
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                self.expect(TokenKind::RParen, "')'")?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Expr::FnLit {
            params,
            body: Arc::new(body),
            pos,
        })
    }

    fn parse_if(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        self.expect(TokenKind::LParen, "'(' after 'if'")?;
        let cond = self.parse_expr(Prec::Lowest)?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&TokenKind::Else) {
            if self.peek() == Some(&TokenKind::If) {
                let else_pos = self.current_pos();
                self.pos += 1;
                Some(ElseBranch::If(Box::new(self.parse_if(else_pos)?)))
            } else {
                Some(ElseBranch::Block(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch,
            else_branch,
            pos,
        })
    }

    fn parse_for(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        self.expect(TokenKind::LParen, "'(' after 'for'")?;

        // Distinguish `for (x in xs)` / `for (k, v in xs)` from `for (xs)`
        // by looking past the leading identifiers.
        let binding = match (self.peek(), self.peek_at(1)) {
            (Some(TokenKind::Ident(a)), Some(TokenKind::In)) => {
                let name = a.clone();
                self.pos += 2;
                ForBinding::One(name)
            }
            (Some(TokenKind::Ident(a)), Some(TokenKind::Comma)) => {
                if let (Some(TokenKind::Ident(b)), Some(TokenKind::In)) =
                    (self.peek_at(2), self.peek_at(3))
                {
                    let (k, v) = (a.clone(), b.clone());
                    self.pos += 4;
                    ForBinding::Two(k, v)
                } else {
                    ForBinding::None
                }
            }
            _ => ForBinding::None,
        };

        let iterable = self.parse_expr(Prec::Lowest)?;
        self.expect(TokenKind::RParen, "')'")?;

        let body = if self.peek() == Some(&TokenKind::LBrace) {
            ForBody::Block(self.parse_block()?)
        } else {
            ForBody::Func(Box::new(self.parse_expr(Prec::Lowest)?))
        };
        Ok(Expr::For {
            binding,
            iterable: Box::new(iterable),
            body,
            pos,
        })
    }

    fn parse_try(&mut self, pos: Position) -> Result<Expr, ParseDiagnostic> {
        let call = self.parse_prefix()?;
        if !call.is_call() {
            return Err(ParseDiagnostic::new(
                "SYN-0010",
                "'try' expects a function or method call",
                pos,
            )
            .with_hint("wrap the operation in a function and try the call instead"));
        }
        Ok(Expr::Try {
            call: Box::new(call),
            pos,
        })
    }
}

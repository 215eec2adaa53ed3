use crate::ast::*;
use crate::config::Config;
use crate::lexer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },
    #[error("unexpected {found}")]
    Unexpected { found: String },
    #[error("nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at {position}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub position: Position,
}

impl ParseError {
    pub fn code(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::Expected { .. } => "ZY-P001",
            ParseErrorKind::Unexpected { .. } => "ZY-P002",
            ParseErrorKind::NestingTooDeep { .. } => "ZY-P003",
        }
    }
}

type Result<T> = std::result::Result<T, ParseError>;

/// Left binding power of a binary operator; all binary operators are left-associative.
fn binding_power(kind: &TokenKind) -> Option<(u8, BinOp)> {
    let entry = match kind {
        TokenKind::Or => (1, BinOp::Or),
        TokenKind::And => (2, BinOp::And),
        TokenKind::EqEq => (3, BinOp::Equals),
        TokenKind::NotEq => (3, BinOp::NotEquals),
        TokenKind::Less => (3, BinOp::Less),
        TokenKind::LessEq => (3, BinOp::LessOrEqual),
        TokenKind::Greater => (3, BinOp::Greater),
        TokenKind::GreaterEq => (3, BinOp::GreaterOrEqual),
        TokenKind::Plus => (4, BinOp::Add),
        TokenKind::Minus => (4, BinOp::Subtract),
        TokenKind::Star => (5, BinOp::Multiply),
        TokenKind::Slash => (5, BinOp::Divide),
        TokenKind::Percent => (5, BinOp::Modulo),
        _ => return None,
    };
    Some(entry)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    max_errors: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    /// `tokens` must end with an `Eof` token, as produced by the lexer.
    pub fn new(mut tokens: Vec<Token>, config: &Config) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(0);
            let position = tokens.last().map(|t| t.position).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                span: Span::new(end, end),
                position,
            });
        }
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            max_depth: config.max_nesting_depth,
            max_errors: config.max_parse_errors,
            errors: Vec::new(),
        }
    }

    fn current(&self) -> &Token {
        // The trailing Eof is never consumed, so `pos` stays in bounds
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_span(&self) -> Span {
        self.current().span
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            Span::UNKNOWN
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if !self.at_end() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<Span> {
        if self.check(expected) {
            let span = self.peek_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.error(ParseErrorKind::Expected {
                expected: expected.to_string(),
                found: self.peek().to_string(),
            }))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span)> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.peek_span();
                self.advance();
                Ok((name, span))
            }
            tok => Err(self.error(ParseErrorKind::Expected {
                expected: what.to_string(),
                found: tok.to_string(),
            })),
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        let tok = self.current();
        ParseError {
            kind,
            span: tok.span,
            position: tok.position,
        }
    }

    /// Account for one more level of tree depth, failing past the limit.
    fn deepen(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(self.error(ParseErrorKind::NestingTooDeep { limit: self.max_depth }));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f`, then drop every level it added with `deepen`.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let entry = self.depth;
        let result = f(self);
        self.depth = entry;
        result
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.scoped(|p| {
            p.deepen()?;
            f(p)
        })
    }

    // ---- Top-level parsing ----

    pub fn parse_program(mut self) -> (Program, Vec<ParseError>) {
        let statements = self.parse_statements(false);
        // Enclosing blocks may each add a missing-'}' error after the cap was hit
        self.errors.truncate(self.max_errors);
        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.len(),
            "parsed program"
        );
        (Program { statements }, self.errors)
    }

    fn error_cap_reached(&self) -> bool {
        self.errors.len() >= self.max_errors
    }

    /// Parse statements until end of input, or until `}` when `in_block` is set.
    /// Failed statements are recorded and skipped up to the next synchronisation point.
    fn parse_statements(&mut self, in_block: bool) -> Vec<Stmt> {
        let mut statements = Vec::new();
        loop {
            if self.at_end() || (in_block && self.check(&TokenKind::RBrace)) {
                break;
            }
            if self.error_cap_reached() {
                // Give up on the rest of the input
                self.pos = self.tokens.len() - 1;
                break;
            }
            let start = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    if self.pos == start {
                        self.advance();
                    }
                    self.synchronize();
                }
            }
        }
        statements
    }

    /// Discard tokens until just after a `;`, or before `}`, a statement keyword, or Eof.
    fn synchronize(&mut self) {
        loop {
            if self.at_end() || self.check(&TokenKind::RBrace) || self.peek().starts_statement() {
                return;
            }
            if matches!(self.advance().kind, TokenKind::Semicolon) {
                return;
            }
        }
    }

    // ---- Statements ----

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            TokenKind::Let => self.parse_let(),
            TokenKind::Fn => self.parse_fn(),
            TokenKind::If => self.nested(|p| p.parse_if()),
            TokenKind::While => self.nested(|p| p.parse_while()),
            TokenKind::Return => self.parse_return(),
            TokenKind::Print => self.parse_print(),
            TokenKind::LBrace => {
                let start = self.peek_span();
                let body = self.nested(|p| p.parse_block())?;
                Ok(Spanned::new(StmtKind::Block(body), start.merge(self.prev_span())))
            }
            TokenKind::Else => Err(self.error(ParseErrorKind::Unexpected {
                found: "'else' without a matching 'if'".to_string(),
            })),
            _ => self.parse_expr_stmt(),
        }
    }

    /// `let name = expr;`
    fn parse_let(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::Let)?;
        let (name, _) = self.expect_ident("variable name")?;
        self.expect(&TokenKind::Assign)?;
        let value = self.parse_expr()?;
        let end = self.expect(&TokenKind::Semicolon)?;
        Ok(Spanned::new(StmtKind::Let { name, value }, start.merge(end)))
    }

    /// `fn name(a, b) { body }`
    fn parse_fn(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::Fn)?;
        let (name, _) = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (pname, span) = self.expect_ident("parameter name")?;
                params.push(Param { name: pname, span });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.nested(|p| p.parse_block())?;
        Ok(Spanned::new(
            StmtKind::Function { name, params, body },
            start.merge(self.prev_span()),
        ))
    }

    /// `if cond { .. } (else (if .. | { .. }))?`
    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::If)?;
        let condition = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let nested_if = self.nested(|p| p.parse_if())?;
                Some(vec![nested_if])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Spanned::new(
            StmtKind::If { condition, then_block, else_block },
            start.merge(self.prev_span()),
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::While)?;
        let condition = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Spanned::new(
            StmtKind::While { condition, body },
            start.merge(self.prev_span()),
        ))
    }

    fn parse_return(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::Return)?;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let end = self.expect(&TokenKind::Semicolon)?;
        Ok(Spanned::new(StmtKind::Return(value), start.merge(end)))
    }

    fn parse_print(&mut self) -> Result<Stmt> {
        let start = self.expect(&TokenKind::Print)?;
        let value = self.parse_expr()?;
        let end = self.expect(&TokenKind::Semicolon)?;
        Ok(Spanned::new(StmtKind::Print(value), start.merge(end)))
    }

    /// `expr;` or `target = expr;`. Whether the target is assignable is the compiler's call.
    fn parse_expr_stmt(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.parse_expr()?;
            let end = self.expect(&TokenKind::Semicolon)?;
            let span = expr.span.merge(end);
            return Ok(Spanned::new(StmtKind::Assign { target: expr, value }, span));
        }
        let end = self.expect(&TokenKind::Semicolon)?;
        let span = expr.span.merge(end);
        Ok(Spanned::new(StmtKind::Expr(expr), span))
    }

    /// `{ stmt* }`. Errors inside are recovered locally and recorded.
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace)?;
        let body = self.parse_statements(true);
        self.expect(&TokenKind::RBrace)?;
        Ok(body)
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(|p| p.parse_binary(1))
    }

    /// Precedence climbing: parse operators binding at least as tightly as `min_bp`.
    /// Each operator folded into `left` nests the tree one level deeper.
    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr> {
        self.scoped(|p| p.parse_binary_chain(min_bp))
    }

    fn parse_binary_chain(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((bp, op)) = binding_power(self.peek()) {
            if bp < min_bp {
                break;
            }
            self.deepen()?;
            self.advance();
            // Left-associative: the right side only takes strictly tighter operators
            let right = self.nested(|p| p.parse_binary(bp + 1))?;
            let span = left.span.merge(right.span);
            left = Spanned::new(
                ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Not | TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_call(),
        };
        let start = self.peek_span();
        self.advance();
        let operand = self.nested(|p| p.parse_unary())?;
        let span = start.merge(operand.span);
        Ok(Spanned::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    /// `primary ( "(" args ")" )*`. Chained calls nest like binary operators.
    fn parse_call(&mut self) -> Result<Expr> {
        self.scoped(|p| p.parse_call_chain())
    }

    fn parse_call_chain(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.check(&TokenKind::LParen) {
            self.deepen()?;
            self.advance();
            let mut args = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            let end = self.expect(&TokenKind::RParen)?;
            let span = expr.span.merge(end);
            expr = Spanned::new(ExprKind::Call { callee: Box::new(expr), args }, span);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.peek_span();
        let literal = |lit| Ok(Spanned::new(ExprKind::Literal(lit), span));
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                literal(Literal::Int(n))
            }
            TokenKind::Float(n) => {
                self.advance();
                literal(Literal::Float(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                literal(Literal::Str(s))
            }
            TokenKind::True => {
                self.advance();
                literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                literal(Literal::Bool(false))
            }
            TokenKind::Nil => {
                self.advance();
                literal(Literal::Nil)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Spanned::new(ExprKind::Variable(name), span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                let end = self.expect(&TokenKind::RParen)?;
                Ok(Spanned::new(inner.node, span.merge(end)))
            }
            tok => Err(self.error(ParseErrorKind::Expected {
                expected: "expression".to_string(),
                found: tok.to_string(),
            })),
        }
    }
}

/// Parse a token stream (ending in `Eof`).
/// Returns the program only when no diagnostics were produced.
pub fn parse(tokens: Vec<Token>, config: &Config) -> std::result::Result<Program, Vec<ParseError>> {
    let (program, errors) = Parser::new(tokens, config).parse_program();
    if errors.is_empty() { Ok(program) } else { Err(errors) }
}

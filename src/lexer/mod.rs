use logos::Logos;

use crate::ast::{Position, SourceMap, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexErrorKind {
    #[default]
    IllegalCharacter,
    UnterminatedString,
    InvalidEscape,
    IntegerTooLarge,
}

impl LexErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            LexErrorKind::IllegalCharacter => "ZY-L001",
            LexErrorKind::UnterminatedString => "ZY-L002",
            LexErrorKind::InvalidEscape => "ZY-L003",
            LexErrorKind::IntegerTooLarge => "ZY-L004",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            LexErrorKind::IllegalCharacter => "illegal character",
            LexErrorKind::UnterminatedString => "unterminated string literal",
            LexErrorKind::InvalidEscape => "invalid escape sequence",
            LexErrorKind::IntegerTooLarge => "integer literal too large",
        }
    }
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"#[^\n]*", allow_greedy = true))]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum TokenKind {
    // Keywords, matched only when the whole identifier spells one
    #[token("let")]
    Let,
    #[token("fn")]
    Fn,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("print")]
    Print,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("=")]
    Assign,
    #[token("!")]
    Bang,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,

    // Literals
    #[regex(r"[0-9]+", lex_int)]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", lex_float)]
    Float(f64),

    #[token("\"", lex_string)]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Synthesised by [`Lexer`] once the input is exhausted.
    Eof,
}

fn lex_int(lex: &mut logos::Lexer<TokenKind>) -> Result<i64, LexErrorKind> {
    lex.slice().parse::<i64>().map_err(|_| LexErrorKind::IntegerTooLarge)
}

fn lex_float(lex: &mut logos::Lexer<TokenKind>) -> Result<f64, LexErrorKind> {
    lex.slice().parse::<f64>().map_err(|_| LexErrorKind::IllegalCharacter)
}

/// Scans the body of a string literal after the opening quote.
/// On an unterminated string nothing is bumped, so the error span is the opening quote.
fn lex_string(lex: &mut logos::Lexer<TokenKind>) -> Result<String, LexErrorKind> {
    let rest = lex.remainder();
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                lex.bump(i + 1);
                return Ok(out);
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((j, other)) => {
                    lex.bump(j + other.len_utf8());
                    return Err(LexErrorKind::InvalidEscape);
                }
                None => return Err(LexErrorKind::UnterminatedString),
            },
            c => out.push(c),
        }
    }
    Err(LexErrorKind::UnterminatedString)
}

impl TokenKind {
    /// Keywords that can only begin a statement; the parser resynchronises on them.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Let
                | TokenKind::Fn
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return
                | TokenKind::Print
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::Let => "'let'",
            TokenKind::Fn => "'fn'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Return => "'return'",
            TokenKind::Print => "'print'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Nil => "'nil'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Less => "'<'",
            TokenKind::LessEq => "'<='",
            TokenKind::Greater => "'>'",
            TokenKind::GreaterEq => "'>='",
            TokenKind::Assign => "'='",
            TokenKind::Bang => "'!'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Int(n) => return write!(f, "number {n}"),
            TokenKind::Float(n) => return write!(f, "number {n}"),
            TokenKind::Str(_) => "string literal",
            TokenKind::Ident(name) => return write!(f, "identifier '{name}'"),
            TokenKind::Eof => "end of input",
        };
        f.write_str(s)
    }
}

/// A lexed token. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} at {position}: '{snippet}'", .kind.description())]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
    pub position: Position,
    pub snippet: String,
}

impl LexError {
    /// Every lex error comes with a suggested fix where one is obvious.
    pub fn suggestion(&self) -> Option<String> {
        match (self.kind, self.snippet.as_str()) {
            (LexErrorKind::UnterminatedString, _) => {
                Some("close the string with a matching '\"'".to_string())
            }
            (LexErrorKind::InvalidEscape, _) => {
                Some("valid escapes are \\n \\t \\r \\0 \\\\ and \\\"".to_string())
            }
            (LexErrorKind::IntegerTooLarge, _) => Some(format!(
                "integer literals go up to {} (negation applies afterwards, so write the \
                 smallest integer as '-{} - 1'); write a float like '{}.0' instead",
                i64::MAX,
                i64::MAX,
                self.snippet
            )),
            (LexErrorKind::IllegalCharacter, "'") => {
                Some("strings use double quotes: \"text\"".to_string())
            }
            (LexErrorKind::IllegalCharacter, "&") | (LexErrorKind::IllegalCharacter, "&&") => {
                Some("use the keyword 'and'".to_string())
            }
            (LexErrorKind::IllegalCharacter, "|") | (LexErrorKind::IllegalCharacter, "||") => {
                Some("use the keyword 'or'".to_string())
            }
            _ => None,
        }
    }
}

/// Lazy token stream over a source string.
///
/// Yields tokens in source order, then a single `Eof` token. The first lex error is
/// yielded as `Err` and ends the stream; there is no recovery inside the lexer.
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
    map: SourceMap,
    finished: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            inner: TokenKind::lexer(source),
            map: SourceMap::new(source),
            finished: false,
        }
    }

    /// Rewind to the start of the source.
    pub fn reset(&mut self) {
        self.inner = TokenKind::lexer(self.source);
        self.finished = false;
    }

    fn error(&self, kind: LexErrorKind, range: std::ops::Range<usize>) -> LexError {
        let snippet = match kind {
            // Always a whole char, even if the error span stops mid-codepoint
            LexErrorKind::IllegalCharacter => self.source[range.start..]
                .chars()
                .next()
                .map(String::from)
                .unwrap_or_default(),
            _ => self.source[range.clone()].to_string(),
        };
        LexError {
            kind,
            span: range.clone().into(),
            position: self.map.position(range.start),
            snippet,
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(kind)) => {
                let range = self.inner.span();
                Some(Ok(Token {
                    kind,
                    lexeme: self.inner.slice().to_string(),
                    position: self.map.position(range.start),
                    span: range.into(),
                }))
            }
            Some(Err(kind)) => {
                self.finished = true;
                Some(Err(self.error(kind, self.inner.span())))
            }
            None => {
                self.finished = true;
                let end = self.source.len();
                Some(Ok(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    span: Span::new(end, end),
                    position: self.map.position(end),
                }))
            }
        }
    }
}

impl std::iter::FusedIterator for Lexer<'_> {}

/// Lex a whole source into tokens ending with `Eof`, or the first error.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let tokens = Lexer::new(source).collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(tokens = tokens.len(), "lexed source");
    Ok(tokens)
}

/// Lex as far as possible. On error, the tokens before it are kept and end
/// with an `Eof` placed where the bad token starts, so the parser can still
/// report problems in the text that did lex.
pub fn lex_partial(source: &str) -> (Vec<Token>, Option<LexError>) {
    let mut tokens = Vec::new();
    for item in Lexer::new(source) {
        match item {
            Ok(tok) => tokens.push(tok),
            Err(e) => {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    span: Span::new(e.span.start, e.span.start),
                    position: e.position,
                });
                tracing::debug!(tokens = tokens.len(), code = e.kind.code(), "lexing stopped at an error");
                return (tokens, Some(e));
            }
        }
    }
    tracing::debug!(tokens = tokens.len(), "lexed source");
    (tokens, None)
}

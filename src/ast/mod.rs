use serde::Serialize;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Human-facing location: 1-based line and column plus the byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

// ---- Core AST types ----

/// Root of the tree. Owns every statement; nodes never share children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

pub type Stmt = Spanned<StmtKind>;
pub type Expr = Spanned<ExprKind>;

/// A function parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    #[serde(skip)]
    pub span: Span,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StmtKind {
    /// `let name = value;`
    Let { name: String, value: Expr },

    /// `target = value;`, the target is checked by the compiler
    Assign { target: Expr, value: Expr },

    /// `if cond { ... } else { ... }`; `else if` nests another `If` in the else block
    If {
        condition: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },

    /// `while cond { ... }`
    While { condition: Expr, body: Vec<Stmt> },

    /// `print expr;`
    Print(Expr),

    /// `fn name(a, b) { ... }`
    Function {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
    },

    /// `return;` or `return expr;`
    Return(Option<Expr>),

    /// `{ ... }`
    Block(Vec<Stmt>),

    /// `expr;`
    Expr(Expr),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Equals => "==",
            BinOp::NotEquals => "!=",
            BinOp::Less => "<",
            BinOp::LessOrEqual => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterOrEqual => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(4, 9);
        let b = Span::new(1, 6);
        assert_eq!(a.merge(b), Span::new(1, 9));
    }

    #[test]
    fn spanned_serializes_as_inner_node() {
        let e: Expr = Spanned::new(ExprKind::Variable("x".into()), Span::new(3, 4));
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"Variable":"x"}"#);
    }

    #[test]
    fn program_json_has_statements() {
        let program = Program {
            statements: vec![Spanned::new(
                StmtKind::Print(Spanned::new(ExprKind::Literal(Literal::Int(7)), Span::new(6, 7))),
                Span::new(0, 8),
            )],
        };
        let json = serde_json::to_value(&program).unwrap();
        assert_eq!(json["statements"][0]["Print"]["Literal"]["Int"], 7);
    }

    #[test]
    fn position_display() {
        let p = Position { line: 3, column: 14, offset: 40 };
        assert_eq!(p.to_string(), "3:14");
    }
}

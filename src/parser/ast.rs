//! AST node types for the Sorrel language.

use std::sync::Arc;

use crate::diagnostics::Position;

/// A parsed program: a flat list of statements
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// A braced statement block
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

/// Statement node
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `let name = expr` / `export name = expr` / `export let name = expr`
    Let {
        name: String,
        value: Expr,
        export: bool,
        pos: Position,
    },
    /// `target = expr` where target is an identifier, member, or index
    Assign {
        target: Expr,
        value: Expr,
        pos: Position,
    },
    /// `return expr?`
    Return {
        value: Option<Expr>,
        pos: Position,
    },
    /// Bare expression statement
    Expr(Expr),
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Neg,
    Not,
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat, // ++ (array concatenation)
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Coalesce, // ??
    Is,       // schema identity
    IsNot,
}

impl std::fmt::Display for InfixOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Mod => "%",
            InfixOp::Concat => "++",
            InfixOp::Eq => "==",
            InfixOp::Ne => "!=",
            InfixOp::Lt => "<",
            InfixOp::Le => "<=",
            InfixOp::Gt => ">",
            InfixOp::Ge => ">=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
            InfixOp::Coalesce => "??",
            InfixOp::Is => "is",
            InfixOp::IsNot => "is not",
        };
        write!(f, "{}", s)
    }
}

/// Binding forms of the `for` construct
#[derive(Debug, Clone)]
pub enum ForBinding {
    /// `for(collection) fn` — no explicit binding, function applied per element
    None,
    /// `for (x in collection) { ... }`
    One(String),
    /// `for (k, v in collection) { ... }`
    Two(String, String),
}

/// Body forms of the `for` construct
#[derive(Debug, Clone)]
pub enum ForBody {
    Block(Block),
    /// Function expression applied per element: `for(xs) fn(x) { ... }`
    Func(Box<Expr>),
}

/// `else` branch of an `if` expression
#[derive(Debug, Clone)]
pub enum ElseBranch {
    Block(Block),
    /// `else if ...` chains
    If(Box<Expr>),
}

/// Expression node
#[derive(Debug, Clone)]
pub enum Expr {
    IntLit {
        value: i64,
        pos: Position,
    },
    FloatLit {
        value: f64,
        pos: Position,
    },
    StrLit {
        value: String,
        pos: Position,
    },
    BoolLit {
        value: bool,
        pos: Position,
    },
    NullLit {
        pos: Position,
    },
    /// Money literal: `$12.50`, `£5.00`, `EUR#3.00`
    MoneyLit {
        amount: i64,
        currency: String,
        scale: u8,
        pos: Position,
    },
    /// Duration literal: `30m`, `2h`, `3d`, `1w`, `6mo`, `1y`
    DurationLit {
        months: i32,
        days: i64,
        secs: i64,
        pos: Position,
    },
    /// Datetime literal: `@2024-12-25T14:30:00Z`, `@2024-12-25`, `@14:30`
    DatetimeLit {
        raw: String,
        pos: Position,
    },
    /// Path literal: `@./lib/util.sl`, `@~/x.sl`, `@/abs/p.sl`, `@std/math`
    PathLit {
        raw: String,
        pos: Position,
    },
    /// URL literal: `https://example.com/x?a=1#f`
    UrlLit {
        raw: String,
        pos: Position,
    },
    /// Regex literal: `r/pattern/flags`
    RegexLit {
        pattern: String,
        flags: String,
        pos: Position,
    },
    Ident {
        name: String,
        pos: Position,
    },
    ArrayLit {
        elements: Vec<Expr>,
        pos: Position,
    },
    /// `...expr` inside array literals and call argument lists
    Spread {
        inner: Box<Expr>,
        pos: Position,
    },
    DictLit {
        pairs: Vec<(String, Expr)>,
        pos: Position,
    },
    /// Function literal: `fn(a, b) { ... }`. The body is shared so closures
    /// can hold it without deep-cloning per call.
    FnLit {
        params: Vec<String>,
        body: Arc<Block>,
        pos: Position,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        pos: Position,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        pos: Position,
    },
    Member {
        receiver: Box<Expr>,
        name: String,
        pos: Position,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
        pos: Position,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
        pos: Position,
    },
    Infix {
        op: InfixOp,
        left: Box<Expr>,
        right: Box<Expr>,
        pos: Position,
    },
    If {
        cond: Box<Expr>,
        then_branch: Block,
        else_branch: Option<ElseBranch>,
        pos: Position,
    },
    For {
        binding: ForBinding,
        iterable: Box<Expr>,
        body: ForBody,
        pos: Position,
    },
    /// `try <call-expression>` — parser guarantees the inner expression is a
    /// function or method call
    Try {
        call: Box<Expr>,
        pos: Position,
    },
    /// `import @path` / `import "path"`
    Import {
        path: Box<Expr>,
        pos: Position,
    },
    /// `stop` — end the enclosing `for` loop
    Stop {
        pos: Position,
    },
    /// `skip` — skip the current `for` iteration
    Skip {
        pos: Position,
    },
}

impl Expr {
    /// Source position of this expression
    pub fn pos(&self) -> Position {
        match self {
            Expr::IntLit { pos, .. }
            | Expr::FloatLit { pos, .. }
            | Expr::StrLit { pos, .. }
            | Expr::BoolLit { pos, .. }
            | Expr::NullLit { pos }
            | Expr::MoneyLit { pos, .. }
            | Expr::DurationLit { pos, .. }
            | Expr::DatetimeLit { pos, .. }
            | Expr::PathLit { pos, .. }
            | Expr::UrlLit { pos, .. }
            | Expr::RegexLit { pos, .. }
            | Expr::Ident { pos, .. }
            | Expr::ArrayLit { pos, .. }
            | Expr::Spread { pos, .. }
            | Expr::DictLit { pos, .. }
            | Expr::FnLit { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::MethodCall { pos, .. }
            | Expr::Member { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Prefix { pos, .. }
            | Expr::Infix { pos, .. }
            | Expr::If { pos, .. }
            | Expr::For { pos, .. }
            | Expr::Try { pos, .. }
            | Expr::Import { pos, .. }
            | Expr::Stop { pos }
            | Expr::Skip { pos } => *pos,
        }
    }

    /// True if this expression is a call expression (function or method call).
    /// Used to enforce the `try <call>` syntax restriction.
    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. })
    }
}

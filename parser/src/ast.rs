/// Abstract syntax tree nodes.
///
/// The parser produces a [`Program`] of statements. Each node carries a
/// [`Span`] so downstream consumers (error reporting, the emitter's
/// source maps) always know the exact source location.
///
/// Name nodes start unbound; the resolver walks the tree once and fills
/// in their [`SlotRef`]s.
use crate::scope::{ScopeRef, SlotRef};
use crate::span::Span;

/// A parsed module body.
#[derive(Debug)]
pub struct Program {
    /// The module function scope.
    pub scope: ScopeRef,
    pub statements: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-` — numeric negation.
    Negate,
    /// `+` — numeric coercion.
    Plus,
    /// `!` — boolean negation.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    And,
    Or,
    Xor,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// Short-circuiting connectives; their right side may not evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A key in a table literal.
#[derive(Debug)]
pub enum TableKey {
    /// Bareword key, stored as a string: `{x: 1}`.
    Word(String),
    /// Computed key: `{[expr]: 1}`.
    Computed(Expr),
}

#[derive(Debug)]
pub enum ExprKind {
    Null,
    Boolean(bool),
    Number(f64),
    Str(String),
    This,
    Name {
        name: String,
        /// Bound by the resolver.
        slot: Option<SlotRef>,
    },
    List(Vec<Expr>),
    Table(Vec<(TableKey, Expr)>),
    Function(Box<FunctionLiteral>),
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Assignment is an expression; `op` carries the combining operator
    /// of a compound assignment (`+=` etc.).
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// `throw` is an expression that never yields.
    Throw(Box<Expr>),
}

/// `function (…) {…}` or an arrow function (both desugar to this).
#[derive(Debug)]
pub struct FunctionLiteral {
    /// Picked up from the declaration or member the function is assigned
    /// to, for stack traces; anonymous otherwise.
    pub name: Option<String>,
    pub params: Vec<SlotRef>,
    pub rest: Option<SlotRef>,
    /// The function's own scope; params live in it.
    pub scope: ScopeRef,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// A braced statement list with its own scope.
#[derive(Debug)]
pub struct Block {
    pub scope: ScopeRef,
    pub statements: Vec<Stmt>,
}

#[derive(Debug)]
pub struct CatchClause {
    /// The `catch (e)` binding, declared in the catch block's scope.
    pub binding: Option<SlotRef>,
    pub body: Block,
}

#[derive(Debug)]
pub enum StmtKind {
    /// Restricted to assignment, call, or throw by the parser.
    Expr(Expr),
    /// `var x [= init]` / `const x = init`.
    Declaration {
        slot: SlotRef,
        init: Option<Expr>,
    },
    /// `import name from 'path'`; module scope only.
    Import {
        slot: SlotRef,
        path: String,
    },
    /// `export const name = init`; module scope only. Declares the slot
    /// and stores the value into the exports table.
    Export {
        slot: SlotRef,
        name: String,
        init: Expr,
    },
    If {
        condition: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        /// The `Loop` scope wrapping condition and body.
        scope: ScopeRef,
        condition: Expr,
        body: Block,
    },
    For {
        /// The `Loop` scope holding the init declaration.
        scope: ScopeRef,
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        next: Option<Expr>,
        body: Block,
    },
    Try {
        body: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
}

//! # Parser
//!
//! The Alto front end: a streaming lexer, a table-driven Pratt parser,
//! and the scope resolver.
//!
//! ## Architecture
//!
//! ```text
//!  source text
//!      │
//!      ▼
//!  ┌────────┐   Token stream    ┌────────┐    AST + scopes   ┌──────────┐
//!  │ Lexer  │ ────────────────▶ │ Parser │ ────────────────▶ │ Resolver │
//!  └────────┘  (impl Iterator)  └────────┘                   └──────────┘
//!                                                 slots get their storage
//! ```
//!
//! ```rust
//! use parser::{parse, resolve};
//!
//! let source = "var x = 1\nx = x + 1";
//! let mut program = parse(source).unwrap();
//! resolve(&mut program, source).unwrap();
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod scope;
pub mod span;
pub mod token;

pub use ast::{
    BinaryOp, Block, CatchClause, Expr, ExprKind, FunctionLiteral, LogicalOp,
    Program, Stmt, StmtKind, TableKey, UnaryOp,
};
pub use lexer::{LexError, Lexer};
pub use parser::{parse, ParseError, Parser};
pub use resolve::{resolve, ResolveError};
pub use scope::{
    LexicalScope, ScopeKind, ScopeRef, Slot, SlotKind, SlotRef, SlotSource,
    SlotStorage,
};
pub use span::{Pos, Span};
pub use token::{Token, TokenKind};

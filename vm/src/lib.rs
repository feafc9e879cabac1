//! # VM
//!
//! The Alto back end: the bytecode compiler, the module object, the
//! stack interpreter, and the text assembler.
//!
//! ## Architecture
//!
//! ```text
//!  source text ──▶ compile ──▶ Module ──▶ main(args) ──▶ Value
//!                               ▲  │
//!          asm text ──▶ assemble┘  └── importing hook (host resolver)
//! ```

pub mod asm;
pub mod compiler;
pub mod interpreter;
pub mod module;

pub use asm::{assemble, AsmError};
pub use compiler::{compile, CompileError};
pub use interpreter::{run, Closure, RunError, RuntimeFault};
pub use module::{main, ImportingHandler, Module, ModuleError};

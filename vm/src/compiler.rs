/// AST → [`Module`] emission.
///
/// Code is laid out through the section tree of
/// [`bytecode::CodeBuilder`]: control flow references sections and the
/// final addresses resolve when the tree is assembled. Function bodies
/// collect in one trailing section after the module body.
///
/// # Frame layout
///
/// Each function's prologue reserves its whole local frame
/// (`stack_allocation` nulls) up front. `depth=0` variable access is
/// absolute into that frame, which keeps local addressing valid while a
/// pending return value or a dispatched exception rides the operand
/// stack through a finally block.
///
/// # Non-local exits
///
/// `break`, `continue` and `return` unwind the emitter's control stack:
/// every closure scope passed emits `LeaveClosure`, every active try
/// pops its handler with `LeaveTry`, and every finally on the way runs
/// via `EnterFinally` before the jump (or `Return`) proceeds.
use std::collections::HashMap;
use std::rc::Rc;

use bytecode::{CodeBuilder, MapEntry, Op, SectionId, VariableInfo};
use bytecode::Instruction;
use object::{Import, Value};
use parser::ast::{
    BinaryOp, Block, CatchClause, Expr, ExprKind, FunctionLiteral, LogicalOp,
    Program, Stmt, StmtKind, TableKey, UnaryOp,
};
use parser::scope::{ScopeRef, SlotRef, SlotSource, SlotStorage};
use parser::span::Span;
use parser::{ParseError, ResolveError};
use thiserror::Error;

use crate::module::Module;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Compile source text into a runnable module.
pub fn compile(source: &str) -> Result<Rc<Module>, CompileError> {
    let mut program = parser::parse(source)?;
    parser::resolve(&mut program, source)?;
    tracing::debug!(
        statements = program.statements.len(),
        frame = program.scope.borrow().stack_allocation,
        "emitting module"
    );
    Ok(Emitter::new().program(&program))
}

/// One entry of the emitter's control stack, innermost last.
#[derive(Clone, Copy)]
enum Control {
    Loop {
        continue_to: SectionId,
        break_to: SectionId,
        owns_closure: bool,
    },
    /// A block scope that entered a closure frame.
    ClosureScope,
    /// A try body guarded by a catch handler.
    TryCatch,
    /// A try body guarded by a finally handler.
    TryFinally { finally: SectionId },
}

/// Per-function emission state.
struct FnCtx {
    section: SectionId,
    name: Rc<str>,
    parameters: Rc<[String]>,
    variables: Rc<[VariableInfo]>,
    /// Active closure-owning scopes, innermost last. Depth `k` in
    /// `LoadVariable` addresses `closure_ctx[len - k]`.
    closure_ctx: Vec<ScopeRef>,
    controls: Vec<Control>,
    /// Source-map record tagged onto emitted instructions.
    entry: Rc<MapEntry>,
}

struct Emitter {
    builder: CodeBuilder,
    /// Trailing section collecting all function bodies.
    functions: SectionId,
    data: Vec<Value>,
    strings: HashMap<String, usize>,
    numbers: HashMap<u64, usize>,
    globals: Rc<[String]>,
}

impl Emitter {
    fn new() -> Self {
        let mut builder = CodeBuilder::new();
        let functions = builder.section();
        Self {
            builder,
            functions,
            data: Vec::new(),
            strings: HashMap::new(),
            numbers: HashMap::new(),
            globals: Rc::from(vec![]),
        }
    }

    fn program(mut self, program: &Program) -> Rc<Module> {
        // Imports occupy the front of the data pool in declaration
        // order; the resolver assigned matching global indices.
        let mut globals = Vec::new();
        for stmt in &program.statements {
            if let StmtKind::Import { slot, path } = &stmt.kind {
                debug_assert_eq!(
                    slot.borrow().storage,
                    SlotStorage::Global(self.data.len())
                );
                globals.push(slot.borrow().name.clone());
                self.data.push(Import::new(path.clone()));
            }
        }
        self.globals = Rc::from(globals);

        let root = self.builder.root();
        let span = program
            .statements
            .first()
            .map(|s| s.span)
            .unwrap_or(Span::point(parser::Pos::origin()));
        let mut ctx = FnCtx {
            section: root,
            name: Rc::from("main"),
            parameters: Rc::from(vec![]),
            variables: Rc::from(vec![]),
            closure_ctx: Vec::new(),
            controls: Vec::new(),
            entry: Rc::new(MapEntry {
                row: span.start.row,
                column: span.start.column,
                function: Rc::from("main"),
                parameters: Rc::from(vec![]),
                variables: Rc::from(vec![]),
                globals: Rc::from(vec![]),
            }),
        };
        ctx.entry = self.map_entry(&ctx, span);

        self.prologue(&mut ctx, &program.scope, &[], None);
        ctx.variables = self.visible_variables(&ctx, &program.scope);
        for stmt in &program.statements {
            self.stmt(&mut ctx, stmt);
        }
        self.emit(&mut ctx, Op::Null, 0, 0);
        self.emit(&mut ctx, Op::Return, 0, 0);

        // Function bodies go after the module body.
        self.builder.place(ctx.section, self.functions);
        let (code, map) = self.builder.assemble();
        Module::new(code, self.data, map)
    }

    // ── low-level emission ─────────────────────────────────────────

    fn emit(&mut self, ctx: &mut FnCtx, op: Op, param: u8, value: i32) {
        self.builder
            .emit(ctx.section, op, param, value, ctx.entry.clone());
    }

    fn emit_ref(
        &mut self,
        ctx: &mut FnCtx,
        op: Op,
        param: u8,
        target: SectionId,
    ) {
        self.builder
            .emit_ref(ctx.section, op, param, target, ctx.entry.clone());
    }

    /// Start a new placed section and continue emitting into it.
    fn begin(&mut self, ctx: &mut FnCtx) -> SectionId {
        let next = self.builder.section();
        self.builder.place(ctx.section, next);
        ctx.section = next;
        next
    }

    /// Place an existing section at the current point and switch into
    /// it.
    fn continue_in(&mut self, ctx: &mut FnCtx, section: SectionId) {
        self.builder.place(ctx.section, section);
        ctx.section = section;
    }

    // ── source map ─────────────────────────────────────────────────

    fn map_entry(&self, ctx: &FnCtx, span: Span) -> Rc<MapEntry> {
        Rc::new(MapEntry {
            row: span.start.row,
            column: span.start.column,
            function: ctx.name.clone(),
            parameters: ctx.parameters.clone(),
            variables: ctx.variables.clone(),
            globals: self.globals.clone(),
        })
    }

    /// Names visible at a point inside `scope`, with closure depths as
    /// addressed from the current closure context.
    fn visible_variables(
        &self,
        ctx: &FnCtx,
        scope: &ScopeRef,
    ) -> Rc<[VariableInfo]> {
        let function_depth = scope.borrow().function_depth;
        let mut variables = Vec::new();
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            {
                let borrowed = s.borrow();
                for slot in &borrowed.slots {
                    let slot = slot.borrow();
                    match slot.storage {
                        SlotStorage::Local(_)
                            if borrowed.function_depth == function_depth =>
                        {
                            variables.push(VariableInfo {
                                name: slot.name.clone(),
                                depth: 0,
                            });
                        }
                        SlotStorage::Closure(_) => {
                            let position = ctx
                                .closure_ctx
                                .iter()
                                .rev()
                                .position(|c| Rc::ptr_eq(c, &s));
                            if let Some(position) = position {
                                variables.push(VariableInfo {
                                    name: slot.name.clone(),
                                    depth: position + 1,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            let outer = s.borrow().outer.clone();
            current = outer.and_then(|w| w.upgrade());
        }
        Rc::from(variables)
    }

    // ── data pool ──────────────────────────────────────────────────

    fn string_const(&mut self, text: &str) -> i32 {
        if let Some(&index) = self.strings.get(text) {
            return index as i32;
        }
        let index = self.data.len();
        self.data.push(Value::string(text));
        self.strings.insert(text.to_string(), index);
        index as i32
    }

    fn number_const(&mut self, number: f64) -> i32 {
        if let Some(&index) = self.numbers.get(&number.to_bits()) {
            return index as i32;
        }
        let index = self.data.len();
        self.data.push(Value::Number(number));
        self.numbers.insert(number.to_bits(), index);
        index as i32
    }

    fn load_string(&mut self, ctx: &mut FnCtx, text: &str) {
        let index = self.string_const(text);
        self.emit(ctx, Op::LoadGlobal, 0, index);
    }

    fn load_number(&mut self, ctx: &mut FnCtx, number: f64) {
        let inline = number.fract() == 0.0
            && number.is_finite()
            && !(number == 0.0 && number.is_sign_negative())
            && (Instruction::VALUE_MIN as f64..=Instruction::VALUE_MAX as f64)
                .contains(&number);
        if inline {
            self.emit(ctx, Op::Number, 0, number as i32);
        } else {
            let index = self.number_const(number);
            self.emit(ctx, Op::LoadGlobal, 0, index);
        }
    }

    // ── scopes and variables ───────────────────────────────────────

    /// `(depth, index)` addressing for a local or closure slot.
    fn variable(&self, ctx: &FnCtx, slot: &SlotRef) -> (u8, i32) {
        let slot = slot.borrow();
        match slot.storage {
            SlotStorage::Local(index) => (0, index as i32),
            SlotStorage::Closure(index) => {
                let owner = slot
                    .scope
                    .upgrade()
                    .expect("slot scope outlives emission");
                let position = ctx
                    .closure_ctx
                    .iter()
                    .rev()
                    .position(|s| Rc::ptr_eq(s, &owner));
                debug_assert!(position.is_some(), "closure frame not active");
                ((position.unwrap_or(0) + 1) as u8, index as i32)
            }
            _ => (0, 0),
        }
    }

    /// Push the initial values of a scope's closure layout and enter
    /// the frame.
    fn enter_closure(&mut self, ctx: &mut FnCtx, scope: &ScopeRef) {
        let layout = scope.borrow().closure_layout.clone();
        for slot in &layout {
            match slot.borrow().source {
                SlotSource::Argument(i) => {
                    self.emit(ctx, Op::LoadArgument, 0, i as i32)
                }
                SlotSource::ArgumentSlice(i) => {
                    self.emit(ctx, Op::LoadArgumentList, 0, i as i32)
                }
                SlotSource::None => self.emit(ctx, Op::Null, 0, 0),
            }
        }
        self.emit(ctx, Op::EnterClosure, 0, layout.len() as i32);
        ctx.closure_ctx.push(scope.clone());
    }

    fn leave_closure(&mut self, ctx: &mut FnCtx) {
        self.emit(ctx, Op::LeaveClosure, 0, 0);
        ctx.closure_ctx.pop();
    }

    /// Function prologue: reserve the frame, copy parameters that need
    /// locals, and enter the function's closure frame.
    fn prologue(
        &mut self,
        ctx: &mut FnCtx,
        scope: &ScopeRef,
        params: &[SlotRef],
        rest: Option<&SlotRef>,
    ) {
        let frame = scope.borrow().stack_allocation;
        for _ in 0..frame {
            self.emit(ctx, Op::Null, 0, 0);
        }
        for slot in params.iter().chain(rest) {
            let (storage, source) = {
                let slot = slot.borrow();
                (slot.storage, slot.source)
            };
            if let SlotStorage::Local(index) = storage {
                match source {
                    SlotSource::Argument(i) => {
                        self.emit(ctx, Op::LoadArgument, 0, i as i32)
                    }
                    SlotSource::ArgumentSlice(i) => {
                        self.emit(ctx, Op::LoadArgumentList, 0, i as i32)
                    }
                    SlotSource::None => self.emit(ctx, Op::Null, 0, 0),
                }
                self.emit(ctx, Op::StoreVariable, 0, index as i32);
                self.emit(ctx, Op::Drop, 0, 1);
            }
        }
        if scope.borrow().has_closure() {
            self.enter_closure(ctx, scope);
        }
    }

    fn block(&mut self, ctx: &mut FnCtx, block: &Block) {
        let entered = block.scope.borrow().has_closure();
        if entered {
            self.enter_closure(ctx, &block.scope);
            ctx.controls.push(Control::ClosureScope);
        }
        let saved = ctx.variables.clone();
        ctx.variables = self.visible_variables(ctx, &block.scope);
        for stmt in &block.statements {
            self.stmt(ctx, stmt);
        }
        ctx.variables = saved;
        if entered {
            ctx.controls.pop();
            self.leave_closure(ctx);
        }
    }

    // ── statements ─────────────────────────────────────────────────

    fn stmt(&mut self, ctx: &mut FnCtx, stmt: &Stmt) {
        ctx.entry = self.map_entry(ctx, stmt.span);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expr(ctx, expr);
                self.emit(ctx, Op::Drop, 0, 1);
            }
            StmtKind::Declaration { slot, init } => {
                match init {
                    Some(init) => self.expr(ctx, init),
                    None => self.emit(ctx, Op::Null, 0, 0),
                }
                let (depth, index) = self.variable(ctx, slot);
                self.emit(ctx, Op::StoreVariable, depth, index);
                self.emit(ctx, Op::Drop, 0, 1);
            }
            StmtKind::Import { .. } => {}
            StmtKind::Export { slot, name, init } => {
                self.expr(ctx, init);
                let (depth, index) = self.variable(ctx, slot);
                self.emit(ctx, Op::StoreVariable, depth, index);
                // exports[name] = value, through the receiver.
                self.emit(ctx, Op::LoadReceiver, 0, 0);
                self.emit(ctx, Op::Swap, 0, 0);
                self.load_string(ctx, name);
                self.emit(ctx, Op::Swap, 0, 0);
                self.emit(ctx, Op::StoreElement, 0, 0);
                self.emit(ctx, Op::Drop, 0, 1);
            }
            StmtKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let otherwise = self.builder.section();
                let end = self.builder.section();
                self.expr(ctx, condition);
                self.emit_ref(ctx, Op::ConditionalJump, 0, otherwise);
                self.block(ctx, then_block);
                self.emit_ref(ctx, Op::Jump, 0, end);
                self.continue_in(ctx, otherwise);
                if let Some(else_block) = else_block {
                    self.block(ctx, else_block);
                }
                self.continue_in(ctx, end);
            }
            StmtKind::While {
                scope,
                condition,
                body,
            } => {
                self.loop_stmt(ctx, scope, None, Some(condition), None, body);
            }
            StmtKind::For {
                scope,
                init,
                condition,
                next,
                body,
            } => {
                self.loop_stmt(
                    ctx,
                    scope,
                    init.as_deref(),
                    condition.as_ref(),
                    next.as_ref(),
                    body,
                );
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                self.try_stmt(ctx, body, catch.as_ref(), finally.as_ref());
            }
            StmtKind::Break => self.loop_exit(ctx, true),
            StmtKind::Continue => self.loop_exit(ctx, false),
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.expr(ctx, value),
                    None => self.emit(ctx, Op::Null, 0, 0),
                }
                self.unwind_for_return(ctx);
                self.emit(ctx, Op::Return, 0, 0);
            }
        }
    }

    /// Shared emission for `while` and `for`.
    ///
    /// Layout: closure entry and init run once; each iteration runs
    /// condition, body, then the back edge re-creates the loop frame
    /// (copying current values) before the `next` expression executes,
    /// so functions made during an iteration keep that iteration's
    /// frame.
    fn loop_stmt(
        &mut self,
        ctx: &mut FnCtx,
        scope: &ScopeRef,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        next: Option<&Expr>,
        body: &Block,
    ) {
        let owns_closure = scope.borrow().has_closure();
        if owns_closure {
            self.enter_closure(ctx, scope);
        }
        let saved = ctx.variables.clone();
        ctx.variables = self.visible_variables(ctx, scope);

        if let Some(init) = init {
            self.stmt(ctx, init);
        }

        let condition_sec = self.begin(ctx);
        let back = self.builder.section();
        let exit = self.builder.section();
        let end = self.builder.section();

        ctx.controls.push(Control::Loop {
            continue_to: back,
            break_to: end,
            owns_closure,
        });

        if let Some(condition) = condition {
            self.expr(ctx, condition);
            self.emit_ref(ctx, Op::ConditionalJump, 0, exit);
        }
        self.block(ctx, body);

        // Back edge: a fresh per-iteration frame with carried values,
        // then the step expression, then the condition again.
        self.continue_in(ctx, back);
        if owns_closure {
            let count = scope.borrow().closure_layout.len();
            for index in 0..count {
                self.emit(ctx, Op::LoadVariable, 1, index as i32);
            }
            self.emit(ctx, Op::LeaveClosure, 0, 0);
            self.emit(ctx, Op::EnterClosure, 0, count as i32);
        }
        if let Some(next) = next {
            self.expr(ctx, next);
            self.emit(ctx, Op::Drop, 0, 1);
        }
        self.emit_ref(ctx, Op::Jump, 0, condition_sec);

        ctx.controls.pop();

        self.continue_in(ctx, exit);
        if owns_closure {
            self.leave_closure(ctx);
        }
        self.continue_in(ctx, end);
        ctx.variables = saved;
    }

    /// Emit a `break` (true) or `continue` (false), unwinding closures
    /// and try handlers down to the innermost loop.
    fn loop_exit(&mut self, ctx: &mut FnCtx, is_break: bool) {
        let controls = ctx.controls.clone();
        for control in controls.iter().rev() {
            match *control {
                Control::Loop {
                    continue_to,
                    break_to,
                    owns_closure,
                } => {
                    if is_break {
                        if owns_closure {
                            self.emit(ctx, Op::LeaveClosure, 0, 0);
                        }
                        self.emit_ref(ctx, Op::Jump, 0, break_to);
                    } else {
                        self.emit_ref(ctx, Op::Jump, 0, continue_to);
                    }
                    return;
                }
                Control::ClosureScope => {
                    self.emit(ctx, Op::LeaveClosure, 0, 0);
                }
                Control::TryCatch => self.pop_handler(ctx),
                Control::TryFinally { finally } => {
                    self.pop_handler(ctx);
                    self.emit_ref(ctx, Op::EnterFinally, 0, finally);
                }
            }
        }
    }

    /// Unwind every control on the way out of the function: leave
    /// closure frames, pop try handlers, and run finally blocks
    /// innermost-first.
    fn unwind_for_return(&mut self, ctx: &mut FnCtx) {
        let controls = ctx.controls.clone();
        for control in controls.iter().rev() {
            match *control {
                Control::Loop { owns_closure, .. } => {
                    if owns_closure {
                        self.emit(ctx, Op::LeaveClosure, 0, 0);
                    }
                }
                Control::ClosureScope => {
                    self.emit(ctx, Op::LeaveClosure, 0, 0);
                }
                Control::TryCatch => self.pop_handler(ctx),
                Control::TryFinally { finally } => {
                    self.pop_handler(ctx);
                    self.emit_ref(ctx, Op::EnterFinally, 0, finally);
                }
            }
        }
    }

    /// `LeaveTry` into an inline continuation section.
    fn pop_handler(&mut self, ctx: &mut FnCtx) {
        let cont = self.builder.section();
        self.emit_ref(ctx, Op::LeaveTry, 0, cont);
        self.continue_in(ctx, cont);
    }

    fn try_stmt(
        &mut self,
        ctx: &mut FnCtx,
        body: &Block,
        catch: Option<&CatchClause>,
        finally: Option<&Block>,
    ) {
        match (catch, finally) {
            (Some(catch), None) => self.try_catch(ctx, body, catch),
            (None, Some(finally)) => {
                self.try_finally(ctx, body, None, finally)
            }
            (Some(catch), Some(finally)) => {
                // catch + finally is a try/catch nested inside the
                // try/finally.
                self.try_finally(ctx, body, Some(catch), finally)
            }
            (None, None) => self.block(ctx, body),
        }
    }

    fn try_catch(&mut self, ctx: &mut FnCtx, body: &Block, catch: &CatchClause) {
        let handler = self.builder.section();
        let end = self.builder.section();

        self.emit_ref(ctx, Op::EnterTry, 0, handler);
        ctx.controls.push(Control::TryCatch);
        self.block(ctx, body);
        ctx.controls.pop();
        self.emit_ref(ctx, Op::LeaveTry, 0, end);

        // Handler: the exception is the only value above the frame.
        self.continue_in(ctx, handler);
        let entered = catch.body.scope.borrow().has_closure();
        if entered {
            self.enter_closure(ctx, &catch.body.scope);
            ctx.controls.push(Control::ClosureScope);
        }
        if let Some(binding) = &catch.binding {
            let (depth, index) = self.variable(ctx, binding);
            self.emit(ctx, Op::StoreVariable, depth, index);
        }
        self.emit(ctx, Op::Drop, 0, 1);
        let saved = ctx.variables.clone();
        ctx.variables = self.visible_variables(ctx, &catch.body.scope);
        for stmt in &catch.body.statements {
            self.stmt(ctx, stmt);
        }
        ctx.variables = saved;
        if entered {
            ctx.controls.pop();
            self.leave_closure(ctx);
        }

        self.continue_in(ctx, end);
    }

    fn try_finally(
        &mut self,
        ctx: &mut FnCtx,
        body: &Block,
        catch: Option<&CatchClause>,
        finally: &Block,
    ) {
        let finally_sec = self.builder.section();
        let handler = self.builder.section();
        let end = self.builder.section();

        self.emit_ref(ctx, Op::EnterTry, 0, handler);
        ctx.controls.push(Control::TryFinally {
            finally: finally_sec,
        });
        match catch {
            Some(catch) => self.try_catch(ctx, body, catch),
            None => self.block(ctx, body),
        }
        ctx.controls.pop();

        // Normal completion: pop the handler, run the finally, move on.
        self.pop_handler(ctx);
        self.emit_ref(ctx, Op::EnterFinally, 0, finally_sec);
        self.emit_ref(ctx, Op::Jump, 0, end);

        // Exceptional path: the exception rides the stack through the
        // finally and is rethrown; a finally that returns or throws
        // overrides it.
        self.continue_in(ctx, handler);
        self.emit_ref(ctx, Op::EnterFinally, 0, finally_sec);
        self.emit(ctx, Op::Throw, 0, 0);

        self.continue_in(ctx, finally_sec);
        self.block(ctx, finally);
        self.emit(ctx, Op::LeaveFinally, 0, 0);

        self.continue_in(ctx, end);
    }

    // ── expressions ────────────────────────────────────────────────

    fn expr(&mut self, ctx: &mut FnCtx, expr: &Expr) {
        match &expr.kind {
            ExprKind::Null => self.emit(ctx, Op::Null, 0, 0),
            ExprKind::Boolean(b) => {
                self.emit(ctx, Op::Boolean, 0, *b as i32)
            }
            ExprKind::Number(n) => self.load_number(ctx, *n),
            ExprKind::Str(s) => {
                let index = self.string_const(s);
                self.emit(ctx, Op::LoadGlobal, 0, index);
            }
            ExprKind::This => self.emit(ctx, Op::LoadReceiver, 0, 0),
            ExprKind::Name { slot, .. } => {
                let slot = slot.clone().expect("resolved name");
                self.name_load(ctx, &slot);
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(ctx, item);
                }
                self.emit(ctx, Op::List, 0, items.len() as i32);
            }
            ExprKind::Table(entries) => {
                for (key, value) in entries {
                    match key {
                        TableKey::Word(name) => self.load_string(ctx, name),
                        TableKey::Computed(key) => self.expr(ctx, key),
                    }
                    self.expr(ctx, value);
                }
                self.emit(ctx, Op::Table, 0, entries.len() as i32);
            }
            ExprKind::Function(func) => {
                self.function_literal(ctx, func, expr.span)
            }
            ExprKind::Member { object, name } => {
                self.expr(ctx, object);
                self.load_string(ctx, name);
                self.emit(ctx, Op::LoadElement, 0, 0);
            }
            ExprKind::Index { object, index } => {
                self.expr(ctx, object);
                self.expr(ctx, index);
                self.emit(ctx, Op::LoadElement, 0, 0);
            }
            ExprKind::Call { callee, args } => {
                self.call(ctx, callee, args)
            }
            ExprKind::Unary { op, operand } => {
                self.expr(ctx, operand);
                match op {
                    UnaryOp::Negate => self.emit(ctx, Op::Negate, 0, 0),
                    UnaryOp::Not => self.emit(ctx, Op::Not, 0, 0),
                    UnaryOp::Plus => {
                        // Numeric coercion; double negation preserves
                        // NaN and signed zero.
                        self.emit(ctx, Op::Negate, 0, 0);
                        self.emit(ctx, Op::Negate, 0, 0);
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(ctx, left);
                self.expr(ctx, right);
                self.binary_op(ctx, *op);
            }
            ExprKind::Logical { op, left, right } => {
                let short = self.builder.section();
                self.expr(ctx, left);
                match op {
                    LogicalOp::And => {
                        self.emit_ref(ctx, Op::ConditionalAnd, 0, short)
                    }
                    LogicalOp::Or => {
                        self.emit_ref(ctx, Op::ConditionalOr, 0, short)
                    }
                }
                self.expr(ctx, right);
                self.continue_in(ctx, short);
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                let alt = self.builder.section();
                let end = self.builder.section();
                self.expr(ctx, condition);
                self.emit_ref(ctx, Op::ConditionalJump, 0, alt);
                self.expr(ctx, then);
                self.emit_ref(ctx, Op::Jump, 0, end);
                self.continue_in(ctx, alt);
                self.expr(ctx, otherwise);
                self.continue_in(ctx, end);
            }
            ExprKind::Assign { target, op, value } => {
                self.assign(ctx, target, *op, value)
            }
            ExprKind::Throw(operand) => {
                self.expr(ctx, operand);
                self.emit(ctx, Op::Throw, 0, 0);
            }
        }
    }

    fn name_load(&mut self, ctx: &mut FnCtx, slot: &SlotRef) {
        let (storage, source) = {
            let slot = slot.borrow();
            (slot.storage, slot.source)
        };
        match storage {
            SlotStorage::Global(index) => {
                self.emit(ctx, Op::LoadGlobal, 0, index as i32)
            }
            SlotStorage::Local(_) | SlotStorage::Closure(_) => {
                let (depth, index) = self.variable(ctx, slot);
                self.emit(ctx, Op::LoadVariable, depth, index);
            }
            SlotStorage::None => match source {
                SlotSource::Argument(i) => {
                    self.emit(ctx, Op::LoadArgument, 0, i as i32)
                }
                SlotSource::ArgumentSlice(i) => {
                    self.emit(ctx, Op::LoadArgumentList, 0, i as i32)
                }
                SlotSource::None => self.emit(ctx, Op::Null, 0, 0),
            },
        }
    }

    fn binary_op(&mut self, ctx: &mut FnCtx, op: BinaryOp) {
        match op {
            BinaryOp::Add => self.emit(ctx, Op::Add, 0, 0),
            BinaryOp::Subtract => self.emit(ctx, Op::Subtract, 0, 0),
            BinaryOp::Multiply => self.emit(ctx, Op::Multiply, 0, 0),
            BinaryOp::Divide => self.emit(ctx, Op::Divide, 0, 0),
            BinaryOp::Remainder => self.emit(ctx, Op::Remainder, 0, 0),
            BinaryOp::And => self.emit(ctx, Op::And, 0, 0),
            BinaryOp::Or => self.emit(ctx, Op::Or, 0, 0),
            BinaryOp::Xor => self.emit(ctx, Op::Xor, 0, 0),
            BinaryOp::Equal => self.emit(ctx, Op::Equal, 0, 0),
            BinaryOp::NotEqual => {
                self.emit(ctx, Op::Equal, 0, 0);
                self.emit(ctx, Op::Not, 0, 0);
            }
            BinaryOp::Less => self.emit(ctx, Op::Less, 0, 0),
            BinaryOp::LessOrEqual => self.emit(ctx, Op::LessOrEqual, 0, 0),
            BinaryOp::Greater => self.emit(ctx, Op::Greater, 0, 0),
            BinaryOp::GreaterOrEqual => {
                self.emit(ctx, Op::GreaterOrEqual, 0, 0)
            }
        }
    }

    /// Calls: a member or index callee passes its object as the
    /// receiver; anything else gets a null receiver.
    fn call(&mut self, ctx: &mut FnCtx, callee: &Expr, args: &[Expr]) {
        match &callee.kind {
            ExprKind::Member { object, name } => {
                self.expr(ctx, object);
                self.emit(ctx, Op::Copy, 0, 1);
                self.load_string(ctx, name);
                self.emit(ctx, Op::LoadElement, 0, 0);
                self.emit(ctx, Op::Swap, 0, 0);
            }
            ExprKind::Index { object, index } => {
                self.expr(ctx, object);
                self.emit(ctx, Op::Copy, 0, 1);
                self.expr(ctx, index);
                self.emit(ctx, Op::LoadElement, 0, 0);
                self.emit(ctx, Op::Swap, 0, 0);
            }
            _ => {
                self.expr(ctx, callee);
                self.emit(ctx, Op::Null, 0, 0);
            }
        }
        for arg in args {
            self.expr(ctx, arg);
        }
        self.emit(ctx, Op::Call, 0, args.len() as i32);
    }

    fn assign(
        &mut self,
        ctx: &mut FnCtx,
        target: &Expr,
        op: Option<BinaryOp>,
        value: &Expr,
    ) {
        match &target.kind {
            ExprKind::Name { slot, .. } => {
                let slot = slot.clone().expect("resolved assignment target");
                match op {
                    Some(op) => {
                        self.name_load(ctx, &slot);
                        self.expr(ctx, value);
                        self.binary_op(ctx, op);
                    }
                    None => self.expr(ctx, value),
                }
                let (depth, index) = self.variable(ctx, &slot);
                self.emit(ctx, Op::StoreVariable, depth, index);
            }
            ExprKind::Member { object, name } => {
                self.expr(ctx, object);
                self.load_string(ctx, name);
                self.compound_tail(ctx, op, value);
            }
            ExprKind::Index { object, index } => {
                self.expr(ctx, object);
                self.expr(ctx, index);
                self.compound_tail(ctx, op, value);
            }
            // The parser only lets names, members and indexes through.
            _ => self.emit(ctx, Op::Null, 0, 0),
        }
    }

    /// With container and key on the stack: evaluate (or combine) the
    /// value and store, leaving the stored value.
    fn compound_tail(
        &mut self,
        ctx: &mut FnCtx,
        op: Option<BinaryOp>,
        value: &Expr,
    ) {
        match op {
            Some(op) => {
                self.emit(ctx, Op::Copy, 0, 2);
                self.emit(ctx, Op::LoadElement, 0, 0);
                self.expr(ctx, value);
                self.binary_op(ctx, op);
            }
            None => self.expr(ctx, value),
        }
        self.emit(ctx, Op::StoreElement, 0, 0);
    }

    fn function_literal(
        &mut self,
        ctx: &mut FnCtx,
        func: &FunctionLiteral,
        span: Span,
    ) {
        let body = self.builder.section();
        self.builder.place(self.functions, body);

        let captures = func.scope.borrow().contains_closure_references;
        let name: Rc<str> = match &func.name {
            Some(name) => Rc::from(name.as_str()),
            None => Rc::from("anonymous"),
        };
        let mut parameters: Vec<String> = func
            .params
            .iter()
            .map(|p| p.borrow().name.clone())
            .collect();
        if let Some(rest) = &func.rest {
            parameters.push(format!("...{}", rest.borrow().name));
        }

        let mut inner = FnCtx {
            section: body,
            name: name.clone(),
            parameters: Rc::from(parameters),
            variables: Rc::from(vec![]),
            closure_ctx: if captures {
                ctx.closure_ctx.clone()
            } else {
                Vec::new()
            },
            controls: Vec::new(),
            entry: ctx.entry.clone(),
        };
        inner.entry = self.map_entry(&inner, span);

        self.prologue(&mut inner, &func.scope, &func.params, func.rest.as_ref());
        inner.variables = self.visible_variables(&inner, &func.scope);
        for stmt in &func.body {
            self.stmt(&mut inner, stmt);
        }
        self.emit(&mut inner, Op::Null, 0, 0);
        self.emit(&mut inner, Op::Return, 0, 0);

        self.emit_ref(ctx, Op::Function, captures as u8, body);
    }
}

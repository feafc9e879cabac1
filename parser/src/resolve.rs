/// Name binding, closure capture analysis, and storage layout.
///
/// Runs once over the parsed AST. The first walk binds every name use to
/// its declaring slot, marks captures (uses that cross a function
/// boundary) and flags the function scopes that must carry the closure
/// chain. The layout pass then assigns closure indices, dense local
/// indices (reused across sibling scopes) and the data-pool positions of
/// imports.
use crate::ast::{
    Block, Expr, ExprKind, FunctionLiteral, Program, Stmt, StmtKind, TableKey,
};
use crate::scope::{
    self, ScopeKind, ScopeRef, SlotKind, SlotRef, SlotStorage,
};
use crate::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    pub message: String,
    pub span: Span,
    pub line: String,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if !self.line.is_empty() {
            let caret_at = self.span.start.column.saturating_sub(1);
            write!(f, "\n  {}\n  {}^", self.line, " ".repeat(caret_at))?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolveError {}

/// Resolve a parsed program in place.
pub fn resolve(program: &mut Program, source: &str) -> Result<(), ResolveError> {
    let resolver = Resolver { source };
    let scope = program.scope.clone();
    for stmt in &mut program.statements {
        resolver.stmt(stmt, &scope)?;
    }
    layout_module(&program.scope);
    Ok(())
}

struct Resolver<'a> {
    source: &'a str,
}

impl Resolver<'_> {
    fn error(&self, message: String, span: Span) -> ResolveError {
        let line = self
            .source
            .lines()
            .nth(span.start.row.saturating_sub(1))
            .unwrap_or_default()
            .to_string();
        ResolveError {
            message,
            span,
            line,
        }
    }

    fn block(&self, block: &mut Block) -> Result<(), ResolveError> {
        let scope = block.scope.clone();
        for stmt in &mut block.statements {
            self.stmt(stmt, &scope)?;
        }
        Ok(())
    }

    fn stmt(&self, stmt: &mut Stmt, scope: &ScopeRef) -> Result<(), ResolveError> {
        match &mut stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr, scope),
            StmtKind::Declaration { init, .. } => match init {
                Some(init) => self.expr(init, scope),
                None => Ok(()),
            },
            StmtKind::Import { .. } => Ok(()),
            StmtKind::Export { init, .. } => self.expr(init, scope),
            StmtKind::If {
                condition,
                then_block,
                else_block,
            } => {
                self.expr(condition, scope)?;
                self.block(then_block)?;
                if let Some(else_block) = else_block {
                    self.block(else_block)?;
                }
                Ok(())
            }
            StmtKind::While {
                scope: loop_scope,
                condition,
                body,
            } => {
                self.expr(condition, loop_scope)?;
                self.block(body)
            }
            StmtKind::For {
                scope: loop_scope,
                init,
                condition,
                next,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init, loop_scope)?;
                }
                if let Some(condition) = condition {
                    self.expr(condition, loop_scope)?;
                }
                if let Some(next) = next {
                    self.expr(next, loop_scope)?;
                }
                self.block(body)
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                self.block(body)?;
                if let Some(catch) = catch {
                    self.block(&mut catch.body)?;
                }
                if let Some(finally) = finally {
                    self.block(finally)?;
                }
                Ok(())
            }
            StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::Return(value) => match value {
                Some(value) => self.expr(value, scope),
                None => Ok(()),
            },
        }
    }

    fn expr(&self, expr: &mut Expr, scope: &ScopeRef) -> Result<(), ResolveError> {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Null
            | ExprKind::Boolean(_)
            | ExprKind::Number(_)
            | ExprKind::Str(_)
            | ExprKind::This => Ok(()),
            ExprKind::Name { name, slot } => {
                let found = self.bind(name, span, scope)?;
                *slot = Some(found);
                Ok(())
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(item, scope)?;
                }
                Ok(())
            }
            ExprKind::Table(entries) => {
                for (key, value) in entries {
                    if let TableKey::Computed(key) = key {
                        self.expr(key, scope)?;
                    }
                    self.expr(value, scope)?;
                }
                Ok(())
            }
            ExprKind::Function(func) => self.function(func),
            ExprKind::Member { object, .. } => self.expr(object, scope),
            ExprKind::Index { object, index } => {
                self.expr(object, scope)?;
                self.expr(index, scope)
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee, scope)?;
                for arg in args {
                    self.expr(arg, scope)?;
                }
                Ok(())
            }
            ExprKind::Unary { operand, .. } => self.expr(operand, scope),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left, scope)?;
                self.expr(right, scope)
            }
            ExprKind::Logical { left, right, .. } => {
                self.expr(left, scope)?;
                self.expr(right, scope)
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition, scope)?;
                self.expr(then, scope)?;
                self.expr(otherwise, scope)
            }
            ExprKind::Assign { target, value, .. } => {
                self.expr(value, scope)?;
                self.expr(target, scope)?;
                if let ExprKind::Name { name, slot } = &target.kind {
                    if let Some(slot) = slot {
                        if slot.borrow().read_only {
                            return Err(self.error(
                                format!(
                                    "cannot assign to constant `{}`",
                                    name
                                ),
                                target.span,
                            ));
                        }
                        slot.borrow_mut().assigned = true;
                    }
                }
                Ok(())
            }
            ExprKind::Throw(operand) => self.expr(operand, scope),
        }
    }

    fn function(&self, func: &mut FunctionLiteral) -> Result<(), ResolveError> {
        let scope = func.scope.clone();
        for stmt in &mut func.body {
            self.stmt(stmt, &scope)?;
        }
        Ok(())
    }

    /// Bind a name use, marking the capture when it crosses a function
    /// boundary.
    fn bind(
        &self,
        name: &str,
        span: Span,
        scope: &ScopeRef,
    ) -> Result<SlotRef, ResolveError> {
        let Some(slot) = scope::lookup(scope, name) else {
            return Err(
                self.error(format!("unresolved identifier `{}`", name), span)
            );
        };

        let declaring_depth = {
            let borrowed = slot.borrow();
            if borrowed.kind == SlotKind::Import {
                // Imports live in the data pool; no capture needed.
                return Ok(slot.clone());
            }
            borrowed
                .scope
                .upgrade()
                .map(|s| s.borrow().function_depth)
                .unwrap_or(0)
        };

        let use_depth = scope.borrow().function_depth;
        if use_depth > declaring_depth {
            slot.borrow_mut().captured = true;
            // Every function scope between the use and the declaration
            // must carry the closure chain.
            let mut current = Some(scope.clone());
            while let Some(s) = current {
                let mut borrowed = s.borrow_mut();
                if borrowed.function_depth <= declaring_depth {
                    break;
                }
                if borrowed.kind == ScopeKind::Function {
                    borrowed.contains_closure_references = true;
                }
                current = borrowed.outer.as_ref().and_then(|w| w.upgrade());
            }
        }
        Ok(slot)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Storage layout
// ═══════════════════════════════════════════════════════════════════

fn layout_module(root: &ScopeRef) {
    // Globals: only imports, positioned in declaration order at the
    // front of the data pool.
    let slots: Vec<SlotRef> = root.borrow().slots.clone();
    let mut global = 0;
    for slot in &slots {
        let mut borrowed = slot.borrow_mut();
        if borrowed.kind == SlotKind::Import {
            borrowed.storage = SlotStorage::Global(global);
            global += 1;
        }
    }
    layout_function(root);
}

fn layout_function(func: &ScopeRef) {
    let frame = layout_scope(func, 0);
    func.borrow_mut().stack_allocation = frame;
}

/// Assign closure indices and dense local indices for one scope, then
/// recurse. Sibling scopes reuse the same local index range; the result
/// is the high-water mark.
fn layout_scope(scope: &ScopeRef, base: usize) -> usize {
    let slots: Vec<SlotRef> = scope.borrow().slots.clone();

    for slot in &slots {
        if slot.borrow().captured {
            let index = scope.borrow().closure_layout.len();
            scope.borrow_mut().closure_layout.push(slot.clone());
            slot.borrow_mut().storage = SlotStorage::Closure(index);
        }
    }

    let mut next = base;
    for slot in &slots {
        let mut borrowed = slot.borrow_mut();
        if borrowed.captured || borrowed.kind == SlotKind::Import {
            continue;
        }
        let needs_local = match borrowed.kind {
            SlotKind::Parameter => {
                // An unassigned positional parameter reads straight from
                // the argument vector; a rest parameter materialises its
                // list once.
                borrowed.assigned
                    || matches!(
                        borrowed.source,
                        crate::scope::SlotSource::ArgumentSlice(_)
                    )
            }
            SlotKind::Variable => true,
            SlotKind::Import => false,
        };
        if needs_local {
            borrowed.storage = SlotStorage::Local(next);
            next += 1;
        }
    }

    let inner: Vec<ScopeRef> = scope.borrow().inner.clone();
    let mut high_water = next;
    for child in &inner {
        if child.borrow().kind == ScopeKind::Function {
            layout_function(child);
        } else {
            high_water = high_water.max(layout_scope(child, next));
        }
    }
    high_water
}

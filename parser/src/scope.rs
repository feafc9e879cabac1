/// Compile-time scopes and slots.
///
/// The parser builds a [`LexicalScope`] tree while it parses, declaring a
/// [`Slot`] per `var`/`const`/parameter/import. The resolver then binds
/// every name use to its slot, marks captures, and finalizes storage.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub type ScopeRef = Rc<RefCell<LexicalScope>>;
pub type SlotRef = Rc<RefCell<Slot>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A function body (the module body is one).
    Function,
    /// A braced block, including catch and finally bodies.
    Block,
    /// A `while` or `for` scope; closures here are per-iteration.
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Import,
    Variable,
    Parameter,
}

/// Where a slot's initial value comes from at scope entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    None,
    /// Positional argument `i`.
    Argument(usize),
    /// The argument tail starting at `i` (rest parameter).
    ArgumentSlice(usize),
}

/// Where a slot lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStorage {
    /// Read straight from the source (uncaptured, unassigned parameter).
    None,
    /// Data-pool entry `i` (imports only).
    Global(usize),
    /// Operand-stack frame position `i` of the enclosing function.
    Local(usize),
    /// Slot `i` of the owning scope's closure frame.
    Closure(usize),
}

#[derive(Debug)]
pub struct Slot {
    pub name: String,
    pub kind: SlotKind,
    pub source: SlotSource,
    pub storage: SlotStorage,
    pub read_only: bool,
    /// Set by the resolver when any use crosses a function boundary.
    pub captured: bool,
    /// Set by the resolver when any use writes the slot.
    pub assigned: bool,
    /// The scope that declared this slot.
    pub scope: Weak<RefCell<LexicalScope>>,
}

#[derive(Debug, Default)]
pub struct LexicalScope {
    pub kind: ScopeKind,
    pub outer: Option<Weak<RefCell<LexicalScope>>>,
    pub inner: Vec<ScopeRef>,
    pub slots: Vec<SlotRef>,
    /// Captured slots owned by this scope, in dense closure-index order.
    pub closure_layout: Vec<SlotRef>,
    /// Function scopes: frame size (max local index + 1).
    pub stack_allocation: usize,
    /// Function scopes: the function must capture the enclosing closure
    /// chain because something inside reads or writes through it.
    pub contains_closure_references: bool,
    /// Nesting depth of the enclosing function; the module body is 1.
    pub function_depth: usize,
}

impl Default for ScopeKind {
    fn default() -> Self {
        ScopeKind::Function
    }
}

impl LexicalScope {
    /// The module scope: a function scope with no outer.
    pub fn module() -> ScopeRef {
        Rc::new(RefCell::new(LexicalScope {
            kind: ScopeKind::Function,
            function_depth: 1,
            ..LexicalScope::default()
        }))
    }

    /// Create a child scope and link it into the tree.
    pub fn child(outer: &ScopeRef, kind: ScopeKind) -> ScopeRef {
        let function_depth = match kind {
            ScopeKind::Function => outer.borrow().function_depth + 1,
            _ => outer.borrow().function_depth,
        };
        let scope = Rc::new(RefCell::new(LexicalScope {
            kind,
            outer: Some(Rc::downgrade(outer)),
            function_depth,
            ..LexicalScope::default()
        }));
        outer.borrow_mut().inner.push(scope.clone());
        scope
    }

    pub fn is_module(&self) -> bool {
        self.outer.is_none()
    }

    /// Whether this scope owns a closure frame at runtime.
    pub fn has_closure(&self) -> bool {
        !self.closure_layout.is_empty()
    }
}

/// Declare a slot in `scope`. Fails when the name is already visible in
/// the current function (shadowing across function boundaries is fine).
pub fn declare(
    scope: &ScopeRef,
    name: &str,
    kind: SlotKind,
    read_only: bool,
) -> Result<SlotRef, SlotRef> {
    if let Some(existing) = lookup_within_function(scope, name) {
        return Err(existing);
    }
    let slot = Rc::new(RefCell::new(Slot {
        name: name.to_string(),
        kind,
        source: SlotSource::None,
        storage: SlotStorage::None,
        read_only,
        captured: false,
        assigned: false,
        scope: Rc::downgrade(scope),
    }));
    scope.borrow_mut().slots.push(slot.clone());
    Ok(slot)
}

/// Find the slot a name refers to, walking outward through every scope.
pub fn lookup(scope: &ScopeRef, name: &str) -> Option<SlotRef> {
    let mut current = Some(scope.clone());
    while let Some(scope) = current {
        let borrowed = scope.borrow();
        if let Some(slot) = find_slot(&borrowed, name) {
            return Some(slot);
        }
        current = borrowed.outer.as_ref().and_then(Weak::upgrade);
    }
    None
}

/// Like [`lookup`], but stops after the innermost function scope.
fn lookup_within_function(scope: &ScopeRef, name: &str) -> Option<SlotRef> {
    let mut current = Some(scope.clone());
    while let Some(scope) = current {
        let borrowed = scope.borrow();
        if let Some(slot) = find_slot(&borrowed, name) {
            return Some(slot);
        }
        if borrowed.kind == ScopeKind::Function {
            return None;
        }
        current = borrowed.outer.as_ref().and_then(Weak::upgrade);
    }
    None
}

fn find_slot(scope: &LexicalScope, name: &str) -> Option<SlotRef> {
    scope
        .slots
        .iter()
        .find(|slot| slot.borrow().name == name)
        .cloned()
}

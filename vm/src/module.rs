/// Compiled modules: code, data pool, source map and exports.
///
/// A module is long-lived and may run any number of times. The data
/// pool starts with one `Import` placeholder per `import` declaration;
/// the first call to [`main`] routes each through the importing hook and
/// replaces the pool slot with the resolved value, so later `LoadGlobal`
/// reads are a plain indexed copy.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytecode::{disassemble, Instruction, SourceMap};
use object::{Import, Table, Value};
use thiserror::Error;

use crate::interpreter::{run, RunError, RuntimeFault};

/// Handler for the importing event; sets `import.value`.
pub type ImportingHandler = Box<dyn Fn(&Module, &Rc<Import>)>;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("import '{name}' is unresolved")]
    ImportUnresolved { name: String },
    #[error(transparent)]
    Fault(#[from] RuntimeFault),
    #[error("uncaught exception: {0}")]
    Exception(Value),
}

pub struct Module {
    code: Vec<Instruction>,
    data: RefCell<Vec<Value>>,
    map: SourceMap,
    exports: Value,
    resolved: Cell<bool>,
    importing: RefCell<Option<ImportingHandler>>,
}

impl Module {
    pub fn new(
        code: Vec<Instruction>,
        data: Vec<Value>,
        map: SourceMap,
    ) -> Rc<Module> {
        Rc::new(Module {
            code,
            data: RefCell::new(data),
            map,
            exports: Value::table(Table::new()),
            resolved: Cell::new(false),
            importing: RefCell::new(None),
        })
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.map
    }

    /// The exports table (shared; user code mutates it through `this`).
    pub fn exports(&self) -> Value {
        self.exports.clone()
    }

    /// Data-pool entry `index`.
    pub fn global(&self, index: usize) -> Option<Value> {
        self.data.borrow().get(index).cloned()
    }

    /// Subscribe to the importing event fired for each unresolved
    /// import at the first run.
    pub fn on_importing(
        &self,
        handler: impl Fn(&Module, &Rc<Import>) + 'static,
    ) {
        *self.importing.borrow_mut() = Some(Box::new(handler));
    }

    /// Address-labelled instruction listing.
    pub fn disassemble(&self) -> String {
        disassemble(&self.code)
    }

    /// Fix up every `Import` placeholder in the data pool, in place.
    pub fn resolve_imports(&self) -> Result<(), ModuleError> {
        if self.resolved.get() {
            return Ok(());
        }
        let count = self.data.borrow().len();
        for index in 0..count {
            let entry = self.data.borrow()[index].clone();
            let Value::Import(import) = entry else {
                continue;
            };
            tracing::debug!(name = %import.name, "resolving import");
            // The handler may re-enter the compiler and interpreter to
            // load a submodule; no pool borrow is held across it.
            if let Some(handler) = &*self.importing.borrow() {
                handler(self, &import);
            }
            let resolved = import.value.borrow().clone();
            if resolved.is_null() {
                return Err(ModuleError::ImportUnresolved {
                    name: import.name.clone(),
                });
            }
            self.data.borrow_mut()[index] = resolved;
        }
        self.resolved.set(true);
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("code", &self.code.len())
            .field("data", &self.data.borrow().len())
            .field("resolved", &self.resolved.get())
            .finish()
    }
}

/// Run the module body with the exports table as receiver.
pub fn main(module: &Rc<Module>, args: &[Value]) -> Result<Value, ModuleError> {
    module.resolve_imports()?;
    match run(module, module.exports(), args.to_vec(), 0, None) {
        Ok(value) => Ok(value),
        Err(RunError::Exception(e)) => Err(ModuleError::Exception(e)),
        Err(RunError::Fault(fault)) => Err(ModuleError::Fault(fault)),
    }
}

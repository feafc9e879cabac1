/// The stack virtual machine.
///
/// A [`run`] executes one function activation: an operand stack, the
/// current closure chain, the exception-handler stack, a
/// finally-return-address stack and an instruction pointer over the
/// module's code. Function calls construct a fresh nested run on the
/// host stack; there is no scheduler.
///
/// Stack frame layout: the prologue reserves the function's whole local
/// frame (`stack_allocation` nulls), so `LoadVariable`/`StoreVariable`
/// with `depth=0` address absolute stack positions. Values in flight
/// through a finally block (a pending return value, a dispatched
/// exception) ride the operand stack above the frame without disturbing
/// local addressing.
use std::cell::RefCell;
use std::rc::Rc;

use bytecode::Op;
use object::{Callable, Exception, Value};
use thiserror::Error;

use crate::module::Module;

/// A captured frame: fixed-size value slots plus the enclosing frame.
#[derive(Debug)]
pub struct Closure {
    pub parent: Option<Rc<Closure>>,
    pub values: RefCell<Vec<Value>>,
}

/// An internal invariant violation. Unreachable with emitter-produced
/// code; hand-assembled modules can trigger these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeFault {
    #[error("invalid opcode at address {address}")]
    InvalidOpcode { address: usize },
    #[error("operand stack underflow at address {address}")]
    StackUnderflow { address: usize },
    #[error("bad variable (depth {depth}, index {index}) at address {address}")]
    BadVariable {
        depth: usize,
        index: usize,
        address: usize,
    },
    #[error("no data pool entry {index} at address {address}")]
    BadGlobal { index: usize, address: usize },
    #[error("negative jump target at address {address}")]
    BadJump { address: usize },
    #[error("no closure frame to leave at address {address}")]
    BadClosure { address: usize },
    #[error("no exception handler to leave at address {address}")]
    BadHandler { address: usize },
    #[error("no finally return address at address {address}")]
    BadFinally { address: usize },
}

/// How a run can end besides a value: a user exception, or a fault.
#[derive(Debug)]
pub enum RunError {
    Exception(Value),
    Fault(RuntimeFault),
}

struct Handler {
    ip: usize,
    stack_depth: usize,
    closure: Option<Rc<Closure>>,
    finally_depth: usize,
}

/// Execute module code starting at `entry` until `Return` or the end of
/// the code.
pub fn run(
    module: &Rc<Module>,
    receiver: Value,
    args: Vec<Value>,
    entry: usize,
    closure: Option<Rc<Closure>>,
) -> Result<Value, RunError> {
    Run {
        module: module.clone(),
        receiver,
        args,
        stack: Vec::with_capacity(16),
        closure,
        handlers: Vec::new(),
        finally_stack: Vec::new(),
        ip: entry,
        address: entry,
    }
    .execute()
}

struct Run {
    module: Rc<Module>,
    receiver: Value,
    args: Vec<Value>,
    stack: Vec<Value>,
    closure: Option<Rc<Closure>>,
    handlers: Vec<Handler>,
    finally_stack: Vec<usize>,
    ip: usize,
    /// Address of the instruction being executed (for faults/traces).
    address: usize,
}

impl Run {
    fn execute(mut self) -> Result<Value, RunError> {
        let module = self.module.clone();
        let code = module.code();
        while self.ip < code.len() {
            self.address = self.ip;
            let instr = code[self.ip];
            self.ip += 1;

            let Some(op) = instr.opcode() else {
                return Err(RunError::Fault(RuntimeFault::InvalidOpcode {
                    address: self.address,
                }));
            };
            let param = instr.param() as usize;
            let value = instr.value();

            match op {
                Op::Null => self.stack.push(Value::Null),
                Op::Boolean => self.stack.push(Value::Boolean(value != 0)),
                Op::Number => self.stack.push(Value::Number(value as f64)),

                Op::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(self.fault_underflow());
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                Op::Copy => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(n) else {
                        return Err(self.fault_underflow());
                    };
                    for i in at..at + n {
                        let v = self.stack[i].clone();
                        self.stack.push(v);
                    }
                }
                Op::Drop => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(n) else {
                        return Err(self.fault_underflow());
                    };
                    self.stack.truncate(at);
                }

                Op::List => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(n) else {
                        return Err(self.fault_underflow());
                    };
                    let items = self.stack.split_off(at);
                    self.stack.push(Value::list(items));
                }
                Op::Table => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(2 * n) else {
                        return Err(self.fault_underflow());
                    };
                    let mut items = self.stack.split_off(at).into_iter();
                    let mut table = object::Table::new();
                    while let (Some(key), Some(entry)) =
                        (items.next(), items.next())
                    {
                        table.insert(key, entry);
                    }
                    self.stack.push(Value::table(table));
                }

                Op::EnterClosure => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(n) else {
                        return Err(self.fault_underflow());
                    };
                    let values = self.stack.split_off(at);
                    self.closure = Some(Rc::new(Closure {
                        parent: self.closure.take(),
                        values: RefCell::new(values),
                    }));
                }
                Op::LeaveClosure => {
                    let Some(current) = self.closure.take() else {
                        return Err(RunError::Fault(
                            RuntimeFault::BadClosure {
                                address: self.address,
                            },
                        ));
                    };
                    self.closure = current.parent.clone();
                }

                Op::Function => {
                    if value < 0 {
                        return Err(RunError::Fault(RuntimeFault::BadJump {
                            address: self.address,
                        }));
                    }
                    let entry = value as usize;
                    let captured = if param == 1 {
                        self.closure.clone()
                    } else {
                        None
                    };
                    let name = self
                        .module
                        .source_map()
                        .get(entry)
                        .map(|e| e.function.clone())
                        .unwrap_or_else(|| Rc::from("anonymous"));
                    self.stack.push(Value::Function(Rc::new(
                        BytecodeFunction {
                            module: self.module.clone(),
                            entry,
                            closure: captured,
                            name,
                        },
                    )));
                }

                Op::LoadReceiver => self.stack.push(self.receiver.clone()),
                Op::LoadArgument => {
                    let i = value.max(0) as usize;
                    self.stack.push(
                        self.args.get(i).cloned().unwrap_or(Value::Null),
                    );
                }
                Op::LoadArgumentList => {
                    let i = value.max(0) as usize;
                    let tail = if i < self.args.len() {
                        self.args[i..].to_vec()
                    } else {
                        Vec::new()
                    };
                    self.stack.push(Value::list(tail));
                }
                Op::LoadGlobal => {
                    let i = value.max(0) as usize;
                    let Some(v) = self.module.global(i) else {
                        return Err(RunError::Fault(RuntimeFault::BadGlobal {
                            index: i,
                            address: self.address,
                        }));
                    };
                    self.stack.push(v);
                }

                Op::LoadVariable => {
                    let v = self.read_variable(param, value)?;
                    self.stack.push(v);
                }
                Op::StoreVariable => {
                    // Value stays on the stack: assignment yields it.
                    let Some(v) = self.stack.last().cloned() else {
                        return Err(self.fault_underflow());
                    };
                    self.write_variable(param, value, v)?;
                }

                Op::LoadElement => {
                    let key = self.pop()?;
                    let container = self.pop()?;
                    match container.get(&key) {
                        Ok(v) => self.stack.push(v),
                        Err(e) => self.raise(e)?,
                    }
                }
                Op::StoreElement => {
                    let element = self.pop()?;
                    let key = self.pop()?;
                    let container = self.pop()?;
                    match container.set(&key, element.clone()) {
                        Ok(()) => self.stack.push(element),
                        Err(e) => self.raise(e)?,
                    }
                }

                Op::Negate => {
                    let a = self.pop()?;
                    self.stack.push(Value::Number(-a.to_number()));
                }
                Op::Add
                | Op::Subtract
                | Op::Multiply
                | Op::Divide
                | Op::Remainder => {
                    let b = self.pop()?.to_number();
                    let a = self.pop()?.to_number();
                    let result = match op {
                        Op::Add => a + b,
                        Op::Subtract => a - b,
                        Op::Multiply => a * b,
                        Op::Divide => a / b,
                        _ => a % b,
                    };
                    self.stack.push(Value::Number(result));
                }

                Op::Not => {
                    let a = self.pop()?;
                    self.stack.push(Value::Boolean(!a.to_boolean()));
                }
                Op::And | Op::Or | Op::Xor => {
                    let b = self.pop()?.to_boolean();
                    let a = self.pop()?.to_boolean();
                    let result = match op {
                        Op::And => a && b,
                        Op::Or => a || b,
                        _ => a ^ b,
                    };
                    self.stack.push(Value::Boolean(result));
                }

                Op::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Boolean(a == b));
                }
                Op::Less
                | Op::LessOrEqual
                | Op::Greater
                | Op::GreaterOrEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    // False unless both sides are numbers (and NaN makes
                    // every comparison false).
                    let result = match (a.as_number(), b.as_number()) {
                        (Some(a), Some(b)) => match op {
                            Op::Less => a < b,
                            Op::LessOrEqual => a <= b,
                            Op::Greater => a > b,
                            _ => a >= b,
                        },
                        _ => false,
                    };
                    self.stack.push(Value::Boolean(result));
                }

                Op::Jump => self.jump(value)?,
                Op::ConditionalJump => {
                    let condition = self.pop()?;
                    if condition.to_boolean() == (param == 1) {
                        self.jump(value)?;
                    }
                }
                Op::ConditionalAnd => {
                    let Some(top) = self.stack.last() else {
                        return Err(self.fault_underflow());
                    };
                    if !top.to_boolean() {
                        self.jump(value)?;
                    } else {
                        self.stack.pop();
                    }
                }
                Op::ConditionalOr => {
                    let Some(top) = self.stack.last() else {
                        return Err(self.fault_underflow());
                    };
                    if top.to_boolean() {
                        self.jump(value)?;
                    } else {
                        self.stack.pop();
                    }
                }

                Op::Throw => {
                    let v = self.pop()?;
                    self.raise(v)?;
                }
                Op::EnterTry => {
                    if value < 0 {
                        return Err(RunError::Fault(RuntimeFault::BadJump {
                            address: self.address,
                        }));
                    }
                    self.handlers.push(Handler {
                        ip: value as usize,
                        stack_depth: self.stack.len(),
                        closure: self.closure.clone(),
                        finally_depth: self.finally_stack.len(),
                    });
                }
                Op::LeaveTry => {
                    if self.handlers.pop().is_none() {
                        return Err(RunError::Fault(
                            RuntimeFault::BadHandler {
                                address: self.address,
                            },
                        ));
                    }
                    self.jump(value)?;
                }
                Op::EnterFinally => {
                    self.finally_stack.push(self.ip);
                    self.jump(value)?;
                }
                Op::LeaveFinally => {
                    let Some(resume) = self.finally_stack.pop() else {
                        return Err(RunError::Fault(
                            RuntimeFault::BadFinally {
                                address: self.address,
                            },
                        ));
                    };
                    self.ip = resume;
                }

                Op::Call => {
                    let n = value.max(0) as usize;
                    let Some(at) = self.stack.len().checked_sub(n) else {
                        return Err(self.fault_underflow());
                    };
                    let call_args = self.stack.split_off(at);
                    let receiver = self.pop()?;
                    let callee = self.pop()?;
                    match callee.call(receiver, &call_args) {
                        Ok(v) => self.stack.push(v),
                        Err(e) => self.raise(e)?,
                    }
                }
                Op::Apply => {
                    let arg_list = self.pop()?;
                    let receiver = self.pop()?;
                    let callee = self.pop()?;
                    match callee.apply(receiver, &arg_list) {
                        Ok(v) => self.stack.push(v),
                        Err(e) => self.raise(e)?,
                    }
                }
                Op::Return => return Ok(self.pop()?),
            }
        }
        Ok(Value::Null)
    }

    fn pop(&mut self) -> Result<Value, RunError> {
        self.stack.pop().ok_or(RunError::Fault(
            RuntimeFault::StackUnderflow {
                address: self.address,
            },
        ))
    }

    fn fault_underflow(&self) -> RunError {
        RunError::Fault(RuntimeFault::StackUnderflow {
            address: self.address,
        })
    }

    fn jump(&mut self, target: i32) -> Result<(), RunError> {
        if target < 0 {
            return Err(RunError::Fault(RuntimeFault::BadJump {
                address: self.address,
            }));
        }
        self.ip = target as usize;
        Ok(())
    }

    fn frame_at(&self, depth: usize) -> Option<Rc<Closure>> {
        let mut frame = self.closure.clone();
        for _ in 1..depth {
            frame = frame.and_then(|f| f.parent.clone());
        }
        frame
    }

    fn read_variable(
        &mut self,
        depth: usize,
        index: i32,
    ) -> Result<Value, RunError> {
        let index = index.max(0) as usize;
        let bad = || {
            RunError::Fault(RuntimeFault::BadVariable {
                depth,
                index,
                address: self.address,
            })
        };
        if depth == 0 {
            self.stack.get(index).cloned().ok_or_else(bad)
        } else {
            let frame = self.frame_at(depth).ok_or_else(bad)?;
            let v = frame.values.borrow().get(index).cloned();
            v.ok_or_else(bad)
        }
    }

    fn write_variable(
        &mut self,
        depth: usize,
        index: i32,
        value: Value,
    ) -> Result<(), RunError> {
        let index = index.max(0) as usize;
        let bad = RunError::Fault(RuntimeFault::BadVariable {
            depth,
            index,
            address: self.address,
        });
        if depth == 0 {
            match self.stack.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(bad),
            }
        } else {
            let Some(frame) = self.frame_at(depth) else {
                return Err(bad);
            };
            let mut values = frame.values.borrow_mut();
            match values.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(bad),
            }
        }
    }

    /// Coerce a thrown value to an exception, stamp the current source
    /// frame onto its trace, and unwind to the innermost handler; with
    /// no handler the exception leaves the run.
    fn raise(&mut self, value: Value) -> Result<(), RunError> {
        let exception = Exception::coerce(value);
        if let Some(entry) = self.module.source_map().get(self.address) {
            exception.push_frame(entry.frame_line());
        }
        tracing::trace!(
            message = %exception.message,
            address = self.address,
            handlers = self.handlers.len(),
            "exception raised"
        );
        match self.handlers.pop() {
            Some(handler) => {
                self.stack.truncate(handler.stack_depth);
                self.closure = handler.closure.clone();
                self.finally_stack.truncate(handler.finally_depth);
                self.stack.push(Value::Exception(exception));
                self.ip = handler.ip;
                Ok(())
            }
            None => Err(RunError::Exception(Value::Exception(exception))),
        }
    }
}

/// A compiled function value: entry address plus captured closure chain.
pub struct BytecodeFunction {
    module: Rc<Module>,
    entry: usize,
    closure: Option<Rc<Closure>>,
    name: Rc<str>,
}

impl Callable for BytecodeFunction {
    fn invoke(&self, receiver: Value, args: &[Value]) -> Result<Value, Value> {
        match run(
            &self.module,
            receiver,
            args.to_vec(),
            self.entry,
            self.closure.clone(),
        ) {
            Ok(v) => Ok(v),
            Err(RunError::Exception(e)) => Err(e),
            Err(RunError::Fault(fault)) => {
                Err(Exception::new(format!("internal error: {}", fault)))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

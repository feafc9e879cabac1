/// Bytecode opcodes.
///
/// Every instruction is one 32-bit word: a 6-bit opcode, a 4-bit `param`
/// auxiliary and a signed 22-bit `value` operand (see
/// [`Instruction`](crate::Instruction)). Code addresses are absolute
/// instruction indices resolved by the section builder.
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Push null.
    Null = 0,

    /// Push a boolean. `value` is 0 or 1.
    Boolean,

    /// Push an inline integer literal. `value` is the number.
    Number,

    /// Swap the two topmost values.
    Swap,

    /// Duplicate the topmost `value` stack entries in order.
    Copy,

    /// Pop `value` entries.
    Drop,

    /// Pop `value` items and push a list built from them.
    List,

    /// Pop `2·value` items (key/value pairs) and push a table.
    Table,

    /// Pop `value` items into a fresh closure frame chained onto the
    /// current one, and make it current. Pushes nothing.
    EnterClosure,

    /// Unchain the innermost closure frame.
    LeaveClosure,

    /// Push a function whose body starts at address `value`.
    /// `param=1` captures the current closure chain, `param=0` starts
    /// the function with no chain.
    Function,

    /// Push the receiver (`this`) of the current run.
    LoadReceiver,

    /// Push argument `value`, or null when out of range.
    LoadArgument,

    /// Push a list of the arguments from index `value` on (possibly
    /// empty).
    LoadArgumentList,

    /// Push data-pool entry `value`.
    LoadGlobal,

    /// Push a variable. `param=0`: operand-stack slot `value`;
    /// `param=k>0`: slot `value` of the k-th closure frame.
    LoadVariable,

    /// Store the top of stack into a variable (addressing as
    /// [`LoadVariable`](Op::LoadVariable)). The value stays on the
    /// stack: assignment is an expression.
    StoreVariable,

    /// Pop key and container, push `container[key]` (never fails on
    /// missing members; yields null).
    LoadElement,

    /// Pop value, key and container, perform `container[key] = value`,
    /// and push the value back.
    StoreElement,

    /// Arithmetic negation of the top of stack (via numeric coercion).
    Negate,

    /// Pop two operands, push their numeric sum.
    Add,

    Subtract,
    Multiply,
    Divide,
    Remainder,

    /// Boolean negation of the top of stack (via truthiness).
    Not,

    /// Pop two operands, push their boolean conjunction.
    And,

    Or,
    Xor,

    /// Pop two operands, push `a == b` (NaN is unequal to itself).
    Equal,

    /// Pop two operands, push numeric `a < b`; false unless both are
    /// numbers.
    Less,

    LessOrEqual,
    Greater,
    GreaterOrEqual,

    /// Jump to address `value`.
    Jump,

    /// Pop the condition; jump to `value` when its truthiness equals
    /// `param`.
    ConditionalJump,

    /// Short-circuit `&&`: when the top of stack is falsy, leave it and
    /// jump to `value`; otherwise pop it and continue.
    ConditionalAnd,

    /// Short-circuit `||`: when the top of stack is truthy, leave it and
    /// jump to `value`; otherwise pop it and continue.
    ConditionalOr,

    /// Pop a value, coerce it to an exception and unwind to the
    /// innermost handler (or out of the run).
    Throw,

    /// Push an exception handler at address `value`, snapshotting stack
    /// depth and closure.
    EnterTry,

    /// Pop the innermost handler and jump to `value`.
    LeaveTry,

    /// Push the resume address and jump to the finally block at
    /// `value`.
    EnterFinally,

    /// Pop the resume address and continue there.
    LeaveFinally,

    /// Pop `value` arguments, a receiver and a callee; push the call
    /// result. Callee exceptions dispatch as if thrown here.
    Call,

    /// Pop an argument list, a receiver and a callee; push the call
    /// result.
    Apply,

    /// Pop the result and exit the current run.
    Return,
}

/// Whether a mnemonic's `param` or `value` operand is required, optional
/// (with a default), or forbidden in assembler text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Required,
    Optional(i32),
    Forbidden,
}

impl Op {
    pub const COUNT: usize = Op::Return as usize + 1;

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Null => "Null",
            Op::Boolean => "Boolean",
            Op::Number => "Number",
            Op::Swap => "Swap",
            Op::Copy => "Copy",
            Op::Drop => "Drop",
            Op::List => "List",
            Op::Table => "Table",
            Op::EnterClosure => "EnterClosure",
            Op::LeaveClosure => "LeaveClosure",
            Op::Function => "Function",
            Op::LoadReceiver => "LoadReceiver",
            Op::LoadArgument => "LoadArgument",
            Op::LoadArgumentList => "LoadArgumentList",
            Op::LoadGlobal => "LoadGlobal",
            Op::LoadVariable => "LoadVariable",
            Op::StoreVariable => "StoreVariable",
            Op::LoadElement => "LoadElement",
            Op::StoreElement => "StoreElement",
            Op::Negate => "Negate",
            Op::Add => "Add",
            Op::Subtract => "Subtract",
            Op::Multiply => "Multiply",
            Op::Divide => "Divide",
            Op::Remainder => "Remainder",
            Op::Not => "Not",
            Op::And => "And",
            Op::Or => "Or",
            Op::Xor => "Xor",
            Op::Equal => "Equal",
            Op::Less => "Less",
            Op::LessOrEqual => "LessOrEqual",
            Op::Greater => "Greater",
            Op::GreaterOrEqual => "GreaterOrEqual",
            Op::Jump => "Jump",
            Op::ConditionalJump => "ConditionalJump",
            Op::ConditionalAnd => "ConditionalAnd",
            Op::ConditionalOr => "ConditionalOr",
            Op::Throw => "Throw",
            Op::EnterTry => "EnterTry",
            Op::LeaveTry => "LeaveTry",
            Op::EnterFinally => "EnterFinally",
            Op::LeaveFinally => "LeaveFinally",
            Op::Call => "Call",
            Op::Apply => "Apply",
            Op::Return => "Return",
        }
    }

    pub fn from_mnemonic(text: &str) -> Option<Op> {
        (0..Self::COUNT as u8)
            .filter_map(|b| Op::try_from(b).ok())
            .find(|op| op.mnemonic() == text)
    }

    /// Assembler rule for the `param` operand.
    pub const fn param_rule(self) -> Operand {
        match self {
            Op::Function => Operand::Optional(0),
            Op::LoadVariable | Op::StoreVariable => Operand::Optional(0),
            Op::ConditionalJump => Operand::Optional(0),
            _ => Operand::Forbidden,
        }
    }

    /// Assembler rule for the `value` operand.
    pub const fn value_rule(self) -> Operand {
        match self {
            Op::Boolean
            | Op::Number
            | Op::List
            | Op::Table
            | Op::EnterClosure
            | Op::Function
            | Op::LoadArgument
            | Op::LoadArgumentList
            | Op::LoadGlobal
            | Op::LoadVariable
            | Op::StoreVariable
            | Op::Jump
            | Op::ConditionalJump
            | Op::ConditionalAnd
            | Op::ConditionalOr
            | Op::EnterTry
            | Op::LeaveTry
            | Op::EnterFinally => Operand::Required,
            Op::Copy | Op::Drop => Operand::Optional(1),
            Op::Call => Operand::Optional(0),
            _ => Operand::Forbidden,
        }
    }

    /// Whether `value` is a code address (printed as a label target by
    /// the disassembler).
    pub const fn value_is_address(self) -> bool {
        matches!(
            self,
            Op::Function
                | Op::Jump
                | Op::ConditionalJump
                | Op::ConditionalAnd
                | Op::ConditionalOr
                | Op::EnterTry
                | Op::LeaveTry
                | Op::EnterFinally
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants from 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

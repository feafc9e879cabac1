/// Line-based assembler for bytecode text, used by tests and tools to
/// build modules without the front end.
///
/// ```text
/// ; comment
/// global GREETING 'hello'
/// import CONSOLE 'console'
/// const LIMIT 10
/// top:
///     LoadGlobal GREETING
///     Jump top
/// ```
///
/// Directives define data-pool entries (`global`, `import`) or plain
/// symbols (`const`); `LABEL:` binds a symbol to the next instruction
/// address. Instructions are `mnemonic [param] [value]`; each mnemonic
/// declares which operands it takes (and their defaults) through
/// [`Op::param_rule`] and [`Op::value_rule`]. The symbols `false=0` and
/// `true=1` are predefined.
use std::collections::HashMap;
use std::rc::Rc;

use bytecode::{Instruction, MapEntry, Op, Operand, SourceMap};
use object::{Import, Value};
use thiserror::Error;

use crate::module::Module;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct AsmError {
    pub line: usize,
    pub message: String,
}

impl AsmError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

struct Pending {
    op: Op,
    operands: Vec<String>,
    line: usize,
}

/// Assemble bytecode text into a module.
pub fn assemble(source: &str) -> Result<Rc<Module>, AsmError> {
    let mut symbols: HashMap<String, i32> = HashMap::new();
    symbols.insert("false".to_string(), 0);
    symbols.insert("true".to_string(), 1);

    let mut data: Vec<Value> = Vec::new();
    let mut pending: Vec<Pending> = Vec::new();

    // First pass: directives, labels, and raw instructions.
    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let tokens = split_line(raw, line)?;
        let Some(head) = tokens.first() else {
            continue;
        };

        if let Some(label) = head.strip_suffix(':') {
            if label.is_empty() || tokens.len() > 1 {
                return Err(AsmError::new(line, "malformed label"));
            }
            symbols.insert(label.to_string(), pending.len() as i32);
            continue;
        }

        match head.as_str() {
            "global" => {
                let (name, value) = two_operands(&tokens, line)?;
                let parsed = literal(&value, line)?;
                symbols.insert(name, data.len() as i32);
                data.push(parsed);
            }
            "import" => {
                let (name, value) = two_operands(&tokens, line)?;
                let Some(path) = unquote(&value) else {
                    return Err(AsmError::new(
                        line,
                        "import needs a quoted path",
                    ));
                };
                symbols.insert(name, data.len() as i32);
                data.push(Import::new(path));
            }
            "const" => {
                let (name, value) = two_operands(&tokens, line)?;
                let Ok(parsed) = value.parse::<i32>() else {
                    return Err(AsmError::new(
                        line,
                        "const needs an integer value",
                    ));
                };
                symbols.insert(name, parsed);
            }
            mnemonic => {
                let Some(op) = Op::from_mnemonic(mnemonic) else {
                    return Err(AsmError::new(
                        line,
                        format!("unknown mnemonic `{}`", mnemonic),
                    ));
                };
                pending.push(Pending {
                    op,
                    operands: tokens[1..].to_vec(),
                    line,
                });
            }
        }
    }

    // Second pass: encode with all symbols known.
    let mut code = Vec::with_capacity(pending.len());
    let mut map = SourceMap::new();
    for item in &pending {
        let (param, value) = operand_values(item, &symbols)?;
        code.push(Instruction::new(item.op, param, value));
        map.push(Rc::new(MapEntry {
            row: item.line,
            column: 1,
            function: Rc::from("asm"),
            parameters: Rc::from(vec![]),
            variables: Rc::from(vec![]),
            globals: Rc::from(vec![]),
        }));
    }

    Ok(Module::new(code, data, map))
}

/// Sort the written operands into the param and value fields according
/// to the mnemonic's declared rules.
fn operand_values(
    item: &Pending,
    symbols: &HashMap<String, i32>,
) -> Result<(u8, i32), AsmError> {
    let param_rule = item.op.param_rule();
    let value_rule = item.op.value_rule();
    let takes_param = !matches!(param_rule, Operand::Forbidden);
    let takes_value = !matches!(value_rule, Operand::Forbidden);

    let mut param = match param_rule {
        Operand::Optional(default) => default,
        _ => 0,
    };
    let mut value = match value_rule {
        Operand::Optional(default) => default,
        _ => 0,
    };

    match item.operands.len() {
        0 => {
            if matches!(param_rule, Operand::Required) {
                return Err(AsmError::new(item.line, "missing param operand"));
            }
            if matches!(value_rule, Operand::Required) {
                return Err(AsmError::new(item.line, "missing value operand"));
            }
        }
        1 => {
            let resolved = resolve(&item.operands[0], symbols, item.line)?;
            if matches!(param_rule, Operand::Required) {
                param = resolved;
            } else if takes_value {
                value = resolved;
            } else if takes_param {
                param = resolved;
            } else {
                return Err(AsmError::new(
                    item.line,
                    format!("`{}` takes no operands", item.op.mnemonic()),
                ));
            }
        }
        2 => {
            if !(takes_param && takes_value) {
                return Err(AsmError::new(
                    item.line,
                    format!(
                        "`{}` does not take two operands",
                        item.op.mnemonic()
                    ),
                ));
            }
            param = resolve(&item.operands[0], symbols, item.line)?;
            value = resolve(&item.operands[1], symbols, item.line)?;
        }
        _ => {
            return Err(AsmError::new(item.line, "too many operands"));
        }
    }

    if !(0..=Instruction::PARAM_MAX as i32).contains(&param) {
        return Err(AsmError::new(item.line, "param out of range"));
    }
    Ok((param as u8, value))
}

fn resolve(
    token: &str,
    symbols: &HashMap<String, i32>,
    line: usize,
) -> Result<i32, AsmError> {
    if let Ok(number) = token.parse::<i32>() {
        return Ok(number);
    }
    symbols.get(token).copied().ok_or_else(|| {
        AsmError::new(line, format!("unknown symbol `{}`", token))
    })
}

fn two_operands(
    tokens: &[String],
    line: usize,
) -> Result<(String, String), AsmError> {
    if tokens.len() != 3 {
        return Err(AsmError::new(
            line,
            format!("`{}` needs a name and a value", tokens[0]),
        ));
    }
    Ok((tokens[1].clone(), tokens[2].clone()))
}

/// A `global` value: number, quoted string, `null`, `true` or `false`.
fn literal(token: &str, line: usize) -> Result<Value, AsmError> {
    if let Some(text) = unquote(token) {
        return Ok(Value::string(text));
    }
    match token {
        "null" => Ok(Value::Null),
        "true" => Ok(Value::Boolean(true)),
        "false" => Ok(Value::Boolean(false)),
        _ => match token.parse::<f64>() {
            Ok(number) => Ok(Value::Number(number)),
            Err(_) => Err(AsmError::new(
                line,
                format!("malformed value `{}`", token),
            )),
        },
    }
}

fn unquote(token: &str) -> Option<&str> {
    token
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
}

/// Split a line into tokens, keeping quoted strings whole and stopping
/// at a `;` comment.
fn split_line(raw: &str, line: usize) -> Result<Vec<String>, AsmError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for c in raw.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            ';' if !in_string => break,
            c if c.is_whitespace() && !in_string => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_string {
        return Err(AsmError::new(line, "unterminated string"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

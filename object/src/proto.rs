/// Per-kind prototype tables.
///
/// Non-table values answer member access through these tables: a small,
/// fixed set of native methods and property getters per value kind. The
/// host may layer richer libraries on top through imports; the entries
/// here are the ones the language itself relies on.
use crate::table::Table;
use crate::value::{Exception, NativeFunction, Property, Value};

thread_local! {
    static STRING: Table = string_proto();
    static NUMBER: Table = number_proto();
    static BOOLEAN: Table = boolean_proto();
    static LIST: Table = list_proto();
    static FUNCTION: Table = function_proto();
    static EXCEPTION: Table = exception_proto();
}

/// Raw prototype lookup for a receiver kind. Returns the stored entry
/// (possibly a `Property`); `None` when the kind has no prototype or the
/// key is absent.
pub(crate) fn lookup(receiver: &Value, key: &Value) -> Option<Value> {
    let table = match receiver {
        Value::String(_) => &STRING,
        Value::Number(_) => &NUMBER,
        Value::Boolean(_) => &BOOLEAN,
        Value::List(_) => &LIST,
        Value::Function(_) => &FUNCTION,
        Value::Exception(_) => &EXCEPTION,
        _ => return None,
    };
    table.with(|t| t.get(key).cloned())
}

fn getter(
    name: &str,
    f: impl Fn(Value) -> Result<Value, Value> + 'static,
) -> Value {
    Property::with_getter(NativeFunction::new(name, move |recv, _args| {
        f(recv)
    }))
}

fn method(
    name: &str,
    f: impl Fn(Value, &[Value]) -> Result<Value, Value> + 'static,
) -> Value {
    NativeFunction::new(name, f)
}

fn to_string_method() -> Value {
    method("toString", |recv, _| Ok(Value::string(recv.to_text())))
}

fn string_proto() -> Table {
    let mut t = Table::new();
    t.insert(
        Value::string("length"),
        getter("length", |recv| {
            let count = recv
                .as_string()
                .map(|s| s.chars().count() as f64)
                .unwrap_or(f64::NAN);
            Ok(Value::Number(count))
        }),
    );
    t.insert(Value::string("toString"), to_string_method());
    t
}

fn number_proto() -> Table {
    let mut t = Table::new();
    t.insert(Value::string("toString"), to_string_method());
    t
}

fn boolean_proto() -> Table {
    let mut t = Table::new();
    t.insert(Value::string("toString"), to_string_method());
    t
}

fn list_proto() -> Table {
    let mut t = Table::new();
    t.insert(
        Value::string("length"),
        getter("length", |recv| {
            let count = recv
                .as_list()
                .map(|l| l.borrow().len() as f64)
                .unwrap_or(f64::NAN);
            Ok(Value::Number(count))
        }),
    );
    t.insert(
        Value::string("push"),
        method("push", |recv, args| {
            let list = recv
                .as_list()
                .ok_or_else(|| Exception::new("push receiver is not a list"))?
                .clone();
            let mut items = list.borrow_mut();
            items.extend(args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }),
    );
    t.insert(Value::string("toString"), to_string_method());
    t
}

fn function_proto() -> Table {
    let mut t = Table::new();
    t.insert(
        Value::string("call"),
        method("call", |recv, args| {
            let (receiver, rest) = match args.split_first() {
                Some((first, rest)) => (first.clone(), rest),
                None => (Value::Null, &[] as &[Value]),
            };
            recv.call(receiver, rest)
        }),
    );
    t.insert(
        Value::string("apply"),
        method("apply", |recv, args| {
            let receiver = args.first().cloned().unwrap_or(Value::Null);
            match args.get(1) {
                Some(Value::Null) | None => recv.call(receiver, &[]),
                Some(list) => recv.apply(receiver, list),
            }
        }),
    );
    t.insert(Value::string("toString"), to_string_method());
    t
}

fn exception_proto() -> Table {
    let mut t = Table::new();
    t.insert(
        Value::string("message"),
        getter("message", |recv| {
            Ok(match recv.as_exception() {
                Some(e) => Value::string(e.message.clone()),
                None => Value::Null,
            })
        }),
    );
    t.insert(
        Value::string("value"),
        getter("value", |recv| {
            Ok(recv
                .as_exception()
                .and_then(|e| e.value.clone())
                .unwrap_or(Value::Null))
        }),
    );
    t.insert(
        Value::string("stack"),
        getter("stack", |recv| {
            Ok(recv
                .as_exception()
                .and_then(|e| e.trace_text())
                .map(Value::string)
                .unwrap_or(Value::Null))
        }),
    );
    t.insert(Value::string("toString"), to_string_method());
    t
}

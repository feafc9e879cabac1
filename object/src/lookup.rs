/// Polymorphic member access and invocation.
///
/// `get` and `set` implement the "null chain" discipline: a missing
/// member is `Null`, never an error. The only way these operations fail
/// is a user-level exception raised by a property getter/setter or a
/// called function, which travels as an `Err(Value)`.
use crate::proto;
use crate::value::{Exception, Property, Value};

impl Value {
    /// Member read.
    ///
    /// Tables look the key up directly (invoking a getter when the entry
    /// is a [`Property`]); lists answer integral keys with elements;
    /// everything else dispatches to the per-kind prototype table.
    /// Missing members yield `Null`.
    pub fn get(&self, key: &Value) -> Result<Value, Value> {
        match self {
            Value::Table(table) => {
                // Clone the entry out before invoking anything so the
                // table is not borrowed during a getter call.
                let entry = table.borrow().get(key).cloned();
                match entry {
                    Some(Value::Property(p)) => read_property(&p, self),
                    Some(value) => Ok(value),
                    None => Ok(Value::Null),
                }
            }
            Value::List(list) => {
                if let Some(index) = integral_key(key) {
                    let items = list.borrow();
                    Ok(items.get(index).cloned().unwrap_or(Value::Null))
                } else {
                    prototype_get(self, key)
                }
            }
            Value::Null | Value::Import(_) | Value::Property(_) => {
                Ok(Value::Null)
            }
            _ => prototype_get(self, key),
        }
    }

    /// Member write.
    ///
    /// Tables call an existing property's setter (or silently keep the
    /// property as-is when it has none); otherwise a plain insert. Lists
    /// accept in-range integral keys and ignore everything else. On other
    /// kinds only a prototype property setter can effect change.
    pub fn set(&self, key: &Value, value: Value) -> Result<(), Value> {
        match self {
            Value::Table(table) => {
                let entry = table.borrow().get(key).cloned();
                match entry {
                    Some(Value::Property(p)) => match &p.setter {
                        Some(setter) => {
                            setter.call(self.clone(), &[value])?;
                            Ok(())
                        }
                        None => Ok(()),
                    },
                    _ => {
                        table.borrow_mut().insert(key.clone(), value);
                        Ok(())
                    }
                }
            }
            Value::List(list) => {
                if let Some(index) = integral_key(key) {
                    let mut items = list.borrow_mut();
                    if index < items.len() {
                        items[index] = value;
                    }
                }
                Ok(())
            }
            Value::Null | Value::Import(_) | Value::Property(_) => Ok(()),
            _ => {
                if let Some(Value::Property(p)) = proto::lookup(self, key) {
                    if let Some(setter) = &p.setter {
                        setter.call(self.clone(), &[value])?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Invoke this value as a function.
    ///
    /// Non-function values are called through their `call` member when it
    /// resolves to something callable; otherwise this is a NotCallable
    /// exception.
    pub fn call(
        &self,
        receiver: Value,
        args: &[Value],
    ) -> Result<Value, Value> {
        match self {
            Value::Function(f) => f.invoke(receiver, args),
            _ => {
                let target = self.get(&Value::string("call"))?;
                if matches!(target, Value::Function(_)) {
                    target.call(self.clone(), args)
                } else {
                    Err(Exception::new(format!(
                        "{} is not callable",
                        self.kind()
                    )))
                }
            }
        }
    }

    /// Invoke this value with arguments taken from a list.
    pub fn apply(
        &self,
        receiver: Value,
        arg_list: &Value,
    ) -> Result<Value, Value> {
        match arg_list {
            Value::List(list) => {
                let args = list.borrow().clone();
                self.call(receiver, &args)
            }
            _ => Err(Exception::new(format!(
                "apply arguments must be a list, not {}",
                arg_list.kind()
            ))),
        }
    }
}

fn prototype_get(receiver: &Value, key: &Value) -> Result<Value, Value> {
    match proto::lookup(receiver, key) {
        Some(Value::Property(p)) => read_property(&p, receiver),
        Some(value) => Ok(value),
        None => Ok(Value::Null),
    }
}

fn read_property(p: &Property, receiver: &Value) -> Result<Value, Value> {
    match &p.getter {
        Some(getter) => getter.call(receiver.clone(), &[]),
        None => Ok(p.value.clone().unwrap_or(Value::Null)),
    }
}

/// A list key participates in element access when it is a non-negative
/// integral number.
fn integral_key(key: &Value) -> Option<usize> {
    let n = key.as_number()?;
    if n.fract() == 0.0 && n >= 0.0 && n <= usize::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

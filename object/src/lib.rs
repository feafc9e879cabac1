mod lookup;
mod proto;
mod table;
mod value;

pub use table::Table;
pub use value::{
    format_number, Callable, Exception, Import, NativeFunction, Property,
    Value,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(v: &Value) -> u64 {
        use std::hash::Hasher;
        let mut h = std::collections::hash_map::DefaultHasher::new();
        v.hash_structural(&mut h);
        h.finish()
    }

    // ── Value algebra ──────────────────────────────────────────────

    #[test]
    fn self_equality_except_nan() {
        let values = [
            Value::Null,
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Number(0.0),
            Value::Number(-3.25),
            Value::string("hello"),
            Value::list(vec![Value::Number(1.0)]),
            Value::table(Table::new()),
        ];
        for v in &values {
            assert_eq!(v, &v.clone(), "{:?} == itself", v);
        }

        let nan = Value::Number(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.equals(&nan));
    }

    #[test]
    fn cross_variant_equality_is_false() {
        assert_ne!(Value::Number(0.0), Value::Boolean(false));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_ne!(Value::Null, Value::Boolean(false));
        assert!(!Value::Null.equals(&Value::Number(0.0)));
    }

    #[test]
    fn aggregate_equality_is_identity() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = Value::list(vec![Value::Number(1.0)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let t = Value::table(Table::new());
        assert_ne!(t, Value::table(Table::new()));
        assert_eq!(t, t.clone());
    }

    #[test]
    fn equals_implies_equal_hashes() {
        let pairs = [
            (Value::Number(f64::NAN), Value::Number(f64::NAN)),
            (Value::Number(0.0), Value::Number(-0.0)),
            (Value::string("abc"), Value::string("abc")),
            (Value::Null, Value::Null),
        ];
        for (a, b) in &pairs {
            assert!(a.equals(b), "{:?} equals {:?}", a, b);
            assert_eq!(hash_of(a), hash_of(b));
        }
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.to_boolean());
        assert!(!Value::Boolean(false).to_boolean());
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(-0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());

        assert!(Value::Boolean(true).to_boolean());
        assert!(Value::Number(-1.0).to_boolean());
        assert!(Value::string("").to_boolean());
        assert!(Value::list(vec![]).to_boolean());
        assert!(Value::table(Table::new()).to_boolean());
    }

    #[test]
    fn to_number_coercion() {
        assert_eq!(Value::Number(2.5).to_number(), 2.5);
        assert!(Value::string("2.5").to_number().is_nan());
        assert!(Value::Boolean(true).to_number().is_nan());
        assert!(Value::Null.to_number().is_nan());
    }

    // ── Tables ─────────────────────────────────────────────────────

    #[test]
    fn table_null_key_permitted() {
        let mut t = Table::new();
        t.insert(Value::Null, Value::Number(1.0));
        assert_eq!(t.get(&Value::Null), Some(&Value::Number(1.0)));
    }

    #[test]
    fn table_nan_key_usable() {
        let mut t = Table::new();
        t.insert(Value::Number(f64::NAN), Value::string("found"));
        assert_eq!(
            t.get(&Value::Number(f64::NAN)),
            Some(&Value::string("found"))
        );
    }

    #[test]
    fn table_preserves_insertion_order() {
        let mut t = Table::new();
        t.insert(Value::string("b"), Value::Number(1.0));
        t.insert(Value::string("a"), Value::Number(2.0));
        t.insert(Value::Null, Value::Number(3.0));
        let keys: Vec<String> =
            t.keys().map(|k| k.to_text()).collect();
        assert_eq!(keys, ["b", "a", "null"]);
    }

    // ── Member access ──────────────────────────────────────────────

    #[test]
    fn null_chain_navigation() {
        // {a: 3.14}.a.b.c → null, without error.
        let mut t = Table::new();
        t.insert(Value::string("a"), Value::Number(3.14));
        let table = Value::table(t);

        let a = table.get(&Value::string("a")).unwrap();
        assert_eq!(a, Value::Number(3.14));
        let b = a.get(&Value::string("b")).unwrap();
        assert!(b.is_null());
        let c = b.get(&Value::string("c")).unwrap();
        assert!(c.is_null());

        // (null)[null] → null.
        assert!(Value::Null.get(&Value::Null).unwrap().is_null());
    }

    #[test]
    fn list_element_access() {
        let list = Value::list(vec![Value::Number(10.0), Value::Number(20.0)]);
        assert_eq!(
            list.get(&Value::Number(1.0)).unwrap(),
            Value::Number(20.0)
        );
        assert!(list.get(&Value::Number(5.0)).unwrap().is_null());
        assert!(list.get(&Value::Number(-1.0)).unwrap().is_null());
        assert!(list.get(&Value::Number(0.5)).unwrap().is_null());
    }

    #[test]
    fn list_out_of_bounds_write_is_ignored() {
        let list = Value::list(vec![Value::Number(1.0)]);
        list.set(&Value::Number(7.0), Value::Number(9.0)).unwrap();
        assert_eq!(list.as_list().unwrap().borrow().len(), 1);

        list.set(&Value::Number(0.0), Value::Number(9.0)).unwrap();
        assert_eq!(
            list.get(&Value::Number(0.0)).unwrap(),
            Value::Number(9.0)
        );
    }

    #[test]
    fn string_length_via_prototype() {
        let s = Value::string("héllo");
        assert_eq!(
            s.get(&Value::string("length")).unwrap(),
            Value::Number(5.0)
        );
    }

    #[test]
    fn list_length_and_push_via_prototype() {
        let list = Value::list(vec![Value::Number(1.0)]);
        assert_eq!(
            list.get(&Value::string("length")).unwrap(),
            Value::Number(1.0)
        );
        let push = list.get(&Value::string("push")).unwrap();
        push.call(list.clone(), &[Value::Number(2.0)]).unwrap();
        assert_eq!(
            list.get(&Value::string("length")).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn property_getter_and_setter() {
        use std::cell::Cell;
        use std::rc::Rc;

        let observed = Rc::new(Cell::new(0.0));
        let seen = observed.clone();
        let prop = Value::Property(Rc::new(Property {
            getter: Some(NativeFunction::new("get", |_recv, _args| {
                Ok(Value::Number(42.0))
            })),
            setter: Some(NativeFunction::new("set", move |_recv, args| {
                seen.set(args[0].to_number());
                Ok(Value::Null)
            })),
            value: None,
        }));

        let mut t = Table::new();
        t.insert(Value::string("x"), prop);
        let table = Value::table(t);

        assert_eq!(
            table.get(&Value::string("x")).unwrap(),
            Value::Number(42.0)
        );
        table.set(&Value::string("x"), Value::Number(7.0)).unwrap();
        assert_eq!(observed.get(), 7.0);
    }

    #[test]
    fn property_without_setter_ignores_writes() {
        let mut t = Table::new();
        t.insert(
            Value::string("x"),
            Property::with_value(Value::Number(1.0)),
        );
        let table = Value::table(t);
        table.set(&Value::string("x"), Value::Number(2.0)).unwrap();
        assert_eq!(
            table.get(&Value::string("x")).unwrap(),
            Value::Number(1.0)
        );
    }

    // ── Calls ──────────────────────────────────────────────────────

    #[test]
    fn native_function_call() {
        let add = NativeFunction::new("add", |_recv, args| {
            Ok(Value::Number(args[0].to_number() + args[1].to_number()))
        });
        let result = add
            .call(Value::Null, &[Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(result, Value::Number(5.0));
    }

    #[test]
    fn call_member_makes_tables_callable() {
        let mut t = Table::new();
        t.insert(
            Value::string("call"),
            NativeFunction::new("call", |_recv, _args| {
                Ok(Value::string("invoked"))
            }),
        );
        let table = Value::table(t);
        assert_eq!(
            table.call(Value::Null, &[]).unwrap(),
            Value::string("invoked")
        );
    }

    #[test]
    fn calling_a_number_fails() {
        let err = Value::Number(1.0).call(Value::Null, &[]).unwrap_err();
        let exc = err.as_exception().expect("exception");
        assert!(exc.message.contains("not callable"));
    }

    #[test]
    fn apply_requires_a_list() {
        let f = NativeFunction::new("f", |_recv, args| {
            Ok(Value::Number(args.len() as f64))
        });
        let args = Value::list(vec![Value::Null, Value::Null, Value::Null]);
        assert_eq!(f.apply(Value::Null, &args).unwrap(), Value::Number(3.0));

        let err = f.apply(Value::Null, &Value::Number(1.0)).unwrap_err();
        let exc = err.as_exception().expect("exception");
        assert!(exc.message.contains("list"));
    }

    // ── Stringification ────────────────────────────────────────────

    #[test]
    fn number_formatting() {
        assert_eq!(Value::Number(3.0).to_text(), "3");
        assert_eq!(Value::Number(-0.5).to_text(), "-0.5");
        assert_eq!(Value::Number(f64::NAN).to_text(), "NaN");
        assert_eq!(Value::Number(f64::INFINITY).to_text(), "Infinity");
    }

    #[test]
    fn table_to_string_override() {
        let mut t = Table::new();
        t.insert(
            Value::string("toString"),
            NativeFunction::new("toString", |_recv, _args| {
                Ok(Value::string("custom"))
            }),
        );
        assert_eq!(Value::table(t).to_text(), "custom");
    }

    #[test]
    fn exception_members() {
        let exc = Exception::coerce(Value::Number(1.0));
        let value = Value::Exception(exc);
        assert_eq!(
            value.get(&Value::string("value")).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            value.get(&Value::string("message")).unwrap(),
            Value::string("1")
        );
        assert!(value.get(&Value::string("stack")).unwrap().is_null());
    }
}

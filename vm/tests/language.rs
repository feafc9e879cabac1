//! End-to-end language behavior: compile source, run the module, check
//! results and exports.

use std::rc::Rc;

use object::Value;
use vm::{compile, main, Module, ModuleError};

fn module(source: &str) -> Rc<Module> {
    compile(source).expect("compile error")
}

fn run(source: &str) -> Value {
    main(&module(source), &[]).expect("runtime error")
}

fn run_exports(source: &str) -> Value {
    let module = module(source);
    main(&module, &[]).expect("runtime error");
    module.exports()
}

fn export(exports: &Value, name: &str) -> Value {
    exports.get(&Value::string(name)).expect("export access")
}

fn compile_error(source: &str) -> String {
    compile(source).expect_err("expected compile error").to_string()
}

fn number(n: f64) -> Value {
    Value::Number(n)
}

// ── Expressions ────────────────────────────────────────────────────

#[test]
fn arithmetic_precedence() {
    assert_eq!(run("return 1 + 2 * 3"), number(7.0));
    assert_eq!(run("return (1 + 2) * 3"), number(9.0));
    assert_eq!(run("return 10 % 4 + 7 / 2"), number(5.5));
    assert_eq!(run("return -(-3) + 4"), number(7.0));
}

#[test]
fn ternary_and_not() {
    assert_eq!(run("return true ? 1 + 1 : 5"), number(2.0));
    assert_eq!(run("return !false ? 3 + 4 : 0"), number(7.0));
    assert_eq!(run("return 0 ? 1 : 2"), number(2.0));
}

#[test]
fn short_circuit_keeps_the_deciding_value() {
    assert_eq!(run("return 0 || 5"), number(5.0));
    assert_eq!(run("return 2 || 5"), number(2.0));
    assert_eq!(run("return 0 && 5"), number(0.0));
    assert_eq!(run("return 1 && 5"), number(5.0));
    assert_eq!(run("return null || 'fallback'"), Value::string("fallback"));
}

#[test]
fn equality_is_variant_strict_and_nan_is_unequal() {
    assert_eq!(run("return 1 == 1"), Value::Boolean(true));
    assert_eq!(run("return 1 == '1'"), Value::Boolean(false));
    assert_eq!(run("return null == false"), Value::Boolean(false));
    assert_eq!(run("var nan = 0 / 0\nreturn nan == nan"), Value::Boolean(false));
    assert_eq!(run("return 'a' == 'a'"), Value::Boolean(true));
}

#[test]
fn comparisons_are_numeric_only() {
    assert_eq!(run("return 1 < 2"), Value::Boolean(true));
    assert_eq!(run("return 'a' < 'b'"), Value::Boolean(false));
    assert_eq!(run("var nan = 0 / 0\nreturn nan < 1"), Value::Boolean(false));
    assert_eq!(run("return 2 >= 2"), Value::Boolean(true));
}

#[test]
fn arithmetic_on_non_numbers_is_nan() {
    let result = run("return 'a' + 1");
    assert!(result.as_number().expect("number").is_nan());
}

// ── Statements, loops, scopes ──────────────────────────────────────

#[test]
fn while_loop_accumulates() {
    let source = "var sum = 0\n\
                  var i = 1\n\
                  while (i <= 5) { sum += i\ni += 1 }\n\
                  return sum";
    assert_eq!(run(source), number(15.0));
}

#[test]
fn for_loop_with_step() {
    let source = "var sum = 0\n\
                  for (var i = 0; i < 10; i += 2) { sum += i }\n\
                  return sum";
    assert_eq!(run(source), number(20.0));
}

#[test]
fn break_and_continue() {
    let source = "var sum = 0\n\
                  for (var i = 0; i < 10; i += 1) {\n\
                      if (i == 3) { continue }\n\
                      if (i == 6) { break }\n\
                      sum += i\n\
                  }\n\
                  return sum";
    assert_eq!(run(source), number(12.0));
}

#[test]
fn block_scoped_variables() {
    let source = "var outer = 1\n\
                  if (true) { var inner = 2\nouter = outer + inner }\n\
                  return outer";
    assert_eq!(run(source), number(3.0));
}

#[test]
fn compound_member_assignment() {
    let source = "var t = {n: 10}\n\
                  t.n += 5\n\
                  return t.n";
    assert_eq!(run(source), number(15.0));
}

#[test]
fn assignment_is_an_expression() {
    let source = "var a = 0\n\
                  var b = 0\n\
                  a = b = 4\n\
                  return a + b";
    assert_eq!(run(source), number(8.0));
}

// ── Functions and closures ─────────────────────────────────────────

#[test]
fn recursion() {
    let source = "var fact = function (n) {\n\
                      if (n < 2) { return 1 }\n\
                      return n * fact(n - 1)\n\
                  }\n\
                  return fact(5)";
    assert_eq!(run(source), number(120.0));
}

#[test]
fn closure_counter_keeps_state() {
    let source = "var make = function () {\n\
                      var count = 0\n\
                      return function () { count += 1\nreturn count }\n\
                  }\n\
                  var c = make()\n\
                  c()\n\
                  c()\n\
                  return c()";
    assert_eq!(run(source), number(3.0));
}

#[test]
fn missing_arguments_are_null() {
    let source = "var f = function (a, b) { return b }\n\
                  return f(1)";
    assert_eq!(run(source), Value::Null);
}

#[test]
fn rest_parameter_collects_the_tail() {
    let source = "var f = (first, ...rest) => rest.length\n\
                  return f(1, 2, 3, 4)";
    assert_eq!(run(source), number(3.0));
}

#[test]
fn method_call_binds_this() {
    let source = "var o = {val: 7, read: function () { return this.val }}\n\
                  return o.read()";
    assert_eq!(run(source), number(7.0));
}

#[test]
fn function_call_and_apply() {
    let source = "var add = (a, b) => a + b\n\
                  return add.apply(null, [3, 4])";
    assert_eq!(run(source), number(7.0));

    let source = "var add = (a, b) => a + b\n\
                  return add.call(null, 3, 4)";
    assert_eq!(run(source), number(7.0));
}

#[test]
fn loop_iterations_capture_their_own_variables() {
    // Each while iteration gets its own `n` frame.
    let source = "var f = [null, null]\n\
                  var i = 0\n\
                  while (i < 2) {\n\
                      var n = 1\n\
                      for (var j = 0; j < 1; j += 1) { f[i] = (c) => n += c }\n\
                      i += 1\n\
                  }\n\
                  this.a = f[0](2)\n\
                  this.b = f[1](4)";
    let exports = run_exports(source);
    assert_eq!(export(&exports, "a"), number(3.0));
    assert_eq!(export(&exports, "b"), number(5.0));
}

#[test]
fn man_or_boy() {
    // Knuth's man-or-boy test exercises deep closure chains.
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            for (k, expected) in
                [(7, -1.0), (8, -10.0), (9, -30.0), (10, -67.0), (11, -138.0)]
            {
                let source = format!(
                    "var A = function (k, x1, x2, x3, x4, x5) {{\n\
                         var B = function () {{\n\
                             k = k - 1\n\
                             return A(k, B, x1, x2, x3, x4)\n\
                         }}\n\
                         if (k <= 0) {{ return x4() + x5() }}\n\
                         return B()\n\
                     }}\n\
                     return A({k}, () => 1, () => -1, () => -1, () => 1, () => 0)"
                );
                assert_eq!(run(&source), number(expected), "k = {k}");
            }
        })
        .expect("spawn");
    handle.join().expect("man-or-boy thread");
}

// ── Exceptions ─────────────────────────────────────────────────────

#[test]
fn try_catch_binds_the_exception() {
    let source = "var caught = null\n\
                  try { throw 'boom' } catch (e) { caught = e.message }\n\
                  return caught";
    assert_eq!(run(source), Value::string("boom"));
}

#[test]
fn throw_is_an_expression() {
    let source = "var result = null\n\
                  var n = null\n\
                  try { var m = n || throw 1 } catch (e) { result = e.value }\n\
                  return result";
    assert_eq!(run(source), number(1.0));
}

#[test]
fn nested_finally_returns_outermost_wins() {
    let source = "var f = function () {\n\
                      try { try { try { try { return 1 }\n\
                      finally { return 2 } }\n\
                      finally { return 3 } }\n\
                      finally { return 4 } }\n\
                      finally { return 5 }\n\
                  }\n\
                  return f()";
    assert_eq!(run(source), number(5.0));
}

#[test]
fn finally_runs_before_return_completes() {
    let source = "var log = []\n\
                  var f = function () {\n\
                      try { return 'value' } finally { log.push('ran') }\n\
                  }\n\
                  var r = f()\n\
                  return log.length";
    assert_eq!(run(source), number(1.0));
}

#[test]
fn throwing_finally_overrides_return() {
    let source = "var f = function () {\n\
                      try { return 1 } finally { throw 'override' }\n\
                  }\n\
                  var result = null\n\
                  try { f() } catch (e) { result = e.message }\n\
                  return result";
    assert_eq!(run(source), Value::string("override"));
}

#[test]
fn returning_finally_overrides_exception() {
    let source = "var f = function () {\n\
                      try { throw 'first' } finally { return 2 }\n\
                  }\n\
                  return f()";
    assert_eq!(run(source), number(2.0));
}

#[test]
fn catch_and_finally_both_run() {
    let source = "var log = []\n\
                  try { throw 'x' } catch (e) { log.push('catch') }\n\
                  finally { log.push('finally') }\n\
                  return log.length";
    assert_eq!(run(source), number(2.0));
}

#[test]
fn finally_runs_on_break() {
    let source = "var log = []\n\
                  var i = 0\n\
                  while (i < 3) {\n\
                      try { if (i == 1) { break } } finally { log.push('f') }\n\
                      i += 1\n\
                  }\n\
                  return log.length";
    assert_eq!(run(source), number(2.0));
}

#[test]
fn uncaught_exceptions_escape_with_a_trace() {
    let source = "var inner = function () { throw 'deep' }\n\
                  var outer = function () { inner() }\n\
                  outer()";
    let err = main(&module(source), &[]).expect_err("expected exception");
    let ModuleError::Exception(value) = err else {
        panic!("expected an exception, got {err:?}");
    };
    let exception = value.as_exception().expect("exception value");
    assert_eq!(exception.message, "deep");
    let trace = exception.trace_text().expect("trace");
    assert!(trace.contains("at inner"), "{trace}");
    assert!(trace.contains("at outer"), "{trace}");
    assert!(trace.contains("at main"), "{trace}");
}

#[test]
fn exception_stack_is_reachable_from_user_code() {
    let source = "var inner = function () { throw 'deep' }\n\
                  var trace = null\n\
                  try { inner() } catch (e) { trace = e.stack }\n\
                  return trace";
    let trace = run(source);
    assert!(trace.as_string().expect("string").contains("at inner"));
}

// ── Null chain and prototypes ──────────────────────────────────────

#[test]
fn null_chain_navigation() {
    assert_eq!(run("return {a: 3.14}.a.b.c"), Value::Null);
    assert_eq!(run("return (null)[null]"), Value::Null);
    assert_eq!(run("var t = {}\nreturn t.missing"), Value::Null);
}

#[test]
fn string_length_counts_codepoints() {
    assert_eq!(run("return 'héllo'.length"), number(5.0));
    assert_eq!(run("return ''.length"), number(0.0));
    assert_eq!(run("return 'a\\nb'.length"), number(3.0));
}

#[test]
fn table_to_string_routes_stringification() {
    let source =
        "export const t = {toString: function () { return 'custom!' }}";
    let exports = run_exports(source);
    assert_eq!(export(&exports, "t").to_text(), "custom!");
}

#[test]
fn list_indexing_and_out_of_bounds() {
    assert_eq!(run("return [10, 20, 30][1]"), number(20.0));
    assert_eq!(run("return [10][5]"), Value::Null);
    let source = "var l = [1, 2]\n\
                  l[0] = 9\n\
                  l[7] = 9\n\
                  return l[0] + l.length";
    assert_eq!(run(source), number(11.0));
}

#[test]
fn computed_table_keys() {
    let source = "var t = {[1 + 1]: 'two', x: 'ex'}\n\
                  return t[2]";
    assert_eq!(run(source), Value::string("two"));
}

// ── Compile-time errors ────────────────────────────────────────────

#[test]
fn assignment_to_const_fails_to_compile() {
    assert!(compile_error("const c = 1\nc = 2").contains("constant"));
}

#[test]
fn duplicate_declaration_fails_to_compile() {
    assert!(compile_error("var a = 1\nvar a = 2").contains("duplicate"));
}

#[test]
fn unresolved_name_fails_to_compile() {
    assert!(compile_error("return missing").contains("unresolved"));
}

// ── Modules ────────────────────────────────────────────────────────

#[test]
fn exports_through_the_receiver() {
    let source = "this.direct = 1\n\
                  export const named = 2\n\
                  this['computed'] = 3";
    let exports = run_exports(source);
    assert_eq!(export(&exports, "direct"), number(1.0));
    assert_eq!(export(&exports, "named"), number(2.0));
    assert_eq!(export(&exports, "computed"), number(3.0));
}

#[test]
fn exported_constants_are_usable_locally() {
    let source = "export const base = 10\n\
                  var f = () => base * 2\n\
                  return f()";
    assert_eq!(run(source), number(20.0));
}

#[test]
fn unsatisfied_import_fails_main() {
    let source = "import answer from 'answer'\nreturn answer";
    let err = main(&module(source), &[]).expect_err("expected error");
    assert!(matches!(
        err,
        ModuleError::ImportUnresolved { ref name } if name == "answer"
    ));
}

#[test]
fn resolved_imports_are_stable_across_runs() {
    let source = "import answer from 'answer'\n\
                  export const doubled = answer * 2\n\
                  return doubled";
    let module = module(source);
    module.on_importing(|_module, import| {
        *import.value.borrow_mut() = Value::Number(21.0);
    });
    assert_eq!(main(&module, &[]).unwrap(), number(42.0));
    assert_eq!(main(&module, &[]).unwrap(), number(42.0));
    assert_eq!(module.global(0), Some(number(21.0)));
}

#[test]
fn native_functions_reenter_the_interpreter() {
    // A host function that calls back into an interpreted function.
    use object::NativeFunction;

    let source = "import twice from 'twice'\n\
                  return twice((x) => x + 3, 10)";
    let module = module(source);
    module.on_importing(|_module, import| {
        *import.value.borrow_mut() =
            NativeFunction::new("twice", |_recv, args| {
                let f = args[0].clone();
                let x = args[1].clone();
                let once = f.call(Value::Null, &[x])?;
                f.call(Value::Null, &[once])
            });
    });
    assert_eq!(main(&module, &[]).unwrap(), number(16.0));
}

#[test]
fn module_results_and_top_level_return() {
    assert_eq!(run("return 42"), number(42.0));
    // Falling off the end returns null.
    assert_eq!(run("var x = 1"), Value::Null);
}

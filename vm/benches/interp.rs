//! Interpreter benchmarks:
//!   cargo bench --bench interp

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use object::Value;
use vm::{compile, main};

const NUMERIC_LOOP: &str = "\
var sum = 0
for (var i = 0; i < 10000; i += 1) { sum += i * 2 }
return sum
";

const CLOSURE_HEAVY: &str = "\
var make = function (start) {
    var value = start
    return function (step) { value += step\nreturn value }
}
var total = 0
for (var i = 0; i < 200; i += 1) {
    var counter = make(i)
    for (var j = 0; j < 50; j += 1) { total = counter(1) }
}
return total
";

const CALL_HEAVY: &str = "\
var fib = function (n) {
    if (n < 2) { return n }
    return fib(n - 1) + fib(n - 2)
}
return fib(15)
";

fn bench_interpreter(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter");

    for (name, source) in [
        ("numeric_loop", NUMERIC_LOOP),
        ("closure_heavy", CLOSURE_HEAVY),
        ("call_heavy", CALL_HEAVY),
    ] {
        let module = compile(source).expect("bench program compiles");
        group.bench_function(name, |b| {
            b.iter(|| {
                let result = main(black_box(&module), &[]).expect("runs");
                black_box(result)
            })
        });
    }

    group.bench_function("compile_numeric_loop", |b| {
        b.iter(|| compile(black_box(NUMERIC_LOOP)).expect("compiles"))
    });

    group.finish();
}

fn bench_values(c: &mut Criterion) {
    let module = compile(
        "var t = {}\n\
         for (var i = 0; i < 1000; i += 1) { t[i] = i * i }\n\
         return t[999]",
    )
    .expect("compiles");
    c.bench_function("table_fill", |b| {
        b.iter(|| {
            let result = main(black_box(&module), &[]).expect("runs");
            assert_eq!(result, Value::Number(998001.0));
        })
    });
}

criterion_group!(benches, bench_interpreter, bench_values);
criterion_main!(benches);

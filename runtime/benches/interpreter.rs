//! Interpreter throughput on small guest programs.
//!
//!   cargo bench --bench interpreter

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use runtime::{Runtime, compile_source};
use vm::{Unit, VmConfig};

const COUNTING_LOOP: &str = "(lasgn :i (lit 0)) \
     (while (call (lvar :i) :< (lit 100000)) (lasgn :i (call (lvar :i) :+ (lit 1)))) \
     (lvar :i)";

const METHOD_SENDS: &str = "(class Counter nil \
       (defn initialize (args) (iasgn :@n (lit 0))) \
       (defn bump (args) (iasgn :@n (call (ivar :@n) :+ (lit 1)))) \
       (defn n (args) (ivar :@n))) \
     (lasgn :c (call (const :Counter) :new)) \
     (iter (call (lit 20000) :times) (args) (call (lvar :c) :bump)) \
     (call (lvar :c) :n)";

const CLOSURES: &str = "(lasgn :sum (lit 0)) \
     (iter (call (call (lit 1) :upto (lit 5000)) :map) (args x) \
       (lasgn :sum (call (lvar :sum) :+ (lvar :x))) \
       (call (lvar :x) :* (lit 2)))";

const RECURSION: &str = "(defn fib (args n) \
       (if (call (lvar :n) :< (lit 2)) (lvar :n) \
         (call (call nil :fib (call (lvar :n) :- (lit 1))) :+ \
               (call nil :fib (call (lvar :n) :- (lit 2)))))) \
     (call nil :fib (lit 18))";

fn unit(name: &str, source: &str) -> Arc<Unit> {
    let program = compile_source(source).unwrap();
    Arc::new(Unit::new(name, program.code, program.source_map))
}

fn bench_programs(c: &mut Criterion) {
    let rt = Runtime::captured();
    let mut group = c.benchmark_group("programs");
    for (name, source) in [
        ("counting_loop", COUNTING_LOOP),
        ("method_sends", METHOD_SENDS),
        ("closures", CLOSURES),
        ("recursion", RECURSION),
    ] {
        let unit = unit(name, source);
        group.bench_function(name, |b| {
            b.iter(|| black_box(rt.run(Arc::clone(&unit), VmConfig::default()).unwrap()))
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_method_sends", |b| {
        b.iter(|| black_box(compile_source(black_box(METHOD_SENDS)).unwrap()))
    });
}

criterion_group!(benches, bench_programs, bench_compile);
criterion_main!(benches);

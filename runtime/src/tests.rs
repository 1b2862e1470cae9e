use std::sync::Arc;
use std::thread;

use vm::{Unit, Value, VmConfig, VmError};

use crate::{Runtime, RunError, compile_source};

fn output_of(src: &str) -> String {
    let rt = Runtime::captured();
    if let Err(err) = rt.eval("main.gb", src, VmConfig::default()) {
        panic!("{src}: {err}");
    }
    rt.take_output()
}

fn value_of(src: &str) -> String {
    output_of(&format!("(call nil :p (begin {src}))")).trim_end().to_string()
}

/// The uncaught exception report, with or without its backtrace lines.
fn report(rt: &Arc<Runtime>, src: &str, config: VmConfig) -> String {
    match rt.eval("main.gb", src, config) {
        Err(RunError::Vm(VmError::Uncaught(raised))) => rt.describe_uncaught(&raised),
        other => panic!("expected an uncaught exception from {src}, got {other:?}"),
    }
}

fn failure_of(src: &str) -> String {
    let rt = Runtime::captured();
    let report = report(&rt, src, VmConfig::default());
    report.lines().next().unwrap_or_default().to_string()
}

#[test]
fn puts_print_and_p() {
    let out = output_of(
        "(call nil :puts (str \"hi\") (lit 1) (array (lit 2) (nil))) \
         (call nil :print (str \"a\") (lit :b)) \
         (call nil :p (str \"q\") (lit :sym) (lit 1.5) (nil))",
    );
    assert_eq!(out, "hi\n1\n2\n\nab\"q\"\n:sym\n1.5\nnil\n");
}

#[test]
fn classes_with_accessors_and_initialize() {
    let out = output_of(
        "(class Point nil \
           (call nil :attr_accessor (lit :x) (lit :y)) \
           (defn initialize (args x y) (iasgn :@x (lvar :x)) (iasgn :@y (lvar :y))) \
           (defn sum (args) (call (call (self) :x) :+ (call (self) :y)))) \
         (lasgn :pt (call (const :Point) :new (lit 1) (lit 2))) \
         (attrasgn (lvar :pt) :x= (lit 10)) \
         (call nil :p (call (lvar :pt) :sum) (lvar :pt)) \
         (call nil :p (call (const :Point) :instance_methods (false)))",
    );
    assert_eq!(out, "12\n#<Point @x=10, @y=2>\n[:sum, :x, :x=, :y, :y=]\n");
}

#[test]
fn inheritance_and_class_queries() {
    let src = "(class Animal nil \
                 (defn speak (args) (str \"...\")) \
                 (defn kind (args) (str \"animal\"))) \
               (class Dog (const :Animal) (defn speak (args) (str \"woof\"))) \
               (lasgn :d (call (const :Dog) :new))";
    assert_eq!(
        value_of(&format!(
            "{src} (array (call (lvar :d) :speak) (call (lvar :d) :kind) \
               (call (lvar :d) :is_a? (const :Animal)) (call (lvar :d) :instance_of? (const :Animal)) \
               (call (const :Dog) :superclass) (call (lvar :d) :class))"
        )),
        r#"["woof", "animal", true, false, Animal, Dog]"#
    );
}

#[test]
fn reopening_a_class_keeps_its_methods() {
    let src = "(class A nil (defn one (args) (lit 1))) \
               (class A nil (defn two (args) (lit 2))) \
               (lasgn :a (call (const :A) :new)) \
               (call (call (lvar :a) :one) :+ (call (lvar :a) :two))";
    assert_eq!(value_of(src), "3");
    assert_eq!(
        failure_of("(class B nil) (class B (const :String))"),
        "superclass mismatch for class B (TypeError)"
    );
}

#[test]
fn nested_constants_resolve_lexically() {
    let src = "(module Outer \
                 (cdecl :K (lit 7)) \
                 (class Inner nil (defn k (args) (const :K)))) \
               (lasgn :inner (call (const :Outer) :const_get (lit :Inner))) \
               (array (call (lvar :inner) :name) (call (call (lvar :inner) :new) :k))";
    assert_eq!(value_of(src), r#"["Outer::Inner", 7]"#);
    assert_eq!(failure_of("(const :Missing)"), "uninitialized constant Missing (NameError)");
}

#[test]
fn top_level_methods_are_private() {
    assert_eq!(value_of("(defn helper (args) (lit 1)) (call nil :helper)"), "1");
    assert_eq!(
        failure_of("(defn helper (args) (lit 1)) (call (lit 5) :helper)"),
        "private method 'helper' called for an instance of Integer (NoMethodError)"
    );
    assert_eq!(value_of("(defn helper (args) (lit 1)) (call (lit 5) :send (lit :helper))"), "1");
}

#[test]
fn missing_methods() {
    assert_eq!(
        failure_of("(call nil :nope)"),
        "undefined local variable or method 'nope' for main (NameError)"
    );
    assert_eq!(
        failure_of("(call (lit 1) :nope (lit 2))"),
        "undefined method 'nope' for an instance of Integer (NoMethodError)"
    );
    assert_eq!(
        failure_of("(call (nil) :upcase)"),
        "undefined method 'upcase' for nil (NoMethodError)"
    );
    let src = "(class Ghost nil \
                 (defn method_missing (args name (rest rest)) (array (lvar :name) (lvar :rest)))) \
               (call (call (const :Ghost) :new) :boo (lit 1))";
    assert_eq!(value_of(src), "[:boo, [1]]");
}

#[test]
fn custom_exceptions_are_rescued_by_class() {
    let out = output_of(
        "(class MyError (const :StandardError)) \
         (rescue (call nil :raise (const :MyError) (str \"bad\")) \
           (resbody (array (const :ArgumentError)) nil (call nil :puts (str \"wrong\"))) \
           (resbody (array (const :MyError)) (lasgn :e) \
             (call nil :p (call (lvar :e) :message) (lvar :e) (call (lvar :e) :is_a? (const :StandardError)))))",
    );
    assert_eq!(out, "\"bad\"\n#<MyError: bad>\ntrue\n");
}

#[test]
fn raise_forms() {
    assert_eq!(failure_of("(call nil :raise (str \"boom\"))"), "boom (RuntimeError)");
    assert_eq!(failure_of("(call nil :raise (const :TypeError))"), "TypeError (TypeError)");
    assert_eq!(
        failure_of("(call nil :raise (call (const :KeyError) :new (str \"k\")))"),
        "k (KeyError)"
    );
    assert_eq!(failure_of("(call nil :raise)"), "unhandled exception (RuntimeError)");
    assert_eq!(
        failure_of("(call nil :raise (lit 3))"),
        "exception class/object expected (TypeError)"
    );
}

#[test]
fn uncaught_report_lists_frames() {
    let rt = Runtime::captured();
    let report = report(
        &rt,
        "(defn f (args) (call@2:3 nil :raise (str \"boom\"))) (call@4:1 nil :f)",
        VmConfig::default(),
    );
    assert_eq!(
        report,
        "boom (RuntimeError)\n\tfrom main.gb:2:in 'f'\n\tfrom main.gb:4:in '<main>'"
    );
}

#[test]
fn bare_raise_in_rescue_reraises_the_current_exception() {
    let src = "(rescue \
                 (rescue (call nil :raise (str \"inner\")) (resbody (array) nil (call nil :raise))) \
                 (resbody (array) (lasgn :e) (call (lvar :e) :message)))";
    assert_eq!(value_of(src), "\"inner\"");
}

#[test]
fn integer_and_float_arithmetic() {
    assert_eq!(
        value_of(
            "(array (call (lit -7) :/ (lit 2)) (call (lit -7) :% (lit 3)) (call (lit 2) :** (lit 10)) \
               (call (lit 1) :+ (lit 0.5)) (call (lit 7.0) :/ (lit 2)) (call (lit 2) :** (lit -1)))"
        ),
        "[-4, 2, 1024, 1.5, 3.5, 0.5]"
    );
    assert_eq!(value_of("(call (lit 9223372036854775807) :+ (lit 1))"), "9.223372036854776e+18");
    assert_eq!(value_of("(call (lit 255) :to_s (lit 16))"), "\"ff\"");
    assert_eq!(failure_of("(call (lit 1) :/ (lit 0))"), "divided by 0 (ZeroDivisionError)");
    assert_eq!(
        failure_of("(call (lit 1) :+ (str \"a\"))"),
        "String can't be coerced into Integer (TypeError)"
    );
    assert_eq!(
        failure_of("(call (lit 1) :< (nil))"),
        "comparison of Integer with nil failed (ArgumentError)"
    );
}

#[test]
fn integer_iteration() {
    let out = output_of(
        "(iter (call (lit 3) :times) (args i) (call nil :print (lvar :i))) \
         (iter (call (lit 3) :upto (lit 5)) (args i) (call nil :print (lvar :i))) \
         (iter (call (lit 2) :downto (lit 1)) (args i) (call nil :print (lvar :i)))",
    );
    assert_eq!(out, "01234521");
}

#[test]
fn strings_and_symbols() {
    assert_eq!(
        value_of(
            "(lasgn :s (str \"Hello\")) \
             (call (lvar :s) :<< (str \" world\")) \
             (array (lvar :s) (call (lvar :s) :length) (call (lvar :s) :upcase) \
               (call (lvar :s) :include? (str \"lo w\")) (call (lvar :s) :[] (lit -5) (lit 3)) \
               (call (str \"a,b,,c\") :split (str \",\")) (call (str \"42abc\") :to_i) \
               (call (lit :name) :to_proc) (call (str \"x\") :to_sym) (call (str \"ab\") :* (lit 2)))"
        ),
        r#"["Hello world", 11, "HELLO WORLD", true, "wor", ["a", "b", "", "c"], 42, #<Proc(&:name) (lambda)>, :x, "abab"]"#
    );
    assert_eq!(value_of("(str \"tab\\there\")"), r#""tab\there""#);
}

#[test]
fn interpolation_calls_to_s() {
    let src = "(class T nil (defn to_s (args) (str \"tee\"))) \
               (dstr \"<\" (evstr (call (const :T) :new)) (str \"|\") (evstr (lit 1.0)) (str \">\"))";
    assert_eq!(value_of(src), "\"<tee|1.0>\"");
}

#[test]
fn array_methods() {
    assert_eq!(
        value_of(
            "(lasgn :xs (array (lit 3) (lit 1) (lit 2))) \
             (array \
               (call (iter (call (lvar :xs) :map) (args x) (call (lvar :x) :* (lit 2))) :sort) \
               (iter (call (lvar :xs) :select) (args x) (call (lvar :x) :odd?)) \
               (call (lvar :xs) :inject (lit :+)) \
               (iter (call (lvar :xs) :inject (lit 10)) (args acc x) (call (lvar :acc) :+ (lvar :x))) \
               (call (lvar :xs) :map (block_pass (lit :to_s))) \
               (call (lvar :xs) :join (str \"-\")) \
               (call (lvar :xs) :max) \
               (call (lvar :xs) :include? (lit 2.0)) \
               (call (array (lit 1) (array (lit 2) (nil))) :flatten) \
               (call (lvar :xs) :first (lit 2)))"
        ),
        r#"[[2, 4, 6], [3, 1], 6, 16, ["3", "1", "2"], "3-1-2", 3, true, [1, 2, nil], [3, 1]]"#
    );
    assert_eq!(
        value_of(
            "(lasgn :xs (array)) (attrasgn (lvar :xs) :[]= (lit 2) (lit :c)) \
             (call (lvar :xs) :push (lit :d)) (lvar :xs)"
        ),
        "[nil, nil, :c, :d]"
    );
    let failure = failure_of("(call (array (lit 1) (str \"a\")) :sort)");
    assert!(failure.starts_with("comparison of "), "{failure}");
    assert!(failure.ends_with(" failed (ArgumentError)"), "{failure}");
}

#[test]
fn each_with_index_destructures_pairs() {
    let out = output_of(
        "(iter (call (array (str \"a\") (str \"b\")) :each_with_index) (args x i) \
           (call nil :puts (dstr \"\" (evstr (lvar :i)) (str \":\") (evstr (lvar :x)))))",
    );
    assert_eq!(out, "0:a\n1:b\n");
}

#[test]
fn hashes() {
    let out = output_of(
        "(lasgn :h (hash (lit :a) (lit 1))) \
         (attrasgn (lvar :h) :[]= (str \"b\") (lit 2)) \
         (call nil :p (lvar :h) (call (lvar :h) :fetch (lit :a)) (call (lvar :h) :[] (lit :zz))) \
         (iter (call (lvar :h) :each) (args k v) \
           (call nil :puts (dstr \"\" (evstr (lvar :k)) (str \"=\") (evstr (lvar :v))))) \
         (call nil :p (call (lvar :h) :merge (hash (lit :a) (lit 9) (lit :c) (lit 3))))",
    );
    assert_eq!(
        out,
        "{:a => 1, \"b\" => 2}\n1\nnil\na=1\nb=2\n{:a => 9, \"b\" => 2, :c => 3}\n"
    );
    assert_eq!(
        failure_of("(call (hash) :fetch (lit :zz))"),
        "key not found: :zz (KeyError)"
    );
}

#[test]
fn keyword_arguments_reach_initialize() {
    let src = "(class Box nil \
                 (defn initialize (args (kw w) (kw h (lit 1))) (iasgn :@area (call (lvar :w) :* (lvar :h)))) \
                 (defn area (args) (ivar :@area))) \
               (call (call (const :Box) :new (kwargs (lit :w) (lit 3) (lit :h) (lit 4))) :area)";
    assert_eq!(value_of(src), "12");
}

#[test]
fn case_when_uses_case_equality() {
    let src = |subject: &str| {
        format!(
            "(case {subject} \
               (when (array (const :String)) (str \"string\")) \
               (when (array (lit 1) (lit 2)) (str \"small\")) \
               (when (array (const :Integer)) (str \"integer\")) \
               (str \"other\"))"
        )
    };
    assert_eq!(value_of(&src("(str \"x\")")), "\"string\"");
    assert_eq!(value_of(&src("(lit 2)")), "\"small\"");
    assert_eq!(value_of(&src("(lit 9)")), "\"integer\"");
    assert_eq!(value_of(&src("(nil)")), "\"other\"");
}

#[test]
fn pattern_matching() {
    assert_eq!(
        value_of(
            "(case_in (hash (lit :k) (array (lit 1) (lit 2) (lit 3))) \
               (in (phash (pair :k (parray (pvar :a) (prest :r)))) nil (array (lvar :a) (lvar :r))))"
        ),
        "[1, [2, 3]]"
    );
    assert_eq!(
        failure_of("(case_in (lit 5) (in (lit 1) nil (str \"one\")))"),
        "5 (NoMatchingPatternError)"
    );
}

#[test]
fn loop_stops_at_stop_iteration() {
    let src = "(lasgn :i (lit 0)) \
               (iter (call nil :loop) nil \
                 (lasgn :i (call (lvar :i) :+ (lit 1))) \
                 (if (call (lvar :i) :> (lit 3)) (call nil :raise (const :StopIteration)) nil)) \
               (lvar :i)";
    assert_eq!(value_of(src), "4");
}

#[test]
fn redo_restarts_a_block_without_rebinding() {
    let src = "(lasgn :n (lit 0)) (lasgn :seen (array)) \
               (iter (call (array (lit 1) (lit 2)) :each) (args x) \
                 (lasgn :n (call (lvar :n) :+ (lit 1))) \
                 (call (lvar :seen) :<< (lvar :x)) \
                 (if (call (lvar :n) :== (lit 1)) (block (lasgn :x (lit 10)) (redo)) nil)) \
               (array (lvar :n) (lvar :seen))";
    assert_eq!(value_of(src), "[3, [1, 10, 2]]");
}

#[test]
fn redo_reruns_a_loop_body_without_the_condition() {
    let src = "(lasgn :i (lit 0)) (lasgn :passes (lit 0)) \
               (while (call (lvar :i) :< (lit 1)) \
                 (block \
                   (lasgn :passes (call (lvar :passes) :+ (lit 1))) \
                   (lasgn :i (call (lvar :i) :+ (lit 1))) \
                   (if (call (lvar :passes) :== (lit 1)) (redo) nil))) \
               (array (lvar :i) (lvar :passes))";
    assert_eq!(value_of(src), "[2, 2]");
}

#[test]
fn lambdas_and_procs() {
    assert_eq!(
        value_of(
            "(lasgn :sq (lambda (args x) (call (lvar :x) :* (lvar :x)))) \
             (lasgn :pr (iter (call nil :proc) (args a b) (array (lvar :a) (lvar :b)))) \
             (array (call (lvar :sq) :call (lit 4)) (call (lvar :sq) :lambda?) (call (lvar :sq) :arity) \
               (call (lvar :pr) :call (lit 1)) (call (lvar :pr) :lambda?))"
        ),
        "[16, true, 1, [1, nil], false]"
    );
    assert_eq!(
        failure_of("(call (lambda (args x) (lvar :x)) :call)"),
        "wrong number of arguments (given 0, expected 1) (ArgumentError)"
    );
}

#[test]
fn fibers_pass_values_both_ways() {
    let src = "(lasgn :f (iter (call (const :Fiber) :new) (args x) \
                 (lasgn :y (call (const :Fiber) :yield (call (lvar :x) :+ (lit 1)))) \
                 (call (lvar :y) :* (lit 10)))) \
               (lasgn :a (call (lvar :f) :resume (lit 1))) \
               (lasgn :b (call (lvar :f) :resume (lit 5))) \
               (array (lvar :a) (lvar :b) (call (lvar :f) :alive?))";
    assert_eq!(value_of(src), "[2, 50, false]");
    assert_eq!(
        failure_of("(call (const :Fiber) :yield (lit 1))"),
        "can't yield from root fiber (FiberError)"
    );
}

#[test]
fn deep_recursion_raises_system_stack_error() {
    let rt = Runtime::captured();
    let config = VmConfig { max_depth: 100, ..VmConfig::default() };
    let report = report(&rt, "(defn f (args) (call nil :f)) (call nil :f)", config);
    assert!(report.starts_with("stack level too deep (SystemStackError)"), "{report}");
}

#[test]
fn default_limits_stop_unbounded_recursion_on_a_test_thread() {
    let rt = Runtime::captured();
    let src = "(defn f (args n) (call nil :f (call (lvar :n) :+ (lit 1)))) (call nil :f (lit 0))";
    let report = report(&rt, src, VmConfig::default());
    assert!(report.starts_with("stack level too deep (SystemStackError)"), "{report}");
}

#[test]
fn pending_interrupt_stops_a_loop() {
    let rt = Runtime::captured();
    let program = compile_source("(while (true) (nil))").unwrap();
    let unit = Arc::new(Unit::new("main.gb", program.code, program.source_map));
    let mut vm = rt.vm(VmConfig::default());
    vm.interrupt_handle().raise(rt.interrupt());
    match vm.run(unit, rt.main().clone()) {
        Err(VmError::Uncaught(raised)) => {
            assert!(rt.describe_uncaught(&raised).starts_with("Interrupt (Interrupt)"));
        }
        other => panic!("expected an interrupt, got {other:?}"),
    }
}

#[test]
fn vms_share_one_runtime_across_threads() {
    let rt = Runtime::captured();
    let results: Vec<Value> = thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|n| {
                let rt = Arc::clone(&rt);
                scope.spawn(move || {
                    let src = format!(
                        "(lasgn :sum (lit 0)) \
                         (iter (call (lit 1) :upto (lit {n}00)) (args i) \
                           (lasgn :sum (call (lvar :sum) :+ (lvar :i)))) \
                         (lvar :sum)"
                    );
                    rt.eval("worker.gb", &src, VmConfig::default()).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    let sums: Vec<_> = results.iter().filter_map(Value::as_int).collect();
    assert_eq!(sums, vec![5050, 20100, 45150, 80200]);
}

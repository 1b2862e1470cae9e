//! Native methods of the core classes.
//!
//! Each module exports descriptor tables; [`install`] attaches them to the
//! classes of a freshly bootstrapped [`Core`].

use std::fmt;
use std::sync::Arc;

use vm::{Args, Call, ErrorKind, Proc, Unwind, Value, Vm};

use crate::Runtime;
use crate::bootstrap::Core;
use crate::object::{Class, Method, Visibility};

pub mod array;
pub mod boolean;
pub mod class;
pub mod hash;
pub mod kernel;
pub mod numeric;
pub mod proc;
pub mod string;

pub type BuiltinFn = fn(&Runtime, &mut Vm, Call) -> Result<Value, Unwind>;

pub struct Builtin {
    pub name: &'static str,
    /// Exact count when non-negative; `-n - 1` means at least `n`.
    pub arity: i8,
    pub func: BuiltinFn,
}

impl Builtin {
    pub const fn new(name: &'static str, arity: i8, func: BuiltinFn) -> Self {
        Self { name, arity, func }
    }

    pub fn accepts(&self, given: usize) -> bool {
        match usize::try_from(self.arity) {
            Ok(exact) => given == exact,
            Err(_) => given >= usize::from(self.arity.unsigned_abs() - 1),
        }
    }

    pub fn arity_text(&self) -> String {
        match usize::try_from(self.arity) {
            Ok(exact) => exact.to_string(),
            Err(_) => format!("{}+", self.arity.unsigned_abs() - 1),
        }
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}/{}>", self.name, self.arity)
    }
}

pub fn install(core: &Core) {
    let public = |class: &Arc<Class>, table: &'static [Builtin]| {
        for builtin in table {
            class.define(builtin.name, Method::Builtin(builtin), Visibility::Public);
        }
    };
    let singleton = |class: &Arc<Class>, table: &'static [Builtin]| {
        for builtin in table {
            class.define_singleton(builtin.name, Method::Builtin(builtin));
        }
    };

    public(&core.object, kernel::OBJECT);
    for builtin in kernel::KERNEL {
        core.object.define(builtin.name, Method::Builtin(builtin), Visibility::Private);
    }
    public(&core.module, class::MODULE);
    singleton(&core.exception, class::EXCEPTION_CLASS);
    public(&core.exception, class::EXCEPTION);
    for builtin in class::EXCEPTION_PRIVATE {
        core.exception.define(builtin.name, Method::Builtin(builtin), Visibility::Private);
    }
    public(&core.integer, numeric::INTEGER);
    public(&core.float, numeric::FLOAT);
    public(&core.string, string::STRING);
    public(&core.symbol, string::SYMBOL);
    public(&core.array, array::ARRAY);
    public(&core.hash, hash::HASH);
    public(&core.nil, boolean::NIL);
    public(&core.true_, boolean::TRUE);
    public(&core.false_, boolean::FALSE);
    public(&core.proc, proc::PROC);
    singleton(&core.fiber, proc::FIBER_CLASS);
    public(&core.fiber, proc::FIBER);
}

/// The `index`th positional argument, nil when absent.
pub fn arg(call: &Call, index: usize) -> Value {
    call.args.get(index).cloned().unwrap_or_default()
}

/// Arguments to pass on unchanged, with the keyword hash split off again.
pub fn forwarded(mut args: Vec<Value>, kwargs: &Option<Value>) -> (Vec<Value>, Option<Value>) {
    match kwargs {
        Some(_) => {
            let kwargs = args.pop();
            (args, kwargs)
        }
        None => (args, None),
    }
}

pub fn expect_int(vm: &Vm, value: &Value) -> Result<i64, Unwind> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(conversion_error(vm, other, "Integer")),
    }
}

pub fn expect_string(vm: &Vm, value: &Value) -> Result<String, Unwind> {
    match value {
        Value::String(s) => Ok(s.lock().clone()),
        other => Err(conversion_error(vm, other, "String")),
    }
}

/// A method or variable name given as a symbol or string.
pub fn expect_name(vm: &Vm, value: &Value) -> Result<String, Unwind> {
    match value {
        Value::Symbol(s) => Ok(s.to_string()),
        Value::String(s) => Ok(s.lock().clone()),
        other => Err(vm.error(
            ErrorKind::Type,
            format!("{} is not a symbol nor a string", other.describe()),
        )),
    }
}

pub fn conversion_error(vm: &Vm, value: &Value, into: &str) -> Unwind {
    vm.error(ErrorKind::Type, format!("no implicit conversion of {} into {into}", type_name(value)))
}

/// Class name of an immediate or core value, for error messages.
pub fn type_name(value: &Value) -> String {
    match value {
        Value::Nil | Value::Undefined => "nil".into(),
        Value::Bool(true) => "true".into(),
        Value::Bool(false) => "false".into(),
        Value::Integer(_) => "Integer".into(),
        Value::Float(_) => "Float".into(),
        Value::Symbol(_) => "Symbol".into(),
        Value::String(_) => "String".into(),
        Value::Array(_) => "Array".into(),
        Value::Hash(_) => "Hash".into(),
        Value::Proc(_) => "Proc".into(),
        Value::Object(object) => format!("{object:?}"),
    }
}

pub fn require_block(vm: &Vm, call: &Call) -> Result<Arc<Proc>, Unwind> {
    call.block.clone().ok_or_else(|| vm.error(ErrorKind::LocalJump, "no block given (yield)"))
}

pub fn yield_one(vm: &mut Vm, block: &Arc<Proc>, value: Value) -> Result<Value, Unwind> {
    vm.call_block(block, Args { positional: vec![value], ..Args::default() })
}

pub fn yield_many(vm: &mut Vm, block: &Arc<Proc>, values: Vec<Value>) -> Result<Value, Unwind> {
    vm.call_block(block, Args { positional: values, ..Args::default() })
}

/// `to_s` as guest code would see it.
pub fn to_s(vm: &mut Vm, value: &Value) -> Result<String, Unwind> {
    match value {
        Value::String(s) => Ok(s.lock().clone()),
        other => match vm.send(other.clone(), "to_s", Vec::new(), None)? {
            Value::String(s) => Ok(s.lock().clone()),
            _ => Ok(format!("#<{}>", type_name(other))),
        },
    }
}

pub fn inspect(vm: &mut Vm, value: &Value) -> Result<String, Unwind> {
    match vm.send(value.clone(), "inspect", Vec::new(), None)? {
        Value::String(s) => Ok(s.lock().clone()),
        other => Ok(other.describe()),
    }
}

/// `==` between two values. Core values compare structurally; anything
/// else asks the receiver.
pub fn equal(vm: &mut Vm, a: &Value, b: &Value) -> Result<bool, Unwind> {
    Ok(match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            (*x as f64) == *y
        }
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(_), _) | (Value::Symbol(_), _) | (Value::Integer(_), _) => a.eql(b),
        (Value::Array(x), Value::Array(y)) => {
            let x = x.lock().clone();
            let y = y.lock().clone();
            if x.len() != y.len() {
                return Ok(false);
            }
            for (left, right) in x.iter().zip(&y) {
                if !equal(vm, left, right)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Hash(x), Value::Hash(y)) => {
            let x = x.lock().clone();
            let y = y.lock().clone();
            if x.len() != y.len() {
                return Ok(false);
            }
            for (key, value) in x.iter() {
                let Some(other) = y.get(key) else {
                    return Ok(false);
                };
                if !equal(vm, value, other)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Object(_), _) => vm.send(a.clone(), "==", vec![b.clone()], None)?.is_truthy(),
        _ => a.identical(b),
    })
}

/// Float text as `to_s` shows it: `1.0`, `0.1`, `1.0e+20`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".into()
    } else if x.is_infinite() {
        if x > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else if x.abs() >= 1e16 {
        let text = format!("{x:e}");
        match text.split_once('e') {
            Some((mantissa, exp)) => {
                let mantissa =
                    if mantissa.contains('.') { mantissa.to_string() } else { format!("{mantissa}.0") };
                let sign = if exp.starts_with('-') { "" } else { "+" };
                format!("{mantissa}e{sign}{exp}")
            }
            None => text,
        }
    } else {
        format!("{x}")
    }
}

/// `inspect` text of a string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `inspect` text of a symbol.
pub fn symbol_inspect(name: &str) -> String {
    let plain = name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '@' || c == '$')
        && name
            .trim_end_matches(['?', '!', '='])
            .trim_start_matches(['@', '$'])
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_');
    let operator = matches!(
        name,
        "+" | "-" | "*" | "/" | "%" | "**" | "==" | "!=" | "<" | "<=" | ">" | ">=" | "<=>" | "==="
            | "[]" | "[]=" | "<<" | ">>" | "!" | "-@" | "+@" | "&" | "|" | "^" | "=~"
    );
    if plain || operator { format!(":{name}") } else { format!(":{}", quote(name)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Runtime, _: &mut Vm, _: Call) -> Result<Value, Unwind> {
        Ok(Value::Nil)
    }

    #[test]
    fn arity_checks() {
        let exact = Builtin::new("x", 1, noop);
        assert!(exact.accepts(1));
        assert!(!exact.accepts(0));
        assert_eq!(exact.arity_text(), "1");
        let any = Builtin::new("y", -1, noop);
        assert!(any.accepts(0) && any.accepts(5));
        assert_eq!(any.arity_text(), "0+");
        let at_least_one = Builtin::new("z", -2, noop);
        assert!(!at_least_one.accepts(0));
        assert!(at_least_one.accepts(3));
        assert_eq!(at_least_one.arity_text(), "1+");
    }

    #[test]
    fn float_text() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e20), "1.0e+20");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("a\"b\n"), r#""a\"b\n""#);
        assert_eq!(symbol_inspect("foo"), ":foo");
        assert_eq!(symbol_inspect("empty?"), ":empty?");
        assert_eq!(symbol_inspect("<=>"), ":<=>");
        assert_eq!(symbol_inspect("with space"), r#":"with space""#);
    }
}

//! `Integer` and `Float`.
//!
//! Integers are 64-bit; results that overflow continue as floats.

use std::cmp::Ordering;

use vm::{Call, ErrorKind, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{Builtin, arg, expect_int, format_float, require_block, type_name, yield_one};

pub static INTEGER: &[Builtin] = &[
    Builtin::new("+", 1, add),
    Builtin::new("-", 1, sub),
    Builtin::new("*", 1, mul),
    Builtin::new("/", 1, div),
    Builtin::new("%", 1, modulo),
    Builtin::new("**", 1, pow),
    Builtin::new("==", 1, num_eq),
    Builtin::new("===", 1, num_eq),
    Builtin::new("<", 1, lt),
    Builtin::new("<=", 1, le),
    Builtin::new(">", 1, gt),
    Builtin::new(">=", 1, ge),
    Builtin::new("<=>", 1, cmp),
    Builtin::new("between?", 2, between),
    Builtin::new("-@", 0, neg),
    Builtin::new("abs", 0, abs),
    Builtin::new("to_s", -1, int_to_s),
    Builtin::new("inspect", 0, int_to_s),
    Builtin::new("to_i", 0, int_to_i),
    Builtin::new("to_f", 0, to_f),
    Builtin::new("floor", 0, int_to_i),
    Builtin::new("ceil", 0, int_to_i),
    Builtin::new("round", 0, int_to_i),
    Builtin::new("succ", 0, int_succ),
    Builtin::new("pred", 0, int_pred),
    Builtin::new("zero?", 0, is_zero),
    Builtin::new("even?", 0, int_even),
    Builtin::new("odd?", 0, int_odd),
    Builtin::new("times", 0, int_times),
    Builtin::new("upto", 1, int_upto),
    Builtin::new("downto", 1, int_downto),
];

pub static FLOAT: &[Builtin] = &[
    Builtin::new("+", 1, add),
    Builtin::new("-", 1, sub),
    Builtin::new("*", 1, mul),
    Builtin::new("/", 1, div),
    Builtin::new("%", 1, modulo),
    Builtin::new("**", 1, pow),
    Builtin::new("==", 1, num_eq),
    Builtin::new("===", 1, num_eq),
    Builtin::new("<", 1, lt),
    Builtin::new("<=", 1, le),
    Builtin::new(">", 1, gt),
    Builtin::new(">=", 1, ge),
    Builtin::new("<=>", 1, cmp),
    Builtin::new("between?", 2, between),
    Builtin::new("-@", 0, neg),
    Builtin::new("abs", 0, abs),
    Builtin::new("to_s", 0, float_to_s),
    Builtin::new("inspect", 0, float_to_s),
    Builtin::new("to_i", 0, float_truncate),
    Builtin::new("to_f", 0, to_f),
    Builtin::new("floor", 0, float_floor),
    Builtin::new("ceil", 0, float_ceil),
    Builtin::new("round", 0, float_round),
    Builtin::new("zero?", 0, is_zero),
    Builtin::new("nan?", 0, float_nan),
    Builtin::new("infinite?", 0, float_infinite),
];

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Num> {
        match value {
            Value::Integer(i) => Some(Num::Int(*i)),
            Value::Float(x) => Some(Num::Float(*x)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }

    fn partial_cmp(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }
}

fn receiver(call: &Call) -> Num {
    Num::from_value(&call.receiver).unwrap_or(Num::Int(0))
}

fn receiver_name(call: &Call) -> &'static str {
    match call.receiver {
        Value::Float(_) => "Float",
        _ => "Integer",
    }
}

/// The right operand of an arithmetic operator.
fn operand(vm: &Vm, call: &Call) -> Result<Num, Unwind> {
    let other = arg(call, 0);
    Num::from_value(&other).ok_or_else(|| {
        vm.error(
            ErrorKind::Type,
            format!("{} can't be coerced into {}", type_name(&other), receiver_name(call)),
        )
    })
}

/// The right operand of a comparison operator.
fn comparand(vm: &Vm, call: &Call) -> Result<Num, Unwind> {
    let other = arg(call, 0);
    Num::from_value(&other).ok_or_else(|| {
        vm.error(
            ErrorKind::Argument,
            format!("comparison of {} with {} failed", receiver_name(call), describe_operand(&other)),
        )
    })
}

fn describe_operand(value: &Value) -> String {
    match value {
        Value::Nil => "nil".into(),
        Value::Integer(i) => i.to_string(),
        Value::Float(x) => format_float(*x),
        other => type_name(other),
    }
}

fn arith(
    a: Num,
    b: Num,
    checked: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match checked(x, y) {
            Some(result) => Value::Integer(result),
            None => Value::Float(float(x as f64, y as f64)),
        },
        (a, b) => Value::Float(float(a.to_f64(), b.to_f64())),
    }
}

fn add(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    Ok(arith(receiver(&call), b, i64::checked_add, |x, y| x + y))
}

fn sub(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    Ok(arith(receiver(&call), b, i64::checked_sub, |x, y| x - y))
}

fn mul(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    Ok(arith(receiver(&call), b, i64::checked_mul, |x, y| x * y))
}

/// Integer division rounds toward negative infinity.
fn floor_div(x: i64, y: i64) -> Option<i64> {
    let quotient = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) { Some(quotient - 1) } else { Some(quotient) }
}

/// The remainder takes the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let remainder = x.checked_rem(y)?;
    if remainder != 0 && ((remainder < 0) != (y < 0)) { Some(remainder + y) } else { Some(remainder) }
}

fn float_mod(x: f64, y: f64) -> f64 {
    let remainder = x % y;
    if remainder != 0.0 && ((remainder < 0.0) != (y < 0.0)) { remainder + y } else { remainder }
}

fn div(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    let a = receiver(&call);
    if let (Num::Int(_), Num::Int(0)) = (a, b) {
        return Err(vm.error(ErrorKind::ZeroDivision, "divided by 0"));
    }
    Ok(arith(a, b, floor_div, |x, y| x / y))
}

fn modulo(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    let a = receiver(&call);
    if let (Num::Int(_), Num::Int(0)) = (a, b) {
        return Err(vm.error(ErrorKind::ZeroDivision, "divided by 0"));
    }
    Ok(arith(a, b, floor_mod, float_mod))
}

/// Negative integer exponents produce a float.
fn pow(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let b = operand(vm, &call)?;
    let checked = |x: i64, y: i64| u32::try_from(y).ok().and_then(|y| x.checked_pow(y));
    Ok(arith(receiver(&call), b, checked, f64::powf))
}

fn num_eq(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let equal = Num::from_value(&arg(&call, 0))
        .is_some_and(|other| receiver(&call).partial_cmp(other) == Some(Ordering::Equal));
    Ok(Value::Bool(equal))
}

fn compare(vm: &Vm, call: &Call, test: fn(Ordering) -> bool) -> Result<Value, Unwind> {
    let b = comparand(vm, call)?;
    Ok(Value::Bool(receiver(call).partial_cmp(b).is_some_and(test)))
}

fn lt(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    compare(vm, &call, Ordering::is_lt)
}

fn le(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    compare(vm, &call, Ordering::is_le)
}

fn gt(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    compare(vm, &call, Ordering::is_gt)
}

fn ge(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    compare(vm, &call, Ordering::is_ge)
}

/// nil for non-numeric operands and NaN.
fn cmp(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let ordering = Num::from_value(&arg(&call, 0)).and_then(|other| receiver(&call).partial_cmp(other));
    Ok(ordering.map_or(Value::Nil, ordering_value))
}

pub fn ordering_value(ordering: Ordering) -> Value {
    Value::Integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

fn between(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let value = receiver(&call);
    let low = comparand(vm, &call)?;
    let high = Num::from_value(&arg(&call, 1))
        .ok_or_else(|| vm.error(ErrorKind::Argument, "comparison failed"))?;
    let above = value.partial_cmp(low).is_some_and(Ordering::is_ge);
    let below = value.partial_cmp(high).is_some_and(Ordering::is_le);
    Ok(Value::Bool(above && below))
}

fn neg(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(match receiver(&call) {
        Num::Int(i) => i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Integer),
        Num::Float(x) => Value::Float(-x),
    })
}

fn abs(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(match receiver(&call) {
        Num::Int(i) => i.checked_abs().map_or(Value::Float((i as f64).abs()), Value::Integer),
        Num::Float(x) => Value::Float(x.abs()),
    })
}

fn is_zero(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(receiver(&call).to_f64() == 0.0))
}

fn to_f(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Float(receiver(&call).to_f64()))
}

fn int_value(call: &Call) -> i64 {
    call.receiver.as_int().unwrap_or_default()
}

/// Digits of `n` in `base`, which must be within 2..=36.
fn radix(n: i64, base: u32) -> String {
    let mut magnitude = n.unsigned_abs();
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % u64::from(base)) as u32;
        digits.push(char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= u64::from(base);
        if magnitude == 0 {
            break;
        }
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn int_to_s(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let n = int_value(&call);
    let base = match call.args.first() {
        Some(base) => expect_int(vm, base)?,
        None => 10,
    };
    if call.args.len() > 1 {
        return Err(vm.error(
            ErrorKind::Argument,
            format!("wrong number of arguments (given {}, expected 0..1)", call.args.len()),
        ));
    }
    let base = u32::try_from(base)
        .ok()
        .filter(|base| (2..=36).contains(base))
        .ok_or_else(|| vm.error(ErrorKind::Argument, format!("invalid radix {base}")))?;
    Ok(Value::string(if base == 10 { n.to_string() } else { radix(n, base) }))
}

fn int_to_i(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn int_succ(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(arith(receiver(&call), Num::Int(1), i64::checked_add, |x, y| x + y))
}

fn int_pred(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(arith(receiver(&call), Num::Int(1), i64::checked_sub, |x, y| x - y))
}

fn int_even(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(int_value(&call) % 2 == 0))
}

fn int_odd(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(int_value(&call) % 2 != 0))
}

fn int_times(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    for i in 0..int_value(&call) {
        yield_one(vm, &block, Value::Integer(i))?;
    }
    Ok(call.receiver)
}

fn int_upto(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let last = expect_int(vm, &arg(&call, 0))?;
    for i in int_value(&call)..=last {
        yield_one(vm, &block, Value::Integer(i))?;
    }
    Ok(call.receiver)
}

fn int_downto(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let last = expect_int(vm, &arg(&call, 0))?;
    for i in (last..=int_value(&call)).rev() {
        yield_one(vm, &block, Value::Integer(i))?;
    }
    Ok(call.receiver)
}

fn float_value(call: &Call) -> f64 {
    receiver(call).to_f64()
}

fn float_to_s(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(format_float(float_value(&call))))
}

/// A float converted to an integer; NaN and infinities are errors.
fn to_integer(vm: &Vm, x: f64) -> Result<Value, Unwind> {
    if x.is_nan() {
        return Err(vm.error(ErrorKind::Argument, "NaN"));
    }
    if x.is_infinite() {
        return Err(vm.error(ErrorKind::Argument, if x > 0.0 { "Infinity" } else { "-Infinity" }));
    }
    if x >= i64::MIN as f64 && x < i64::MAX as f64 {
        Ok(Value::Integer(x as i64))
    } else {
        Ok(Value::Float(x))
    }
}

fn float_truncate(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    to_integer(vm, float_value(&call).trunc())
}

fn float_floor(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    to_integer(vm, float_value(&call).floor())
}

fn float_ceil(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    to_integer(vm, float_value(&call).ceil())
}

/// Halves round away from zero.
fn float_round(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    to_integer(vm, float_value(&call).round())
}

fn float_nan(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(float_value(&call).is_nan()))
}

fn float_infinite(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let x = float_value(&call);
    Ok(match x.is_infinite() {
        true if x > 0.0 => Value::Integer(1),
        true => Value::Integer(-1),
        false => Value::Nil,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_floors() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(i64::MIN, -1), None);
        assert_eq!(floor_mod(-7, 3), Some(2));
        assert_eq!(floor_mod(7, -3), Some(-2));
        assert_eq!(float_mod(-7.5, 2.0), 0.5);
    }

    #[test]
    fn overflow_continues_as_float() {
        let sum = arith(Num::Int(i64::MAX), Num::Int(1), i64::checked_add, |x, y| x + y);
        assert!(matches!(sum, Value::Float(x) if x > 9.2e18));
        let product = arith(Num::Int(6), Num::Int(7), i64::checked_mul, |x, y| x * y);
        assert_eq!(product.as_int(), Some(42));
    }

    #[test]
    fn radix_digits() {
        assert_eq!(radix(255, 16), "ff");
        assert_eq!(radix(-5, 2), "-101");
        assert_eq!(radix(0, 8), "0");
    }
}

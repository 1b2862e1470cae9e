use std::cmp::Ordering;

use vm::{Call, ErrorKind, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{
    Builtin, arg, conversion_error, equal, expect_int, inspect, require_block, to_s, type_name,
    yield_many, yield_one,
};

pub static ARRAY: &[Builtin] = &[
    Builtin::new("[]", -2, index),
    Builtin::new("[]=", 2, store),
    Builtin::new("<<", 1, push),
    Builtin::new("push", -1, push),
    Builtin::new("pop", 0, pop),
    Builtin::new("shift", 0, shift),
    Builtin::new("unshift", -1, unshift),
    Builtin::new("first", -1, first),
    Builtin::new("last", -1, last),
    Builtin::new("size", 0, size),
    Builtin::new("length", 0, size),
    Builtin::new("empty?", 0, is_empty),
    Builtin::new("each", 0, each),
    Builtin::new("each_with_index", 0, each_with_index),
    Builtin::new("map", 0, map),
    Builtin::new("collect", 0, map),
    Builtin::new("select", 0, select),
    Builtin::new("filter", 0, select),
    Builtin::new("reject", 0, reject),
    Builtin::new("find", 0, find),
    Builtin::new("any?", 0, any),
    Builtin::new("all?", 0, all),
    Builtin::new("count", 0, count),
    Builtin::new("inject", -1, inject),
    Builtin::new("reduce", -1, inject),
    Builtin::new("sum", 0, sum),
    Builtin::new("include?", 1, include),
    Builtin::new("index", 1, position),
    Builtin::new("join", -1, join),
    Builtin::new("+", 1, concat),
    Builtin::new("==", 1, array_eq),
    Builtin::new("reverse", 0, reverse),
    Builtin::new("sort", 0, sort),
    Builtin::new("min", 0, min),
    Builtin::new("max", 0, max),
    Builtin::new("uniq", 0, uniq),
    Builtin::new("compact", 0, compact),
    Builtin::new("flatten", 0, flatten),
    Builtin::new("to_a", 0, to_a),
    Builtin::new("dup", 0, dup),
    Builtin::new("inspect", 0, array_inspect),
    Builtin::new("to_s", 0, array_inspect),
];

/// Snapshot of the receiver's elements.
fn items(call: &Call) -> Vec<Value> {
    match &call.receiver {
        Value::Array(items) => items.lock().clone(),
        _ => Vec::new(),
    }
}

/// Element `i` at the time of asking; iteration sees concurrent pushes.
fn element(call: &Call, i: usize) -> Option<Value> {
    match &call.receiver {
        Value::Array(items) => items.lock().get(i).cloned(),
        _ => None,
    }
}

fn with_items<R>(call: &Call, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
    match &call.receiver {
        Value::Array(items) => Some(f(&mut items.lock())),
        _ => None,
    }
}

fn normalize(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { index + len as i64 } else { index };
    usize::try_from(index).ok()
}

/// `a[i]` or `a[start, length]`.
fn index(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    if call.args.len() > 2 {
        return Err(vm.error(
            ErrorKind::Argument,
            format!("wrong number of arguments (given {}, expected 1..2)", call.args.len()),
        ));
    }
    let items = items(&call);
    let start = expect_int(vm, &arg(&call, 0))?;
    let Some(start) = normalize(start, items.len()) else {
        return Ok(Value::Nil);
    };
    match call.args.get(1) {
        None => Ok(items.get(start).cloned().unwrap_or_default()),
        Some(count) => {
            let count = expect_int(vm, count)?;
            if start > items.len() || count < 0 {
                return Ok(Value::Nil);
            }
            let end = start.saturating_add(count as usize).min(items.len());
            Ok(Value::array(items[start..end].to_vec()))
        }
    }
}

/// Stores past the end pad with nil.
fn store(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let index = expect_int(vm, &arg(&call, 0))?;
    let value = arg(&call, 1);
    let stored = with_items(&call, |items| {
        let slot = normalize(index, items.len())?;
        if slot >= items.len() {
            items.resize(slot + 1, Value::Nil);
        }
        items[slot] = value.clone();
        Some(())
    })
    .flatten();
    match stored {
        Some(()) => Ok(value),
        None => Err(vm.error(ErrorKind::Index, format!("index {index} too small for array"))),
    }
}

fn push(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    with_items(&call, |items| items.extend(call.args.iter().cloned()));
    Ok(call.receiver)
}

fn pop(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(with_items(&call, Vec::pop).flatten().unwrap_or_default())
}

fn shift(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let shifted = with_items(&call, |items| (!items.is_empty()).then(|| items.remove(0)));
    Ok(shifted.flatten().unwrap_or_default())
}

fn unshift(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    with_items(&call, |items| {
        items.splice(0..0, call.args.iter().cloned());
    });
    Ok(call.receiver)
}

fn take_count(vm: &Vm, call: &Call) -> Result<Option<usize>, Unwind> {
    match call.args.first() {
        None => Ok(None),
        Some(n) => {
            let n = expect_int(vm, n)?;
            usize::try_from(n)
                .map(Some)
                .map_err(|_| vm.error(ErrorKind::Argument, "negative array size"))
        }
    }
}

fn first(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let items = items(&call);
    Ok(match take_count(vm, &call)? {
        None => items.first().cloned().unwrap_or_default(),
        Some(n) => Value::array(items.into_iter().take(n).collect()),
    })
}

fn last(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let items = items(&call);
    Ok(match take_count(vm, &call)? {
        None => items.last().cloned().unwrap_or_default(),
        Some(n) => Value::array(items[items.len().saturating_sub(n)..].to_vec()),
    })
}

fn size(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(with_items(&call, |items| items.len()).unwrap_or(0) as i64))
}

fn is_empty(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(with_items(&call, |items| items.is_empty()).unwrap_or(true)))
}

fn each(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let mut i = 0;
    while let Some(item) = element(&call, i) {
        yield_one(vm, &block, item)?;
        i += 1;
    }
    Ok(call.receiver)
}

fn each_with_index(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let mut i = 0;
    while let Some(item) = element(&call, i) {
        yield_many(vm, &block, vec![item, Value::Integer(i as i64)])?;
        i += 1;
    }
    Ok(call.receiver)
}

fn map(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(item) = element(&call, i) {
        out.push(yield_one(vm, &block, item)?);
        i += 1;
    }
    Ok(Value::array(out))
}

/// Elements for which the block's truthiness equals `keep`.
fn filter(vm: &mut Vm, call: &Call, keep: bool) -> Result<Value, Unwind> {
    let block = require_block(vm, call)?;
    let mut out = Vec::new();
    for item in items(call) {
        if yield_one(vm, &block, item.clone())?.is_truthy() == keep {
            out.push(item);
        }
    }
    Ok(Value::array(out))
}

fn select(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    filter(vm, &call, true)
}

fn reject(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    filter(vm, &call, false)
}

fn find(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    for item in items(&call) {
        if yield_one(vm, &block, item.clone())?.is_truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Nil)
}

/// Truthiness of each element, or of the block's answer for it.
fn tests(vm: &mut Vm, call: &Call) -> Result<Vec<bool>, Unwind> {
    let items = items(call);
    match &call.block {
        None => Ok(items.iter().map(Value::is_truthy).collect()),
        Some(block) => items
            .into_iter()
            .map(|item| yield_one(vm, block, item).map(|answer| answer.is_truthy()))
            .collect(),
    }
}

fn any(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(tests(vm, &call)?.into_iter().any(|t| t)))
}

fn all(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(tests(vm, &call)?.into_iter().all(|t| t)))
}

fn count(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let count = match call.block {
        None => items(&call).len(),
        Some(_) => tests(vm, &call)?.into_iter().filter(|t| *t).count(),
    };
    Ok(Value::Integer(count as i64))
}

/// `inject(init) { }`, `inject { }`, `inject(:op)` or `inject(init, :op)`.
fn inject(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut items = items(&call).into_iter();
    let (initial, operator) = match (call.args.first(), call.args.get(1)) {
        (Some(init), Some(Value::Symbol(op))) => (Some(init.clone()), Some(op.clone())),
        (Some(Value::Symbol(op)), None) if call.block.is_none() => (None, Some(op.clone())),
        (init, None) => (init.cloned(), None),
        (_, Some(other)) => return Err(vm.error(
            ErrorKind::Type,
            format!("{} is not a symbol nor a string", other.describe()),
        )),
    };
    let Some(mut acc) = initial.or_else(|| items.next()) else {
        return Ok(Value::Nil);
    };
    match operator {
        Some(op) => {
            for item in items {
                acc = vm.send(acc, &op, vec![item], None)?;
            }
        }
        None => {
            let block = require_block(vm, &call)?;
            for item in items {
                acc = yield_many(vm, &block, vec![acc, item])?;
            }
        }
    }
    Ok(acc)
}

fn sum(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut total = Value::Integer(0);
    for item in items(&call) {
        let item = match &call.block {
            Some(block) => yield_one(vm, block, item)?,
            None => item,
        };
        total = vm.send(total, "+", vec![item], None)?;
    }
    Ok(total)
}

fn include(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let needle = arg(&call, 0);
    for item in items(&call) {
        if equal(vm, &item, &needle)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn position(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let needle = arg(&call, 0);
    for (i, item) in items(&call).iter().enumerate() {
        if equal(vm, item, &needle)? {
            return Ok(Value::Integer(i as i64));
        }
    }
    Ok(Value::Nil)
}

fn join_into(vm: &mut Vm, items: &[Value], separator: &str, out: &mut String) -> Result<(), Unwind> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        match item {
            Value::Array(nested) => {
                let nested = nested.lock().clone();
                join_into(vm, &nested, separator, out)?;
            }
            other => out.push_str(&to_s(vm, other)?),
        }
    }
    Ok(())
}

fn join(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let separator = match call.args.first() {
        None | Some(Value::Nil) => String::new(),
        Some(Value::String(s)) => s.lock().clone(),
        Some(other) => return Err(conversion_error(vm, other, "String")),
    };
    let mut out = String::new();
    join_into(vm, &items(&call), &separator, &mut out)?;
    Ok(Value::string(out))
}

fn concat(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let Value::Array(other) = arg(&call, 0) else {
        return Err(conversion_error(vm, &arg(&call, 0), "Array"));
    };
    let mut out = items(&call);
    out.extend(other.lock().iter().cloned());
    Ok(Value::array(out))
}

fn array_eq(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(equal(vm, &call.receiver, &arg(&call, 0))?))
}

fn reverse(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(items(&call).into_iter().rev().collect()))
}

/// Ordering by `<=>`; anything but -1, 0 or 1 is a failed comparison.
fn compare(vm: &mut Vm, a: &Value, b: &Value) -> Result<Ordering, Unwind> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => return Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => {
            let x = x.lock().clone();
            return Ok(x.as_str().cmp(y.lock().as_str()));
        }
        _ => {}
    }
    match vm.send(a.clone(), "<=>", vec![b.clone()], None)? {
        Value::Integer(n) => Ok(n.cmp(&0)),
        _ => Err(vm.error(
            ErrorKind::Argument,
            format!("comparison of {} with {} failed", type_name(a), type_name(b)),
        )),
    }
}

fn sorted(vm: &mut Vm, mut items: Vec<Value>) -> Result<Vec<Value>, Unwind> {
    let mut failure = None;
    items.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        compare(vm, a, b).unwrap_or_else(|unwind| {
            failure = Some(unwind);
            Ordering::Equal
        })
    });
    match failure {
        Some(unwind) => Err(unwind),
        None => Ok(items),
    }
}

fn sort(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(sorted(vm, items(&call))?))
}

fn extreme(vm: &mut Vm, call: &Call, wanted: Ordering) -> Result<Value, Unwind> {
    let mut best: Option<Value> = None;
    for item in items(call) {
        best = match best {
            Some(current) if compare(vm, &item, &current)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.unwrap_or_default())
}

fn min(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    extreme(vm, &call, Ordering::Less)
}

fn max(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    extreme(vm, &call, Ordering::Greater)
}

fn uniq(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out: Vec<Value> = Vec::new();
    for item in items(&call) {
        if !out.iter().any(|seen| seen.eql(&item)) {
            out.push(item);
        }
    }
    Ok(Value::array(out))
}

fn compact(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(items(&call).into_iter().filter(|item| !item.is_nil()).collect()))
}

fn flatten_into(items: Vec<Value>, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(nested) => {
                let nested = nested.lock().clone();
                flatten_into(nested, out);
            }
            other => out.push(other),
        }
    }
}

fn flatten(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = Vec::new();
    flatten_into(items(&call), &mut out);
    Ok(Value::array(out))
}

fn to_a(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn dup(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(items(&call)))
}

fn array_inspect(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = String::from("[");
    for (i, item) in items(&call).iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&inspect(vm, item)?);
    }
    out.push(']');
    Ok(Value::string(out))
}

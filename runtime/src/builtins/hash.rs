use vm::{Call, ErrorKind, HashTable, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{Builtin, arg, conversion_error, equal, inspect, require_block, yield_many, yield_one};

pub static HASH: &[Builtin] = &[
    Builtin::new("[]", 1, index),
    Builtin::new("[]=", 2, store),
    Builtin::new("store", 2, store),
    Builtin::new("fetch", -2, fetch),
    Builtin::new("key?", 1, has_key),
    Builtin::new("has_key?", 1, has_key),
    Builtin::new("include?", 1, has_key),
    Builtin::new("delete", 1, delete),
    Builtin::new("keys", 0, keys),
    Builtin::new("values", 0, values),
    Builtin::new("size", 0, size),
    Builtin::new("length", 0, size),
    Builtin::new("empty?", 0, is_empty),
    Builtin::new("each", 0, each),
    Builtin::new("each_pair", 0, each),
    Builtin::new("map", 0, map),
    Builtin::new("select", 0, select),
    Builtin::new("merge", 1, merge),
    Builtin::new("to_a", 0, to_a),
    Builtin::new("to_h", 0, to_h),
    Builtin::new("==", 1, hash_eq),
    Builtin::new("inspect", 0, hash_inspect),
    Builtin::new("to_s", 0, hash_inspect),
];

fn table(call: &Call) -> HashTable {
    match &call.receiver {
        Value::Hash(table) => table.lock().clone(),
        _ => HashTable::new(),
    }
}

fn pairs(call: &Call) -> Vec<(Value, Value)> {
    table(call).iter().cloned().collect()
}

fn pair(key: Value, value: Value) -> Value {
    Value::array(vec![key, value])
}

fn index(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let key = arg(&call, 0);
    Ok(table(&call).get(&key).cloned().unwrap_or_default())
}

/// String keys are copied so later mutation of the original does not
/// move the entry.
fn store(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let key = match arg(&call, 0) {
        Value::String(s) => {
            let copy = s.lock().clone();
            Value::string(copy)
        }
        other => other,
    };
    let value = arg(&call, 1);
    if let Value::Hash(table) = &call.receiver {
        table.lock().insert(key, value.clone());
    }
    Ok(value)
}

/// `fetch(key)`, `fetch(key, default)` or `fetch(key) { |key| }`.
fn fetch(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let key = arg(&call, 0);
    if let Some(value) = table(&call).get(&key) {
        return Ok(value.clone());
    }
    if let Some(block) = &call.block {
        return yield_one(vm, block, key);
    }
    if let Some(default) = call.args.get(1) {
        return Ok(default.clone());
    }
    let shown = inspect(vm, &key)?;
    Err(vm.error(ErrorKind::Key, format!("key not found: {shown}")))
}

fn has_key(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(table(&call).contains_key(&arg(&call, 0))))
}

fn delete(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let key = arg(&call, 0);
    let removed = match &call.receiver {
        Value::Hash(table) => table.lock().remove(&key),
        _ => None,
    };
    Ok(removed.unwrap_or_default())
}

fn keys(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(table(&call).keys().cloned().collect()))
}

fn values(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(table(&call).values().cloned().collect()))
}

fn size(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(table(&call).len() as i64))
}

fn is_empty(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(table(&call).is_empty()))
}

/// Yields one `[key, value]` pair; two-parameter blocks destructure it.
fn each(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    for (key, value) in pairs(&call) {
        yield_one(vm, &block, pair(key, value))?;
    }
    Ok(call.receiver)
}

fn map(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let mut out = Vec::new();
    for (key, value) in pairs(&call) {
        out.push(yield_one(vm, &block, pair(key, value))?);
    }
    Ok(Value::array(out))
}

fn select(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let mut out = HashTable::new();
    for (key, value) in pairs(&call) {
        if yield_many(vm, &block, vec![key.clone(), value.clone()])?.is_truthy() {
            out.insert(key, value);
        }
    }
    Ok(Value::hash(out))
}

/// A new hash; with a block, the block settles duplicate keys.
fn merge(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let Value::Hash(other) = arg(&call, 0) else {
        return Err(conversion_error(vm, &arg(&call, 0), "Hash"));
    };
    let other = other.lock().clone();
    let mut out = table(&call);
    for (key, value) in other.iter() {
        let merged = match (out.get(key).cloned(), &call.block) {
            (Some(old), Some(block)) => yield_many(vm, block, vec![key.clone(), old, value.clone()])?,
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Ok(Value::hash(out))
}

fn to_a(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(pairs(&call).into_iter().map(|(key, value)| pair(key, value)).collect()))
}

fn to_h(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn hash_eq(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(equal(vm, &call.receiver, &arg(&call, 0))?))
}

/// `{:a => 1, "b" => 2}`.
fn hash_inspect(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = String::from("{");
    for (i, (key, value)) in pairs(&call).iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&inspect(vm, key)?);
        out.push_str(" => ");
        out.push_str(&inspect(vm, value)?);
    }
    out.push('}');
    Ok(Value::string(out))
}

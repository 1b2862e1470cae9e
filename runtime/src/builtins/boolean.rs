use vm::{Call, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{Builtin, arg};

pub static NIL: &[Builtin] = &[
    Builtin::new("to_s", 0, nil_to_s),
    Builtin::new("to_a", 0, nil_to_a),
    Builtin::new("to_i", 0, nil_to_i),
    Builtin::new("inspect", 0, nil_inspect),
    Builtin::new("&", 1, and),
    Builtin::new("|", 1, or),
];

pub static TRUE: &[Builtin] = &[
    Builtin::new("to_s", 0, bool_to_s),
    Builtin::new("inspect", 0, bool_to_s),
    Builtin::new("&", 1, and),
    Builtin::new("|", 1, or),
    Builtin::new("^", 1, xor),
];

pub static FALSE: &[Builtin] = &[
    Builtin::new("to_s", 0, bool_to_s),
    Builtin::new("inspect", 0, bool_to_s),
    Builtin::new("&", 1, and),
    Builtin::new("|", 1, or),
    Builtin::new("^", 1, xor),
];

fn nil_to_s(_rt: &Runtime, _vm: &mut Vm, _call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(""))
}

fn nil_to_a(_rt: &Runtime, _vm: &mut Vm, _call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(Vec::new()))
}

fn nil_to_i(_rt: &Runtime, _vm: &mut Vm, _call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(0))
}

fn nil_inspect(_rt: &Runtime, _vm: &mut Vm, _call: Call) -> Result<Value, Unwind> {
    Ok(Value::string("nil"))
}

fn bool_to_s(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(call.receiver.is_truthy().to_string()))
}

// Both operands are always evaluated, unlike `&&` and `||`.
fn and(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.is_truthy() && arg(&call, 0).is_truthy()))
}

fn or(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.is_truthy() || arg(&call, 0).is_truthy()))
}

fn xor(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.is_truthy() != arg(&call, 0).is_truthy()))
}

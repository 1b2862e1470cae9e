//! `Proc` and `Fiber`.

use std::sync::Arc;

use vm::{Args, Call, ErrorKind, Fiber, Proc, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{Builtin, forwarded, require_block};

pub static PROC: &[Builtin] = &[
    Builtin::new("call", -1, proc_call),
    Builtin::new("()", -1, proc_call),
    Builtin::new("yield", -1, proc_call),
    Builtin::new("[]", -1, proc_call),
    Builtin::new("===", 1, proc_call),
    Builtin::new("arity", 0, arity),
    Builtin::new("lambda?", 0, is_lambda),
    Builtin::new("to_proc", 0, to_proc),
    Builtin::new("inspect", 0, proc_inspect),
    Builtin::new("to_s", 0, proc_inspect),
];

/// Singleton methods of `Fiber`.
pub static FIBER_CLASS: &[Builtin] = &[
    Builtin::new("new", 0, fiber_new),
    Builtin::new("yield", -1, fiber_yield),
];

pub static FIBER: &[Builtin] = &[
    Builtin::new("resume", -1, fiber_resume),
    Builtin::new("alive?", 0, fiber_alive),
];

fn receiver_proc(vm: &Vm, call: &Call) -> Result<Arc<Proc>, Unwind> {
    call.receiver
        .as_proc()
        .cloned()
        .ok_or_else(|| vm.error(ErrorKind::Type, "not a proc"))
}

fn proc_call(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = receiver_proc(vm, &call)?;
    let (positional, kwargs) = forwarded(call.args, &call.kwargs);
    vm.call_block(&block, Args { positional, kwargs, block: call.block })
}

fn arity(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(receiver_proc(vm, &call)?.arity()))
}

fn is_lambda(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(receiver_proc(vm, &call)?.is_lambda()))
}

fn to_proc(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn proc_inspect(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let text = match &*receiver_proc(vm, &call)? {
        Proc::Closure(closure) if closure.lambda => "#<Proc (lambda)>".to_string(),
        Proc::Closure(_) => "#<Proc>".to_string(),
        Proc::Symbol(name) => format!("#<Proc(&:{name}) (lambda)>"),
    };
    Ok(Value::string(text))
}

fn fiber_new(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    Ok(Value::object(Fiber::new(block)))
}

/// `Fiber.yield(value)`: suspends the running fiber.
fn fiber_yield(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut args = call.args;
    let value = match args.len() {
        0 => Value::Nil,
        1 => args.pop().unwrap_or_default(),
        _ => Value::array(args),
    };
    vm.fiber_yield(value)
}

fn fiber_resume(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let Some(fiber) = call.receiver.downcast::<Fiber>() else {
        return Err(vm.error(ErrorKind::Type, "not a fiber"));
    };
    fiber.resume(vm, call.args.clone())
}

fn fiber_alive(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.downcast::<Fiber>().is_some_and(Fiber::is_alive)))
}


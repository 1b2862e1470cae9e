use std::sync::Arc;

use vm::{Args, Call, ErrorKind, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{
    Builtin, arg, equal, expect_name, forwarded, inspect, require_block, to_s, yield_one,
};
use crate::object::{Class, Instance};

/// Public methods every object has.
pub static OBJECT: &[Builtin] = &[
    Builtin::new("inspect", 0, object_inspect),
    Builtin::new("to_s", 0, object_to_s),
    Builtin::new("==", 1, object_eq),
    Builtin::new("!=", 1, object_ne),
    Builtin::new("!", 0, object_not),
    Builtin::new("equal?", 1, object_eq),
    Builtin::new("===", 1, object_case_eq),
    Builtin::new("nil?", 0, object_is_nil),
    Builtin::new("is_a?", 1, object_is_a),
    Builtin::new("kind_of?", 1, object_is_a),
    Builtin::new("instance_of?", 1, object_instance_of),
    Builtin::new("respond_to?", -2, object_respond_to),
    Builtin::new("send", -2, object_send),
    Builtin::new("__send__", -2, object_send),
    Builtin::new("class", 0, object_class),
    Builtin::new("instance_variable_get", 1, object_ivar_get),
    Builtin::new("instance_variable_set", 2, object_ivar_set),
    Builtin::new("instance_variables", 0, object_ivars),
    Builtin::new("tap", 0, object_tap),
];

/// Private helpers callable only without an explicit receiver.
pub static KERNEL: &[Builtin] = &[
    Builtin::new("puts", -1, kernel_puts),
    Builtin::new("print", -1, kernel_print),
    Builtin::new("p", -1, kernel_p),
    Builtin::new("raise", -1, kernel_raise),
    Builtin::new("loop", 0, kernel_loop),
    Builtin::new("proc", 0, kernel_proc),
    Builtin::new("lambda", 0, kernel_proc),
];

fn object_inspect(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let receiver = &call.receiver;
    let Some(instance) = receiver.downcast::<Instance>().filter(|_| !receiver.identical(rt.main()))
    else {
        return Ok(default_to_s(rt, receiver));
    };
    let mut text = format!("#<{}", instance.class.name);
    for (index, (name, value)) in instance.ivars().into_iter().enumerate() {
        text.push_str(if index == 0 { " " } else { ", " });
        text.push_str(&name);
        text.push('=');
        text.push_str(&inspect(vm, &value)?);
    }
    text.push('>');
    Ok(Value::string(text))
}

fn object_to_s(rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(default_to_s(rt, &call.receiver))
}

fn default_to_s(rt: &Runtime, receiver: &Value) -> Value {
    if receiver.identical(rt.main()) {
        return Value::string("main");
    }
    Value::string(format!("#<{}>", rt.class_of(receiver).name))
}

fn object_eq(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.identical(&arg(&call, 0))))
}

fn object_ne(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let other = arg(&call, 0);
    Ok(Value::Bool(!equal(vm, &call.receiver, &other)?))
}

fn object_not(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(!call.receiver.is_truthy()))
}

fn object_case_eq(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let other = arg(&call, 0);
    Ok(Value::Bool(equal(vm, &call.receiver, &other)?))
}

fn object_is_nil(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(call.receiver.is_nil()))
}

fn expect_class(vm: &Vm, value: &Value) -> Result<Arc<Class>, Unwind> {
    Class::from_value(value)
        .ok_or_else(|| vm.error(ErrorKind::Type, "class or module required"))
}

fn object_is_a(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = expect_class(vm, &arg(&call, 0))?;
    Ok(Value::Bool(rt.is_a(&call.receiver, &class)))
}

fn object_instance_of(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = expect_class(vm, &arg(&call, 0))?;
    Ok(Value::Bool(Arc::ptr_eq(&rt.class_of(&call.receiver), &class)))
}

fn object_respond_to(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let name = expect_name(vm, &arg(&call, 0))?;
    let include_private = arg(&call, 1).is_truthy();
    Ok(Value::Bool(rt.responds_to(&call.receiver, &name, include_private)))
}

/// `send` reaches private methods too.
fn object_send(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let (mut args, kwargs) = forwarded(call.args, &call.kwargs);
    if args.is_empty() {
        return Err(vm.error(ErrorKind::Argument, "no method name given"));
    }
    let name = expect_name(vm, &args.remove(0))?;
    let call = Call {
        receiver: call.receiver,
        message: name,
        args,
        kwargs,
        block: call.block,
        implicit_self: true,
    };
    let dispatch = Arc::clone(vm.dispatch());
    dispatch.dispatch(vm, call)
}

fn object_class(rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(rt.class_of(&call.receiver).value())
}

fn ivar_name(vm: &Vm, value: &Value) -> Result<String, Unwind> {
    let name = expect_name(vm, value)?;
    if !name.starts_with('@') || name.len() < 2 {
        return Err(vm.error(
            ErrorKind::Name,
            format!("'{name}' is not allowed as an instance variable name"),
        ));
    }
    Ok(name)
}

fn object_ivar_get(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let name = ivar_name(vm, &arg(&call, 0))?;
    vm::Dispatch::ivar_get(rt, vm, &call.receiver, &name)
}

fn object_ivar_set(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let name = ivar_name(vm, &arg(&call, 0))?;
    let value = arg(&call, 1);
    vm::Dispatch::ivar_set(rt, vm, &call.receiver, &name, value.clone())?;
    Ok(value)
}

fn object_ivars(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let names = match call.receiver.downcast::<Instance>() {
        Some(instance) => instance
            .ivars()
            .into_iter()
            .map(|(name, _)| Value::Symbol(vm.context().intern(&name)))
            .collect(),
        None => Vec::new(),
    };
    Ok(Value::array(names))
}

fn object_tap(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    yield_one(vm, &block, call.receiver.clone())?;
    Ok(call.receiver)
}

/// Lines `puts` would print for one argument.
fn puts_lines(vm: &mut Vm, value: &Value, out: &mut String) -> Result<(), Unwind> {
    match value {
        Value::Array(items) => {
            let items = items.lock().clone();
            for item in &items {
                puts_lines(vm, item, out)?;
            }
        }
        Value::Nil => out.push('\n'),
        other => {
            let text = to_s(vm, other)?;
            out.push_str(&text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn kernel_puts(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = String::new();
    if call.args.is_empty() {
        out.push('\n');
    }
    for value in &call.args {
        puts_lines(vm, value, &mut out)?;
    }
    rt.write(&out);
    Ok(Value::Nil)
}

fn kernel_print(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = String::new();
    for value in &call.args {
        out.push_str(&to_s(vm, value)?);
    }
    rt.write(&out);
    Ok(Value::Nil)
}

fn kernel_p(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut out = String::new();
    for value in &call.args {
        out.push_str(&inspect(vm, value)?);
        out.push('\n');
    }
    rt.write(&out);
    let mut args = call.args;
    Ok(match args.len() {
        0 => Value::Nil,
        1 => args.pop().unwrap_or_default(),
        _ => Value::array(args),
    })
}

/// `raise`, `raise "message"`, `raise Class`, `raise Class, "message"` or
/// `raise exception`.
fn kernel_raise(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let mut args = call.args.into_iter();
    let exception = match (args.next(), args.next()) {
        (None, _) => match vm.context().global("$!") {
            Value::Nil => rt.new_exception(rt.core().error_class(ErrorKind::Runtime), "unhandled exception"),
            current => current,
        },
        (Some(Value::String(message)), None) => {
            let message = message.lock().clone();
            rt.new_exception(rt.core().error_class(ErrorKind::Runtime), message)
        }
        (Some(target), message) => {
            if rt.is_exception(&target) && message.is_none() {
                target
            } else if Class::from_value(&target).is_some() {
                let args = message.into_iter().collect();
                vm.send(target, "new", args, None)?
            } else {
                return Err(vm.error(ErrorKind::Type, "exception class/object expected"));
            }
        }
    };
    if !rt.is_exception(&exception) {
        return Err(vm.error(ErrorKind::Type, "exception object expected"));
    }
    Err(vm.raise(exception))
}

/// Runs the block until it breaks; `StopIteration` ends the loop quietly.
fn kernel_loop(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = require_block(vm, &call)?;
    let stop = rt.core().error_class(ErrorKind::StopIteration);
    loop {
        match vm.call_block(&block, Args::default()) {
            Ok(_) => {}
            Err(Unwind::Raise(raised)) if rt.is_a(&raised.exception, &stop) => {
                return Ok(Value::Nil);
            }
            Err(unwind) => return Err(unwind),
        }
    }
}

fn kernel_proc(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let block = call
        .block
        .ok_or_else(|| vm.error(ErrorKind::Argument, "tried to create Proc object without a block"))?;
    Ok(Value::Proc(block))
}

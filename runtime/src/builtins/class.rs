use std::sync::Arc;

use vm::{Call, ErrorKind, HashTable, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::{Builtin, arg, expect_int, expect_name, forwarded, to_s};
use crate::object::{Class, Instance, Method, Visibility};

pub static MODULE: &[Builtin] = &[
    Builtin::new("new", -1, module_new),
    Builtin::new("allocate", 0, module_allocate),
    Builtin::new("name", 0, module_name),
    Builtin::new("to_s", 0, module_name),
    Builtin::new("inspect", 0, module_name),
    Builtin::new("superclass", 0, module_superclass),
    Builtin::new("===", 1, module_case_eq),
    Builtin::new("attr_reader", -1, module_attr_reader),
    Builtin::new("attr_writer", -1, module_attr_writer),
    Builtin::new("attr_accessor", -1, module_attr_accessor),
    Builtin::new("instance_methods", -1, module_instance_methods),
    Builtin::new("const_get", 1, module_const_get),
];

/// Singleton methods of `Exception` and its subclasses.
pub static EXCEPTION_CLASS: &[Builtin] = &[Builtin::new("exception", -1, exception_new)];

pub static EXCEPTION: &[Builtin] = &[
    Builtin::new("message", 0, exception_message),
    Builtin::new("to_s", 0, exception_message),
    Builtin::new("backtrace", 0, exception_backtrace),
    Builtin::new("inspect", 0, exception_inspect),
];

pub static EXCEPTION_PRIVATE: &[Builtin] = &[Builtin::new("initialize", -1, exception_initialize)];

fn receiver_class(vm: &Vm, call: &Call) -> Result<Arc<Class>, Unwind> {
    Class::from_value(&call.receiver)
        .ok_or_else(|| vm.error(ErrorKind::Type, format!("{} is not a class", call.receiver.describe())))
}

/// `Class#new`: allocate, then run the private `initialize`. The core
/// value classes build their native representation instead.
fn module_new(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = receiver_class(vm, &call)?;
    let core = rt.core();
    if class.is_module {
        return Err(vm.error(
            ErrorKind::NoMethod,
            format!("undefined method 'new' for module {}", class.name),
        ));
    }
    if Arc::ptr_eq(&class, &core.array) {
        let size = match call.args.first() {
            Some(size) => expect_int(vm, size)?,
            None => 0,
        };
        let size = usize::try_from(size).map_err(|_| vm.error(ErrorKind::Argument, "negative array size"))?;
        return Ok(Value::array(vec![arg(&call, 1); size]));
    }
    if Arc::ptr_eq(&class, &core.hash) {
        return Ok(Value::hash(HashTable::new()));
    }
    if Arc::ptr_eq(&class, &core.string) {
        return Ok(Value::string(match call.args.first() {
            Some(value) => to_s(vm, value)?,
            None => String::new(),
        }));
    }
    if Arc::ptr_eq(&class, &core.proc) {
        return call
            .block
            .map(Value::Proc)
            .ok_or_else(|| vm.error(ErrorKind::Argument, "tried to create Proc object without a block"));
    }
    let native = [
        &core.integer,
        &core.float,
        &core.symbol,
        &core.nil,
        &core.true_,
        &core.false_,
        &core.class,
        &core.module,
        &core.fiber,
    ];
    if native.iter().any(|native| Arc::ptr_eq(&class, native)) {
        return Err(vm.error(
            ErrorKind::NoMethod,
            format!("undefined method 'new' for class {}", class.name),
        ));
    }

    let instance = Value::object(Instance::new(class));
    let (args, kwargs) = forwarded(call.args, &call.kwargs);
    let initialize = Call {
        receiver: instance.clone(),
        message: "initialize".into(),
        args,
        kwargs,
        block: call.block,
        implicit_self: true,
    };
    let dispatch = Arc::clone(vm.dispatch());
    dispatch.dispatch(vm, initialize)?;
    Ok(instance)
}

fn module_allocate(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = receiver_class(vm, &call)?;
    Ok(Value::object(Instance::new(class)))
}

fn module_name(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(receiver_class(vm, &call)?.name.as_str()))
}

fn module_superclass(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = receiver_class(vm, &call)?;
    Ok(class.superclass.as_ref().map_or(Value::Nil, Class::value))
}

fn module_case_eq(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = receiver_class(vm, &call)?;
    Ok(Value::Bool(rt.is_a(&arg(&call, 0), &class)))
}

fn attr_names(vm: &Vm, call: &Call) -> Result<Vec<String>, Unwind> {
    call.args.iter().map(|name| expect_name(vm, name)).collect()
}

fn define_accessors(vm: &mut Vm, call: &Call, reader: bool, writer: bool) -> Result<Value, Unwind> {
    let class = receiver_class(vm, call)?;
    let mut defined = Vec::new();
    for name in attr_names(vm, call)? {
        let ivar = format!("@{name}");
        if reader {
            class.define(&name, Method::Reader(ivar.clone()), Visibility::Public);
            defined.push(Value::Symbol(vm.context().intern(&name)));
        }
        if writer {
            let setter = format!("{name}=");
            class.define(&setter, Method::Writer(ivar), Visibility::Public);
            defined.push(Value::Symbol(vm.context().intern(&setter)));
        }
    }
    Ok(Value::array(defined))
}

fn module_attr_reader(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    define_accessors(vm, &call, true, false)
}

fn module_attr_writer(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    define_accessors(vm, &call, false, true)
}

fn module_attr_accessor(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    define_accessors(vm, &call, true, true)
}

/// Public instance methods. With a false argument only the class's own;
/// otherwise inherited ones too, stopping short of `Object`.
fn module_instance_methods(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = receiver_class(vm, &call)?;
    let inherited = call.args.first().is_none_or(Value::is_truthy);
    let mut names: Vec<String> = Vec::new();
    for ancestor in class.ancestors() {
        if Arc::ptr_eq(&ancestor, &rt.core().object) {
            break;
        }
        for name in ancestor.method_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if !inherited {
            break;
        }
    }
    Ok(Value::array(names.iter().map(|name| Value::Symbol(vm.context().intern(name))).collect()))
}

fn module_const_get(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let name = expect_name(vm, &arg(&call, 0))?;
    vm::Dispatch::get_constant(rt, vm, &call.receiver, &name)
}

fn exception_new(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    vm.send(call.receiver, "new", call.args, call.block)
}

fn exception_initialize(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    if call.args.len() > 1 {
        return Err(vm.error(
            ErrorKind::Argument,
            format!("wrong number of arguments (given {}, expected 0..1)", call.args.len()),
        ));
    }
    vm::Dispatch::ivar_set(rt, vm, &call.receiver, "@message", arg(&call, 0))?;
    Ok(Value::Nil)
}

fn exception_message(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let message = match call.receiver.downcast::<Instance>() {
        Some(instance) => instance.ivar("@message"),
        None => Value::Nil,
    };
    match message {
        Value::Nil => Ok(Value::string(rt.class_of(&call.receiver).name.as_str())),
        other => Ok(Value::string(to_s(vm, &other)?)),
    }
}

fn exception_backtrace(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver.downcast::<Instance>().map_or(Value::Nil, |instance| instance.ivar("backtrace")))
}

fn exception_inspect(rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let class = rt.class_of(&call.receiver);
    let message = vm.send(call.receiver, "message", Vec::new(), None)?;
    let message = to_s(vm, &message)?;
    if message.is_empty() || message == class.name {
        return Ok(Value::string(class.name.as_str()));
    }
    Ok(Value::string(format!("#<{}: {message}>", class.name)))
}

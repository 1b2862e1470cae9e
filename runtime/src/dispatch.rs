use std::sync::Arc;

use log::debug;
use vm::{Call, Dispatch, ErrorKind, MethodBody, Unwind, Value, Vm};

use crate::Runtime;
use crate::object::{Class, Instance, Method, MethodEntry, Visibility};

impl Runtime {
    /// Find `name` for `receiver`: the singleton methods of a class
    /// receiver first, then the instance methods of its class.
    pub fn find_method(&self, receiver: &Value, name: &str) -> Option<(Arc<Class>, MethodEntry)> {
        if let Some(class) = Class::from_value(receiver) {
            if let Some(found) = class.find_singleton(name) {
                return Some(found);
            }
        }
        self.class_of(receiver).find_method(name)
    }

    pub fn responds_to(&self, receiver: &Value, name: &str, include_private: bool) -> bool {
        self.find_method(receiver, name)
            .is_some_and(|(_, entry)| include_private || entry.visibility == Visibility::Public)
    }

    /// How a receiver is named in `NoMethodError` messages.
    pub fn describe_receiver(&self, receiver: &Value) -> String {
        match receiver {
            Value::Nil => "nil".into(),
            Value::Bool(b) => b.to_string(),
            _ if receiver.identical(&self.main) => "main".into(),
            _ => match Class::from_value(receiver) {
                Some(class) if class.is_module => format!("module {}", class.name),
                Some(class) => format!("class {}", class.name),
                None => format!("an instance of {}", self.class_of(receiver).name),
            },
        }
    }

    fn invoke(
        &self,
        vm: &mut Vm,
        owner: Arc<Class>,
        entry: MethodEntry,
        mut call: Call,
    ) -> Result<Value, Unwind> {
        match entry.method {
            Method::Bytecode(body) => vm.invoke_method(&body, owner.value(), call),
            Method::Builtin(builtin) => {
                // Builtins see keywords as a trailing hash; `kwargs` stays
                // set so forwarding builtins can split it off again.
                if let Some(kwargs) = &call.kwargs {
                    call.args.push(kwargs.clone());
                }
                if !builtin.accepts(call.args.len()) {
                    return Err(arity_error(vm, call.args.len(), &builtin.arity_text()));
                }
                (builtin.func)(self, vm, call)
            }
            Method::Reader(ivar) => {
                if !call.args.is_empty() {
                    return Err(arity_error(vm, call.args.len(), "0"));
                }
                self.ivar_get(vm, &call.receiver, &ivar)
            }
            Method::Writer(ivar) => {
                let [value] = <[Value; 1]>::try_from(call.args)
                    .map_err(|args| arity_error(vm, args.len(), "1"))?;
                self.ivar_set(vm, &call.receiver, &ivar, value.clone())?;
                Ok(value)
            }
        }
    }

    fn method_missing(&self, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
        if let Some((owner, entry)) = self.find_method(&call.receiver, "method_missing") {
            let mut args = Vec::with_capacity(call.args.len() + 1);
            args.push(Value::Symbol(vm.context().intern(&call.message)));
            args.extend(call.args);
            let forwarded = Call { message: "method_missing".into(), args, implicit_self: true, ..call };
            return self.invoke(vm, owner, entry, forwarded);
        }
        let target = self.describe_receiver(&call.receiver);
        if call.implicit_self && call.args.is_empty() && call.block.is_none() {
            return Err(vm.error(
                ErrorKind::Name,
                format!("undefined local variable or method '{}' for {target}", call.message),
            ));
        }
        Err(vm.error(ErrorKind::NoMethod, format!("undefined method '{}' for {target}", call.message)))
    }

    /// The class a definition or constant reference lands in.
    fn scope_of(&self, definee: &Value) -> Arc<Class> {
        Class::from_value(definee).unwrap_or_else(|| Arc::clone(&self.core().object))
    }
}

fn arity_error(vm: &Vm, given: usize, expected: &str) -> Unwind {
    vm.error(
        ErrorKind::Argument,
        format!("wrong number of arguments (given {given}, expected {expected})"),
    )
}

impl Dispatch for Runtime {
    fn dispatch(&self, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
        match self.find_method(&call.receiver, &call.message) {
            Some((_, entry)) if entry.visibility == Visibility::Private && !call.implicit_self => {
                let target = self.describe_receiver(&call.receiver);
                Err(vm.error(
                    ErrorKind::NoMethod,
                    format!("private method '{}' called for {target}", call.message),
                ))
            }
            Some((owner, entry)) => self.invoke(vm, owner, entry, call),
            None => self.method_missing(vm, call),
        }
    }

    fn define_method(
        &self,
        _vm: &mut Vm,
        definee: &Value,
        method: Arc<MethodBody>,
    ) -> Result<(), Unwind> {
        let class = self.scope_of(definee);
        let visibility = if definee.is_nil() || method.name == "initialize" {
            Visibility::Private
        } else {
            Visibility::Public
        };
        debug!("defining {}#{} ({visibility:?})", class.name, method.name);
        let name = method.name.clone();
        class.define(&name, Method::Bytecode(method), visibility);
        Ok(())
    }

    fn open_class(
        &self,
        vm: &mut Vm,
        definee: &Value,
        name: &str,
        superclass: Option<Value>,
        module: bool,
    ) -> Result<Value, Unwind> {
        let scope = self.scope_of(definee);
        let superclass = match superclass {
            None => None,
            Some(value) => match Class::from_value(&value) {
                Some(class) if !class.is_module => Some(class),
                _ => {
                    return Err(vm.error(
                        ErrorKind::Type,
                        format!("superclass must be a Class ({} given)", self.describe_receiver(&value)),
                    ));
                }
            },
        };
        if let Some(existing) = scope.constant(name) {
            let Some(class) = Class::from_value(&existing) else {
                let kind = if module { "module" } else { "class" };
                return Err(vm.error(ErrorKind::Type, format!("{name} is not a {kind}")));
            };
            if class.is_module != module {
                let kind = if module { "module" } else { "class" };
                return Err(vm.error(ErrorKind::Type, format!("{name} is not a {kind}")));
            }
            if let Some(requested) = &superclass {
                let same = class.superclass.as_ref().is_some_and(|current| Arc::ptr_eq(current, requested));
                if !same {
                    return Err(vm.error(ErrorKind::Type, format!("superclass mismatch for class {name}")));
                }
            }
            return Ok(existing);
        }
        let qualified = if Arc::ptr_eq(&scope, &self.core().object) {
            name.to_string()
        } else {
            format!("{}::{name}", scope.name)
        };
        let superclass = match (module, superclass) {
            (true, _) => None,
            (false, Some(class)) => Some(class),
            (false, None) => Some(Arc::clone(&self.core().object)),
        };
        debug!("opening new {} {qualified}", if module { "module" } else { "class" });
        let class = Class::new(qualified, superclass, module, Some(Arc::clone(&scope)));
        scope.set_constant(name, class.value());
        Ok(class.value())
    }

    fn get_constant(&self, vm: &mut Vm, definee: &Value, name: &str) -> Result<Value, Unwind> {
        let scope = self.scope_of(definee);
        let lexical = std::iter::successors(Some(Arc::clone(&scope)), |class| class.lexical_parent.clone());
        lexical
            .chain(scope.ancestors())
            .chain(std::iter::once(Arc::clone(&self.core().object)))
            .find_map(|class| class.constant(name))
            .ok_or_else(|| vm.error(ErrorKind::Name, format!("uninitialized constant {name}")))
    }

    fn set_constant(
        &self,
        _vm: &mut Vm,
        definee: &Value,
        name: &str,
        value: Value,
    ) -> Result<(), Unwind> {
        self.scope_of(definee).set_constant(name, value);
        Ok(())
    }

    fn ivar_get(&self, _vm: &mut Vm, object: &Value, name: &str) -> Result<Value, Unwind> {
        if let Some(instance) = object.downcast::<Instance>() {
            return Ok(instance.ivar(name));
        }
        if let Some(class) = object.downcast::<Class>() {
            return Ok(class.ivar(name));
        }
        Ok(Value::Nil)
    }

    fn ivar_set(&self, vm: &mut Vm, object: &Value, name: &str, value: Value) -> Result<(), Unwind> {
        if let Some(instance) = object.downcast::<Instance>() {
            instance.set_ivar(name, value);
            return Ok(());
        }
        if let Some(class) = object.downcast::<Class>() {
            class.set_ivar(name, value);
            return Ok(());
        }
        Err(vm.error(
            ErrorKind::Runtime,
            format!("can't modify frozen {}", self.class_of(object).name),
        ))
    }

    fn new_error(&self, kind: ErrorKind, message: String) -> Value {
        self.new_exception(self.core().error_class(kind), message)
    }

    fn record_backtrace(&self, exception: &Value, backtrace: &[String]) {
        if let Some(instance) = exception.downcast::<Instance>() {
            if !instance.has_ivar("backtrace") {
                let lines = backtrace.iter().map(|line| Value::string(line.as_str())).collect();
                instance.set_ivar("backtrace", Value::array(lines));
            }
        }
    }

    fn main_object(&self) -> Value {
        self.main().clone()
    }
}

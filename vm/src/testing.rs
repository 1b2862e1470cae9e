//! A minimal object model for exercising the interpreter directly.

use std::collections::HashMap;
use std::sync::Arc;

use bytecode::{Builder, SourceMap};
use parking_lot::{Mutex, RwLock};

use crate::bind::Args;
use crate::context::Context;
use crate::dispatch::{Call, Dispatch, ErrorKind};
use crate::fiber::Fiber;
use crate::interpreter::{Vm, VmConfig};
use crate::unwind::{Unwind, VmError};
use crate::value::{MethodBody, Unit, Value};

/// Methods live in one global table; builtins cover what the tests call.
#[derive(Default)]
pub struct Stub {
    methods: RwLock<HashMap<String, Arc<MethodBody>>>,
    log: Mutex<Vec<String>>,
}

impl Dispatch for Stub {
    fn dispatch(&self, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
        let user = self.methods.read().get(&call.message).cloned();
        if let Some(method) = user {
            return vm.invoke_method(&method, Value::Nil, call);
        }
        let first = call.args.first().cloned().unwrap_or_default();
        match (call.message.as_str(), &call.receiver) {
            ("+", Value::Integer(a)) => Ok(Value::Integer(a + first.as_int().unwrap_or(0))),
            ("-", Value::Integer(a)) => Ok(Value::Integer(a - first.as_int().unwrap_or(0))),
            ("<", Value::Integer(a)) => Ok(Value::Bool(Some(*a) < first.as_int())),
            ("==", receiver) => Ok(Value::Bool(receiver.eql(&first))),
            ("to_s", receiver) => Ok(Value::string(render(receiver))),
            ("===", Value::Symbol(name)) => {
                let text = render(&first);
                Ok(Value::Bool(&**name == "StandardError" || text.trim_matches('"').starts_with(&**name)))
            }
            ("call", Value::Proc(block)) => {
                let block = Arc::clone(block);
                vm.call_block(&block, Args { positional: call.args, kwargs: call.kwargs, block: call.block })
            }
            ("each", Value::Array(items)) => {
                let items = items.lock().clone();
                let Some(block) = call.block else {
                    return Err(vm.error(ErrorKind::LocalJump, "no block given"));
                };
                for item in items {
                    vm.call_block(&block, Args { positional: vec![item], ..Args::default() })?;
                }
                Ok(call.receiver)
            }
            ("proc" | "lambda", _) => match call.block {
                Some(block) => Ok(Value::Proc(block)),
                None => Err(vm.error(ErrorKind::Argument, "tried to create Proc object without a block")),
            },
            ("record", _) => {
                self.log.lock().push(render(&first));
                Ok(Value::Nil)
            }
            ("raise", _) => Err(vm.raise(first)),
            ("fiber", _) => match call.block {
                Some(block) => Ok(Value::object(Fiber::new(block))),
                None => Err(vm.error(ErrorKind::Argument, "tried to create Fiber object without a block")),
            },
            ("resume", Value::Object(_)) => match call.receiver.downcast::<Fiber>() {
                Some(fiber) => fiber.resume(vm, call.args),
                None => Err(vm.error(ErrorKind::NoMethod, "undefined method 'resume'")),
            },
            ("fiber_yield", _) => {
                let value = match call.args.len() {
                    0 => Value::Nil,
                    1 => first,
                    _ => Value::array(call.args),
                };
                vm.fiber_yield(value)
            }
            (message, receiver) => Err(vm.error(
                ErrorKind::NoMethod,
                format!("undefined method '{message}' for {}", render(receiver)),
            )),
        }
    }

    fn define_method(&self, _vm: &mut Vm, _definee: &Value, method: Arc<MethodBody>) -> Result<(), Unwind> {
        self.methods.write().insert(method.name.clone(), method);
        Ok(())
    }

    fn open_class(
        &self,
        _vm: &mut Vm,
        _definee: &Value,
        name: &str,
        _superclass: Option<Value>,
        _module: bool,
    ) -> Result<Value, Unwind> {
        Ok(Value::symbol(name))
    }

    fn get_constant(&self, _vm: &mut Vm, _definee: &Value, name: &str) -> Result<Value, Unwind> {
        Ok(Value::symbol(name))
    }

    fn set_constant(&self, _vm: &mut Vm, _definee: &Value, _name: &str, _value: Value) -> Result<(), Unwind> {
        Ok(())
    }

    fn ivar_get(&self, _vm: &mut Vm, _object: &Value, _name: &str) -> Result<Value, Unwind> {
        Ok(Value::Nil)
    }

    fn ivar_set(&self, _vm: &mut Vm, _object: &Value, _name: &str, _value: Value) -> Result<(), Unwind> {
        Ok(())
    }

    fn new_error(&self, kind: ErrorKind, message: String) -> Value {
        Value::string(format!("{}: {message}", kind.class_name()))
    }

    fn main_object(&self) -> Value {
        Value::symbol("main")
    }
}

pub struct Harness {
    stub: Arc<Stub>,
    context: Arc<Context>,
    config: VmConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self { stub: Arc::new(Stub::default()), context: Arc::new(Context::new()), config }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn log(&self) -> Vec<String> {
        self.stub.log.lock().clone()
    }

    pub fn eval(&self, src: &str) -> Result<Value, VmError> {
        self.eval_with(src, |_| {})
    }

    pub fn eval_with(&self, src: &str, prepare: impl FnOnce(&Vm)) -> Result<Value, VmError> {
        let node = compiler::parse(src).unwrap();
        let program = compiler::compile(&node).unwrap();
        let mut vm = self.vm();
        prepare(&vm);
        let unit = Arc::new(Unit::new("test", program.code, program.source_map));
        vm.run(unit, Value::symbol("main"))
    }

    pub fn run_code(&self, code: Builder) -> Result<Value, VmError> {
        let (code, map) = code.into_parts();
        self.run_bytes(code, map)
    }

    pub fn run_bytes(&self, code: Vec<u8>, map: SourceMap) -> Result<Value, VmError> {
        let unit = Arc::new(Unit::new("test", code, map));
        self.vm().run(unit, Value::symbol("main"))
    }

    /// The message of an uncaught exception.
    pub fn uncaught(&self, err: VmError) -> String {
        match err {
            VmError::Uncaught(raised) => render(&raised.exception).trim_matches('"').to_string(),
            VmError::Fault(fault) => panic!("expected an exception, got fault: {fault}"),
        }
    }

    fn vm(&self) -> Vm {
        let dispatch: Arc<dyn Dispatch> = self.stub.clone();
        Vm::new(dispatch, Arc::clone(&self.context), self.config.clone())
    }
}

/// Inspect-style rendering: strings quoted, symbols with a colon.
pub fn render(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items = items.lock().clone();
            let parts: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.describe(),
    }
}

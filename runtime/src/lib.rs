//! Reference object model and kernel for the interpreter.
//!
//! [`Runtime`] implements [`vm::Dispatch`]: classes with single
//! inheritance, modules as namespaces, instance variables, visibility and
//! `method_missing`, plus the native methods in [`builtins`].

pub mod bootstrap;
pub mod builtins;
mod dispatch;
mod error;
pub mod object;
mod output;

use std::sync::Arc;

use compiler::Program;
use log::debug;
use parking_lot::Mutex;
use vm::{Context, ErrorKind, Fiber, Raised, Unit, Value, Vm, VmConfig, VmError};

use crate::bootstrap::Core;
use crate::object::{Class, Instance};

pub use error::RunError;
pub use output::Output;

pub struct Runtime {
    core: Core,
    main: Value,
    context: Arc<Context>,
    output: Mutex<Output>,
}

impl Runtime {
    /// A runtime printing to standard output.
    pub fn new() -> Arc<Runtime> {
        Self::with_output(Output::Stdout)
    }

    /// A runtime collecting output for [`take_output`](Runtime::take_output).
    pub fn captured() -> Arc<Runtime> {
        Self::with_output(Output::Captured(String::new()))
    }

    fn with_output(output: Output) -> Arc<Runtime> {
        let core = Core::bootstrap();
        let main = Value::object(Instance::new(Arc::clone(&core.object)));
        Arc::new(Runtime { core, main, context: Arc::new(Context::new()), output: Mutex::new(output) })
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn main(&self) -> &Value {
        &self.main
    }

    /// A VM bound to this runtime. Several may run concurrently.
    pub fn vm(self: &Arc<Self>, config: VmConfig) -> Vm {
        Vm::new(Arc::clone(self) as Arc<dyn vm::Dispatch>, Arc::clone(&self.context), config)
    }

    pub fn run(self: &Arc<Self>, unit: Arc<Unit>, config: VmConfig) -> Result<Value, VmError> {
        self.vm(config).run(unit, self.main.clone())
    }

    /// Parse, compile and run s-expression source.
    pub fn eval(self: &Arc<Self>, name: &str, source: &str, config: VmConfig) -> Result<Value, RunError> {
        let program = compile_source(source)?;
        let unit = Arc::new(Unit::new(name, program.code, program.source_map));
        Ok(self.run(unit, config)?)
    }

    pub fn write(&self, text: &str) {
        self.output.lock().write(text);
    }

    pub fn take_output(&self) -> String {
        self.output.lock().take()
    }

    pub fn class_of(&self, value: &Value) -> Arc<Class> {
        let core = &self.core;
        let class = match value {
            Value::Nil | Value::Undefined => &core.nil,
            Value::Bool(true) => &core.true_,
            Value::Bool(false) => &core.false_,
            Value::Integer(_) => &core.integer,
            Value::Float(_) => &core.float,
            Value::Symbol(_) => &core.symbol,
            Value::String(_) => &core.string,
            Value::Array(_) => &core.array,
            Value::Hash(_) => &core.hash,
            Value::Proc(_) => &core.proc,
            Value::Object(_) => {
                if let Some(instance) = value.downcast::<Instance>() {
                    return Arc::clone(&instance.class);
                }
                if let Some(class) = value.downcast::<Class>() {
                    return Arc::clone(if class.is_module { &core.module } else { &core.class });
                }
                if value.downcast::<Fiber>().is_some() { &core.fiber } else { &core.object }
            }
        };
        Arc::clone(class)
    }

    pub fn is_a(&self, value: &Value, class: &Arc<Class>) -> bool {
        self.class_of(value).inherits_from(class)
    }

    /// A fresh exception of `class` carrying `message`.
    pub fn new_exception(&self, class: Arc<Class>, message: impl Into<String>) -> Value {
        let instance = Instance::new(class);
        instance.set_ivar("@message", Value::string(message));
        Value::object(instance)
    }

    pub fn is_exception(&self, value: &Value) -> bool {
        self.is_a(value, &self.core.exception)
    }

    /// The message of an exception value; the class name when unset.
    pub fn exception_message(&self, exception: &Value) -> String {
        match exception.downcast::<Instance>() {
            Some(instance) => match instance.ivar("@message") {
                Value::String(s) => s.lock().clone(),
                Value::Nil => instance.class.name.clone(),
                other => other.describe(),
            },
            None => exception.describe(),
        }
    }

    /// `message (Class)` followed by one `from` line per frame.
    pub fn describe_uncaught(&self, raised: &Raised) -> String {
        let class = self.class_of(&raised.exception);
        let mut text = format!("{} ({})", self.exception_message(&raised.exception), class.name);
        for frame in &raised.backtrace {
            text.push_str("\n\tfrom ");
            text.push_str(frame);
        }
        text
    }

    /// An `Interrupt` exception for [`vm::InterruptHandle::raise`].
    pub fn interrupt(&self) -> Value {
        Value::object(Instance::new(self.core.error_class(ErrorKind::Interrupt)))
    }
}

pub fn compile_source(source: &str) -> Result<Program, RunError> {
    let node = compiler::parse(source)?;
    let program = compiler::compile(&node)?;
    debug!("compiled {} bytes of bytecode", program.code.len());
    Ok(program)
}

#[cfg(test)]
mod tests;

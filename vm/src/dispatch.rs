use std::sync::Arc;

use crate::interpreter::Vm;
use crate::unwind::Unwind;
use crate::value::{MethodBody, Proc, Value};

/// One dynamic call as issued by `send`.
#[derive(Debug, Clone)]
pub struct Call {
    pub receiver: Value,
    pub message: String,
    pub args: Vec<Value>,
    /// Trailing keyword arguments, always a hash.
    pub kwargs: Option<Value>,
    pub block: Option<Arc<Proc>>,
    /// Private methods are only reachable through implicit-self calls.
    pub implicit_self: bool,
}

impl Call {
    pub fn new(receiver: Value, message: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            receiver,
            message: message.into(),
            args,
            kwargs: None,
            block: None,
            implicit_self: false,
        }
    }

    pub fn with_block(mut self, block: Option<Arc<Proc>>) -> Self {
        self.block = block;
        self
    }
}

/// Guest error classes the interpreter raises by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Standard,
    Runtime,
    Argument,
    Type,
    Name,
    NoMethod,
    ZeroDivision,
    LocalJump,
    Fiber,
    NoMatchingPattern,
    Index,
    Key,
    StopIteration,
    SystemStack,
    Interrupt,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::Standard,
        ErrorKind::Runtime,
        ErrorKind::Argument,
        ErrorKind::Type,
        ErrorKind::Name,
        ErrorKind::NoMethod,
        ErrorKind::ZeroDivision,
        ErrorKind::LocalJump,
        ErrorKind::Fiber,
        ErrorKind::NoMatchingPattern,
        ErrorKind::Index,
        ErrorKind::Key,
        ErrorKind::StopIteration,
        ErrorKind::SystemStack,
        ErrorKind::Interrupt,
    ];

    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Standard => "StandardError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Name => "NameError",
            ErrorKind::NoMethod => "NoMethodError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::LocalJump => "LocalJumpError",
            ErrorKind::Fiber => "FiberError",
            ErrorKind::NoMatchingPattern => "NoMatchingPatternError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Key => "KeyError",
            ErrorKind::StopIteration => "StopIteration",
            ErrorKind::SystemStack => "SystemStackError",
            ErrorKind::Interrupt => "Interrupt",
        }
    }
}

/// The object model, as seen from the interpreter.
///
/// `definee` arguments are the lexical class of the running frame: the
/// class being defined in a class body, the owner of the running method,
/// or nil at the top level.
pub trait Dispatch: Send + Sync {
    /// Look up `call.message` on the receiver and run it. Raises
    /// `NoMethodError` when neither the method nor `method_missing` exists.
    fn dispatch(&self, vm: &mut Vm, call: Call) -> Result<Value, Unwind>;

    fn define_method(
        &self,
        vm: &mut Vm,
        definee: &Value,
        method: Arc<MethodBody>,
    ) -> Result<(), Unwind>;

    /// Find or create the class or module `name` under `definee`.
    fn open_class(
        &self,
        vm: &mut Vm,
        definee: &Value,
        name: &str,
        superclass: Option<Value>,
        module: bool,
    ) -> Result<Value, Unwind>;

    fn get_constant(&self, vm: &mut Vm, definee: &Value, name: &str) -> Result<Value, Unwind>;

    fn set_constant(
        &self,
        vm: &mut Vm,
        definee: &Value,
        name: &str,
        value: Value,
    ) -> Result<(), Unwind>;

    fn ivar_get(&self, vm: &mut Vm, object: &Value, name: &str) -> Result<Value, Unwind>;

    fn ivar_set(&self, vm: &mut Vm, object: &Value, name: &str, value: Value)
    -> Result<(), Unwind>;

    /// A fresh exception of the given class.
    fn new_error(&self, kind: ErrorKind, message: String) -> Value;

    /// Called when an exception starts propagating.
    fn record_backtrace(&self, _exception: &Value, _backtrace: &[String]) {}

    /// `self` at the top level.
    fn main_object(&self) -> Value;
}

//! Stack interpreter for compiled guest code.
//!
//! The interpreter executes bytecode against a [`Dispatch`] implementation
//! that owns the object model. It knows about frames, blocks, exceptions
//! and non-local exits, and nothing about classes or method tables.

pub mod bind;
mod context;
mod dispatch;
mod env;
mod fiber;
mod interpreter;
mod interrupt;
mod unwind;
mod value;

#[cfg(test)]
mod testing;

pub use bind::{Args, BindError, Strictness};
pub use context::Context;
pub use dispatch::{Call, Dispatch, ErrorKind};
pub use env::Env;
pub use fiber::{Fiber, FiberState};
pub use interpreter::{Vm, VmConfig};
pub use interrupt::InterruptHandle;
pub use unwind::{Fault, Raised, Unwind, VmError};
pub use value::{
    AsAny, Closure, FrameId, HashTable, MethodBody, Object, Proc, Symbol, Unit, Value,
};

//! Non-local control transfer.
//!
//! Every guest-visible transfer out of a region travels as an [`Unwind`] in
//! the `Err` arm of the interpreter's results. Regions and frames catch the
//! variants addressed to them and pass the rest outward.

use bytecode::{DecodeError, DescriptorError};
use thiserror::Error;

use crate::value::{FrameId, Value};

/// A guest exception in flight.
#[derive(Debug, Clone)]
pub struct Raised {
    pub exception: Value,
    /// Innermost frame first.
    pub backtrace: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Unwind {
    Raise(Box<Raised>),
    Return { target: FrameId, value: Value },
    /// `target` is the defining frame and `block` the carried block's id.
    Break { target: FrameId, block: u64, value: Value },
    LoopBreak(Value),
    Next(Value),
    Redo,
    Retry,
    Fault(Fault),
}

impl Unwind {
    pub fn is_fault(&self) -> bool {
        matches!(self, Unwind::Fault(_))
    }
}

impl From<Fault> for Unwind {
    fn from(fault: Fault) -> Self {
        Unwind::Fault(fault)
    }
}

impl From<DecodeError> for Unwind {
    fn from(err: DecodeError) -> Self {
        Unwind::Fault(Fault::Decode(err))
    }
}

impl From<DescriptorError> for Unwind {
    fn from(err: DescriptorError) -> Self {
        Unwind::Fault(Fault::Descriptor(err))
    }
}

/// Failures of the interpreter itself. They abort execution; guest
/// handlers and ensure bodies never see them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("malformed argument descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("operand stack underflow at {pc}")]
    StackUnderflow { pc: usize },
    #[error("argument count at {pc} is not an integer")]
    BadArgc { pc: usize },
    #[error("jump at {pc} leaves its region")]
    JumpOutOfRegion { pc: usize },
    #[error("region at {pc} overruns its enclosing body")]
    RegionOverrun { pc: usize },
    #[error("region at {pc} left {depth} values instead of one")]
    Unbalanced { pc: usize, depth: usize },
    #[error("environment slot {depth}:{index} does not exist (at {pc})")]
    BadEnv { depth: u64, index: u64, pc: usize },
    #[error("slot {slot} at {pc} is beyond the slot limit")]
    SlotLimit { slot: u64, pc: usize },
    #[error("name operand at {pc} is not valid UTF-8")]
    BadName { pc: usize },
    #[error("pre-flattened arguments at {pc} are not a single array")]
    BadSplat { pc: usize },
    #[error("`{0}` escaped its function")]
    StrayJump(&'static str),
    #[error("fiber was abandoned while suspended")]
    FiberAbandoned,
    #[error("could not start fiber thread: {0}")]
    FiberThread(String),
}

/// How a top-level run ended abnormally.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("internal error: {0}")]
    Fault(#[from] Fault),
    #[error("uncaught exception")]
    Uncaught(Box<Raised>),
}

impl From<Unwind> for VmError {
    fn from(unwind: Unwind) -> Self {
        match unwind {
            Unwind::Raise(raised) => VmError::Uncaught(raised),
            Unwind::Fault(fault) => VmError::Fault(fault),
            Unwind::Return { .. } => VmError::Fault(Fault::StrayJump("return")),
            Unwind::Break { .. } => VmError::Fault(Fault::StrayJump("break")),
            Unwind::LoopBreak(_) => VmError::Fault(Fault::StrayJump("break")),
            Unwind::Next(_) => VmError::Fault(Fault::StrayJump("next")),
            Unwind::Redo => VmError::Fault(Fault::StrayJump("redo")),
            Unwind::Retry => VmError::Fault(Fault::StrayJump("retry")),
        }
    }
}

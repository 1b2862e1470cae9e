use bytecode::VerifyError;
use thiserror::Error;

use crate::ast::{Pos, Tag};

/// Compilation failures. All of them abort compilation of the unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A node tag that is valid input but not in this position.
    #[error("{}unexpected `{}` node", at(.pos), .tag.name())]
    UnexpectedTag { tag: Tag, pos: Option<Pos> },
    #[error("{}malformed `{}` node: {reason}", at(.pos), .tag.name())]
    Malformed { tag: Tag, reason: &'static str, pos: Option<Pos> },
    /// `break`, `next`, `redo` or `retry` with nothing to transfer to.
    #[error("{}invalid {keyword}", at(.pos))]
    InvalidJump { keyword: &'static str, pos: Option<Pos> },
    #[error("{}unsupported: {what}", at(.pos))]
    Unsupported { what: &'static str, pos: Option<Pos> },
    #[error("duplicate slot `{name}` in frame {frame}")]
    DuplicateSlot { name: String, frame: u32 },
    #[error("variable `{0}` reached the emitter unresolved")]
    Unresolved(String),
    #[error("function reached the optimizer without a frame")]
    MissingFrame,
    #[error("emitted code failed verification: {0}")]
    Verify(#[from] VerifyError),
}

fn at(pos: &Option<Pos>) -> String {
    match pos {
        Some(pos) => format!("{}:{}: ", pos.line, pos.column),
        None => String::new(),
    }
}

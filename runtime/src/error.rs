use std::io;
use std::path::PathBuf;

use bytecode::{DecodeError, VerifyError};
use compiler::{CompileError, ParseError};
use thiserror::Error;
use vm::VmError;

/// Everything that can stop a `garnet` invocation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("malformed encoding: {0}")]
    Decode(#[from] DecodeError),
    #[error("rejected bytecode: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl RunError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RunError::Io { path: path.into(), source }
    }

    /// Process exit status, following the sysexits conventions.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Vm(VmError::Uncaught(_)) => 1,
            RunError::Parse(_)
            | RunError::Compile(_)
            | RunError::Decode(_)
            | RunError::Verify(_) => 65,
            RunError::Vm(VmError::Fault(_)) => 70,
            RunError::Io { .. } => 74,
        }
    }
}

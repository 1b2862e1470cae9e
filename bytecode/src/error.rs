use thiserror::Error;

/// The byte stream does not match the opcode table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated operand at offset {offset}")]
    Truncated { offset: usize },
    #[error("overlong varint at offset {offset}")]
    Overlong { offset: usize },
    #[error("flag byte {byte} at offset {offset} is neither 0 nor 1")]
    BadFlag { byte: u8, offset: usize },
}

/// A malformed argument-binding descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown parameter kind {0}")]
    UnknownKind(u8),
    #[error("keyword name is not valid UTF-8")]
    BadKeyword,
    #[error("{0} trailing bytes after descriptor")]
    TrailingBytes(usize),
    #[error("inconsistent descriptor: {0}")]
    Inconsistent(&'static str),
}

/// A body whose stack effects do not balance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("stack underflow at offset {offset} ({op})")]
    Underflow { offset: usize, op: &'static str },
    #[error("{op} at offset {offset} is not preceded by push_argc")]
    UnknownArgc { offset: usize, op: &'static str },
    #[error("jump at offset {offset} leaves its region")]
    JumpOutOfRegion { offset: usize },
    #[error("stack depth {found} at offset {offset} disagrees with {expected} from a jump")]
    DepthMismatch { offset: usize, expected: usize, found: usize },
    #[error("{op} at offset {offset} names slot {slot}, beyond the slot limit")]
    SlotLimit { offset: usize, op: &'static str, slot: u64 },
    #[error("unreachable code at offset {offset}")]
    Unreachable { offset: usize },
    #[error("region at offset {offset} ends at depth {found}, expected {expected}")]
    Unbalanced { offset: usize, expected: usize, found: usize },
    #[error("region at offset {offset} overruns its enclosing region")]
    RegionOverrun { offset: usize },
}

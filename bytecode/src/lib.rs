//! Instruction encoding shared by the compiler and the interpreter.
//!
//! The opcode table in [`op`] is the single definition of opcode names,
//! numeric codes, operand shapes and stack effects. [`Builder`] emits
//! through it and [`decode_at`] / [`Decoder`] read through it.

pub mod args;
pub mod ber;
mod builder;
mod decoder;
mod error;
mod instruction;
pub mod op;
mod source_map;
pub mod verify;

pub use args::{ArgDescriptor, ArgList, ParamKind, Position};
pub use builder::Builder;
pub use decoder::{Decoder, decode_all, decode_at};
pub use error::{DecodeError, DescriptorError, VerifyError};
pub use instruction::{Instruction, MAX_OPERANDS, Operand};
pub use op::{Op, OperandKind, StackEffect, TABLE};
pub use source_map::{Mark, SourceMap};

use std::fmt::Write as _;

/// Render `code` one instruction per line, prefixed by its offset.
pub fn disassemble(code: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::new();
    for item in Decoder::new(code) {
        let (offset, insn) = item?;
        let _ = writeln!(out, "{offset:6}  {insn}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(insns: &[Instruction<'_>]) -> Vec<u8> {
        let mut b = Builder::new();
        for insn in insns {
            b.emit(insn.op, insn.operands());
        }
        b.into_parts().0
    }

    #[test]
    fn round_trip_every_opcode() {
        let float = 0.5f64.to_le_bytes();
        let desc = ArgList::default().encode();
        let insns: Vec<Instruction<'_>> = TABLE
            .iter()
            .map(|info| {
                let operands: Vec<Operand<'_>> = info
                    .shape
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| match kind {
                        OperandKind::Uint => Operand::Uint(127 + i as u64 * 16257),
                        OperandKind::Bytes if info.op == Op::PushFloat => Operand::Bytes(&float),
                        OperandKind::Bytes if matches!(info.op, Op::BindArgs | Op::BindArray) => {
                            Operand::Bytes(&desc)
                        }
                        OperandKind::Bytes => Operand::Bytes(info.name.as_bytes()),
                        OperandKind::Flags => Operand::Flags([i % 2 == 0, true, false, i == 0]),
                    })
                    .collect();
                Instruction::new(info.op, &operands)
            })
            .collect();

        let bytes = encode(&insns);
        assert_eq!(decode_all(&bytes).unwrap(), insns);
    }

    #[test]
    fn send_flags_are_independent() {
        for bits in 0u8..16 {
            let flags = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0];
            let mut b = Builder::new();
            b.send("each", flags);
            let bytes = b.into_parts().0;
            let (insn, next) = decode_at(&bytes, 0).unwrap();
            assert_eq!(next, bytes.len());
            assert_eq!(insn.op, Op::Send);
            assert_eq!(insn.bytes(0), b"each");
            assert_eq!(insn.flags(1), flags, "combination {bits:04b}");
            // The flag block is always four bytes, whatever is set.
            assert_eq!(bytes.len(), 1 + 1 + 4 + 4);
        }
    }

    #[test]
    fn ber_boundaries_through_operands() {
        for value in [0u64, 127, 128, 16383, 16384] {
            let mut b = Builder::new();
            b.uint(Op::PushInt, value);
            let bytes = b.into_parts().0;
            let (insn, _) = decode_at(&bytes, 0).unwrap();
            assert_eq!(insn.uint(0), value);
        }
    }

    #[test]
    fn disassembly_lists_offsets() {
        let mut b = Builder::new();
        b.op(Op::PushSelf);
        b.push_int(-3);
        b.uint(Op::PushArgc, 1);
        b.send("puts", [true, false, false, false]);
        let text = disassemble(b.as_bytes()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].trim(), "0  push_self");
        assert_eq!(lines[1].trim(), "1  push_neg_int -3");
        assert!(lines[3].ends_with("send \"puts\" [1000]"));
    }
}

use core::fmt;

use crate::op::{Op, OperandKind};

/// Most operands any opcode takes (`protect`).
pub const MAX_OPERANDS: usize = 4;

/// A decoded operand. Byte strings borrow from the code buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand<'a> {
    Uint(u64),
    Bytes(&'a [u8]),
    Flags([bool; 4]),
}

impl Operand<'_> {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Uint(_) => OperandKind::Uint,
            Operand::Bytes(_) => OperandKind::Bytes,
            Operand::Flags(_) => OperandKind::Flags,
        }
    }
}

/// One instruction: an opcode plus operands laid out per its table shape.
#[derive(Clone, Copy, PartialEq)]
pub struct Instruction<'a> {
    pub op: Op,
    operands: [Operand<'a>; MAX_OPERANDS],
    len: u8,
}

impl<'a> Instruction<'a> {
    /// Build an instruction. Panics if `operands` does not match the shape
    /// the opcode table declares.
    pub fn new(op: Op, operands: &[Operand<'a>]) -> Self {
        let shape = op.shape();
        assert!(
            shape.len() == operands.len()
                && shape.iter().zip(operands).all(|(k, o)| *k == o.kind()),
            "operands {operands:?} do not match the shape of {}",
            op.name()
        );
        let mut slots = [Operand::Uint(0); MAX_OPERANDS];
        slots[..operands.len()].copy_from_slice(operands);
        Self { op, operands: slots, len: operands.len() as u8 }
    }

    pub fn simple(op: Op) -> Self {
        Self::new(op, &[])
    }

    pub fn operands(&self) -> &[Operand<'a>] {
        &self.operands[..self.len as usize]
    }

    /// The `index`th operand as an integer; zero if it is not one.
    pub fn uint(&self, index: usize) -> u64 {
        match self.operands().get(index) {
            Some(Operand::Uint(v)) => *v,
            _ => 0,
        }
    }

    pub fn bytes(&self, index: usize) -> &'a [u8] {
        match self.operands().get(index) {
            Some(Operand::Bytes(b)) => b,
            _ => &[],
        }
    }

    pub fn flags(&self, index: usize) -> [bool; 4] {
        match self.operands().get(index) {
            Some(Operand::Flags(f)) => *f,
            _ => [false; 4],
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self
            .operands()
            .iter()
            .map(|operand| match operand {
                Operand::Uint(v) => crate::ber::uint_len(*v),
                Operand::Bytes(b) => crate::ber::uint_len(b.len() as u64) + b.len(),
                Operand::Flags(_) => 4,
            })
            .sum::<usize>()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.op as u8);
        for operand in self.operands() {
            match operand {
                Operand::Uint(v) => crate::ber::write_uint(buf, *v),
                Operand::Bytes(b) => crate::ber::write_bytes(buf, b),
                Operand::Flags(f) => buf.extend(f.iter().map(|set| *set as u8)),
            }
        }
    }
}

impl fmt::Debug for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("op", &self.op)
            .field("operands", &self.operands())
            .finish()
    }
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Uint(v) => write!(f, "{v}"),
            Operand::Bytes(b) => match core::str::from_utf8(b) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => {
                    write!(f, "#")?;
                    for byte in b.iter() {
                        write!(f, "{byte:02x}")?;
                    }
                    Ok(())
                }
            },
            Operand::Flags(flags) => {
                write!(f, "[")?;
                for set in flags {
                    write!(f, "{}", *set as u8)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.name())?;
        if self.op == Op::PushFloat {
            if let Ok(raw) = <[u8; 8]>::try_from(self.bytes(0)) {
                return write!(f, " {:?}", f64::from_le_bytes(raw));
            }
        }
        if self.op == Op::PushNegInt {
            return write!(f, " -{}", self.uint(0));
        }
        for operand in self.operands() {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_send() {
        let insn = Instruction::new(
            Op::Send,
            &[Operand::Bytes(b"puts"), Operand::Flags([true, false, false, true])],
        );
        assert_eq!(insn.to_string(), "send \"puts\" [1001]");
    }

    #[test]
    fn display_literals() {
        let float = 1.5f64.to_le_bytes();
        let insn = Instruction::new(Op::PushFloat, &[Operand::Bytes(&float)]);
        assert_eq!(insn.to_string(), "push_float 1.5");
        let insn = Instruction::new(Op::PushNegInt, &[Operand::Uint(7)]);
        assert_eq!(insn.to_string(), "push_neg_int -7");
        assert_eq!(Instruction::simple(Op::Pop).to_string(), "pop");
    }

    #[test]
    #[should_panic]
    fn shape_is_enforced() {
        Instruction::new(Op::PushInt, &[Operand::Bytes(b"x")]);
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let insn = Instruction::new(
            Op::Protect,
            &[
                Operand::Uint(200),
                Operand::Uint(0),
                Operand::Uint(1),
                Operand::Uint(16384),
            ],
        );
        let mut buf = Vec::new();
        insn.encode(&mut buf);
        assert_eq!(buf.len(), insn.encoded_len());
        assert_eq!(buf.len(), 1 + 2 + 1 + 1 + 3);
    }
}

use crate::DecodeError;
use crate::ber;
use crate::instruction::{Instruction, MAX_OPERANDS, Operand};
use crate::op::{Op, OperandKind};

/// Decode the instruction starting at `offset`. Returns it together with the
/// offset of the following instruction.
pub fn decode_at(
    bytes: &[u8],
    offset: usize,
) -> Result<(Instruction<'_>, usize), DecodeError> {
    let Some(&byte) = bytes.get(offset) else {
        return Err(DecodeError::Truncated { offset });
    };
    let op = Op::from_u8(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;

    let mut pos = offset + 1;
    let mut operands = [Operand::Uint(0); MAX_OPERANDS];
    let shape = op.shape();
    for (slot, kind) in operands.iter_mut().zip(shape) {
        *slot = match kind {
            OperandKind::Uint => Operand::Uint(ber::read_uint(bytes, &mut pos)?),
            OperandKind::Bytes => Operand::Bytes(ber::read_bytes(bytes, &mut pos)?),
            OperandKind::Flags => Operand::Flags(read_flags(bytes, &mut pos)?),
        };
    }
    Ok((Instruction::new(op, &operands[..shape.len()]), pos))
}

fn read_flags(bytes: &[u8], pos: &mut usize) -> Result<[bool; 4], DecodeError> {
    let start = *pos;
    let raw = bytes
        .get(start..start + 4)
        .ok_or(DecodeError::Truncated { offset: start })?;
    let mut flags = [false; 4];
    for (i, byte) in raw.iter().enumerate() {
        flags[i] = match byte {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::BadFlag { byte: *byte, offset: start + i }),
        };
    }
    *pos = start + 4;
    Ok(flags)
}

/// Sequential decoder over a byte range.
///
/// Yields `(offset, instruction)` pairs. Length-prefixed bodies are not
/// skipped: a `define_method` is followed by the instructions of its body.
/// After the first error the iterator is exhausted.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0, end: bytes.len() }
    }

    pub fn range(bytes: &'a [u8], start: usize, end: usize) -> Self {
        Self { bytes, pos: start, end: end.min(bytes.len()) }
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.end
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<(usize, Instruction<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_at_end() {
            return None;
        }
        let offset = self.pos;
        match decode_at(&self.bytes[..self.end], offset) {
            Ok((insn, next)) => {
                self.pos = next;
                Some(Ok((offset, insn)))
            }
            Err(err) => {
                self.pos = self.end;
                Some(Err(err))
            }
        }
    }
}

/// Decode a whole buffer, stopping at the first error.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Instruction<'_>>, DecodeError> {
    Decoder::new(bytes)
        .map(|item| item.map(|(_, insn)| insn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_opcode() {
        assert_eq!(
            decode_at(&[0xEE], 0).unwrap_err(),
            DecodeError::UnknownOpcode { byte: 0xEE, offset: 0 }
        );
    }

    #[test]
    fn truncated_operand() {
        // push_int with a continuation byte and nothing after it.
        let bytes = [Op::PushInt as u8, 0x81];
        assert_eq!(decode_at(&bytes, 0).unwrap_err(), DecodeError::Truncated { offset: 1 });

        let bytes = [Op::Send as u8, 1, b'p', 0, 1];
        assert_eq!(decode_at(&bytes, 0).unwrap_err(), DecodeError::Truncated { offset: 3 });
    }

    #[test]
    fn bad_flag_byte() {
        let bytes = [Op::Yield as u8, 0, 2, 0, 0];
        assert_eq!(
            decode_at(&bytes, 0).unwrap_err(),
            DecodeError::BadFlag { byte: 2, offset: 2 }
        );
    }

    #[test]
    fn iterator_stops_after_error() {
        let bytes = [Op::Pop as u8, 0xEE, Op::Pop as u8];
        let items: Vec<_> = Decoder::new(&bytes).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn range_decoding() {
        let bytes = [Op::PushNil as u8, Op::Pop as u8, Op::PushTrue as u8];
        let ops: Vec<_> = Decoder::range(&bytes, 1, 2)
            .map(|item| item.unwrap().1.op)
            .collect();
        assert_eq!(ops, vec![Op::Pop]);
    }
}

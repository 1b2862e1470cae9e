use crate::instruction::{Instruction, Operand};
use crate::op::Op;
use crate::source_map::SourceMap;

/// Builds a bytecode byte sequence.
///
/// Every jump is forward and every nested body is length-prefixed, so code
/// whose length must be known up front is built in a separate builder and
/// spliced in with [`append`](Builder::append).
#[derive(Debug, Default)]
pub struct Builder {
    buf: Vec<u8>,
    source_map: SourceMap,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset in the bytecode stream.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_parts(self) -> (Vec<u8>, SourceMap) {
        (self.buf, self.source_map)
    }

    /// Attach a source position to the next emitted instruction.
    pub fn mark(&mut self, line: u32, column: u32) {
        self.source_map.add(self.buf.len() as u32, line, column);
    }

    /// Emit `op` with operands checked against the opcode table.
    pub fn emit(&mut self, op: Op, operands: &[Operand<'_>]) {
        Instruction::new(op, operands).encode(&mut self.buf);
    }

    pub fn op(&mut self, op: Op) {
        self.emit(op, &[]);
    }

    pub fn uint(&mut self, op: Op, value: u64) {
        self.emit(op, &[Operand::Uint(value)]);
    }

    pub fn bytes(&mut self, op: Op, bytes: &[u8]) {
        self.emit(op, &[Operand::Bytes(bytes)]);
    }

    pub fn push_int(&mut self, value: i64) {
        if value < 0 {
            self.uint(Op::PushNegInt, value.unsigned_abs());
        } else {
            self.uint(Op::PushInt, value as u64);
        }
    }

    pub fn push_float(&mut self, value: f64) {
        self.bytes(Op::PushFloat, &value.to_le_bytes());
    }

    /// `send <name> <flags>`; the caller has already pushed the receiver,
    /// arguments, block and argument count.
    pub fn send(&mut self, name: &str, flags: [bool; 4]) {
        self.emit(Op::Send, &[Operand::Bytes(name.as_bytes()), Operand::Flags(flags)]);
    }

    pub fn get_env(&mut self, depth: u32, index: u32) {
        self.emit(
            Op::GetEnv,
            &[Operand::Uint(u64::from(depth)), Operand::Uint(u64::from(index))],
        );
    }

    pub fn set_env(&mut self, depth: u32, index: u32) {
        self.emit(
            Op::SetEnv,
            &[Operand::Uint(u64::from(depth)), Operand::Uint(u64::from(index))],
        );
    }

    /// Forward jump over `distance` bytes following the jump.
    pub fn jump(&mut self, op: Op, distance: usize) {
        debug_assert!(op.is_jump(), "{} is not a jump", op.name());
        self.uint(op, distance as u64);
    }

    /// Encoded size of a jump over `distance` bytes.
    pub fn jump_len(distance: usize) -> usize {
        1 + crate::ber::uint_len(distance as u64)
    }

    /// Splice in a separately built region, rebasing its source marks.
    pub fn append(&mut self, other: Builder) {
        let base = self.buf.len() as u32;
        let (bytes, map) = other.into_parts();
        self.buf.extend_from_slice(&bytes);
        self.source_map.append(base, map);
    }

    /// `define_method <name> <len>` followed by the body.
    pub fn define_method(&mut self, name: &str, body: Builder) {
        self.emit(
            Op::DefineMethod,
            &[Operand::Bytes(name.as_bytes()), Operand::Uint(body.len() as u64)],
        );
        self.append(body);
    }

    pub fn define_block(&mut self, lambda: bool, body: Builder) {
        self.emit(
            Op::DefineBlock,
            &[Operand::Flags([lambda, false, false, false]), Operand::Uint(body.len() as u64)],
        );
        self.append(body);
    }

    pub fn define_class(&mut self, name: &str, has_superclass: bool, module: bool, body: Builder) {
        self.emit(
            Op::DefineClass,
            &[
                Operand::Bytes(name.as_bytes()),
                Operand::Flags([has_superclass, module, false, false]),
                Operand::Uint(body.len() as u64),
            ],
        );
        self.append(body);
    }

    /// `loop <until, body_first> <cond_len> <body_len>` plus both regions.
    pub fn loop_region(&mut self, until: bool, body_first: bool, cond: Builder, body: Builder) {
        self.emit(
            Op::Loop,
            &[
                Operand::Flags([until, body_first, false, false]),
                Operand::Uint(cond.len() as u64),
                Operand::Uint(body.len() as u64),
            ],
        );
        self.append(cond);
        self.append(body);
    }

    pub fn redo_scope(&mut self, body: Builder) {
        self.uint(Op::RedoScope, body.len() as u64);
        self.append(body);
    }

    /// `protect` with its four regions; empty builders mark absent parts.
    pub fn protect(&mut self, body: Builder, rescue: Builder, else_: Builder, ensure: Builder) {
        self.emit(
            Op::Protect,
            &[
                Operand::Uint(body.len() as u64),
                Operand::Uint(rescue.len() as u64),
                Operand::Uint(else_.len() as u64),
                Operand::Uint(ensure.len() as u64),
            ],
        );
        self.append(body);
        self.append(rescue);
        self.append(else_);
        self.append(ensure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_all;

    #[test]
    fn negative_and_float_literals() {
        let mut b = Builder::new();
        b.push_int(-5);
        b.push_int(300);
        b.push_float(2.25);
        let bytes = b.into_parts().0;
        let insns = decode_all(&bytes).unwrap();
        assert_eq!(insns[0], Instruction::new(Op::PushNegInt, &[Operand::Uint(5)]));
        assert_eq!(insns[1], Instruction::new(Op::PushInt, &[Operand::Uint(300)]));
        assert_eq!(insns[2].bytes(0), &2.25f64.to_le_bytes());
    }

    #[test]
    fn nested_body_is_length_prefixed() {
        let mut body = Builder::new();
        body.op(Op::PushNil);
        let mut b = Builder::new();
        b.define_method("foo", body);
        let bytes = b.into_parts().0;
        assert_eq!(bytes, vec![Op::DefineMethod as u8, 3, b'f', b'o', b'o', 1, Op::PushNil as u8]);
    }

    #[test]
    fn append_rebases_marks() {
        let mut inner = Builder::new();
        inner.mark(7, 2);
        inner.op(Op::PushNil);
        let mut outer = Builder::new();
        outer.mark(1, 0);
        outer.op(Op::PushTrue);
        outer.append(inner);
        let (_, map) = outer.into_parts();
        assert_eq!(map.lookup(0), Some((1, 0)));
        assert_eq!(map.lookup(1), Some((7, 2)));
    }

    #[test]
    fn jump_len_accounts_for_varint() {
        assert_eq!(Builder::jump_len(10), 2);
        assert_eq!(Builder::jump_len(200), 3);
    }
}

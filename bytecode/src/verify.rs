//! Stack-balance verification.
//!
//! A body starts from an empty stack and must end at exactly one value.
//! Length-prefixed sub-regions (loop parts, protected regions, nested
//! bodies) are checked on their own and contribute one value to the
//! enclosing region. Depths carried by forward jumps must agree at their
//! target.

use std::collections::BTreeMap;

use crate::VerifyError;
use crate::args::ArgList;
use crate::decoder::decode_at;
use crate::instruction::Instruction;
use crate::op::{Op, StackEffect};

/// Exclusive bound on local indices, environment sizes and environment
/// indices. Both the verifier and the interpreter enforce it.
pub const MAX_SLOTS: u64 = 1 << 16;

/// The slot number an instruction names, if any.
pub fn slot_operand(insn: &Instruction<'_>) -> Option<u64> {
    match insn.op {
        Op::GetLocal | Op::SetLocal | Op::AllocEnv => Some(insn.uint(0)),
        Op::GetEnv | Op::SetEnv => Some(insn.uint(1)),
        _ => None,
    }
}

/// Verify a complete code buffer as one body.
pub fn verify(code: &[u8]) -> Result<(), VerifyError> {
    verify_body(code, 0, code.len())
}

/// Verify the body occupying `start..end`.
pub fn verify_body(code: &[u8], start: usize, end: usize) -> Result<(), VerifyError> {
    region(code, start, end, 0, 1)
}

/// `(pops, pushes)` of an instruction whose effect depends only on its
/// operands. `send` and `yield` also depend on the stack and return `None`.
pub fn operand_effect(insn: &Instruction<'_>) -> Result<Option<(usize, usize)>, VerifyError> {
    let effect = match insn.op.info().effect {
        StackEffect::Fixed { pops, pushes } => (pops as usize, pushes as usize),
        StackEffect::Variadic => match insn.op {
            Op::CreateArray | Op::Interpolate => (insn.uint(0) as usize, 1),
            Op::CreateHash => (insn.uint(0) as usize * 2, 1),
            Op::BindArgs => (0, ArgList::decode(insn.bytes(0))?.len()),
            Op::BindArray => (1, ArgList::decode(insn.bytes(0))?.len()),
            Op::DefineClass => (insn.flags(1)[0] as usize, 1),
            _ => return Ok(None),
        },
    };
    Ok(Some(effect))
}

struct Region {
    stack: Vec<Option<u64>>,
    pending: BTreeMap<usize, usize>,
    reachable: bool,
}

impl Region {
    fn pop(&mut self, offset: usize, op: Op) -> Result<Option<u64>, VerifyError> {
        self.stack
            .pop()
            .ok_or(VerifyError::Underflow { offset, op: op.name() })
    }

    fn pop_n(&mut self, n: usize, offset: usize, op: Op) -> Result<(), VerifyError> {
        if self.stack.len() < n {
            return Err(VerifyError::Underflow { offset, op: op.name() });
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    fn push_n(&mut self, n: usize) {
        self.stack.extend(std::iter::repeat_n(None, n));
    }

    fn record_jump(&mut self, target: usize) -> Result<(), VerifyError> {
        let depth = self.stack.len();
        match self.pending.get(&target) {
            Some(&expected) if expected != depth => Err(VerifyError::DepthMismatch {
                offset: target,
                expected,
                found: depth,
            }),
            Some(_) => Ok(()),
            None => {
                self.pending.insert(target, depth);
                Ok(())
            }
        }
    }

    fn merge(&mut self, pc: usize) -> Result<(), VerifyError> {
        if let Some((&first, _)) = self.pending.first_key_value() {
            if first < pc {
                return Err(VerifyError::JumpOutOfRegion { offset: first });
            }
        }
        if let Some(depth) = self.pending.remove(&pc) {
            if self.reachable {
                if depth != self.stack.len() {
                    return Err(VerifyError::DepthMismatch {
                        offset: pc,
                        expected: depth,
                        found: self.stack.len(),
                    });
                }
            } else {
                self.stack = vec![None; depth];
                self.reachable = true;
            }
        }
        Ok(())
    }
}

fn sub_region(
    code: &[u8],
    start: usize,
    len: u64,
    limit: usize,
    entry: usize,
    offset: usize,
) -> Result<usize, VerifyError> {
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|end| *end <= limit)
        .ok_or(VerifyError::RegionOverrun { offset })?;
    region(code, start, end, entry, 1)?;
    Ok(end)
}

fn region(
    code: &[u8],
    start: usize,
    end: usize,
    entry: usize,
    expected: usize,
) -> Result<(), VerifyError> {
    let mut r = Region {
        stack: vec![None; entry],
        pending: BTreeMap::new(),
        reachable: true,
    };
    let mut pc = start;
    while pc < end {
        r.merge(pc)?;
        if !r.reachable {
            return Err(VerifyError::Unreachable { offset: pc });
        }
        let (insn, mut next) = decode_at(&code[..end], pc)?;
        let op = insn.op;
        if let Some(slot) = slot_operand(&insn) {
            if slot >= MAX_SLOTS {
                return Err(VerifyError::SlotLimit { offset: pc, op: op.name(), slot });
            }
        }
        match op {
            Op::PushArgc => r.stack.push(Some(insn.uint(0))),
            Op::Send | Op::Yield => {
                let argc = r
                    .pop(pc, op)?
                    .ok_or(VerifyError::UnknownArgc { offset: pc, op: op.name() })?;
                let flags = insn.flags(if op == Op::Send { 1 } else { 0 });
                let mut pops = argc as usize;
                if op == Op::Send {
                    pops += flags[1] as usize + !flags[0] as usize;
                }
                r.pop_n(pops, pc, op)?;
                r.push_n(1);
            }
            _ if op.is_jump() => {
                if op != Op::Jump {
                    r.pop(pc, op)?;
                }
                let target = usize::try_from(insn.uint(0))
                    .ok()
                    .and_then(|d| next.checked_add(d))
                    .filter(|t| *t <= end)
                    .ok_or(VerifyError::JumpOutOfRegion { offset: pc })?;
                r.record_jump(target)?;
                if op == Op::Jump {
                    r.reachable = false;
                }
            }
            Op::Loop => {
                let cond_end = sub_region(code, next, insn.uint(1), end, 0, pc)?;
                next = sub_region(code, cond_end, insn.uint(2), end, 0, pc)?;
                r.push_n(1);
            }
            Op::RedoScope => {
                next = sub_region(code, next, insn.uint(0), end, 0, pc)?;
                r.push_n(1);
            }
            Op::Protect => {
                next = sub_region(code, next, insn.uint(0), end, 0, pc)?;
                if insn.uint(1) > 0 {
                    next = sub_region(code, next, insn.uint(1), end, 1, pc)?;
                }
                if insn.uint(2) > 0 {
                    next = sub_region(code, next, insn.uint(2), end, 0, pc)?;
                }
                if insn.uint(3) > 0 {
                    next = sub_region(code, next, insn.uint(3), end, 0, pc)?;
                }
                r.push_n(1);
            }
            Op::DefineMethod | Op::DefineBlock | Op::DefineClass => {
                let (pops, pushes) = operand_effect(&insn)?.unwrap_or((0, 1));
                r.pop_n(pops, pc, op)?;
                let len_index = insn.operands().len() - 1;
                next = sub_region(code, next, insn.uint(len_index), end, 0, pc)?;
                r.push_n(pushes);
            }
            _ => {
                let (pops, pushes) = operand_effect(&insn)?.unwrap_or((0, 0));
                r.pop_n(pops, pc, op)?;
                r.push_n(pushes);
            }
        }
        pc = next;
    }
    r.merge(end)?;
    if !r.pending.is_empty() || !r.reachable {
        return Err(VerifyError::Unreachable { offset: end });
    }
    if r.stack.len() != expected {
        return Err(VerifyError::Unbalanced {
            offset: start,
            expected,
            found: r.stack.len(),
        });
    }
    Ok(())
}

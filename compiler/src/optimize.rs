//! Storage assignment. Uncaptured slots become registers, captured slots
//! move into the frame's shared environment.

use log::trace;

use crate::error::CompileError;
use crate::ir::{Fold, FrameId, Function, Slot, Var, walk_function};
use crate::scope::FrameTable;

#[derive(Debug, Clone, Copy)]
enum Placement {
    Register(u32),
    Env(u32),
}

struct FrameLayout {
    slots: Vec<Placement>,
    env_size: u32,
}

fn layout(table: &FrameTable) -> Vec<FrameLayout> {
    table
        .iter()
        .map(|frame| {
            let (mut registers, mut env) = (0, 0);
            let slots = frame
                .slots
                .iter()
                .map(|slot| {
                    if slot.captured {
                        env += 1;
                        Placement::Env(env - 1)
                    } else {
                        registers += 1;
                        Placement::Register(registers - 1)
                    }
                })
                .collect();
            FrameLayout { slots, env_size: env }
        })
        .collect()
}

pub fn optimize(top: Function, frames: &FrameTable) -> Result<Function, CompileError> {
    let mut optimizer = Optimizer { layouts: layout(frames), stack: Vec::new() };
    optimizer.fold_function(top)
}

struct Optimizer {
    layouts: Vec<FrameLayout>,
    stack: Vec<FrameId>,
}

impl Optimizer {
    /// Environments between the current frame and `owner`'s, counting the
    /// current frame's own environment if it has one.
    fn depth(&self, owner: FrameId) -> Option<u32> {
        let mut depth = 0;
        for &id in self.stack.iter().rev() {
            if id == owner {
                return Some(depth);
            }
            if self.layouts[id as usize].env_size > 0 {
                depth += 1;
            }
        }
        None
    }
}

impl Fold for Optimizer {
    type Error = CompileError;

    fn fold_var(&mut self, mut var: Var) -> Result<Var, CompileError> {
        let Slot::Frame { frame, index } = var.slot else {
            return Err(CompileError::Unresolved(var.name));
        };
        let placement = self
            .layouts
            .get(frame as usize)
            .and_then(|l| l.slots.get(index as usize))
            .copied()
            .ok_or(CompileError::MissingFrame)?;
        var.slot = match placement {
            Placement::Register(i) if self.stack.last() == Some(&frame) => Slot::Direct(i),
            Placement::Register(_) => return Err(CompileError::Unresolved(var.name)),
            Placement::Env(index) => match self.depth(frame) {
                Some(depth) => Slot::Indirect { depth, index },
                None => return Err(CompileError::Unresolved(var.name)),
            },
        };
        Ok(var)
    }

    fn fold_function(&mut self, function: Function) -> Result<Function, CompileError> {
        let id = function.frame.ok_or(CompileError::MissingFrame)?;
        self.stack.push(id);
        let result = walk_function(self, function);
        self.stack.pop();
        let mut function = result?;
        function.env_size = self.layouts.get(id as usize).map_or(0, |l| l.env_size);
        trace!("frame {id} `{}`: env size {}", function.name, function.env_size);
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desugar::desugar;
    use crate::ir::Ir;
    use crate::scope::resolve;
    use crate::sexp::parse;

    fn optimized(src: &str) -> Function {
        let top = desugar(&parse(src).unwrap()).unwrap();
        let (top, frames) = resolve(top).unwrap();
        optimize(top, &frames).unwrap()
    }

    fn first_block(ir: &Ir) -> &Function {
        match ir {
            Ir::Seq(items) => items.iter().find_map(|i| match i {
                Ir::Call(call) => match &call.block {
                    Some(Ir::Closure(f)) => Some(&**f),
                    _ => None,
                },
                _ => None,
            }),
            Ir::Call(call) => match &call.block {
                Some(Ir::Closure(f)) => Some(&**f),
                _ => None,
            },
            _ => None,
        }
        .unwrap()
    }

    #[test]
    fn uncaptured_locals_are_registers() {
        let top = optimized("(lasgn :a (lit 1)) (lasgn :b (lvar :a))");
        assert_eq!(top.env_size, 0);
        let Ir::Seq(items) = &top.body else { panic!() };
        let Ir::SetVar(b, value) = &items[1] else { panic!() };
        assert_eq!(b.slot, Slot::Direct(1));
        assert_eq!(**value, Ir::GetVar(Var { name: "a".into(), slot: Slot::Direct(0) }));
    }

    #[test]
    fn capture_depth_skips_frames_without_env() {
        // The middle block captures nothing of its own, so the inner block
        // reaches the top-level environment at depth 0.
        let top = optimized(
            "(lasgn :x (lit 1)) \
             (iter (call nil :a) nil (iter (call nil :b) nil (lvar :x)))",
        );
        assert_eq!(top.env_size, 1);
        let middle = first_block(&top.body);
        assert_eq!(middle.env_size, 0);
        let inner = first_block(&middle.body);
        assert_eq!(inner.body, Ir::GetVar(Var { name: "x".into(), slot: Slot::Indirect { depth: 0, index: 0 } }));
    }

    #[test]
    fn capture_depth_counts_intervening_envs() {
        let top = optimized(
            "(lasgn :x (lit 1)) \
             (iter (call nil :a) nil (lasgn :y (lit 2)) \
               (iter (call nil :b) nil (call nil :p (lvar :x) (lvar :y))))",
        );
        let middle = first_block(&top.body);
        assert_eq!(middle.env_size, 1);
        let inner = first_block(&middle.body);
        let Ir::Call(call) = &inner.body else { panic!() };
        let slots: Vec<_> = call
            .args
            .iter()
            .map(|a| match a {
                Ir::GetVar(v) => v.slot,
                other => panic!("{other:?}"),
            })
            .collect();
        assert_eq!(
            slots,
            vec![Slot::Indirect { depth: 1, index: 0 }, Slot::Indirect { depth: 0, index: 0 }]
        );
    }
}

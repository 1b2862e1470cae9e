//! Scope resolution: every variable reference gets a frame and slot.
//!
//! Lookups search outward from the innermost frame and stop after the
//! first frame that is not a block or lambda. A name found in an enclosing
//! frame marks that slot as captured; an unknown name is declared in the
//! current frame.

use log::debug;

use crate::error::CompileError;
use crate::ir::{Fold, FrameId, Function, FunctionKind, Slot, Target, Var, walk_function};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    /// Referenced from a nested block or lambda.
    pub captured: bool,
}

#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub id: FrameId,
    pub kind: FunctionKind,
    pub parent: Option<FrameId>,
    pub slots: Vec<SlotInfo>,
}

impl FrameInfo {
    fn is_transparent(&self) -> bool {
        matches!(self.kind, FunctionKind::Block | FunctionKind::Lambda)
    }
}

/// Frames of one compilation unit, indexed by [`FrameId`].
#[derive(Debug, Default)]
pub struct FrameTable {
    frames: Vec<FrameInfo>,
}

impl FrameTable {
    pub fn get(&self, id: FrameId) -> Option<&FrameInfo> {
        self.frames.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter()
    }

    fn push(&mut self, kind: FunctionKind, parent: Option<FrameId>) -> FrameId {
        let id = self.frames.len() as FrameId;
        self.frames.push(FrameInfo { id, kind, parent, slots: Vec::new() });
        id
    }
}

pub fn resolve(top: Function) -> Result<(Function, FrameTable), CompileError> {
    let mut resolver = Resolver { table: FrameTable::default(), stack: Vec::new() };
    let top = resolver.fold_function(top)?;
    debug!("resolved {} frames", resolver.table.len());
    Ok((top, resolver.table))
}

struct Resolver {
    table: FrameTable,
    stack: Vec<FrameId>,
}

impl Resolver {
    fn current(&self) -> Result<FrameId, CompileError> {
        self.stack.last().copied().ok_or(CompileError::MissingFrame)
    }

    fn lookup(&mut self, name: &str) -> Option<Slot> {
        let current = *self.stack.last()?;
        for &id in self.stack.iter().rev() {
            let frame = &mut self.table.frames[id as usize];
            if let Some(index) = frame.slots.iter().position(|s| s.name == name) {
                if id != current {
                    frame.slots[index].captured = true;
                }
                return Some(Slot::Frame { frame: id, index: index as u32 });
            }
            if !frame.is_transparent() {
                break;
            }
        }
        None
    }

    fn declare(&mut self, name: &str) -> Result<Slot, CompileError> {
        let frame = self.current()?;
        let slots = &mut self.table.frames[frame as usize].slots;
        slots.push(SlotInfo { name: name.to_string(), captured: false });
        Ok(Slot::Frame { frame, index: slots.len() as u32 - 1 })
    }

    /// Parameters and block-locals always bind in the current frame.
    /// Repeating a name is an error unless it starts with `_`.
    fn declare_local(&mut self, name: &str) -> Result<(), CompileError> {
        let frame = self.current()?;
        let exists = self.table.frames[frame as usize].slots.iter().any(|s| s.name == name);
        if !exists {
            self.declare(name)?;
        } else if !name.starts_with('_') {
            return Err(CompileError::DuplicateSlot { name: name.to_string(), frame });
        }
        Ok(())
    }

    fn declare_target(&mut self, target: &Target) -> Result<(), CompileError> {
        match target {
            Target::Var(var) => self.declare_local(&var.name),
            Target::Nested(nested) => {
                for target in &nested.targets {
                    self.declare_target(target)?;
                }
                Ok(())
            }
            Target::Ivar(_) | Target::Global(_) | Target::Const(_) | Target::Discard => Ok(()),
        }
    }

    fn enter(&mut self, function: Function, id: FrameId) -> Result<Function, CompileError> {
        for target in &function.params.bind.targets {
            self.declare_target(target)?;
        }
        for name in &function.locals {
            self.declare_local(name)?;
        }
        let mut function = walk_function(self, function)?;
        function.frame = Some(id);
        Ok(function)
    }
}

impl Fold for Resolver {
    type Error = CompileError;

    fn fold_var(&mut self, mut var: Var) -> Result<Var, CompileError> {
        var.slot = match self.lookup(&var.name) {
            Some(slot) => slot,
            None => self.declare(&var.name)?,
        };
        Ok(var)
    }

    fn fold_function(&mut self, function: Function) -> Result<Function, CompileError> {
        let id = self.table.push(function.kind, self.stack.last().copied());
        self.stack.push(id);
        let result = self.enter(function, id);
        self.stack.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desugar::desugar;
    use crate::sexp::parse;

    fn frames(src: &str) -> FrameTable {
        let top = desugar(&parse(src).unwrap()).unwrap();
        resolve(top).unwrap().1
    }

    fn slot<'t>(table: &'t FrameTable, frame: FrameId, name: &str) -> &'t SlotInfo {
        table.get(frame).unwrap().slots.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn block_captures_outer_variable() {
        let table = frames(
            "(lasgn :x (lit 1)) (lasgn :y (lit 2)) \
             (iter (call nil :each) (args i) (call nil :p (lvar :x) (lvar :i)))",
        );
        assert_eq!(table.len(), 2);
        assert!(slot(&table, 0, "x").captured);
        assert!(!slot(&table, 0, "y").captured);
        assert!(!slot(&table, 1, "i").captured);
        assert!(table.get(1).unwrap().slots.iter().all(|s| s.name != "x"));
        assert_eq!(table.get(1).unwrap().parent, Some(0));
    }

    #[test]
    fn methods_do_not_see_outer_locals() {
        let table = frames("(lasgn :x (lit 1)) (defn f (args) (lvar :x))");
        assert!(!slot(&table, 0, "x").captured);
        assert!(!slot(&table, 1, "x").captured);
    }

    #[test]
    fn slots_are_unique_per_frame() {
        let table = frames(
            "(lasgn :a (lit 1)) (lasgn :a (lit 2)) (lasgn :b (lvar :a)) \
             (iter (call nil :each) (args a) (lasgn :a (lit 3)))",
        );
        for frame in table.iter() {
            let mut names: Vec<_> = frame.slots.iter().map(|s| s.name.as_str()).collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), total, "frame {}", frame.id);
        }
        // The block parameter shadows the outer `a`.
        assert!(!slot(&table, 0, "a").captured);
    }

    #[test]
    fn shadow_locals_are_block_local() {
        let table = frames(
            "(lasgn :x (lit 1)) (iter (call nil :each) (args (shadow x)) (lasgn :x (lit 2)))",
        );
        assert!(!slot(&table, 0, "x").captured);
        assert_eq!(slot(&table, 1, "x").name, "x");
    }

    #[test]
    fn duplicate_parameters() {
        let top = desugar(&parse("(defn f (args a a) (nil))").unwrap()).unwrap();
        assert!(matches!(resolve(top), Err(CompileError::DuplicateSlot { .. })));
        let top = desugar(&parse("(defn f (args _ _) (nil))").unwrap()).unwrap();
        assert!(resolve(top).is_ok());
    }
}

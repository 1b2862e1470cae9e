//! Compiler from the input tree to bytecode.
//!
//! Passes run in order: [`desugar`] lowers the tree to [`ir::Ir`],
//! [`scope`] assigns every variable a frame slot, [`optimize`] decides
//! register or environment storage and [`emit`] produces verified bytecode.

pub mod ast;
pub mod desugar;
pub mod emit;
mod error;
pub mod ir;
pub mod optimize;
pub mod scope;
pub mod sexp;

pub use ast::{Child, Literal, Node, Pos, Tag};
pub use emit::Program;
pub use error::CompileError;
pub use sexp::{ParseError, parse};

use log::debug;

pub fn compile(root: &Node) -> Result<Program, CompileError> {
    let top = desugar::desugar(root)?;
    let (top, frames) = scope::resolve(top)?;
    debug!("{} frames after scope resolution", frames.len());
    let top = optimize::optimize(top, &frames)?;
    emit::emit(&top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::{Instruction, Op, Operand, decode_all};

    fn compile_src(src: &str) -> Program {
        compile(&parse(src).unwrap()).unwrap()
    }

    fn ops(program: &Program) -> Vec<Op> {
        decode_all(&program.code).unwrap().iter().map(|i| i.op).collect()
    }

    #[test]
    fn call_with_implicit_self() {
        let program = compile_src("(call nil :puts (lit 42))");
        let insns = decode_all(&program.code).unwrap();
        assert_eq!(
            insns,
            vec![
                Instruction::new(Op::PushInt, &[Operand::Uint(42)]),
                Instruction::new(Op::PushArgc, &[Operand::Uint(1)]),
                Instruction::new(
                    Op::Send,
                    &[Operand::Bytes(b"puts"), Operand::Flags([true, false, false, false])]
                ),
            ]
        );
    }

    #[test]
    fn statements_pop_and_assignments_skip_dup() {
        let program = compile_src("(lasgn :a (lit 1)) (call nil :p (lvar :a)) (lvar :a)");
        assert_eq!(
            ops(&program),
            vec![
                Op::PushInt,
                Op::SetLocal,
                Op::GetLocal,
                Op::PushArgc,
                Op::Send,
                Op::Pop,
                Op::GetLocal,
            ]
        );
    }

    #[test]
    fn captured_variables_use_the_environment() {
        let program = compile_src(
            "(lasgn :x (lit 1)) (iter (call nil :each) (args i) (call nil :p (lvar :x)))",
        );
        let ops = ops(&program);
        assert_eq!(ops[0], Op::AllocEnv);
        assert!(ops.contains(&Op::SetEnv));
        assert!(ops.contains(&Op::GetEnv));
        assert!(ops.contains(&Op::DefineBlock));
        assert!(ops.contains(&Op::RedoScope));
        assert!(ops.contains(&Op::BindArgs));
    }

    #[test]
    fn every_construct_verifies() {
        // `compile` verifies; this only has to succeed.
        let sources = [
            "(if (true) (lit 1) nil)",
            "(and (lvar :a) (or (nil) (lit 2)))",
            "(while (lvar :c) (lasgn :c (false)))",
            "(until_post (true) (next))",
            "(safe_call (lvar :x) :length)",
            "(attrasgn (lvar :h) :[]= (lit :k) (lit 1))",
            "(op_asgn_or (iasgn :@memo (lit 1)))",
            "(masgn (mlhs (lasgn :a) (splat (lasgn :b)) (mlhs (lasgn :c) (lasgn :d))) (array (lit 1) (lit 2)))",
            "(case (lit 1) (when (array (lit 1) (lit 2)) (str \"x\")) (str \"y\"))",
            "(case_in (array (lit 1) (lit 2)) (in (parray (pvar :a) (prest :r)) nil (lvar :a)))",
            "(case_in (hash (lit :k) (lit 1)) (in (phash (pair :k (pvar :v))) nil (lvar :v)))",
            "(ensure (rescue (call nil :f) (resbody (array (const :E)) (lasgn :e) (retry)) (lit 3)) (lit 4))",
            "(defn f (args a (opt b (lit 1)) (rest r) c (kw k (lit 2)) (kwrest o) (blockarg blk)) (yield (lvar :a)))",
            "(class Foo (const :Object) (defn initialize (args) (iasgn :@x (lit 1))))",
            "(module M (cdecl :K (lit 1)))",
            "(lambda (args x) (return (lvar :x)))",
            "(iter (call nil :loop) nil (break (lit 1)))",
            "(iter (call nil :each) (args (mlhs a b)) (redo))",
            "(dstr \"a\" (evstr (lit 1)) (str \"b\"))",
            "(call (lvar :o) :m (splat (lvar :xs)) (kwargs (lit :a) (lit 1) (kwsplat (lvar :h))) (block_pass (lit :to_s)))",
        ];
        for src in sources {
            let node = parse(src).unwrap();
            if let Err(e) = compile(&node) {
                panic!("{src}: {e}");
            }
        }
    }

    #[test]
    fn source_positions_are_recorded() {
        let program = compile_src("(block (nil) (call@3:1 nil :boom))");
        let send = decode_all(&program.code)
            .unwrap()
            .iter()
            .scan(0, |offset, insn| {
                let at = *offset;
                *offset += insn.encoded_len();
                Some((at, insn.op))
            })
            .find(|(_, op)| *op == Op::PushArgc)
            .map(|(at, _)| at)
            .unwrap();
        assert_eq!(program.source_map.lookup(send), Some((3, 1)));
    }

    #[test]
    fn invalid_jump_is_a_compile_error() {
        let err = compile(&parse("(defn f (args) (next))").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidJump { keyword: "next", .. }));
    }
}

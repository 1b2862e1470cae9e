//! Instruction emission.
//!
//! Every expression leaves exactly one value on the stack. Statements in a
//! sequence are followed by `pop`, except assignments whose value is unused,
//! which skip the `dup` instead.

use bytecode::{Builder, Op, SourceMap};
use log::debug;

use crate::error::CompileError;
use crate::ir::{Call, Function, FunctionKind, Ir, Rescue, Slot, Target, Var};

/// A compiled unit: one code buffer holding the top-level body with every
/// nested body inline.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub code: Vec<u8>,
    pub source_map: SourceMap,
}

pub fn emit(top: &Function) -> Result<Program, CompileError> {
    let mut b = Builder::new();
    function(&mut b, top)?;
    let (code, source_map) = b.into_parts();
    bytecode::verify::verify(&code)?;
    debug!("emitted {} bytes, {} source marks", code.len(), source_map.marks().len());
    Ok(Program { code, source_map })
}

fn sub(ir: &Ir) -> Result<Builder, CompileError> {
    let mut b = Builder::new();
    expr(&mut b, ir)?;
    Ok(b)
}

fn function(b: &mut Builder, f: &Function) -> Result<(), CompileError> {
    if f.env_size > 0 {
        b.uint(Op::AllocEnv, u64::from(f.env_size));
    }
    if f.binds_args() {
        b.bytes(Op::BindArgs, &f.params.bind.list.encode());
        store_all(b, &f.params.bind.targets)?;
    }
    for (var, default) in &f.params.defaults {
        get_var(b, var)?;
        let mut fill = sub(default)?;
        set_var(&mut fill, var)?;
        b.jump(Op::JumpIfDefined, fill.len());
        b.append(fill);
    }
    match f.kind {
        FunctionKind::Block | FunctionKind::Lambda => b.redo_scope(sub(&f.body)?),
        _ => expr(b, &f.body)?,
    }
    Ok(())
}

fn get_var(b: &mut Builder, var: &Var) -> Result<(), CompileError> {
    match var.slot {
        Slot::Direct(index) => b.uint(Op::GetLocal, u64::from(index)),
        Slot::Indirect { depth, index } => b.get_env(depth, index),
        Slot::Unresolved | Slot::Frame { .. } => {
            return Err(CompileError::Unresolved(var.name.clone()));
        }
    }
    Ok(())
}

fn set_var(b: &mut Builder, var: &Var) -> Result<(), CompileError> {
    match var.slot {
        Slot::Direct(index) => b.uint(Op::SetLocal, u64::from(index)),
        Slot::Indirect { depth, index } => b.set_env(depth, index),
        Slot::Unresolved | Slot::Frame { .. } => {
            return Err(CompileError::Unresolved(var.name.clone()));
        }
    }
    Ok(())
}

/// Store the values pushed by `bind_args` / `bind_array`, last one first.
fn store_all(b: &mut Builder, targets: &[Target]) -> Result<(), CompileError> {
    for target in targets.iter().rev() {
        store(b, target)?;
    }
    Ok(())
}

fn store(b: &mut Builder, target: &Target) -> Result<(), CompileError> {
    match target {
        Target::Var(var) => set_var(b, var)?,
        Target::Ivar(name) => b.bytes(Op::SetIvar, name.as_bytes()),
        Target::Global(name) => b.bytes(Op::SetGlobal, name.as_bytes()),
        Target::Const(name) => b.bytes(Op::SetConst, name.as_bytes()),
        Target::Discard => b.op(Op::Pop),
        Target::Nested(nested) => {
            b.bytes(Op::BindArray, &nested.list.encode());
            store_all(b, &nested.targets)?;
        }
    }
    Ok(())
}

/// Evaluate `ir` for its side effects only.
fn effect(b: &mut Builder, ir: &Ir) -> Result<(), CompileError> {
    match ir {
        Ir::SetVar(var, value) => {
            expr(b, value)?;
            set_var(b, var)?;
        }
        Ir::SetIvar(name, value) => assign(b, Op::SetIvar, name, value, false)?,
        Ir::SetGlobal(name, value) => assign(b, Op::SetGlobal, name, value, false)?,
        Ir::SetConst(name, value) => assign(b, Op::SetConst, name, value, false)?,
        Ir::Located(pos, inner) => {
            b.mark(pos.line, pos.column);
            effect(b, inner)?;
        }
        _ => {
            expr(b, ir)?;
            b.op(Op::Pop);
        }
    }
    Ok(())
}

fn assign(b: &mut Builder, op: Op, name: &str, value: &Ir, keep: bool) -> Result<(), CompileError> {
    expr(b, value)?;
    if keep {
        b.op(Op::Dup);
    }
    b.bytes(op, name.as_bytes());
    Ok(())
}

fn call(b: &mut Builder, call: &Call) -> Result<(), CompileError> {
    if let Some(receiver) = &call.receiver {
        expr(b, receiver)?;
    }
    for arg in &call.args {
        expr(b, arg)?;
    }
    if let Some(kwargs) = &call.kwargs {
        expr(b, kwargs)?;
    }
    if let Some(block) = &call.block {
        expr(b, block)?;
    }
    let argc = call.args.len() + call.kwargs.is_some() as usize;
    b.uint(Op::PushArgc, argc as u64);
    b.send(&call.message, call.flags());
    Ok(())
}

/// `value; dup; jump_(if|unless) end; pop; rhs` for `and` / `or`.
fn short_circuit(b: &mut Builder, jump: Op, lhs: &Ir, rhs: &Ir) -> Result<(), CompileError> {
    expr(b, lhs)?;
    b.op(Op::Dup);
    let rhs = sub(rhs)?;
    b.jump(jump, rhs.len() + 1);
    b.op(Op::Pop);
    b.append(rhs);
    Ok(())
}

/// `test; <jump> over-then; then; jump over-else; else`.
fn branch(b: &mut Builder, jump: Op, then: &Ir, else_: &Ir) -> Result<(), CompileError> {
    let then = sub(then)?;
    let else_ = sub(else_)?;
    b.jump(jump, then.len() + Builder::jump_len(else_.len()));
    b.append(then);
    b.jump(Op::Jump, else_.len());
    b.append(else_);
    Ok(())
}

fn protect(
    b: &mut Builder,
    body: &Ir,
    rescue: Option<&Rescue>,
    else_: Option<&Ir>,
    ensure: Option<&Ir>,
) -> Result<(), CompileError> {
    let body = sub(body)?;
    let mut handler = Builder::new();
    if let Some(rescue) = rescue {
        set_var(&mut handler, &rescue.var)?;
        expr(&mut handler, &rescue.handler)?;
    }
    let else_ = else_.map(sub).transpose()?.unwrap_or_default();
    let ensure = ensure.map(sub).transpose()?.unwrap_or_default();
    b.protect(body, handler, else_, ensure);
    Ok(())
}

fn expr(b: &mut Builder, ir: &Ir) -> Result<(), CompileError> {
    match ir {
        Ir::Nil => b.op(Op::PushNil),
        Ir::True => b.op(Op::PushTrue),
        Ir::False => b.op(Op::PushFalse),
        Ir::SelfRef => b.op(Op::PushSelf),
        Ir::Int(i) => b.push_int(*i),
        Ir::Float(x) => b.push_float(*x),
        Ir::Str(s) => b.bytes(Op::PushString, s.as_bytes()),
        Ir::Sym(s) => b.bytes(Op::PushSymbol, s.as_bytes()),
        Ir::Interpolate(parts) => {
            for part in parts {
                expr(b, part)?;
            }
            b.uint(Op::Interpolate, parts.len() as u64);
        }
        Ir::Array(items) => {
            for item in items {
                expr(b, item)?;
            }
            b.uint(Op::CreateArray, items.len() as u64);
        }
        Ir::ArrayConcat(head, tail) => {
            expr(b, head)?;
            expr(b, tail)?;
            b.op(Op::ArrayConcat);
        }
        Ir::Splat(value) => {
            expr(b, value)?;
            b.op(Op::Splat);
        }
        Ir::Hash(pairs) => {
            for (key, value) in pairs {
                expr(b, key)?;
                expr(b, value)?;
            }
            b.uint(Op::CreateHash, pairs.len() as u64);
        }
        Ir::HashMerge(base, other) => {
            expr(b, base)?;
            expr(b, other)?;
            b.op(Op::HashMerge);
        }
        Ir::Seq(items) => match items.split_last() {
            Some((last, init)) => {
                for item in init {
                    effect(b, item)?;
                }
                expr(b, last)?;
            }
            None => b.op(Op::PushNil),
        },
        Ir::GetVar(var) => get_var(b, var)?,
        Ir::SetVar(var, value) => {
            expr(b, value)?;
            b.op(Op::Dup);
            set_var(b, var)?;
        }
        Ir::GetIvar(name) => b.bytes(Op::GetIvar, name.as_bytes()),
        Ir::SetIvar(name, value) => assign(b, Op::SetIvar, name, value, true)?,
        Ir::GetGlobal(name) => b.bytes(Op::GetGlobal, name.as_bytes()),
        Ir::SetGlobal(name, value) => assign(b, Op::SetGlobal, name, value, true)?,
        Ir::GetConst(name) => b.bytes(Op::GetConst, name.as_bytes()),
        Ir::SetConst(name, value) => assign(b, Op::SetConst, name, value, true)?,
        Ir::If(cond, then, else_) => {
            expr(b, cond)?;
            branch(b, Op::JumpUnless, then, else_)?;
        }
        Ir::IfNil(subject, if_nil, otherwise) => {
            expr(b, subject)?;
            branch(b, Op::JumpIfNil, otherwise, if_nil)?;
        }
        Ir::And(lhs, rhs) => short_circuit(b, Op::JumpUnless, lhs, rhs)?,
        Ir::Or(lhs, rhs) => short_circuit(b, Op::JumpIf, lhs, rhs)?,
        Ir::While { cond, body, until, body_first } => {
            b.loop_region(*until, *body_first, sub(cond)?, sub(body)?);
        }
        Ir::Call(c) => call(b, c)?,
        Ir::Yield { args, flattened, kwargs } => {
            for arg in args {
                expr(b, arg)?;
            }
            if let Some(kwargs) = kwargs {
                expr(b, kwargs)?;
            }
            let argc = args.len() + kwargs.is_some() as usize;
            b.uint(Op::PushArgc, argc as u64);
            b.emit(
                Op::Yield,
                &[bytecode::Operand::Flags([false, false, *flattened, kwargs.is_some()])],
            );
        }
        Ir::BlockGiven => b.op(Op::BlockGiven),
        Ir::Closure(f) => {
            let mut body = Builder::new();
            function(&mut body, f)?;
            b.define_block(f.kind == FunctionKind::Lambda, body);
        }
        Ir::DefMethod(f) => {
            let mut body = Builder::new();
            function(&mut body, f)?;
            b.define_method(&f.name, body);
        }
        Ir::DefClass { name, superclass, module, body } => {
            if let Some(superclass) = superclass {
                expr(b, superclass)?;
            }
            let mut code = Builder::new();
            function(&mut code, body)?;
            b.define_class(name, superclass.is_some(), *module, code);
        }
        Ir::MultiAssign { value, pattern } => {
            expr(b, value)?;
            b.op(Op::Dup);
            b.bytes(Op::BindArray, &pattern.list.encode());
            store_all(b, &pattern.targets)?;
        }
        Ir::Protect { body, rescue, else_, ensure } => {
            protect(b, body, rescue.as_deref(), else_.as_deref(), ensure.as_deref())?;
        }
        Ir::Return(value) => terminate(b, Op::Return, value)?,
        Ir::Break(value) => terminate(b, Op::Break, value)?,
        Ir::LoopBreak(value) => terminate(b, Op::LoopBreak, value)?,
        Ir::Next(value) => terminate(b, Op::Next, value)?,
        Ir::Reraise(exception) => terminate(b, Op::Reraise, exception)?,
        Ir::Redo => b.op(Op::Redo),
        Ir::Retry => b.op(Op::Retry),
        Ir::RescueMatch { matchers, exception } => {
            expr(b, matchers)?;
            expr(b, exception)?;
            b.op(Op::RescueMatch);
        }
        Ir::Located(pos, inner) => {
            b.mark(pos.line, pos.column);
            expr(b, inner)?;
        }
    }
    Ok(())
}

fn terminate(b: &mut Builder, op: Op, value: &Ir) -> Result<(), CompileError> {
    expr(b, value)?;
    b.op(op);
    Ok(())
}

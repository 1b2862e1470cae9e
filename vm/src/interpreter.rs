//! The bytecode interpreter.
//!
//! Execution is structured. A function body, a loop part or a protected
//! part is a *region*, run by [`Vm::run_region`] against the shared operand
//! stack; a region must finish holding exactly one value more than it
//! started with. Non-local exits travel outward as `Err(Unwind)` and every
//! region or frame catches only what is addressed to it.

use std::ops::Range;
use std::sync::Arc;

use bytecode::verify::MAX_SLOTS;
use bytecode::{ArgList, DecodeError, Instruction, Op, SourceMap, decode_at};
use log::{debug, trace};

use crate::bind::{self, Args, Strictness};
use crate::context::Context;
use crate::dispatch::{Call, Dispatch, ErrorKind};
use crate::env::Env;
use crate::fiber::Link;
use crate::interrupt::InterruptHandle;
use crate::unwind::{Fault, Raised, Unwind, VmError};
use crate::value::{Closure, FrameId, HashTable, MethodBody, Proc, Unit, Value};

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Frame depth at which calls raise `SystemStackError`.
    pub max_depth: usize,
    /// Bytes of native stack guest calls may use, measured from the
    /// outermost frame, before raising `SystemStackError`. Must stay below
    /// the stack size of the thread running the VM.
    pub native_stack: usize,
    /// Log every executed instruction at trace level.
    pub trace: bool,
}

/// Fits the 2 MiB default of spawned threads with room to unwind.
pub const DEFAULT_NATIVE_STACK: usize = 1024 * 1024;

impl Default for VmConfig {
    fn default() -> Self {
        Self { max_depth: 1000, native_stack: DEFAULT_NATIVE_STACK, trace: false }
    }
}

/// Address of a local in a fresh frame, for measuring native stack use.
#[inline(never)]
fn native_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Top,
    Method,
    Block,
    Lambda,
    Class,
}

#[derive(Debug)]
struct Frame {
    id: FrameId,
    kind: FrameKind,
    name: String,
    unit: Arc<Unit>,
    self_value: Value,
    /// Where `def` puts methods and constants are looked up.
    definee: Value,
    locals: Vec<Value>,
    env: Option<Arc<Env>>,
    /// Incoming arguments, consumed by `bind_args`.
    args: Args,
    yield_block: Option<Arc<Proc>>,
    /// Target of `return`.
    home: FrameId,
    /// Defining frame and id of a non-lambda block, for `break`.
    break_target: Option<(FrameId, u64)>,
    pc: usize,
}

impl Frame {
    fn new(
        id: FrameId,
        kind: FrameKind,
        name: impl Into<String>,
        unit: Arc<Unit>,
        self_value: Value,
        definee: Value,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            unit,
            self_value,
            definee,
            locals: Vec::new(),
            env: None,
            args: Args::default(),
            yield_block: None,
            home: id,
            break_target: None,
            pc: 0,
        }
    }
}

/// Position of the instruction being executed within its region.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    pc: usize,
    next: usize,
    /// Operand stack depth at region entry.
    base: usize,
    end: usize,
}

pub struct Vm {
    dispatch: Arc<dyn Dispatch>,
    context: Arc<Context>,
    config: VmConfig,
    stack: Vec<Value>,
    /// Stands in when no frame is active, so host calls always have a self.
    root: Frame,
    frames: Vec<Frame>,
    interrupt: InterruptHandle,
    link: Option<Arc<Link>>,
    /// Exceptions whose rescue bodies are running, innermost last.
    handled: Vec<Raised>,
    /// Native stack position of the outermost frame.
    native_origin: usize,
    /// Ids of the blocks carried by sends still in progress.
    carried: Vec<u64>,
}

impl Vm {
    pub fn new(dispatch: Arc<dyn Dispatch>, context: Arc<Context>, config: VmConfig) -> Self {
        let main = dispatch.main_object();
        let unit = Arc::new(Unit::new("<root>", Vec::new(), SourceMap::new()));
        Self {
            dispatch,
            context,
            config,
            stack: Vec::with_capacity(256),
            root: Frame::new(0, FrameKind::Top, "<root>", unit, main, Value::Nil),
            frames: Vec::new(),
            interrupt: InterruptHandle::new(),
            link: None,
            handled: Vec::new(),
            native_origin: 0,
            carried: Vec::new(),
        }
    }

    pub(crate) fn for_fiber(
        dispatch: Arc<dyn Dispatch>,
        context: Arc<Context>,
        config: VmConfig,
        link: Arc<Link>,
    ) -> Self {
        let mut vm = Self::new(dispatch, context, config);
        vm.link = Some(link);
        vm
    }

    pub fn dispatch(&self) -> &Arc<dyn Dispatch> {
        &self.dispatch
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Whether this VM drives a fiber rather than the root stack.
    pub fn in_fiber(&self) -> bool {
        self.link.is_some()
    }

    /// `self` of the innermost frame.
    pub fn current_self(&self) -> Value {
        self.frame().self_value.clone()
    }

    fn frame(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.root)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn is_live(&self, id: FrameId) -> bool {
        self.frames.iter().rev().any(|frame| frame.id == id)
    }

    /// Run a whole unit as the top-level body with `receiver` as self.
    pub fn run(&mut self, unit: Arc<Unit>, receiver: Value) -> Result<Value, VmError> {
        debug!("running {} ({} bytes)", unit.name, unit.code.len());
        let end = unit.code.len();
        let id = self.context.next_frame_id();
        let frame = Frame::new(id, FrameKind::Top, "<main>", unit, receiver, Value::Nil);
        let result = self.enter(frame, 0, end);
        self.stack.clear();
        result.map_err(VmError::from)
    }

    /// Run a method body for `call`. `definee` is the class the method was
    /// found in.
    pub fn invoke_method(
        &mut self,
        method: &MethodBody,
        definee: Value,
        call: Call,
    ) -> Result<Value, Unwind> {
        let id = self.context.next_frame_id();
        let mut frame = Frame::new(
            id,
            FrameKind::Method,
            method.name.as_str(),
            Arc::clone(&method.unit),
            call.receiver,
            definee,
        );
        frame.yield_block = call.block.clone();
        frame.args = Args { positional: call.args, kwargs: call.kwargs, block: call.block };
        self.enter(frame, method.start, method.end)
    }

    pub fn call_block(&mut self, block: &Arc<Proc>, args: Args) -> Result<Value, Unwind> {
        match &**block {
            Proc::Closure(closure) => self.call_closure(closure, args),
            Proc::Symbol(name) => {
                let mut positional = args.positional.into_iter();
                let Some(receiver) = positional.next() else {
                    return Err(self.error(ErrorKind::Argument, "no receiver given"));
                };
                self.dispatch_call(Call {
                    receiver,
                    message: name.to_string(),
                    args: positional.collect(),
                    kwargs: args.kwargs,
                    block: args.block,
                    implicit_self: false,
                })
            }
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Args) -> Result<Value, Unwind> {
        let id = self.context.next_frame_id();
        let kind = if closure.lambda { FrameKind::Lambda } else { FrameKind::Block };
        let mut frame = Frame::new(
            id,
            kind,
            closure.name.as_str(),
            Arc::clone(&closure.unit),
            closure.self_value.clone(),
            closure.definee.clone(),
        );
        frame.env = closure.env.clone();
        frame.args = args;
        frame.yield_block = closure.outer_block.clone();
        if !closure.lambda {
            frame.home = closure.home;
            frame.break_target = Some((closure.defining_frame, closure.id));
        }
        self.enter(frame, closure.start, closure.end)
    }

    /// Explicit-receiver send from host code.
    pub fn send(
        &mut self,
        receiver: Value,
        message: &str,
        args: Vec<Value>,
        block: Option<Arc<Proc>>,
    ) -> Result<Value, Unwind> {
        self.dispatch_call(Call::new(receiver, message, args).with_block(block))
    }

    fn dispatch_call(&mut self, call: Call) -> Result<Value, Unwind> {
        let dispatch = Arc::clone(&self.dispatch);
        dispatch.dispatch(self, call)
    }

    /// Start propagating `exception` from the current position.
    pub fn raise(&self, exception: Value) -> Unwind {
        let backtrace = self.backtrace();
        self.dispatch.record_backtrace(&exception, &backtrace);
        Unwind::Raise(Box::new(Raised { exception, backtrace }))
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Unwind {
        let exception = self.dispatch.new_error(kind, message.into());
        self.raise(exception)
    }

    /// One `unit:line:in 'name'` entry per live frame, innermost first.
    pub fn backtrace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let line = frame.unit.source_map.lookup(frame.pc).map_or(0, |(line, _)| line);
                format!("{}:{}:in '{}'", frame.unit.name, line, frame.name)
            })
            .collect()
    }

    /// Suspend the running fiber, handing `value` to its resumer. Returns
    /// what the next `resume` passes in.
    pub fn fiber_yield(&mut self, value: Value) -> Result<Value, Unwind> {
        let Some(link) = self.link.clone() else {
            return Err(self.error(ErrorKind::Fiber, "can't yield from root fiber"));
        };
        let mut args = link.suspend(value)?;
        Ok(match args.len() {
            0 => Value::Nil,
            1 => args.pop().unwrap_or_default(),
            _ => Value::array(args),
        })
    }

    fn enter(&mut self, frame: Frame, start: usize, end: usize) -> Result<Value, Unwind> {
        let here = native_position();
        if self.frames.is_empty() {
            self.native_origin = here;
        }
        if self.frames.len() >= self.config.max_depth
            || self.native_origin.abs_diff(here) > self.config.native_stack
        {
            return Err(self.error(ErrorKind::SystemStack, "stack level too deep"));
        }
        let unit = Arc::clone(&frame.unit);
        if start > end || end > unit.code.len() {
            return Err(Fault::RegionOverrun { pc: start }.into());
        }
        let (id, kind) = (frame.id, frame.kind);
        self.frames.push(frame);
        let result = self.run_region(&unit, start..end, None);
        self.frames.pop();
        match result {
            Err(Unwind::Return { target, value }) if target == id => Ok(value),
            Err(Unwind::Next(value)) if matches!(kind, FrameKind::Block | FrameKind::Lambda) => {
                Ok(value)
            }
            Err(Unwind::Next(_)) => Err(Fault::StrayJump("next").into()),
            Err(Unwind::LoopBreak(_)) => Err(Fault::StrayJump("break").into()),
            Err(Unwind::Redo) => Err(Fault::StrayJump("redo").into()),
            Err(Unwind::Retry) => Err(Fault::StrayJump("retry").into()),
            other => other,
        }
    }

    /// Run `range` of `unit`, optionally with `entry` already pushed, and
    /// return the one value it leaves.
    fn run_region(
        &mut self,
        unit: &Arc<Unit>,
        range: Range<usize>,
        entry: Option<Value>,
    ) -> Result<Value, Unwind> {
        let base = self.stack.len();
        let start = range.start;
        self.stack.extend(entry);
        match self.exec(unit, range, base) {
            Ok(()) if self.stack.len() == base + 1 => Ok(self.stack.pop().unwrap_or_default()),
            Ok(()) => {
                let depth = self.stack.len() - base;
                self.stack.truncate(base);
                Err(Fault::Unbalanced { pc: start, depth }.into())
            }
            Err(unwind) => {
                self.stack.truncate(base);
                Err(unwind)
            }
        }
    }

    fn exec(&mut self, unit: &Arc<Unit>, range: Range<usize>, base: usize) -> Result<(), Unwind> {
        let code = unit
            .code
            .get(..range.end)
            .ok_or(Fault::RegionOverrun { pc: range.start })?;
        let mut pc = range.start;
        while pc < range.end {
            if self.interrupt.is_pending() {
                self.check_interrupt()?;
            }
            let (insn, next) = decode_at(code, pc)?;
            self.frame_mut().pc = pc;
            if self.config.trace {
                trace!("{pc:>6}  {insn}");
            }
            pc = self.step(unit, &insn, Cursor { pc, next, base, end: range.end })?;
        }
        Ok(())
    }

    fn check_interrupt(&mut self) -> Result<(), Unwind> {
        match self.interrupt.take() {
            Some(exception) => {
                debug!("interrupt delivered");
                Err(self.raise(exception))
            }
            None => Ok(()),
        }
    }

    /// Execute one instruction and return the pc to continue at.
    fn step(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<usize, Unwind> {
        let value = match insn.op {
            Op::Nop => return Ok(at.next),
            Op::Pop => {
                self.pop(at)?;
                return Ok(at.next);
            }
            Op::Dup => self.peek(at)?,
            Op::PushNil => Value::Nil,
            Op::PushTrue => Value::Bool(true),
            Op::PushFalse => Value::Bool(false),
            Op::PushSelf => self.frame().self_value.clone(),
            Op::PushInt => Value::Integer(
                i64::try_from(insn.uint(0)).map_err(|_| DecodeError::Overlong { offset: at.pc })?,
            ),
            Op::PushNegInt => Value::Integer(
                0i64.checked_sub_unsigned(insn.uint(0))
                    .ok_or(DecodeError::Overlong { offset: at.pc })?,
            ),
            Op::PushFloat => {
                let raw = <[u8; 8]>::try_from(insn.bytes(0))
                    .map_err(|_| DecodeError::Truncated { offset: at.pc })?;
                Value::Float(f64::from_le_bytes(raw))
            }
            Op::PushString => Value::string(String::from_utf8_lossy(insn.bytes(0))),
            Op::PushSymbol => Value::Symbol(self.context.intern(name(insn.bytes(0), at)?)),
            Op::PushArgc => Value::Integer(
                i64::try_from(insn.uint(0)).map_err(|_| Fault::BadArgc { pc: at.pc })?,
            ),
            Op::Send => self.op_send(insn, at)?,
            Op::Yield => self.op_yield(insn, at)?,
            Op::BlockGiven => Value::Bool(self.frame().yield_block.is_some()),
            Op::CreateArray => {
                let n = count(insn.uint(0), at)?;
                Value::array(self.pop_n(n, at)?)
            }
            Op::CreateHash => self.op_create_hash(insn.uint(0), at)?,
            Op::ArrayConcat => {
                let tail = self.pop(at)?;
                let head = self.pop(at)?;
                let mut items = bind::destructure_source(&head);
                items.extend(bind::destructure_source(&tail));
                Value::array(items)
            }
            Op::Splat => {
                let value = self.pop(at)?;
                splat(value)
            }
            Op::HashMerge => self.op_hash_merge(at)?,
            Op::Interpolate => self.op_interpolate(insn.uint(0), at)?,
            Op::GetLocal => {
                let index = slot(insn.uint(0), at)?;
                self.frame().locals.get(index).cloned().unwrap_or_default()
            }
            Op::SetLocal => {
                let value = self.pop(at)?;
                let index = slot(insn.uint(0), at)?;
                let locals = &mut self.frame_mut().locals;
                if locals.len() <= index {
                    locals.resize(index + 1, Value::Nil);
                }
                locals[index] = value;
                return Ok(at.next);
            }
            Op::GetEnv => {
                let (depth, index) = (insn.uint(0), insn.uint(1));
                self.frame()
                    .env
                    .as_ref()
                    .and_then(|env| env.get(depth, index))
                    .ok_or(Fault::BadEnv { depth, index, pc: at.pc })?
            }
            Op::SetEnv => {
                let value = self.pop(at)?;
                let (depth, index) = (insn.uint(0), insn.uint(1));
                let stored = self.frame().env.as_ref().is_some_and(|env| env.set(depth, index, value));
                if !stored {
                    return Err(Fault::BadEnv { depth, index, pc: at.pc }.into());
                }
                return Ok(at.next);
            }
            Op::AllocEnv => {
                let size = slot(insn.uint(0), at)?;
                let frame = self.frame_mut();
                frame.env = Some(Env::new(size, frame.env.take()));
                return Ok(at.next);
            }
            Op::GetIvar => {
                let receiver = self.frame().self_value.clone();
                let dispatch = Arc::clone(&self.dispatch);
                dispatch.ivar_get(self, &receiver, name(insn.bytes(0), at)?)?
            }
            Op::SetIvar => {
                let value = self.pop(at)?;
                let receiver = self.frame().self_value.clone();
                let dispatch = Arc::clone(&self.dispatch);
                dispatch.ivar_set(self, &receiver, name(insn.bytes(0), at)?, value)?;
                return Ok(at.next);
            }
            Op::GetGlobal => self.context.global(name(insn.bytes(0), at)?),
            Op::SetGlobal => {
                let value = self.pop(at)?;
                self.context.set_global(name(insn.bytes(0), at)?, value);
                return Ok(at.next);
            }
            Op::GetConst => {
                let definee = self.frame().definee.clone();
                let dispatch = Arc::clone(&self.dispatch);
                dispatch.get_constant(self, &definee, name(insn.bytes(0), at)?)?
            }
            Op::SetConst => {
                let value = self.pop(at)?;
                let definee = self.frame().definee.clone();
                let dispatch = Arc::clone(&self.dispatch);
                dispatch.set_constant(self, &definee, name(insn.bytes(0), at)?, value)?;
                return Ok(at.next);
            }
            Op::Jump => return jump(insn, at),
            Op::JumpIf | Op::JumpUnless | Op::JumpIfNil | Op::JumpIfDefined => {
                let value = self.pop(at)?;
                let taken = match insn.op {
                    Op::JumpIf => value.is_truthy(),
                    Op::JumpUnless => !value.is_truthy(),
                    Op::JumpIfNil => value.is_nil(),
                    _ => !matches!(value, Value::Undefined),
                };
                return if taken { jump(insn, at) } else { Ok(at.next) };
            }
            Op::Loop => {
                let (value, next) = self.op_loop(unit, insn, at)?;
                self.stack.push(value);
                return Ok(next);
            }
            Op::RedoScope => {
                let body = sub_range(at.next, insn.uint(0), at)?;
                let next = body.end;
                let value = loop {
                    match self.run_region(unit, body.clone(), None) {
                        Err(Unwind::Redo) => continue,
                        other => break other?,
                    }
                };
                self.stack.push(value);
                return Ok(next);
            }
            Op::Protect => {
                let (value, next) = self.op_protect(unit, insn, at)?;
                self.stack.push(value);
                return Ok(next);
            }
            Op::RescueMatch => self.op_rescue_match(at)?,
            Op::Reraise => {
                let exception = self.pop(at)?;
                return Err(self.reraise(exception));
            }
            Op::Return => {
                let value = self.pop(at)?;
                return Err(self.op_return(value));
            }
            Op::Break => {
                let value = self.pop(at)?;
                return Err(self.op_break(value));
            }
            Op::LoopBreak => return Err(Unwind::LoopBreak(self.pop(at)?)),
            Op::Next => return Err(Unwind::Next(self.pop(at)?)),
            Op::Redo => return Err(Unwind::Redo),
            Op::Retry => return Err(Unwind::Retry),
            Op::BindArgs => {
                self.op_bind_args(insn)?;
                return Ok(at.next);
            }
            Op::BindArray => {
                let source = self.pop(at)?;
                let list = ArgList::decode(insn.bytes(0))?;
                let args = Args { positional: bind::destructure_source(&source), ..Args::default() };
                let values = bind::bind(&list, args, Strictness::Lenient)
                    .map_err(|err| self.error(ErrorKind::Argument, err.to_string()))?;
                self.stack.extend(values);
                return Ok(at.next);
            }
            Op::DefineMethod => return self.op_define_method(unit, insn, at),
            Op::DefineBlock => return self.op_define_block(unit, insn, at),
            Op::DefineClass => return self.op_define_class(unit, insn, at),
        };
        self.stack.push(value);
        Ok(at.next)
    }

    fn pop(&mut self, at: Cursor) -> Result<Value, Unwind> {
        if self.stack.len() > at.base {
            if let Some(value) = self.stack.pop() {
                return Ok(value);
            }
        }
        Err(Fault::StackUnderflow { pc: at.pc }.into())
    }

    fn peek(&self, at: Cursor) -> Result<Value, Unwind> {
        if self.stack.len() > at.base {
            if let Some(value) = self.stack.last() {
                return Ok(value.clone());
            }
        }
        Err(Fault::StackUnderflow { pc: at.pc }.into())
    }

    /// The top `n` values in push order.
    fn pop_n(&mut self, n: usize, at: Cursor) -> Result<Vec<Value>, Unwind> {
        if self.stack.len() < at.base + n {
            return Err(Fault::StackUnderflow { pc: at.pc }.into());
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_argc(&mut self, at: Cursor) -> Result<usize, Unwind> {
        match self.pop(at)? {
            Value::Integer(n) => usize::try_from(n).map_err(|_| Fault::BadArgc { pc: at.pc }.into()),
            _ => Err(Fault::BadArgc { pc: at.pc }.into()),
        }
    }

    /// Pop `argc` arguments, splitting off the keyword hash and spreading a
    /// pre-flattened array.
    fn pop_args(
        &mut self,
        argc: usize,
        flattened: bool,
        has_kwargs: bool,
        at: Cursor,
    ) -> Result<(Vec<Value>, Option<Value>), Unwind> {
        let mut args = self.pop_n(argc, at)?;
        let kwargs = if has_kwargs {
            args.pop().filter(|kwargs| !is_empty_hash(kwargs))
        } else {
            None
        };
        if flattened {
            args = match args.as_slice() {
                [Value::Array(items)] => items.lock().clone(),
                _ => return Err(Fault::BadSplat { pc: at.pc }.into()),
            };
        }
        Ok((args, kwargs))
    }

    fn op_send(&mut self, insn: &Instruction<'_>, at: Cursor) -> Result<Value, Unwind> {
        let message = name(insn.bytes(0), at)?;
        let [implicit_self, has_block, flattened, has_kwargs] = insn.flags(1);
        let argc = self.pop_argc(at)?;
        let block = if has_block {
            let value = self.pop(at)?;
            self.to_block(value)?
        } else {
            None
        };
        let (args, kwargs) = self.pop_args(argc, flattened, has_kwargs, at)?;
        let receiver = if implicit_self { self.frame().self_value.clone() } else { self.pop(at)? };
        let caller = self.frame().id;
        let carried = block.as_deref().and_then(|block| match block {
            Proc::Closure(closure) => Some(closure.id),
            Proc::Symbol(_) => None,
        });
        let call = Call {
            receiver,
            message: message.to_string(),
            args,
            kwargs,
            block,
            implicit_self,
        };
        let Some(id) = carried else {
            return self.dispatch_call(call);
        };
        self.carried.push(id);
        let result = self.dispatch_call(call);
        self.carried.pop();
        match result {
            Err(Unwind::Break { target, block, value }) if target == caller && block == id => Ok(value),
            other => other,
        }
    }

    fn to_block(&mut self, value: Value) -> Result<Option<Arc<Proc>>, Unwind> {
        match value {
            Value::Nil => Ok(None),
            Value::Proc(block) => Ok(Some(block)),
            Value::Symbol(name) => Ok(Some(Arc::new(Proc::Symbol(name)))),
            other => match self.send(other.clone(), "to_proc", Vec::new(), None)? {
                Value::Proc(block) => Ok(Some(block)),
                _ => Err(self.error(
                    ErrorKind::Type,
                    format!("wrong argument type {} (expected Proc)", other.describe()),
                )),
            },
        }
    }

    fn op_yield(&mut self, insn: &Instruction<'_>, at: Cursor) -> Result<Value, Unwind> {
        let [_, _, flattened, has_kwargs] = insn.flags(0);
        let argc = self.pop_argc(at)?;
        let (positional, kwargs) = self.pop_args(argc, flattened, has_kwargs, at)?;
        let Some(block) = self.frame().yield_block.clone() else {
            return Err(self.error(ErrorKind::LocalJump, "no block given (yield)"));
        };
        self.call_block(&block, Args { positional, kwargs, block: None })
    }

    fn op_create_hash(&mut self, pairs: u64, at: Cursor) -> Result<Value, Unwind> {
        let n = count(pairs, at)?
            .checked_mul(2)
            .ok_or(Fault::StackUnderflow { pc: at.pc })?;
        let mut items = self.pop_n(n, at)?.into_iter();
        let mut table = HashTable::new();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            table.insert(key, value);
        }
        Ok(Value::hash(table))
    }

    fn op_hash_merge(&mut self, at: Cursor) -> Result<Value, Unwind> {
        let other = self.pop(at)?;
        let base = self.pop(at)?;
        let mut table = match &base {
            Value::Hash(table) => table.lock().clone(),
            _ => HashTable::new(),
        };
        match &other {
            Value::Nil => {}
            Value::Hash(extra) => {
                let extra = extra.lock().clone();
                for (key, value) in extra.iter() {
                    table.insert(key.clone(), value.clone());
                }
            }
            _ => {
                return Err(self.error(
                    ErrorKind::Type,
                    format!("no implicit conversion of {} into Hash", other.describe()),
                ));
            }
        }
        Ok(Value::hash(table))
    }

    fn op_interpolate(&mut self, n: u64, at: Cursor) -> Result<Value, Unwind> {
        let n = count(n, at)?;
        let parts = self.pop_n(n, at)?;
        let mut out = String::new();
        for part in parts {
            let text = if matches!(part, Value::String(_)) {
                part
            } else {
                self.send(part, "to_s", Vec::new(), None)?
            };
            match &text {
                Value::String(s) => out.push_str(&s.lock()),
                other => out.push_str(&other.describe()),
            }
        }
        Ok(Value::string(out))
    }

    fn op_loop(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<(Value, usize), Unwind> {
        let [until, body_first, ..] = insn.flags(0);
        let cond = sub_range(at.next, insn.uint(1), at)?;
        let body = sub_range(cond.end, insn.uint(2), at)?;
        let next = body.end;
        let mut check = !body_first;
        loop {
            if check {
                let test = self.run_region(unit, cond.clone(), None)?;
                if test.is_truthy() == until {
                    return Ok((Value::Nil, next));
                }
            }
            check = true;
            match self.run_region(unit, body.clone(), None) {
                Ok(_) | Err(Unwind::Next(_)) => {}
                Err(Unwind::LoopBreak(value)) => return Ok((value, next)),
                Err(Unwind::Redo) => check = false,
                Err(unwind) => return Err(unwind),
            }
        }
    }

    fn op_protect(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<(Value, usize), Unwind> {
        let body = sub_range(at.next, insn.uint(0), at)?;
        let rescue = sub_range(body.end, insn.uint(1), at)?;
        let else_ = sub_range(rescue.end, insn.uint(2), at)?;
        let ensure = sub_range(else_.end, insn.uint(3), at)?;
        let next = ensure.end;
        let outcome = self.rescued(unit, body, rescue, else_);
        if !ensure.is_empty() && !matches!(outcome, Err(Unwind::Fault(_))) {
            // A transfer out of the ensure body replaces the outcome.
            self.run_region(unit, ensure, None)?;
        }
        outcome.map(|value| (value, next))
    }

    fn rescued(
        &mut self,
        unit: &Arc<Unit>,
        body: Range<usize>,
        rescue: Range<usize>,
        else_: Range<usize>,
    ) -> Result<Value, Unwind> {
        loop {
            let raised = match self.run_region(unit, body.clone(), None) {
                Ok(value) if else_.is_empty() => return Ok(value),
                Ok(_) => return self.run_region(unit, else_, None),
                Err(Unwind::Raise(raised)) if !rescue.is_empty() => raised,
                Err(unwind) => return Err(unwind),
            };
            let exception = raised.exception.clone();
            let previous = self.context.global("$!");
            self.context.set_global("$!", exception.clone());
            self.handled.push(*raised);
            let outcome = self.run_region(unit, rescue.clone(), Some(exception));
            self.handled.pop();
            self.context.set_global("$!", previous);
            match outcome {
                Err(Unwind::Retry) => continue,
                other => return other,
            }
        }
    }

    fn op_rescue_match(&mut self, at: Cursor) -> Result<Value, Unwind> {
        let exception = self.pop(at)?;
        let matchers = self.pop(at)?;
        for matcher in bind::destructure_source(&matchers) {
            if self.send(matcher, "===", vec![exception.clone()], None)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }

    /// Re-raising the exception being handled keeps its original backtrace.
    fn reraise(&self, exception: Value) -> Unwind {
        match self.handled.last() {
            Some(raised) if raised.exception.identical(&exception) => {
                Unwind::Raise(Box::new(raised.clone()))
            }
            _ => self.raise(exception),
        }
    }

    fn op_return(&self, value: Value) -> Unwind {
        let target = self.frame().home;
        if self.is_live(target) {
            Unwind::Return { target, value }
        } else {
            self.error(ErrorKind::LocalJump, "unexpected return")
        }
    }

    fn op_break(&self, value: Value) -> Unwind {
        let frame = self.frame();
        match (frame.kind, frame.break_target) {
            (FrameKind::Lambda, _) => Unwind::Return { target: frame.id, value },
            (_, Some((target, block))) if self.carried.contains(&block) && self.is_live(target) => {
                Unwind::Break { target, block, value }
            }
            (_, Some(_)) => self.error(ErrorKind::LocalJump, "break from proc-closure"),
            (_, None) => Fault::StrayJump("break").into(),
        }
    }

    fn op_bind_args(&mut self, insn: &Instruction<'_>) -> Result<(), Unwind> {
        let list = ArgList::decode(insn.bytes(0))?;
        let frame = self.frame_mut();
        let args = std::mem::take(&mut frame.args);
        let strictness = match frame.kind {
            FrameKind::Block => Strictness::Lenient,
            _ => Strictness::Strict,
        };
        let values = bind::bind(&list, args, strictness)
            .map_err(|err| self.error(ErrorKind::Argument, err.to_string()))?;
        self.stack.extend(values);
        Ok(())
    }

    fn op_define_method(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<usize, Unwind> {
        let name = name(insn.bytes(0), at)?;
        let body = sub_range(at.next, insn.uint(1), at)?;
        let method = Arc::new(MethodBody {
            name: name.to_string(),
            unit: Arc::clone(unit),
            start: body.start,
            end: body.end,
        });
        let definee = self.frame().definee.clone();
        let dispatch = Arc::clone(&self.dispatch);
        dispatch.define_method(self, &definee, method)?;
        self.stack.push(Value::Symbol(self.context.intern(name)));
        Ok(body.end)
    }

    fn op_define_block(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<usize, Unwind> {
        let [lambda, ..] = insn.flags(0);
        let body = sub_range(at.next, insn.uint(1), at)?;
        let frame = self.frame();
        let closure = Closure {
            name: format!("block in {}", frame.name.trim_start_matches("block in ")),
            unit: Arc::clone(unit),
            start: body.start,
            end: body.end,
            env: frame.env.clone(),
            self_value: frame.self_value.clone(),
            definee: frame.definee.clone(),
            lambda,
            defining_frame: frame.id,
            id: self.context.next_frame_id(),
            home: frame.home,
            outer_block: frame.yield_block.clone(),
        };
        self.stack.push(Value::Proc(Arc::new(Proc::Closure(closure))));
        Ok(body.end)
    }

    fn op_define_class(
        &mut self,
        unit: &Arc<Unit>,
        insn: &Instruction<'_>,
        at: Cursor,
    ) -> Result<usize, Unwind> {
        let name = name(insn.bytes(0), at)?;
        let [has_superclass, module, ..] = insn.flags(1);
        let body = sub_range(at.next, insn.uint(2), at)?;
        let superclass = if has_superclass { Some(self.pop(at)?) } else { None };
        let definee = self.frame().definee.clone();
        let dispatch = Arc::clone(&self.dispatch);
        let class = dispatch.open_class(self, &definee, name, superclass, module)?;
        let id = self.context.next_frame_id();
        let frame = Frame::new(
            id,
            FrameKind::Class,
            format!("<class:{name}>"),
            Arc::clone(unit),
            class.clone(),
            class,
        );
        let value = self.enter(frame, body.start, body.end)?;
        self.stack.push(value);
        Ok(body.end)
    }
}

fn name<'a>(bytes: &'a [u8], at: Cursor) -> Result<&'a str, Unwind> {
    std::str::from_utf8(bytes).map_err(|_| Unwind::from(Fault::BadName { pc: at.pc }))
}

fn count(n: u64, at: Cursor) -> Result<usize, Unwind> {
    usize::try_from(n).map_err(|_| Unwind::from(Fault::StackUnderflow { pc: at.pc }))
}

/// Locals and environments are sized from their operands, so both stay
/// under the verifier's slot limit even for unverified code.
fn slot(n: u64, at: Cursor) -> Result<usize, Unwind> {
    if n >= MAX_SLOTS {
        return Err(Fault::SlotLimit { slot: n, pc: at.pc }.into());
    }
    count(n, at)
}

fn jump(insn: &Instruction<'_>, at: Cursor) -> Result<usize, Unwind> {
    usize::try_from(insn.uint(0))
        .ok()
        .and_then(|distance| at.next.checked_add(distance))
        .filter(|target| *target <= at.end)
        .ok_or(Unwind::Fault(Fault::JumpOutOfRegion { pc: at.pc }))
}

/// The `len` bytes starting at `start`, which must fit in the current
/// region.
fn sub_range(start: usize, len: u64, at: Cursor) -> Result<Range<usize>, Unwind> {
    usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|end| *end <= at.end)
        .map(|end| start..end)
        .ok_or(Unwind::Fault(Fault::RegionOverrun { pc: at.pc }))
}

fn splat(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items),
        Value::Nil => Value::array(Vec::new()),
        Value::Hash(table) => {
            let pairs = table
                .lock()
                .iter()
                .map(|(key, value)| Value::array(vec![key.clone(), value.clone()]))
                .collect();
            Value::array(pairs)
        }
        other => Value::array(vec![other]),
    }
}

fn is_empty_hash(value: &Value) -> bool {
    matches!(value, Value::Hash(table) if table.lock().is_empty())
}

#[cfg(test)]
mod tests {
    use bytecode::{Builder, DescriptorError};

    use super::*;
    use crate::testing::{Harness, render};

    #[test]
    fn arithmetic_and_locals() {
        let h = Harness::new();
        let value = h.eval("(lasgn :a (lit 40)) (call (lvar :a) :+ (lit 2))").unwrap();
        assert_eq!(value.as_int(), Some(42));
    }

    #[test]
    fn closures_see_later_writes() {
        let h = Harness::new();
        let value = h
            .eval(
                "(lasgn :x (lit 1)) \
                 (lasgn :b (iter (call nil :proc) nil (lvar :x))) \
                 (lasgn :x (lit 2)) \
                 (call (lvar :b) :call)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(2));
    }

    #[test]
    fn closures_write_through_to_the_defining_frame() {
        let h = Harness::new();
        let value = h
            .eval(
                "(lasgn :sum (lit 0)) \
                 (iter (call (array (lit 1) (lit 2) (lit 3)) :each) (args x) \
                   (lasgn :sum (call (lvar :sum) :+ (lvar :x)))) \
                 (lvar :sum)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(6));
    }

    #[test]
    fn optional_and_rest_parameters() {
        let h = Harness::new();
        let define = "(defn f (args a (opt b (str \"default\")) (rest c)) \
                      (array (lvar :a) (lvar :b) (lvar :c)))";
        let one = h.eval(&format!("{define} (call nil :f (str \"given\"))")).unwrap();
        assert_eq!(render(&one), r#"["given", "default", []]"#);
        let two = h
            .eval(&format!("{define} (call nil :f (str \"given\") (str \"given2\"))"))
            .unwrap();
        assert_eq!(render(&two), r#"["given", "given2", []]"#);
        let five = h
            .eval(&format!(
                "{define} (call nil :f (str \"given\") (str \"given2\") (lit :a) (lit :b) (lit :c))"
            ))
            .unwrap();
        assert_eq!(render(&five), r#"["given", "given2", [:a, :b, :c]]"#);
    }

    #[test]
    fn wrong_arity_raises_argument_error() {
        let h = Harness::new();
        let err = h.eval("(defn f (args a) (lvar :a)) (call nil :f)").unwrap_err();
        assert_eq!(
            h.uncaught(err),
            "ArgumentError: wrong number of arguments (given 0, expected 1)"
        );
    }

    #[test]
    fn ensure_runs_on_normal_exit() {
        let h = Harness::new();
        let value = h.eval("(ensure (lit 1) (call nil :record (lit :ensure)))").unwrap();
        assert_eq!(value.as_int(), Some(1));
        assert_eq!(h.log(), vec![":ensure"]);
    }

    #[test]
    fn ensure_runs_when_the_exception_is_caught() {
        let h = Harness::new();
        let value = h
            .eval(
                "(rescue \
                   (ensure (call nil :raise (str \"boom\")) (call nil :record (lit :ensure))) \
                   (resbody (array) nil (lit :rescued)))",
            )
            .unwrap();
        assert_eq!(render(&value), ":rescued");
        assert_eq!(h.log(), vec![":ensure"]);
    }

    #[test]
    fn ensure_runs_when_the_exception_escapes() {
        let h = Harness::new();
        let err = h
            .eval("(ensure (call nil :raise (str \"boom\")) (call nil :record (lit :ensure)))")
            .unwrap_err();
        assert_eq!(h.uncaught(err), "boom");
        assert_eq!(h.log(), vec![":ensure"]);
    }

    #[test]
    fn ensure_runs_on_non_local_return() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn f (args) \
                   (ensure (return (lit 1)) (call nil :record (lit :ensure))) \
                   (lit 2)) \
                 (call nil :f)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(1));
        assert_eq!(h.log(), vec![":ensure"]);
    }

    #[test]
    fn break_leaves_the_iterating_call() {
        let h = Harness::new();
        let value = h
            .eval(
                "(iter (call (array (lit 1) (lit 2) (lit 3)) :each) (args x) \
                   (if (call (lvar :x) :== (lit 2)) (break (lvar :x)) nil) \
                   (call nil :record (lvar :x)))",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(2));
        assert_eq!(h.log(), vec!["1"]);
    }

    #[test]
    fn next_ends_one_iteration() {
        let h = Harness::new();
        h.eval(
            "(iter (call (array (lit 1) (lit 2) (lit 3)) :each) (args x) \
               (if (call (lvar :x) :== (lit 2)) (next) nil) \
               (call nil :record (lvar :x)))",
        )
        .unwrap();
        assert_eq!(h.log(), vec!["1", "3"]);
    }

    #[test]
    fn while_loops_and_loop_break() {
        let h = Harness::new();
        let value = h
            .eval(
                "(lasgn :i (lit 0)) \
                 (while (call (lvar :i) :< (lit 5)) (lasgn :i (call (lvar :i) :+ (lit 1)))) \
                 (lvar :i)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(5));

        let value = h
            .eval(
                "(lasgn :i (lit 0)) \
                 (while (true) (block \
                   (lasgn :i (call (lvar :i) :+ (lit 1))) \
                   (if (call (lvar :i) :== (lit 3)) (break (str \"done\")) nil)))",
            )
            .unwrap();
        assert_eq!(render(&value), "\"done\"");
    }

    #[test]
    fn retry_reruns_the_protected_body() {
        let h = Harness::new();
        let value = h
            .eval(
                "(lasgn :n (lit 0)) \
                 (rescue \
                   (block \
                     (lasgn :n (call (lvar :n) :+ (lit 1))) \
                     (if (call (lvar :n) :< (lit 3)) (call nil :raise (str \"again\")) nil) \
                     (lvar :n)) \
                   (resbody (array) nil (retry)))",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(3));
    }

    #[test]
    fn rescue_else_runs_only_without_an_exception() {
        let h = Harness::new();
        let value = h
            .eval("(rescue (lit 1) (resbody (array) nil (lit 2)) (lit 3))")
            .unwrap();
        assert_eq!(value.as_int(), Some(3));
    }

    #[test]
    fn unmatched_rescue_reraises_with_the_original_backtrace() {
        let h = Harness::new();
        let err = h
            .eval(
                "(defn f (args) (call@2:0 nil :raise (str \"boom\"))) \
                 (rescue (call@5:0 nil :f) (resbody (array (const :Other)) nil (lit 1)))",
            )
            .unwrap_err();
        match err {
            VmError::Uncaught(raised) => {
                assert_eq!(raised.backtrace, vec!["test:2:in 'f'", "test:5:in '<main>'"]);
            }
            other => panic!("expected an uncaught exception, got {other:?}"),
        }
    }

    #[test]
    fn yield_without_a_block() {
        let h = Harness::new();
        let err = h.eval("(defn f (args) (yield)) (call nil :f)").unwrap_err();
        assert_eq!(h.uncaught(err), "LocalJumpError: no block given (yield)");
    }

    #[test]
    fn yield_passes_arguments_to_the_block() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn twice (args x) (call (yield (lvar :x)) :+ (yield (lvar :x)))) \
                 (iter (call nil :twice (lit 4)) (args n) (call (lvar :n) :+ (lit 1)))",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(10));
    }

    #[test]
    fn return_from_proc_leaves_the_method() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn f (args) (call (iter (call nil :proc) nil (return (lit 1))) :call) (lit 2)) \
                 (call nil :f)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(1));
    }

    #[test]
    fn return_from_lambda_leaves_only_the_lambda() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn g (args) (call (lambda nil (return (lit 1))) :call) (lit 2)) \
                 (call nil :g)",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(2));
    }

    #[test]
    fn return_to_a_finished_method_is_a_local_jump_error() {
        let h = Harness::new();
        let err = h
            .eval(
                "(defn make (args) (iter (call nil :proc) nil (return (lit 1)))) \
                 (call (call nil :make) :call)",
            )
            .unwrap_err();
        assert_eq!(h.uncaught(err), "LocalJumpError: unexpected return");
    }

    #[test]
    fn break_from_a_proc_called_in_its_defining_frame() {
        let h = Harness::new();
        let err = h.eval("(call (iter (call nil :proc) nil (break (lit 5))) :call)").unwrap_err();
        assert_eq!(h.uncaught(err), "LocalJumpError: break from proc-closure");
        let err = h
            .eval(
                "(defn make (args) (iter (call nil :proc) nil (break (lit 1)))) \
                 (call (call nil :make) :call)",
            )
            .unwrap_err();
        assert_eq!(h.uncaught(err), "LocalJumpError: break from proc-closure");
    }

    #[test]
    fn break_through_a_passed_block_leaves_the_outer_call() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn outer (args (blockarg b)) \
                   (call (array (lit 1) (lit 2)) :each (block_pass (lvar :b))) (lit 0)) \
                 (iter (call nil :outer) nil (break (lit 7)))",
            )
            .unwrap();
        assert_eq!(value.as_int(), Some(7));
    }

    #[test]
    fn deep_recursion_raises_system_stack_error() {
        let h = Harness::with_config(VmConfig { max_depth: 50, ..VmConfig::default() });
        let err = h.eval("(defn f (args) (call nil :f)) (call nil :f)").unwrap_err();
        assert_eq!(h.uncaught(err), "SystemStackError: stack level too deep");
    }

    #[test]
    fn native_stack_budget_stops_recursion_before_max_depth() {
        let config = VmConfig { max_depth: usize::MAX, native_stack: 256 * 1024, trace: false };
        let h = Harness::with_config(config);
        let err = h.eval("(defn f (args) (call nil :f)) (call nil :f)").unwrap_err();
        assert_eq!(h.uncaught(err), "SystemStackError: stack level too deep");
    }

    #[test]
    fn pending_interrupt_raises_before_the_next_instruction() {
        let h = Harness::new();
        let result = h.eval_with(
            "(call nil :record (lit :never))",
            |vm| vm.interrupt_handle().raise(Value::string("stop")),
        );
        assert_eq!(h.uncaught(result.unwrap_err()), "stop");
        assert!(h.log().is_empty());
    }

    #[test]
    fn underflow_is_a_fault() {
        let h = Harness::new();
        let mut b = Builder::new();
        b.op(Op::Pop);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::StackUnderflow { pc: 0 })));
    }

    #[test]
    fn non_integer_argc_is_a_fault() {
        let h = Harness::new();
        let mut b = Builder::new();
        b.op(Op::PushNil);
        b.send("x", [true, false, false, false]);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::BadArgc { pc: 1 })));
    }

    #[test]
    fn faults_skip_ensure_bodies() {
        let h = Harness::new();
        let mut body = Builder::new();
        body.op(Op::PushNil);
        let mut ensure = Builder::new();
        ensure.push_int(1);
        ensure.uint(Op::PushArgc, 1);
        ensure.send("record", [true, false, false, false]);
        let mut b = Builder::new();
        b.protect(body, Builder::new(), Builder::new(), ensure);
        let (mut code, map) = b.into_parts();
        // Corrupt the body's only instruction.
        code[5] = 0xEE;
        let err = h.run_bytes(code, map).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::Decode(DecodeError::UnknownOpcode { .. }))));
        assert!(h.log().is_empty());
    }

    #[test]
    fn jump_out_of_region_is_a_fault() {
        let h = Harness::new();
        let mut b = Builder::new();
        b.op(Op::PushNil);
        b.jump(Op::Jump, 9);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::JumpOutOfRegion { pc: 1 })));
    }

    #[test]
    fn oversized_slots_are_faults() {
        let h = Harness::new();
        let mut b = Builder::new();
        b.op(Op::PushNil);
        b.uint(Op::SetLocal, 1 << 62);
        b.op(Op::PushNil);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::SlotLimit { pc: 1, .. })));

        let mut b = Builder::new();
        b.uint(Op::AllocEnv, 1 << 44);
        b.op(Op::PushNil);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::SlotLimit { slot, pc: 0 }) if slot == 1 << 44));
    }

    #[test]
    fn incoherent_descriptor_is_a_fault() {
        let list = ArgList {
            params: vec![bytecode::ArgDescriptor::new(bytecode::ParamKind::Required, bytecode::Position::Left(0))],
            min_required: 0,
            max_allowed: Some(1),
            autosplat: false,
        };
        let h = Harness::new();
        let mut b = Builder::new();
        b.bytes(Op::BindArgs, &list.encode());
        b.op(Op::Pop);
        b.op(Op::PushNil);
        let err = h.run_code(b).unwrap_err();
        assert!(matches!(err, VmError::Fault(Fault::Descriptor(DescriptorError::Inconsistent(_)))));
    }

    #[test]
    fn splat_arguments_are_spread() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn f (args a b c) (array (lvar :c) (lvar :b) (lvar :a))) \
                 (lasgn :xs (array (lit 2) (lit 3))) \
                 (call nil :f (lit 1) (splat (lvar :xs)))",
            )
            .unwrap();
        assert_eq!(render(&value), "[3, 2, 1]");
    }

    #[test]
    fn keyword_arguments_bind_by_name() {
        let h = Harness::new();
        let value = h
            .eval(
                "(defn f (args (kw a) (kw b (lit 10))) (array (lvar :a) (lvar :b))) \
                 (call nil :f (kwargs (lit :a) (lit 1)))",
            )
            .unwrap();
        assert_eq!(render(&value), "[1, 10]");
    }

    #[test]
    fn multiple_assignment_destructures() {
        let h = Harness::new();
        let value = h
            .eval(
                "(masgn (mlhs (lasgn :a) (splat (lasgn :b))) (array (lit 1) (lit 2) (lit 3))) \
                 (array (lvar :b) (lvar :a))",
            )
            .unwrap();
        assert_eq!(render(&value), "[[2, 3], 1]");
    }

    #[test]
    fn interpolation_calls_to_s() {
        let h = Harness::new();
        let value = h.eval("(dstr \"n=\" (evstr (lit 5)) (str \"!\"))").unwrap();
        assert_eq!(render(&value), "\"n=5!\"");
    }

    #[test]
    fn globals_are_shared_through_the_context() {
        let h = Harness::new();
        h.eval("(gasgn :$count (lit 7))").unwrap();
        assert_eq!(h.context().global("$count").as_int(), Some(7));
    }
}

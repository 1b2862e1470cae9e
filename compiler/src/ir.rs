//! Reduced tree produced by desugaring and refined by the later passes.

use bytecode::ArgList;

use crate::ast::Pos;

pub type FrameId = u32;

/// Storage of a local variable, filled in by the scope and optimization
/// passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unresolved,
    Frame { frame: FrameId, index: u32 },
    /// Register in the owning frame.
    Direct(u32),
    /// Shared environment, `depth` environments up from the current one.
    Indirect { depth: u32, index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub slot: Slot,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), slot: Slot::Unresolved }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    TopLevel,
    Method,
    Block,
    Lambda,
    Class,
}

/// Where a bound value is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Var(Var),
    Ivar(String),
    Global(String),
    Const(String),
    Nested(Box<Destructure>),
    Discard,
}

/// An argument-binding descriptor list plus where each value goes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Destructure {
    pub list: ArgList,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub bind: Destructure,
    /// Default expressions, run in order when the parameter was not passed.
    pub defaults: Vec<(Var, Ir)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub kind: FunctionKind,
    pub name: String,
    pub params: Params,
    /// Block-local names declared before the body runs.
    pub locals: Vec<String>,
    pub body: Ir,
    pub frame: Option<FrameId>,
    /// Number of captured slots, set by the optimizer.
    pub env_size: u32,
}

impl Function {
    pub fn new(kind: FunctionKind, name: impl Into<String>, params: Params, body: Ir) -> Self {
        Self {
            kind,
            name: name.into(),
            params,
            locals: Vec::new(),
            body,
            frame: None,
            env_size: 0,
        }
    }

    /// Methods and lambdas check arity; every callable but class bodies and
    /// the top level binds its arguments.
    pub fn binds_args(&self) -> bool {
        match self.kind {
            FunctionKind::Method | FunctionKind::Lambda => true,
            FunctionKind::Block => !self.params.bind.list.is_empty(),
            FunctionKind::TopLevel | FunctionKind::Class => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// `None` for an implicit-self call.
    pub receiver: Option<Ir>,
    pub message: String,
    pub args: Vec<Ir>,
    /// `args` is a single array to spread.
    pub flattened: bool,
    pub kwargs: Option<Ir>,
    pub block: Option<Ir>,
}

impl Call {
    pub fn new(receiver: Option<Ir>, message: impl Into<String>, args: Vec<Ir>) -> Self {
        Self {
            receiver,
            message: message.into(),
            args,
            flattened: false,
            kwargs: None,
            block: None,
        }
    }

    pub fn flags(&self) -> [bool; 4] {
        [
            self.receiver.is_none(),
            self.block.is_some(),
            self.flattened,
            self.kwargs.is_some(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rescue {
    /// Receives the exception on entry to the handler.
    pub var: Var,
    pub handler: Ir,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ir {
    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    Interpolate(Vec<Ir>),
    Array(Vec<Ir>),
    ArrayConcat(Box<Ir>, Box<Ir>),
    Splat(Box<Ir>),
    Hash(Vec<(Ir, Ir)>),
    HashMerge(Box<Ir>, Box<Ir>),
    Seq(Vec<Ir>),
    GetVar(Var),
    SetVar(Var, Box<Ir>),
    GetIvar(String),
    SetIvar(String, Box<Ir>),
    GetGlobal(String),
    SetGlobal(String, Box<Ir>),
    GetConst(String),
    SetConst(String, Box<Ir>),
    If(Box<Ir>, Box<Ir>, Box<Ir>),
    /// Subject, value when nil, value otherwise.
    IfNil(Box<Ir>, Box<Ir>, Box<Ir>),
    And(Box<Ir>, Box<Ir>),
    Or(Box<Ir>, Box<Ir>),
    While {
        cond: Box<Ir>,
        body: Box<Ir>,
        until: bool,
        body_first: bool,
    },
    Call(Box<Call>),
    Yield {
        args: Vec<Ir>,
        flattened: bool,
        kwargs: Option<Box<Ir>>,
    },
    BlockGiven,
    Closure(Box<Function>),
    DefMethod(Box<Function>),
    DefClass {
        name: String,
        superclass: Option<Box<Ir>>,
        module: bool,
        body: Box<Function>,
    },
    MultiAssign {
        value: Box<Ir>,
        pattern: Destructure,
    },
    Protect {
        body: Box<Ir>,
        rescue: Option<Box<Rescue>>,
        else_: Option<Box<Ir>>,
        ensure: Option<Box<Ir>>,
    },
    Return(Box<Ir>),
    Break(Box<Ir>),
    LoopBreak(Box<Ir>),
    Next(Box<Ir>),
    Redo,
    Retry,
    Reraise(Box<Ir>),
    RescueMatch {
        matchers: Box<Ir>,
        exception: Box<Ir>,
    },
    Located(Pos, Box<Ir>),
}

impl Ir {
    pub fn get(name: impl Into<String>) -> Ir {
        Ir::GetVar(Var::new(name))
    }

    pub fn set(name: impl Into<String>, value: Ir) -> Ir {
        Ir::SetVar(Var::new(name), Box::new(value))
    }

    pub fn call(receiver: Option<Ir>, message: &str, args: Vec<Ir>) -> Ir {
        Ir::Call(Box::new(Call::new(receiver, message, args)))
    }

    pub fn seq(mut items: Vec<Ir>) -> Ir {
        match items.len() {
            0 => Ir::Nil,
            1 => items.pop().unwrap_or(Ir::Nil),
            _ => Ir::Seq(items),
        }
    }
}

/// A tree-to-tree transform. Each `fold_*` consumes its input and builds the
/// replacement; the defaults rebuild the node with folded children.
pub trait Fold {
    type Error;

    fn fold_ir(&mut self, ir: Ir) -> Result<Ir, Self::Error> {
        walk_ir(self, ir)
    }

    fn fold_var(&mut self, var: Var) -> Result<Var, Self::Error> {
        Ok(var)
    }

    fn fold_function(&mut self, function: Function) -> Result<Function, Self::Error> {
        walk_function(self, function)
    }
}

fn fold_box<F: Fold + ?Sized>(f: &mut F, ir: Box<Ir>) -> Result<Box<Ir>, F::Error> {
    Ok(Box::new(f.fold_ir(*ir)?))
}

fn fold_vec<F: Fold + ?Sized>(f: &mut F, items: Vec<Ir>) -> Result<Vec<Ir>, F::Error> {
    items.into_iter().map(|ir| f.fold_ir(ir)).collect()
}

pub fn walk_target<F: Fold + ?Sized>(f: &mut F, target: Target) -> Result<Target, F::Error> {
    Ok(match target {
        Target::Var(var) => Target::Var(f.fold_var(var)?),
        Target::Nested(d) => Target::Nested(Box::new(walk_destructure(f, *d)?)),
        other => other,
    })
}

pub fn walk_destructure<F: Fold + ?Sized>(
    f: &mut F,
    d: Destructure,
) -> Result<Destructure, F::Error> {
    let targets = d
        .targets
        .into_iter()
        .map(|t| walk_target(f, t))
        .collect::<Result<_, _>>()?;
    Ok(Destructure { list: d.list, targets })
}

/// Parameters are visited before defaults, defaults before the body.
pub fn walk_function<F: Fold + ?Sized>(
    f: &mut F,
    function: Function,
) -> Result<Function, F::Error> {
    let Function { kind, name, params, locals, body, frame, env_size } = function;
    let bind = walk_destructure(f, params.bind)?;
    let defaults = params
        .defaults
        .into_iter()
        .map(|(var, ir)| Ok((f.fold_var(var)?, f.fold_ir(ir)?)))
        .collect::<Result<_, _>>()?;
    let body = f.fold_ir(body)?;
    Ok(Function {
        kind,
        name,
        params: Params { bind, defaults },
        locals,
        body,
        frame,
        env_size,
    })
}

pub fn walk_ir<F: Fold + ?Sized>(f: &mut F, ir: Ir) -> Result<Ir, F::Error> {
    Ok(match ir {
        Ir::Interpolate(parts) => Ir::Interpolate(fold_vec(f, parts)?),
        Ir::Array(items) => Ir::Array(fold_vec(f, items)?),
        Ir::ArrayConcat(a, b) => Ir::ArrayConcat(fold_box(f, a)?, fold_box(f, b)?),
        Ir::Splat(e) => Ir::Splat(fold_box(f, e)?),
        Ir::Hash(pairs) => Ir::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((f.fold_ir(k)?, f.fold_ir(v)?)))
                .collect::<Result<_, _>>()?,
        ),
        Ir::HashMerge(a, b) => Ir::HashMerge(fold_box(f, a)?, fold_box(f, b)?),
        Ir::Seq(items) => Ir::Seq(fold_vec(f, items)?),
        Ir::GetVar(var) => Ir::GetVar(f.fold_var(var)?),
        Ir::SetVar(var, value) => {
            let var = f.fold_var(var)?;
            Ir::SetVar(var, fold_box(f, value)?)
        }
        Ir::SetIvar(name, value) => Ir::SetIvar(name, fold_box(f, value)?),
        Ir::SetGlobal(name, value) => Ir::SetGlobal(name, fold_box(f, value)?),
        Ir::SetConst(name, value) => Ir::SetConst(name, fold_box(f, value)?),
        Ir::If(c, t, e) => Ir::If(fold_box(f, c)?, fold_box(f, t)?, fold_box(f, e)?),
        Ir::IfNil(s, n, o) => Ir::IfNil(fold_box(f, s)?, fold_box(f, n)?, fold_box(f, o)?),
        Ir::And(a, b) => Ir::And(fold_box(f, a)?, fold_box(f, b)?),
        Ir::Or(a, b) => Ir::Or(fold_box(f, a)?, fold_box(f, b)?),
        Ir::While { cond, body, until, body_first } => Ir::While {
            cond: fold_box(f, cond)?,
            body: fold_box(f, body)?,
            until,
            body_first,
        },
        Ir::Call(call) => {
            let Call { receiver, message, args, flattened, kwargs, block } = *call;
            Ir::Call(Box::new(Call {
                receiver: receiver.map(|r| f.fold_ir(r)).transpose()?,
                message,
                args: fold_vec(f, args)?,
                flattened,
                kwargs: kwargs.map(|k| f.fold_ir(k)).transpose()?,
                block: block.map(|b| f.fold_ir(b)).transpose()?,
            }))
        }
        Ir::Yield { args, flattened, kwargs } => Ir::Yield {
            args: fold_vec(f, args)?,
            flattened,
            kwargs: kwargs.map(|k| fold_box(f, k)).transpose()?,
        },
        Ir::Closure(function) => Ir::Closure(Box::new(f.fold_function(*function)?)),
        Ir::DefMethod(function) => Ir::DefMethod(Box::new(f.fold_function(*function)?)),
        Ir::DefClass { name, superclass, module, body } => Ir::DefClass {
            name,
            superclass: superclass.map(|s| fold_box(f, s)).transpose()?,
            module,
            body: Box::new(f.fold_function(*body)?),
        },
        Ir::MultiAssign { value, pattern } => {
            let value = fold_box(f, value)?;
            Ir::MultiAssign { value, pattern: walk_destructure(f, pattern)? }
        }
        Ir::Protect { body, rescue, else_, ensure } => Ir::Protect {
            body: fold_box(f, body)?,
            rescue: match rescue {
                Some(r) => {
                    let Rescue { var, handler } = *r;
                    let var = f.fold_var(var)?;
                    Some(Box::new(Rescue { var, handler: f.fold_ir(handler)? }))
                }
                None => None,
            },
            else_: else_.map(|e| fold_box(f, e)).transpose()?,
            ensure: ensure.map(|e| fold_box(f, e)).transpose()?,
        },
        Ir::Return(e) => Ir::Return(fold_box(f, e)?),
        Ir::Break(e) => Ir::Break(fold_box(f, e)?),
        Ir::LoopBreak(e) => Ir::LoopBreak(fold_box(f, e)?),
        Ir::Next(e) => Ir::Next(fold_box(f, e)?),
        Ir::Reraise(e) => Ir::Reraise(fold_box(f, e)?),
        Ir::RescueMatch { matchers, exception } => Ir::RescueMatch {
            matchers: fold_box(f, matchers)?,
            exception: fold_box(f, exception)?,
        },
        Ir::Located(pos, inner) => Ir::Located(pos, fold_box(f, inner)?),
        leaf @ (Ir::Nil
        | Ir::True
        | Ir::False
        | Ir::SelfRef
        | Ir::Int(_)
        | Ir::Float(_)
        | Ir::Str(_)
        | Ir::Sym(_)
        | Ir::GetIvar(_)
        | Ir::GetGlobal(_)
        | Ir::GetConst(_)
        | Ir::BlockGiven
        | Ir::Redo
        | Ir::Retry) => leaf,
    })
}

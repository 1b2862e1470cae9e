//! Lowers the input tree to [`Ir`].
//!
//! Every construct that is sugar over a smaller set of primitives is
//! expanded here: safe navigation, attribute assignment, `case`, pattern
//! matching, `rescue` chains and splatted arguments. Jump keywords are
//! checked against their enclosing construct.

use bytecode::{ArgDescriptor, ArgList, ParamKind, Position};
use log::trace;

use crate::ast::{Child, Literal, Node, Pos, Tag};
use crate::error::CompileError;
use crate::ir::{Call, Destructure, Function, FunctionKind, Ir, Params, Rescue, Target, Var};

/// Innermost construct a `break`, `next` or `redo` transfers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Jump {
    Loop,
    Block,
}

pub fn desugar(root: &Node) -> Result<Function, CompileError> {
    let mut d = Desugarer::default();
    let body = d.expr(root)?;
    trace!("desugared top level using {} temporaries", d.temps);
    Ok(Function::new(FunctionKind::TopLevel, "<main>", Params::default(), body))
}

#[derive(Default)]
struct Desugarer {
    temps: u32,
    jumps: Vec<Jump>,
    rescue_depth: u32,
}

fn malformed(node: &Node, reason: &'static str) -> CompileError {
    CompileError::Malformed { tag: node.tag, reason, pos: node.pos }
}

fn unsupported(node: &Node, what: &'static str) -> CompileError {
    CompileError::Unsupported { what, pos: node.pos }
}

fn located(pos: Option<Pos>, ir: Ir) -> Ir {
    match pos {
        Some(pos) => Ir::Located(pos, Box::new(ir)),
        None => ir,
    }
}

fn literal(lit: &Literal) -> Ir {
    match lit {
        Literal::Nil => Ir::Nil,
        Literal::Int(i) => Ir::Int(*i),
        Literal::Float(x) => Ir::Float(*x),
        Literal::Str(s) => Ir::Str(s.clone()),
        Literal::Sym(s) => Ir::Sym(s.clone()),
    }
}

fn and_chain(mut tests: Vec<Ir>) -> Ir {
    let Some(mut acc) = tests.pop() else {
        return Ir::True;
    };
    while let Some(test) = tests.pop() {
        acc = Ir::And(Box::new(test), Box::new(acc));
    }
    acc
}

fn or_chain(mut tests: Vec<Ir>) -> Ir {
    let Some(mut acc) = tests.pop() else {
        return Ir::False;
    };
    while let Some(test) = tests.pop() {
        acc = Ir::Or(Box::new(test), Box::new(acc));
    }
    acc
}

fn case_eq(pattern: Ir, subject: Ir) -> Ir {
    Ir::call(Some(pattern), "===", vec![subject])
}

fn with_ensure(body: Ir, ensure: Ir) -> Ir {
    match body {
        Ir::Located(pos, inner) => Ir::Located(pos, Box::new(with_ensure(*inner, ensure))),
        Ir::Protect { body, rescue, else_, ensure: None } => Ir::Protect {
            body,
            rescue,
            else_,
            ensure: Some(Box::new(ensure)),
        },
        other => Ir::Protect {
            body: Box::new(other),
            rescue: None,
            else_: None,
            ensure: Some(Box::new(ensure)),
        },
    }
}

/// Positional parameters collected in source order, before positions are
/// assigned.
#[derive(Default)]
struct Layout {
    params: Vec<ArgDescriptor>,
    targets: Vec<Target>,
    left: u32,
    post: Vec<usize>,
    seen_optional_or_rest: bool,
    rest: bool,
}

impl Layout {
    fn required(&mut self, target: Target, destructure_depth: u32) {
        let position = if self.seen_optional_or_rest {
            self.post.push(self.params.len());
            Position::Right(0)
        } else {
            self.left += 1;
            Position::Left(self.left - 1)
        };
        let mut desc = ArgDescriptor::new(ParamKind::Required, position);
        desc.destructure_depth = destructure_depth;
        self.push(desc, target);
    }

    fn optional(&mut self, target: Target) {
        self.seen_optional_or_rest = true;
        self.left += 1;
        let mut desc = ArgDescriptor::new(ParamKind::Optional, Position::Left(self.left - 1));
        desc.has_default = true;
        self.push(desc, target);
    }

    fn rest(&mut self, target: Target) {
        self.seen_optional_or_rest = true;
        self.rest = true;
        self.push(ArgDescriptor::new(ParamKind::Rest, Position::Left(self.left)), target);
    }

    fn push(&mut self, desc: ArgDescriptor, target: Target) {
        self.params.push(desc);
        self.targets.push(target);
    }

    fn positional(&self) -> u32 {
        self.params
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Required | ParamKind::Optional))
            .count() as u32
    }

    fn finish(mut self, autosplat_allowed: bool) -> Destructure {
        let post = self.post.len() as u32;
        for (k, &index) in self.post.iter().enumerate() {
            self.params[index].position = Position::Right(post - 1 - k as u32);
        }
        let optional = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Optional)
            .count() as u32;
        let required = self.positional() - optional;
        let positional = self.positional();
        let list = ArgList {
            min_required: required,
            max_allowed: if self.rest { None } else { Some(required + optional) },
            autosplat: autosplat_allowed && (positional >= 2 || (positional >= 1 && self.rest)),
            params: self.params,
        };
        Destructure { list, targets: self.targets }
    }
}

impl Desugarer {
    fn temp(&mut self, prefix: &str) -> String {
        self.temps += 1;
        format!("%{prefix}{}", self.temps - 1)
    }

    fn expr(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let ir = self.lower(node)?;
        Ok(located(node.pos, ir))
    }

    /// Child `index` as an expression; absent and `nil` children read as nil.
    fn child_expr(&mut self, node: &Node, index: usize) -> Result<Ir, CompileError> {
        match node.child(index) {
            Some(child) => self.value(child),
            None => Ok(Ir::Nil),
        }
    }

    fn value(&mut self, child: &Child) -> Result<Ir, CompileError> {
        match child {
            Child::Node(node) => self.expr(node),
            Child::Lit(lit) => Ok(literal(lit)),
        }
    }

    fn seq(&mut self, children: &[Child]) -> Result<Ir, CompileError> {
        let items = children
            .iter()
            .map(|c| self.value(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ir::seq(items))
    }

    fn name_at(&self, node: &Node, index: usize) -> Result<String, CompileError> {
        node.name(index)
            .map(str::to_string)
            .ok_or_else(|| malformed(node, "expected a name"))
    }

    fn lower(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let tail = node.children.get(1..).unwrap_or(&[]);
        Ok(match node.tag {
            Tag::Nil => Ir::Nil,
            Tag::True => Ir::True,
            Tag::False => Ir::False,
            Tag::SelfRef => Ir::SelfRef,
            Tag::Lit | Tag::Str => match node.child(0) {
                Some(Child::Lit(lit)) => literal(lit),
                _ => return Err(malformed(node, "expected a literal")),
            },
            Tag::Dstr => self.dstr(node)?,
            Tag::Evstr => Ir::Interpolate(vec![self.child_expr(node, 0)?]),
            Tag::Array => {
                let (mut items, flattened) = self.elements(&node.children)?;
                if flattened {
                    items.pop().unwrap_or(Ir::Nil)
                } else {
                    Ir::Array(items)
                }
            }
            Tag::Hash => self.hash(node, &node.children)?,
            Tag::Splat => Ir::Splat(Box::new(self.child_expr(node, 0)?)),

            Tag::Lvar => Ir::get(self.name_at(node, 0)?),
            Tag::Ivar => Ir::GetIvar(self.name_at(node, 0)?),
            Tag::Gvar => Ir::GetGlobal(self.name_at(node, 0)?),
            Tag::Const => Ir::GetConst(self.name_at(node, 0)?),
            Tag::Lasgn | Tag::Iasgn | Tag::Gasgn | Tag::Cdecl => {
                if node.child(1).is_none() {
                    return Err(malformed(node, "assignment without a value"));
                }
                let value = self.child_expr(node, 1)?;
                self.assign(node, value)?
            }

            Tag::Call => self.call(node, None)?,
            Tag::SafeCall => self.safe_call(node, None)?,
            Tag::Attrasgn => self.attrasgn(node)?,
            Tag::Iter => self.iter(node)?,
            Tag::Lambda => self.closure(FunctionKind::Lambda, "lambda", node.node(0), tail)?,
            Tag::Yield => {
                let (args, flattened, kwargs) = self.arguments(node, &node.children)?;
                if block_pass(&node.children).is_some() {
                    return Err(malformed(node, "yield cannot pass a block"));
                }
                Ir::Yield { args, flattened, kwargs: kwargs.map(Box::new) }
            }

            Tag::Not => Ir::call(Some(self.child_expr(node, 0)?), "!", vec![]),
            Tag::And => Ir::And(
                Box::new(self.child_expr(node, 0)?),
                Box::new(self.child_expr(node, 1)?),
            ),
            Tag::Or => Ir::Or(
                Box::new(self.child_expr(node, 0)?),
                Box::new(self.child_expr(node, 1)?),
            ),
            Tag::OpAsgnOr | Tag::OpAsgnAnd => {
                let asgn = node.node(0).ok_or_else(|| malformed(node, "expected an assignment"))?;
                let current = match asgn.tag {
                    Tag::Lasgn => Ir::get(self.name_at(asgn, 0)?),
                    Tag::Iasgn => Ir::GetIvar(self.name_at(asgn, 0)?),
                    Tag::Gasgn => Ir::GetGlobal(self.name_at(asgn, 0)?),
                    _ => return Err(unsupported(asgn, "compound assignment to this target")),
                };
                let update = self.expr(asgn)?;
                if node.tag == Tag::OpAsgnOr {
                    Ir::Or(Box::new(current), Box::new(update))
                } else {
                    Ir::And(Box::new(current), Box::new(update))
                }
            }

            Tag::Block | Tag::Begin => self.seq(&node.children)?,
            Tag::If => Ir::If(
                Box::new(self.child_expr(node, 0)?),
                Box::new(self.child_expr(node, 1)?),
                Box::new(self.child_expr(node, 2)?),
            ),
            Tag::While | Tag::Until | Tag::WhilePost | Tag::UntilPost => {
                self.jumps.push(Jump::Loop);
                let cond = self.child_expr(node, 0);
                let body = self.child_expr(node, 1);
                self.jumps.pop();
                Ir::While {
                    cond: Box::new(cond?),
                    body: Box::new(body?),
                    until: matches!(node.tag, Tag::Until | Tag::UntilPost),
                    body_first: matches!(node.tag, Tag::WhilePost | Tag::UntilPost),
                }
            }
            Tag::Case => self.case(node)?,
            Tag::CaseIn => self.case_in(node)?,

            Tag::Return => Ir::Return(Box::new(self.child_expr(node, 0)?)),
            Tag::Break => {
                let value = Box::new(self.child_expr(node, 0)?);
                match self.jumps.last() {
                    Some(Jump::Loop) => Ir::LoopBreak(value),
                    Some(Jump::Block) => Ir::Break(value),
                    None => return Err(CompileError::InvalidJump { keyword: "break", pos: node.pos }),
                }
            }
            Tag::Next => {
                if self.jumps.is_empty() {
                    return Err(CompileError::InvalidJump { keyword: "next", pos: node.pos });
                }
                Ir::Next(Box::new(self.child_expr(node, 0)?))
            }
            Tag::Redo => {
                if self.jumps.is_empty() {
                    return Err(CompileError::InvalidJump { keyword: "redo", pos: node.pos });
                }
                Ir::Redo
            }
            Tag::Retry => {
                if self.rescue_depth == 0 {
                    return Err(CompileError::InvalidJump { keyword: "retry", pos: node.pos });
                }
                Ir::Retry
            }
            Tag::Rescue => self.rescue(node)?,
            Tag::Ensure => {
                let body = self.child_expr(node, 0)?;
                let ensure = self.child_expr(node, 1)?;
                with_ensure(body, ensure)
            }

            Tag::Defn => {
                let name = self.name_at(node, 0)?;
                let body = node.children.get(2..).unwrap_or(&[]);
                let function = self.function(FunctionKind::Method, &name, node.node(1), body)?;
                Ir::DefMethod(Box::new(function))
            }
            Tag::Class | Tag::Module => self.class(node)?,
            Tag::Masgn => {
                let lhs = node
                    .node(0)
                    .filter(|n| n.tag == Tag::Mlhs)
                    .ok_or_else(|| malformed(node, "expected a target list"))?;
                let pattern = self.destructure(lhs)?;
                Ir::MultiAssign { value: Box::new(self.child_expr(node, 1)?), pattern }
            }

            Tag::When
            | Tag::In
            | Tag::Resbody
            | Tag::Kwargs
            | Tag::Kwsplat
            | Tag::BlockPass
            | Tag::Mlhs
            | Tag::Args
            | Tag::Opt
            | Tag::Rest
            | Tag::Kw
            | Tag::Kwrest
            | Tag::Blockarg
            | Tag::Shadow
            | Tag::Pvar
            | Tag::Pwild
            | Tag::Parray
            | Tag::Prest
            | Tag::Palt
            | Tag::Phash
            | Tag::Pair => {
                return Err(CompileError::UnexpectedTag { tag: node.tag, pos: node.pos });
            }
        })
    }

    /// Store `value` through an assignment node (`lasgn`, `iasgn`, `gasgn`
    /// or `cdecl`). The result is the assigned value.
    fn assign(&mut self, node: &Node, value: Ir) -> Result<Ir, CompileError> {
        let name = self.name_at(node, 0)?;
        let value = Box::new(value);
        Ok(match node.tag {
            Tag::Lasgn => Ir::SetVar(Var::new(name), value),
            Tag::Iasgn => Ir::SetIvar(name, value),
            Tag::Gasgn => Ir::SetGlobal(name, value),
            Tag::Cdecl => Ir::SetConst(name, value),
            _ => return Err(CompileError::UnexpectedTag { tag: node.tag, pos: node.pos }),
        })
    }

    fn dstr(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let mut parts = Vec::new();
        for child in &node.children {
            match child {
                Child::Lit(Literal::Str(s)) if s.is_empty() => {}
                Child::Lit(lit) => parts.push(literal(lit)),
                Child::Node(n) if n.tag == Tag::Evstr => parts.push(self.child_expr(n, 0)?),
                Child::Node(n) => parts.push(self.expr(n)?),
            }
        }
        Ok(Ir::Interpolate(parts))
    }

    /// Positional elements, with any splat folded into one flattened array.
    fn elements<'n>(
        &mut self,
        children: impl IntoIterator<Item = &'n Child>,
    ) -> Result<(Vec<Ir>, bool), CompileError> {
        let mut plain = Vec::new();
        let mut spread: Option<Ir> = None;
        for child in children {
            match child {
                Child::Node(n) if n.tag == Tag::Splat => {
                    let part = Ir::Splat(Box::new(self.child_expr(n, 0)?));
                    let head = match spread.take() {
                        Some(acc) if plain.is_empty() => acc,
                        Some(acc) => Ir::ArrayConcat(
                            Box::new(acc),
                            Box::new(Ir::Array(std::mem::take(&mut plain))),
                        ),
                        None => Ir::Array(std::mem::take(&mut plain)),
                    };
                    spread = Some(Ir::ArrayConcat(Box::new(head), Box::new(part)));
                }
                other => plain.push(self.value(other)?),
            }
        }
        Ok(match spread {
            None => (plain, false),
            Some(acc) if plain.is_empty() => (vec![acc], true),
            Some(acc) => (vec![Ir::ArrayConcat(Box::new(acc), Box::new(Ir::Array(plain)))], true),
        })
    }

    fn hash(&mut self, node: &Node, children: &[Child]) -> Result<Ir, CompileError> {
        let mut merged: Option<Ir> = None;
        let mut pairs = Vec::new();
        let mut items = children.iter();
        while let Some(child) = items.next() {
            if let Child::Node(n) = child {
                if n.tag == Tag::Kwsplat {
                    let part = self.child_expr(n, 0)?;
                    let head = match merged.take() {
                        Some(acc) if pairs.is_empty() => acc,
                        Some(acc) => {
                            Ir::HashMerge(Box::new(acc), Box::new(Ir::Hash(std::mem::take(&mut pairs))))
                        }
                        None => Ir::Hash(std::mem::take(&mut pairs)),
                    };
                    merged = Some(Ir::HashMerge(Box::new(head), Box::new(part)));
                    continue;
                }
            }
            let key = self.value(child)?;
            let value = match items.next() {
                Some(value) => self.value(value)?,
                None => return Err(malformed(node, "odd number of hash elements")),
            };
            pairs.push((key, value));
        }
        Ok(match merged {
            None => Ir::Hash(pairs),
            Some(acc) if pairs.is_empty() => acc,
            Some(acc) => Ir::HashMerge(Box::new(acc), Box::new(Ir::Hash(pairs))),
        })
    }

    /// Split call arguments into positional values, the flattened flag and
    /// the keyword hash. A `block_pass` is left to the caller.
    fn arguments(
        &mut self,
        node: &Node,
        children: &[Child],
    ) -> Result<(Vec<Ir>, bool, Option<Ir>), CompileError> {
        let mut kwargs = None;
        let mut positional = Vec::new();
        for child in children {
            match child {
                Child::Node(n) if n.tag == Tag::Kwargs => {
                    if kwargs.is_some() {
                        return Err(malformed(node, "more than one keyword argument list"));
                    }
                    kwargs = Some(self.hash(n, &n.children)?);
                }
                Child::Node(n) if n.tag == Tag::BlockPass => {}
                other => positional.push(other),
            }
        }
        let (args, flattened) = self.elements(positional)?;
        Ok((args, flattened, kwargs))
    }

    fn call(&mut self, node: &Node, block: Option<Ir>) -> Result<Ir, CompileError> {
        let receiver = match node.node(0) {
            Some(r) => Some(self.expr(r)?),
            None => None,
        };
        self.send(node, receiver, block)
    }

    fn send(
        &mut self,
        node: &Node,
        receiver: Option<Ir>,
        block: Option<Ir>,
    ) -> Result<Ir, CompileError> {
        let message = self.name_at(node, 1)?;
        let rest = node.children.get(2..).unwrap_or(&[]);
        let (args, flattened, kwargs) = self.arguments(node, rest)?;
        let block = match (block, block_pass(rest)) {
            (Some(_), Some(_)) => return Err(malformed(node, "both block argument and literal block")),
            (Some(block), None) => Some(block),
            (None, Some(pass)) => Some(self.child_expr(pass, 0)?),
            (None, None) => None,
        };
        if receiver.is_none()
            && message == "block_given?"
            && args.is_empty()
            && kwargs.is_none()
            && block.is_none()
        {
            return Ok(Ir::BlockGiven);
        }
        Ok(Ir::Call(Box::new(Call { receiver, message, args, flattened, kwargs, block })))
    }

    fn safe_call(&mut self, node: &Node, block: Option<Ir>) -> Result<Ir, CompileError> {
        let receiver = self.child_expr(node, 0)?;
        let tmp = self.temp("t");
        let call = self.send(node, Some(Ir::get(&tmp)), block)?;
        Ok(Ir::IfNil(
            Box::new(Ir::set(tmp, receiver)),
            Box::new(Ir::Nil),
            Box::new(call),
        ))
    }

    /// `recv.name = value` and `recv[i] = value` evaluate to the assigned
    /// value, not the setter's result.
    fn attrasgn(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let message = self.name_at(node, 1)?;
        let mut steps = Vec::new();
        let receiver = match node.node(0) {
            Some(r) => {
                let tmp = self.temp("t");
                let value = self.expr(r)?;
                steps.push(Ir::set(&tmp, value));
                Some(Ir::get(tmp))
            }
            None => None,
        };
        let mut args = Vec::new();
        for child in node.children.get(2..).unwrap_or(&[]) {
            if matches!(child, Child::Node(n) if matches!(n.tag, Tag::Splat | Tag::Kwargs | Tag::BlockPass)) {
                return Err(unsupported(node, "splat or keyword arguments in attribute assignment"));
            }
            let tmp = self.temp("t");
            let value = self.value(child)?;
            steps.push(Ir::set(&tmp, value));
            args.push(tmp);
        }
        let result = args.last().map_or(Ir::Nil, |tmp| Ir::get(tmp));
        steps.push(Ir::call(receiver, &message, args.iter().map(|tmp| Ir::get(tmp)).collect()));
        steps.push(result);
        Ok(Ir::Seq(steps))
    }

    fn iter(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let call = node.node(0).ok_or_else(|| malformed(node, "expected a call"))?;
        let body = node.children.get(2..).unwrap_or(&[]);
        let is_lambda = call.tag == Tag::Call
            && call.node(0).is_none()
            && call.name(1) == Some("lambda")
            && call.children.len() == 2;
        if is_lambda {
            return self.closure(FunctionKind::Lambda, "lambda", node.node(1), body);
        }
        let name = call.name(1).unwrap_or("block").to_string();
        let block = self.closure(FunctionKind::Block, &name, node.node(1), body)?;
        let ir = match call.tag {
            Tag::Call => self.call(call, Some(block))?,
            Tag::SafeCall => self.safe_call(call, Some(block))?,
            _ => return Err(CompileError::UnexpectedTag { tag: call.tag, pos: call.pos }),
        };
        Ok(located(call.pos, ir))
    }

    fn closure(
        &mut self,
        kind: FunctionKind,
        name: &str,
        args: Option<&Node>,
        body: &[Child],
    ) -> Result<Ir, CompileError> {
        Ok(Ir::Closure(Box::new(self.function(kind, name, args, body)?)))
    }

    /// Lower a callable body. Jump targets and `retry` eligibility do not
    /// cross function boundaries.
    fn function(
        &mut self,
        kind: FunctionKind,
        name: &str,
        args: Option<&Node>,
        body: &[Child],
    ) -> Result<Function, CompileError> {
        let saved_jumps = std::mem::take(&mut self.jumps);
        let saved_rescue = std::mem::replace(&mut self.rescue_depth, 0);
        if matches!(kind, FunctionKind::Block | FunctionKind::Lambda) {
            self.jumps.push(Jump::Block);
        }
        let result = self.function_body(kind, name, args, body);
        self.jumps = saved_jumps;
        self.rescue_depth = saved_rescue;
        result
    }

    fn function_body(
        &mut self,
        kind: FunctionKind,
        name: &str,
        args: Option<&Node>,
        body: &[Child],
    ) -> Result<Function, CompileError> {
        let (params, locals) = match args {
            Some(args) => self.params(args, kind == FunctionKind::Block)?,
            None => (Params::default(), Vec::new()),
        };
        let body = self.seq(body)?;
        let mut function = Function::new(kind, name, params, body);
        function.locals = locals;
        Ok(function)
    }

    fn params(&mut self, args: &Node, lenient: bool) -> Result<(Params, Vec<String>), CompileError> {
        if args.tag != Tag::Args {
            return Err(CompileError::UnexpectedTag { tag: args.tag, pos: args.pos });
        }
        let mut layout = Layout::default();
        let mut defaults = Vec::new();
        let mut keywords = Vec::new();
        let mut locals = Vec::new();
        for child in &args.children {
            let param = match child {
                Child::Lit(Literal::Sym(name)) => {
                    layout.required(Target::Var(Var::new(name.as_str())), 0);
                    continue;
                }
                Child::Lit(_) => return Err(malformed(args, "expected a parameter")),
                Child::Node(param) => param,
            };
            match param.tag {
                Tag::Opt => {
                    let name = self.name_at(param, 0)?;
                    defaults.push((Var::new(name.as_str()), self.child_expr(param, 1)?));
                    layout.optional(Target::Var(Var::new(name)));
                }
                Tag::Rest => layout.rest(optional_target(param)),
                Tag::Mlhs => {
                    let nested = self.destructure(param)?;
                    layout.required(Target::Nested(Box::new(nested)), 1);
                }
                Tag::Kw => {
                    let name = self.name_at(param, 0)?;
                    let required = param.child(1).is_none();
                    let mut desc = ArgDescriptor::new(
                        ParamKind::Keyword { key: name.clone(), required },
                        Position::None,
                    );
                    if !required {
                        desc.has_default = true;
                        defaults.push((Var::new(name.as_str()), self.child_expr(param, 1)?));
                    }
                    keywords.push((desc, Target::Var(Var::new(name))));
                }
                Tag::Kwrest => keywords.push((
                    ArgDescriptor::new(ParamKind::KeywordRest, Position::None),
                    optional_target(param),
                )),
                Tag::Blockarg => keywords.push((
                    ArgDescriptor::new(ParamKind::Block, Position::None),
                    Target::Var(Var::new(self.name_at(param, 0)?)),
                )),
                Tag::Shadow => locals.push(self.name_at(param, 0)?),
                _ => return Err(CompileError::UnexpectedTag { tag: param.tag, pos: param.pos }),
            }
        }
        let mut bind = layout.finish(lenient);
        // Keyword and block parameters follow the positional ones, and the
        // block parameter comes last.
        keywords.sort_by_key(|(desc, _)| desc.kind == ParamKind::Block);
        for (desc, target) in keywords {
            bind.list.params.push(desc);
            bind.targets.push(target);
        }
        Ok((Params { bind, defaults }, locals))
    }

    /// Targets of a multiple assignment or nested parameter.
    fn destructure(&mut self, mlhs: &Node) -> Result<Destructure, CompileError> {
        let mut layout = Layout::default();
        for child in &mlhs.children {
            match child {
                Child::Lit(Literal::Sym(name)) => {
                    layout.required(Target::Var(Var::new(name.as_str())), 0);
                }
                Child::Lit(_) => return Err(malformed(mlhs, "expected an assignment target")),
                Child::Node(n) if n.tag == Tag::Splat => {
                    if layout.rest {
                        return Err(malformed(mlhs, "more than one splat target"));
                    }
                    let target = match (n.node(0), n.name(0)) {
                        (Some(inner), _) => self.target(inner)?,
                        (None, Some(name)) => Target::Var(Var::new(name)),
                        (None, None) => Target::Discard,
                    };
                    layout.rest(target);
                }
                Child::Node(n) if n.tag == Tag::Mlhs => {
                    let nested = self.destructure(n)?;
                    layout.required(Target::Nested(Box::new(nested)), 1);
                }
                Child::Node(n) => {
                    let target = self.target(n)?;
                    layout.required(target, 0);
                }
            }
        }
        Ok(layout.finish(false))
    }

    fn target(&mut self, node: &Node) -> Result<Target, CompileError> {
        let name = self.name_at(node, 0)?;
        Ok(match node.tag {
            Tag::Lasgn | Tag::Lvar => Target::Var(Var::new(name)),
            Tag::Iasgn => Target::Ivar(name),
            Tag::Gasgn => Target::Global(name),
            Tag::Cdecl => Target::Const(name),
            _ => return Err(unsupported(node, "assignment target")),
        })
    }

    fn case(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let (whens, fallback) = split_clauses(node, Tag::When);
        let subject = match node.node(0) {
            Some(subject) => {
                let tmp = self.temp("t");
                let value = self.expr(subject)?;
                Some((tmp, value))
            }
            None => None,
        };
        let mut acc = match fallback {
            Some(child) => self.value(child)?,
            None => Ir::Nil,
        };
        for clause in whens.iter().rev() {
            let patterns = clause
                .node(0)
                .filter(|n| n.tag == Tag::Array)
                .ok_or_else(|| malformed(clause, "expected a pattern list"))?;
            let mut tests = Vec::new();
            for pattern in &patterns.children {
                if matches!(pattern, Child::Node(n) if n.tag == Tag::Splat) {
                    return Err(unsupported(patterns, "splat in when clause"));
                }
                let pattern = self.value(pattern)?;
                tests.push(match &subject {
                    Some((tmp, _)) => case_eq(pattern, Ir::get(tmp)),
                    None => pattern,
                });
            }
            let body = self.seq(clause.children.get(1..).unwrap_or(&[]))?;
            acc = Ir::If(Box::new(or_chain(tests)), Box::new(body), Box::new(acc));
        }
        Ok(match subject {
            Some((tmp, value)) => Ir::Seq(vec![Ir::set(tmp, value), acc]),
            None => acc,
        })
    }

    fn case_in(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let (clauses, fallback) = split_clauses(node, Tag::In);
        let tmp = self.temp("t");
        let value = self.child_expr(node, 0)?;
        let mut acc = match fallback {
            Some(child) => self.value(child)?,
            None => Ir::call(
                None,
                "raise",
                vec![
                    Ir::GetConst("NoMatchingPatternError".into()),
                    Ir::call(Some(Ir::get(&tmp)), "inspect", vec![]),
                ],
            ),
        };
        for clause in clauses.iter().rev() {
            let pattern = clause
                .child(0)
                .ok_or_else(|| malformed(clause, "expected a pattern"))?;
            let mut test = self.pattern(pattern, &tmp)?;
            if clause.node(1).is_some() {
                let guard = self.child_expr(clause, 1)?;
                test = Ir::And(Box::new(test), Box::new(guard));
            }
            let body = self.seq(clause.children.get(2..).unwrap_or(&[]))?;
            acc = Ir::If(Box::new(test), Box::new(body), Box::new(acc));
        }
        Ok(Ir::Seq(vec![Ir::set(tmp, value), acc]))
    }

    /// A test that is truthy when `subject` (a variable name) matches,
    /// binding pattern variables as it goes.
    fn pattern(&mut self, pattern: &Child, subject: &str) -> Result<Ir, CompileError> {
        let node = match pattern {
            Child::Node(node) => node,
            Child::Lit(lit) => return Ok(case_eq(literal(lit), Ir::get(subject))),
        };
        Ok(match node.tag {
            Tag::Pvar => Ir::Seq(vec![Ir::set(self.name_at(node, 0)?, Ir::get(subject)), Ir::True]),
            Tag::Pwild => Ir::True,
            Tag::Palt => {
                let tests = node
                    .children
                    .iter()
                    .map(|p| self.pattern(p, subject))
                    .collect::<Result<Vec<_>, _>>()?;
                or_chain(tests)
            }
            Tag::Parray => self.array_pattern(node, subject)?,
            Tag::Phash => {
                let mut tests = vec![case_eq(Ir::GetConst("Hash".into()), Ir::get(subject))];
                for pair in &node.children {
                    let pair = match pair {
                        Child::Node(n) if n.tag == Tag::Pair => n,
                        _ => return Err(malformed(node, "expected key patterns")),
                    };
                    let key = self.name_at(pair, 0)?;
                    let has_key = Ir::call(Some(Ir::get(subject)), "key?", vec![Ir::Sym(key.clone())]);
                    let elem = self.temp("t");
                    let fetch = Ir::call(Some(Ir::get(subject)), "[]", vec![Ir::Sym(key.clone())]);
                    let inner = match pair.child(1) {
                        Some(child @ Child::Node(_)) => self.pattern(child, &elem)?,
                        _ => Ir::Seq(vec![Ir::set(key, Ir::get(&elem)), Ir::True]),
                    };
                    tests.push(Ir::And(
                        Box::new(has_key),
                        Box::new(Ir::Seq(vec![Ir::set(&elem, fetch), inner])),
                    ));
                }
                and_chain(tests)
            }
            _ => case_eq(self.expr(node)?, Ir::get(subject)),
        })
    }

    fn array_pattern(&mut self, node: &Node, subject: &str) -> Result<Ir, CompileError> {
        let mut layout = Layout::default();
        let mut elements = Vec::new();
        let mut fixed = 0i64;
        for child in &node.children {
            match child {
                Child::Node(p) if p.tag == Tag::Prest => {
                    if layout.rest {
                        return Err(malformed(node, "more than one rest pattern"));
                    }
                    layout.rest(optional_target(p));
                }
                other => {
                    let tmp = self.temp("t");
                    layout.required(Target::Var(Var::new(tmp.as_str())), 0);
                    elements.push((tmp, other));
                    fixed += 1;
                }
            }
        }
        let has_rest = layout.rest;
        let size = Ir::call(Some(Ir::get(subject)), "size", vec![]);
        let mut tests = vec![
            case_eq(Ir::GetConst("Array".into()), Ir::get(subject)),
            Ir::call(Some(size), if has_rest { ">=" } else { "==" }, vec![Ir::Int(fixed)]),
            Ir::MultiAssign {
                value: Box::new(Ir::get(subject)),
                pattern: layout.finish(false),
            },
        ];
        for (tmp, element) in elements {
            tests.push(self.pattern(element, &tmp)?);
        }
        Ok(and_chain(tests))
    }

    fn rescue(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let body = self.child_expr(node, 0)?;
        let (clauses, fallback) = split_clauses_from(node, 1, Tag::Resbody);
        let exc = self.temp("exc");
        let mut handler = Ir::Reraise(Box::new(Ir::get(&exc)));
        self.rescue_depth += 1;
        let mut lowered = Vec::new();
        for clause in &clauses {
            lowered.push(self.resbody(clause, &exc));
        }
        self.rescue_depth -= 1;
        for (test, body) in lowered.into_iter().rev().collect::<Result<Vec<_>, _>>()? {
            handler = Ir::If(Box::new(test), Box::new(body), Box::new(handler));
        }
        let else_ = match fallback {
            Some(child) => Some(Box::new(self.value(child)?)),
            None => None,
        };
        Ok(Ir::Protect {
            body: Box::new(body),
            rescue: Some(Box::new(Rescue { var: Var::new(exc), handler })),
            else_,
            ensure: None,
        })
    }

    fn resbody(&mut self, clause: &Node, exc: &str) -> Result<(Ir, Ir), CompileError> {
        let matchers = match clause.node(0) {
            Some(list) if list.tag == Tag::Array && !list.children.is_empty() => {
                let (mut items, flattened) = self.elements(&list.children)?;
                if flattened {
                    items.pop().unwrap_or(Ir::Nil)
                } else {
                    Ir::Array(items)
                }
            }
            Some(list) if list.tag != Tag::Array => {
                return Err(malformed(clause, "expected an exception class list"));
            }
            _ => Ir::Array(vec![Ir::GetConst("StandardError".into())]),
        };
        let test = Ir::RescueMatch { matchers: Box::new(matchers), exception: Box::new(Ir::get(exc)) };
        let mut steps = Vec::new();
        if let Some(target) = clause.node(1) {
            steps.push(self.assign(target, Ir::get(exc))?);
        }
        for child in clause.children.get(2..).unwrap_or(&[]) {
            steps.push(self.value(child)?);
        }
        if steps.is_empty() {
            steps.push(Ir::Nil);
        }
        Ok((test, Ir::seq(steps)))
    }

    fn class(&mut self, node: &Node) -> Result<Ir, CompileError> {
        let name = match node.node(0) {
            Some(n) if n.tag == Tag::Const => self.name_at(n, 0)?,
            _ => self.name_at(node, 0)?,
        };
        let module = node.tag == Tag::Module;
        let (superclass, body_start) = if module {
            (None, 1)
        } else {
            match node.node(1) {
                Some(s) => (Some(Box::new(self.expr(s)?)), 2),
                None => (None, 2),
            }
        };
        let body = node.children.get(body_start..).unwrap_or(&[]);
        let function = self.function(FunctionKind::Class, &name, None, body)?;
        Ok(Ir::DefClass { name, superclass, module, body: Box::new(function) })
    }
}

fn block_pass(children: &[Child]) -> Option<&Node> {
    children.iter().find_map(|c| match c {
        Child::Node(n) if n.tag == Tag::BlockPass => Some(n),
        _ => None,
    })
}

fn optional_target(node: &Node) -> Target {
    match node.name(0) {
        Some(name) => Target::Var(Var::new(name)),
        None => Target::Discard,
    }
}

fn split_clauses(node: &Node, tag: Tag) -> (Vec<&Node>, Option<&Child>) {
    split_clauses_from(node, 1, tag)
}

/// Clause nodes tagged `tag` from `start` on, plus a trailing else child.
fn split_clauses_from(node: &Node, start: usize, tag: Tag) -> (Vec<&Node>, Option<&Child>) {
    let mut clauses = Vec::new();
    let mut fallback = None;
    for child in node.children.get(start..).unwrap_or(&[]) {
        match child {
            Child::Node(n) if n.tag == tag => clauses.push(n),
            Child::Lit(Literal::Nil) => {}
            other => fallback = Some(other),
        }
    }
    (clauses, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexp::parse;

    fn lower(src: &str) -> Result<Ir, CompileError> {
        Ok(desugar(&parse(src).unwrap())?.body)
    }

    #[test]
    fn jump_keywords_need_a_target() {
        let err = lower("(break)").unwrap_err();
        assert!(matches!(err, CompileError::InvalidJump { keyword: "break", .. }));
        assert!(matches!(lower("(next)"), Err(CompileError::InvalidJump { keyword: "next", .. })));
        assert!(matches!(lower("(redo)"), Err(CompileError::InvalidJump { keyword: "redo", .. })));
        assert!(matches!(lower("(retry)"), Err(CompileError::InvalidJump { keyword: "retry", .. })));
        // A method body resets the enclosing loop.
        let err = lower("(while (true) (defn f (args) (break)))").unwrap_err();
        assert!(matches!(err, CompileError::InvalidJump { keyword: "break", .. }));
    }

    #[test]
    fn break_depends_on_context() {
        assert_eq!(
            lower("(while (true) (break (lit 1)))").unwrap(),
            Ir::While {
                cond: Box::new(Ir::True),
                body: Box::new(Ir::LoopBreak(Box::new(Ir::Int(1)))),
                until: false,
                body_first: false,
            }
        );
        let ir = lower("(iter (call nil :each) nil (break))").unwrap();
        let Ir::Call(call) = ir else { panic!("expected a call, got {ir:?}") };
        let Some(Ir::Closure(block)) = &call.block else { panic!("expected a block") };
        assert_eq!(block.body, Ir::Break(Box::new(Ir::Nil)));
    }

    #[test]
    fn retry_only_inside_rescue_handlers() {
        assert!(lower("(rescue (retry))").is_err());
        assert!(lower("(rescue (call nil :f) (resbody nil nil (retry)))").is_ok());
    }

    #[test]
    fn splat_arguments_are_flattened() {
        let ir = lower("(call nil :f (lit 1) (splat (lvar :a)) (lit 2))").unwrap();
        let Ir::Call(call) = ir else { panic!() };
        assert!(call.flattened);
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.flags(), [true, false, true, false]);
        assert!(matches!(call.args[0], Ir::ArrayConcat(..)));
    }

    #[test]
    fn block_given_is_an_instruction() {
        assert_eq!(lower("(call nil :block_given?)").unwrap(), Ir::BlockGiven);
    }

    #[test]
    fn parameter_layout() {
        let src = "(defn f (args a (opt b (lit 1)) (rest r) c (kw k) (kw j (lit 2)) (blockarg blk)) (nil))";
        let Ir::DefMethod(f) = lower(src).unwrap() else { panic!() };
        let list = &f.params.bind.list;
        assert_eq!(list.min_required, 2);
        assert_eq!(list.max_allowed, None);
        assert!(!list.autosplat);
        let positions: Vec<_> = list.params.iter().map(|p| p.position).collect();
        assert_eq!(
            positions,
            vec![
                Position::Left(0),
                Position::Left(1),
                Position::Left(2),
                Position::Right(0),
                Position::None,
                Position::None,
                Position::None,
            ]
        );
        assert_eq!(list.params[4].kind, ParamKind::Keyword { key: "k".into(), required: true });
        assert!(list.params[5].has_default);
        assert_eq!(list.params[6].kind, ParamKind::Block);
        assert_eq!(f.params.defaults.len(), 2);
    }

    #[test]
    fn block_autosplat() {
        let Ir::Call(call) = lower("(iter (call nil :each) (args a b) (nil))").unwrap() else {
            panic!()
        };
        let Some(Ir::Closure(block)) = &call.block else { panic!() };
        assert!(block.params.bind.list.autosplat);

        let Ir::Call(call) = lower("(iter (call nil :each) (args a) (nil))").unwrap() else {
            panic!()
        };
        let Some(Ir::Closure(block)) = &call.block else { panic!() };
        assert!(!block.params.bind.list.autosplat);
    }

    #[test]
    fn when_rejects_splat() {
        let err = lower("(case (lit 1) (when (array (splat (lvar :xs))) (nil)))").unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { .. }));
    }

    #[test]
    fn ensure_merges_into_rescue() {
        let ir = lower("(ensure (rescue (lit 1) (resbody nil nil (lit 2))) (lit 3))").unwrap();
        let Ir::Protect { rescue, ensure, .. } = ir else { panic!("{ir:?}") };
        assert!(rescue.is_some());
        assert_eq!(ensure.map(|e| *e), Some(Ir::Int(3)));
    }

    #[test]
    fn unexpected_tags_are_rejected() {
        assert!(matches!(lower("(pvar :x)"), Err(CompileError::UnexpectedTag { .. })));
        assert!(matches!(lower("(lasgn :x)"), Err(CompileError::Malformed { .. })));
    }

    #[test]
    fn positions_are_kept() {
        let ir = lower("(call@4:2 nil :puts)").unwrap();
        assert!(matches!(ir, Ir::Located(Pos { line: 4, column: 2 }, _)));
    }
}

//! Argument-binding descriptors.
//!
//! A parameter list is compiled once into an [`ArgList`] and carried as the
//! byte-string operand of `bind_args` / `bind_array`. The same list drives
//! binding for methods, blocks, lambdas and destructuring; only arity
//! strictness differs between callers.
//!
//! Wire layout:
//!
//! ```text
//! flags:u8 (bit0 autosplat)
//! min_required:ber  max_allowed+1:ber (0 = unbounded)  count:ber
//! count × { kind:u8  flags:u8 (bit0 has_default, bit1 from_right)
//!           position:ber  destructure_depth:ber  [key:bytes] }
//! ```

use crate::ber;
use crate::{DecodeError, DescriptorError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Required,
    Optional,
    Rest,
    Keyword { key: String, required: bool },
    KeywordRest,
    Block,
}

/// Where a positional parameter reads from in the argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left(u32),
    /// Counted from the end; `Right(0)` is the last argument.
    Right(u32),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDescriptor {
    pub kind: ParamKind,
    pub position: Position,
    pub has_default: bool,
    /// Nesting depth for parameters destructured as arrays.
    pub destructure_depth: u32,
}

impl ArgDescriptor {
    pub fn new(kind: ParamKind, position: Position) -> Self {
        Self { kind, position, has_default: false, destructure_depth: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgList {
    pub params: Vec<ArgDescriptor>,
    pub min_required: u32,
    /// `None` when a rest parameter accepts any number of arguments.
    pub max_allowed: Option<u32>,
    /// Spread a single array argument across the parameters (lenient
    /// callers only).
    pub autosplat: bool,
}

impl ArgList {
    pub fn has_keywords(&self) -> bool {
        self.params.iter().any(|p| {
            matches!(p.kind, ParamKind::Keyword { .. } | ParamKind::KeywordRest)
        })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Human readable arity, as used in argument errors (`1`, `1..2`, `1+`).
    pub fn arity_text(&self) -> String {
        match self.max_allowed {
            Some(max) if max == self.min_required => max.to_string(),
            Some(max) => format!("{}..{}", self.min_required, max),
            None => format!("{}+", self.min_required),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.autosplat as u8);
        ber::write_uint(&mut buf, u64::from(self.min_required));
        ber::write_uint(&mut buf, self.max_allowed.map_or(0, |m| u64::from(m) + 1));
        ber::write_uint(&mut buf, self.params.len() as u64);
        for param in &self.params {
            let kind = match &param.kind {
                ParamKind::Required => 0,
                ParamKind::Optional => 1,
                ParamKind::Rest => 2,
                ParamKind::Keyword { required: true, .. } => 3,
                ParamKind::Keyword { required: false, .. } => 4,
                ParamKind::KeywordRest => 5,
                ParamKind::Block => 6,
            };
            buf.push(kind);
            let (from_right, position) = match param.position {
                Position::Left(i) => (false, i),
                Position::Right(i) => (true, i),
                Position::None => (false, 0),
            };
            buf.push(param.has_default as u8 | (from_right as u8) << 1);
            ber::write_uint(&mut buf, u64::from(position));
            ber::write_uint(&mut buf, u64::from(param.destructure_depth));
            if let ParamKind::Keyword { key, .. } = &param.kind {
                ber::write_bytes(&mut buf, key.as_bytes());
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let mut pos = 0;
        let autosplat = read_u8(bytes, &mut pos)? & 1 == 1;
        let min_required = read_u32(bytes, &mut pos)?;
        let max_allowed = match read_u32(bytes, &mut pos)? {
            0 => None,
            n => Some(n - 1),
        };
        let count = read_u32(bytes, &mut pos)?;
        let mut params = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let kind_byte = read_u8(bytes, &mut pos)?;
            let flags = read_u8(bytes, &mut pos)?;
            let position = read_u32(bytes, &mut pos)?;
            let destructure_depth = read_u32(bytes, &mut pos)?;
            let kind = match kind_byte {
                0 => ParamKind::Required,
                1 => ParamKind::Optional,
                2 => ParamKind::Rest,
                3 | 4 => {
                    let key = ber::read_bytes(bytes, &mut pos)?;
                    let key = core::str::from_utf8(key)
                        .map_err(|_| DescriptorError::BadKeyword)?
                        .to_string();
                    ParamKind::Keyword { key, required: kind_byte == 3 }
                }
                5 => ParamKind::KeywordRest,
                6 => ParamKind::Block,
                other => return Err(DescriptorError::UnknownKind(other)),
            };
            let position = match kind {
                ParamKind::Required | ParamKind::Optional | ParamKind::Rest => {
                    if flags & 2 != 0 {
                        Position::Right(position)
                    } else {
                        Position::Left(position)
                    }
                }
                _ => Position::None,
            };
            params.push(ArgDescriptor {
                kind,
                position,
                has_default: flags & 1 != 0,
                destructure_depth,
            });
        }
        if pos != bytes.len() {
            return Err(DescriptorError::TrailingBytes(bytes.len() - pos));
        }
        let list = Self { params, min_required, max_allowed, autosplat };
        list.check()?;
        Ok(list)
    }

    /// Counts and positions must agree with the parameters: leading
    /// required and optional parameters occupy `Left(0..lead)`, a rest
    /// parameter sits at `Left(lead)` and post parameters at
    /// `Right(0..post)`.
    pub fn check(&self) -> Result<(), DescriptorError> {
        let count = |pred: fn(&ArgDescriptor) -> bool| self.params.iter().filter(|p| pred(p)).count();
        let leading = count(|p| p.kind == ParamKind::Required && matches!(p.position, Position::Left(_)));
        let post = count(|p| p.kind == ParamKind::Required && matches!(p.position, Position::Right(_)));
        let optional = count(|p| p.kind == ParamKind::Optional);
        let rest = count(|p| p.kind == ParamKind::Rest);
        let required = leading + post;

        if required != self.min_required as usize {
            return Err(DescriptorError::Inconsistent("min_required differs from the required parameters"));
        }
        if rest > 1
            || count(|p| p.kind == ParamKind::KeywordRest) > 1
            || count(|p| p.kind == ParamKind::Block) > 1
        {
            return Err(DescriptorError::Inconsistent("repeated rest, keyword rest or block parameter"));
        }
        let expected_max = if rest == 1 { None } else { Some(required + optional) };
        if self.max_allowed.map(|max| max as usize) != expected_max {
            return Err(DescriptorError::Inconsistent("max_allowed differs from the positional parameters"));
        }
        let lead = leading + optional;
        for param in &self.params {
            let in_range = match (&param.kind, param.position) {
                (ParamKind::Required | ParamKind::Optional, Position::Left(i)) => (i as usize) < lead,
                (ParamKind::Required, Position::Right(j)) => (j as usize) < post,
                (ParamKind::Rest, Position::Left(i)) => i as usize == lead,
                (ParamKind::Optional | ParamKind::Rest, _) => false,
                (_, position) => position == Position::None,
            };
            if !in_range {
                return Err(DescriptorError::Inconsistent("parameter position out of range"));
            }
        }
        Ok(())
    }
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    let byte = *bytes.get(*pos).ok_or(DecodeError::Truncated { offset: *pos })?;
    *pos += 1;
    Ok(byte)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    let start = *pos;
    let value = ber::read_uint(bytes, pos)?;
    u32::try_from(value).map_err(|_| DecodeError::Overlong { offset: start })
}

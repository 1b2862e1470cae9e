//! Argument binding against an [`ArgList`].
//!
//! The same routine serves `bind_args` (methods, lambdas, blocks) and
//! `bind_array` (destructuring). Methods and lambdas bind strictly; blocks
//! and destructuring pad missing positions with nil and drop extras.

use std::sync::Arc;

use bytecode::{ArgList, ParamKind, Position};
use thiserror::Error;

use crate::value::{HashTable, Proc, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("wrong number of arguments (given {given}, expected {expected})")]
    Arity { given: usize, expected: String },
    #[error("missing keyword{}: {}", plural(.0), keyword_list(.0))]
    MissingKeywords(Vec<String>),
    #[error("unknown keyword{}: {}", plural(.0), keyword_list(.0))]
    UnknownKeywords(Vec<String>),
}

fn plural(keys: &[String]) -> &'static str {
    if keys.len() == 1 { "" } else { "s" }
}

fn keyword_list(keys: &[String]) -> String {
    keys.iter().map(|k| format!(":{k}")).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Strict,
    Lenient,
}

/// Incoming arguments of one call.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub kwargs: Option<Value>,
    pub block: Option<Arc<Proc>>,
}

/// Bind `args` to `list`, producing one value per descriptor in order.
/// Optional parameters and keywords that were not passed come back as
/// [`Value::Undefined`] so the caller's default code can fill them.
pub fn bind(list: &ArgList, args: Args, strictness: Strictness) -> Result<Vec<Value>, BindError> {
    let Args { mut positional, kwargs, block } = args;
    let has_keywords = list.has_keywords();

    let mut keywords = match kwargs {
        Some(Value::Hash(table)) if has_keywords => table.lock().clone(),
        Some(hash) => {
            positional.push(hash);
            HashTable::new()
        }
        None => HashTable::new(),
    };

    if strictness == Strictness::Lenient && list.autosplat && positional.len() == 1 {
        if let Value::Array(items) = &positional[0] {
            let items = items.lock().clone();
            positional = items;
        }
    }

    let required = list.min_required as usize;
    let given = positional.len();
    let too_few = given < required;
    let too_many = list.max_allowed.is_some_and(|max| given > max as usize);
    if too_few || too_many {
        if strictness == Strictness::Strict {
            return Err(BindError::Arity { given, expected: list.arity_text() });
        }
        if too_few {
            positional.resize(required, Value::Nil);
        } else if let Some(max) = list.max_allowed {
            positional.truncate(max as usize);
        }
    }

    let n = positional.len();
    let left = list
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Required && matches!(p.position, Position::Left(_)))
        .count();
    let post = required.saturating_sub(left);
    let optional = list.params.iter().filter(|p| p.kind == ParamKind::Optional).count();
    let opt_filled = n.saturating_sub(required).min(optional);

    let mut out = Vec::with_capacity(list.len());
    let mut missing = Vec::new();
    let mut kwrest = false;
    for param in &list.params {
        let value = match (&param.kind, param.position) {
            (ParamKind::Required, Position::Left(i)) => at(&positional, i as usize),
            (ParamKind::Required, Position::Right(j)) => n
                .checked_sub(j as usize + 1)
                .map_or(Value::Nil, |i| at(&positional, i)),
            (ParamKind::Optional, Position::Left(i)) => {
                if (i as usize) < left + opt_filled {
                    at(&positional, i as usize)
                } else {
                    Value::Undefined
                }
            }
            (ParamKind::Rest, _) => {
                let start = left + opt_filled;
                let end = n - post;
                Value::array(positional.get(start..end).unwrap_or(&[]).to_vec())
            }
            (ParamKind::Keyword { key, required }, _) => {
                match keywords.remove(&Value::symbol(key)) {
                    Some(value) => value,
                    None if *required => {
                        missing.push(key.clone());
                        Value::Nil
                    }
                    None => Value::Undefined,
                }
            }
            (ParamKind::KeywordRest, _) => {
                kwrest = true;
                Value::Nil
            }
            (ParamKind::Block, _) => block.clone().map_or(Value::Nil, Value::Proc),
            _ => Value::Nil,
        };
        out.push(value);
    }

    if !missing.is_empty() {
        return Err(BindError::MissingKeywords(missing));
    }
    if kwrest {
        // Fill in after all named keywords have been removed.
        if let Some(index) = list.params.iter().position(|p| p.kind == ParamKind::KeywordRest) {
            out[index] = Value::hash(std::mem::take(&mut keywords));
        }
    } else if !keywords.is_empty() {
        let unknown = keywords
            .keys()
            .map(|key| match key {
                Value::Symbol(name) => name.to_string(),
                other => other.describe(),
            })
            .collect();
        return Err(BindError::UnknownKeywords(unknown));
    }
    Ok(out)
}

fn at(values: &[Value], index: usize) -> Value {
    values.get(index).cloned().unwrap_or_default()
}

/// Elements of a destructuring source: arrays spread, anything else is a
/// single element.
pub fn destructure_source(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.lock().clone(),
        other => vec![other.clone()],
    }
}

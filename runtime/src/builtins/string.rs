use std::sync::Arc;

use vm::{Call, ErrorKind, Proc, Unwind, Value, Vm};

use crate::Runtime;
use crate::builtins::numeric::ordering_value;
use crate::builtins::{
    Builtin, arg, conversion_error, expect_int, expect_string, quote, symbol_inspect, to_s,
};

pub static STRING: &[Builtin] = &[
    Builtin::new("+", 1, concat),
    Builtin::new("*", 1, repeat),
    Builtin::new("==", 1, string_eq),
    Builtin::new("===", 1, string_eq),
    Builtin::new("eql?", 1, string_eq),
    Builtin::new("<=>", 1, string_cmp),
    Builtin::new("<<", 1, append),
    Builtin::new("length", 0, length),
    Builtin::new("size", 0, length),
    Builtin::new("to_s", 0, string_to_s),
    Builtin::new("to_str", 0, string_to_s),
    Builtin::new("to_sym", 0, string_to_sym),
    Builtin::new("to_i", 0, string_to_i),
    Builtin::new("to_f", 0, string_to_f),
    Builtin::new("inspect", 0, string_inspect),
    Builtin::new("upcase", 0, upcase),
    Builtin::new("downcase", 0, downcase),
    Builtin::new("capitalize", 0, capitalize),
    Builtin::new("reverse", 0, reverse),
    Builtin::new("strip", 0, strip),
    Builtin::new("chars", 0, chars),
    Builtin::new("split", -1, split),
    Builtin::new("include?", 1, include),
    Builtin::new("start_with?", 1, start_with),
    Builtin::new("end_with?", 1, end_with),
    Builtin::new("empty?", 0, is_empty),
    Builtin::new("[]", -2, index),
    Builtin::new("dup", 0, dup),
];

pub static SYMBOL: &[Builtin] = &[
    Builtin::new("to_s", 0, symbol_to_s),
    Builtin::new("name", 0, symbol_to_s),
    Builtin::new("to_sym", 0, symbol_to_sym),
    Builtin::new("to_proc", 0, symbol_to_proc),
    Builtin::new("inspect", 0, symbol_inspect_method),
    Builtin::new("length", 0, symbol_length),
    Builtin::new("size", 0, symbol_length),
    Builtin::new("<=>", 1, symbol_cmp),
];

fn text(call: &Call) -> String {
    match &call.receiver {
        Value::String(s) => s.lock().clone(),
        _ => String::new(),
    }
}

fn concat(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let other = expect_string(vm, &arg(&call, 0))?;
    Ok(Value::string(text(&call) + &other))
}

fn repeat(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let times = expect_int(vm, &arg(&call, 0))?;
    let times = usize::try_from(times).map_err(|_| vm.error(ErrorKind::Argument, "negative argument"))?;
    Ok(Value::string(text(&call).repeat(times)))
}

fn string_eq(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let equal = match arg(&call, 0) {
        Value::String(other) => *other.lock() == text(&call),
        _ => false,
    };
    Ok(Value::Bool(equal))
}

fn string_cmp(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(match arg(&call, 0) {
        Value::String(other) => {
            let other = other.lock().clone();
            ordering_value(text(&call).cmp(&other))
        }
        _ => Value::Nil,
    })
}

/// Appends in place. Integers append the codepoint.
fn append(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let addition = match arg(&call, 0) {
        Value::String(other) => other.lock().clone(),
        Value::Integer(codepoint) => u32::try_from(codepoint)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| vm.error(ErrorKind::Argument, format!("{codepoint} out of char range")))?,
        other => return Err(conversion_error(vm, &other, "String")),
    };
    if let Value::String(s) = &call.receiver {
        s.lock().push_str(&addition);
    }
    Ok(call.receiver)
}

fn length(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(text(&call).chars().count() as i64))
}

fn string_to_s(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn string_to_sym(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Symbol(vm.context().intern(&text(&call))))
}

/// Leading integer, 0 when there is none.
fn string_to_i(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let text = text(&call);
    let trimmed = text.trim_start();
    let sign_len = usize::from(trimmed.starts_with(['-', '+']));
    let digits = trimmed[sign_len..].chars().take_while(char::is_ascii_digit).count();
    let value = trimmed[..sign_len + digits].parse::<i64>().unwrap_or(0);
    Ok(Value::Integer(value))
}

fn string_to_f(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let text = text(&call);
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')))
        .count();
    Ok(Value::Float(trimmed[..end].parse::<f64>().unwrap_or(0.0)))
}

fn string_inspect(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(quote(&text(&call))))
}

fn upcase(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(text(&call).to_uppercase()))
}

fn downcase(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(text(&call).to_lowercase()))
}

fn capitalize(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let text = text(&call);
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    Ok(Value::string(capitalized))
}

fn reverse(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(text(&call).chars().rev().collect::<String>()))
}

fn strip(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(text(&call).trim()))
}

fn chars(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::array(text(&call).chars().map(|c| Value::string(c.to_string())).collect()))
}

/// Splits on runs of whitespace, or on the given separator.
fn split(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let text = text(&call);
    let parts: Vec<Value> = match call.args.first() {
        None | Some(Value::Nil) => text.split_whitespace().map(Value::string).collect(),
        Some(separator) => {
            let separator = expect_string(vm, separator)?;
            let mut parts: Vec<&str> = if separator.is_empty() {
                text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
            } else {
                text.split(separator.as_str()).collect()
            };
            while parts.last().is_some_and(|part| part.is_empty()) {
                parts.pop();
            }
            parts.into_iter().map(Value::string).collect()
        }
    };
    Ok(Value::array(parts))
}

fn include(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let needle = expect_string(vm, &arg(&call, 0))?;
    Ok(Value::Bool(text(&call).contains(&needle)))
}

fn start_with(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let prefix = expect_string(vm, &arg(&call, 0))?;
    Ok(Value::Bool(text(&call).starts_with(&prefix)))
}

fn end_with(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let suffix = expect_string(vm, &arg(&call, 0))?;
    Ok(Value::Bool(text(&call).ends_with(&suffix)))
}

fn is_empty(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Bool(text(&call).is_empty()))
}

/// `s[i]` or `s[start, length]`, counting characters. Negative indexes
/// count from the end.
fn index(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    let chars: Vec<char> = text(&call).chars().collect();
    let len = chars.len() as i64;
    let start = expect_int(vm, &arg(&call, 0))?;
    let start = if start < 0 { start + len } else { start };
    if call.args.len() > 2 {
        return Err(vm.error(
            ErrorKind::Argument,
            format!("wrong number of arguments (given {}, expected 1..2)", call.args.len()),
        ));
    }
    let count = match call.args.get(1) {
        Some(count) => expect_int(vm, count)?,
        None => {
            return Ok(match usize::try_from(start).ok().and_then(|i| chars.get(i)) {
                Some(c) => Value::string(c.to_string()),
                None => Value::Nil,
            });
        }
    };
    if start < 0 || start > len || count < 0 {
        return Ok(Value::Nil);
    }
    let end = (start + count).min(len);
    Ok(Value::string(chars[start as usize..end as usize].iter().collect::<String>()))
}

fn dup(_rt: &Runtime, vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(to_s(vm, &call.receiver)?))
}

fn symbol_name(call: &Call) -> Arc<str> {
    match &call.receiver {
        Value::Symbol(name) => Arc::clone(name),
        _ => Arc::from(""),
    }
}

fn symbol_to_s(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(&*symbol_name(&call)))
}

fn symbol_to_sym(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(call.receiver)
}

fn symbol_to_proc(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Proc(Arc::new(Proc::Symbol(symbol_name(&call)))))
}

fn symbol_inspect_method(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::string(symbol_inspect(&symbol_name(&call))))
}

fn symbol_length(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(Value::Integer(symbol_name(&call).chars().count() as i64))
}

fn symbol_cmp(_rt: &Runtime, _vm: &mut Vm, call: Call) -> Result<Value, Unwind> {
    Ok(match arg(&call, 0) {
        Value::Symbol(other) => ordering_value(symbol_name(&call).cmp(&other)),
        _ => Value::Nil,
    })
}

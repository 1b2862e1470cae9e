use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytecode::{ArgList, Op, SourceMap, decode_at};
use parking_lot::Mutex;

use crate::env::Env;

pub type Symbol = Arc<str>;
pub type FrameId = u64;

/// Downcasting support for [`Object`] implementors.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Heap objects owned by the object model (classes, instances, exceptions,
/// fibers). The interpreter only moves them around.
pub trait Object: AsAny + Send + Sync + fmt::Debug + 'static {}

/// A guest value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    /// Marker for a parameter that was not passed; never visible to guest
    /// code.
    Undefined,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Symbol(Symbol),
    String(Arc<Mutex<String>>),
    Array(Arc<Mutex<Vec<Value>>>),
    Hash(Arc<Mutex<HashTable>>),
    Proc(Arc<Proc>),
    Object(Arc<dyn Object>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::new(Mutex::new(s.into())))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn hash(table: HashTable) -> Value {
        Value::Hash(Arc::new(Mutex::new(table)))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Arc::from(name))
    }

    pub fn object<T: Object>(object: T) -> Value {
        Value::Object(Arc::new(object))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Undefined)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_proc(&self) -> Option<&Arc<Proc>> {
        match self {
            Value::Proc(p) => Some(p),
            _ => None,
        }
    }

    /// The object behind `self` if it is an `Object` of type `T`.
    pub fn downcast<T: Object>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => AsAny::as_any(&**obj).downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Same object: pointer identity for heap values, value equality for
    /// immediates.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Arc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    /// Structural equality used for hash keys. Contents are copied out
    /// before comparing so two locks are never held at once.
    pub fn eql(&self, other: &Value) -> bool {
        if self.identical(other) {
            return true;
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => {
                let a = a.lock().clone();
                *b.lock() == a
            }
            (Value::Array(a), Value::Array(b)) => {
                let a = a.lock().clone();
                let b = b.lock().clone();
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.eql(y))
            }
            _ => false,
        }
    }

    /// Short description for diagnostics when no guest `to_s` is available.
    pub fn describe(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Undefined => "undefined".into(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(x) => format!("{x:?}"),
            Value::Symbol(s) => format!(":{s}"),
            Value::String(s) => format!("{:?}", s.lock()),
            Value::Array(items) => format!("#<Array:{}>", items.lock().len()),
            Value::Hash(table) => format!("#<Hash:{}>", table.lock().len()),
            Value::Proc(_) => "#<Proc>".into(),
            Value::Object(obj) => format!("{obj:?}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Insertion-ordered hash table keyed by [`Value::eql`].
#[derive(Debug, Clone, Default)]
pub struct HashTable {
    entries: Vec<(Value, Value)>,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.eql(key)).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k.eql(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k.eql(key))?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl FromIterator<(Value, Value)> for HashTable {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut table = HashTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

/// One loaded code buffer. Method and block bodies are ranges inside it.
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub code: Vec<u8>,
    pub source_map: SourceMap,
}

impl Unit {
    pub fn new(name: impl Into<String>, code: Vec<u8>, source_map: SourceMap) -> Self {
        Self { name: name.into(), code, source_map }
    }

    /// The parameter list bound at the start of a body, skipping a leading
    /// `alloc_env`.
    pub fn params_at(&self, start: usize, end: usize) -> Option<ArgList> {
        let code = self.code.get(..end)?;
        let (insn, next) = decode_at(code, start).ok()?;
        let insn = if insn.op == Op::AllocEnv { decode_at(code, next).ok()?.0 } else { insn };
        match insn.op {
            Op::BindArgs => ArgList::decode(insn.bytes(0)).ok(),
            _ => None,
        }
    }
}

/// A method body as defined by `define_method`.
#[derive(Debug)]
pub struct MethodBody {
    pub name: String,
    pub unit: Arc<Unit>,
    pub start: usize,
    pub end: usize,
}

impl MethodBody {
    pub fn params(&self) -> ArgList {
        self.unit.params_at(self.start, self.end).unwrap_or_default()
    }
}

/// A block or lambda together with everything it closed over.
#[derive(Debug)]
pub struct Closure {
    /// Name shown in backtraces, e.g. `block in each_pair`.
    pub name: String,
    pub unit: Arc<Unit>,
    pub start: usize,
    pub end: usize,
    pub env: Option<Arc<Env>>,
    pub self_value: Value,
    pub definee: Value,
    pub lambda: bool,
    /// Target of `break`: the frame that evaluated the block literal.
    pub defining_frame: FrameId,
    /// Distinguishes this evaluation of the literal; `break` stops at the
    /// send that carried it.
    pub id: u64,
    /// Target of `return` for non-lambda blocks.
    pub home: FrameId,
    /// Block visible to `yield` inside the body.
    pub outer_block: Option<Arc<Proc>>,
}

#[derive(Debug)]
pub enum Proc {
    Closure(Closure),
    /// `&:name`: sends `name` to its first argument.
    Symbol(Symbol),
}

impl Proc {
    pub fn is_lambda(&self) -> bool {
        match self {
            Proc::Closure(closure) => closure.lambda,
            Proc::Symbol(_) => true,
        }
    }

    pub fn params(&self) -> ArgList {
        match self {
            Proc::Closure(c) => c.unit.params_at(c.start, c.end).unwrap_or_default(),
            Proc::Symbol(_) => ArgList {
                min_required: 1,
                max_allowed: None,
                ..Default::default()
            },
        }
    }

    /// Arity as reported to guest code: negative when optional or rest
    /// parameters are present (and the block is a lambda, for optionals).
    pub fn arity(&self) -> i64 {
        let params = self.params();
        let required = i64::from(params.min_required);
        match params.max_allowed {
            Some(max) if max == params.min_required => required,
            Some(_) if !self.is_lambda() => required,
            _ => -required - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Point(i64);
    impl Object for Point {}

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn identity_versus_eql() {
        let a = Value::string("x");
        let b = Value::string("x");
        assert!(!a.identical(&b));
        assert!(a.eql(&b));
        assert!(a.eql(&a));
        assert!(!Value::Integer(1).eql(&Value::Float(1.0)));
        assert!(Value::array(vec![a.clone()]).eql(&Value::array(vec![b])));
    }

    #[test]
    fn hash_table_keeps_insertion_order() {
        let mut table = HashTable::new();
        table.insert(Value::symbol("b"), Value::Integer(1));
        table.insert(Value::symbol("a"), Value::Integer(2));
        table.insert(Value::string("k"), Value::Integer(3));
        table.insert(Value::symbol("b"), Value::Integer(4));
        let keys: Vec<_> = table.keys().map(Value::describe).collect();
        assert_eq!(keys, vec![":b", ":a", "\"k\""]);
        assert_eq!(table.get(&Value::string("k")).and_then(Value::as_int), Some(3));
        assert_eq!(table.remove(&Value::symbol("a")).and_then(|v| v.as_int()), Some(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn downcast_objects() {
        let v = Value::object(Point(7));
        assert_eq!(v.downcast::<Point>().map(|p| p.0), Some(7));
        assert!(Value::Nil.downcast::<Point>().is_none());
        assert!(v.identical(&v.clone()));
    }
}

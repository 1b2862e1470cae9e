use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::value::{FrameId, Symbol, Value};

/// Process-wide state shared by every VM running the same program.
#[derive(Debug, Default)]
pub struct Context {
    globals: RwLock<HashMap<String, Value>>,
    symbols: Mutex<HashSet<Symbol>>,
    next_frame: AtomicU64,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.read().get(name).cloned().unwrap_or_default()
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.write().insert(name.to_string(), value);
    }

    pub fn intern(&self, name: &str) -> Symbol {
        let mut symbols = self.symbols.lock();
        if let Some(symbol) = symbols.get(name) {
            return symbol.clone();
        }
        let symbol: Symbol = Symbol::from(name);
        symbols.insert(symbol.clone());
        symbol
    }

    /// Frame ids are unique across all VMs sharing this context, so a
    /// `break` or `return` can never land in another VM's frame.
    pub(crate) fn next_frame_id(&self) -> FrameId {
        self.next_frame.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn interning_shares_storage() {
        let ctx = Context::new();
        let a = ctx.intern("each");
        let b = ctx.intern("each");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn globals_default_to_nil() {
        let ctx = Context::new();
        assert!(ctx.global("$x").is_nil());
        ctx.set_global("$x", Value::Integer(3));
        assert_eq!(ctx.global("$x").as_int(), Some(3));
    }

    #[test]
    fn frame_ids_are_unique() {
        let ctx = Context::new();
        let a = ctx.next_frame_id();
        let b = ctx.next_frame_id();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }
}

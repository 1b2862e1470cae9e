use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::Value;

/// Shared storage for captured variables. Each frame that owns captured
/// slots allocates one, chained to the environment it was created in.
#[derive(Debug)]
pub struct Env {
    slots: Mutex<Vec<Value>>,
    parent: Option<Arc<Env>>,
}

impl Env {
    pub fn new(size: usize, parent: Option<Arc<Env>>) -> Arc<Env> {
        Arc::new(Env { slots: Mutex::new(vec![Value::Nil; size]), parent })
    }

    pub fn parent(&self) -> Option<&Arc<Env>> {
        self.parent.as_ref()
    }

    fn up(self: &Arc<Self>, depth: u64) -> Option<&Arc<Env>> {
        let mut env = self;
        for _ in 0..depth {
            env = env.parent.as_ref()?;
        }
        Some(env)
    }

    pub fn get(self: &Arc<Self>, depth: u64, index: u64) -> Option<Value> {
        let env = self.up(depth)?;
        let slots = env.slots.lock();
        slots.get(usize::try_from(index).ok()?).cloned()
    }

    /// Returns `false` when the slot does not exist.
    pub fn set(self: &Arc<Self>, depth: u64, index: u64, value: Value) -> bool {
        let Some(env) = self.up(depth) else {
            return false;
        };
        let mut slots = env.slots.lock();
        match usize::try_from(index).ok().and_then(|i| slots.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_lookup() {
        let outer = Env::new(2, None);
        let inner = Env::new(1, Some(outer.clone()));
        assert!(inner.set(1, 1, Value::Integer(5)));
        assert_eq!(outer.get(0, 1).and_then(|v| v.as_int()), Some(5));
        assert_eq!(inner.get(1, 1).and_then(|v| v.as_int()), Some(5));
        assert!(inner.get(0, 0).is_some_and(|v| v.is_nil()));
        assert!(inner.get(2, 0).is_none());
        assert!(!inner.set(0, 3, Value::Nil));
    }

    #[test]
    fn writes_are_shared() {
        let env = Env::new(1, None);
        let alias = env.clone();
        env.set(0, 0, Value::Integer(1));
        alias.set(0, 0, Value::Integer(2));
        assert_eq!(env.get(0, 0).and_then(|v| v.as_int()), Some(2));
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::value::Value;

#[derive(Debug, Default)]
struct Pending {
    flag: AtomicBool,
    exception: Mutex<Option<Value>>,
}

/// Raises an exception into a running VM from another thread. The VM polls
/// between instructions, so the exception surfaces at the next instruction
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    pending: Arc<Pending>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, exception: Value) {
        *self.pending.exception.lock() = Some(exception);
        self.pending.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.flag.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> Option<Value> {
        if !self.pending.flag.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.pending.exception.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_request() {
        let handle = InterruptHandle::new();
        assert!(handle.take().is_none());
        handle.clone().raise(Value::Integer(1));
        assert!(handle.is_pending());
        assert_eq!(handle.take().and_then(|v| v.as_int()), Some(1));
        assert!(!handle.is_pending());
        assert!(handle.take().is_none());
    }
}

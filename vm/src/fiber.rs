//! Fibers as OS threads handing control back and forth.
//!
//! A fiber runs its block on a thread of its own with a fresh [`Vm`]. The
//! resumer and the fiber exchange [`Transfer`]s through two mailboxes, and
//! exactly one side runs at any moment; the other waits on its mailbox.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::bind::Args;
use crate::dispatch::ErrorKind;
use crate::interpreter::Vm;
use crate::unwind::{Fault, Unwind};
use crate::value::{Object, Proc, Value};

const FIBER_STACK: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub(crate) enum Transfer {
    Empty,
    Resume(Vec<Value>),
    Yield(Value),
    Finished(Result<Value, Unwind>),
    /// The fiber object was dropped while suspended.
    Abandon,
}

#[derive(Debug)]
struct Mailbox {
    slot: Mutex<Transfer>,
    ready: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self { slot: Mutex::new(Transfer::Empty), ready: Condvar::new() }
    }

    fn send(&self, transfer: Transfer) {
        *self.slot.lock() = transfer;
        self.ready.notify_one();
    }

    fn receive(&self) -> Transfer {
        let mut slot = self.slot.lock();
        while matches!(*slot, Transfer::Empty) {
            self.ready.wait(&mut slot);
        }
        std::mem::replace(&mut *slot, Transfer::Empty)
    }
}

/// The two directions between a fiber and whoever resumes it.
#[derive(Debug)]
pub(crate) struct Link {
    to_fiber: Mailbox,
    to_resumer: Mailbox,
}

impl Link {
    fn new() -> Self {
        Self { to_fiber: Mailbox::new(), to_resumer: Mailbox::new() }
    }

    /// Called on the fiber's thread: hand `value` out and block until the
    /// next resume.
    pub(crate) fn suspend(&self, value: Value) -> Result<Vec<Value>, Unwind> {
        self.to_resumer.send(Transfer::Yield(value));
        match self.to_fiber.receive() {
            Transfer::Resume(args) => Ok(args),
            _ => Err(Fault::FiberAbandoned.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Created,
    Suspended,
    Running,
    Finished,
}

pub struct Fiber {
    block: Arc<Proc>,
    state: Mutex<FiberState>,
    link: Arc<Link>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Object for Fiber {}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("state", &*self.state.lock()).finish()
    }
}

impl Fiber {
    pub fn new(block: Arc<Proc>) -> Self {
        Self {
            block,
            state: Mutex::new(FiberState::Created),
            link: Arc::new(Link::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> FiberState {
        *self.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        self.state() != FiberState::Finished
    }

    /// Run the fiber until it yields or finishes. The first resume passes
    /// `args` to the block; later ones become the value of `Fiber.yield`.
    pub fn resume(&self, vm: &mut Vm, args: Vec<Value>) -> Result<Value, Unwind> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                FiberState::Finished => {
                    drop(state);
                    return Err(vm.error(ErrorKind::Fiber, "dead fiber called"));
                }
                FiberState::Running => {
                    drop(state);
                    return Err(vm.error(ErrorKind::Fiber, "attempt to resume the current fiber"));
                }
                FiberState::Created | FiberState::Suspended => *state = FiberState::Running,
            }
            previous
        };
        if previous == FiberState::Created {
            if let Err(err) = self.start(vm, args) {
                *self.state.lock() = FiberState::Finished;
                return Err(err);
            }
        } else {
            self.link.to_fiber.send(Transfer::Resume(args));
        }
        match self.link.to_resumer.receive() {
            Transfer::Yield(value) => {
                *self.state.lock() = FiberState::Suspended;
                Ok(value)
            }
            Transfer::Finished(result) => {
                *self.state.lock() = FiberState::Finished;
                if let Some(handle) = self.thread.lock().take() {
                    let _ = handle.join();
                }
                debug!("fiber finished");
                result.map_err(|unwind| match unwind {
                    Unwind::Raise(_) | Unwind::Fault(_) => unwind,
                    _ => Fault::StrayJump("break").into(),
                })
            }
            _ => Err(Fault::FiberAbandoned.into()),
        }
    }

    fn start(&self, vm: &Vm, args: Vec<Value>) -> Result<(), Unwind> {
        let link = Arc::clone(&self.link);
        let block = Arc::clone(&self.block);
        let dispatch = Arc::clone(vm.dispatch());
        let context = Arc::clone(vm.context());
        let mut config = vm.config().clone();
        config.native_stack = config.native_stack.min(FIBER_STACK / 4 * 3);
        let handle = thread::Builder::new()
            .name("fiber".into())
            .stack_size(FIBER_STACK)
            .spawn(move || {
                let mut vm = Vm::for_fiber(dispatch, context, config, Arc::clone(&link));
                let result = vm.call_block(&block, Args { positional: args, ..Args::default() });
                link.to_resumer.send(Transfer::Finished(result));
            })
            .map_err(|err| Fault::FiberThread(err.to_string()))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if *self.state.get_mut() == FiberState::Suspended {
            // The thread is parked in `suspend`; let it unwind and exit.
            self.link.to_fiber.send(Transfer::Abandon);
        }
    }
}

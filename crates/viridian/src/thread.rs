use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::context::Context;
use crate::stack::Stack;

/// Entry point of a spawned green thread.
pub type Entry = extern "C" fn(*mut c_void);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Thread identifier, process-wide unique and never reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadId(u64);

impl ThreadId {
    fn next() -> Self {
        ThreadId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn val(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a green thread.
///
/// `Zombie` is final: no transition method leaves it, and the scheduler never
/// selects a zombie for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not runnable until a yield explicitly permits waiting threads.
    Waiting,
    /// Runnable, sitting in the queue.
    Ready,
    /// Executing on some execution unit; at most one per unit.
    Running,
    /// Finished; retained in the queue only until garbage collection.
    Zombie,
}

/// A green thread: identity, lifecycle state, optionally owned stack, and
/// saved machine context.
///
/// The distinguished initial thread of an execution unit runs on the host OS
/// thread's own stack and owns none (`stack` is `None`); that absence is also
/// what marks it as pinned to its home unit.
pub struct GreenThread {
    id: ThreadId,
    state: State,
    stack: Option<Stack>,
    pub(crate) context: Context,
}

impl GreenThread {
    /// The initial thread for an execution unit, representing the host OS
    /// thread's pre-existing stack.
    pub(crate) fn initial() -> Self {
        Self {
            id: ThreadId::next(),
            state: State::Waiting,
            stack: None,
            context: Context::default(),
        }
    }

    /// A spawned thread with an owned stack and a manufactured initial frame.
    pub(crate) fn spawned(entry: Entry, arg: *mut c_void) -> Self {
        let mut stack = Stack::new();
        let context = Context::with_initial_frame(&mut stack, entry, arg);
        Self {
            id: ThreadId::next(),
            state: State::Waiting,
            stack: Some(stack),
            context,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether this is the initial thread of some execution unit. Such a
    /// thread must never be resumed on a different unit.
    pub(crate) fn is_initial(&self) -> bool {
        self.stack.is_none()
    }

    /// Ready/Waiting -> Running, when selected by a yield.
    pub(crate) fn run(&mut self) {
        assert!(
            self.state != State::Zombie,
            "thread {} is a zombie and can never run again",
            self.id
        );
        self.state = State::Running;
    }

    /// Running -> Ready. A thread that parked itself before yielding is not
    /// re-promoted; any other state is left untouched.
    pub(crate) fn demote(&mut self) {
        if self.state == State::Running {
            self.state = State::Ready;
        }
    }

    /// -> Waiting, used by a thread parking itself until others finish.
    pub(crate) fn park(&mut self) {
        assert!(
            self.state != State::Zombie,
            "thread {} is a zombie and cannot park",
            self.id
        );
        self.state = State::Waiting;
    }

    /// Running -> Zombie, when the entry wrapper completes.
    pub(crate) fn finish(&mut self) {
        self.state = State::Zombie;
    }

    /// Writes id, state, and raw context fields to the diagnostic stream.
    /// Debugging aid only, not part of the correctness contract.
    pub fn print_debug(&self) {
        debug!("thread {}: {:?}", self.id, self.state);
        match &self.stack {
            Some(stack) => debug!("  stack: {:p}", stack.base()),
            None => debug!("  stack: host"),
        }
        debug!("  rsp:   {:#018x}", self.context.rsp);
        debug!("  r15:   {:#018x}", self.context.r15);
        debug!("  r14:   {:#018x}", self.context.r14);
        debug!("  r13:   {:#018x}", self.context.r13);
        debug!("  r12:   {:#018x}", self.context.r12);
        debug!("  rbx:   {:#018x}", self.context.rbx);
        debug!("  rbp:   {:#018x}", self.context.rbp);
        debug!("  mxcsr: {:#x}", self.context.mxcsr);
        debug!("  x87:   {:#x}", self.context.x87);
    }
}

impl fmt::Debug for GreenThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GreenThread")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stack", &self.stack.as_ref().map(Stack::base))
            .field("context", &self.context)
            .finish()
    }
}

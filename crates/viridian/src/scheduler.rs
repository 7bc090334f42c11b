//! Ready queue and per-execution-unit scheduler.
//!
//! One [`Scheduler`] exists per OS thread that hosts green threads. Several
//! schedulers may share one [`RunQueue`]; every queue inspection or mutation
//! happens under its single lock, which is never held across a context
//! switch. The currently running thread and the identity of the unit's
//! initial thread are unit-local and unlocked.

use std::cell::Cell;
use std::collections::VecDeque;
use std::ffi::c_void;
use std::mem;
use std::process;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error};

use crate::context;
use crate::context::Context;
use crate::thread::{Entry, GreenThread, State, ThreadId};

/// Queue of green threads that are not currently running.
///
/// Shareable between execution units via `Arc`; all access goes through one
/// internal lock.
pub struct RunQueue {
    threads: Mutex<VecDeque<Box<GreenThread>>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Box<GreenThread>>> {
        // A poisoned queue is still structurally intact; keep going.
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_front(&self, thread: Box<GreenThread>) {
        self.lock().push_front(thread);
    }

    fn push_back(&self, thread: Box<GreenThread>) {
        self.lock().push_back(thread);
    }

    /// Removes and returns the first eligible thread in queue order.
    ///
    /// `Ready` always qualifies; `Waiting` qualifies unless `only_ready`. An
    /// initial thread belonging to a different execution unit never
    /// qualifies.
    fn take(&self, only_ready: bool, local_initial: ThreadId) -> Option<Box<GreenThread>> {
        let mut queue = self.lock();
        let position = queue.iter().position(|thread| {
            if thread.is_initial() && thread.id() != local_initial {
                return false;
            }
            match thread.state() {
                State::Ready => true,
                State::Waiting => !only_ready,
                State::Running | State::Zombie => false,
            }
        })?;
        queue.remove(position)
    }

    /// Garbage collection: one pass dropping every zombie. Dropping a thread
    /// frees its owned stack; survivors keep their order.
    pub fn collect(&self) {
        self.lock().retain(|thread| thread.state() != State::Zombie);
    }

    /// Snapshot of queued threads, partitioned as `(live, zombie)`.
    pub fn thread_count(&self) -> (usize, usize) {
        let queue = self.lock();
        let zombie = queue
            .iter()
            .filter(|thread| thread.state() == State::Zombie)
            .count();
        (queue.len() - zombie, zombie)
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    // Scheduler hosting the green thread that is executing on this OS
    // thread. Published immediately before every switch so the entry
    // wrapper and the free functions can reach whichever unit resumed them.
    static CURRENT: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
}

/// Per-execution-unit scheduler.
///
/// Owns the unit's currently running thread and the identity of its initial
/// thread; shares a [`RunQueue`] with any other units created over the same
/// queue. Create exactly one per OS thread before any other operation.
pub struct Scheduler {
    queue: Arc<RunQueue>,
    current: Box<GreenThread>,
    initial_id: ThreadId,
}

impl Scheduler {
    /// Sets up an execution unit with a private queue.
    pub fn new() -> Self {
        Self::with_queue(Arc::new(RunQueue::new()))
    }

    /// Sets up an execution unit over an existing shared queue.
    ///
    /// The calling OS thread's pre-existing stack becomes the unit's initial
    /// thread: no stack is allocated for it and it is recorded as both the
    /// running thread and the unit's pinned identity.
    pub fn with_queue(queue: Arc<RunQueue>) -> Self {
        let current = Box::new(GreenThread::initial());
        let initial_id = current.id();
        debug!("initialized execution unit with thread {initial_id}");
        Self {
            queue,
            current,
            initial_id,
        }
    }

    /// Handle to the shared ready queue.
    pub fn queue(&self) -> Arc<RunQueue> {
        Arc::clone(&self.queue)
    }

    /// Identity of the thread currently running on this unit.
    pub fn current_id(&self) -> ThreadId {
        self.current.id()
    }

    /// Creates a green thread and immediately favors it.
    ///
    /// The new thread goes to the front of the queue and the caller yields,
    /// so freshly spawned work runs before older queued work. Stack
    /// allocation failure aborts the process.
    pub fn spawn(&mut self, entry: Entry, arg: *mut c_void) {
        let thread = Box::new(GreenThread::spawned(entry, arg));
        debug!("spawning thread {}", thread.id());
        self.queue.push_front(thread);
        self.yield_now(false);
    }

    /// Switches to the first eligible queued thread, if any.
    ///
    /// With `only_ready` set, parked (`Waiting`) threads are not considered.
    /// Returns `false` without switching when no thread qualifies. On a
    /// switch, the previously running thread is demoted to `Ready` (unless
    /// it parked itself first) and pushed to the back of the queue; once
    /// control eventually returns here, a garbage-collection pass runs
    /// before the call reports `true`.
    pub fn yield_now(&mut self, only_ready: bool) -> bool {
        let Some(mut next) = self.queue.take(only_ready, self.initial_id) else {
            return false;
        };

        self.current.demote();
        next.run();

        let mut previous = mem::replace(&mut self.current, next);
        let old: *mut Context = &mut previous.context;
        let new: *const Context = &self.current.context;
        self.queue.push_back(previous);

        let this: *mut Scheduler = self;
        CURRENT.with(|cell| cell.set(this));
        // The queue lock is not held across the switch; the boxed contexts
        // stay put while their threads sit in the queue.
        unsafe { context::switch(old, new) };

        self.queue.collect();
        true
    }

    /// Parks the calling thread until no other runnable work remains.
    ///
    /// Intended for the unit's initial thread. The caller stays `Waiting`
    /// while ready threads drain; it resumes (still `Waiting`) once a
    /// ready-only yield finds nothing.
    pub fn wait(&mut self) {
        self.current.park();
        while self.yield_now(true) {
            self.current.park();
        }
    }

    /// Queued-thread counts as `(live, zombie)`.
    pub fn thread_count(&self) -> (usize, usize) {
        self.queue.thread_count()
    }

    /// Dumps the current thread's id, state, and raw context fields to the
    /// diagnostic stream.
    pub fn print_debug(&self) {
        self.current.print_debug();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let this: *mut Scheduler = self;
        CURRENT.with(|cell| {
            if cell.get() == this {
                cell.set(ptr::null_mut());
            }
        });
    }
}

// Resolves the scheduler hosting the calling green thread. Calling into the
// runtime from an OS thread that never set up a scheduler is fatal.
fn current_scheduler() -> &'static mut Scheduler {
    let scheduler = CURRENT.with(Cell::get);
    assert!(
        !scheduler.is_null(),
        "no scheduler on this execution unit; create one with Scheduler::new first"
    );
    // The pointer was published by a yield frame that is suspended until
    // control leaves this green thread, so the scheduler is live.
    unsafe { &mut *scheduler }
}

/// Entry wrapper: runs the user's entry function, then retires the thread.
///
/// Invoked by the trampoline on a spawned thread's first resume. After the
/// entry function returns the thread becomes a zombie and yields away for
/// good; a zombie is never selected again, so control coming back here means
/// the scheduler's state is corrupt and the process aborts.
pub(crate) extern "C" fn thread_entry(entry: Entry, arg: *mut c_void) -> ! {
    entry(arg);

    let scheduler = current_scheduler();
    scheduler.current.finish();
    debug!("thread {} exiting", scheduler.current.id());
    scheduler.yield_now(false);

    error!("zombie thread resumed");
    process::abort();
}

/// Spawns a green thread on the calling thread's execution unit.
///
/// Free-function form of [`Scheduler::spawn`] for use inside green threads.
pub fn spawn(entry: Entry, arg: *mut c_void) {
    current_scheduler().spawn(entry, arg);
}

/// Yields the calling green thread; see [`Scheduler::yield_now`].
pub fn yield_now(only_ready: bool) -> bool {
    current_scheduler().yield_now(only_ready)
}

/// Parks the calling green thread until no ready work remains; see
/// [`Scheduler::wait`].
pub fn wait() {
    loop {
        // Re-resolve each round: the thread may have been resumed by a
        // different execution unit.
        let scheduler = current_scheduler();
        scheduler.current.park();
        if !scheduler.yield_now(true) {
            break;
        }
    }
}

/// Queued-thread counts for the calling thread's unit, as `(live, zombie)`.
pub fn thread_count() -> (usize, usize) {
    current_scheduler().thread_count()
}

//! Cooperative green-threads runtime for x86-64.
//!
//! Many logical threads are multiplexed onto one or more OS threads
//! ("execution units") with no preemption: a green thread keeps running
//! until it spawns, yields, or finishes. Each unit sets up one [`Scheduler`]
//! over a [`RunQueue`] that may be private or shared between units; thread
//! bodies use the free functions ([`spawn`], [`yield_now`], [`wait`],
//! [`thread_count`]) to reach whichever unit is hosting them.
//!
//! ```no_run
//! use std::ffi::c_void;
//! use viridian::Scheduler;
//!
//! extern "C" fn hello(_arg: *mut c_void) {
//!     println!("hello from a green thread");
//!     viridian::yield_now(false);
//! }
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.spawn(hello, std::ptr::null_mut());
//! scheduler.wait();
//! ```
//!
//! The cooperative contract cuts both ways: switches cost a handful of
//! register moves, and a thread that never yields runs forever. Blocking
//! syscalls are not intercepted; a green thread that blocks on I/O blocks
//! its whole execution unit.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!("viridian targets the x86-64 System V calling convention only");

mod context;
mod scheduler;
mod stack;
mod thread;

pub use context::Context;
pub use scheduler::{spawn, thread_count, wait, yield_now, RunQueue, Scheduler};
pub use stack::{Stack, STACK_SIZE};
pub use thread::{Entry, GreenThread, State, ThreadId};

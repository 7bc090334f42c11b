//! Machine context and the raw switch primitive.
//!
//! This is the narrow unsafe boundary of the runtime: a `Context` records the
//! x86-64 System V callee-saved state of a suspended green thread, and
//! [`switch`] swaps the running state for a saved one in a single assembly
//! sequence. Everything above this module is ordinary safe Rust.

use std::arch::naked_asm;
use std::ffi::c_void;

use crate::stack::Stack;
use crate::thread::Entry;

// Initial control words for a thread that has never run: SSE with all
// exceptions masked, x87 at its reset configuration.
const MXCSR_INIT: u32 = 0x1F80;
const X87_INIT: u16 = 0x037F;

/// Saved machine state of a suspended green thread.
///
/// Field order is load-bearing: the assembly in [`switch`] addresses each
/// field by its byte offset within this struct.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub(crate) rsp: u64,   // 0x00
    pub(crate) r15: u64,   // 0x08
    pub(crate) r14: u64,   // 0x10
    pub(crate) r13: u64,   // 0x18
    pub(crate) r12: u64,   // 0x20
    pub(crate) rbx: u64,   // 0x28
    pub(crate) rbp: u64,   // 0x30
    pub(crate) mxcsr: u32, // 0x38
    pub(crate) x87: u16,   // 0x3c
}

const _: () = assert!(std::mem::size_of::<Context>() == 0x40);

impl Default for Context {
    fn default() -> Self {
        Self {
            rsp: 0,
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            mxcsr: MXCSR_INIT,
            x87: X87_INIT,
        }
    }
}

impl Context {
    /// Builds the context of a freshly spawned thread, manufacturing its
    /// initial stack frame.
    ///
    /// Layout at the high end of the stack, top downward: one unused slot
    /// (keeps the frame 16-byte aligned once `ret` has consumed the
    /// trampoline address), the entry argument, the entry function pointer,
    /// and the address of [`start_thread`]. The saved stack pointer aims at
    /// the trampoline slot, so the first switch into this context "returns"
    /// into [`start_thread`] with the entry pointer and argument on top of
    /// the stack.
    pub(crate) fn with_initial_frame(stack: &mut Stack, entry: Entry, arg: *mut c_void) -> Self {
        let mut context = Context::default();
        let trampoline: extern "C" fn() = start_thread;
        unsafe {
            let top = stack.top();
            (top.sub(16) as *mut u64).write(arg as u64);
            (top.sub(24) as *mut u64).write(entry as usize as u64);
            (top.sub(32) as *mut u64).write(trampoline as usize as u64);
            context.rsp = top.sub(32) as u64;
        }
        context
    }
}

/// Suspends the calling green thread into `old` and resumes `new`.
///
/// Saves the stack pointer, the System V callee-saved registers, the SSE
/// control/status word, and the x87 control word into `old`, loads the same
/// fields from `new`, and transfers control through the address on top of
/// the restored stack. The call returns only when some later switch restores
/// `old`.
///
/// There is no failure path and no allocation.
///
/// # Safety
///
/// `old` must be writable and `new` must hold a context that was either
/// saved by a previous `switch` or built by [`Context::with_initial_frame`].
/// A corrupt or misaligned saved stack pointer is undefined behavior.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save the caller's state into *rdi.
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], r15",
        "mov [rdi + 0x10], r14",
        "mov [rdi + 0x18], r13",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], rbx",
        "mov [rdi + 0x30], rbp",
        "stmxcsr [rdi + 0x38]",
        "fnstcw [rdi + 0x3c]",
        // Load the new state from *rsi.
        "mov rsp, [rsi + 0x00]",
        "mov r15, [rsi + 0x08]",
        "mov r14, [rsi + 0x10]",
        "mov r13, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov rbx, [rsi + 0x28]",
        "mov rbp, [rsi + 0x30]",
        "ldmxcsr [rsi + 0x38]",
        "fldcw [rsi + 0x3c]",
        // Resume wherever the new stack says: either a suspended switch call
        // site or the trampoline slot of a manufactured frame.
        "ret",
    )
}

/// Trampoline executed the first time a spawned thread is resumed.
///
/// The switch's `ret` lands here with the manufactured frame still on the
/// stack: the entry function pointer at `rsp` and its argument at `rsp + 8`.
/// Both move into the System V argument registers, the stack is realigned,
/// and control passes to the entry wrapper, which never returns.
#[unsafe(naked)]
pub(crate) extern "C" fn start_thread() {
    naked_asm!(
        "mov rdi, [rsp]",
        "mov rsi, [rsp + 8]",
        "and rsp, -16",
        "call {entry}",
        "ud2",
        entry = sym crate::scheduler::thread_entry,
    )
}

//! End-to-end tests over the public runtime surface.

use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use viridian::Scheduler;

struct CounterState {
    counter: AtomicUsize,
    iterations: usize,
}

extern "C" fn increment_entry(arg: *mut c_void) {
    let state = unsafe { &*arg.cast::<CounterState>() };
    for _ in 0..state.iterations {
        state.counter.fetch_add(1, Ordering::SeqCst);
        viridian::yield_now(false);
    }
}

fn run_counters(workers: usize, iterations: usize) -> usize {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = CounterState {
        counter: AtomicUsize::new(0),
        iterations,
    };
    let mut scheduler = Scheduler::new();
    for _ in 0..workers {
        scheduler.spawn(increment_entry, &state as *const CounterState as *mut c_void);
    }
    scheduler.wait();
    assert_eq!(scheduler.thread_count(), (0, 0));
    state.counter.load(Ordering::SeqCst)
}

// N threads that each increment K times with a yield in between must land on
// exactly N * K: nothing lost or duplicated across switches, and every loop
// counter survives suspension.
#[test]
fn interleaved_counters_are_exact() {
    assert_eq!(run_counters(5, 25), 125);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn counters_are_exact_for_any_shape(workers in 1usize..6, iterations in 1usize..40) {
        prop_assert_eq!(run_counters(workers, iterations), workers * iterations);
    }
}

struct OrderState {
    order: Mutex<Vec<&'static str>>,
}

extern "C" fn record_after_yield(arg: *mut c_void) {
    let state = unsafe { &*arg.cast::<OrderState>() };
    viridian::yield_now(false);
    state.order.lock().unwrap().push("A");
}

extern "C" fn record_now(arg: *mut c_void) {
    let state = unsafe { &*arg.cast::<OrderState>() };
    state.order.lock().unwrap().push("B");
}

// Spawn inserts at the front of the queue, so the most recently spawned
// thread runs first: with A yielding back to the parent before recording,
// B's first action lands before A's.
#[test]
fn latest_spawn_runs_first() {
    let state = OrderState {
        order: Mutex::new(Vec::new()),
    };
    let arg = &state as *const OrderState as *mut c_void;

    let mut scheduler = Scheduler::new();
    scheduler.spawn(record_after_yield, arg);
    scheduler.spawn(record_now, arg);
    scheduler.wait();

    let order = state.order.lock().unwrap();
    let a = order.iter().position(|s| *s == "A").unwrap();
    let b = order.iter().position(|s| *s == "B").unwrap();
    assert!(b < a, "expected B before A, got {:?}", *order);
}

const ROUND_TOWARD_ZERO: u32 = 0b11 << 13;

struct FpState {
    observed: AtomicU32,
}

extern "C" fn fp_entry(arg: *mut c_void) {
    let state = unsafe { &*arg.cast::<FpState>() };
    unsafe { _mm_setcsr(0x1F80 | ROUND_TOWARD_ZERO) };
    viridian::yield_now(false);
    state.observed.store(unsafe { _mm_getcsr() }, Ordering::SeqCst);
    unsafe { _mm_setcsr(0x1F80) };
}

// A thread's floating-point control state is part of its context: a rounding
// mode set before a yield is still in force on resume, and the host's own
// control word comes back untouched.
#[test]
fn fp_control_state_round_trips() {
    let state = FpState {
        observed: AtomicU32::new(0),
    };
    let mut scheduler = Scheduler::new();
    scheduler.spawn(fp_entry, &state as *const FpState as *mut c_void);

    // The spawned thread changed its rounding mode and yielded back; the
    // host's control word was restored from its own context.
    assert_eq!(unsafe { _mm_getcsr() }, 0x1F80);

    scheduler.wait();
    assert_eq!(
        state.observed.load(Ordering::SeqCst),
        0x1F80 | ROUND_TOWARD_ZERO
    );
}

struct GateState {
    started: AtomicBool,
    release: AtomicBool,
}

extern "C" fn hold_unit(arg: *mut c_void) {
    let state = unsafe { &*arg.cast::<GateState>() };
    state.started.store(true, Ordering::SeqCst);
    while !state.release.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }
}

// Two execution units over one shared queue. While unit A's green thread
// holds that unit, A's parked initial thread is the only queued thread; unit
// B may count it under the lock but must never select it.
#[test]
fn initial_thread_never_migrates_between_units() {
    let state = Arc::new(GateState {
        started: AtomicBool::new(false),
        release: AtomicBool::new(false),
    });

    let mut scheduler = Scheduler::new();
    let queue = scheduler.queue();

    let observer_state = Arc::clone(&state);
    let observer = std::thread::spawn(move || {
        let mut unit = Scheduler::with_queue(queue);
        while !observer_state.started.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        // Unit A is pinned inside its spinning thread, so its initial
        // thread sits in the queue, parked.
        assert_eq!(unit.thread_count(), (1, 0));
        assert!(!unit.yield_now(false));
        observer_state.release.store(true, Ordering::SeqCst);
    });

    scheduler.spawn(hold_unit, Arc::as_ptr(&state) as *mut c_void);
    scheduler.wait();
    observer.join().unwrap();

    assert_eq!(scheduler.thread_count(), (0, 0));
}

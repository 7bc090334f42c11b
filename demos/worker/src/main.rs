use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use log::info;
use viridian::Scheduler;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of green worker threads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of work items to process
    #[arg(long, default_value_t = 16)]
    items: usize,
}

struct Pool {
    next: AtomicUsize,
    items: usize,
}

extern "C" fn worker(arg: *mut c_void) {
    let pool = unsafe { &*arg.cast::<Pool>() };
    loop {
        let item = pool.next.fetch_add(1, Ordering::SeqCst);
        if item >= pool.items {
            break;
        }
        info!("processing item {item}");
        viridian::yield_now(false);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let pool = Pool {
        next: AtomicUsize::new(0),
        items: cli.items,
    };

    let mut scheduler = Scheduler::new();
    for _ in 0..cli.workers {
        scheduler.spawn(worker, &pool as *const Pool as *mut c_void);
    }
    scheduler.wait();

    println!("processed {} items on {} workers", cli.items, cli.workers);
}

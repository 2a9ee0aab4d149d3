//! Kernel boot sequence (component R: ambient boot/config plumbing).
//!
//! Order follows the reference kernel's own `init()` in spirit (memory
//! before threads, threads before anything that can block): memory, then
//! process/scheduler bookkeeping, then the scheduler itself, with the idle
//! task registered last so `sched::run` always has something to dispatch
//! into on its very first switch.

use crate::{arch, error::KernelResult, mm, println, process, sched, sched::task::Task};

/// Multi-stage kernel initialization, in the order the reference kernel's
/// own boot sequence uses: memory management has to exist before the
/// scheduler can hand out PCB pages, and the scheduler has to exist before
/// anything that blocks (console input, disk I/O) can run.
pub fn kernel_init() -> KernelResult<()> {
    crate::logging::init();

    println!(
        "[BOOTSTRAP] tinyos-kernel {} ({}, built {})",
        crate::utils::version::pkg_version(),
        crate::utils::version::git_hash_short(),
        crate::utils::version::build_timestamp()
    );

    println!("[BOOTSTRAP] Stage 1: architecture");
    arch::x86_64::init();
    println!("[BOOTSTRAP] Architecture initialized");

    println!("[BOOTSTRAP] Stage 2: memory management");
    mm::init();
    println!("[BOOTSTRAP] Memory management initialized");

    println!("[BOOTSTRAP] Stage 3: process management");
    process::init();
    println!("[BOOTSTRAP] Process management initialized");

    println!("[BOOTSTRAP] Stage 4: scheduler");
    sched::init();
    let idle = Task::create_idle()?;
    sched::spawn_idle(idle);
    println!("[BOOTSTRAP] Scheduler initialized");

    println!("[BOOTSTRAP] Stage 5: timer");
    arch::x86_64::timer::setup_timer();
    arch::x86_64::unmask_irq(0);
    println!("[BOOTSTRAP] Timer initialized");

    println!("[BOOTSTRAP] Stage 6: device drivers");
    crate::drivers::init();
    arch::x86_64::unmask_irq(1); // keyboard
    arch::x86_64::unmask_irq(14); // ATA primary
    arch::x86_64::unmask_irq(15); // ATA secondary
    println!("[BOOTSTRAP] Device drivers initialized");

    println!("[BOOTSTRAP] Stage 7: file system");
    crate::fs::init();
    println!("[BOOTSTRAP] File system initialized");

    println!("[BOOTSTRAP] Stage 8: services");
    crate::services::init();
    println!("[BOOTSTRAP] Services initialized");

    Ok(())
}

/// Run the bootstrap sequence and hand off to the scheduler. Never returns.
pub fn run() -> ! {
    if let Err(e) = kernel_init() {
        // Panic is intentional: kernel_init failure during boot is
        // unrecoverable. No subsystem is up yet to handle it gracefully.
        panic!("Bootstrap failed: {:?}", e);
    }

    println!("[BOOTSTRAP] Boot sequence complete, entering scheduler");
    arch::x86_64::enable_interrupts();
    sched::run();
}
